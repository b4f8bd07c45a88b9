//! Connect-out tunnel client: dial the hub, authenticate, register, and run
//! the dispatcher until disconnected, then back off and retry. Grounded on
//! the teacher's `tunnel::client::connect_and_run` + `tunnel::mod::run`.

use std::sync::Arc;
use std::time::Duration;

use camtunnel_core::frame::{decode_text, encode_handshake, encode_text};
use camtunnel_core::protocol::{tag, RegisterPayload};
use futures_util::stream::StreamExt;
use rand::Rng;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::Connector;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::fs_provider::FilesystemProvider;

use super::{dispatcher, writer, TunnelSession};

enum TunnelOutcome {
    Shutdown,
    Disconnected,
}

/// Run the reconnect loop until `shutdown` fires.
pub async fn run(config: Arc<Config>, fs: Arc<FilesystemProvider>, mut shutdown: watch::Receiver<bool>) {
    let mut attempt: u32 = 0;

    loop {
        match connect_and_run(&config, &fs, &mut shutdown).await {
            Ok(TunnelOutcome::Shutdown) => {
                info!("tunnel shut down gracefully");
                return;
            }
            Ok(TunnelOutcome::Disconnected) => {
                info!("tunnel disconnected, will reconnect");
                attempt = 0;
            }
            Err(e) => {
                warn!(error = %e, "tunnel connection attempt failed");
                attempt = attempt.saturating_add(1);
            }
        }

        if *shutdown.borrow() {
            info!("shutdown requested, not reconnecting");
            return;
        }

        let delay = next_reconnect_delay(&config, attempt);
        debug!(delay_ms = delay.as_millis(), "reconnecting tunnel");

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => {
                info!("shutdown requested during reconnect wait");
                return;
            }
        }
    }
}

fn next_reconnect_delay(config: &Config, attempt: u32) -> Duration {
    let base = config.reconnect_base_delay_ms;
    let max = config.reconnect_max_delay_ms;
    let backoff = base.saturating_mul(1u64 << attempt.min(16)).min(max);
    let jitter = rand::thread_rng().gen_range(0..=(backoff / 4).max(1));
    Duration::from_millis(backoff.saturating_sub(jitter / 2))
}

async fn connect_and_run(config: &Arc<Config>, fs: &Arc<FilesystemProvider>, shutdown: &mut watch::Receiver<bool>) -> anyhow::Result<TunnelOutcome> {
    let ws_url = build_tunnel_url(&config.hub_url);
    info!(url = %ws_url, "connecting tunnel");

    let request = ws_url.clone().into_client_request()?;
    let uri: http::Uri = ws_url.parse()?;
    let host = uri.host().ok_or_else(|| anyhow::anyhow!("missing host in hub URL"))?.to_string();
    let is_tls = uri.scheme_str() == Some("wss");
    let port = uri.port_u16().unwrap_or(if is_tls { 443 } else { 80 });

    let connect_timeout = Duration::from_secs(config.connect_timeout_secs);
    let tcp_stream = tokio::time::timeout(connect_timeout, TcpStream::connect((host.as_str(), port)))
        .await
        .map_err(|_| anyhow::anyhow!("tunnel TCP connect timeout ({}s)", connect_timeout.as_secs()))??;

    configure_tcp_socket(&tcp_stream, config);

    let connector = if is_tls {
        Some(Connector::Rustls(Arc::new(build_tls_config())))
    } else {
        None
    };

    let (ws_stream, _response) = tokio::time::timeout(
        connect_timeout,
        tokio_tungstenite::client_async_tls_with_config(request, tcp_stream, None, connector),
    )
    .await
    .map_err(|_| anyhow::anyhow!("tunnel websocket handshake timeout ({}s)", connect_timeout.as_secs()))??;

    info!("tunnel connected, authenticating");

    let (ws_sink, mut ws_read) = ws_stream.split();
    let (writer_tx, writer_handle) = writer::spawn_writer(ws_sink);

    writer_tx.send(Message::Text(encode_handshake(&config.device_token).into())).await?;

    match ws_read.next().await {
        Some(Ok(Message::Text(text))) => {
            let decoded = decode_text(&text)?;
            if decoded.kind == tag::AUTH_FAIL {
                anyhow::bail!("hub rejected device token");
            } else if decoded.kind != tag::AUTH_OK {
                anyhow::bail!("unexpected frame during auth: {}", decoded.kind);
            }
        }
        other => anyhow::bail!("hub closed connection during auth: {other:?}"),
    }

    let register = RegisterPayload {
        device_id: config.device_id.clone(),
        camera_ids: config.camera_ids.clone(),
    };
    let text = encode_text(uuid::Uuid::nil(), tag::REGISTER, &register)?;
    writer_tx.send(Message::Text(text.into())).await?;
    info!(device_id = %config.device_id, cameras = config.camera_ids.len(), "registered with hub");

    let session = Arc::new(TunnelSession::new(
        config.device_id.clone(),
        writer_tx,
        fs.clone(),
        config.chunk_size_bytes,
    ));

    let heartbeat_timeout = Duration::from_secs(config.heartbeat_timeout_secs);
    let session_clone = session.clone();
    let outcome = tokio::select! {
        () = dispatcher::run(ws_read, session_clone, heartbeat_timeout) => TunnelOutcome::Disconnected,
        _ = shutdown.changed() => {
            session.close();
            TunnelOutcome::Shutdown
        }
    };

    drop(session);
    if !writer_handle.is_finished() {
        let _ = tokio::time::timeout(Duration::from_secs(5), writer_handle).await;
    }

    Ok(outcome)
}

fn configure_tcp_socket(stream: &TcpStream, config: &Config) {
    let sock_ref = socket2::SockRef::from(stream);

    if config.tcp_keepalive_secs > 0 {
        let keepalive = socket2::TcpKeepalive::new()
            .with_time(Duration::from_secs(config.tcp_keepalive_secs))
            .with_interval(Duration::from_secs(5));
        #[cfg(not(target_os = "windows"))]
        let keepalive = keepalive.with_retries(3);
        if let Err(e) = sock_ref.set_tcp_keepalive(&keepalive) {
            warn!(error = %e, "failed to set TCP keepalive on tunnel socket");
        }
    }

    if config.tcp_nodelay {
        if let Err(e) = sock_ref.set_nodelay(true) {
            warn!(error = %e, "failed to set TCP_NODELAY on tunnel socket");
        }
    }
}

fn build_tls_config() -> rustls::ClientConfig {
    let root_store = rustls::RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth()
}

fn build_tunnel_url(hub_url: &str) -> String {
    let base = hub_url.trim_end_matches('/');
    let ws_base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        format!("wss://{base}")
    };
    format!("{ws_base}/tunnel")
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn builds_wss_url_from_https() {
        assert_eq!(build_tunnel_url("https://hub.example.com"), "wss://hub.example.com/tunnel");
    }

    #[test]
    fn builds_ws_url_from_http() {
        assert_eq!(build_tunnel_url("http://localhost:8080/"), "ws://localhost:8080/tunnel");
    }

    #[test]
    fn reconnect_delay_respects_max() {
        let config = Config::try_parse_from([
            "camtunnel-agent",
            "--hub-url", "http://h",
            "--device-id", "d",
            "--device-token", "t",
            "--recordings-root", "/tmp",
            "--reconnect-base-delay-ms", "500",
            "--reconnect-max-delay-ms", "2000",
        ])
        .unwrap();
        for attempt in 0..10 {
            assert!(next_reconnect_delay(&config, attempt) <= Duration::from_millis(2000));
        }
    }
}
