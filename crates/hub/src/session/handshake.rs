//! Accepts a freshly-upgraded WebSocket: validates the shared token, reads
//! the `REGISTER` frame, and installs the session in the registry
//! (SPEC_FULL §4.2, §4.3, §6 "connection lifecycle").

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use camtunnel_core::frame::{decode_text, encode_text};
use camtunnel_core::protocol::{tag, AuthFailPayload, RegisterPayload};
use futures_util::stream::StreamExt;
use subtle::ConstantTimeEq;
use tracing::{info, warn};
use uuid::Uuid;

use crate::registry::DeviceRegistry;
use crate::session::{writer, CloseReason, TunnelSession};

pub async fn run(socket: WebSocket, device_token: String, handshake_timeout: Duration, registry: Arc<DeviceRegistry>, heartbeat_timeout: Duration) {
    let (sink, mut stream) = socket.split();
    let (writer_tx, writer_handle) = writer::spawn_writer(sink);

    let handshake = tokio::time::timeout(handshake_timeout, async {
        let token = read_handshake_token(&mut stream).await?;
        if !token_matches(&token, &device_token) {
            let _ = writer_tx
                .send(Message::Text(
                    encode_text(Uuid::nil(), tag::AUTH_FAIL, &AuthFailPayload {
                        reason: "invalid token".to_string(),
                    })
                    .unwrap_or_default()
                    .into(),
                ))
                .await;
            return None;
        }
        let _ = writer_tx
            .send(Message::Text(encode_text(Uuid::nil(), tag::AUTH_OK, &serde_json::json!({})).unwrap_or_default().into()))
            .await;

        let register = read_register(&mut stream).await?;
        Some(register)
    })
    .await;

    let register = match handshake {
        Ok(Some(register)) => register,
        Ok(None) => {
            warn!("device handshake failed authentication");
            drop(writer_tx);
            let _ = writer_handle.await;
            return;
        }
        Err(_) => {
            warn!("device handshake timed out");
            drop(writer_tx);
            let _ = writer_handle.await;
            return;
        }
    };

    let device_id = register.device_id.clone();
    let session = Arc::new(TunnelSession::new(device_id.clone(), register.camera_ids, writer_tx));

    if let Some(superseded) = registry.register(session.clone()) {
        info!(device_id = %device_id, "new connection supersedes existing session");
        superseded.close(CloseReason::Superseded).await;
    }
    info!(device_id = %device_id, cameras = session.camera_ids.len(), "device registered");

    let heartbeat_handle = super::heartbeat::spawn(session.clone(), heartbeat_timeout);
    super::dispatcher::run(stream, session.clone(), heartbeat_timeout).await;
    heartbeat_handle.abort();

    registry.deregister(&device_id, &session);
    let reason = session.close_reason().unwrap_or(CloseReason::TransportError);
    info!(device_id = %device_id, reason = reason.as_str(), "device session ended");
    let _ = writer_handle.await;
}

async fn read_handshake_token(stream: &mut (impl futures_util::Stream<Item = Result<Message, axum::Error>> + Unpin)) -> Option<String> {
    loop {
        match stream.next().await? {
            Ok(Message::Text(text)) => {
                let value: serde_json::Value = serde_json::from_str(&text).ok()?;
                return value.get("token")?.as_str().map(str::to_string);
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => return None,
        }
    }
}

async fn read_register(stream: &mut (impl futures_util::Stream<Item = Result<Message, axum::Error>> + Unpin)) -> Option<RegisterPayload> {
    loop {
        match stream.next().await? {
            Ok(Message::Text(text)) => {
                let msg = decode_text(&text).ok()?;
                if msg.kind != tag::REGISTER {
                    warn!(kind = %msg.kind, "expected REGISTER as first frame after auth");
                    return None;
                }
                return serde_json::from_value(msg.payload).ok();
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => return None,
        }
    }
}

fn token_matches(presented: &str, expected: &str) -> bool {
    presented.as_bytes().ct_eq(expected.as_bytes()).into()
}
