//! Application lifecycle: logging init, the tunnel reconnect loop, graceful
//! shutdown. Grounded on the teacher's `app.rs` shutdown-signal plumbing,
//! trimmed to a single connection target (the agent only ever talks to one
//! hub, unlike the teacher's multi-server pool).

use std::sync::Arc;

use tokio::signal;
use tokio::sync::watch;
use tracing::info;

use crate::config::Config;
use crate::fs_provider::FilesystemProvider;
use crate::session::client;

pub async fn run(config: Config) -> anyhow::Result<()> {
    init_tracing(&config);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        device_id = %config.device_id,
        hub_url = %config.hub_url,
        cameras = config.camera_ids.len(),
        "camtunnel-agent starting"
    );

    let fs = Arc::new(FilesystemProvider::new(config.recordings_root.clone(), config.camera_ids.clone()));
    let config = Arc::new(config);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_shutdown().await;
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    client::run(config, fs, shutdown_rx).await;

    info!("camtunnel-agent stopped");
    Ok(())
}

fn init_tracing(config: &Config) {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

async fn wait_for_shutdown() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
