//! Application lifecycle: logging init, HTTP server, graceful shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tracing::info;

use crate::config::Config;
use crate::http::AppState;
use crate::registry::DeviceRegistry;
use crate::session::CloseReason;

pub async fn run(config: Config) -> anyhow::Result<()> {
    init_tracing(&config);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        listen_addr = %config.listen_addr,
        "camtunnel-hub starting"
    );

    let registry = Arc::new(DeviceRegistry::new());
    let state = Arc::new(AppState {
        registry: registry.clone(),
        device_token: config.device_token.clone(),
        handshake_timeout: Duration::from_secs(config.handshake_timeout_secs),
        heartbeat_timeout: Duration::from_secs(config.heartbeat_timeout_secs),
        request_deadline: Duration::from_secs(config.request_deadline_secs),
        default_page_size: config.default_page_size,
        max_page_size: config.max_page_size,
    });

    let router = crate::http::router(state, &config.cors_origins);
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(listen_addr = %config.listen_addr, "listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(wait_for_shutdown())
        .await?;

    info!("shutting down, closing device sessions");
    registry.close_all(CloseReason::Shutdown).await;

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
