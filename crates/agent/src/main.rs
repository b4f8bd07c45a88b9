mod app;
mod config;
mod fs_provider;
mod session;

use config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls CryptoProvider"))?;

    let config = Config::load()?;
    app::run(config).await
}
