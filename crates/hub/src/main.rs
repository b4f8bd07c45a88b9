mod app;
mod config;
mod http;
mod registry;
mod session;

use config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load()?;
    app::run(config).await
}
