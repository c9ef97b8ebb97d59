//! hoist daemon entry point.

mod app;
mod config;

use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    // Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting hoistd");

    let path = config::config_path(std::env::args().nth(1));
    let config = config::Config::load(&path)?;
    tracing::info!(
        config = %path.display(),
        root = %config.path.display(),
        bucket = %config.bucket,
        endpoint = %config.endpoint,
        "configuration loaded"
    );

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(app::run(config))?;

    tracing::info!("hoistd shut down cleanly");
    Ok(())
}
