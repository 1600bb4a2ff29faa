//! Beam sender entry point.

mod app;
mod catalog;
mod config;
mod control;
mod notify;

use std::time::Duration;

use tracing_subscriber::EnvFilter;

/// Upper bound on waiting for blocking work, such as a pending stdin read,
/// once the sender has stopped.
const RUNTIME_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting beam sender");

    let config = config::Config::load()?;
    tracing::info!(
        ws_endpoint = %config.ws_endpoint,
        shared = config.shared_files.len(),
        "configuration loaded"
    );

    let rt = tokio::runtime::Runtime::new()?;
    let result = rt.block_on(app::run(config));
    rt.shutdown_timeout(RUNTIME_SHUTDOWN_TIMEOUT);
    result?;

    tracing::info!("sender shut down cleanly");
    Ok(())
}
