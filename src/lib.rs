pub mod db;
pub mod error;
pub mod integrity;
mod migrations;
pub mod reconcile;
pub mod server;
pub mod state;
pub mod types;

use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use state::AppState;

/// Install the global subscriber. `RUST_LOG` wins over `default_filter`;
/// `log` records from the crate are bridged in. Output goes to stderr so
/// stdout stays free for machine-readable reports.
pub fn init_logging(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if let Err(e) = subscriber.try_init() {
        eprintln!("Logging already initialized: {}", e);
    }
}

/// Entry point for the `contactlink` binary: load config, open the store,
/// serve until interrupted.
pub fn run() -> anyhow::Result<()> {
    let config = state::load_config().map_err(anyhow::Error::msg)?;
    init_logging(&config.log_filter);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting contactlink");

    let state = Arc::new(AppState::new(config).map_err(anyhow::Error::msg)?);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start tokio runtime")?;

    runtime.block_on(server::serve(state))
}
