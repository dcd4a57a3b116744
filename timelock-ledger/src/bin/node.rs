//! Timelock ledger node binary
//!
//! Usage: `timelock-node [config.toml]`. Without a path the configuration
//! comes from `TIMELOCK_*` environment variables.

use anyhow::Context;
use std::sync::Arc;
use timelock_ledger::{spawn_sequencer, Config, ManualClock, StateStore, TickSource};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => Config::from_file(&path)
            .with_context(|| format!("loading configuration from {}", path))?,
        None => Config::from_env().context("loading configuration from environment")?,
    };

    tracing::info!(service = %config.service_name, "Starting timelock ledger node");
    tracing::debug!(config = %serde_json::to_string(&config)?, "Effective configuration");

    let store = open_store(&config)?;
    // Ticks are advanced by whoever embeds the node's clock
    let clock: Arc<dyn TickSource> = Arc::new(ManualClock::new(0));
    let handle = spawn_sequencer(&config, clock, store).context("starting sequencer")?;

    let (accounts, total_balance, records) = handle.read(|ledger| {
        let state = ledger.state();
        (
            state.accounts.len(),
            state.accounts.total_balance(),
            state.history.total_records(),
        )
    });
    tracing::info!(accounts, %total_balance, records, "Ledger ready");

    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down timelock ledger node");
    handle.shutdown().await.context("final snapshot")?;
    Ok(())
}

#[cfg(feature = "rocksdb")]
fn open_store(config: &Config) -> anyhow::Result<Arc<dyn StateStore>> {
    let store = timelock_ledger::storage::RocksStore::open(config)
        .with_context(|| format!("opening snapshot store at {:?}", config.data_dir))?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "rocksdb"))]
fn open_store(_config: &Config) -> anyhow::Result<Arc<dyn StateStore>> {
    tracing::warn!("Built without the rocksdb feature; state is kept in memory only");
    Ok(Arc::new(timelock_ledger::MemoryStore::new()))
}
