use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use query_collapse::{
    acquire_with_retry, CollapseConfig, CollapseDriver, ContentFilter, EventStore, SledEventStore,
};

const CONFIG_ENV: &str = "COLLAPSE_CONFIG";
const DB_PATH_ENV: &str = "COLLAPSE_DB_PATH";
const DEFAULT_DB_PATH: &str = "collapse.db";

#[tokio::main]
async fn main() -> Result<()> {
    // Set up logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = match std::env::var_os(CONFIG_ENV) {
        Some(path) => CollapseConfig::from_file(&path)
            .with_context(|| format!("loading config from {:?}", path))?,
        None => CollapseConfig::default(),
    };

    let db_path = std::env::var_os(DB_PATH_ENV)
        .map(PathBuf::from)
        .or_else(|| config.db_path.clone())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH));

    let filter = ContentFilter::new(config.excluded_search_types.clone());
    let store = acquire_with_retry(&config.retry_policy(), "event store", || {
        let path = db_path.clone();
        let filter = filter.clone();
        async move { SledEventStore::open(path, filter) }
    })
    .await
    .context("opening event store")?;
    let store: Arc<dyn EventStore> = Arc::new(store);

    let driver = CollapseDriver::new(store, config)?;

    // Stop between batches on Ctrl-C; finished batches keep their checkpoints
    let shutdown = driver.shutdown_signal();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current batch");
            shutdown.trigger();
        }
    });

    let summary = driver.run().await?;
    info!("Run summary: {}", serde_json::to_string(&summary)?);

    if !summary.is_clean() {
        bail!(
            "{} of {} datasets failed to collapse",
            summary.datasets_failed,
            summary.reports.len()
        );
    }
    Ok(())
}
