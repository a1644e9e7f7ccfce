//! Reporthouse worker binary.
//!
//! Wires the store, queue, storage adapter, job processor, schedule
//! ticker and worker loop together, then runs until SIGINT. All
//! configuration comes from `REPORTHOUSE_*` environment variables (see
//! the config module for the full table); logging is controlled with
//! `RUST_LOG`.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

use reporthouse_queue::SqliteQueue;
use reporthouse_storage::ObjectStorage;
use reporthouse_store::{SourceStore, SqliteStore};
use reporthouse_worker::{JobProcessor, ScheduleTicker, Worker, WorkerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Arc::new(WorkerConfig::from_env()?);
    if let Some(parent) = config.database_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    info!(db = %config.database_path.display(), "initializing store");
    let store = Arc::new(SqliteStore::open(&config.database_path).await?);
    for collection in &config.source_collection_allowlist {
        store.ensure_collection(collection).await?;
    }

    let queue = Arc::new(SqliteQueue::new(store.write_pool()).await?);
    let storage = Arc::new(ObjectStorage::from_config(config.storage.clone())?);
    info!(mode = ?storage.mode(), "storage adapter ready");

    let processor = Arc::new(JobProcessor::new(
        Arc::clone(&store),
        Arc::clone(&storage),
        Arc::clone(&config),
    ));
    let worker = Worker::new(Arc::clone(&queue), processor, Arc::clone(&config));
    let ticker = ScheduleTicker::new(Arc::clone(&store), Arc::clone(&queue), Arc::clone(&config));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let ticker_handle = ticker.spawn(shutdown_rx.clone());
    let worker_handle = tokio::spawn(Arc::clone(&worker).run(shutdown_rx));

    info!(
        concurrency = config.max_job_concurrency,
        ticker_interval_ms = config.ticker_poll_interval_ms,
        "reporthouse worker running"
    );
    tokio::signal::ctrl_c().await?;
    info!("termination signal received");

    worker.begin_shutdown();
    let _ = shutdown_tx.send(true);
    let _ = ticker_handle.await;
    let _ = worker_handle.await;
    store.close().await;
    info!("shutdown complete");
    Ok(())
}
