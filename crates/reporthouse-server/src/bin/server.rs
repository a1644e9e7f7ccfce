//! Reporthouse intake server binary.
//!
//! Serves the HTTP intake against the shared database. For local
//! bootstrap, `REPORTHOUSE_BOOTSTRAP_TENANT` + `REPORTHOUSE_BOOTSTRAP_API_KEY`
//! seed one API key at startup so the first request can authenticate.

use std::sync::Arc;

use tracing::info;

use reporthouse_queue::SqliteQueue;
use reporthouse_server::{auth, create_router, AppState, ServerConfig};
use reporthouse_storage::ObjectStorage;
use reporthouse_store::{ApiKeyStore, SourceStore, SqliteStore};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Arc::new(ServerConfig::from_env());
    if let Some(parent) = config.database_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    info!(db = %config.database_path.display(), "initializing store");
    let store = Arc::new(SqliteStore::open(&config.database_path).await?);
    for collection in &config.source_collection_allowlist {
        store.ensure_collection(collection).await?;
    }

    if let (Ok(tenant), Ok(key)) = (
        std::env::var("REPORTHOUSE_BOOTSTRAP_TENANT"),
        std::env::var("REPORTHOUSE_BOOTSTRAP_API_KEY"),
    ) {
        if !tenant.is_empty() && !key.is_empty() {
            store.insert_api_key(&tenant, &auth::hash_key(&key)).await?;
            info!(tenant_id = %tenant, "bootstrap API key installed");
        }
    }

    let queue = Arc::new(SqliteQueue::new(store.write_pool()).await?);
    let storage = Arc::new(ObjectStorage::from_config(config.storage.clone())?);

    let state = AppState {
        store,
        queue,
        storage,
        config: Arc::clone(&config),
    };
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!(addr = %config.bind_addr, "reporthouse intake listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("termination signal received");
        })
        .await?;
    Ok(())
}
