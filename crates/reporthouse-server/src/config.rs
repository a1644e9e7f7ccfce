//! Server configuration, read from `REPORTHOUSE_*` environment
//! variables at startup (same table as the worker where the knobs
//! overlap).

use std::path::PathBuf;

use reporthouse_core::ArtifactMode;
use reporthouse_storage::StorageConfig;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub database_path: PathBuf,
    pub source_collection_allowlist: Vec<String>,
    pub retention_days: i64,
    pub storage: StorageConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            database_path: PathBuf::from("./data/reporthouse.db"),
            source_collection_allowlist: vec!["reportSource".to_string()],
            retention_days: 7,
            storage: StorageConfig {
                mode: ArtifactMode::Filesystem,
                root: Some(PathBuf::from("./data/artifacts")),
                ..StorageConfig::default()
            },
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(v) = std::env::var("REPORTHOUSE_ADDR") {
            if !v.is_empty() {
                config.bind_addr = v;
            }
        }
        if let Ok(v) = std::env::var("REPORTHOUSE_DB") {
            if !v.is_empty() {
                config.database_path = PathBuf::from(v);
            }
        }
        if let Ok(v) = std::env::var("REPORTHOUSE_SOURCE_ALLOWLIST") {
            let list: Vec<String> = v
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            if !list.is_empty() {
                config.source_collection_allowlist = list;
            }
        }
        if let Ok(v) = std::env::var("REPORTHOUSE_RETENTION_DAYS") {
            if let Ok(days) = v.parse() {
                config.retention_days = days;
            }
        }
        if let Ok(v) = std::env::var("REPORTHOUSE_STORAGE_ROOT") {
            if !v.is_empty() {
                config.storage.root = Some(PathBuf::from(v));
            }
        }
        config
    }
}
