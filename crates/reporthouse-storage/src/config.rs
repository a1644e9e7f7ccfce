//! Storage adapter configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use reporthouse_core::ArtifactMode;

/// Whether upload failures fail the job or degrade to a noop artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoragePolicy {
    Required,
    Optional,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub mode: ArtifactMode,
    pub bucket: String,
    pub region: String,
    /// Custom S3 endpoint for the local-compatible mode (MinIO/localstack).
    pub endpoint: Option<String>,
    /// Root directory for the filesystem mode.
    pub root: Option<PathBuf>,
    pub policy: StoragePolicy,
    /// When off, the mode is forced to noop; bytes are still consumed.
    pub enable_external_storage: bool,
    pub signed_url_ttl_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            mode: ArtifactMode::Noop,
            bucket: "reporthouse".to_string(),
            region: "us-east-1".to_string(),
            endpoint: None,
            root: None,
            policy: StoragePolicy::Required,
            enable_external_storage: true,
            signed_url_ttl_secs: 900,
        }
    }
}
