//! Worker Configuration
//!
//! One immutable record initialized at startup. Everything is read from
//! `REPORTHOUSE_*` environment variables with serviceable defaults, the
//! same configuration style the server binary uses.
//!
//! | Variable | Default | Meaning |
//! |---|---|---|
//! | `REPORTHOUSE_DB` | `./data/reporthouse.db` | SQLite database path |
//! | `REPORTHOUSE_POLL_INTERVAL_MS` | `500` | queue poll interval |
//! | `REPORTHOUSE_MAX_JOB_CONCURRENCY` | `2` | concurrent jobs |
//! | `REPORTHOUSE_CURSOR_BATCH_SIZE` | `1000` | source cursor batch |
//! | `REPORTHOUSE_BUFFER_BYTES` | `65536` | byte-pipeline chunk size |
//! | `REPORTHOUSE_DOCUMENT_MAX_ROWS` | unset | paginated-document cap |
//! | `REPORTHOUSE_PARTITION_DEFAULT_CHUNKS` | `4` | reduce chunk default |
//! | `REPORTHOUSE_PARTITION_CAP_MAX` | `64` | reduce chunk cap |
//! | `REPORTHOUSE_PARTITION_MAX_CONCURRENCY` | `4` | reduce workers |
//! | `REPORTHOUSE_ENGINE_V2` | `true` | streaming accumulator |
//! | `REPORTHOUSE_MAX_GROUPS` | `100000` | reduce cardinality cap |
//! | `REPORTHOUSE_ZIP_MULTIPASS` | `false` | archive strategy |
//! | `REPORTHOUSE_TMP_DIR` | `./data/tmp` | snapshot directory |
//! | `REPORTHOUSE_TMP_MAX_BYTES` | `1073741824` | snapshot size cap |
//! | `REPORTHOUSE_SOURCE_ALLOWLIST` | `reportSource` | comma-separated |
//! | `REPORTHOUSE_DEFAULT_SOURCE` | `reportSource` | default collection |
//! | `REPORTHOUSE_RETENTION_DAYS` | `7` | job TTL |
//! | `REPORTHOUSE_TICKER_INTERVAL_MS` | `15000` | scheduler cadence |
//! | `REPORTHOUSE_STORAGE_MODE` | `filesystem` | storage backend |
//! | `REPORTHOUSE_STORAGE_BUCKET` | `reporthouse` | bucket name |
//! | `REPORTHOUSE_STORAGE_REGION` | `us-east-1` | bucket region |
//! | `REPORTHOUSE_STORAGE_ENDPOINT` | unset | MinIO/localstack URL |
//! | `REPORTHOUSE_STORAGE_ROOT` | `./data/artifacts` | filesystem root |
//! | `REPORTHOUSE_STORAGE_POLICY` | `required` | required / optional |
//! | `REPORTHOUSE_ENABLE_EXTERNAL_STORAGE` | `true` | noop override |
//! | `REPORTHOUSE_SIGNED_URL_TTL_SECS` | `900` | download URL TTL |

use std::path::PathBuf;
use std::str::FromStr;

use reporthouse_core::ArtifactMode;
use reporthouse_storage::{StorageConfig, StoragePolicy};

use crate::error::{Result, WorkerError};

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub database_path: PathBuf,
    pub poll_interval_ms: u64,
    pub max_job_concurrency: usize,
    pub cursor_batch_size: u32,
    pub buffer_bytes: usize,
    pub document_max_rows: Option<u64>,
    pub partition_default_chunks: u32,
    pub partition_cap_max: u32,
    pub partition_max_concurrency: u32,
    pub engine_v2: bool,
    pub max_groups: usize,
    pub zip_multipass: bool,
    pub report_tmp_dir: PathBuf,
    pub report_tmp_max_bytes: u64,
    pub source_collection_allowlist: Vec<String>,
    pub default_source_collection: String,
    pub retention_days: i64,
    pub ticker_poll_interval_ms: u64,
    pub capture_memory_peak: bool,
    pub storage: StorageConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("./data/reporthouse.db"),
            poll_interval_ms: 500,
            max_job_concurrency: 2,
            cursor_batch_size: 1000,
            buffer_bytes: 64 * 1024,
            document_max_rows: None,
            partition_default_chunks: 4,
            partition_cap_max: 64,
            partition_max_concurrency: 4,
            engine_v2: true,
            max_groups: 100_000,
            zip_multipass: false,
            report_tmp_dir: PathBuf::from("./data/tmp"),
            report_tmp_max_bytes: 1024 * 1024 * 1024,
            source_collection_allowlist: vec!["reportSource".to_string()],
            default_source_collection: "reportSource".to_string(),
            retention_days: 7,
            ticker_poll_interval_ms: 15_000,
            capture_memory_peak: true,
            storage: StorageConfig {
                mode: ArtifactMode::Filesystem,
                root: Some(PathBuf::from("./data/artifacts")),
                ..StorageConfig::default()
            },
        }
    }
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Some(v) = var("REPORTHOUSE_DB") {
            config.database_path = PathBuf::from(v);
        }
        config.poll_interval_ms = parse_var("REPORTHOUSE_POLL_INTERVAL_MS", config.poll_interval_ms)?;
        config.max_job_concurrency =
            parse_var("REPORTHOUSE_MAX_JOB_CONCURRENCY", config.max_job_concurrency)?;
        config.cursor_batch_size =
            parse_var("REPORTHOUSE_CURSOR_BATCH_SIZE", config.cursor_batch_size)?;
        config.buffer_bytes = parse_var("REPORTHOUSE_BUFFER_BYTES", config.buffer_bytes)?;
        if let Some(v) = var("REPORTHOUSE_DOCUMENT_MAX_ROWS") {
            config.document_max_rows = Some(parse("REPORTHOUSE_DOCUMENT_MAX_ROWS", &v)?);
        }
        config.partition_default_chunks =
            parse_var("REPORTHOUSE_PARTITION_DEFAULT_CHUNKS", config.partition_default_chunks)?;
        config.partition_cap_max =
            parse_var("REPORTHOUSE_PARTITION_CAP_MAX", config.partition_cap_max)?;
        config.partition_max_concurrency = parse_var(
            "REPORTHOUSE_PARTITION_MAX_CONCURRENCY",
            config.partition_max_concurrency,
        )?;
        config.engine_v2 = parse_var("REPORTHOUSE_ENGINE_V2", config.engine_v2)?;
        config.max_groups = parse_var("REPORTHOUSE_MAX_GROUPS", config.max_groups)?;
        config.zip_multipass = parse_var("REPORTHOUSE_ZIP_MULTIPASS", config.zip_multipass)?;
        if let Some(v) = var("REPORTHOUSE_TMP_DIR") {
            config.report_tmp_dir = PathBuf::from(v);
        }
        config.report_tmp_max_bytes =
            parse_var("REPORTHOUSE_TMP_MAX_BYTES", config.report_tmp_max_bytes)?;
        if let Some(v) = var("REPORTHOUSE_SOURCE_ALLOWLIST") {
            config.source_collection_allowlist = v
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Some(v) = var("REPORTHOUSE_DEFAULT_SOURCE") {
            config.default_source_collection = v;
        }
        config.retention_days = parse_var("REPORTHOUSE_RETENTION_DAYS", config.retention_days)?;
        config.ticker_poll_interval_ms =
            parse_var("REPORTHOUSE_TICKER_INTERVAL_MS", config.ticker_poll_interval_ms)?;

        if let Some(v) = var("REPORTHOUSE_STORAGE_MODE") {
            config.storage.mode = match v.as_str() {
                "object-store-cloud" => ArtifactMode::ObjectStoreCloud,
                "object-store-local-compatible" => ArtifactMode::ObjectStoreLocalCompatible,
                "filesystem" => ArtifactMode::Filesystem,
                "noop" => ArtifactMode::Noop,
                other => {
                    return Err(WorkerError::Config(format!("unknown storage mode '{other}'")))
                }
            };
        }
        if let Some(v) = var("REPORTHOUSE_STORAGE_BUCKET") {
            config.storage.bucket = v;
        }
        if let Some(v) = var("REPORTHOUSE_STORAGE_REGION") {
            config.storage.region = v;
        }
        if let Some(v) = var("REPORTHOUSE_STORAGE_ENDPOINT") {
            config.storage.endpoint = Some(v);
        }
        if let Some(v) = var("REPORTHOUSE_STORAGE_ROOT") {
            config.storage.root = Some(PathBuf::from(v));
        }
        if let Some(v) = var("REPORTHOUSE_STORAGE_POLICY") {
            config.storage.policy = match v.as_str() {
                "required" => StoragePolicy::Required,
                "optional" => StoragePolicy::Optional,
                other => {
                    return Err(WorkerError::Config(format!("unknown storage policy '{other}'")))
                }
            };
        }
        config.storage.enable_external_storage = parse_var(
            "REPORTHOUSE_ENABLE_EXTERNAL_STORAGE",
            config.storage.enable_external_storage,
        )?;
        config.storage.signed_url_ttl_secs =
            parse_var("REPORTHOUSE_SIGNED_URL_TTL_SECS", config.storage.signed_url_ttl_secs)?;

        Ok(config)
    }
}

fn var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn parse<T: FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| WorkerError::Config(format!("cannot parse {name}='{value}'")))
}

fn parse_var<T: FromStr>(name: &str, default: T) -> Result<T> {
    match var(name) {
        Some(v) => parse(name, &v),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let config = WorkerConfig::default();
        assert_eq!(config.partition_default_chunks, 4);
        assert!(config.engine_v2);
        assert!(!config.zip_multipass);
        assert_eq!(config.source_collection_allowlist, vec!["reportSource"]);
    }
}
