//! Reporthouse Object Storage Adapter
//!
//! Streams artifact bytes into one of four backends and reports back an
//! [`ArtifactDescriptor`] with the integrity metadata computed on the way
//! through:
//!
//! - **object-store-cloud**: S3, credentials from the environment
//! - **object-store-local-compatible**: S3 API against a custom endpoint
//!   (MinIO/localstack), plain HTTP allowed
//! - **filesystem**: a local directory
//! - **noop**: the stream is fully consumed (size and checksum are still
//!   computed) but nothing is persisted
//!
//! ## Policy
//!
//! Upload failures behave per the configured policy: `required` failures
//! propagate and fail the job; `optional` failures drain the remaining
//! stream and return a descriptor with `available = false` and reason
//! `OPTIONAL_INTEGRATION_FAILURE`. Errors raised by the *byte stream
//! itself* (a generator failure) always propagate regardless of policy.
//!
//! When `enable_external_storage` is off the mode is forced to noop and
//! the descriptor carries reason `EXTERNAL_STORAGE_DISABLED`.

pub mod config;
pub mod error;

use std::io;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use http::Method;
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::local::LocalFileSystem;
use object_store::path::Path as ObjectPath;
use object_store::signer::Signer;
use object_store::{ObjectStore, WriteMultipart};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use reporthouse_core::{ArtifactDescriptor, ArtifactMode, ArtifactReason};

pub use config::{StorageConfig, StoragePolicy};
pub use error::{Result, StorageError};

/// A lazy stream of artifact bytes (same shape the generators emit).
pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

/// Context recorded with an upload, for logging.
#[derive(Debug, Clone, Default)]
pub struct UploadContext {
    pub tenant_id: String,
    pub job_id: String,
}

enum Backend {
    S3(Arc<AmazonS3>),
    Fs(Arc<LocalFileSystem>),
    Noop,
}

/// The storage adapter handed to the job processor.
pub struct ObjectStorage {
    backend: Backend,
    mode: ArtifactMode,
    config: StorageConfig,
}

impl ObjectStorage {
    pub fn from_config(config: StorageConfig) -> Result<Self> {
        let mode = if config.enable_external_storage {
            config.mode
        } else {
            ArtifactMode::Noop
        };
        let backend = match mode {
            ArtifactMode::ObjectStoreCloud => {
                let s3 = AmazonS3Builder::from_env()
                    .with_bucket_name(&config.bucket)
                    .with_region(&config.region)
                    .build()?;
                Backend::S3(Arc::new(s3))
            }
            ArtifactMode::ObjectStoreLocalCompatible => {
                let endpoint = config.endpoint.clone().ok_or_else(|| {
                    StorageError::InvalidConfig(
                        "local-compatible mode requires an endpoint".into(),
                    )
                })?;
                let s3 = AmazonS3Builder::from_env()
                    .with_bucket_name(&config.bucket)
                    .with_region(&config.region)
                    .with_endpoint(endpoint)
                    .with_allow_http(true)
                    .build()?;
                Backend::S3(Arc::new(s3))
            }
            ArtifactMode::Filesystem => {
                let root = config.root.clone().ok_or_else(|| {
                    StorageError::InvalidConfig("filesystem mode requires a root".into())
                })?;
                Backend::Fs(Arc::new(LocalFileSystem::new_with_prefix(root)?))
            }
            ArtifactMode::Noop => Backend::Noop,
        };
        Ok(Self { backend, mode, config })
    }

    /// The mode uploads will be recorded under (noop when external
    /// storage is disabled).
    pub fn mode(&self) -> ArtifactMode {
        self.mode
    }

    /// Stream `bytes` under `key` and return the resulting descriptor.
    ///
    /// The stream is consumed end-to-end in every mode, so `size_bytes`
    /// and `checksum` are always real.
    pub async fn upload(
        &self,
        key: &str,
        content_type: &str,
        mut bytes: ByteStream,
        ctx: &UploadContext,
    ) -> Result<ArtifactDescriptor> {
        let mut hasher = Sha256::new();
        let mut size: u64 = 0;

        let store: Arc<dyn ObjectStore> = match &self.backend {
            Backend::S3(s3) => Arc::clone(s3) as Arc<dyn ObjectStore>,
            Backend::Fs(fs) => Arc::clone(fs) as Arc<dyn ObjectStore>,
            Backend::Noop => {
                while let Some(chunk) = bytes.next().await {
                    let chunk = chunk.map_err(|e| StorageError::Source(e.to_string()))?;
                    hasher.update(&chunk);
                    size += chunk.len() as u64;
                }
                info!(
                    tenant_id = %ctx.tenant_id,
                    job_id = %ctx.job_id,
                    key,
                    size,
                    "external storage disabled, artifact drained"
                );
                return Ok(ArtifactDescriptor {
                    mode: ArtifactMode::Noop,
                    available: false,
                    reason: Some(ArtifactReason::ExternalStorageDisabled),
                    size_bytes: Some(size),
                    checksum: Some(hex::encode(hasher.finalize())),
                    key: None,
                    bucket: None,
                    entries: Vec::new(),
                });
            }
        };

        let path = ObjectPath::from(key);
        let outcome: std::result::Result<(), StorageError> = async {
            let upload = store.put_multipart(&path).await?;
            let mut writer = WriteMultipart::new(upload);
            while let Some(chunk) = bytes.next().await {
                let chunk = chunk.map_err(|e| StorageError::Source(e.to_string()))?;
                hasher.update(&chunk);
                size += chunk.len() as u64;
                writer.write(&chunk);
            }
            writer.finish().await?;
            Ok(())
        }
        .await;

        match outcome {
            Ok(()) => {
                info!(
                    tenant_id = %ctx.tenant_id,
                    job_id = %ctx.job_id,
                    key,
                    size,
                    content_type,
                    "artifact uploaded"
                );
                Ok(ArtifactDescriptor {
                    mode: self.mode,
                    available: true,
                    reason: None,
                    size_bytes: Some(size),
                    checksum: Some(hex::encode(hasher.finalize())),
                    key: Some(key.to_string()),
                    bucket: self.bucket_name(),
                    entries: Vec::new(),
                })
            }
            // a generator failure is never a storage policy question
            Err(StorageError::Source(message)) => Err(StorageError::Source(message)),
            Err(err) => match self.config.policy {
                StoragePolicy::Required => {
                    Err(StorageError::IntegrationRequired(err.to_string()))
                }
                StoragePolicy::Optional => {
                    warn!(
                        tenant_id = %ctx.tenant_id,
                        job_id = %ctx.job_id,
                        key,
                        error = %err,
                        "optional storage integration failed, draining stream"
                    );
                    while let Some(chunk) = bytes.next().await {
                        let chunk = chunk.map_err(|e| StorageError::Source(e.to_string()))?;
                        hasher.update(&chunk);
                        size += chunk.len() as u64;
                    }
                    Ok(ArtifactDescriptor {
                        mode: self.mode,
                        available: false,
                        reason: Some(ArtifactReason::OptionalIntegrationFailure),
                        size_bytes: Some(size),
                        checksum: Some(hex::encode(hasher.finalize())),
                        key: None,
                        bucket: self.bucket_name(),
                        entries: Vec::new(),
                    })
                }
            },
        }
    }

    /// Presigned GET URL for a downloadable artifact, when the backend
    /// supports signing.
    pub async fn sign_download(&self, artifact: &ArtifactDescriptor) -> Option<String> {
        if !artifact.available {
            return None;
        }
        let key = artifact.key.as_deref()?;
        match &self.backend {
            Backend::S3(s3) => {
                let ttl = Duration::from_secs(self.config.signed_url_ttl_secs);
                match s3.signed_url(Method::GET, &ObjectPath::from(key), ttl).await {
                    Ok(url) => Some(url.to_string()),
                    Err(err) => {
                        warn!(key, error = %err, "signing download URL failed");
                        None
                    }
                }
            }
            Backend::Fs(_) | Backend::Noop => None,
        }
    }

    fn bucket_name(&self) -> Option<String> {
        match self.backend {
            Backend::S3(_) => Some(self.config.bucket.clone()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream_of(chunks: Vec<&'static [u8]>) -> ByteStream {
        Box::pin(futures::stream::iter(
            chunks.into_iter().map(|c| Ok(Bytes::from_static(c))),
        ))
    }

    fn failing_stream() -> ByteStream {
        Box::pin(futures::stream::iter(vec![
            Ok(Bytes::from_static(b"head")),
            Err(io::Error::other("document row limit exceeded: more than 1 rows")),
        ]))
    }

    fn fs_config(root: std::path::PathBuf) -> StorageConfig {
        StorageConfig {
            mode: ArtifactMode::Filesystem,
            root: Some(root),
            ..StorageConfig::default()
        }
    }

    #[tokio::test]
    async fn test_filesystem_upload_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = ObjectStorage::from_config(fs_config(dir.path().into())).unwrap();
        let descriptor = storage
            .upload(
                "t1/j1/report.csv",
                "text/csv",
                stream_of(vec![b"a,b\n", b"1,2\n"]),
                &UploadContext::default(),
            )
            .await
            .unwrap();

        assert!(descriptor.available);
        assert_eq!(descriptor.mode, ArtifactMode::Filesystem);
        assert_eq!(descriptor.key.as_deref(), Some("t1/j1/report.csv"));
        assert_eq!(descriptor.size_bytes, Some(8));
        let expected = hex::encode(Sha256::digest(b"a,b\n1,2\n"));
        assert_eq!(descriptor.checksum.as_deref(), Some(expected.as_str()));

        let written = std::fs::read(dir.path().join("t1/j1/report.csv")).unwrap();
        assert_eq!(written, b"a,b\n1,2\n");
        // filesystem artifacts have no signer
        assert!(storage.sign_download(&descriptor).await.is_none());
    }

    #[tokio::test]
    async fn test_disabled_external_storage_forces_noop_but_consumes_bytes() {
        let config = StorageConfig {
            mode: ArtifactMode::ObjectStoreCloud,
            enable_external_storage: false,
            ..StorageConfig::default()
        };
        let storage = ObjectStorage::from_config(config).unwrap();
        assert_eq!(storage.mode(), ArtifactMode::Noop);

        let descriptor = storage
            .upload(
                "t1/j1/report.json",
                "application/json",
                stream_of(vec![b"[{\"a\":1}]"]),
                &UploadContext::default(),
            )
            .await
            .unwrap();
        assert!(!descriptor.available);
        assert_eq!(descriptor.reason, Some(ArtifactReason::ExternalStorageDisabled));
        assert!(descriptor.size_bytes.unwrap() > 0);
        assert!(descriptor.checksum.is_some());
        assert!(descriptor.key.is_none());
    }

    #[tokio::test]
    async fn test_stream_error_propagates_regardless_of_policy() {
        for policy in [StoragePolicy::Required, StoragePolicy::Optional] {
            let dir = tempfile::tempdir().unwrap();
            let config = StorageConfig { policy, ..fs_config(dir.path().into()) };
            let storage = ObjectStorage::from_config(config).unwrap();
            let err = storage
                .upload("t1/j1/report.pdf", "application/pdf", failing_stream(), &UploadContext::default())
                .await
                .unwrap_err();
            assert!(err.to_string().contains("document row limit exceeded"));
        }
    }

    #[tokio::test]
    async fn test_optional_policy_survives_backend_failure() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("gone");
        std::fs::create_dir(&root).unwrap();
        let config = StorageConfig {
            policy: StoragePolicy::Optional,
            ..fs_config(root.clone())
        };
        let storage = ObjectStorage::from_config(config).unwrap();
        // pull the directory out from under the adapter
        std::fs::remove_dir_all(&root).unwrap();

        let descriptor = storage
            .upload(
                "t1/j1/report.csv",
                "text/csv",
                stream_of(vec![b"a\n", b"1\n"]),
                &UploadContext::default(),
            )
            .await
            .unwrap();
        assert!(!descriptor.available);
        assert_eq!(descriptor.reason, Some(ArtifactReason::OptionalIntegrationFailure));
        assert_eq!(descriptor.size_bytes, Some(4));
    }

    #[tokio::test]
    async fn test_required_policy_fails_the_upload() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("gone");
        std::fs::create_dir(&root).unwrap();
        let storage = ObjectStorage::from_config(fs_config(root.clone())).unwrap();
        std::fs::remove_dir_all(&root).unwrap();

        let err = storage
            .upload("t1/j1/report.csv", "text/csv", stream_of(vec![b"x"]), &UploadContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::IntegrationRequired(_)));
    }
}
