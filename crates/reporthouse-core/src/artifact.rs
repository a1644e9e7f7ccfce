//! Artifact Descriptors
//!
//! Where an uploaded report body lives, whether it can be fetched, and the
//! integrity metadata computed while streaming it out. The descriptor is
//! produced by the storage adapter, persisted on the job document, and
//! served back by the download endpoint.

use serde::{Deserialize, Serialize};

/// Which backend holds (or would have held) the artifact bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactMode {
    ObjectStoreCloud,
    ObjectStoreLocalCompatible,
    Filesystem,
    Noop,
}

/// Why an artifact is not (yet) downloadable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ArtifactReason {
    ExternalStorageDisabled,
    OptionalIntegrationFailure,
    DownloadUrlUnavailable,
    Pending,
}

/// Descriptor of one uploaded (or intentionally skipped) artifact.
///
/// `available == true` implies `key` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactDescriptor {
    pub mode: ArtifactMode,
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<ArtifactReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    /// SHA-256 hex over the uploaded bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    /// Entry names, in emission order, for archive artifacts.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entries: Vec<String>,
}

impl ArtifactDescriptor {
    /// A placeholder descriptor for jobs that have not uploaded yet.
    pub fn pending() -> Self {
        Self {
            mode: ArtifactMode::Noop,
            available: false,
            reason: Some(ArtifactReason::Pending),
            size_bytes: None,
            checksum: None,
            key: None,
            bucket: None,
            entries: Vec::new(),
        }
    }
}
