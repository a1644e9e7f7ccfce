//! Storage adapter error types.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Object store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    /// Upload failed and the storage policy is `required`.
    #[error("storage integration failure: {0}")]
    IntegrationRequired(String),

    /// The byte stream itself failed (generator error); always propagates.
    #[error("{0}")]
    Source(String),

    #[error("invalid storage configuration: {0}")]
    InvalidConfig(String),
}
