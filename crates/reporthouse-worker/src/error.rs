//! Worker error types.
//!
//! Most failure kinds originate in a collaborator crate and pass through
//! transparently; the variants defined here are the planning failures
//! the processor itself raises. Whatever the kind, the processor records
//! `error.to_string()` on the failed job and re-raises so the queue's
//! retry policy applies.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("source collection '{0}' is not allowed")]
    SourceCollectionNotAllowed(String),

    #[error("archive format requires a non-empty includeFormats list")]
    ArchiveRequiresIncludeFormats,

    #[error("snapshot size exceeded: more than {max} bytes")]
    SnapshotSizeExceeded { max: u64 },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Store(#[from] reporthouse_store::StoreError),

    #[error(transparent)]
    Queue(#[from] reporthouse_queue::QueueError),

    #[error(transparent)]
    Storage(#[from] reporthouse_storage::StorageError),

    #[error(transparent)]
    Reduce(#[from] reporthouse_reduce::ReduceError),

    #[error(transparent)]
    Format(#[from] reporthouse_formats::FormatError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
