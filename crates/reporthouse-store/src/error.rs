//! Store error types.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The read endpoint reports itself writable; source reads must go
    /// to a non-writable endpoint.
    #[error("read endpoint is the writable primary")]
    ReadEndpointIsPrimary,

    /// A collection or field name failed the `[A-Za-z0-9_]+` rule.
    #[error("invalid identifier '{0}'")]
    InvalidIdentifier(String),

    #[error("{what} not found: {id}")]
    NotFound { what: &'static str, id: String },

    #[error("Timestamp parse error: {0}")]
    Timestamp(String),

    /// A persisted record failed to decode (unknown status, bad JSON
    /// column, malformed identifier).
    #[error("Malformed record: {0}")]
    Malformed(String),
}
