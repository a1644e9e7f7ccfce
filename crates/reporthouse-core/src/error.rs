//! Core error types.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid row identifier: {0}")]
    InvalidRowId(String),

    #[error("Invalid format name: {0}")]
    InvalidFormat(String),
}
