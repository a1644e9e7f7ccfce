//! Reduce engine error types.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ReduceError>;

#[derive(Debug, Error)]
pub enum ReduceError {
    /// The reduce spec failed validation (empty metrics, bad identifier,
    /// duplicate alias, missing field).
    #[error("invalid reduce spec: {0}")]
    Validation(String),

    /// The accumulator was asked to create more groups than allowed.
    #[error("reduce cardinality exceeded: more than {max} groups")]
    CardinalityExceeded { max: usize },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The source store failed while probing bounds or aggregating a range.
    #[error("reduce source error: {0}")]
    Source(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cardinality_message() {
        let err = ReduceError::CardinalityExceeded { max: 1 };
        assert!(err.to_string().contains("reduce cardinality exceeded"));
    }
}
