//! Format generator error types.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, FormatError>;

#[derive(Debug, Error)]
pub enum FormatError {
    /// The paginated document received more rows than `document_max_rows`.
    #[error("document row limit exceeded: more than {max} rows")]
    DocumentRowLimitExceeded { max: u64 },

    /// `generate_rows` was asked for the archive format.
    #[error("archive takes entry streams, not a row stream")]
    NotARowFormat,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Delimited encoding error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Archive error: {0}")]
    Zip(String),

    #[error("Document error: {0}")]
    Pdf(String),
}

impl From<zip::result::ZipError> for FormatError {
    fn from(e: zip::result::ZipError) -> Self {
        FormatError::Zip(e.to_string())
    }
}

impl From<lopdf::Error> for FormatError {
    fn from(e: lopdf::Error) -> Self {
        FormatError::Pdf(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_limit_message_is_matchable() {
        let err = FormatError::DocumentRowLimitExceeded { max: 1 };
        let msg = err.to_string().to_lowercase();
        assert!(msg.contains("document row limit exceeded"));
    }

    #[test]
    fn test_io_error_keeps_message_through_other() {
        let err = FormatError::DocumentRowLimitExceeded { max: 5 };
        let io_err = std::io::Error::other(err);
        assert!(io_err.to_string().contains("document row limit exceeded"));
    }
}
