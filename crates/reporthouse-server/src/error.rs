//! API error responses.
//!
//! Every error renders as `{"error": {"code", "message"}}` with the
//! matching HTTP status. Validation failures are 4xx and never reach the
//! processor; store/queue failures are 500s.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("missing or invalid API credentials")]
    Unauthorized,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("archive format requires a non-empty includeFormats list")]
    ArchiveRequiresIncludeFormats,

    #[error("includeFormats is only allowed when format is archive")]
    IncludeFormatsNotAllowed,

    #[error("includeFormats contains duplicates")]
    DuplicateIncludeFormats,

    #[error("compression zip cannot be combined with the archive format")]
    CompressionArchiveConflict,

    #[error("source collection '{0}' is not allowed")]
    SourceCollectionNotAllowed(String),

    #[error("invalid reduce spec: {0}")]
    InvalidReduceSpec(String),

    #[error("invalid schedule: {0}")]
    InvalidCron(String),

    #[error("{0}")]
    Validation(String),

    #[error("internal error")]
    Store(#[from] reporthouse_store::StoreError),

    #[error("internal error")]
    Queue(#[from] reporthouse_queue::QueueError),
}

impl ApiError {
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Unauthorized => "UNAUTHORIZED",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::ArchiveRequiresIncludeFormats => "ARCHIVE_REQUIRES_INCLUDE_FORMATS",
            ApiError::IncludeFormatsNotAllowed => "INCLUDE_FORMATS_NOT_ALLOWED",
            ApiError::DuplicateIncludeFormats => "DUPLICATE_INCLUDE_FORMATS",
            ApiError::CompressionArchiveConflict => "COMPRESSION_ARCHIVE_CONFLICT",
            ApiError::SourceCollectionNotAllowed(_) => "SOURCE_COLLECTION_NOT_ALLOWED",
            ApiError::InvalidReduceSpec(_) => "REDUCE_VALIDATION",
            ApiError::InvalidCron(_) => "INVALID_CRON",
            ApiError::Validation(_) => "VALIDATION_ERROR",
            ApiError::Store(_) | ApiError::Queue(_) => "INTERNAL",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Store(_) | ApiError::Queue(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::UNPROCESSABLE_ENTITY,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if matches!(self, ApiError::Store(_) | ApiError::Queue(_)) {
            tracing::error!(error = ?self, "request failed");
        }
        let body = json!({
            "error": { "code": self.code(), "message": self.to_string() }
        });
        (self.status(), Json(body)).into_response()
    }
}
