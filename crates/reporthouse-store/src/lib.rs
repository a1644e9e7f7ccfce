//! Reporthouse Persistence
//!
//! This crate owns everything that touches the database: report jobs,
//! schedules, API keys, and the tenant-scoped source collections that
//! report rows are drawn from.
//!
//! ## Endpoints
//!
//! The store holds **two pools**: a write pool (jobs, schedules, keys,
//! document inserts) and a read pool used for every source-data read.
//! The read pool is opened read-only with `query_only` set, and
//! [`SourceStore::verify_read_endpoint`] refuses to proceed when the
//! read endpoint turns out to be writable, the local analog of checking
//! that a document-store read endpoint is not the writable primary.
//!
//! ## Implementation notes
//!
//! Runtime queries (`sqlx::query`) are used instead of the compile-time
//! macros so the crate builds without a database at hand; the schema is
//! created by in-code DDL on startup. Source collections are per-name
//! tables `(tenant_id, id, doc)` keyed by `(tenant_id, id)`; documents
//! are stored as JSON text and filtered with `json_extract`.

pub mod cron;
pub mod error;
pub mod query;
pub mod sqlite;
pub mod types;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde_json::Value;

use reporthouse_core::{Row, RowId};

pub use cron::compute_next_run;
pub use error::{Result, StoreError};
pub use sqlite::SqliteStore;
pub use types::{
    JobCompletion, JobStatus, ProcessingMode, ProcessingStats, ReportJob, Schedule, ZipStrategy,
};

/// A lazy stream of materialized source rows (`_id` first, then the
/// normalized document fields).
pub type DocStream = BoxStream<'static, Result<Row>>;

/// Report job persistence. Jobs are created by the intake or the ticker
/// and mutated exclusively by the job processor afterwards.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert_job(&self, job: &ReportJob) -> Result<()>;
    async fn load_job(&self, tenant: &str, id: &str) -> Result<Option<ReportJob>>;
    async fn list_jobs(&self, tenant: &str, limit: u32) -> Result<Vec<ReportJob>>;

    /// queued → running: progress 10, `started_at` set, prior error cleared.
    async fn mark_running(&self, tenant: &str, id: &str, started_at: DateTime<Utc>) -> Result<()>;

    /// Intermediate transition (e.g. uploading at progress 75).
    async fn set_progress(&self, tenant: &str, id: &str, status: JobStatus, progress: u8)
        -> Result<()>;

    /// Terminal success: uploaded, progress 100, artifact + stats persisted.
    async fn complete_job(&self, tenant: &str, id: &str, completion: &JobCompletion) -> Result<()>;

    /// Terminal failure with the error message recorded.
    async fn fail_job(
        &self,
        tenant: &str,
        id: &str,
        message: &str,
        finished_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Store-side TTL sweep: drop jobs whose `expire_at` has passed.
    async fn expire_due(&self, now: DateTime<Utc>) -> Result<u64>;
}

/// Schedule persistence, including the ticker's atomic claim.
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    async fn insert_schedule(&self, schedule: &Schedule) -> Result<()>;
    async fn load_schedule(&self, tenant: &str, id: &str) -> Result<Option<Schedule>>;
    async fn list_schedules(&self, tenant: &str) -> Result<Vec<Schedule>>;
    async fn update_schedule(&self, schedule: &Schedule) -> Result<()>;
    async fn delete_schedule(&self, tenant: &str, id: &str) -> Result<()>;

    /// One enabled schedule with `next_run_at <= now`, if any.
    async fn fetch_due(&self, now: DateTime<Utc>) -> Result<Option<Schedule>>;

    /// Conditionally advance a schedule: only when it is still enabled
    /// and `next_run_at` still equals `prev_next_run_at`. Returns false
    /// when someone else advanced it first.
    async fn advance_schedule(
        &self,
        id: &str,
        prev_next_run_at: DateTime<Utc>,
        last_run_at: DateTime<Utc>,
        next_run_at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Disable a schedule (invalid cron expressions end up here).
    async fn disable_schedule(&self, id: &str) -> Result<()>;
}

/// API keys, stored as SHA-256 hashes, unique per (tenant, hash).
#[async_trait]
pub trait ApiKeyStore: Send + Sync {
    async fn insert_api_key(&self, tenant: &str, key_hash: &str) -> Result<()>;
    async fn verify_api_key(&self, tenant: &str, key_hash: &str) -> Result<bool>;
}

/// Tenant-scoped reads (and test/tooling writes) against source
/// collections.
#[async_trait]
pub trait SourceStore: Send + Sync {
    /// Create the collection table and its `(tenant_id, id)` index.
    async fn ensure_collection(&self, collection: &str) -> Result<()>;

    async fn insert_documents(
        &self,
        collection: &str,
        tenant: &str,
        docs: &[(RowId, Value)],
    ) -> Result<()>;

    /// Fail with [`StoreError::ReadEndpointIsPrimary`] unless the read
    /// endpoint is non-writable.
    async fn verify_read_endpoint(&self) -> Result<()>;

    /// Max identifier under the filter (the multipass upper-bound probe).
    async fn max_row_id(
        &self,
        tenant: &str,
        collection: &str,
        filters: &Row,
    ) -> Result<Option<RowId>>;

    /// Ascending keyset-batched cursor over the filtered rows, optionally
    /// bounded above by `max_id` (inclusive).
    fn stream_rows(
        &self,
        tenant: String,
        collection: String,
        filters: Row,
        max_id: Option<RowId>,
        batch_size: u32,
    ) -> DocStream;
}
