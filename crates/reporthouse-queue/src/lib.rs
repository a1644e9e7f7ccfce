//! Reporthouse Work Queue
//!
//! A durable FIFO queue carrying `{reportJobId, tenantId}` messages from
//! the intake (and the schedule ticker) to the worker pool.
//!
//! ## Semantics
//!
//! - **Dedupe**: messages carry a client-supplied id equal to the job id;
//!   enqueueing a duplicate id is a no-op.
//! - **At-least-once**: a claimed message returns to the queue via
//!   `nack` and is retried with exponential backoff (base 2, configured
//!   base delay) until its attempt budget is spent, after which it is
//!   parked as failed.
//! - **Retention**: completed and failed messages are pruned down to a
//!   configured count so the table stays bounded.
//!
//! The SQLite implementation lives in the same database as the store;
//! claims are single-statement conditional updates, so any number of
//! workers can poll concurrently and each message is delivered to at
//! most one of them at a time.

pub mod error;
pub mod sqlite;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use error::{QueueError, Result};
pub use sqlite::SqliteQueue;

/// The message body: which job to run, for which tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueMessage {
    pub report_job_id: String,
    pub tenant_id: String,
}

/// Per-message queue policy.
#[derive(Debug, Clone)]
pub struct EnqueueOptions {
    /// Dedupe id; equal to the job id.
    pub job_id: String,
    pub attempts: u32,
    pub backoff_base_ms: u64,
    pub remove_on_complete: u32,
    pub remove_on_fail: u32,
}

impl EnqueueOptions {
    pub fn for_job(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            attempts: 5,
            backoff_base_ms: 2000,
            remove_on_complete: 100,
            remove_on_fail: 1000,
        }
    }
}

/// One claimed delivery of a message.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub job_id: String,
    pub message: QueueMessage,
    /// 1-based attempt number of this delivery.
    pub attempt: u32,
}

/// The queue the worker pool consumes from.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Push a message; a duplicate `job_id` is silently ignored.
    async fn enqueue(&self, message: &QueueMessage, opts: &EnqueueOptions) -> Result<()>;

    /// Claim the oldest ready message, if any.
    async fn claim(&self) -> Result<Option<Delivery>>;

    /// Mark a delivery succeeded and prune completed retention.
    async fn ack(&self, job_id: &str) -> Result<()>;

    /// Mark a delivery failed; requeues with backoff until the attempt
    /// budget is spent, then parks the message as failed.
    async fn nack(&self, job_id: &str, error: &str) -> Result<()>;
}
