//! SQLite queue implementation.
//!
//! Lives in the same database file as the store (pass in the write
//! pool). A claim is a single conditional `UPDATE ... RETURNING`, so
//! concurrent workers never double-claim a message.

use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use sqlx::sqlite::SqlitePool;
use sqlx::Row as _;
use tracing::{debug, warn};

use crate::error::{QueueError, Result};
use crate::{Delivery, EnqueueOptions, QueueMessage, WorkQueue};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS queue_messages (
    job_id TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL,
    payload TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'queued',
    attempt INTEGER NOT NULL DEFAULT 0,
    max_attempts INTEGER NOT NULL,
    backoff_base_ms INTEGER NOT NULL,
    remove_on_complete INTEGER NOT NULL,
    remove_on_fail INTEGER NOT NULL,
    next_attempt_at TEXT NOT NULL,
    error_message TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_queue_ready
    ON queue_messages (status, next_attempt_at, created_at);
"#;

fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// SQLite-backed work queue.
#[derive(Clone)]
pub struct SqliteQueue {
    pool: SqlitePool,
}

impl SqliteQueue {
    /// Wrap a pool and create the queue table if missing.
    pub async fn new(pool: SqlitePool) -> Result<Self> {
        sqlx::raw_sql(SCHEMA).execute(&pool).await?;
        Ok(Self { pool })
    }

    /// Number of messages in a given status; used by tests and tooling.
    pub async fn status_count(&self, status: &str) -> Result<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM queue_messages WHERE status = ?")
                .bind(status)
                .fetch_one(&self.pool)
                .await?;
        Ok(count as u64)
    }

    async fn prune(&self, status: &str, keep: u32) -> Result<()> {
        sqlx::query(
            r#"
            DELETE FROM queue_messages
             WHERE status = ?1 AND job_id NOT IN (
                 SELECT job_id FROM queue_messages
                  WHERE status = ?1
                  ORDER BY updated_at DESC
                  LIMIT ?2
             )
            "#,
        )
        .bind(status)
        .bind(keep as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl WorkQueue for SqliteQueue {
    async fn enqueue(&self, message: &QueueMessage, opts: &EnqueueOptions) -> Result<()> {
        let now = Utc::now();
        let done = sqlx::query(
            r#"
            INSERT OR IGNORE INTO queue_messages (
                job_id, tenant_id, payload, status, attempt, max_attempts,
                backoff_base_ms, remove_on_complete, remove_on_fail,
                next_attempt_at, created_at, updated_at
            ) VALUES (?, ?, ?, 'queued', 0, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&opts.job_id)
        .bind(&message.tenant_id)
        .bind(serde_json::to_string(message)?)
        .bind(opts.attempts as i64)
        .bind(opts.backoff_base_ms as i64)
        .bind(opts.remove_on_complete as i64)
        .bind(opts.remove_on_fail as i64)
        .bind(ts(&now))
        .bind(ts(&now))
        .bind(ts(&now))
        .execute(&self.pool)
        .await?;
        if done.rows_affected() == 0 {
            debug!(job_id = %opts.job_id, "duplicate enqueue ignored");
        }
        Ok(())
    }

    async fn claim(&self) -> Result<Option<Delivery>> {
        let now = Utc::now();
        let row = sqlx::query(
            r#"
            UPDATE queue_messages
               SET status = 'active', attempt = attempt + 1, updated_at = ?2
             WHERE job_id = (
                 SELECT job_id FROM queue_messages
                  WHERE status = 'queued' AND next_attempt_at <= ?1
                  ORDER BY created_at ASC
                  LIMIT 1
             )
            RETURNING job_id, payload, attempt
            "#,
        )
        .bind(ts(&now))
        .bind(ts(&now))
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| {
            let job_id: String = r.try_get("job_id")?;
            let payload: String = r.try_get("payload")?;
            let attempt: i64 = r.try_get("attempt")?;
            let message: QueueMessage = serde_json::from_str(&payload)?;
            Ok::<_, QueueError>(Delivery { job_id, message, attempt: attempt as u32 })
        })
        .transpose()
    }

    async fn ack(&self, job_id: &str) -> Result<()> {
        let keep: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE queue_messages
               SET status = 'completed', updated_at = ?
             WHERE job_id = ? AND status = 'active'
            RETURNING remove_on_complete
            "#,
        )
        .bind(ts(&Utc::now()))
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;
        if let Some(keep) = keep {
            self.prune("completed", keep as u32).await?;
        }
        Ok(())
    }

    async fn nack(&self, job_id: &str, error: &str) -> Result<()> {
        let row = sqlx::query(
            r#"
            SELECT attempt, max_attempts, backoff_base_ms, remove_on_fail
              FROM queue_messages
             WHERE job_id = ? AND status = 'active'
            "#,
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            warn!(job_id, "nack for a message that is not active");
            return Ok(());
        };
        let attempt: i64 = row.try_get("attempt")?;
        let max_attempts: i64 = row.try_get("max_attempts")?;
        let backoff_base_ms: i64 = row.try_get("backoff_base_ms")?;
        let remove_on_fail: i64 = row.try_get("remove_on_fail")?;
        let now = Utc::now();

        if attempt >= max_attempts {
            sqlx::query(
                r#"
                UPDATE queue_messages
                   SET status = 'failed', error_message = ?, updated_at = ?
                 WHERE job_id = ?
                "#,
            )
            .bind(error)
            .bind(ts(&now))
            .bind(job_id)
            .execute(&self.pool)
            .await?;
            self.prune("failed", remove_on_fail as u32).await?;
        } else {
            // exponential base-2 backoff on the configured base delay
            let delay_ms = backoff_base_ms.saturating_mul(1i64 << (attempt - 1).clamp(0, 32));
            let next = now + Duration::milliseconds(delay_ms);
            sqlx::query(
                r#"
                UPDATE queue_messages
                   SET status = 'queued', error_message = ?, next_attempt_at = ?, updated_at = ?
                 WHERE job_id = ?
                "#,
            )
            .bind(error)
            .bind(ts(&next))
            .bind(ts(&now))
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn queue() -> SqliteQueue {
        let opts: sqlx::sqlite::SqliteConnectOptions = "sqlite::memory:".parse().unwrap();
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await
            .unwrap();
        SqliteQueue::new(pool).await.unwrap()
    }

    fn message(job_id: &str) -> QueueMessage {
        QueueMessage { report_job_id: job_id.to_string(), tenant_id: "t1".to_string() }
    }

    #[tokio::test]
    async fn test_enqueue_claim_ack() {
        let q = queue().await;
        q.enqueue(&message("j1"), &EnqueueOptions::for_job("j1")).await.unwrap();

        let delivery = q.claim().await.unwrap().unwrap();
        assert_eq!(delivery.job_id, "j1");
        assert_eq!(delivery.message.report_job_id, "j1");
        assert_eq!(delivery.attempt, 1);

        // message is leased; a second claim gets nothing
        assert!(q.claim().await.unwrap().is_none());

        q.ack("j1").await.unwrap();
        assert_eq!(q.status_count("completed").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_job_id_is_ignored() {
        let q = queue().await;
        q.enqueue(&message("j1"), &EnqueueOptions::for_job("j1")).await.unwrap();
        q.enqueue(&message("j1"), &EnqueueOptions::for_job("j1")).await.unwrap();
        assert_eq!(q.status_count("queued").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let q = queue().await;
        q.enqueue(&message("j1"), &EnqueueOptions::for_job("j1")).await.unwrap();
        q.enqueue(&message("j2"), &EnqueueOptions::for_job("j2")).await.unwrap();
        assert_eq!(q.claim().await.unwrap().unwrap().job_id, "j1");
        assert_eq!(q.claim().await.unwrap().unwrap().job_id, "j2");
    }

    #[tokio::test]
    async fn test_nack_backs_off_before_retry() {
        let q = queue().await;
        q.enqueue(&message("j1"), &EnqueueOptions::for_job("j1")).await.unwrap();
        q.claim().await.unwrap().unwrap();
        q.nack("j1", "boom").await.unwrap();

        // requeued, but not ready until the backoff elapses
        assert_eq!(q.status_count("queued").await.unwrap(), 1);
        assert!(q.claim().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_attempt_budget_parks_message_as_failed() {
        let q = queue().await;
        let opts = EnqueueOptions {
            attempts: 1,
            backoff_base_ms: 0,
            ..EnqueueOptions::for_job("j1")
        };
        q.enqueue(&message("j1"), &opts).await.unwrap();
        q.claim().await.unwrap().unwrap();
        q.nack("j1", "fatal").await.unwrap();

        assert_eq!(q.status_count("failed").await.unwrap(), 1);
        assert!(q.claim().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_retry_is_redelivered_with_zero_backoff() {
        let q = queue().await;
        let opts = EnqueueOptions {
            attempts: 3,
            backoff_base_ms: 0,
            ..EnqueueOptions::for_job("j1")
        };
        q.enqueue(&message("j1"), &opts).await.unwrap();
        assert_eq!(q.claim().await.unwrap().unwrap().attempt, 1);
        q.nack("j1", "try again").await.unwrap();
        assert_eq!(q.claim().await.unwrap().unwrap().attempt, 2);
    }

    #[tokio::test]
    async fn test_completed_retention_is_pruned() {
        let q = queue().await;
        for i in 0..3 {
            let id = format!("j{i}");
            let opts = EnqueueOptions {
                remove_on_complete: 1,
                ..EnqueueOptions::for_job(id.clone())
            };
            q.enqueue(&message(&id), &opts).await.unwrap();
            q.claim().await.unwrap().unwrap();
            q.ack(&id).await.unwrap();
        }
        assert_eq!(q.status_count("completed").await.unwrap(), 1);
    }
}
