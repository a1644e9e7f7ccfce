//! The Schedule Ticker
//!
//! A periodic activity that turns due schedules into queued report jobs.
//! Each tick claims one due schedule at a time: compute the next fire
//! time from its cron expression in its own timezone, conditionally
//! advance `next_run_at` (losing the race means another ticker got it),
//! insert a `queued` job shaped exactly like an intake submission, and
//! enqueue the `{reportJobId, tenantId}` message with the job id as the
//! dedupe key.
//!
//! Invalid cron expressions disable the schedule rather than retrying
//! forever. Ticks are re-entrancy guarded: if a prior tick is still
//! running when the timer fires, the new tick is skipped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use reporthouse_queue::{EnqueueOptions, QueueMessage, SqliteQueue, WorkQueue};
use reporthouse_store::{
    compute_next_run, JobStore, ReportJob, Schedule, ScheduleStore, SqliteStore,
};

use crate::config::WorkerConfig;
use crate::error::Result;

pub struct ScheduleTicker {
    store: Arc<SqliteStore>,
    queue: Arc<SqliteQueue>,
    config: Arc<WorkerConfig>,
    ticking: AtomicBool,
}

impl ScheduleTicker {
    pub fn new(
        store: Arc<SqliteStore>,
        queue: Arc<SqliteQueue>,
        config: Arc<WorkerConfig>,
    ) -> Arc<Self> {
        Arc::new(Self { store, queue, config, ticking: AtomicBool::new(false) })
    }

    /// Run ticks at the configured cadence until shutdown flips. The
    /// first tick fires immediately; an in-flight tick runs to
    /// completion after shutdown.
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_millis(
                self.config.ticker_poll_interval_ms.max(1),
            ));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(err) = self.tick().await {
                            error!(error = %err, "schedule tick failed");
                        }
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            debug!("schedule ticker stopping");
                            break;
                        }
                    }
                }
            }
        })
    }

    /// One tick: claim and enqueue every currently-due schedule, one at
    /// a time. Returns how many jobs were enqueued.
    pub async fn tick(&self) -> Result<u32> {
        if self.ticking.swap(true, Ordering::SeqCst) {
            debug!("previous tick still running, skipping");
            return Ok(0);
        }
        let result = self.tick_inner().await;
        self.ticking.store(false, Ordering::SeqCst);
        result
    }

    async fn tick_inner(&self) -> Result<u32> {
        let mut enqueued = 0;
        loop {
            let now = Utc::now();
            let Some(schedule) = self.store.fetch_due(now).await? else {
                break;
            };
            let Some(prev_next_run) = schedule.next_run_at else {
                break;
            };

            let next = match compute_next_run(&schedule.cron_expression, &schedule.timezone, now) {
                Ok(next) => next,
                Err(reason) => {
                    warn!(
                        schedule_id = %schedule.id,
                        cron = %schedule.cron_expression,
                        timezone = %schedule.timezone,
                        "{reason}; disabling schedule"
                    );
                    self.store.disable_schedule(&schedule.id).await?;
                    continue;
                }
            };

            // someone else advanced it first
            if !self
                .store
                .advance_schedule(&schedule.id, prev_next_run, now, next)
                .await?
            {
                continue;
            }

            let job = job_from_schedule(&schedule, now, self.config.retention_days);
            self.store.insert_job(&job).await?;
            self.queue
                .enqueue(
                    &QueueMessage {
                        report_job_id: job.id.clone(),
                        tenant_id: job.tenant_id.clone(),
                    },
                    &EnqueueOptions::for_job(job.id.clone()),
                )
                .await?;
            info!(
                schedule_id = %schedule.id,
                job_id = %job.id,
                next_run_at = %next,
                "scheduled report enqueued"
            );
            enqueued += 1;
        }

        let swept = self.store.expire_due(Utc::now()).await?;
        if swept > 0 {
            debug!(swept, "expired jobs removed");
        }
        Ok(enqueued)
    }
}

/// Instantiate a job from the schedule's report-shaped fields.
fn job_from_schedule(schedule: &Schedule, now: DateTime<Utc>, retention_days: i64) -> ReportJob {
    let mut job = ReportJob::new(
        &schedule.tenant_id,
        &schedule.report_id,
        schedule.format,
        now + Duration::days(retention_days),
    );
    job.filters = schedule.filters.clone();
    job.timezone = Some(schedule.timezone.clone());
    job.compression = schedule.compression;
    job.include_formats = schedule.include_formats.clone();
    job.reduce_spec = schedule.reduce_spec.clone();
    job.partition_spec = schedule.partition_spec.clone();
    job.source_collection = schedule.source_collection.clone();
    job
}
