//! The Worker Loop
//!
//! Polls the queue and dispatches up to `max_job_concurrency` jobs in
//! parallel, each on its own task holding a semaphore permit. A
//! successful job acks its message; a failed one nacks it so the
//! queue's retry/backoff policy applies.
//!
//! Shutdown is cooperative and idempotent: the first signal flips the
//! `shutting_down` flag, the loop stops claiming, and in-flight jobs
//! are drained to completion before the loop returns.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{error, info};

use reporthouse_queue::{SqliteQueue, WorkQueue};

use crate::config::WorkerConfig;
use crate::processor::JobProcessor;

pub struct Worker {
    queue: Arc<SqliteQueue>,
    processor: Arc<JobProcessor>,
    config: Arc<WorkerConfig>,
    shutting_down: AtomicBool,
}

impl Worker {
    pub fn new(
        queue: Arc<SqliteQueue>,
        processor: Arc<JobProcessor>,
        config: Arc<WorkerConfig>,
    ) -> Arc<Self> {
        Arc::new(Self { queue, processor, config, shutting_down: AtomicBool::new(false) })
    }

    /// Idempotent: only the first call logs and flips the flag.
    pub fn begin_shutdown(&self) {
        if !self.shutting_down.swap(true, Ordering::SeqCst) {
            info!("worker shutdown requested, draining in-flight jobs");
        }
    }

    /// Consume the queue until shutdown, then drain in-flight jobs.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let semaphore = Arc::new(Semaphore::new(self.config.max_job_concurrency.max(1)));
        let mut in_flight: JoinSet<()> = JoinSet::new();

        loop {
            if *shutdown.borrow() {
                self.begin_shutdown();
            }
            if self.shutting_down.load(Ordering::SeqCst) {
                break;
            }
            while in_flight.try_join_next().is_some() {}

            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };

            match self.queue.claim().await {
                Ok(Some(delivery)) => {
                    let processor = Arc::clone(&self.processor);
                    let queue = Arc::clone(&self.queue);
                    in_flight.spawn(async move {
                        let _permit = permit;
                        let tenant = delivery.message.tenant_id.clone();
                        let job_id = delivery.message.report_job_id.clone();
                        match processor.process(&tenant, &job_id).await {
                            Ok(()) => {
                                if let Err(err) = queue.ack(&delivery.job_id).await {
                                    error!(job_id = %delivery.job_id, error = %err, "ack failed");
                                }
                            }
                            Err(run_err) => {
                                if let Err(err) =
                                    queue.nack(&delivery.job_id, &run_err.to_string()).await
                                {
                                    error!(job_id = %delivery.job_id, error = %err, "nack failed");
                                }
                            }
                        }
                    });
                }
                Ok(None) => {
                    drop(permit);
                    tokio::select! {
                        _ = tokio::time::sleep(std::time::Duration::from_millis(
                            self.config.poll_interval_ms.max(1),
                        )) => {}
                        _ = shutdown.changed() => {}
                    }
                }
                Err(err) => {
                    drop(permit);
                    error!(error = %err, "queue claim failed");
                    tokio::time::sleep(std::time::Duration::from_millis(
                        self.config.poll_interval_ms.max(1),
                    ))
                    .await;
                }
            }
        }

        while in_flight.join_next().await.is_some() {}
        info!("worker drained");
    }
}
