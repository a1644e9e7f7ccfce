//! The Job Processor
//!
//! Drives one report job end-to-end:
//!
//! 1. Load the job by `{tenant, id}`; an unknown id drops the message.
//! 2. Transition to running (progress 10), verify the read endpoint is
//!    not the writable primary, resolve and allowlist-check the source
//!    collection, sanitize the filters.
//! 3. Plan exactly one mode: reduce (a `reduceSpec` is present), archive
//!    multipass, archive snapshot, or raw. Raw jobs with
//!    `compression = zip` wrap the single generator as a one-entry
//!    archive.
//! 4. Transition to uploading (progress 75) and stream the generator
//!    into object storage under `<tenant>/<job>/report.<extension>`.
//! 5. Persist the terminal state with processing stats; on error, mark
//!    the job failed and re-raise so the queue retries.
//! 6. Unconditionally delete any snapshot file on the way out.

use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use tracing::{error, info, warn};
use uuid::Uuid;

use reporthouse_core::{sanitize_filters, Compression, ReportFormat, Row, RowId};
use reporthouse_formats::{
    generate_archive, generate_rows, ArchiveEntry, Generated, RowStream, StreamOptions,
};
use reporthouse_reduce::spec::is_identifier;
use reporthouse_reduce::{run_reduce, ChunkMetric, ReduceOptions, ReduceSource};
use reporthouse_store::{
    JobCompletion, JobStatus, JobStore, ProcessingMode, ProcessingStats, ReportJob, SourceStore,
    SqliteStore, ZipStrategy,
};
use reporthouse_storage::{ObjectStorage, UploadContext};

use crate::config::WorkerConfig;
use crate::error::{Result, WorkerError};
use crate::mem::MemorySampler;
use crate::snapshot::{snapshot_rows, write_snapshot};

/// Row accounting for the chosen plan.
enum RowTally {
    /// Known up front (reduce output, snapshot row count).
    Fixed { rows_in: u64, rows_out: u64 },
    /// Counted as the cursor streams through (raw, multipass first pass).
    Counted(Arc<AtomicU64>),
}

struct Plan {
    generated: Generated,
    entries: Vec<String>,
    tally: RowTally,
    chunks: u32,
    chunk_metrics: Vec<ChunkMetric>,
    mode: ProcessingMode,
    zip_strategy: Option<ZipStrategy>,
}

pub struct JobProcessor {
    store: Arc<SqliteStore>,
    storage: Arc<ObjectStorage>,
    config: Arc<WorkerConfig>,
}

impl JobProcessor {
    pub fn new(
        store: Arc<SqliteStore>,
        storage: Arc<ObjectStorage>,
        config: Arc<WorkerConfig>,
    ) -> Self {
        Self { store, storage, config }
    }

    /// Process one queue delivery. Returns `Ok(())` when the message can
    /// be acked (including the unknown-job drop); errors have already
    /// been recorded on the job and must be nacked by the caller.
    pub async fn process(&self, tenant: &str, job_id: &str) -> Result<()> {
        let Some(job) = self.store.load_job(tenant, job_id).await? else {
            warn!(tenant_id = %tenant, job_id = %job_id, "job not found, dropping message");
            return Ok(());
        };
        let started_at = Utc::now();
        self.store.mark_running(tenant, job_id, started_at).await?;
        info!(tenant_id = %tenant, job_id = %job_id, format = %job.format, "report job started");

        let mut snapshot_path: Option<PathBuf> = None;
        let outcome = self.run(&job, started_at, &mut snapshot_path).await;

        // guaranteed-release: the snapshot file never outlives the job
        if let Some(path) = snapshot_path.take() {
            if let Err(err) = tokio::fs::remove_file(&path).await {
                if err.kind() != io::ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %err, "snapshot cleanup failed");
                }
            }
        }

        match outcome {
            Ok(completion) => {
                self.store.complete_job(tenant, job_id, &completion).await?;
                info!(
                    tenant_id = %tenant,
                    job_id = %job_id,
                    rows = completion.row_count,
                    "report job uploaded"
                );
                Ok(())
            }
            Err(err) => {
                error!(tenant_id = %tenant, job_id = %job_id, error = %err, "report job failed");
                self.store
                    .fail_job(tenant, job_id, &err.to_string(), Utc::now())
                    .await?;
                Err(err)
            }
        }
    }

    async fn run(
        &self,
        job: &ReportJob,
        started_at: DateTime<Utc>,
        snapshot_path: &mut Option<PathBuf>,
    ) -> Result<JobCompletion> {
        self.store.verify_read_endpoint().await?;
        let collection = self.resolve_collection(job)?;
        let filters = sanitize_filters(job.filters.as_ref().unwrap_or(&serde_json::Value::Null));
        let sampler = Arc::new(MemorySampler::new());
        sampler.sample();

        let plan = self
            .plan(job, &collection, &filters, &sampler, snapshot_path)
            .await?;

        self.store
            .set_progress(&job.tenant_id, &job.id, JobStatus::Uploading, 75)
            .await?;

        let Generated { bytes, content_type, extension } = plan.generated;
        let key = format!("{}/{}/report.{}", job.tenant_id, job.id, extension);
        let ctx = UploadContext { tenant_id: job.tenant_id.clone(), job_id: job.id.clone() };
        let mut artifact = self.storage.upload(&key, content_type, bytes, &ctx).await?;
        artifact.entries = plan.entries;

        let (rows_in, rows_out) = match &plan.tally {
            RowTally::Fixed { rows_in, rows_out } => (*rows_in, *rows_out),
            RowTally::Counted(counter) => {
                let n = counter.load(Ordering::SeqCst);
                (n, n)
            }
        };
        let duration_ms = (Utc::now() - started_at).num_milliseconds().max(1) as u64;
        let throughput =
            ((rows_out as f64 / (duration_ms as f64 / 1000.0)) * 100.0).round() / 100.0;
        sampler.sample();

        let stats = ProcessingStats {
            duration_ms,
            throughput_rows_per_second: throughput,
            rows_in,
            rows_out,
            chunks: plan.chunks,
            chunk_metrics: plan.chunk_metrics,
            memory_peak_bytes: sampler.peak(),
            mode: plan.mode,
            zip_strategy: plan.zip_strategy,
        };
        Ok(JobCompletion {
            row_count: rows_out,
            artifact,
            stats,
            finished_at: Utc::now(),
        })
    }

    fn resolve_collection(&self, job: &ReportJob) -> Result<String> {
        let trimmed = job.source_collection.as_deref().unwrap_or("").trim();
        let name = if trimmed.is_empty() {
            self.config.default_source_collection.as_str()
        } else {
            trimmed
        };
        let allowed = is_identifier(name)
            && self
                .config
                .source_collection_allowlist
                .iter()
                .any(|allowed| allowed == name);
        if allowed {
            Ok(name.to_string())
        } else {
            Err(WorkerError::SourceCollectionNotAllowed(name.to_string()))
        }
    }

    fn stream_options(&self) -> StreamOptions {
        StreamOptions {
            buffer_bytes: self.config.buffer_bytes,
            document_max_rows: self.config.document_max_rows,
        }
    }

    async fn plan(
        &self,
        job: &ReportJob,
        collection: &str,
        filters: &Row,
        sampler: &Arc<MemorySampler>,
        snapshot_path: &mut Option<PathBuf>,
    ) -> Result<Plan> {
        let opts = self.stream_options();

        if let Some(spec) = &job.reduce_spec {
            let observer = {
                let sampler = Arc::clone(sampler);
                Arc::new(move || sampler.sample()) as Arc<dyn Fn() + Send + Sync>
            };
            let reduce_opts = ReduceOptions {
                batch_size: self.config.cursor_batch_size,
                default_chunks: self.config.partition_default_chunks,
                max_chunks: self.config.partition_cap_max,
                max_concurrency: self.config.partition_max_concurrency,
                streaming_accumulator: self.config.engine_v2,
                max_groups: self.config.max_groups,
            };
            let outcome = run_reduce(
                Arc::clone(&self.store) as Arc<dyn ReduceSource>,
                &job.tenant_id,
                collection,
                filters,
                spec,
                job.partition_spec.as_ref(),
                &reduce_opts,
                Some(observer),
            )
            .await?;

            let (generated, entries) = if job.format == ReportFormat::Archive {
                self.archive_from_rows(job, &outcome.rows, &opts)?
            } else {
                let generated =
                    generate_rows(job.format, owned_rows(outcome.rows.clone()), opts.clone())?;
                self.maybe_wrap_zip(job, generated, &opts)
            };
            return Ok(Plan {
                generated,
                entries,
                tally: RowTally::Fixed { rows_in: outcome.rows_in, rows_out: outcome.rows_out },
                chunks: outcome.chunks,
                chunk_metrics: outcome.chunk_metrics,
                mode: ProcessingMode::Reduce,
                zip_strategy: None,
            });
        }

        if job.format == ReportFormat::Archive {
            if job.include_formats.is_empty() {
                return Err(WorkerError::ArchiveRequiresIncludeFormats);
            }
            if self.config.zip_multipass {
                self.plan_multipass(job, collection, filters, sampler, &opts).await
            } else {
                self.plan_snapshot(job, collection, filters, sampler, snapshot_path, &opts)
                    .await
            }
        } else {
            let counter = Arc::new(AtomicU64::new(0));
            let rows = self.counted_rows(job, collection, filters, None, &counter, sampler);
            let generated = generate_rows(job.format, rows, opts.clone())?;
            let (generated, entries) = self.maybe_wrap_zip(job, generated, &opts);
            Ok(Plan {
                generated,
                entries,
                tally: RowTally::Counted(counter),
                chunks: 0,
                chunk_metrics: Vec::new(),
                mode: ProcessingMode::Raw,
                zip_strategy: None,
            })
        }
    }

    /// Archive assembly that re-reads the source once per included
    /// format, after a single probe for the dataset's max identifier so
    /// every pass sees the same upper bound.
    async fn plan_multipass(
        &self,
        job: &ReportJob,
        collection: &str,
        filters: &Row,
        sampler: &Arc<MemorySampler>,
        opts: &StreamOptions,
    ) -> Result<Plan> {
        let max_id = self.store.max_row_id(&job.tenant_id, collection, filters).await?;
        let counter = Arc::new(AtomicU64::new(0));
        let mut entries = Vec::with_capacity(job.include_formats.len());
        let mut names = Vec::with_capacity(job.include_formats.len());

        for (pass, format) in job.include_formats.iter().enumerate() {
            let rows: RowStream = match max_id {
                None => Box::pin(futures::stream::empty()),
                // only the first pass counts rows
                Some(max_id) if pass == 0 => {
                    self.counted_rows(job, collection, filters, Some(max_id), &counter, sampler)
                }
                Some(max_id) => self.plain_rows(job, collection, filters, Some(max_id)),
            };
            let generated = generate_rows(*format, rows, opts.clone())?;
            let name = format!("report.{}", generated.extension);
            names.push(name.clone());
            entries.push(ArchiveEntry::new(name, generated.bytes));
        }

        Ok(Plan {
            generated: generate_archive(entries, opts.clone()),
            entries: names,
            tally: RowTally::Counted(counter),
            chunks: 0,
            chunk_metrics: Vec::new(),
            mode: ProcessingMode::Raw,
            zip_strategy: Some(ZipStrategy::Multipass),
        })
    }

    /// Archive assembly that materializes the cursor once into an NDJSON
    /// snapshot, then opens an independent reader per included format.
    async fn plan_snapshot(
        &self,
        job: &ReportJob,
        collection: &str,
        filters: &Row,
        sampler: &Arc<MemorySampler>,
        snapshot_path: &mut Option<PathBuf>,
        opts: &StreamOptions,
    ) -> Result<Plan> {
        let rows = self.plain_rows(job, collection, filters, None);
        let name = format!(
            "snapshot-{}-{}-{}.ndjson",
            job.id,
            Utc::now().timestamp_millis(),
            Uuid::new_v4()
        );
        let on_row = {
            let sampler = Arc::clone(sampler);
            Arc::new(move |_rows: u64| sampler.sample()) as Arc<dyn Fn(u64) + Send + Sync>
        };
        let snap = write_snapshot(
            rows,
            &self.config.report_tmp_dir,
            &name,
            self.config.report_tmp_max_bytes,
            self.config.buffer_bytes,
            Some(on_row),
        )
        .await?;
        *snapshot_path = Some(snap.path.clone());

        let mut entries = Vec::with_capacity(job.include_formats.len());
        let mut names = Vec::with_capacity(job.include_formats.len());
        for format in &job.include_formats {
            let reader = snapshot_rows(snap.path.clone(), self.config.buffer_bytes);
            let generated = generate_rows(*format, reader, opts.clone())?;
            let name = format!("report.{}", generated.extension);
            names.push(name.clone());
            entries.push(ArchiveEntry::new(name, generated.bytes));
        }

        Ok(Plan {
            generated: generate_archive(entries, opts.clone()),
            entries: names,
            tally: RowTally::Fixed { rows_in: snap.row_count, rows_out: snap.row_count },
            chunks: 0,
            chunk_metrics: Vec::new(),
            mode: ProcessingMode::Raw,
            zip_strategy: Some(ZipStrategy::Snapshot),
        })
    }

    /// Reduce output rendered as an archive: the rows are already
    /// materialized, so every included format gets its own pass.
    fn archive_from_rows(
        &self,
        job: &ReportJob,
        rows: &[Row],
        opts: &StreamOptions,
    ) -> Result<(Generated, Vec<String>)> {
        if job.include_formats.is_empty() {
            return Err(WorkerError::ArchiveRequiresIncludeFormats);
        }
        let mut entries = Vec::with_capacity(job.include_formats.len());
        let mut names = Vec::with_capacity(job.include_formats.len());
        for format in &job.include_formats {
            let generated = generate_rows(*format, owned_rows(rows.to_vec()), opts.clone())?;
            let name = format!("report.{}", generated.extension);
            names.push(name.clone());
            entries.push(ArchiveEntry::new(name, generated.bytes));
        }
        Ok((generate_archive(entries, opts.clone()), names))
    }

    /// Wrap a single-format body as a one-entry archive when the job
    /// asked for zip compression.
    fn maybe_wrap_zip(
        &self,
        job: &ReportJob,
        generated: Generated,
        opts: &StreamOptions,
    ) -> (Generated, Vec<String>) {
        if job.compression == Compression::Zip && job.format != ReportFormat::Archive {
            let entry_name = format!("report.{}", generated.extension);
            let archive = generate_archive(
                vec![ArchiveEntry::new(entry_name.clone(), generated.bytes)],
                opts.clone(),
            );
            (archive, vec![entry_name])
        } else {
            (generated, Vec::new())
        }
    }

    fn counted_rows(
        &self,
        job: &ReportJob,
        collection: &str,
        filters: &Row,
        max_id: Option<RowId>,
        counter: &Arc<AtomicU64>,
        sampler: &Arc<MemorySampler>,
    ) -> RowStream {
        let stream = self.store.stream_rows(
            job.tenant_id.clone(),
            collection.to_string(),
            filters.clone(),
            max_id,
            self.config.cursor_batch_size,
        );
        let counter = Arc::clone(counter);
        let sampler = Arc::clone(sampler);
        Box::pin(stream.map(move |item| match item {
            Ok(row) => {
                counter.fetch_add(1, Ordering::SeqCst);
                sampler.sample();
                Ok(row)
            }
            Err(err) => Err(io::Error::other(err.to_string())),
        }))
    }

    fn plain_rows(
        &self,
        job: &ReportJob,
        collection: &str,
        filters: &Row,
        max_id: Option<RowId>,
    ) -> RowStream {
        let stream = self.store.stream_rows(
            job.tenant_id.clone(),
            collection.to_string(),
            filters.clone(),
            max_id,
            self.config.cursor_batch_size,
        );
        Box::pin(stream.map(|item| item.map_err(|err| io::Error::other(err.to_string()))))
    }
}

fn owned_rows(rows: Vec<Row>) -> RowStream {
    Box::pin(futures::stream::iter(rows.into_iter().map(Ok)))
}
