//! SQLite Store Implementation
//!
//! Implements the job, schedule, API-key and source-collection traits on
//! SQLite via SQLx.
//!
//! ## Endpoints
//!
//! [`SqliteStore::open`] creates two pools over the same database file:
//! a read-write pool and a read pool opened read-only with the
//! `query_only` pragma set. Every source-data read goes through the read
//! pool; `verify_read_endpoint` queries `PRAGMA query_only` and refuses
//! to proceed when the read endpoint is writable.
//!
//! ## Queries
//!
//! This implementation uses **runtime queries** (`sqlx::query`) instead
//! of compile-time macros so no database is needed at build time, and
//! creates its schema with in-code DDL on startup. Documents live as
//! JSON text in per-collection tables and are filtered and aggregated
//! with `json_extract`.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::{QueryBuilder, Row as _, TypeInfo, ValueRef};
use tracing::debug;

use reporthouse_core::{normalize, Compression, ReportFormat, Row, RowId};
use reporthouse_reduce::spec::is_identifier;
use reporthouse_reduce::{AccumExpr, IdRange, ReduceError, ReduceSource};

use crate::error::{Result, StoreError};
use crate::query::push_filter_predicates;
use crate::types::{JobCompletion, JobStatus, ReportJob, Schedule};
use crate::{ApiKeyStore, DocStream, JobStore, ScheduleStore, SourceStore};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS report_jobs (
    id TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL,
    status TEXT NOT NULL,
    progress INTEGER NOT NULL DEFAULT 0,
    row_count INTEGER NOT NULL DEFAULT 0,
    report_id TEXT NOT NULL,
    format TEXT NOT NULL,
    filters TEXT,
    timezone TEXT,
    locale TEXT,
    compression TEXT NOT NULL DEFAULT 'none',
    include_formats TEXT,
    reduce_spec TEXT,
    partition_spec TEXT,
    source_collection TEXT,
    artifact TEXT NOT NULL,
    error_message TEXT,
    processing_stats TEXT,
    created_at TEXT NOT NULL,
    started_at TEXT,
    finished_at TEXT,
    expire_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_report_jobs_tenant_created
    ON report_jobs (tenant_id, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_report_jobs_status_created
    ON report_jobs (status, created_at ASC);
CREATE INDEX IF NOT EXISTS idx_report_jobs_expire ON report_jobs (expire_at);

CREATE TABLE IF NOT EXISTS schedules (
    id TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL,
    name TEXT NOT NULL,
    cron_expression TEXT NOT NULL,
    timezone TEXT NOT NULL,
    enabled INTEGER NOT NULL DEFAULT 1,
    report_id TEXT NOT NULL,
    format TEXT NOT NULL,
    filters TEXT,
    compression TEXT NOT NULL DEFAULT 'none',
    include_formats TEXT,
    reduce_spec TEXT,
    partition_spec TEXT,
    source_collection TEXT,
    next_run_at TEXT,
    last_run_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_schedules_due
    ON schedules (tenant_id, enabled, next_run_at);

CREATE TABLE IF NOT EXISTS api_keys (
    tenant_id TEXT NOT NULL,
    key_hash TEXT NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (tenant_id, key_hash)
);
"#;

/// SQLite-backed store with separate write and read endpoints.
#[derive(Clone)]
pub struct SqliteStore {
    write: SqlitePool,
    read: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) a database file with a read-write pool and a
    /// read-only `query_only` pool.
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let write_opts = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));
        let write = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(write_opts)
            .await?;
        sqlx::raw_sql(SCHEMA).execute(&write).await?;

        let read_opts = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .read_only(true)
            .pragma("query_only", "1")
            .busy_timeout(Duration::from_secs(5));
        let read = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(read_opts)
            .await?;

        debug!(path = %path.as_ref().display(), "opened sqlite store");
        Ok(Self { write, read })
    }

    /// Open with a single read-write pool serving both endpoints.
    ///
    /// The replica check will refuse jobs against such a store; useful
    /// for tooling and for exercising that refusal.
    pub async fn open_unreplicated<P: AsRef<Path>>(path: P) -> Result<Self> {
        let opts = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));
        let write = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(opts)
            .await?;
        sqlx::raw_sql(SCHEMA).execute(&write).await?;
        let read = write.clone();
        Ok(Self { write, read })
    }

    /// In-memory store for tests. Both endpoints share one connection.
    pub async fn new_in_memory() -> Result<Self> {
        let opts: SqliteConnectOptions = "sqlite::memory:"
            .parse()
            .map_err(sqlx::Error::from)?;
        let write = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;
        sqlx::raw_sql(SCHEMA).execute(&write).await?;
        let read = write.clone();
        Ok(Self { write, read })
    }

    /// The write pool, shared with the queue living in the same database.
    pub fn write_pool(&self) -> SqlitePool {
        self.write.clone()
    }

    pub async fn close(&self) {
        self.read.close().await;
        self.write.close().await;
    }

    async fn bound_id(
        &self,
        tenant: &str,
        collection: &str,
        filters: &Row,
        descending: bool,
    ) -> Result<Option<RowId>> {
        let table = source_table(collection)?;
        let mut qb = QueryBuilder::new(format!("SELECT id FROM {table} WHERE tenant_id = "));
        qb.push_bind(tenant.to_string());
        push_filter_predicates(&mut qb, filters);
        qb.push(if descending {
            " ORDER BY id DESC LIMIT 1"
        } else {
            " ORDER BY id ASC LIMIT 1"
        });
        let row = qb.build().fetch_optional(&self.read).await?;
        row.map(|r| {
            let id: String = r.try_get("id")?;
            RowId::parse_str(&id).map_err(|e| StoreError::Malformed(e.to_string()))
        })
        .transpose()
    }
}

fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn opt_ts(dt: &Option<DateTime<Utc>>) -> Option<String> {
    dt.as_ref().map(ts)
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| StoreError::Timestamp(format!("{s}: {e}")))
}

fn parse_opt_ts(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
    s.as_deref().map(parse_ts).transpose()
}

fn to_json<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

fn opt_to_json<T: Serialize>(value: &Option<T>) -> Result<Option<String>> {
    value.as_ref().map(to_json).transpose()
}

fn opt_from_json<T: DeserializeOwned>(s: Option<String>) -> Result<Option<T>> {
    s.as_deref()
        .map(|raw| serde_json::from_str(raw).map_err(StoreError::from))
        .transpose()
}

fn parse_status(s: &str) -> Result<JobStatus> {
    JobStatus::parse(s).ok_or_else(|| StoreError::Malformed(format!("unknown status '{s}'")))
}

fn parse_format(s: &str) -> Result<ReportFormat> {
    s.parse()
        .map_err(|_| StoreError::Malformed(format!("unknown format '{s}'")))
}

fn parse_compression(s: &str) -> Result<Compression> {
    match s {
        "none" => Ok(Compression::None),
        "zip" => Ok(Compression::Zip),
        other => Err(StoreError::Malformed(format!("unknown compression '{other}'"))),
    }
}

fn compression_str(c: Compression) -> &'static str {
    match c {
        Compression::None => "none",
        Compression::Zip => "zip",
    }
}

/// Validated, quoted table name for a source collection.
fn source_table(collection: &str) -> Result<String> {
    if !is_identifier(collection) {
        return Err(StoreError::InvalidIdentifier(collection.to_string()));
    }
    Ok(format!("\"source_{collection}\""))
}

fn job_from_row(row: &SqliteRow) -> Result<ReportJob> {
    let status: String = row.try_get("status")?;
    let format: String = row.try_get("format")?;
    let compression: String = row.try_get("compression")?;
    let created_at: String = row.try_get("created_at")?;
    let expire_at: String = row.try_get("expire_at")?;
    let artifact: String = row.try_get("artifact")?;
    Ok(ReportJob {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        status: parse_status(&status)?,
        progress: row.try_get::<i64, _>("progress")? as u8,
        row_count: row.try_get::<i64, _>("row_count")? as u64,
        report_id: row.try_get("report_id")?,
        format: parse_format(&format)?,
        filters: opt_from_json(row.try_get("filters")?)?,
        timezone: row.try_get("timezone")?,
        locale: row.try_get("locale")?,
        compression: parse_compression(&compression)?,
        include_formats: opt_from_json(row.try_get("include_formats")?)?.unwrap_or_default(),
        reduce_spec: opt_from_json(row.try_get("reduce_spec")?)?,
        partition_spec: opt_from_json(row.try_get("partition_spec")?)?,
        source_collection: row.try_get("source_collection")?,
        artifact: serde_json::from_str(&artifact)?,
        error_message: row.try_get("error_message")?,
        processing_stats: opt_from_json(row.try_get("processing_stats")?)?,
        created_at: parse_ts(&created_at)?,
        started_at: parse_opt_ts(row.try_get("started_at")?)?,
        finished_at: parse_opt_ts(row.try_get("finished_at")?)?,
        expire_at: parse_ts(&expire_at)?,
    })
}

fn schedule_from_row(row: &SqliteRow) -> Result<Schedule> {
    let format: String = row.try_get("format")?;
    let compression: String = row.try_get("compression")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;
    Ok(Schedule {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        name: row.try_get("name")?,
        cron_expression: row.try_get("cron_expression")?,
        timezone: row.try_get("timezone")?,
        enabled: row.try_get::<i64, _>("enabled")? != 0,
        report_id: row.try_get("report_id")?,
        format: parse_format(&format)?,
        filters: opt_from_json(row.try_get("filters")?)?,
        compression: parse_compression(&compression)?,
        include_formats: opt_from_json(row.try_get("include_formats")?)?.unwrap_or_default(),
        reduce_spec: opt_from_json(row.try_get("reduce_spec")?)?,
        partition_spec: opt_from_json(row.try_get("partition_spec")?)?,
        source_collection: row.try_get("source_collection")?,
        next_run_at: parse_opt_ts(row.try_get("next_run_at")?)?,
        last_run_at: parse_opt_ts(row.try_get("last_run_at")?)?,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
    })
}

/// Decode one result column into a JSON value by its runtime type.
fn column_json(row: &SqliteRow, idx: usize) -> Result<Value> {
    let raw = row.try_get_raw(idx)?;
    if raw.is_null() {
        return Ok(Value::Null);
    }
    let type_name = raw.type_info().name().to_string();
    drop(raw);
    match type_name.as_str() {
        "INTEGER" | "BOOLEAN" => Ok(Value::from(row.try_get::<i64, _>(idx)?)),
        "REAL" => Ok(serde_json::Number::from_f64(row.try_get::<f64, _>(idx)?)
            .map(Value::Number)
            .unwrap_or(Value::Null)),
        "TEXT" => Ok(Value::String(row.try_get::<String, _>(idx)?)),
        _ => Ok(Value::Null),
    }
}

#[async_trait]
impl JobStore for SqliteStore {
    async fn insert_job(&self, job: &ReportJob) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO report_jobs (
                id, tenant_id, status, progress, row_count, report_id, format,
                filters, timezone, locale, compression, include_formats,
                reduce_spec, partition_spec, source_collection, artifact,
                error_message, processing_stats, created_at, started_at,
                finished_at, expire_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.id)
        .bind(&job.tenant_id)
        .bind(job.status.as_str())
        .bind(job.progress as i64)
        .bind(job.row_count as i64)
        .bind(&job.report_id)
        .bind(job.format.as_str())
        .bind(opt_to_json(&job.filters)?)
        .bind(&job.timezone)
        .bind(&job.locale)
        .bind(compression_str(job.compression))
        .bind(if job.include_formats.is_empty() {
            None
        } else {
            Some(to_json(&job.include_formats)?)
        })
        .bind(opt_to_json(&job.reduce_spec)?)
        .bind(opt_to_json(&job.partition_spec)?)
        .bind(&job.source_collection)
        .bind(to_json(&job.artifact)?)
        .bind(&job.error_message)
        .bind(opt_to_json(&job.processing_stats)?)
        .bind(ts(&job.created_at))
        .bind(opt_ts(&job.started_at))
        .bind(opt_ts(&job.finished_at))
        .bind(ts(&job.expire_at))
        .execute(&self.write)
        .await?;
        Ok(())
    }

    async fn load_job(&self, tenant: &str, id: &str) -> Result<Option<ReportJob>> {
        let row = sqlx::query("SELECT * FROM report_jobs WHERE tenant_id = ? AND id = ?")
            .bind(tenant)
            .bind(id)
            .fetch_optional(&self.write)
            .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    async fn list_jobs(&self, tenant: &str, limit: u32) -> Result<Vec<ReportJob>> {
        let rows = sqlx::query(
            "SELECT * FROM report_jobs WHERE tenant_id = ? ORDER BY created_at DESC LIMIT ?",
        )
        .bind(tenant)
        .bind(limit as i64)
        .fetch_all(&self.write)
        .await?;
        rows.iter().map(job_from_row).collect()
    }

    async fn mark_running(&self, tenant: &str, id: &str, started_at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE report_jobs
               SET status = 'running', progress = 10, started_at = ?, error_message = NULL
             WHERE tenant_id = ? AND id = ?
            "#,
        )
        .bind(ts(&started_at))
        .bind(tenant)
        .bind(id)
        .execute(&self.write)
        .await?;
        Ok(())
    }

    async fn set_progress(
        &self,
        tenant: &str,
        id: &str,
        status: JobStatus,
        progress: u8,
    ) -> Result<()> {
        sqlx::query("UPDATE report_jobs SET status = ?, progress = ? WHERE tenant_id = ? AND id = ?")
            .bind(status.as_str())
            .bind(progress as i64)
            .bind(tenant)
            .bind(id)
            .execute(&self.write)
            .await?;
        Ok(())
    }

    async fn complete_job(&self, tenant: &str, id: &str, completion: &JobCompletion) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE report_jobs
               SET status = 'uploaded', progress = 100, row_count = ?,
                   artifact = ?, processing_stats = ?, finished_at = ?,
                   error_message = NULL
             WHERE tenant_id = ? AND id = ?
            "#,
        )
        .bind(completion.row_count as i64)
        .bind(to_json(&completion.artifact)?)
        .bind(to_json(&completion.stats)?)
        .bind(ts(&completion.finished_at))
        .bind(tenant)
        .bind(id)
        .execute(&self.write)
        .await?;
        Ok(())
    }

    async fn fail_job(
        &self,
        tenant: &str,
        id: &str,
        message: &str,
        finished_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE report_jobs
               SET status = 'failed', finished_at = ?, error_message = ?
             WHERE tenant_id = ? AND id = ?
            "#,
        )
        .bind(ts(&finished_at))
        .bind(message)
        .bind(tenant)
        .bind(id)
        .execute(&self.write)
        .await?;
        Ok(())
    }

    async fn expire_due(&self, now: DateTime<Utc>) -> Result<u64> {
        let done = sqlx::query("DELETE FROM report_jobs WHERE expire_at <= ?")
            .bind(ts(&now))
            .execute(&self.write)
            .await?;
        Ok(done.rows_affected())
    }
}

#[async_trait]
impl ScheduleStore for SqliteStore {
    async fn insert_schedule(&self, schedule: &Schedule) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO schedules (
                id, tenant_id, name, cron_expression, timezone, enabled,
                report_id, format, filters, compression, include_formats,
                reduce_spec, partition_spec, source_collection,
                next_run_at, last_run_at, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&schedule.id)
        .bind(&schedule.tenant_id)
        .bind(&schedule.name)
        .bind(&schedule.cron_expression)
        .bind(&schedule.timezone)
        .bind(i64::from(schedule.enabled))
        .bind(&schedule.report_id)
        .bind(schedule.format.as_str())
        .bind(opt_to_json(&schedule.filters)?)
        .bind(compression_str(schedule.compression))
        .bind(if schedule.include_formats.is_empty() {
            None
        } else {
            Some(to_json(&schedule.include_formats)?)
        })
        .bind(opt_to_json(&schedule.reduce_spec)?)
        .bind(opt_to_json(&schedule.partition_spec)?)
        .bind(&schedule.source_collection)
        .bind(opt_ts(&schedule.next_run_at))
        .bind(opt_ts(&schedule.last_run_at))
        .bind(ts(&schedule.created_at))
        .bind(ts(&schedule.updated_at))
        .execute(&self.write)
        .await?;
        Ok(())
    }

    async fn load_schedule(&self, tenant: &str, id: &str) -> Result<Option<Schedule>> {
        let row = sqlx::query("SELECT * FROM schedules WHERE tenant_id = ? AND id = ?")
            .bind(tenant)
            .bind(id)
            .fetch_optional(&self.write)
            .await?;
        row.as_ref().map(schedule_from_row).transpose()
    }

    async fn list_schedules(&self, tenant: &str) -> Result<Vec<Schedule>> {
        let rows = sqlx::query("SELECT * FROM schedules WHERE tenant_id = ? ORDER BY created_at ASC")
            .bind(tenant)
            .fetch_all(&self.write)
            .await?;
        rows.iter().map(schedule_from_row).collect()
    }

    async fn update_schedule(&self, schedule: &Schedule) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE schedules
               SET name = ?, cron_expression = ?, timezone = ?, enabled = ?,
                   report_id = ?, format = ?, filters = ?, compression = ?,
                   include_formats = ?, reduce_spec = ?, partition_spec = ?,
                   source_collection = ?, next_run_at = ?, last_run_at = ?,
                   updated_at = ?
             WHERE tenant_id = ? AND id = ?
            "#,
        )
        .bind(&schedule.name)
        .bind(&schedule.cron_expression)
        .bind(&schedule.timezone)
        .bind(i64::from(schedule.enabled))
        .bind(&schedule.report_id)
        .bind(schedule.format.as_str())
        .bind(opt_to_json(&schedule.filters)?)
        .bind(compression_str(schedule.compression))
        .bind(if schedule.include_formats.is_empty() {
            None
        } else {
            Some(to_json(&schedule.include_formats)?)
        })
        .bind(opt_to_json(&schedule.reduce_spec)?)
        .bind(opt_to_json(&schedule.partition_spec)?)
        .bind(&schedule.source_collection)
        .bind(opt_ts(&schedule.next_run_at))
        .bind(opt_ts(&schedule.last_run_at))
        .bind(ts(&schedule.updated_at))
        .bind(&schedule.tenant_id)
        .bind(&schedule.id)
        .execute(&self.write)
        .await?;
        Ok(())
    }

    async fn delete_schedule(&self, tenant: &str, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM schedules WHERE tenant_id = ? AND id = ?")
            .bind(tenant)
            .bind(id)
            .execute(&self.write)
            .await?;
        Ok(())
    }

    async fn fetch_due(&self, now: DateTime<Utc>) -> Result<Option<Schedule>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM schedules
             WHERE enabled = 1 AND next_run_at IS NOT NULL AND next_run_at <= ?
             ORDER BY next_run_at ASC
             LIMIT 1
            "#,
        )
        .bind(ts(&now))
        .fetch_optional(&self.write)
        .await?;
        row.as_ref().map(schedule_from_row).transpose()
    }

    async fn advance_schedule(
        &self,
        id: &str,
        prev_next_run_at: DateTime<Utc>,
        last_run_at: DateTime<Utc>,
        next_run_at: DateTime<Utc>,
    ) -> Result<bool> {
        let done = sqlx::query(
            r#"
            UPDATE schedules
               SET last_run_at = ?, next_run_at = ?, updated_at = ?
             WHERE id = ? AND enabled = 1 AND next_run_at = ?
            "#,
        )
        .bind(ts(&last_run_at))
        .bind(ts(&next_run_at))
        .bind(ts(&Utc::now()))
        .bind(id)
        .bind(ts(&prev_next_run_at))
        .execute(&self.write)
        .await?;
        Ok(done.rows_affected() > 0)
    }

    async fn disable_schedule(&self, id: &str) -> Result<()> {
        sqlx::query("UPDATE schedules SET enabled = 0, updated_at = ? WHERE id = ?")
            .bind(ts(&Utc::now()))
            .bind(id)
            .execute(&self.write)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ApiKeyStore for SqliteStore {
    async fn insert_api_key(&self, tenant: &str, key_hash: &str) -> Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO api_keys (tenant_id, key_hash, created_at) VALUES (?, ?, ?)",
        )
        .bind(tenant)
        .bind(key_hash)
        .bind(ts(&Utc::now()))
        .execute(&self.write)
        .await?;
        Ok(())
    }

    async fn verify_api_key(&self, tenant: &str, key_hash: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM api_keys WHERE tenant_id = ? AND key_hash = ?")
            .bind(tenant)
            .bind(key_hash)
            .fetch_optional(&self.write)
            .await?;
        Ok(row.is_some())
    }
}

#[async_trait]
impl SourceStore for SqliteStore {
    async fn ensure_collection(&self, collection: &str) -> Result<()> {
        let table = source_table(collection)?;
        let ddl = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                tenant_id TEXT NOT NULL,
                id TEXT NOT NULL,
                doc TEXT NOT NULL,
                PRIMARY KEY (tenant_id, id)
            )
            "#
        );
        sqlx::raw_sql(&ddl).execute(&self.write).await?;
        Ok(())
    }

    async fn insert_documents(
        &self,
        collection: &str,
        tenant: &str,
        docs: &[(RowId, Value)],
    ) -> Result<()> {
        let table = source_table(collection)?;
        let mut tx = self.write.begin().await?;
        for (id, doc) in docs {
            sqlx::query(&format!(
                "INSERT OR REPLACE INTO {table} (tenant_id, id, doc) VALUES (?, ?, ?)"
            ))
            .bind(tenant)
            .bind(id.to_hex())
            .bind(doc.to_string())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn verify_read_endpoint(&self) -> Result<()> {
        let query_only: i64 = sqlx::query_scalar("PRAGMA query_only")
            .fetch_one(&self.read)
            .await?;
        if query_only == 1 {
            Ok(())
        } else {
            Err(StoreError::ReadEndpointIsPrimary)
        }
    }

    async fn max_row_id(
        &self,
        tenant: &str,
        collection: &str,
        filters: &Row,
    ) -> Result<Option<RowId>> {
        self.bound_id(tenant, collection, filters, true).await
    }

    fn stream_rows(
        &self,
        tenant: String,
        collection: String,
        filters: Row,
        max_id: Option<RowId>,
        batch_size: u32,
    ) -> DocStream {
        let read = self.read.clone();
        Box::pin(async_stream::try_stream! {
            let table = source_table(&collection)?;
            let batch = batch_size.max(1) as i64;
            let mut last: Option<String> = None;
            loop {
                let mut qb =
                    QueryBuilder::new(format!("SELECT id, doc FROM {table} WHERE tenant_id = "));
                qb.push_bind(tenant.clone());
                if let Some(after) = &last {
                    qb.push(" AND id > ");
                    qb.push_bind(after.clone());
                }
                if let Some(max) = &max_id {
                    qb.push(" AND id <= ");
                    qb.push_bind(max.to_hex());
                }
                push_filter_predicates(&mut qb, &filters);
                qb.push(" ORDER BY id ASC LIMIT ");
                qb.push_bind(batch);

                let rows = qb.build().fetch_all(&read).await?;
                let fetched = rows.len();
                for raw in rows {
                    let id: String = raw.try_get("id")?;
                    let doc: String = raw.try_get("doc")?;
                    let parsed: Value = serde_json::from_str(&doc)?;
                    let mut out = Row::new();
                    out.insert("_id".to_string(), Value::String(id.clone()));
                    if let Value::Object(map) = normalize(&parsed) {
                        for (key, value) in map {
                            out.insert(key, value);
                        }
                    }
                    last = Some(id);
                    yield out;
                }
                if fetched < batch as usize {
                    break;
                }
            }
        })
    }
}

#[async_trait]
impl ReduceSource for SqliteStore {
    async fn id_bounds(
        &self,
        tenant: &str,
        collection: &str,
        filters: &Row,
    ) -> std::result::Result<Option<(RowId, RowId)>, ReduceError> {
        let min = self
            .bound_id(tenant, collection, filters, false)
            .await
            .map_err(|e| ReduceError::Source(e.to_string()))?;
        let max = self
            .bound_id(tenant, collection, filters, true)
            .await
            .map_err(|e| ReduceError::Source(e.to_string()))?;
        Ok(match (min, max) {
            (Some(min), Some(max)) => Some((min, max)),
            _ => None,
        })
    }

    async fn aggregate_range(
        &self,
        tenant: &str,
        collection: &str,
        filters: &Row,
        range: IdRange,
        group_by: &[String],
        accums: &[AccumExpr],
        _batch_size: u32,
    ) -> std::result::Result<Vec<Row>, ReduceError> {
        let out: Result<Vec<Row>> = async {
            let table = source_table(collection)?;
            for field in group_by {
                if !is_identifier(field) {
                    return Err(StoreError::InvalidIdentifier(field.clone()));
                }
            }

            let mut qb = QueryBuilder::new("SELECT ");
            let mut first = true;
            for field in group_by {
                if !first {
                    qb.push(", ");
                }
                first = false;
                qb.push(format!("json_extract(doc, '$.{field}') AS \"{field}\""));
            }
            for accum in accums {
                if !first {
                    qb.push(", ");
                }
                first = false;
                qb.push(accum_sql(accum)?);
            }

            qb.push(format!(" FROM {table} WHERE tenant_id = "));
            qb.push_bind(tenant.to_string());
            qb.push(" AND id >= ");
            qb.push_bind(range.start_id().to_hex());
            if let Some(end) = range.end_id() {
                qb.push(" AND id < ");
                qb.push_bind(end.to_hex());
            }
            push_filter_predicates(&mut qb, filters);

            if group_by.is_empty() {
                qb.push(" HAVING COUNT(*) > 0");
            } else {
                qb.push(" GROUP BY ");
                for i in 1..=group_by.len() {
                    if i > 1 {
                        qb.push(", ");
                    }
                    qb.push(i.to_string());
                }
            }

            let rows = qb.build().fetch_all(&self.read).await?;
            let mut out = Vec::with_capacity(rows.len());
            for raw in &rows {
                let mut partial = Row::new();
                for (idx, field) in group_by.iter().enumerate() {
                    partial.insert(field.clone(), column_json(raw, idx)?);
                }
                for (offset, accum) in accums.iter().enumerate() {
                    partial.insert(
                        accum_alias(accum).to_string(),
                        column_json(raw, group_by.len() + offset)?,
                    );
                }
                out.push(partial);
            }
            Ok(out)
        }
        .await;
        out.map_err(|e| ReduceError::Source(e.to_string()))
    }
}

fn accum_alias(accum: &AccumExpr) -> &str {
    match accum {
        AccumExpr::CountAll { alias }
        | AccumExpr::Sum { alias, .. }
        | AccumExpr::Min { alias, .. }
        | AccumExpr::Max { alias, .. }
        | AccumExpr::CountNotNull { alias, .. } => alias,
    }
}

fn accum_sql(accum: &AccumExpr) -> Result<String> {
    let check = |name: &str| -> Result<()> {
        if is_identifier(name) {
            Ok(())
        } else {
            Err(StoreError::InvalidIdentifier(name.to_string()))
        }
    };
    match accum {
        AccumExpr::CountAll { alias } => {
            check(alias)?;
            Ok(format!("COUNT(*) AS \"{alias}\""))
        }
        AccumExpr::Sum { field, alias } => {
            check(field)?;
            check(alias)?;
            Ok(format!("SUM(json_extract(doc, '$.{field}')) AS \"{alias}\""))
        }
        AccumExpr::Min { field, alias } => {
            check(field)?;
            check(alias)?;
            Ok(format!("MIN(json_extract(doc, '$.{field}')) AS \"{alias}\""))
        }
        AccumExpr::Max { field, alias } => {
            check(field)?;
            check(alias)?;
            Ok(format!("MAX(json_extract(doc, '$.{field}')) AS \"{alias}\""))
        }
        AccumExpr::CountNotNull { field, alias } => {
            check(field)?;
            check(alias)?;
            Ok(format!(
                "SUM(CASE WHEN json_extract(doc, '$.{field}') IS NOT NULL THEN 1 ELSE 0 END) AS \"{alias}\""
            ))
        }
    }
}
