//! Persistent Record Types
//!
//! The report job, its processing stats, the schedule record, and the
//! small API-key record consulted by the intake. All of these serialize
//! camelCase on the wire, matching the HTTP surface.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use reporthouse_core::{ArtifactDescriptor, Compression, ReportFormat};
use reporthouse_reduce::{ChunkMetric, PartitionSpec, ReduceSpec};

/// Lifecycle state of a report job.
///
/// Transitions are monotone along queued → running → uploading →
/// uploaded; `failed` is reachable from any non-terminal state; jobs in
/// a terminal state carry `finished_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Uploading,
    Uploaded,
    Failed,
    Expired,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Uploading => "uploading",
            JobStatus::Uploaded => "uploaded",
            JobStatus::Failed => "failed",
            JobStatus::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(JobStatus::Queued),
            "running" => Some(JobStatus::Running),
            "uploading" => Some(JobStatus::Uploading),
            "uploaded" => Some(JobStatus::Uploaded),
            "failed" => Some(JobStatus::Failed),
            "expired" => Some(JobStatus::Expired),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Uploaded | JobStatus::Failed | JobStatus::Expired)
    }
}

/// How the job's rows were produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingMode {
    Raw,
    Reduce,
}

/// How an archive job assembled its entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZipStrategy {
    Multipass,
    Snapshot,
}

/// Run metrics persisted on terminal jobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingStats {
    pub duration_ms: u64,
    pub throughput_rows_per_second: f64,
    pub rows_in: u64,
    pub rows_out: u64,
    pub chunks: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chunk_metrics: Vec<ChunkMetric>,
    pub memory_peak_bytes: u64,
    pub mode: ProcessingMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zip_strategy: Option<ZipStrategy>,
}

/// One report job document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportJob {
    pub id: String,
    pub tenant_id: String,
    pub status: JobStatus,
    pub progress: u8,
    pub row_count: u64,
    pub report_id: String,
    pub format: ReportFormat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    #[serde(default)]
    pub compression: Compression,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include_formats: Vec<ReportFormat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reduce_spec: Option<ReduceSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition_spec: Option<PartitionSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_collection: Option<String>,
    pub artifact: ArtifactDescriptor,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_stats: Option<ProcessingStats>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub expire_at: DateTime<Utc>,
}

impl ReportJob {
    /// A fresh `queued` job with a pending artifact.
    pub fn new(
        tenant_id: impl Into<String>,
        report_id: impl Into<String>,
        format: ReportFormat,
        expire_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.into(),
            status: JobStatus::Queued,
            progress: 0,
            row_count: 0,
            report_id: report_id.into(),
            format,
            filters: None,
            timezone: None,
            locale: None,
            compression: Compression::None,
            include_formats: Vec::new(),
            reduce_spec: None,
            partition_spec: None,
            source_collection: None,
            artifact: ArtifactDescriptor::pending(),
            error_message: None,
            processing_stats: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            expire_at,
        }
    }
}

/// Everything persisted when a job reaches `uploaded`.
#[derive(Debug, Clone)]
pub struct JobCompletion {
    pub row_count: u64,
    pub artifact: ArtifactDescriptor,
    pub stats: ProcessingStats,
    pub finished_at: DateTime<Utc>,
}

/// A recurring report schedule.
///
/// `enabled == true` implies `next_run_at` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schedule {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    pub cron_expression: String,
    pub timezone: String,
    pub enabled: bool,
    pub report_id: String,
    pub format: ReportFormat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<Value>,
    #[serde(default)]
    pub compression: Compression,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include_formats: Vec<ReportFormat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reduce_spec: Option<ReduceSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition_spec: Option<PartitionSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_collection: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
