//! Request and response bodies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use reporthouse_core::{ArtifactMode, ArtifactReason, Compression, ReportFormat};
use reporthouse_reduce::{PartitionSpec, ReduceSpec};
use reporthouse_store::{JobStatus, ProcessingStats, ReportJob};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateReportRequest {
    pub report_id: String,
    pub format: ReportFormat,
    #[serde(default)]
    pub filters: Option<Value>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub locale: Option<String>,
    #[serde(default)]
    pub compression: Option<Compression>,
    #[serde(default)]
    pub include_formats: Vec<ReportFormat>,
    #[serde(default)]
    pub reduce_spec: Option<ReduceSpec>,
    #[serde(default)]
    pub partition_spec: Option<PartitionSpec>,
    #[serde(default)]
    pub source_collection: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactView {
    pub available: bool,
    pub mode: ArtifactMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<ArtifactReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub entries: Vec<String>,
}

/// The job document as polled by clients.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobView {
    pub id: String,
    pub status: JobStatus,
    pub progress: u8,
    pub row_count: u64,
    pub report_id: String,
    pub format: ReportFormat,
    pub artifact: ArtifactView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_stats: Option<ProcessingStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobView {
    pub fn from_job(job: &ReportJob) -> Self {
        Self {
            id: job.id.clone(),
            status: job.status,
            progress: job.progress,
            row_count: job.row_count,
            report_id: job.report_id.clone(),
            format: job.format,
            artifact: ArtifactView {
                available: job.artifact.available,
                mode: job.artifact.mode,
                reason: job.artifact.reason,
                size_bytes: job.artifact.size_bytes,
                checksum: job.artifact.checksum.clone(),
                entries: job.artifact.entries.clone(),
            },
            processing_stats: job.processing_stats.clone(),
            error: job.error_message.clone(),
            created_at: job.created_at,
            finished_at: job.finished_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadView {
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<ArtifactMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<ArtifactReason>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateScheduleRequest {
    pub name: String,
    pub cron_expression: String,
    pub timezone: String,
    #[serde(default)]
    pub enabled: Option<bool>,
    pub report_id: String,
    pub format: ReportFormat,
    #[serde(default)]
    pub filters: Option<Value>,
    #[serde(default)]
    pub compression: Option<Compression>,
    #[serde(default)]
    pub include_formats: Vec<ReportFormat>,
    #[serde(default)]
    pub reduce_spec: Option<ReduceSpec>,
    #[serde(default)]
    pub partition_spec: Option<PartitionSpec>,
    #[serde(default)]
    pub source_collection: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchScheduleRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub cron_expression: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
}
