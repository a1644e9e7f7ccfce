//! Report submission, polling and download.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use chrono::{Duration, Utc};
use tracing::info;

use reporthouse_core::{ArtifactReason, Compression};
use reporthouse_queue::{EnqueueOptions, QueueMessage, WorkQueue};
use reporthouse_store::{JobStore, ReportJob};

use crate::auth::TenantId;
use crate::error::ApiError;
use crate::models::{CreateReportRequest, DownloadView, JobView};
use crate::AppState;

use super::validate_report_shape;

pub async fn create_report(
    State(state): State<AppState>,
    Extension(TenantId(tenant)): Extension<TenantId>,
    Json(request): Json<CreateReportRequest>,
) -> Result<(StatusCode, Json<JobView>), ApiError> {
    validate_report_shape(
        &state.config,
        request.format,
        request.compression,
        &request.include_formats,
        request.reduce_spec.as_ref(),
        request.partition_spec.as_ref(),
        request.source_collection.as_deref(),
    )?;

    let mut job = ReportJob::new(
        &tenant,
        &request.report_id,
        request.format,
        Utc::now() + Duration::days(state.config.retention_days),
    );
    job.filters = request.filters;
    job.timezone = request.timezone;
    job.locale = request.locale;
    job.compression = request.compression.unwrap_or(Compression::None);
    job.include_formats = request.include_formats;
    job.reduce_spec = request.reduce_spec;
    job.partition_spec = request.partition_spec;
    job.source_collection = request.source_collection;

    state.store.insert_job(&job).await?;
    state
        .queue
        .enqueue(
            &QueueMessage { report_job_id: job.id.clone(), tenant_id: tenant.clone() },
            &EnqueueOptions::for_job(job.id.clone()),
        )
        .await?;
    info!(tenant_id = %tenant, job_id = %job.id, format = %job.format, "report job accepted");

    Ok((StatusCode::ACCEPTED, Json(JobView::from_job(&job))))
}

pub async fn get_report(
    State(state): State<AppState>,
    Extension(TenantId(tenant)): Extension<TenantId>,
    Path(id): Path<String>,
) -> Result<Json<JobView>, ApiError> {
    let job = state
        .store
        .load_job(&tenant, &id)
        .await?
        .ok_or(ApiError::NotFound("report job"))?;
    Ok(Json(JobView::from_job(&job)))
}

pub async fn download_report(
    State(state): State<AppState>,
    Extension(TenantId(tenant)): Extension<TenantId>,
    Path(id): Path<String>,
) -> Result<Json<DownloadView>, ApiError> {
    let job = state
        .store
        .load_job(&tenant, &id)
        .await?
        .ok_or(ApiError::NotFound("report job"))?;
    let artifact = &job.artifact;

    if !artifact.available {
        return Ok(Json(DownloadView {
            available: false,
            url: None,
            mode: Some(artifact.mode),
            reason: artifact.reason,
        }));
    }
    match state.storage.sign_download(artifact).await {
        Some(url) => Ok(Json(DownloadView {
            available: true,
            url: Some(url),
            mode: None,
            reason: None,
        })),
        None => Ok(Json(DownloadView {
            available: false,
            url: None,
            mode: Some(artifact.mode),
            reason: Some(ArtifactReason::DownloadUrlUnavailable),
        })),
    }
}
