//! Schedule CRUD.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use reporthouse_core::Compression;
use reporthouse_store::{compute_next_run, Schedule, ScheduleStore};

use crate::auth::TenantId;
use crate::error::ApiError;
use crate::models::{CreateScheduleRequest, PatchScheduleRequest};
use crate::AppState;

use super::validate_report_shape;

pub async fn create_schedule(
    State(state): State<AppState>,
    Extension(TenantId(tenant)): Extension<TenantId>,
    Json(request): Json<CreateScheduleRequest>,
) -> Result<(StatusCode, Json<Schedule>), ApiError> {
    if request.name.trim().is_empty() {
        return Err(ApiError::Validation("schedule name must not be empty".into()));
    }
    validate_report_shape(
        &state.config,
        request.format,
        request.compression,
        &request.include_formats,
        request.reduce_spec.as_ref(),
        request.partition_spec.as_ref(),
        request.source_collection.as_deref(),
    )?;

    let now = Utc::now();
    let next_run_at = compute_next_run(&request.cron_expression, &request.timezone, now)
        .map_err(ApiError::InvalidCron)?;

    let schedule = Schedule {
        id: Uuid::new_v4().to_string(),
        tenant_id: tenant.clone(),
        name: request.name,
        cron_expression: request.cron_expression,
        timezone: request.timezone,
        enabled: request.enabled.unwrap_or(true),
        report_id: request.report_id,
        format: request.format,
        filters: request.filters,
        compression: request.compression.unwrap_or(Compression::None),
        include_formats: request.include_formats,
        reduce_spec: request.reduce_spec,
        partition_spec: request.partition_spec,
        source_collection: request.source_collection,
        next_run_at: Some(next_run_at),
        last_run_at: None,
        created_at: now,
        updated_at: now,
    };
    state.store.insert_schedule(&schedule).await?;
    info!(tenant_id = %tenant, schedule_id = %schedule.id, "schedule created");

    Ok((StatusCode::CREATED, Json(schedule)))
}

pub async fn list_schedules(
    State(state): State<AppState>,
    Extension(TenantId(tenant)): Extension<TenantId>,
) -> Result<Json<Vec<Schedule>>, ApiError> {
    Ok(Json(state.store.list_schedules(&tenant).await?))
}

pub async fn patch_schedule(
    State(state): State<AppState>,
    Extension(TenantId(tenant)): Extension<TenantId>,
    Path(id): Path<String>,
    Json(request): Json<PatchScheduleRequest>,
) -> Result<Json<Schedule>, ApiError> {
    let mut schedule = state
        .store
        .load_schedule(&tenant, &id)
        .await?
        .ok_or(ApiError::NotFound("schedule"))?;

    if let Some(name) = request.name {
        schedule.name = name;
    }
    if let Some(cron_expression) = request.cron_expression {
        schedule.cron_expression = cron_expression;
    }
    if let Some(timezone) = request.timezone {
        schedule.timezone = timezone;
    }
    if let Some(enabled) = request.enabled {
        schedule.enabled = enabled;
    }

    // an enabled schedule must always carry its next fire time
    if schedule.enabled {
        let next = compute_next_run(&schedule.cron_expression, &schedule.timezone, Utc::now())
            .map_err(ApiError::InvalidCron)?;
        schedule.next_run_at = Some(next);
    }
    schedule.updated_at = Utc::now();

    state.store.update_schedule(&schedule).await?;
    Ok(Json(schedule))
}

pub async fn delete_schedule(
    State(state): State<AppState>,
    Extension(TenantId(tenant)): Extension<TenantId>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state
        .store
        .load_schedule(&tenant, &id)
        .await?
        .ok_or(ApiError::NotFound("schedule"))?;
    state.store.delete_schedule(&tenant, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}
