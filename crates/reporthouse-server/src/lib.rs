//! Reporthouse HTTP Intake
//!
//! The validated front door of the service. Every request is pinned to a
//! tenant by the `X-API-Key` / `X-Tenant-Id` header pair; report
//! submissions are validated against the rules the job processor relies
//! on (archive implies include formats, zip compression conflicts with
//! archive, source collections are allowlisted, reduce specs are
//! identifier-safe) before a `queued` job is persisted and its queue
//! message pushed.
//!
//! ## Routes
//!
//! | Method | Path | Purpose |
//! |---|---|---|
//! | POST | `/v1/reports` | submit a report job |
//! | GET | `/v1/reports/{id}` | poll job status |
//! | GET | `/v1/reports/{id}/download` | signed download URL |
//! | POST | `/v1/schedules` | create a schedule |
//! | GET | `/v1/schedules` | list schedules |
//! | PATCH | `/v1/schedules/{id}` | enable/disable, recron |
//! | DELETE | `/v1/schedules/{id}` | delete a schedule |
//! | GET | `/healthz` | liveness (unauthenticated) |

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod models;

use std::sync::Arc;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;

use reporthouse_queue::SqliteQueue;
use reporthouse_storage::ObjectStorage;
use reporthouse_store::SqliteStore;

pub use config::ServerConfig;
pub use error::ApiError;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<SqliteStore>,
    pub queue: Arc<SqliteQueue>,
    pub storage: Arc<ObjectStorage>,
    pub config: Arc<ServerConfig>,
}

pub fn create_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/v1/reports", post(handlers::reports::create_report))
        .route("/v1/reports/:id", get(handlers::reports::get_report))
        .route(
            "/v1/reports/:id/download",
            get(handlers::reports::download_report),
        )
        .route(
            "/v1/schedules",
            post(handlers::schedules::create_schedule).get(handlers::schedules::list_schedules),
        )
        .route(
            "/v1/schedules/:id",
            axum::routing::patch(handlers::schedules::patch_schedule)
                .delete(handlers::schedules::delete_schedule),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_api_key,
        ))
        .with_state(state);

    Router::new().route("/healthz", get(healthz)).merge(api)
}

async fn healthz() -> &'static str {
    "ok"
}
