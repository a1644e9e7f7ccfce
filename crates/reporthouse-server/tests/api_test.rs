//! Intake HTTP surface tests: auth, validation, submission, schedules.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use reporthouse_core::ArtifactMode;
use reporthouse_queue::{SqliteQueue, WorkQueue};
use reporthouse_server::{auth, create_router, AppState, ServerConfig};
use reporthouse_storage::{ObjectStorage, StorageConfig};
use reporthouse_store::{ApiKeyStore, JobStore, SourceStore, SqliteStore};

struct TestApp {
    _dir: tempfile::TempDir,
    router: Router,
    store: Arc<SqliteStore>,
    queue: Arc<SqliteQueue>,
}

async fn app() -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let storage_root = dir.path().join("artifacts");
    std::fs::create_dir_all(&storage_root).unwrap();

    let store = Arc::new(SqliteStore::open(dir.path().join("reporthouse.db")).await.unwrap());
    store.ensure_collection("reportSource").await.unwrap();
    store
        .insert_api_key("t1", &auth::hash_key("test-key"))
        .await
        .unwrap();
    let queue = Arc::new(SqliteQueue::new(store.write_pool()).await.unwrap());

    let mut config = ServerConfig::default();
    config.database_path = dir.path().join("reporthouse.db");
    config.storage = StorageConfig {
        mode: ArtifactMode::Filesystem,
        root: Some(storage_root),
        ..StorageConfig::default()
    };
    let storage = Arc::new(ObjectStorage::from_config(config.storage.clone()).unwrap());

    let state = AppState {
        store: Arc::clone(&store),
        queue: Arc::clone(&queue),
        storage,
        config: Arc::new(config),
    };
    TestApp { _dir: dir, router: create_router(state), store, queue }
}

fn authed(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-api-key", "test-key")
        .header("x-tenant-id", "t1")
        .header("content-type", "application/json");
    match body {
        Some(v) => builder.body(Body::from(v.to_string())).unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_requests_without_credentials_are_unauthorized() {
    let app = app().await;
    let response = app
        .router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/reports")
                .header("content-type", "application/json")
                .body(Body::from(json!({"reportId": "x", "format": "delimited"}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_wrong_api_key_is_unauthorized() {
    let app = app().await;
    let response = app
        .router
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/v1/schedules")
                .header("x-api-key", "wrong-key")
                .header("x-tenant-id", "t1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_submit_report_persists_queued_job_and_message() {
    let app = app().await;
    let response = app
        .router
        .clone()
        .oneshot(authed(
            "POST",
            "/v1/reports",
            Some(json!({
                "reportId": "orders",
                "format": "structured-object",
                "filters": {"status": "paid"}
            })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = body_json(response).await;
    assert_eq!(body["status"], "queued");
    assert_eq!(body["artifact"]["available"], false);

    let job_id = body["id"].as_str().unwrap();
    let job = app.store.load_job("t1", job_id).await.unwrap().unwrap();
    assert_eq!(job.filters, Some(json!({"status": "paid"})));

    let delivery = app.queue.claim().await.unwrap().unwrap();
    assert_eq!(delivery.message.report_job_id, job_id);
    assert_eq!(delivery.message.tenant_id, "t1");
}

#[tokio::test]
async fn test_archive_validation_rules() {
    let app = app().await;

    let response = app
        .router
        .clone()
        .oneshot(authed(
            "POST",
            "/v1/reports",
            Some(json!({"reportId": "orders", "format": "archive"})),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(
        body_json(response).await["error"]["code"],
        "ARCHIVE_REQUIRES_INCLUDE_FORMATS"
    );

    let response = app
        .router
        .clone()
        .oneshot(authed(
            "POST",
            "/v1/reports",
            Some(json!({
                "reportId": "orders",
                "format": "archive",
                "compression": "zip",
                "includeFormats": ["delimited"]
            })),
        ))
        .await
        .unwrap();
    assert_eq!(
        body_json(response).await["error"]["code"],
        "COMPRESSION_ARCHIVE_CONFLICT"
    );

    let response = app
        .router
        .clone()
        .oneshot(authed(
            "POST",
            "/v1/reports",
            Some(json!({
                "reportId": "orders",
                "format": "delimited",
                "includeFormats": ["structured-object"]
            })),
        ))
        .await
        .unwrap();
    assert_eq!(
        body_json(response).await["error"]["code"],
        "INCLUDE_FORMATS_NOT_ALLOWED"
    );
}

#[tokio::test]
async fn test_disallowed_source_collection_is_rejected() {
    let app = app().await;
    let response = app
        .router
        .oneshot(authed(
            "POST",
            "/v1/reports",
            Some(json!({
                "reportId": "orders",
                "format": "delimited",
                "sourceCollection": "orders"
            })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(
        body_json(response).await["error"]["code"],
        "SOURCE_COLLECTION_NOT_ALLOWED"
    );
}

#[tokio::test]
async fn test_unknown_report_is_404_and_download_of_pending_is_unavailable() {
    let app = app().await;
    let response = app
        .router
        .clone()
        .oneshot(authed("GET", "/v1/reports/nope", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // submit, then ask for the download before any worker ran
    let response = app
        .router
        .clone()
        .oneshot(authed(
            "POST",
            "/v1/reports",
            Some(json!({"reportId": "orders", "format": "delimited"})),
        ))
        .await
        .unwrap();
    let job_id = body_json(response).await["id"].as_str().unwrap().to_string();

    let response = app
        .router
        .oneshot(authed("GET", &format!("/v1/reports/{job_id}/download"), None))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["available"], false);
    assert_eq!(body["reason"], "PENDING");
}

#[tokio::test]
async fn test_schedule_lifecycle() {
    let app = app().await;

    let response = app
        .router
        .clone()
        .oneshot(authed(
            "POST",
            "/v1/schedules",
            Some(json!({
                "name": "daily orders",
                "cronExpression": "0 6 * * *",
                "timezone": "UTC",
                "reportId": "orders",
                "format": "delimited"
            })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = body_json(response).await;
    assert_eq!(created["enabled"], true);
    assert!(created["nextRunAt"].is_string());
    let id = created["id"].as_str().unwrap().to_string();

    let response = app
        .router
        .clone()
        .oneshot(authed(
            "PATCH",
            &format!("/v1/schedules/{id}"),
            Some(json!({"enabled": false})),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["enabled"], false);

    let response = app
        .router
        .clone()
        .oneshot(authed("DELETE", &format!("/v1/schedules/{id}"), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app
        .router
        .oneshot(authed("GET", "/v1/schedules", None))
        .await
        .unwrap();
    assert_eq!(body_json(response).await.as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_invalid_cron_is_rejected() {
    let app = app().await;
    let response = app
        .router
        .oneshot(authed(
            "POST",
            "/v1/schedules",
            Some(json!({
                "name": "broken",
                "cronExpression": "not a cron",
                "timezone": "UTC",
                "reportId": "orders",
                "format": "delimited"
            })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body_json(response).await["error"]["code"], "INVALID_CRON");
}
