//! Integration tests for the model server API endpoints

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use chrono::Utc;
use server_lib::{
    api::{create_router, serve_on, AppState, MODEL_VERSION_HEADER},
    health::{components, HealthRegistry},
    observability::{ServiceMetrics, StructuredLogger},
    service::ModelService,
    store::{BlobStore, Ledger, MemoryBlobStore, MemoryLedger, ModelRegistry},
    training::{ForestParams, MobileModel, Trainer, EXPORT_FILE_NAME},
    ModelVersionRecord,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tower::ServiceExt;

struct TestApp {
    router: Router,
    state: Arc<AppState>,
    health: HealthRegistry,
    blobs: Arc<MemoryBlobStore>,
    ledger: Arc<MemoryLedger>,
}

async fn setup_test_app() -> TestApp {
    let health = HealthRegistry::new();
    health.register(components::BLOB_STORE).await;
    health.register(components::LEDGER).await;

    let blobs = Arc::new(MemoryBlobStore::new("bucket-hardgameflaskapp-models"));
    let ledger = Arc::new(MemoryLedger::new());
    let registry = ModelRegistry::new(blobs.clone(), ledger.clone());

    let params = ForestParams {
        n_trees: 5,
        max_depth: Some(4),
        seed: 7,
    };
    let service = ModelService::new(
        registry,
        Trainer::new(params),
        health.clone(),
        ServiceMetrics::new(),
        StructuredLogger::new("model-server-test"),
    );
    health.set_ready(true).await;

    let state = Arc::new(AppState::new(service));
    TestApp {
        router: create_router(state.clone()),
        state,
        health,
        blobs,
        ledger,
    }
}

fn record(player_x: f64, missile_x: f64, outcome: f64) -> Value {
    json!({
        "playerX": player_x,
        "playerY": 40.0,
        "enemyX": 120.0,
        "enemyY": 300.0,
        "missileX": missile_x,
        "missileY": 60.0,
        "enemyMissileX": 0.0,
        "enemyMissileY": 0.0,
        "enemyMove": 1.0,
        "outcome": outcome
    })
}

fn telemetry_batch() -> Value {
    json!([
        record(10.0, 12.0, 1.0),
        record(200.0, 20.0, 0.0),
        record(15.0, 14.0, 1.0)
    ])
}

async fn upload(app: &Router, body: String) -> axum::response::Response {
    app.clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/upload_game_data")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap()
}

async fn get(app: &Router, uri: &str) -> axum::response::Response {
    app.clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

fn version_header(response: &axum::response::Response) -> String {
    response.headers()[&MODEL_VERSION_HEADER]
        .to_str()
        .unwrap()
        .to_string()
}

#[tokio::test]
async fn test_fetch_on_empty_registry_bootstraps_version_one() {
    let app = setup_test_app().await;

    let response = get(&app.router, "/get_latest_coreml_model").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(version_header(&response), "1");
    assert_eq!(
        response.headers()[header::CONTENT_DISPOSITION],
        format!("attachment; filename=\"{}\"", EXPORT_FILE_NAME).as_str()
    );
    let first = body_bytes(response).await;
    let model: MobileModel = serde_json::from_slice(&first).unwrap();
    assert_eq!(model.model_version, 1);
    assert!(model.trees.is_empty());

    // A second fetch serves the seeded version instead of seeding again
    let response = get(&app.router, "/get_latest_coreml_model").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(version_header(&response), "1");
    assert_eq!(body_bytes(response).await, first);

    assert_eq!(app.ledger.all().await.unwrap().len(), 1);
    assert_eq!(app.blobs.keys().await, vec!["sklearn_model1.pkl".to_string()]);
}

#[tokio::test]
async fn test_upload_publishes_version_one() {
    let app = setup_test_app().await;

    let response = upload(&app.router, telemetry_batch().to_string()).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(body, json!({ "success": true }));

    let rows = app.ledger.all().await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].version, 1);
    assert!(rows[0].model_file_url.ends_with("/sklearn_model1.pkl"));
    assert_eq!(app.blobs.keys().await, vec!["sklearn_model1.pkl".to_string()]);
}

#[tokio::test]
async fn test_upload_then_fetch_serves_trained_model() {
    let app = setup_test_app().await;

    assert_eq!(
        upload(&app.router, telemetry_batch().to_string()).await.status(),
        StatusCode::OK
    );
    assert_eq!(
        upload(&app.router, telemetry_batch().to_string()).await.status(),
        StatusCode::OK
    );

    let response = get(&app.router, "/get_latest_coreml_model").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(version_header(&response), "2");

    let model: MobileModel = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(model.model_version, 2);
    assert_eq!(model.trees.len(), 5);
    assert_eq!(app.ledger.all().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_upload_missing_outcome_is_bad_request() {
    let app = setup_test_app().await;

    let mut incomplete = record(10.0, 12.0, 1.0);
    incomplete.as_object_mut().unwrap().remove("outcome");
    let batch = json!([record(1.0, 2.0, 0.0), incomplete]);

    let response = upload(&app.router, batch.to_string()).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().contains("record 1"));

    assert!(app.ledger.all().await.unwrap().is_empty());
    assert!(app.blobs.is_empty().await);
}

#[tokio::test]
async fn test_upload_empty_batch_is_bad_request() {
    let app = setup_test_app().await;

    let response = upload(&app.router, "[]".to_string()).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(app.ledger.all().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_upload_non_array_is_bad_request() {
    let app = setup_test_app().await;

    let response = upload(&app.router, record(1.0, 2.0, 0.0).to_string()).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_fetch_with_ledger_down_does_not_bootstrap() {
    let app = setup_test_app().await;
    app.ledger.set_unavailable(true);

    let response = get(&app.router, "/get_latest_coreml_model").await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(app.blobs.is_empty().await);

    let health = app.health.health().await;
    assert_eq!(
        health.components[components::LEDGER].status,
        server_lib::ComponentStatus::Degraded
    );

    app.ledger.set_unavailable(false);
    assert!(app.ledger.all().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_fetch_with_missing_blob_is_not_found() {
    let app = setup_test_app().await;
    app.ledger
        .insert(&ModelVersionRecord {
            version: 3,
            upload_date: Utc::now(),
            model_file_url: "mem://bucket-hardgameflaskapp-models/sklearn_model3.pkl".to_string(),
            checksum: None,
        })
        .await
        .unwrap();

    let response = get(&app.router, "/get_latest_coreml_model").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(body["success"], false);
    assert!(app.blobs.is_empty().await);
}

#[tokio::test]
async fn test_healthz_and_readyz() {
    let app = setup_test_app().await;

    let response = get(&app.router, "/healthz").await;
    assert_eq!(response.status(), StatusCode::OK);
    let health: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(health["status"], "healthy");

    let response = get(&app.router, "/readyz").await;
    assert_eq!(response.status(), StatusCode::OK);

    app.health.set_ready(false).await;
    let response = get(&app.router, "/readyz").await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let app = setup_test_app().await;
    upload(&app.router, telemetry_batch().to_string()).await;

    let response = get(&app.router, "/metrics").await;
    assert_eq!(response.status(), StatusCode::OK);
    let text = String::from_utf8(body_bytes(response).await).unwrap();
    assert!(text.contains("model_service_ingest_requests_total"));
}

#[tokio::test]
async fn test_upload_with_corrupt_current_model_is_server_error() {
    let app = setup_test_app().await;
    app.blobs.put("sklearn_model4.pkl", b"not a model").await.unwrap();

    let response = upload(&app.router, telemetry_batch().to_string()).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(body["success"], false);

    assert!(app.ledger.all().await.unwrap().is_empty());
    assert_eq!(app.blobs.keys().await, vec!["sklearn_model4.pkl".to_string()]);
}

#[tokio::test]
async fn test_unreachable_ledger_fails_health_and_readiness() {
    let app = setup_test_app().await;
    app.ledger.set_unavailable(true);
    assert!(!app.state.service.check_storage().await);

    let response = get(&app.router, "/healthz").await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let health: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(health["status"], "unhealthy");

    let response = get(&app.router, "/readyz").await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let readiness: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(readiness["reason"], "Storage collaborator unhealthy");

    // A request that reaches both collaborators restores health
    app.ledger.set_unavailable(false);
    let response = get(&app.router, "/get_latest_coreml_model").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(get(&app.router, "/healthz").await.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_serve_stops_after_shutdown_signal() {
    let app = setup_test_app().await;
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(serve_on(listener, app.state.clone(), async move {
        let _ = shutdown_rx.await;
    }));

    let body = telemetry_batch().to_string();
    let request = format!(
        "POST /upload_game_data HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    assert!(response.starts_with("HTTP/1.1 200"), "{}", response);

    shutdown_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("server did not stop")
        .unwrap()
        .unwrap();

    assert_eq!(app.ledger.all().await.unwrap().len(), 1);
    assert!(TcpStream::connect(addr).await.is_err());
}
