//! HTTP API: telemetry ingest, model download, health and Prometheus metrics

use crate::health::ComponentStatus;
use crate::service::{ModelService, ServiceError};
use crate::training::{parse_batch, TrainingError};
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::{header, HeaderName, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

/// Largest accepted telemetry batch
pub const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Header carrying the served model version
pub const MODEL_VERSION_HEADER: HeaderName = HeaderName::from_static("x-model-version");

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub service: ModelService,
}

impl AppState {
    pub fn new(service: ModelService) -> Self {
        Self { service }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = match &self {
            ServiceError::Telemetry(_) | ServiceError::Training(TrainingError::EmptyTrainingSet) => {
                StatusCode::BAD_REQUEST
            }
            ServiceError::ModelNotFound { .. } => StatusCode::NOT_FOUND,
            ServiceError::Store(e) if e.is_ledger_failure() || e.is_blob_failure() => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            error!(status = status.as_u16(), error = %self, "Request failed");
        } else {
            warn!(status = status.as_u16(), error = %self, "Request rejected");
        }

        (
            status,
            Json(json!({ "success": false, "error": self.to_string() })),
        )
            .into_response()
    }
}

/// Retrain on a JSON array of telemetry records
async fn upload_game_data(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ServiceError> {
    let records = parse_batch(&body).map_err(|e| {
        state.service.metrics().inc_errors("telemetry");
        ServiceError::from(e)
    })?;

    state.service.ingest(records).await?;
    Ok(Json(json!({ "success": true })))
}

/// Latest model converted to the mobile format, as a file attachment
async fn get_latest_coreml_model(
    State(state): State<Arc<AppState>>,
) -> Result<Response, ServiceError> {
    let exported = state.service.latest_export().await?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", exported.file_name),
            ),
            (MODEL_VERSION_HEADER, exported.version.to_string()),
        ],
        exported.bytes,
    )
        .into_response())
}

/// Health check response - returns 200 if healthy, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.service.health().health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy | ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.service.health().readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/upload_game_data", post(upload_game_data))
        .route("/get_latest_coreml_model", get(get_latest_coreml_model))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}

/// Start the API server on `port`
///
/// Returns once `shutdown` resolves and every in-flight request has finished.
pub async fn serve<F>(port: u16, state: Arc<AppState>, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    serve_on(listener, state, shutdown).await
}

/// Serve on an already bound listener
pub async fn serve_on<F>(listener: TcpListener, state: Arc<AppState>, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = create_router(state);
    info!(addr = %listener.local_addr()?, "Starting API server");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("API server stopped");
    Ok(())
}
