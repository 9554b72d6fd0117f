//! HTTP surface: drain trigger, status, and health checks.

use crate::app::RelayState;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use relay_config_and_utils::SERVICE_NAME;
use relay_drain::{DrainError, DrainReport, DrainStatus};
use serde::Serialize;
use serde_json::json;
use tracing::{error, info, warn};

/// Build the service router.
pub fn router(state: RelayState) -> Router {
    Router::new()
        .route("/drain/run", post(run_drain))
        .route("/drain/status", get(drain_status))
        .route("/health", get(health))
        .route("/health/ready", get(health_ready))
        .route("/health/live", get(health_live))
        .with_state(state)
}

/// Error body returned by the drain endpoints.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl From<DrainError> for ApiError {
    fn from(e: DrainError) -> Self {
        let (status, code) = match &e {
            DrainError::StorageUnavailable(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "storage_unavailable")
            }
            DrainError::CycleInProgress => (StatusCode::CONFLICT, "cycle_in_progress"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };
        Self {
            status,
            code,
            message: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(code = self.code, message = %self.message, "Drain request failed");
        }
        let body = json!({
            "success": false,
            "error": self.code,
            "message": self.message,
        });
        (self.status, Json(body)).into_response()
    }
}

#[derive(Debug, Serialize)]
struct RunResponse {
    success: bool,
    #[serde(flatten)]
    report: DrainReport,
}

async fn run_drain(State(state): State<RelayState>) -> Result<Json<RunResponse>, ApiError> {
    info!("Manual drain triggered");
    let report = state.drain.run_once().await?;
    Ok(Json(RunResponse {
        success: true,
        report,
    }))
}

async fn drain_status(State(state): State<RelayState>) -> Result<Json<DrainStatus>, ApiError> {
    Ok(Json(state.drain.status().await?))
}

fn timestamp() -> String {
    Utc::now().to_rfc3339()
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "timestamp": timestamp(),
        "service": SERVICE_NAME,
    }))
}

async fn health_ready(State(state): State<RelayState>) -> Response {
    match state.db.health_check().await {
        Ok(()) => Json(json!({ "status": "ready", "timestamp": timestamp() })).into_response(),
        Err(e) => {
            warn!(error = %e, "Readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unavailable",
                    "timestamp": timestamp(),
                    "error": e.to_string(),
                })),
            )
                .into_response()
        }
    }
}

async fn health_live() -> Json<serde_json::Value> {
    Json(json!({ "status": "alive", "timestamp": timestamp() }))
}
