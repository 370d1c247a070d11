//! Health check endpoints for load balancers and orchestrators.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::state::AppState;

const SERVICE_NAME: &str = "automation";

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct HealthResponse {
    /// "ok" or "degraded".
    pub status: String,
    pub service: String,
    pub version: String,
    pub timestamp: String,
    /// Lease holder identity of this instance.
    pub worker_id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<ComponentStatus>,
}

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ComponentStatus {
    /// "ok" or "unavailable".
    pub status: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/livez", get(livez))
}

fn response(state: &AppState, ok: bool, database: Option<ComponentStatus>) -> HealthResponse {
    HealthResponse {
        status: if ok { "ok" } else { "degraded" }.to_string(),
        service: SERVICE_NAME.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now().to_rfc3339(),
        worker_id: state.worker_id().to_string(),
        database,
    }
}

/// Process is up; dependencies are not checked.
async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    Json(response(&state, true, None))
}

/// Ready when the database answers. Returns 503 otherwise.
async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let db_result = state.db().health_check().await;
    let ok = db_result.is_ok();
    let database = ComponentStatus {
        status: if ok { "ok" } else { "unavailable" }.to_string(),
        message: db_result.err().map(|e| e.to_string()),
    };

    let status = if ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(response(&state, ok, Some(database))))
}

async fn livez() -> impl IntoResponse {
    StatusCode::OK
}
