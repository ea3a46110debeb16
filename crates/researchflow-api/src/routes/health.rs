use axum::{Json, Router, extract::State, http::StatusCode, routing::get};
use serde::Serialize;

use crate::state::{AppState, CapacityMetrics};

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    capacity: Option<CapacityMetrics>,
}

impl HealthResponse {
    fn status(status: &'static str) -> Self {
        Self {
            status,
            version: None,
            capacity: None,
        }
    }
}

pub fn health_router() -> Router<AppState> {
    Router::new()
        .route("/", get(health))
        .route("/live", get(live))
        .route("/ready", get(ready))
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        version: Some(env!("CARGO_PKG_VERSION")),
        ..HealthResponse::status("ok")
    })
}

async fn live() -> Json<HealthResponse> {
    Json(HealthResponse::status("alive"))
}

async fn ready(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let capacity = state.metrics();
    let (code, status) = if !state.is_configured() {
        (StatusCode::SERVICE_UNAVAILABLE, "unconfigured")
    } else if capacity.available_permits == 0 {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    } else {
        (StatusCode::OK, "ready")
    };

    (
        code,
        Json(HealthResponse {
            capacity: Some(capacity),
            ..HealthResponse::status(status)
        }),
    )
}
