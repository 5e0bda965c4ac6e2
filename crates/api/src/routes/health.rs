use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde_json::{json, Value};
use tracing::warn;

use crate::AppState;

pub fn health_router() -> Router<AppState> {
    Router::new().route("/healthz", get(healthz))
}

/// Health check endpoint, no auth required.
/// Reports 503 when the History Store cannot be reached.
async fn healthz(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let engine_state = *state.engine_state.read().await;
    let (status, db) = match state.history.ping().await {
        Ok(()) => (StatusCode::OK, "ok"),
        Err(e) => {
            warn!(error = %e, "Health check: history store unreachable");
            (StatusCode::SERVICE_UNAVAILABLE, "unreachable")
        }
    };
    (
        status,
        Json(json!({
            "status": if status == StatusCode::OK { "ok" } else { "degraded" },
            "engine": engine_state.to_string(),
            "mode": state.trading_mode.to_string(),
            "history": db,
        })),
    )
}
