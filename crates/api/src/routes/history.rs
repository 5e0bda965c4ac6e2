use axum::{
    extract::{Query, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::error;

use history::{PatternQuery, TimeRange};

use crate::{auth::require_auth, AppState};

const DEFAULT_LIMIT: u32 = 100;
const MAX_LIMIT: u32 = 1000;

pub fn history_router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/api/patterns", get(get_patterns))
        .route("/api/signals", get(get_signals))
        .route("/api/orders", get(get_orders))
        .route_layer(middleware::from_fn_with_state(state, require_auth))
}

/// Query string shared by the history endpoints. Times are RFC 3339.
#[derive(Debug, Deserialize)]
struct HistoryParams {
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
    /// Only used by `/api/patterns`.
    pattern: Option<String>,
    limit: Option<u32>,
}

impl HistoryParams {
    fn range(&self) -> TimeRange {
        TimeRange {
            from: self.from,
            to: self.to,
        }
    }

    fn limit(&self) -> u32 {
        self.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT)
    }
}

/// A History Store failure, reported as a 500 with the message.
struct StoreError(common::Error);

impl IntoResponse for StoreError {
    fn into_response(self) -> Response {
        error!(error = %self.0, "History query failed");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": self.0.to_string()})),
        )
            .into_response()
    }
}

impl From<common::Error> for StoreError {
    fn from(e: common::Error) -> Self {
        Self(e)
    }
}

// ─── Patterns ─────────────────────────────────────────────────────────────────

async fn get_patterns(
    State(state): State<AppState>,
    Query(q): Query<HistoryParams>,
) -> Result<Response, StoreError> {
    let query = PatternQuery {
        pattern: q.pattern.clone(),
        range: q.range(),
        limit: Some(q.limit()),
    };
    let patterns = state.history.patterns(&query).await?;
    Ok(Json(json!({ "patterns": patterns, "count": patterns.len() })).into_response())
}

// ─── Signals ──────────────────────────────────────────────────────────────────

async fn get_signals(
    State(state): State<AppState>,
    Query(q): Query<HistoryParams>,
) -> Result<Response, StoreError> {
    let signals = state.history.signals(&q.range(), Some(q.limit())).await?;
    Ok(Json(json!({ "signals": signals, "count": signals.len() })).into_response())
}

// ─── Orders ───────────────────────────────────────────────────────────────────

async fn get_orders(
    State(state): State<AppState>,
    Query(q): Query<HistoryParams>,
) -> Result<Response, StoreError> {
    let orders = state.history.orders(&q.range(), Some(q.limit())).await?;
    Ok(Json(json!({ "orders": orders, "count": orders.len() })).into_response())
}
