mod auth;
pub mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::sync::RwLock;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use common::{EngineState, TradingMode};
use history::HistoryStore;

/// Shared application state injected into every route handler.
#[derive(Clone)]
pub struct AppState {
    pub history: HistoryStore,
    pub engine_state: Arc<RwLock<EngineState>>,
    pub trading_mode: TradingMode,
    pub dashboard_token: String,
}

/// The full router: unauthenticated health check plus the bearer-protected
/// history endpoints.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_headers(Any)
        .allow_methods(Any);

    Router::new()
        .merge(routes::history_router(state.clone()))
        .merge(routes::health_router())
        .with_state(state)
        .layer(cors)
}

/// Build and run the Axum API server.
pub async fn serve(state: AppState, port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = router(state);

    info!(%addr, "History API listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use chrono::{Duration, TimeZone, Utc};
    use serde_json::Value;
    use tower::ServiceExt;

    use common::{Action, Order, OrderOutcome, OrderRecord, OrderSide, PatternMatch, Signal};

    const TOKEN: &str = "secret";

    async fn state() -> AppState {
        let history = HistoryStore::in_memory().await.unwrap();
        let t0 = Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap();
        for (i, name) in ["hammer", "engulfing", "hammer"].iter().enumerate() {
            let at = t0 + Duration::minutes(i as i64 * 5);
            history
                .append_pattern("ETHUSDT", &PatternMatch::new(at, *name, 1.0), 100.0 + i as f64, at)
                .await
                .unwrap();
        }
        let signal = Signal {
            candle_time: t0,
            action: Action::Buy,
            contributing_patterns: vec![PatternMatch::new(t0, "hammer", 1.0)],
            rationale: "sum 1.00 > 0.50".into(),
        };
        history.append_signal("ETHUSDT", &signal, t0).await.unwrap();
        let order = Order::market("ETHUSDT", OrderSide::Buy, 0.5, t0);
        history
            .record_order(&OrderRecord::for_order(&order, OrderOutcome::Filled).filled(100.0, t0))
            .await
            .unwrap();

        AppState {
            history,
            engine_state: Arc::new(RwLock::new(EngineState::Running)),
            trading_mode: TradingMode::Paper,
            dashboard_token: TOKEN.into(),
        }
    }

    async fn get(uri: &str, token: Option<&str>) -> (StatusCode, Value) {
        let mut req = Request::builder().uri(uri);
        if let Some(t) = token {
            req = req.header(header::AUTHORIZATION, format!("Bearer {t}"));
        }
        let resp = router(state().await)
            .oneshot(req.body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn healthz_needs_no_token() {
        let (status, body) = get("/healthz", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["engine"], "running");
        assert_eq!(body["mode"], "paper");
    }

    #[tokio::test]
    async fn history_routes_require_bearer_token() {
        for uri in ["/api/patterns", "/api/signals", "/api/orders"] {
            assert_eq!(get(uri, None).await.0, StatusCode::UNAUTHORIZED, "{uri}");
            assert_eq!(get(uri, Some("wrong")).await.0, StatusCode::UNAUTHORIZED, "{uri}");
            assert_eq!(get(uri, Some(TOKEN)).await.0, StatusCode::OK, "{uri}");
        }
    }

    #[tokio::test]
    async fn patterns_filter_by_name_time_and_limit() {
        let (_, body) = get("/api/patterns?pattern=hammer", Some(TOKEN)).await;
        assert_eq!(body["count"], 2);
        assert_eq!(body["patterns"][0]["pattern_name"], "hammer");

        let (_, body) = get(
            "/api/patterns?from=2024-04-01T00:05:00Z&to=2024-04-01T00:10:00Z",
            Some(TOKEN),
        )
        .await;
        assert_eq!(body["count"], 2);
        assert_eq!(body["patterns"][0]["pattern_name"], "engulfing");

        let (_, body) = get("/api/patterns?limit=1", Some(TOKEN)).await;
        assert_eq!(body["count"], 1);
        assert_eq!(body["patterns"][0]["price"], 102.0);
    }

    #[tokio::test]
    async fn signals_and_orders_are_listed() {
        let (_, body) = get("/api/signals", Some(TOKEN)).await;
        assert_eq!(body["signals"][0]["action"], "BUY");

        let (_, body) = get("/api/orders", Some(TOKEN)).await;
        assert_eq!(body["orders"][0]["outcome"], "FILLED");
        assert_eq!(body["orders"][0]["fill_price"], 100.0);
    }

    #[tokio::test]
    async fn malformed_time_is_bad_request() {
        let (status, _) = get("/api/orders?from=yesterday", Some(TOKEN)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
