use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Out-of-order candle: open time {candle_time} is not after last stored {last_time}")]
    OutOfOrder {
        candle_time: DateTime<Utc>,
        last_time: DateTime<Utc>,
    },

    /// Transport-level failure talking to the exchange. Safe to retry later.
    #[error("Exchange connectivity error: {0}")]
    Connectivity(String),

    /// The exchange refused the request (filters, balance, unknown order).
    #[error("Exchange rejected request: {0}")]
    ExchangeRejected(String),

    #[error("Order {order_id} still pending after timeout")]
    PendingTimeout { order_id: String },

    /// `resolve_order` on an order that is unknown or no longer PENDING.
    #[error("Order {order_id} is not pending")]
    NotPending { order_id: String },

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Errors worth retrying on a later cycle without operator action.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Connectivity(_) | Error::WebSocket(_))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
