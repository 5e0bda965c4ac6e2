use async_trait::async_trait;

use crate::{Holdings, Order, OrderRecord, Result, TradingPair};

/// Abstraction over the exchange connection.
///
/// `BinanceClient` implements this for live trading.
/// `PaperClient` implements this for simulation.
///
/// Only `OrderExecutor` in `crates/engine` submits or polls orders through a
/// `dyn ExchangeClient`. The engine reads balances at startup, after BUY
/// fills, when reconciling after a halt, and when balance limits are set.
///
/// Failures are reported as `Error::Connectivity` (retryable) or
/// `Error::ExchangeRejected` (not retryable for that request).
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    /// Submit an order. The returned record is `Filled`, `Rejected` or
    /// `Pending`; a `Pending` record must later be resolved via `poll_order`.
    async fn submit_order(&self, order: &Order) -> Result<OrderRecord>;

    /// Fetch the current status of a previously submitted order.
    async fn poll_order(&self, order: &OrderRecord) -> Result<OrderRecord>;

    /// Current account holdings of the pair's base asset.
    async fn current_holdings(&self, pair: &TradingPair) -> Result<Holdings>;

    /// Free plus locked balance of the pair's quote asset.
    async fn quote_balance(&self, pair: &TradingPair) -> Result<f64>;
}
