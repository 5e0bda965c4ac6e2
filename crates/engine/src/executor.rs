use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use common::{Error, ExchangeClient, Order, OrderOutcome, OrderRecord, OrderSide, Result};

/// Result of handing one intent to the exchange.
///
/// Every submission yields a record, even when the exchange refused it or
/// could not be reached; `error` then carries the reason.
#[derive(Debug)]
pub struct Submission {
    pub record: OrderRecord,
    pub error: Option<Error>,
}

/// Adapter between the engine and the exchange client.
///
/// This is the ONLY component that calls `ExchangeClient::submit_order` or
/// `poll_order`.
pub struct OrderExecutor {
    client: Arc<dyn ExchangeClient>,
}

impl OrderExecutor {
    pub fn new(client: Arc<dyn ExchangeClient>) -> Self {
        Self { client }
    }

    /// Build the order for an intent. A price hint makes it a limit order.
    pub fn prepare(
        pair: &str,
        side: OrderSide,
        quantity: f64,
        price_hint: Option<f64>,
        intent_time: DateTime<Utc>,
    ) -> Order {
        match price_hint {
            Some(price) => Order::limit(pair, side, quantity, price, intent_time),
            None => Order::market(pair, side, quantity, intent_time),
        }
    }

    /// Submit an order. Exchange refusals become REJECTED records and
    /// transport failures ERROR records; neither is retried here.
    pub async fn submit(&self, order: &Order) -> Submission {
        info!(
            pair = %order.pair,
            side = %order.side,
            qty = order.quantity,
            price_hint = ?order.price,
            order_id = %order.id,
            "Submitting order"
        );

        match self.client.submit_order(order).await {
            Ok(record) => {
                match record.outcome {
                    OrderOutcome::Filled => info!(
                        order_id = %record.order_id,
                        fill_price = ?record.fill_price,
                        "Order filled"
                    ),
                    OrderOutcome::Pending => info!(order_id = %record.order_id, "Order accepted, pending"),
                    outcome => warn!(order_id = %record.order_id, outcome = %outcome, "Order not filled"),
                }
                Submission {
                    record,
                    error: None,
                }
            }
            Err(e @ Error::ExchangeRejected(_)) => {
                warn!(
                    pair = %order.pair,
                    side = %order.side,
                    qty = order.quantity,
                    price_hint = ?order.price,
                    error = %e,
                    "Order rejected by exchange"
                );
                Submission {
                    record: OrderRecord::for_order(order, OrderOutcome::Rejected),
                    error: Some(e),
                }
            }
            Err(e) => {
                error!(
                    pair = %order.pair,
                    side = %order.side,
                    retryable = e.is_retryable(),
                    error = %e,
                    "Order submission failed"
                );
                Submission {
                    record: OrderRecord::for_order(order, OrderOutcome::Error),
                    error: Some(e),
                }
            }
        }
    }

    /// Ask the exchange where a previously submitted order stands.
    pub async fn poll(&self, record: &OrderRecord) -> Result<OrderRecord> {
        let polled = self.client.poll_order(record).await;
        match &polled {
            Ok(r) => info!(order_id = %r.order_id, outcome = %r.outcome, "Order polled"),
            Err(e) => warn!(order_id = %record.order_id, error = %e, "Order poll failed"),
        }
        polled
    }
}
