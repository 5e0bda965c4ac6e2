use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info};

use common::{
    Clock, Error, ExchangeClient, Holdings, Order, OrderOutcome, OrderRecord, OrderSide, Result,
    SystemClock, TradingPair,
};

/// How the simulated exchange answers a valid order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillMode {
    /// FILLED in the submit response.
    Immediate,
    /// PENDING on submit, FILLED on the n-th poll.
    AfterPolls(u32),
    /// PENDING forever.
    Never,
}

#[derive(Debug, Default)]
struct Book {
    quote_balance: f64,
    /// Base-asset holdings keyed by pair symbol.
    holdings: HashMap<String, f64>,
    /// Resting orders and the polls left before they fill (`None` = never).
    /// An order leaves the book on the poll that resolves it.
    open: HashMap<String, (Order, Option<u32>)>,
}

/// Simulated exchange client for paper trading.
///
/// Fills are simulated at the latest known price with configurable slippage
/// (limit orders fill at their limit price). Like Binance, the trading fee is
/// taken from what the account receives: base asset on BUY, quote on SELL.
/// No real orders are ever sent to Binance.
pub struct PaperClient {
    book: Arc<RwLock<Book>>,
    /// Latest known price per pair, updated via `update_price`.
    prices: Arc<RwLock<HashMap<String, f64>>>,
    /// Slippage in basis points applied to market fills.
    slippage_bps: f64,
    /// Smallest accepted quote notional, like Binance's MIN_NOTIONAL filter.
    min_notional: f64,
    fee_bps: f64,
    fill_mode: FillMode,
    clock: Arc<dyn Clock>,
}

impl PaperClient {
    pub fn new(initial_quote_balance: f64, slippage_bps: f64) -> Self {
        info!(
            balance = initial_quote_balance,
            slippage_bps = slippage_bps,
            "PaperClient initialized"
        );
        Self {
            book: Arc::new(RwLock::new(Book {
                quote_balance: initial_quote_balance,
                ..Book::default()
            })),
            prices: Arc::new(RwLock::new(HashMap::new())),
            slippage_bps,
            min_notional: 0.0,
            fee_bps: 0.0,
            fill_mode: FillMode::Immediate,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_min_notional(mut self, min_notional: f64) -> Self {
        self.min_notional = min_notional;
        self
    }

    pub fn with_fee_bps(mut self, fee_bps: f64) -> Self {
        self.fee_bps = fee_bps;
        self
    }

    pub fn with_fill_mode(mut self, fill_mode: FillMode) -> Self {
        self.fill_mode = fill_mode;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Seed base-asset holdings, e.g. to start the simulation LONG.
    pub async fn set_holdings(&self, pair: &str, quantity: f64) {
        self.book
            .write()
            .await
            .holdings
            .insert(pair.to_string(), quantity);
    }

    /// Update the latest price for a pair (called for every closed candle).
    pub async fn update_price(&self, pair: &str, price: f64) {
        self.prices.write().await.insert(pair.to_string(), price);
    }

    async fn price(&self, pair: &str) -> Result<f64> {
        self.prices.read().await.get(pair).copied().ok_or_else(|| {
            Error::Connectivity(format!(
                "PaperClient has no price for pair '{pair}'. Ensure candles are flowing."
            ))
        })
    }

    fn fill_price(&self, order: &Order, market: f64) -> f64 {
        match (order.price, order.side) {
            (Some(limit), _) => limit,
            // Buys pay more, sells receive less
            (None, OrderSide::Buy) => market * (1.0 + self.slippage_bps / 10_000.0),
            (None, OrderSide::Sell) => market * (1.0 - self.slippage_bps / 10_000.0),
        }
    }

    /// Exchange-side validation of an order at `price`.
    fn check(book: &Book, order: &Order, price: f64, min_notional: f64) -> Result<()> {
        if !(order.quantity > 0.0) {
            return Err(Error::ExchangeRejected("quantity must be positive".into()));
        }
        let notional = order.quantity * price;
        if notional < min_notional {
            return Err(Error::ExchangeRejected(format!(
                "MIN_NOTIONAL: {notional:.4} < {min_notional}"
            )));
        }
        match order.side {
            OrderSide::Buy if notional > book.quote_balance + 1e-9 => Err(Error::ExchangeRejected(
                format!("insufficient balance: need {notional:.4}, have {:.4}", book.quote_balance),
            )),
            OrderSide::Sell => {
                let held = book.holdings.get(&order.pair).copied().unwrap_or(0.0);
                if order.quantity > held + 1e-12 {
                    Err(Error::ExchangeRejected(format!(
                        "insufficient balance: sell {} > held {held}",
                        order.quantity
                    )))
                } else {
                    Ok(())
                }
            }
            OrderSide::Buy => Ok(()),
        }
    }

    /// Move balances for a fill and produce the FILLED record.
    fn apply_fill(&self, book: &mut Book, order: &Order, fill_price: f64) -> OrderRecord {
        let notional = order.quantity * fill_price;
        let kept = 1.0 - self.fee_bps / 10_000.0;
        let held = book.holdings.entry(order.pair.clone()).or_insert(0.0);
        match order.side {
            OrderSide::Buy => {
                book.quote_balance -= notional;
                *held += order.quantity * kept;
            }
            OrderSide::Sell => {
                book.quote_balance += notional * kept;
                *held = (*held - order.quantity).max(0.0);
            }
        }
        debug!(
            pair = %order.pair,
            side = %order.side,
            fill = fill_price,
            qty = order.quantity,
            balance = book.quote_balance,
            "Paper fill simulated"
        );
        OrderRecord::for_order(order, OrderOutcome::Pending).filled(fill_price, self.clock.now())
    }
}

#[async_trait]
impl ExchangeClient for PaperClient {
    async fn submit_order(&self, order: &Order) -> Result<OrderRecord> {
        let market = self.price(&order.pair).await?;
        let fill_price = self.fill_price(order, market);

        let mut book = self.book.write().await;
        Self::check(&book, order, fill_price, self.min_notional)?;

        let polls_left = match self.fill_mode {
            FillMode::Immediate => return Ok(self.apply_fill(&mut book, order, fill_price)),
            FillMode::AfterPolls(n) => Some(n.max(1)),
            FillMode::Never => None,
        };
        book.open.insert(order.id.clone(), (order.clone(), polls_left));
        debug!(order_id = %order.id, "Paper order resting");
        Ok(OrderRecord::for_order(order, OrderOutcome::Pending))
    }

    async fn poll_order(&self, record: &OrderRecord) -> Result<OrderRecord> {
        let market = self.price(&record.pair).await?;
        let mut book = self.book.write().await;

        let Some((order, polls_left)) = book.open.get_mut(&record.order_id) else {
            return Err(Error::ExchangeRejected(format!(
                "unknown order {}",
                record.order_id
            )));
        };

        match polls_left {
            Some(n) if *n > 1 => {
                *n -= 1;
                Ok(OrderRecord::for_order(order, OrderOutcome::Pending))
            }
            Some(_) => {
                let order = order.clone();
                book.open.remove(&order.id);
                let fill_price = self.fill_price(&order, market);
                match Self::check(&book, &order, fill_price, self.min_notional) {
                    Ok(()) => Ok(self.apply_fill(&mut book, &order, fill_price)),
                    Err(e) => {
                        debug!(order_id = %order.id, error = %e, "Resting paper order rejected at fill time");
                        Ok(OrderRecord::for_order(&order, OrderOutcome::Rejected))
                    }
                }
            }
            None => Ok(OrderRecord::for_order(order, OrderOutcome::Pending)),
        }
    }

    async fn current_holdings(&self, pair: &TradingPair) -> Result<Holdings> {
        let quantity = self
            .book
            .read()
            .await
            .holdings
            .get(&pair.symbol())
            .copied()
            .unwrap_or(0.0);
        Ok(Holdings::from_quantity(quantity, 0.0))
    }

    async fn quote_balance(&self, _pair: &TradingPair) -> Result<f64> {
        Ok(self.book.read().await.quote_balance)
    }
}
