use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A closed OHLCV bar. Immutable once built; the forming candle of the
/// current interval is never represented by this type.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// Absolute size of the real body.
    pub fn body(&self) -> f64 {
        (self.close - self.open).abs()
    }

    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    pub fn upper_shadow(&self) -> f64 {
        self.high - self.open.max(self.close)
    }

    pub fn lower_shadow(&self) -> f64 {
        self.open.min(self.close) - self.low
    }

    pub fn body_top(&self) -> f64 {
        self.open.max(self.close)
    }

    pub fn body_bottom(&self) -> f64 {
        self.open.min(self.close)
    }

    pub fn midpoint(&self) -> f64 {
        (self.open + self.close) / 2.0
    }

    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }
}

/// A base/quote pair as configured, e.g. ETH/USDT → symbol `ETHUSDT`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TradingPair {
    pub base: String,
    pub quote: String,
}

impl TradingPair {
    pub fn new(base: impl Into<String>, quote: impl Into<String>) -> Self {
        Self {
            base: base.into().to_uppercase(),
            quote: quote.into().to_uppercase(),
        }
    }

    /// Exchange symbol: base followed by quote.
    pub fn symbol(&self) -> String {
        format!("{}{}", self.base, self.quote)
    }
}

impl std::fmt::Display for TradingPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

/// Score of one named pattern on one evaluated candle.
///
/// Positive strength is bullish, negative bearish, zero neutral. The
/// magnitude is the recognizer's confidence and is always within [-1, 1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternMatch {
    pub candle_time: DateTime<Utc>,
    pub pattern_name: String,
    pub strength: f64,
}

impl PatternMatch {
    /// Build a match, clamping strength into [-1, 1]. NaN collapses to neutral.
    pub fn new(candle_time: DateTime<Utc>, pattern_name: impl Into<String>, strength: f64) -> Self {
        let strength = if strength.is_nan() {
            0.0
        } else {
            strength.clamp(-1.0, 1.0)
        };
        Self {
            candle_time,
            pattern_name: pattern_name.into(),
            strength,
        }
    }

    pub fn is_neutral(&self) -> bool {
        self.strength == 0.0
    }
}

/// Decision taken for one evaluation cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(type_name = "TEXT", rename_all = "UPPERCASE")]
pub enum Action {
    Buy,
    Sell,
    Hold,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Buy => write!(f, "BUY"),
            Action::Sell => write!(f, "SELL"),
            Action::Hold => write!(f, "HOLD"),
        }
    }
}

/// The engine's derived trade decision for one candle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub candle_time: DateTime<Utc>,
    pub action: Action,
    /// Non-neutral matches the policy looked at, in the order it saw them.
    pub contributing_patterns: Vec<PatternMatch>,
    pub rationale: String,
}

impl Signal {
    pub fn hold(candle_time: DateTime<Utc>, rationale: impl Into<String>) -> Self {
        Self {
            candle_time,
            action: Action::Hold,
            contributing_patterns: Vec::new(),
            rationale: rationale.into(),
        }
    }
}

/// Side of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(type_name = "TEXT", rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// An order intent handed to the exchange client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Client-side order id, also used as the exchange's client order id.
    pub id: String,
    pub pair: String,
    pub side: OrderSide,
    pub quantity: f64,
    /// `None` = market order; `Some(price)` = limit order at that price.
    pub price: Option<f64>,
    pub intent_time: DateTime<Utc>,
}

impl Order {
    pub fn market(
        pair: impl Into<String>,
        side: OrderSide,
        quantity: f64,
        intent_time: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            pair: pair.into(),
            side,
            quantity,
            price: None,
            intent_time,
        }
    }

    pub fn limit(
        pair: impl Into<String>,
        side: OrderSide,
        quantity: f64,
        price: f64,
        intent_time: DateTime<Utc>,
    ) -> Self {
        Self {
            price: Some(price),
            ..Self::market(pair, side, quantity, intent_time)
        }
    }
}

/// How a submitted order ended up (or where it currently stands).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(type_name = "TEXT", rename_all = "UPPERCASE")]
pub enum OrderOutcome {
    Filled,
    Rejected,
    Pending,
    Error,
}

impl OrderOutcome {
    pub fn is_final(&self) -> bool {
        !matches!(self, OrderOutcome::Pending)
    }
}

impl std::fmt::Display for OrderOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderOutcome::Filled => write!(f, "FILLED"),
            OrderOutcome::Rejected => write!(f, "REJECTED"),
            OrderOutcome::Pending => write!(f, "PENDING"),
            OrderOutcome::Error => write!(f, "ERROR"),
        }
    }
}

/// Audit record of one submitted intent.
///
/// Created with whatever outcome the submission produced. A `Pending` record
/// is resolved exactly once; everything else about it is append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub order_id: String,
    pub pair: String,
    pub intent_time: DateTime<Utc>,
    pub side: OrderSide,
    pub requested_quantity: f64,
    pub price_hint: Option<f64>,
    pub outcome: OrderOutcome,
    pub fill_price: Option<f64>,
    pub fill_time: Option<DateTime<Utc>>,
    /// Base quantity the exchange actually executed. May be less than
    /// requested for partial fills.
    pub filled_quantity: Option<f64>,
}

impl OrderRecord {
    /// A record for `order` with the given outcome and no fill details.
    pub fn for_order(order: &Order, outcome: OrderOutcome) -> Self {
        Self {
            order_id: order.id.clone(),
            pair: order.pair.clone(),
            intent_time: order.intent_time,
            side: order.side,
            requested_quantity: order.quantity,
            price_hint: order.price,
            outcome,
            fill_price: None,
            fill_time: None,
            filled_quantity: None,
        }
    }

    /// Mark the whole requested quantity as filled.
    pub fn filled(self, fill_price: f64, fill_time: DateTime<Utc>) -> Self {
        let quantity = self.requested_quantity;
        self.partially_filled(quantity, fill_price, fill_time)
    }

    pub fn partially_filled(mut self, quantity: f64, fill_price: f64, fill_time: DateTime<Utc>) -> Self {
        self.outcome = OrderOutcome::Filled;
        self.fill_price = Some(fill_price);
        self.fill_time = Some(fill_time);
        self.filled_quantity = Some(quantity);
        self
    }

    /// Executed quantity, falling back to the requested one for records
    /// that predate execution tracking.
    pub fn executed_quantity(&self) -> f64 {
        self.filled_quantity.unwrap_or(self.requested_quantity)
    }
}

/// Whether the account holds the base asset of the traded pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(type_name = "TEXT", rename_all = "UPPERCASE")]
pub enum PositionState {
    Flat,
    Long,
}

impl std::fmt::Display for PositionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PositionState::Flat => write!(f, "FLAT"),
            PositionState::Long => write!(f, "LONG"),
        }
    }
}

/// The single position held for the traded pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub pair: String,
    pub state: PositionState,
    /// Zero when flat or when the entry is unknown (e.g. adopted at startup).
    pub entry_price: f64,
    pub entry_time: Option<DateTime<Utc>>,
    pub quantity: f64,
}

impl Position {
    pub fn flat(pair: impl Into<String>) -> Self {
        Self {
            pair: pair.into(),
            state: PositionState::Flat,
            entry_price: 0.0,
            entry_time: None,
            quantity: 0.0,
        }
    }

    pub fn long(
        pair: impl Into<String>,
        entry_price: f64,
        entry_time: Option<DateTime<Utc>>,
        quantity: f64,
    ) -> Self {
        Self {
            pair: pair.into(),
            state: PositionState::Long,
            entry_price,
            entry_time,
            quantity,
        }
    }

    pub fn is_long(&self) -> bool {
        self.state == PositionState::Long
    }
}

/// Account holdings of the pair's base asset, as reported by the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Holdings {
    pub state: PositionState,
    pub quantity: f64,
}

impl Holdings {
    /// Classify a raw base-asset balance; anything below `min_quantity` is dust.
    pub fn from_quantity(quantity: f64, min_quantity: f64) -> Self {
        let state = if quantity > 0.0 && quantity >= min_quantity {
            PositionState::Long
        } else {
            PositionState::Flat
        };
        Self { state, quantity }
    }
}

/// Whether the bot is running against the real exchange or simulating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
pub enum TradingMode {
    Live,
    Paper,
}

impl std::fmt::Display for TradingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradingMode::Live => write!(f, "live"),
            TradingMode::Paper => write!(f, "paper"),
        }
    }
}

/// Current state of the trading engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    #[default]
    Stopped,
    Running,
    /// Cycles still run and are recorded, but no intents are emitted.
    Paused,
    /// An unresolved order timed out; intents stay blocked until `Resume`.
    Halted,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineState::Stopped => write!(f, "stopped"),
            EngineState::Running => write!(f, "running"),
            EngineState::Paused => write!(f, "paused"),
            EngineState::Halted => write!(f, "halted"),
        }
    }
}

/// Commands sent to the engine via the command channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineCommand {
    Pause,
    /// Leave `Paused` or `Halted`. Leaving `Halted` re-reads account holdings.
    Resume,
}

/// Events that need a human's attention.
#[derive(Debug, Clone, PartialEq)]
pub enum OperatorAlert {
    OrderRejected {
        pair: String,
        side: OrderSide,
        quantity: f64,
        price_hint: Option<f64>,
        reason: String,
    },
    OrderFailed {
        pair: String,
        side: OrderSide,
        error: String,
    },
    OrderFilled {
        pair: String,
        side: OrderSide,
        quantity: f64,
        fill_price: f64,
    },
    PendingTimedOut {
        pair: String,
        order_id: String,
        side: OrderSide,
    },
    PositionReconciled {
        pair: String,
        state: PositionState,
        quantity: f64,
    },
    /// Found at startup: more PENDING orders than can be tracked.
    PendingOrdersUnresolved {
        pair: String,
        order_ids: Vec<String>,
    },
}

impl std::fmt::Display for OperatorAlert {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperatorAlert::OrderRejected {
                pair,
                side,
                quantity,
                price_hint,
                reason,
            } => match price_hint {
                Some(price) => write!(
                    f,
                    "{side} {quantity} {pair} @ {price} rejected by exchange: {reason}"
                ),
                None => write!(f, "{side} {quantity} {pair} rejected by exchange: {reason}"),
            },
            OperatorAlert::OrderFailed { pair, side, error } => {
                write!(f, "{side} order on {pair} failed: {error}")
            }
            OperatorAlert::OrderFilled {
                pair,
                side,
                quantity,
                fill_price,
            } => write!(f, "{side} {quantity} {pair} filled at {fill_price}"),
            OperatorAlert::PendingTimedOut {
                pair,
                order_id,
                side,
            } => write!(
                f,
                "{side} order {order_id} on {pair} still unresolved after timeout. \
                 Trading halted; check the exchange and /resume."
            ),
            OperatorAlert::PositionReconciled {
                pair,
                state,
                quantity,
            } => write!(f, "{pair} position reconciled: {state} ({quantity})"),
            OperatorAlert::PendingOrdersUnresolved { pair, order_ids } => write!(
                f,
                "{} orders on {pair} were still pending at startup ({}). \
                 Trading halted; check the exchange and /resume.",
                order_ids.len(),
                order_ids.join(", ")
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn pattern_match_clamps_strength() {
        assert_eq!(PatternMatch::new(ts(), "x", 3.0).strength, 1.0);
        assert_eq!(PatternMatch::new(ts(), "x", -2.5).strength, -1.0);
        assert!(PatternMatch::new(ts(), "x", f64::NAN).is_neutral());
    }

    #[test]
    fn candle_geometry() {
        let c = Candle {
            open_time: ts(),
            open: 10.0,
            high: 12.0,
            low: 7.0,
            close: 11.0,
            volume: 1.0,
        };
        assert_eq!(c.body(), 1.0);
        assert_eq!(c.range(), 5.0);
        assert_eq!(c.upper_shadow(), 1.0);
        assert_eq!(c.lower_shadow(), 3.0);
        assert!(c.is_bullish());
    }

    #[test]
    fn holdings_below_minimum_are_flat() {
        assert_eq!(Holdings::from_quantity(0.0001, 0.001).state, PositionState::Flat);
        assert_eq!(Holdings::from_quantity(0.5, 0.001).state, PositionState::Long);
        assert_eq!(Holdings::from_quantity(0.0, 0.0).state, PositionState::Flat);
    }

    #[test]
    fn executed_quantity_prefers_the_fill() {
        let order = Order::market("ETHUSDT", OrderSide::Buy, 0.5, ts());
        let pending = OrderRecord::for_order(&order, OrderOutcome::Pending);
        assert_eq!(pending.executed_quantity(), 0.5);
        assert_eq!(pending.clone().filled(10.0, ts()).filled_quantity, Some(0.5));

        let partial = pending.partially_filled(0.2, 10.0, ts());
        assert_eq!(partial.outcome, OrderOutcome::Filled);
        assert_eq!(partial.executed_quantity(), 0.2);
    }

    #[test]
    fn trading_pair_symbol() {
        let pair = TradingPair::new("eth", "usdt");
        assert_eq!(pair.symbol(), "ETHUSDT");
        assert_eq!(pair.to_string(), "ETH/USDT");
    }
}
