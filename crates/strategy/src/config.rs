use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use common::{Error, Result, TradingPair};

use crate::recognizers::RecognizerSet;

/// Engine parameters file (TOML).
///
/// Example `config/engine.toml`:
/// ```toml
/// [market]
/// base = "ETH"
/// quote = "USDT"
/// interval = "5m"
/// window_size = 30
///
/// [decision]
/// policy = "threshold_vote"
/// buy_threshold = 0.5
/// sell_threshold = 0.5
///
/// [decision.weights]
/// engulfing = 1.5
///
/// [recognizers]
/// enabled = ["engulfing", "hammer", "trend"]
///
/// [orders]
/// order_type = "market"
/// quantity = 0.05
/// lot_step = 0.0001
/// pending_timeout_secs = 600
///
/// [guards]
/// price_check_min_orders = 5
/// min_quote_balance = 50.0
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineFileConfig {
    pub market: MarketConfig,
    #[serde(default)]
    pub decision: DecisionConfig,
    #[serde(default)]
    pub recognizers: RecognizersConfig,
    pub orders: OrdersConfig,
    #[serde(default)]
    pub guards: GuardsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MarketConfig {
    pub base: String,
    pub quote: String,
    /// Exchange kline interval, e.g. "1m", "5m", "1h".
    pub interval: String,
    /// Candles kept in the rolling window (N).
    pub window_size: usize,
}

impl MarketConfig {
    pub fn pair(&self) -> TradingPair {
        TradingPair::new(&self.base, &self.quote)
    }

    pub fn interval_duration(&self) -> Result<Duration> {
        parse_interval(&self.interval)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DecisionConfig {
    /// "threshold_vote" or "first_strong".
    #[serde(default = "default_policy")]
    pub policy: String,
    #[serde(default = "default_threshold")]
    pub buy_threshold: f64,
    #[serde(default = "default_threshold")]
    pub sell_threshold: f64,
    /// Used by "first_strong" only.
    #[serde(default = "default_min_strength")]
    pub min_strength: f64,
    /// Per-pattern weight; patterns not listed weigh 1.0.
    #[serde(default)]
    pub weights: HashMap<String, f64>,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            policy: default_policy(),
            buy_threshold: default_threshold(),
            sell_threshold: default_threshold(),
            min_strength: default_min_strength(),
            weights: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RecognizersConfig {
    pub enabled: Vec<String>,
}

impl Default for RecognizersConfig {
    fn default() -> Self {
        Self {
            enabled: RecognizerSet::candlestick()
                .names()
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Market,
    /// Limit order priced at the last close.
    Limit,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OrdersConfig {
    #[serde(default = "default_order_type")]
    pub order_type: OrderType,
    /// BUY quantity in base asset units.
    pub quantity: f64,
    /// Exchange lot size; quantities are rounded down to a multiple of it.
    #[serde(default)]
    pub lot_step: f64,
    /// Holdings below this count as dust (FLAT).
    #[serde(default)]
    pub min_quantity: f64,
    /// Optional cap on the quote notional of a BUY.
    #[serde(default)]
    pub max_notional: Option<f64>,
    #[serde(default = "default_pending_timeout")]
    pub pending_timeout_secs: u64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

impl OrdersConfig {
    pub fn pending_timeout(&self) -> Result<chrono::Duration> {
        i64::try_from(self.pending_timeout_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .ok_or_else(|| {
                Error::Config(format!(
                    "orders.pending_timeout_secs {} is out of range",
                    self.pending_timeout_secs
                ))
            })
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

/// Extra conditions an intent must pass before it is sent.
///
/// The price check compares the order price with the quantity-weighted
/// average fill price of recent orders on the opposite side: a BUY above the
/// SELL average, or a SELL below the BUY average (each plus a 0.05% margin),
/// is held off once there are at least `price_check_min_orders` such fills.
/// Balance limits are unset by default.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GuardsConfig {
    pub buy_price_check: bool,
    pub sell_price_check: bool,
    pub price_check_min_orders: usize,
    /// Only fills this recent count; unset means the whole history.
    pub price_check_days: Option<u64>,
    /// Base asset kept in the account and never counted as the position.
    pub min_base_balance: Option<f64>,
    /// BUY is skipped if the base balance would exceed this.
    pub max_base_balance: Option<f64>,
    /// BUY is skipped if it would leave less quote asset than this.
    pub min_quote_balance: Option<f64>,
    /// SELL is skipped if the quote balance would exceed this.
    pub max_quote_balance: Option<f64>,
}

impl Default for GuardsConfig {
    fn default() -> Self {
        Self {
            buy_price_check: true,
            sell_price_check: true,
            price_check_min_orders: 5,
            price_check_days: None,
            min_base_balance: None,
            max_base_balance: None,
            min_quote_balance: None,
            max_quote_balance: None,
        }
    }
}

impl GuardsConfig {
    /// Upper bound on `price_check_days`.
    pub const MAX_PRICE_CHECK_DAYS: u64 = 36_500;

    pub fn price_check_window(&self) -> Option<chrono::Duration> {
        self.price_check_days
            .map(|days| chrono::Duration::days(days.min(Self::MAX_PRICE_CHECK_DAYS) as i64))
    }

    fn validate(&self) -> Result<()> {
        let limits = [
            ("min_base_balance", self.min_base_balance),
            ("max_base_balance", self.max_base_balance),
            ("min_quote_balance", self.min_quote_balance),
            ("max_quote_balance", self.max_quote_balance),
        ];
        for (name, limit) in limits {
            if limit.is_some_and(|v| !(v >= 0.0 && v.is_finite())) {
                return Err(Error::Config(format!("guards.{name} must be a finite value >= 0")));
            }
        }
        if self.price_check_days == Some(0)
            || self.price_check_days.is_some_and(|d| d > Self::MAX_PRICE_CHECK_DAYS)
        {
            return Err(Error::Config(format!(
                "guards.price_check_days must be between 1 and {}",
                Self::MAX_PRICE_CHECK_DAYS
            )));
        }
        Ok(())
    }
}

fn default_policy() -> String {
    "threshold_vote".to_string()
}
fn default_threshold() -> f64 {
    0.5
}
fn default_min_strength() -> f64 {
    1.0
}
fn default_order_type() -> OrderType {
    OrderType::Market
}
fn default_pending_timeout() -> u64 {
    600
}
fn default_poll_interval() -> u64 {
    10
}

impl EngineFileConfig {
    /// Read, parse and validate the file.
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read engine config at '{path}': {e}")))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let cfg: Self = toml::from_str(content)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.market.base.trim().is_empty() || self.market.quote.trim().is_empty() {
            return Err(Error::Config("market.base and market.quote are required".into()));
        }
        if self.market.window_size == 0 {
            return Err(Error::Config("market.window_size must be > 0".into()));
        }
        self.market.interval_duration()?;

        let set = RecognizerSet::from_names(&self.recognizers.enabled)?;
        if set.required_bars() > self.market.window_size {
            return Err(Error::Config(format!(
                "market.window_size {} is smaller than the {} candles the enabled recognizers need",
                self.market.window_size,
                set.required_bars()
            )));
        }
        crate::policy::build_policy(&self.decision)?;

        let o = &self.orders;
        if !(o.quantity > 0.0) {
            return Err(Error::Config("orders.quantity must be > 0".into()));
        }
        if o.lot_step < 0.0 || o.min_quantity < 0.0 {
            return Err(Error::Config("orders.lot_step and orders.min_quantity must be >= 0".into()));
        }
        if o.pending_timeout_secs == 0 || o.poll_interval_secs == 0 {
            return Err(Error::Config(
                "orders.pending_timeout_secs and orders.poll_interval_secs must be > 0".into(),
            ));
        }
        o.pending_timeout()?;
        self.guards.validate()
    }
}

/// Parse an exchange interval string ("1m", "15m", "4h", "1d").
pub fn parse_interval(interval: &str) -> Result<Duration> {
    let bad = || Error::Config(format!("invalid candle interval '{interval}'"));
    let (split, _) = interval.char_indices().last().ok_or_else(bad)?;
    let (count, unit) = interval.split_at(split);
    let count: u64 = count.parse().map_err(|_| bad())?;
    let unit_secs: u64 = match unit {
        "m" => 60,
        "h" => 3_600,
        "d" => 86_400,
        "w" => 604_800,
        _ => return Err(bad()),
    };
    if count == 0 {
        return Err(bad());
    }
    let secs = count.checked_mul(unit_secs).ok_or_else(bad)?;
    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [market]
        base = "eth"
        quote = "usdt"
        interval = "5m"
        window_size = 20

        [decision]
        buy_threshold = 0.75

        [decision.weights]
        engulfing = 2.0

        [recognizers]
        enabled = ["engulfing", "trend"]

        [orders]
        quantity = 0.05
        lot_step = 0.001
    "#;

    #[test]
    fn shipped_config_is_valid() {
        let cfg = EngineFileConfig::parse(include_str!("../../../config/engine.toml")).unwrap();
        assert_eq!(cfg.recognizers.enabled.len(), 19);
        assert_eq!(cfg.orders.max_notional, Some(500.0));
        assert_eq!(cfg.guards.price_check_days, Some(30));
    }

    #[test]
    fn parses_with_defaults() {
        let cfg = EngineFileConfig::parse(SAMPLE).unwrap();
        assert_eq!(cfg.market.pair().symbol(), "ETHUSDT");
        assert_eq!(cfg.market.interval_duration().unwrap(), Duration::from_secs(300));
        assert_eq!(cfg.decision.policy, "threshold_vote");
        assert_eq!(cfg.decision.buy_threshold, 0.75);
        assert_eq!(cfg.decision.sell_threshold, 0.5);
        assert_eq!(cfg.decision.weights["engulfing"], 2.0);
        assert_eq!(cfg.orders.order_type, OrderType::Market);
        assert_eq!(cfg.orders.pending_timeout_secs, 600);
    }

    #[test]
    fn unknown_recognizer_rejected() {
        let toml = SAMPLE.replace("\"trend\"", "\"head_and_shoulders\"");
        assert!(matches!(EngineFileConfig::parse(&toml), Err(Error::Config(_))));
    }

    #[test]
    fn window_too_small_for_recognizers_rejected() {
        let toml = SAMPLE.replace("window_size = 20", "window_size = 4");
        assert!(EngineFileConfig::parse(&toml).is_err());
    }

    #[test]
    fn unknown_policy_rejected() {
        let toml = SAMPLE.replace("buy_threshold = 0.75", "policy = \"coin_flip\"");
        assert!(EngineFileConfig::parse(&toml).is_err());
    }

    #[test]
    fn default_recognizers_are_the_candlestick_library() {
        let toml = SAMPLE.replace("enabled = [\"engulfing\", \"trend\"]", "");
        let cfg = EngineFileConfig::parse(&toml).unwrap();
        assert_eq!(cfg.recognizers.enabled.len(), 18);
    }

    #[test]
    fn interval_parsing() {
        assert_eq!(parse_interval("1m").unwrap(), Duration::from_secs(60));
        assert_eq!(parse_interval("4h").unwrap(), Duration::from_secs(14_400));
        assert!(parse_interval("").is_err());
        assert!(parse_interval("0m").is_err());
        assert!(parse_interval("5x").is_err());
        assert!(parse_interval("18446744073709551615w").is_err());
    }

    #[test]
    fn huge_pending_timeout_is_a_config_error() {
        let toml = SAMPLE.replace("lot_step = 0.001", "lot_step = 0.001\npending_timeout_secs = 9223372036854775807");
        assert!(matches!(EngineFileConfig::parse(&toml), Err(Error::Config(_))));

        let cfg = EngineFileConfig::parse(SAMPLE).unwrap();
        assert_eq!(cfg.orders.pending_timeout().unwrap(), chrono::Duration::seconds(600));
    }

    #[test]
    fn guards_default_to_price_checks_without_balance_limits() {
        let cfg = EngineFileConfig::parse(SAMPLE).unwrap();
        assert!(cfg.guards.buy_price_check && cfg.guards.sell_price_check);
        assert_eq!(cfg.guards.price_check_min_orders, 5);
        assert!(cfg.guards.price_check_window().is_none());
        assert!(cfg.guards.min_quote_balance.is_none());

        let toml = format!("{SAMPLE}\n[guards]\nprice_check_days = 7\nmin_quote_balance = 25.0\n");
        let cfg = EngineFileConfig::parse(&toml).unwrap();
        assert_eq!(cfg.guards.price_check_window(), Some(chrono::Duration::days(7)));
        assert_eq!(cfg.guards.min_quote_balance, Some(25.0));

        let negative = format!("{SAMPLE}\n[guards]\nmax_base_balance = -1.0\n");
        assert!(EngineFileConfig::parse(&negative).is_err());
    }
}
