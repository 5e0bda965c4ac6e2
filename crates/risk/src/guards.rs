use tracing::{debug, warn};

use common::{OrderOutcome, OrderRecord, OrderSide};

use crate::sizing::SkipReason;

/// An order has to beat the opposite side's average price by this factor,
/// enough to cover a round trip of exchange fees.
pub const PRICE_CHECK_MARGIN: f64 = 1.0005;

/// Count and quantity-weighted average price of filled orders on one side.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FillStats {
    pub count: usize,
    pub average_price: f64,
}

impl FillStats {
    /// Stats of the FILLED `side` orders of `pair` among `records`.
    pub fn of<'a>(
        records: impl IntoIterator<Item = &'a OrderRecord>,
        pair: &str,
        side: OrderSide,
    ) -> Self {
        let (count, quantity, notional) = records
            .into_iter()
            .filter(|r| r.pair == pair && r.side == side && r.outcome == OrderOutcome::Filled)
            .filter_map(|r| Some((r.executed_quantity(), r.fill_price?)))
            .fold((0, 0.0, 0.0), |(n, q, v), (qty, price)| {
                (n + 1, q + qty, v + qty * price)
            });
        let average_price = if quantity > 0.0 { notional / quantity } else { 0.0 };
        Self {
            count,
            average_price,
        }
    }
}

/// Account balances of the traded pair when an intent is checked.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Balances {
    pub base: f64,
    pub quote: f64,
}

#[derive(Debug, Clone)]
pub struct GuardConfig {
    pub buy_price_check: bool,
    pub sell_price_check: bool,
    /// Fewer opposite-side fills than this and the price check passes.
    pub min_orders: usize,
    pub max_base_balance: Option<f64>,
    pub min_quote_balance: Option<f64>,
    pub max_quote_balance: Option<f64>,
}

/// Last checks on a sized intent: buy low, sell high, and stay within the
/// account's balance limits.
#[derive(Debug, Clone)]
pub struct OrderGuards {
    config: GuardConfig,
}

impl OrderGuards {
    pub fn new(config: GuardConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    /// Any balance limit is set, so balances have to be read per intent.
    pub fn needs_balances(&self) -> bool {
        let c = &self.config;
        c.max_base_balance.is_some() || c.min_quote_balance.is_some() || c.max_quote_balance.is_some()
    }

    pub fn checks_price(&self, side: OrderSide) -> bool {
        match side {
            OrderSide::Buy => self.config.buy_price_check,
            OrderSide::Sell => self.config.sell_price_check,
        }
    }

    /// Hold off a BUY above the recent SELL average or a SELL below the
    /// recent BUY average. `opposite` are the stats of the other side.
    pub fn check_price(
        &self,
        side: OrderSide,
        price: f64,
        opposite: &FillStats,
    ) -> Result<(), SkipReason> {
        if !self.checks_price(side) || opposite.count == 0 || opposite.count < self.config.min_orders {
            return Ok(());
        }
        let reference = opposite.average_price * PRICE_CHECK_MARGIN;
        match side {
            OrderSide::Buy if price > reference => {
                warn!(price, reference, fills = opposite.count, "BUY held off: above recent sells");
                Err(SkipReason::PriceAboveRecentSells)
            }
            OrderSide::Sell if price < reference => {
                warn!(price, reference, fills = opposite.count, "SELL held off: below recent buys");
                Err(SkipReason::PriceBelowRecentBuys)
            }
            _ => {
                debug!(side = %side, price, reference, "Price check passed");
                Ok(())
            }
        }
    }

    /// Balance limits for an order of `quantity` at `price`.
    pub fn check_balances(
        &self,
        side: OrderSide,
        quantity: f64,
        price: f64,
        balances: Balances,
    ) -> Result<(), SkipReason> {
        let notional = quantity * price;
        let c = &self.config;
        match side {
            OrderSide::Buy => {
                if let Some(min) = c.min_quote_balance {
                    if balances.quote - notional < min {
                        warn!(quote = balances.quote, notional, min, "BUY skipped: minimum quote balance");
                        return Err(SkipReason::MinBalanceReached);
                    }
                }
                if let Some(max) = c.max_base_balance {
                    if balances.base + quantity > max {
                        warn!(base = balances.base, quantity, max, "BUY skipped: maximum base balance");
                        return Err(SkipReason::MaxBalanceReached);
                    }
                }
            }
            OrderSide::Sell => {
                if let Some(max) = c.max_quote_balance {
                    if balances.quote + notional > max {
                        warn!(quote = balances.quote, notional, max, "SELL skipped: maximum quote balance");
                        return Err(SkipReason::MaxBalanceReached);
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use common::Order;

    fn guards(min_orders: usize) -> OrderGuards {
        OrderGuards::new(GuardConfig {
            buy_price_check: true,
            sell_price_check: true,
            min_orders,
            max_base_balance: None,
            min_quote_balance: None,
            max_quote_balance: None,
        })
    }

    fn fill(pair: &str, side: OrderSide, quantity: f64, price: f64) -> OrderRecord {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let order = Order::market(pair, side, quantity, t);
        OrderRecord::for_order(&order, OrderOutcome::Pending).filled(price, t)
    }

    #[test]
    fn stats_weight_by_executed_quantity_and_skip_unfilled() {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let partial = OrderRecord::for_order(
            &Order::market("ETHUSDT", OrderSide::Sell, 10.0, t),
            OrderOutcome::Pending,
        )
        .partially_filled(1.0, 130.0, t);
        let rejected = OrderRecord::for_order(
            &Order::market("ETHUSDT", OrderSide::Sell, 1.0, t),
            OrderOutcome::Rejected,
        );
        let records = vec![
            fill("ETHUSDT", OrderSide::Sell, 3.0, 110.0),
            partial,
            rejected,
            fill("ETHUSDT", OrderSide::Buy, 1.0, 50.0),
            fill("BTCUSDT", OrderSide::Sell, 1.0, 9_000.0),
        ];
        let stats = FillStats::of(&records, "ETHUSDT", OrderSide::Sell);
        assert_eq!(stats.count, 2);
        assert!((stats.average_price - 115.0).abs() < 1e-9, "{stats:?}");
        assert_eq!(FillStats::of(&records, "XRPUSDT", OrderSide::Buy), FillStats::default());
    }

    #[test]
    fn buy_above_recent_sells_is_held_off() {
        let g = guards(2);
        let sells = FillStats { count: 2, average_price: 100.0 };
        assert_eq!(g.check_price(OrderSide::Buy, 100.1, &sells), Err(SkipReason::PriceAboveRecentSells));
        assert_eq!(g.check_price(OrderSide::Buy, 100.05, &sells), Ok(()));
        assert_eq!(g.check_price(OrderSide::Buy, 90.0, &sells), Ok(()));
    }

    #[test]
    fn sell_below_recent_buys_is_held_off() {
        let g = guards(2);
        let buys = FillStats { count: 3, average_price: 100.0 };
        assert_eq!(g.check_price(OrderSide::Sell, 100.0, &buys), Err(SkipReason::PriceBelowRecentBuys));
        assert_eq!(g.check_price(OrderSide::Sell, 101.0, &buys), Ok(()));
    }

    #[test]
    fn price_check_needs_enough_history_and_can_be_disabled() {
        let few = FillStats { count: 4, average_price: 100.0 };
        assert_eq!(guards(5).check_price(OrderSide::Buy, 200.0, &few), Ok(()));
        assert_eq!(guards(0).check_price(OrderSide::Buy, 200.0, &FillStats::default()), Ok(()));

        let mut config = guards(1).config().clone();
        config.buy_price_check = false;
        assert_eq!(OrderGuards::new(config).check_price(OrderSide::Buy, 200.0, &few), Ok(()));
    }

    #[test]
    fn balance_limits() {
        let g = OrderGuards::new(GuardConfig {
            min_quote_balance: Some(100.0),
            max_base_balance: Some(2.0),
            max_quote_balance: Some(1_000.0),
            ..guards(5).config().clone()
        });
        let balances = Balances { base: 1.0, quote: 500.0 };
        assert!(g.needs_balances());
        assert!(!guards(5).needs_balances());

        assert_eq!(g.check_balances(OrderSide::Buy, 0.5, 100.0, balances), Ok(()));
        assert_eq!(
            g.check_balances(OrderSide::Buy, 0.5, 900.0, balances),
            Err(SkipReason::MinBalanceReached)
        );
        assert_eq!(
            g.check_balances(OrderSide::Buy, 1.5, 10.0, balances),
            Err(SkipReason::MaxBalanceReached)
        );
        assert_eq!(g.check_balances(OrderSide::Sell, 1.0, 400.0, balances), Ok(()));
        assert_eq!(
            g.check_balances(OrderSide::Sell, 1.0, 600.0, balances),
            Err(SkipReason::MaxBalanceReached)
        );
    }
}
