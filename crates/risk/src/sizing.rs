use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use common::OrderSide;

/// Order sizing parameters, in base asset units unless noted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizingConfig {
    /// Quantity bought on each BUY intent.
    pub quantity: f64,
    /// Exchange lot size. Zero disables rounding.
    pub lot_step: f64,
    /// Smallest quantity worth sending; below it an intent is skipped.
    pub min_quantity: f64,
    /// Upper bound on the quote notional of a BUY (quantity x price).
    pub max_notional: Option<f64>,
}

/// Why no order was sized for an intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// SELL with nothing (or only dust) held.
    NothingHeld,
    /// Rounded quantity fell below `min_quantity` or to zero.
    BelowMinimum,
    /// BUY notional above `max_notional`.
    ExposureLimitExceeded,
    /// BUY priced above the average of recent SELL fills.
    PriceAboveRecentSells,
    /// SELL priced below the average of recent BUY fills.
    PriceBelowRecentBuys,
    /// The order would take a balance below its configured minimum.
    MinBalanceReached,
    /// The order would take a balance above its configured maximum.
    MaxBalanceReached,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::NothingHeld => write!(f, "nothing held to sell"),
            SkipReason::BelowMinimum => write!(f, "quantity below exchange minimum"),
            SkipReason::ExposureLimitExceeded => write!(f, "notional above per-trade limit"),
            SkipReason::PriceAboveRecentSells => write!(f, "price high compared to recent sells"),
            SkipReason::PriceBelowRecentBuys => write!(f, "price low compared to recent buys"),
            SkipReason::MinBalanceReached => write!(f, "minimum balance limit reached"),
            SkipReason::MaxBalanceReached => write!(f, "maximum balance limit reached"),
        }
    }
}

/// Turns a BUY/SELL intent into an exchange-valid quantity.
///
/// BUY uses the configured quantity; SELL liquidates what is held. Both are
/// rounded down to the lot step so the exchange never sees a fractional lot.
#[derive(Debug, Clone)]
pub struct OrderSizer {
    config: SizingConfig,
}

impl OrderSizer {
    pub fn new(config: SizingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SizingConfig {
        &self.config
    }

    /// Round `quantity` down to a whole number of lots.
    pub fn round_to_lot(&self, quantity: f64) -> f64 {
        let step = self.config.lot_step;
        if step <= 0.0 || !quantity.is_finite() || quantity <= 0.0 {
            return quantity.max(0.0);
        }
        // Nudge before flooring so 0.3 / 0.1 = 2.9999.. still counts 3 lots.
        let lots = (quantity / step + 1e-9).floor();
        lots * step
    }

    /// Size an intent. `held` is the current base holdings, `price` the last
    /// close (used only for the notional limit).
    pub fn size(&self, side: OrderSide, held: f64, price: f64) -> Result<f64, SkipReason> {
        let raw = match side {
            OrderSide::Buy => self.config.quantity,
            OrderSide::Sell => {
                if held <= 0.0 {
                    warn!(side = %side, "Nothing held; skipping SELL");
                    return Err(SkipReason::NothingHeld);
                }
                held
            }
        };

        let quantity = self.round_to_lot(raw);
        if quantity <= 0.0 || quantity < self.config.min_quantity {
            warn!(side = %side, raw, quantity, min = self.config.min_quantity, "Order size below minimum");
            return Err(SkipReason::BelowMinimum);
        }

        if side == OrderSide::Buy {
            if let Some(limit) = self.config.max_notional {
                let notional = quantity * price;
                if price > 0.0 && notional > limit {
                    warn!(notional, limit, "BUY notional above per-trade limit");
                    return Err(SkipReason::ExposureLimitExceeded);
                }
            }
        }

        debug!(side = %side, quantity, "Order sized");
        Ok(quantity)
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
