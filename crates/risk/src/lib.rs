pub mod guards;
pub mod sizing;

pub use guards::{Balances, FillStats, GuardConfig, OrderGuards, PRICE_CHECK_MARGIN};
pub use sizing::{OrderSizer, SizingConfig, SkipReason};
