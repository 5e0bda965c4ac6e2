pub mod binance;
pub mod executor;
pub mod lifecycle;
pub mod position;

pub use binance::{BinanceClient, BinanceStream};
pub use executor::{OrderExecutor, Submission};
pub use lifecycle::{CycleOutcome, Engine, EngineHandle};
pub use position::{PendingOrder, PendingPhase, PositionMachine, Transition};
