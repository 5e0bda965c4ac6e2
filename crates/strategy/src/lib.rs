pub mod config;
pub mod indicators;
pub mod policy;
pub mod recognizers;
pub mod window;

pub use config::{EngineFileConfig, GuardsConfig, OrderType};
pub use policy::{build_policy, DecisionPolicy, FirstStrong, ThresholdVote};
pub use recognizers::{RecognizerSet, TrendValidator};
pub use window::CandleWindow;
