pub mod query;
pub mod store;

pub use query::{PatternQuery, TimeRange};
pub use store::{FollowUps, HistoryStore, StoredPattern, StoredSignal};
