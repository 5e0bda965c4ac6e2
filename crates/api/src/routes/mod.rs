mod health;
mod history;

pub use health::health_router;
pub use history::history_router;
