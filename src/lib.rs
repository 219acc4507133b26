// Core modules
pub mod api;
pub mod candles;
pub mod config;
pub mod error;
pub mod execution;
pub mod indicators;
pub mod models;
pub mod strategy;
pub mod trader;

// Re-export commonly used types
pub use api::*;
pub use error::EngineError;
pub use models::*;
pub use trader::{TickSummary, Trader};

// Error handling
pub type Result<T> = std::result::Result<T, EngineError>;
