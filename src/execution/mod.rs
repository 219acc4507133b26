// Position management and order execution
pub mod exit_strategy;
pub mod paper;
pub mod position_tracker;
pub mod sizing;

pub use exit_strategy::{
    ExitAction, ExitDecision, ExitReason, ExitState, ExitStrategyConfig, ExitStrategyEngine,
    ExitTierTable,
};
pub use paper::PaperBroker;
pub use position_tracker::PositionTracker;
pub use sizing::BetSizing;
