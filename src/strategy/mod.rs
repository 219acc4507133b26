// Entry decisions
pub mod drawdown_screen;
pub mod entry_gate;
pub mod filters;
pub mod safety;

pub use drawdown_screen::{DrawdownScreen, DrawdownScreenConfig, ScreenRejection, Watchlist};
pub use entry_gate::{evaluate_entry, EntryDecision, EntryGate, EntryThresholds, RejectionReason};
pub use filters::Exclusions;
pub use safety::{TokenSafety, TokenSafetyConfig};
