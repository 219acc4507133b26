pub mod drawdown;
pub mod volatility;
pub mod window;

pub use drawdown::DrawdownDetector;
pub use volatility::{coefficient_of_variation, volume_looks_organic};
pub use window::{calculate_ema, IndicatorConfig, IndicatorEngine};
