use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::models::{ExitTier, Holding};

/// Exit tiers ordered from the largest remaining fraction down
///
/// Tiers cover `(0, 1]` without gaps or overlap, each on `(lower, upper]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<ExitTier>", into = "Vec<ExitTier>")]
pub struct ExitTierTable {
    tiers: Vec<ExitTier>,
}

impl ExitTierTable {
    pub fn new(mut tiers: Vec<ExitTier>) -> Result<Self, EngineError> {
        if tiers.is_empty() {
            return Err(EngineError::InvalidTierTable("no tiers".into()));
        }
        tiers.sort_by(|a, b| b.upper.total_cmp(&a.upper));

        for tier in &tiers {
            if !(tier.lower < tier.upper) {
                return Err(EngineError::InvalidTierTable(format!(
                    "empty range ({}, {}]",
                    tier.lower, tier.upper
                )));
            }
            if !(0.0..=1.0).contains(&tier.sell_fraction) {
                return Err(EngineError::InvalidTierTable(format!(
                    "sell fraction {} outside [0, 1]",
                    tier.sell_fraction
                )));
            }
        }

        for pair in tiers.windows(2) {
            if pair[0].lower != pair[1].upper {
                return Err(EngineError::InvalidTierTable(format!(
                    "tiers ({}, {}] and ({}, {}] are not contiguous",
                    pair[1].lower, pair[1].upper, pair[0].lower, pair[0].upper
                )));
            }
        }

        let top = tiers[0].upper;
        let bottom = tiers[tiers.len() - 1].lower;
        if top != 1.0 || bottom != 0.0 {
            return Err(EngineError::InvalidTierTable(format!(
                "tiers span ({}, {}] instead of (0, 1]",
                bottom, top
            )));
        }

        Ok(Self { tiers })
    }

    /// The single tier whose range contains `fraction`
    pub fn select(&self, fraction: f64) -> Option<&ExitTier> {
        self.tiers.iter().find(|t| t.contains(fraction))
    }

    pub fn tiers(&self) -> &[ExitTier] {
        &self.tiers
    }
}

impl Default for ExitTierTable {
    fn default() -> Self {
        Self {
            tiers: vec![
                ExitTier {
                    lower: 0.51,
                    upper: 1.0,
                    stop_pct: -0.5,
                    profit_pct: 0.5,
                    sell_fraction: 0.5,
                },
                ExitTier {
                    lower: 0.35,
                    upper: 0.51,
                    stop_pct: 0.0,
                    profit_pct: 1.0,
                    sell_fraction: 0.25,
                },
                ExitTier {
                    lower: 0.0,
                    upper: 0.35,
                    stop_pct: 0.5,
                    profit_pct: 2.0,
                    sell_fraction: 0.25,
                },
            ],
        }
    }
}

impl TryFrom<Vec<ExitTier>> for ExitTierTable {
    type Error = EngineError;

    fn try_from(tiers: Vec<ExitTier>) -> Result<Self, Self::Error> {
        Self::new(tiers)
    }
}

impl From<ExitTierTable> for Vec<ExitTier> {
    fn from(table: ExitTierTable) -> Self {
        table.tiers
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExitStrategyConfig {
    pub tiers: ExitTierTable,
    /// Positions never partially sold are closed after this many hours
    pub max_hold_hours: f64,
    /// Tolerance, in whole tokens, for "nothing sold yet"
    pub unsold_epsilon: f64,
    /// Initial stop relative to the buy price
    pub initial_stop_percent_change: f64,
}

impl Default for ExitStrategyConfig {
    fn default() -> Self {
        Self {
            tiers: ExitTierTable::default(),
            max_hold_hours: 240.0,
            unsold_epsilon: 0.01,
            initial_stop_percent_change: -0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitState {
    Holding,
    PartialExit,
    Exited,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    StopLoss,
    TimeStop,
    TakeProfit,
}

/// What to do with a holding; amounts are raw token units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "action")]
pub enum ExitAction {
    None,
    SellPartial { amount: u64 },
    SellAll { amount: u64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitDecision {
    pub asset: String,
    pub action: ExitAction,
    pub state: ExitState,
    pub reason: Option<ExitReason>,
    pub tier: ExitTier,
    pub remaining_fraction: f64,
    pub stop_price: f64,
    pub profit_price: f64,
    pub profit_sell_amount: u64,
}

impl Holding {
    /// Carry the tier stop from `decision` onto this holding
    pub fn apply(&mut self, decision: &ExitDecision) {
        if decision.asset == self.asset {
            self.stop_price = Some(decision.stop_price);
        }
    }
}

/// Tiered stop / take-profit policy for open holdings
#[derive(Debug, Clone, Default)]
pub struct ExitStrategyEngine {
    config: ExitStrategyConfig,
}

impl ExitStrategyEngine {
    pub fn new(config: ExitStrategyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExitStrategyConfig {
        &self.config
    }

    /// Evaluate one holding against the current quote
    ///
    /// Triggers are checked in order (stop loss, time stop, take profit) and
    /// the first match wins.
    pub fn evaluate_exit(
        &self,
        holding: &Holding,
        price: f64,
        now: DateTime<Utc>,
    ) -> Result<ExitDecision, EngineError> {
        holding.validate()?;

        if !price.is_finite() || price <= 0.0 {
            return Err(EngineError::upstream(
                "quote",
                format!("unusable price {} for {}", price, holding.asset),
            ));
        }

        let fraction = holding
            .remaining_fraction()
            .filter(|f| (0.0..=1.0).contains(f))
            .ok_or_else(|| EngineError::MalformedHolding {
                asset: holding.asset.clone(),
                reason: format!(
                    "current amount {} exceeds buy amount {}",
                    holding.current_amount_raw, holding.buy_amount_raw
                ),
            })?;

        let tier = *self
            .config
            .tiers
            .select(fraction)
            .ok_or_else(|| EngineError::NoMatchingTier {
                asset: holding.asset.clone(),
                fraction,
            })?;

        let buy_price = holding.buy_price_per_token;
        let stop_price = (buy_price * (1.0 + tier.stop_pct)).max(holding.initial_stop_price);
        let profit_price = buy_price * (1.0 + tier.profit_pct);
        let profit_sell_amount = ((holding.buy_amount_raw as f64 * tier.sell_fraction).floor() as u64)
            .saturating_sub(1)
            .min(holding.current_amount_raw);

        let unsold = (holding.current_amount() - holding.buy_amount()).abs() < self.config.unsold_epsilon;
        let prior_state = if unsold {
            ExitState::Holding
        } else {
            ExitState::PartialExit
        };

        let sell_all = ExitAction::SellAll {
            amount: holding.current_amount_raw,
        };
        let (action, reason) = if price <= stop_price {
            (sell_all, Some(ExitReason::StopLoss))
        } else if holding.age_hours(now) >= self.config.max_hold_hours && unsold {
            (sell_all, Some(ExitReason::TimeStop))
        } else if price >= profit_price && profit_sell_amount > 0 {
            (
                ExitAction::SellPartial {
                    amount: profit_sell_amount,
                },
                Some(ExitReason::TakeProfit),
            )
        } else {
            (ExitAction::None, None)
        };

        let state = match action {
            ExitAction::None => prior_state,
            ExitAction::SellPartial { .. } => ExitState::PartialExit,
            ExitAction::SellAll { .. } => ExitState::Exited,
        };

        Ok(ExitDecision {
            asset: holding.asset.clone(),
            action,
            state,
            reason,
            tier,
            remaining_fraction: fraction,
            stop_price,
            profit_price,
            profit_sell_amount,
        })
    }
}
