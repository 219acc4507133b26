use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::candles::Condenser;
use crate::indicators::{volume_looks_organic, DrawdownDetector};
use crate::models::{Candle, TokenSignal};

/// Settings for the deep-drawdown recovery watchlist
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DrawdownScreenConfig {
    pub history_days: i64,
    pub min_daily_candles: usize,
    pub min_ath_price: f64,
    pub min_drawdown_percent: f64,
    pub dip_fraction: f64,
    pub min_dip_run: usize,
    pub volume_lookback_hours: usize,
    pub min_volume_cv: f64,
    /// Watchlisted tokens stay while within this distance of their ATH
    pub max_distance_from_ath: f64,
    /// or while trading at or above this price
    pub min_current_price: f64,
}

impl Default for DrawdownScreenConfig {
    fn default() -> Self {
        Self {
            history_days: 365,
            min_daily_candles: 14,
            min_ath_price: 0.006,
            min_drawdown_percent: 0.7,
            dip_fraction: 0.6,
            min_dip_run: 3,
            volume_lookback_hours: 24,
            min_volume_cv: 0.4,
            max_distance_from_ath: 0.2,
            min_current_price: 0.1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScreenRejection {
    NoCandles,
    VolumeNotOrganic,
    TooFewDailyCandles,
    NoDrawdown,
    AthTooLow,
    DrawdownTooShallow,
    NoDipRun,
}

impl fmt::Display for ScreenRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ScreenRejection::NoCandles => "no candles",
            ScreenRejection::VolumeNotOrganic => "hourly volume too uniform",
            ScreenRejection::TooFewDailyCandles => "not enough daily candles",
            ScreenRejection::NoDrawdown => "ATH is the latest candle",
            ScreenRejection::AthTooLow => "ATH price too low",
            ScreenRejection::DrawdownTooShallow => "drawdown too shallow",
            ScreenRejection::NoDipRun => "no sustained dip below threshold",
        };
        f.write_str(text)
    }
}

/// Finds tokens that fell far from their ATH and stayed down
#[derive(Debug, Clone, Default)]
pub struct DrawdownScreen {
    config: DrawdownScreenConfig,
    condenser: Condenser,
}

impl DrawdownScreen {
    pub fn new(config: DrawdownScreenConfig) -> Self {
        Self {
            config,
            condenser: Condenser::daily(),
        }
    }

    pub fn config(&self) -> &DrawdownScreenConfig {
        &self.config
    }

    /// Screen a token from its hourly history
    pub fn screen(
        &self,
        asset: &str,
        hourly: &[Candle],
        now: DateTime<Utc>,
    ) -> Result<TokenSignal, ScreenRejection> {
        let c = &self.config;
        if hourly.is_empty() {
            return Err(ScreenRejection::NoCandles);
        }
        if !volume_looks_organic(hourly, c.volume_lookback_hours, c.min_volume_cv) {
            return Err(ScreenRejection::VolumeNotOrganic);
        }

        let daily = self.condenser.condense(hourly);
        if daily.len() < c.min_daily_candles {
            return Err(ScreenRejection::TooFewDailyCandles);
        }

        let detector = DrawdownDetector::new(c.dip_fraction, c.min_dip_run);
        let signal = TokenSignal::from_series(asset, daily, &detector, now)
            .ok_or(ScreenRejection::NoCandles)?;
        let Some(drawdown) = signal.drawdown_percent() else {
            return Err(ScreenRejection::NoDrawdown);
        };

        if signal.ath_price() < c.min_ath_price {
            return Err(ScreenRejection::AthTooLow);
        }
        if drawdown < c.min_drawdown_percent {
            return Err(ScreenRejection::DrawdownTooShallow);
        }
        if signal.signals.dip_run_start.is_none() {
            return Err(ScreenRejection::NoDipRun);
        }

        Ok(signal)
    }

    /// Whether a watchlisted token is still worth tracking at `price`
    pub fn keep_on_watchlist(&self, signal: &TokenSignal, price: Option<f64>) -> bool {
        match price {
            None => true,
            Some(p) => {
                signal.ath_price() - p < self.config.max_distance_from_ath
                    || p >= self.config.min_current_price
            }
        }
    }

    /// Price has reclaimed the old ATH
    pub fn is_breakout(&self, signal: &TokenSignal, price: Option<f64>) -> bool {
        price.is_some_and(|p| p > signal.ath_price())
    }
}

/// Tokens that passed the drawdown screen, keyed by asset id
#[derive(Debug, Default)]
pub struct Watchlist {
    entries: HashMap<String, TokenSignal>,
}

impl Watchlist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace(&mut self, signals: Vec<TokenSignal>) {
        self.entries = signals
            .into_iter()
            .map(|s| (s.asset.clone(), s))
            .collect();
    }

    pub fn get(&self, asset: &str) -> Option<&TokenSignal> {
        self.entries.get(asset)
    }

    pub fn assets(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&TokenSignal) -> bool) {
        self.entries.retain(|_, s| keep(s));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
