use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Bound;

use crate::candles::CandleSeries;
use crate::indicators::IndicatorEngine;
use crate::models::{Candle, CandleIndicators, IndicatorKind};

/// Thresholds for the momentum breakout entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntryThresholds {
    pub volume_multiple_short: f64, // 3h volume vs its 24h average
    pub volume_multiple_long: f64,  // 3h volume vs its 168h average
    pub short_move_min: f64,        // exclusive
    pub short_move_max: f64,        // inclusive
    pub day_move_min: f64,          // exclusive
    pub day_move_max: f64,          // inclusive
    pub spike_ceiling: f64,         // 3h volume / 24h average must stay below
    pub volume_floor: f64,          // latest bar volume, quote units
    pub history_days: i64,
    pub history_coverage_pct: i64,
    pub volume_high_lookback_hours: i64,
    pub price_high_lookback_hours: i64,
    pub price_high_recent_hours: i64,
}

impl Default for EntryThresholds {
    fn default() -> Self {
        Self {
            volume_multiple_short: 2.5,
            volume_multiple_long: 2.5,
            short_move_min: 0.02,
            short_move_max: 1.2,
            day_move_min: 0.02,
            day_move_max: 10.0,
            spike_ceiling: 40.0,
            volume_floor: 2_000_000.0,
            history_days: 14,
            history_coverage_pct: 90,
            volume_high_lookback_hours: 168,
            price_high_lookback_hours: 168,
            price_high_recent_hours: 2,
        }
    }
}

/// Why an entry was refused
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    NoCandles,
    MissingIndicator(IndicatorKind),
    InsufficientHistory,
    VolumeBelowShortAverage,
    VolumeBelowLongAverage,
    EmaNotAboveShortSma,
    ShortSmaNotAboveLongSma,
    ShortMoveOutOfRange,
    DayMoveOutOfRange,
    NoPriorVolume,
    VolumeNotNewHigh,
    VolumeSpikeTooHigh,
    VolumeBelowFloor,
    PriceNotNewHigh,
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectionReason::NoCandles => write!(f, "no candles"),
            RejectionReason::MissingIndicator(kind) => write!(f, "{} is undefined", kind),
            RejectionReason::InsufficientHistory => write!(f, "not enough price history"),
            RejectionReason::VolumeBelowShortAverage => {
                write!(f, "3h volume not above multiple of 24h average")
            }
            RejectionReason::VolumeBelowLongAverage => {
                write!(f, "3h volume not above multiple of 168h average")
            }
            RejectionReason::EmaNotAboveShortSma => write!(f, "EMA24 <= SMA24"),
            RejectionReason::ShortSmaNotAboveLongSma => write!(f, "SMA24 <= SMA168"),
            RejectionReason::ShortMoveOutOfRange => write!(f, "3h move out of range"),
            RejectionReason::DayMoveOutOfRange => write!(f, "24h move out of range"),
            RejectionReason::NoPriorVolume => write!(f, "no prior 3h volume to compare"),
            RejectionReason::VolumeNotNewHigh => write!(f, "3h volume not a 7 day high"),
            RejectionReason::VolumeSpikeTooHigh => write!(f, "volume spike too high"),
            RejectionReason::VolumeBelowFloor => write!(f, "not enough volume"),
            RejectionReason::PriceNotNewHigh => write!(f, "price not a new high"),
        }
    }
}

/// Result of one entry evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryDecision {
    pub passed: bool,
    pub reasons: Vec<RejectionReason>,
    pub evaluated_at: Option<DateTime<Utc>>,
    pub indicators: Option<CandleIndicators>,
}

impl EntryDecision {
    fn rejected(reasons: Vec<RejectionReason>) -> Self {
        Self {
            passed: false,
            reasons,
            evaluated_at: None,
            indicators: None,
        }
    }
}

/// Conjunction of indicator thresholds on the newest bar of an hourly series
///
/// Every condition is checked on its own so a rejection lists all failures.
#[derive(Debug, Clone, Default)]
pub struct EntryGate {
    thresholds: EntryThresholds,
    engine: IndicatorEngine,
}

impl EntryGate {
    pub fn new(thresholds: EntryThresholds, engine: IndicatorEngine) -> Self {
        Self { thresholds, engine }
    }

    pub fn thresholds(&self) -> &EntryThresholds {
        &self.thresholds
    }

    /// Enrich raw candles and evaluate them
    pub fn evaluate_candles(&self, candles: impl IntoIterator<Item = Candle>) -> EntryDecision {
        let mut series = CandleSeries::from_candles(candles);
        self.engine.enrich(&mut series);
        self.evaluate(&series)
    }

    /// Evaluate an already enriched series
    pub fn evaluate(&self, series: &CandleSeries) -> EntryDecision {
        let Some(latest) = series.latest() else {
            return EntryDecision::rejected(vec![RejectionReason::NoCandles]);
        };
        let th = &self.thresholds;
        let ind = latest.indicators;
        let mut reasons = Vec::new();

        let mut need = |kind: IndicatorKind| {
            let value = ind.get(kind).value();
            if value.is_none() {
                reasons.push(RejectionReason::MissingIndicator(kind));
            }
            value
        };
        let vol3 = need(IndicatorKind::VolumeSum3h);
        let avg24 = need(IndicatorKind::VolumeAvg24h);
        let avg168 = need(IndicatorKind::VolumeAvg168h);
        let ema24 = need(IndicatorKind::Ema24h);
        let sma24 = need(IndicatorKind::Sma24h);
        let sma168 = need(IndicatorKind::Sma168h);
        let pct3 = need(IndicatorKind::PctChange3h);
        let pct24 = need(IndicatorKind::PctChange24h);

        if !self.has_history(series, latest.timestamp) {
            reasons.push(RejectionReason::InsufficientHistory);
        }

        if let (Some(v), Some(a)) = (vol3, avg24) {
            if v <= a * th.volume_multiple_short {
                reasons.push(RejectionReason::VolumeBelowShortAverage);
            }
            if a <= 0.0 || v / a >= th.spike_ceiling {
                reasons.push(RejectionReason::VolumeSpikeTooHigh);
            }
        }
        if let (Some(v), Some(a)) = (vol3, avg168) {
            if v <= a * th.volume_multiple_long {
                reasons.push(RejectionReason::VolumeBelowLongAverage);
            }
        }
        if let (Some(e), Some(s)) = (ema24, sma24) {
            if e <= s {
                reasons.push(RejectionReason::EmaNotAboveShortSma);
            }
        }
        if let (Some(s), Some(l)) = (sma24, sma168) {
            if s <= l {
                reasons.push(RejectionReason::ShortSmaNotAboveLongSma);
            }
        }
        if let Some(p) = pct3 {
            if !(p > th.short_move_min && p <= th.short_move_max) {
                reasons.push(RejectionReason::ShortMoveOutOfRange);
            }
        }
        if let Some(p) = pct24 {
            if !(p > th.day_move_min && p <= th.day_move_max) {
                reasons.push(RejectionReason::DayMoveOutOfRange);
            }
        }
        if let Some(v) = vol3 {
            match self.prior_volume_high(series, latest.timestamp) {
                None => reasons.push(RejectionReason::NoPriorVolume),
                Some(max) if v < max => reasons.push(RejectionReason::VolumeNotNewHigh),
                Some(_) => {}
            }
        }
        if latest.volume < th.volume_floor {
            reasons.push(RejectionReason::VolumeBelowFloor);
        }
        if !self.is_new_high(series, latest.timestamp) {
            reasons.push(RejectionReason::PriceNotNewHigh);
        }

        EntryDecision {
            passed: reasons.is_empty(),
            reasons,
            evaluated_at: Some(latest.timestamp),
            indicators: Some(ind),
        }
    }

    fn has_history(&self, series: &CandleSeries, t: DateTime<Utc>) -> bool {
        let th = &self.thresholds;
        let present = series
            .window(
                Bound::Excluded(t - Duration::days(th.history_days)),
                Bound::Included(t),
            )
            .len() as i64;
        present * 100 >= th.history_days * 24 * th.history_coverage_pct
    }

    /// Largest 3h volume sum over `[t - lookback, t)`; never includes `t` itself
    pub fn prior_volume_high(&self, series: &CandleSeries, t: DateTime<Utc>) -> Option<f64> {
        series
            .window(
                Bound::Included(t - Duration::hours(self.thresholds.volume_high_lookback_hours)),
                Bound::Excluded(t),
            )
            .iter()
            .filter_map(|c| c.indicators.volume_sum_3h.value())
            .filter(|v| *v > 0.0)
            .reduce(f64::max)
    }

    /// Recent bars' highest midpoint beats the highest midpoint of the prior week
    pub fn is_new_high(&self, series: &CandleSeries, t: DateTime<Utc>) -> bool {
        let th = &self.thresholds;
        let recent_start = t - Duration::hours(th.price_high_recent_hours);

        let previous = series
            .window(
                Bound::Excluded(t - Duration::hours(th.price_high_lookback_hours)),
                Bound::Excluded(recent_start),
            )
            .iter()
            .map(Candle::midpoint)
            .reduce(f64::max);
        let current = series
            .window(Bound::Included(recent_start), Bound::Unbounded)
            .iter()
            .map(Candle::midpoint)
            .reduce(f64::max);

        match (current, previous) {
            (Some(c), Some(p)) => c > p,
            _ => false,
        }
    }
}

/// Enrich and evaluate hourly candles with default thresholds
pub fn evaluate_entry(candles: &[Candle]) -> EntryDecision {
    EntryGate::default().evaluate_candles(candles.iter().cloned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Indicator;
    use chrono::TimeZone;

    fn hour(h: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap() + Duration::hours(h)
    }

    /// Two weeks of quiet, slowly rising hourly bars ending in a breakout
    fn breakout_candles() -> Vec<Candle> {
        let mut candles: Vec<Candle> = (0..333)
            .map(|h| {
                let price = 1.0 + h as f64 * 0.0005;
                Candle::new(hour(h), price, price * 1.01, price * 0.99, price, 300_000.0)
            })
            .collect();

        let mut price = 1.0 + 333.0 * 0.0005;
        for h in 333..336 {
            let open = price;
            price *= 1.05;
            candles.push(Candle::new(hour(h), open, price, open, price, 3_000_000.0));
        }
        candles
    }

    #[test]
    fn test_breakout_passes() {
        let decision = evaluate_entry(&breakout_candles());
        assert!(decision.passed, "unexpected reasons: {:?}", decision.reasons);
        assert!(decision.reasons.is_empty());
        assert_eq!(decision.evaluated_at, Some(hour(335)));
    }

    #[test]
    fn test_empty_series() {
        let decision = evaluate_entry(&[]);
        assert!(!decision.passed);
        assert_eq!(decision.reasons, vec![RejectionReason::NoCandles]);
    }

    #[test]
    fn test_short_series_fails_closed() {
        let candles: Vec<Candle> = breakout_candles().into_iter().skip(300).collect();
        let decision = evaluate_entry(&candles);
        assert!(!decision.passed);
        assert!(decision
            .reasons
            .contains(&RejectionReason::MissingIndicator(IndicatorKind::Sma168h)));
        assert!(decision.reasons.contains(&RejectionReason::InsufficientHistory));
    }

    #[test]
    fn test_missing_indicator_rejects_even_if_others_pass() {
        let gate = EntryGate::default();
        let mut series = CandleSeries::from_candles(breakout_candles());
        let last = series.len() - 1;
        series.indicators_mut(last).unwrap().ema_24h = Indicator::Insufficient;
        IndicatorEngine::default().enrich(&mut series);

        let decision = gate.evaluate(&series);
        assert!(!decision.passed);
        assert_eq!(
            decision.reasons,
            vec![RejectionReason::MissingIndicator(IndicatorKind::Ema24h)]
        );
    }

    #[test]
    fn test_all_failures_are_listed() {
        // Flat, quiet market: no breakout conditions hold
        let candles: Vec<Candle> = (0..336)
            .map(|h| Candle::new(hour(h), 1.0, 1.0, 1.0, 1.0, 1000.0))
            .collect();
        let decision = evaluate_entry(&candles);

        assert!(!decision.passed);
        for reason in [
            RejectionReason::VolumeBelowShortAverage,
            RejectionReason::VolumeBelowLongAverage,
            RejectionReason::EmaNotAboveShortSma,
            RejectionReason::ShortSmaNotAboveLongSma,
            RejectionReason::ShortMoveOutOfRange,
            RejectionReason::DayMoveOutOfRange,
            RejectionReason::VolumeBelowFloor,
            RejectionReason::PriceNotNewHigh,
        ] {
            assert!(decision.reasons.contains(&reason), "missing {:?}", reason);
        }
        assert!(!decision.reasons.contains(&RejectionReason::VolumeNotNewHigh));
        assert!(!decision.reasons.contains(&RejectionReason::InsufficientHistory));
    }

    #[test]
    fn test_volume_spike_ceiling() {
        let mut candles = breakout_candles();
        candles[333].volume = 300_000.0;
        candles[334].volume = 300_000.0;
        candles[335].volume = 50_000_000.0;
        let decision = evaluate_entry(&candles);
        assert_eq!(decision.reasons, vec![RejectionReason::VolumeSpikeTooHigh]);
    }

    #[test]
    fn test_prior_volume_high_is_causal() {
        let gate = EntryGate::default();
        let mut series = CandleSeries::from_candles(breakout_candles());
        IndicatorEngine::default().enrich(&mut series);

        // The breakout bar's own 3h volume is not part of its lookback
        let max = gate.prior_volume_high(&series, hour(335)).unwrap();
        let own = series.latest().unwrap().indicators.volume_sum_3h.value().unwrap();
        assert!(own > max);
    }

    #[test]
    fn test_undefined_or_zero_prior_volume_rejects() {
        let gate = EntryGate::default();
        for prior in [Indicator::Insufficient, Indicator::Value(0.0)] {
            let mut series = CandleSeries::from_candles(breakout_candles());
            IndicatorEngine::default().enrich(&mut series);
            let last = series.len() - 1;
            for i in 0..last {
                series.indicators_mut(i).unwrap().volume_sum_3h = prior;
            }

            assert_eq!(gate.prior_volume_high(&series, hour(335)), None);
            let decision = gate.evaluate(&series);
            assert!(!decision.passed);
            assert_eq!(
                decision.reasons,
                vec![RejectionReason::NoPriorVolume],
                "prior 3h sums {:?}",
                prior
            );
        }
    }

    #[test]
    fn test_partly_defined_lookback_uses_defined_sums() {
        // Early in a series only the newest 3h sums exist
        let gate = EntryGate::default();
        let mut series = CandleSeries::from_candles(breakout_candles());
        IndicatorEngine::default().enrich(&mut series);
        let last = series.len() - 1;
        let defined = series.indicators_mut(last - 1).unwrap().volume_sum_3h.value();
        for i in 0..last - 1 {
            series.indicators_mut(i).unwrap().volume_sum_3h = Indicator::Insufficient;
        }

        assert!(defined.is_some());
        assert_eq!(gate.prior_volume_high(&series, hour(335)), defined);
        let decision = gate.evaluate(&series);
        assert!(decision.passed, "unexpected reasons: {:?}", decision.reasons);
    }

    #[test]
    fn test_is_new_high_needs_both_windows() {
        let gate = EntryGate::default();
        let series = CandleSeries::from_candles(vec![Candle::new(hour(0), 1.0, 2.0, 1.0, 1.5, 1.0)]);
        assert!(!gate.is_new_high(&series, hour(0)));
    }

    #[test]
    fn test_reason_display() {
        let reason = RejectionReason::MissingIndicator(IndicatorKind::Ema24h);
        assert_eq!(reason.to_string(), "24h EMA is undefined");
    }
}
