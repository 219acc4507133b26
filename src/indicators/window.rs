use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::ops::Bound;

use crate::candles::CandleSeries;
use crate::models::{CandleIndicators, Indicator, IndicatorKind};

/// Window lengths (hours) and coverage minimums for the per-candle metrics
///
/// Windows are expressed in hours over hourly bars. Coverage is an integer
/// percentage of the window length that must be present for a metric to be
/// defined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndicatorConfig {
    pub volume_sum_hours: i64,
    pub short_hours: i64,
    pub long_hours: i64,
    pub change_short_bars: i64,
    pub change_long_bars: i64,
    pub average_coverage_pct: i64,
    pub ema_coverage_pct: i64,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            volume_sum_hours: 3,
            short_hours: 24,
            long_hours: 168,
            change_short_bars: 3,
            change_long_bars: 24,
            average_coverage_pct: 80,
            ema_coverage_pct: 70,
        }
    }
}

/// Computes sliding-window metrics from the bars present in a series
#[derive(Debug, Clone, Default)]
pub struct IndicatorEngine {
    config: IndicatorConfig,
}

impl IndicatorEngine {
    pub fn new(config: IndicatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &IndicatorConfig {
        &self.config
    }

    /// Fill every pending metric on every candle, oldest first
    ///
    /// Metrics that already hold a value (or were found insufficient) are left
    /// untouched. Returns the number of candles that changed.
    pub fn enrich(&self, series: &mut CandleSeries) -> usize {
        let mut changed = 0;

        for idx in 0..series.len() {
            let Some(candle) = series.get(idx) else {
                continue;
            };
            let t = candle.timestamp;
            let before = candle.indicators;

            let mut after = before;
            self.fill_pending(series, t, &mut after);

            if after != before {
                if let Some(slot) = series.indicators_mut(idx) {
                    *slot = after;
                    changed += 1;
                }
            }
        }

        tracing::debug!("Enriched {} of {} candles", changed, series.len());
        changed
    }

    fn fill_pending(&self, series: &CandleSeries, t: DateTime<Utc>, ind: &mut CandleIndicators) {
        let slots = [
            (&mut ind.volume_sum_3h, IndicatorKind::VolumeSum3h),
            (&mut ind.volume_avg_24h, IndicatorKind::VolumeAvg24h),
            (&mut ind.volume_avg_168h, IndicatorKind::VolumeAvg168h),
            (&mut ind.ema_24h, IndicatorKind::Ema24h),
            (&mut ind.sma_24h, IndicatorKind::Sma24h),
            (&mut ind.sma_168h, IndicatorKind::Sma168h),
            (&mut ind.pct_change_3h, IndicatorKind::PctChange3h),
            (&mut ind.pct_change_24h, IndicatorKind::PctChange24h),
        ];

        for (slot, kind) in slots {
            if slot.is_pending() {
                *slot = Indicator::from_option(self.compute(series, t, kind));
            }
        }
    }

    /// Compute one metric for the bar at `t`
    pub fn compute(&self, series: &CandleSeries, t: DateTime<Utc>, kind: IndicatorKind) -> Option<f64> {
        let c = &self.config;
        match kind {
            IndicatorKind::VolumeSum3h => self.volume_sum(series, t, c.volume_sum_hours),
            IndicatorKind::VolumeAvg24h => self.volume_avg(series, t, c.short_hours),
            IndicatorKind::VolumeAvg168h => self.volume_avg(series, t, c.long_hours),
            IndicatorKind::Ema24h => self.ema(series, t, c.short_hours),
            IndicatorKind::Sma24h => self.sma(series, t, c.short_hours),
            IndicatorKind::Sma168h => self.sma(series, t, c.long_hours),
            IndicatorKind::PctChange3h => self.pct_change(series, t, c.change_short_bars),
            IndicatorKind::PctChange24h => self.pct_change(series, t, c.change_long_bars),
        }
    }

    /// Sum of volume over `(t - hours, t]`; defined only when every hour has a bar
    pub fn volume_sum(&self, series: &CandleSeries, t: DateTime<Utc>, hours: i64) -> Option<f64> {
        let bars = series.window(
            Bound::Excluded(t - Duration::hours(hours)),
            Bound::Included(t),
        );
        if bars.len() as i64 != hours {
            return None;
        }
        Some(bars.iter().map(|c| c.volume).sum())
    }

    /// Average of the windowed volume sums of bars in `[t - hours, t)`,
    /// rounded to whole quote units
    pub fn volume_avg(&self, series: &CandleSeries, t: DateTime<Utc>, hours: i64) -> Option<f64> {
        let sums: Vec<f64> = series
            .window(
                Bound::Included(t - Duration::hours(hours)),
                Bound::Excluded(t),
            )
            .iter()
            .filter_map(|c| self.volume_sum(series, c.timestamp, self.config.volume_sum_hours))
            .collect();

        if !self.covers(sums.len(), hours, self.config.average_coverage_pct) {
            return None;
        }
        Some((sums.iter().sum::<f64>() / sums.len() as f64).round_ties_even())
    }

    /// Simple moving average of closes over `(t - hours, t]`
    pub fn sma(&self, series: &CandleSeries, t: DateTime<Utc>, hours: i64) -> Option<f64> {
        let closes: Vec<f64> = series
            .window(
                Bound::Excluded(t - Duration::hours(hours)),
                Bound::Included(t),
            )
            .iter()
            .map(|c| c.close)
            .collect();

        if !self.covers(closes.len(), hours, self.config.average_coverage_pct) {
            return None;
        }
        Some(closes.iter().sum::<f64>() / closes.len() as f64)
    }

    /// Exponential moving average over closes in `[t - (2n - 1)h, t]`
    pub fn ema(&self, series: &CandleSeries, t: DateTime<Utc>, hours: i64) -> Option<f64> {
        let closes: Vec<f64> = series
            .window(
                Bound::Included(t - Duration::hours(2 * hours - 1)),
                Bound::Included(t),
            )
            .iter()
            .map(|c| c.close)
            .collect();

        if !self.covers(closes.len(), 2 * hours, self.config.ema_coverage_pct) {
            return None;
        }
        calculate_ema(&closes)
    }

    /// `(close(t) - open(t - bars + 1)) / open(t - bars + 1)`
    pub fn pct_change(&self, series: &CandleSeries, t: DateTime<Utc>, bars: i64) -> Option<f64> {
        let close = series.at(t)?.close;
        let open = series.at(t - Duration::hours(bars - 1))?.open;
        if open == 0.0 {
            return None;
        }
        Some((close - open) / open)
    }

    fn covers(&self, present: usize, expected: i64, pct: i64) -> bool {
        present > 0 && present as i64 * 100 >= expected * pct
    }
}

/// EMA over a whole sample: the first half seeds a simple average and the
/// second half is folded in with smoothing `2 / (window + 1)`
pub fn calculate_ema(values: &[f64]) -> Option<f64> {
    let window = values.len() / 2;
    if window == 0 {
        return None;
    }

    let multiplier = 2.0 / (window as f64 + 1.0);
    let seed = values[..window].iter().sum::<f64>() / window as f64;

    Some(
        values[window..]
            .iter()
            .fold(seed, |ema, price| (price - ema) * multiplier + ema),
    )
}
