use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Candle, DrawdownSignals, TokenSignal};

/// Finds the all-time high and the drawdown that followed it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DrawdownDetector {
    /// Closes below `ath * (1 - dip_fraction)` count as dipped
    pub dip_fraction: f64,
    /// Consecutive dipped closes needed to mark the start of a dip run
    pub min_run: usize,
}

impl Default for DrawdownDetector {
    fn default() -> Self {
        Self {
            dip_fraction: 0.6,
            min_run: 3,
        }
    }
}

impl DrawdownDetector {
    pub fn new(dip_fraction: f64, min_run: usize) -> Self {
        Self {
            dip_fraction,
            min_run,
        }
    }

    /// Detect ATH and drawdown facts for candles in ascending time order
    ///
    /// Returns `None` for an empty series.
    pub fn detect(&self, candles: &[Candle]) -> Option<DrawdownSignals> {
        let latest = candles.last()?;

        // Ties resolve to the most recent bar
        let (ath_idx, ath) = candles
            .iter()
            .enumerate()
            .fold((0, f64::NEG_INFINITY), |(best_idx, best), (idx, c)| {
                if c.high >= best {
                    (idx, c.high)
                } else {
                    (best_idx, best)
                }
            });
        let ath_time = candles[ath_idx].timestamp;

        let mut signals = DrawdownSignals {
            ath_price: ath,
            ath_time,
            drawdown_price: None,
            drawdown_time: None,
            drawdown_percent: None,
            dip_run_start: None,
        };

        if ath_time == latest.timestamp {
            return Some(signals);
        }

        let after = &candles[ath_idx + 1..];

        let mut low = f64::INFINITY;
        let mut low_time = None;
        for c in after {
            if c.low <= low {
                low = c.low;
                low_time = Some(c.timestamp);
            }
        }

        if let Some(time) = low_time {
            signals.drawdown_price = Some(low);
            signals.drawdown_time = Some(time);
            if ath > 0.0 {
                signals.drawdown_percent = Some((ath - low) / ath);
            }
        }

        signals.dip_run_start = self.dip_run_start(after, ath);
        Some(signals)
    }

    fn dip_run_start(&self, after_ath: &[Candle], ath: f64) -> Option<DateTime<Utc>> {
        let threshold = ath * (1.0 - self.dip_fraction);
        let min_run = self.min_run.max(1);

        let mut run = 0;
        for (idx, c) in after_ath.iter().enumerate() {
            if c.close < threshold {
                run += 1;
                if run >= min_run {
                    return Some(after_ath[idx + 1 - run].timestamp);
                }
            } else {
                run = 0;
            }
        }
        None
    }
}

impl TokenSignal {
    /// Detect drawdown facts on `candles` and bundle them with the asset id
    pub fn from_series(
        asset: &str,
        candles: Vec<Candle>,
        detector: &DrawdownDetector,
        created_at: DateTime<Utc>,
    ) -> Option<Self> {
        let signals = detector.detect(&candles)?;
        Some(Self {
            asset: asset.to_string(),
            created_at,
            candles,
            signals,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn t(h: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(h)
    }

    fn bar(h: i64, high: f64, low: f64, close: f64) -> Candle {
        Candle::new(t(h), close, high, low, close, 1.0)
    }

    #[test]
    fn test_drawdown_after_ath() {
        let mut candles: Vec<Candle> = (0..5).map(|h| bar(h, 5.0, 4.0, 4.5)).collect();
        candles.push(bar(5, 10.0, 8.0, 9.0));
        for (h, low) in [(6, 9.0), (7, 8.0), (8, 7.0), (9, 6.0)] {
            candles.push(bar(h, 9.5, low, low + 0.5));
        }

        let s = DrawdownDetector::default().detect(&candles).unwrap();
        assert_eq!(s.ath_price, 10.0);
        assert_eq!(s.ath_time, t(5));
        assert_eq!(s.drawdown_price, Some(6.0));
        assert_eq!(s.drawdown_time, Some(t(9)));
        assert_eq!(s.drawdown_percent, Some(0.4));
        // Threshold is 4.0; no close goes below it
        assert_eq!(s.dip_run_start, None);
    }

    #[test]
    fn test_ath_on_latest_bar_has_no_drawdown() {
        let candles: Vec<Candle> = (0..4).map(|h| bar(h, h as f64 + 1.0, 0.5, 1.0)).collect();
        let s = DrawdownDetector::default().detect(&candles).unwrap();
        assert_eq!(s.ath_time, t(3));
        assert!(s.drawdown_price.is_none());
        assert!(s.drawdown_percent.is_none());
        assert!(s.dip_run_start.is_none());
    }

    #[test]
    fn test_ath_tie_picks_latest() {
        let candles = vec![
            bar(0, 10.0, 9.0, 9.0),
            bar(1, 10.0, 9.0, 9.0),
            bar(2, 5.0, 3.0, 3.0),
        ];
        let s = DrawdownDetector::default().detect(&candles).unwrap();
        assert_eq!(s.ath_time, t(1));
    }

    #[test]
    fn test_drawdown_low_tie_picks_latest() {
        let candles = vec![
            bar(0, 10.0, 9.0, 9.0),
            bar(1, 6.0, 2.0, 3.0),
            bar(2, 6.0, 2.0, 3.0),
            bar(3, 6.0, 4.0, 5.0),
        ];
        let s = DrawdownDetector::default().detect(&candles).unwrap();
        assert_eq!(s.drawdown_price, Some(2.0));
        assert_eq!(s.drawdown_time, Some(t(2)));
    }

    #[test]
    fn test_dip_run_start() {
        // ATH 10, threshold 4.0
        let candles = vec![
            bar(0, 10.0, 9.0, 9.0),
            bar(1, 5.0, 3.0, 3.5),
            bar(2, 5.0, 3.0, 4.5),
            bar(3, 5.0, 3.0, 3.9),
            bar(4, 5.0, 3.0, 3.0),
            bar(5, 5.0, 3.0, 2.0),
            bar(6, 5.0, 3.0, 2.0),
        ];
        let s = DrawdownDetector::default().detect(&candles).unwrap();
        assert_eq!(s.dip_run_start, Some(t(3)));
    }

    #[test]
    fn test_short_dip_run_is_ignored() {
        let candles = vec![
            bar(0, 10.0, 9.0, 9.0),
            bar(1, 5.0, 3.0, 3.0),
            bar(2, 5.0, 3.0, 3.0),
            bar(3, 5.0, 3.0, 5.0),
        ];
        let s = DrawdownDetector::default().detect(&candles).unwrap();
        assert!(s.dip_run_start.is_none());
    }

    #[test]
    fn test_empty_series() {
        assert!(DrawdownDetector::default().detect(&[]).is_none());
    }

    #[test]
    fn test_token_signal_from_series() {
        let candles = vec![bar(0, 10.0, 9.0, 9.0), bar(1, 5.0, 3.0, 3.0)];
        let signal =
            TokenSignal::from_series("AAA", candles, &DrawdownDetector::default(), t(2)).unwrap();
        assert_eq!(signal.asset, "AAA");
        assert_eq!(signal.candles.len(), 2);
        assert_eq!(signal.ath_price(), 10.0);
        assert_eq!(signal.created_at, t(2));

        assert!(TokenSignal::from_series("AAA", vec![], &DrawdownDetector::default(), t(2)).is_none());
    }
}
