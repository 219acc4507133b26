use chrono::Duration;
use std::collections::BTreeMap;

use super::store::CandleSeries;
use crate::models::Candle;

const SECONDS_PER_DAY: i64 = 86_400;
const HOURLY_BARS_PER_DAY: usize = 24;

/// How input candles are grouped into one output candle
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Bucket {
    /// UTC calendar day
    CalendarDay,
    /// Fixed-width buckets aligned to the Unix epoch
    Fixed(Duration),
}

impl Bucket {
    fn width_secs(&self) -> i64 {
        match self {
            Bucket::CalendarDay => SECONDS_PER_DAY,
            Bucket::Fixed(d) => d.num_seconds().max(1),
        }
    }

    fn key(&self, candle: &Candle) -> i64 {
        candle.timestamp.timestamp().div_euclid(self.width_secs())
    }
}

/// Rolls fine candles up into coarser ones
///
/// Each bucket keeps at most `max_bars` input bars (earliest first); the rest
/// of the bucket is ignored.
#[derive(Debug, Clone)]
pub struct Condenser {
    bucket: Bucket,
    max_bars: usize,
}

impl Condenser {
    pub fn new(bucket: Bucket, max_bars: usize) -> Self {
        Self { bucket, max_bars }
    }

    /// Hourly bars to calendar days
    pub fn daily() -> Self {
        Self::new(Bucket::CalendarDay, HOURLY_BARS_PER_DAY)
    }

    pub fn bucket(&self) -> Bucket {
        self.bucket
    }

    pub fn max_bars(&self) -> usize {
        self.max_bars
    }

    pub fn condense(&self, candles: &[Candle]) -> Vec<Candle> {
        if candles.is_empty() || self.max_bars == 0 {
            return Vec::new();
        }

        let series = CandleSeries::from_candles(candles.iter().cloned());

        let mut buckets: BTreeMap<i64, Vec<&Candle>> = BTreeMap::new();
        for candle in series.as_slice() {
            let bars = buckets.entry(self.bucket.key(candle)).or_default();
            if bars.len() < self.max_bars {
                bars.push(candle);
            }
        }

        buckets
            .values()
            .filter_map(|bars| synthesize_candle(bars))
            .collect()
    }
}

impl Default for Condenser {
    fn default() -> Self {
        Self::daily()
    }
}

/// Condense `candles` into `bucket`-sized candles of at most `bars_per_group` bars each
pub fn condense(candles: &[Candle], bucket: Bucket, bars_per_group: usize) -> Vec<Candle> {
    Condenser::new(bucket, bars_per_group).condense(candles)
}

/// One candle from time-ordered bars; high and low come from opens and closes
fn synthesize_candle(bars: &[&Candle]) -> Option<Candle> {
    let first = bars.first()?;
    let last = bars.last()?;

    let high = bars
        .iter()
        .flat_map(|c| [c.open, c.close])
        .fold(f64::NEG_INFINITY, f64::max);
    let low = bars
        .iter()
        .flat_map(|c| [c.open, c.close])
        .fold(f64::INFINITY, f64::min);
    let volume: f64 = bars.iter().map(|c| c.volume).sum();

    Some(Candle::new(
        first.timestamp,
        first.open,
        high,
        low,
        last.close,
        volume,
    ))
}
