use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::ops::Bound;

use crate::models::{Candle, CandleIndicators};

/// Candles of one asset, kept sorted by timestamp with no duplicate timestamps
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CandleSeries {
    candles: Vec<Candle>,
}

impl CandleSeries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a series from arbitrary input, keeping the first candle seen per timestamp
    pub fn from_candles(candles: impl IntoIterator<Item = Candle>) -> Self {
        let mut series = Self::new();
        series.extend_unique(candles);
        series
    }

    /// Insert a candle unless one with the same timestamp is already present
    ///
    /// Returns `true` if the candle was inserted.
    pub fn append_unique(&mut self, candle: Candle) -> bool {
        // Fast path: fetches arrive in ascending order
        if self
            .candles
            .last()
            .map_or(true, |last| last.timestamp < candle.timestamp)
        {
            self.candles.push(candle);
            return true;
        }

        match self
            .candles
            .binary_search_by(|c| c.timestamp.cmp(&candle.timestamp))
        {
            Ok(_) => false,
            Err(idx) => {
                self.candles.insert(idx, candle);
                true
            }
        }
    }

    /// Insert many candles, returning how many were new
    pub fn extend_unique(&mut self, candles: impl IntoIterator<Item = Candle>) -> usize {
        candles
            .into_iter()
            .map(|c| self.append_unique(c) as usize)
            .sum()
    }

    /// Candles whose timestamps fall within the given bounds
    pub fn window(&self, lower: Bound<DateTime<Utc>>, upper: Bound<DateTime<Utc>>) -> &[Candle] {
        let start = match lower {
            Bound::Included(t) => self.candles.partition_point(|c| c.timestamp < t),
            Bound::Excluded(t) => self.candles.partition_point(|c| c.timestamp <= t),
            Bound::Unbounded => 0,
        };
        let end = match upper {
            Bound::Included(t) => self.candles.partition_point(|c| c.timestamp <= t),
            Bound::Excluded(t) => self.candles.partition_point(|c| c.timestamp < t),
            Bound::Unbounded => self.candles.len(),
        };

        if start >= end {
            &[]
        } else {
            &self.candles[start..end]
        }
    }

    pub fn position(&self, timestamp: DateTime<Utc>) -> Option<usize> {
        self.candles
            .binary_search_by(|c| c.timestamp.cmp(&timestamp))
            .ok()
    }

    pub fn at(&self, timestamp: DateTime<Utc>) -> Option<&Candle> {
        self.position(timestamp).map(|idx| &self.candles[idx])
    }

    pub fn latest(&self) -> Option<&Candle> {
        self.candles.last()
    }

    pub fn get(&self, idx: usize) -> Option<&Candle> {
        self.candles.get(idx)
    }

    /// Mutable access to derived metrics only; prices and timestamps stay fixed
    pub fn indicators_mut(&mut self, idx: usize) -> Option<&mut CandleIndicators> {
        self.candles.get_mut(idx).map(|c| &mut c.indicators)
    }

    pub fn as_slice(&self) -> &[Candle] {
        &self.candles
    }

    pub fn into_vec(self) -> Vec<Candle> {
        self.candles
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }
}

/// In-memory candle series for many assets
#[derive(Debug, Default)]
pub struct CandleStore {
    data: HashMap<String, CandleSeries>,
}

impl CandleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a candle for an asset; duplicates by timestamp are ignored
    pub fn append_unique(&mut self, asset: &str, candle: Candle) -> bool {
        self.data
            .entry(asset.to_string())
            .or_default()
            .append_unique(candle)
    }

    pub fn extend_unique(&mut self, asset: &str, candles: Vec<Candle>) -> usize {
        self.data
            .entry(asset.to_string())
            .or_default()
            .extend_unique(candles)
    }

    pub fn series(&self, asset: &str) -> Option<&CandleSeries> {
        self.data.get(asset)
    }

    pub fn series_mut(&mut self, asset: &str) -> Option<&mut CandleSeries> {
        self.data.get_mut(asset)
    }

    /// Remove and return the series for an asset
    pub fn take(&mut self, asset: &str) -> Option<CandleSeries> {
        self.data.remove(asset)
    }

    pub fn candle_count(&self, asset: &str) -> usize {
        self.data.get(asset).map(|s| s.len()).unwrap_or(0)
    }

    pub fn assets(&self) -> Vec<String> {
        self.data.keys().cloned().collect()
    }

    pub fn clear_asset(&mut self, asset: &str) {
        self.data.remove(asset);
    }

    pub fn clear_all(&mut self) {
        self.data.clear();
    }
}
