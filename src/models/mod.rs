use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::EngineError;

/// State of a derived metric on a candle
///
/// Metrics start `Pending`, are computed exactly once, and end up either
/// `Value` or `Insufficient` when the window lacks coverage.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "state", content = "value", rename_all = "snake_case")]
pub enum Indicator {
    #[default]
    Pending,
    Insufficient,
    Value(f64),
}

impl Indicator {
    pub fn from_option(value: Option<f64>) -> Self {
        match value {
            Some(v) => Indicator::Value(v),
            None => Indicator::Insufficient,
        }
    }

    pub fn value(&self) -> Option<f64> {
        match self {
            Indicator::Value(v) => Some(*v),
            _ => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Indicator::Pending)
    }
}

/// Names of the per-candle metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndicatorKind {
    VolumeSum3h,
    VolumeAvg24h,
    VolumeAvg168h,
    Ema24h,
    Sma24h,
    Sma168h,
    PctChange3h,
    PctChange24h,
}

impl fmt::Display for IndicatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IndicatorKind::VolumeSum3h => "3h volume sum",
            IndicatorKind::VolumeAvg24h => "24h volume average",
            IndicatorKind::VolumeAvg168h => "168h volume average",
            IndicatorKind::Ema24h => "24h EMA",
            IndicatorKind::Sma24h => "24h SMA",
            IndicatorKind::Sma168h => "168h SMA",
            IndicatorKind::PctChange3h => "3h percent change",
            IndicatorKind::PctChange24h => "24h percent change",
        };
        f.write_str(name)
    }
}

/// Derived metrics attached to a single candle
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CandleIndicators {
    pub volume_sum_3h: Indicator,
    pub volume_avg_24h: Indicator,
    pub volume_avg_168h: Indicator,
    pub ema_24h: Indicator,
    pub sma_24h: Indicator,
    pub sma_168h: Indicator,
    pub pct_change_3h: Indicator,
    pub pct_change_24h: Indicator,
}

impl CandleIndicators {
    pub fn get(&self, kind: IndicatorKind) -> Indicator {
        match kind {
            IndicatorKind::VolumeSum3h => self.volume_sum_3h,
            IndicatorKind::VolumeAvg24h => self.volume_avg_24h,
            IndicatorKind::VolumeAvg168h => self.volume_avg_168h,
            IndicatorKind::Ema24h => self.ema_24h,
            IndicatorKind::Sma24h => self.sma_24h,
            IndicatorKind::Sma168h => self.sma_168h,
            IndicatorKind::PctChange3h => self.pct_change_3h,
            IndicatorKind::PctChange24h => self.pct_change_24h,
        }
    }
}

/// OHLCV candlestick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    #[serde(default)]
    pub indicators: CandleIndicators,
}

impl Candle {
    pub fn new(
        timestamp: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
            indicators: CandleIndicators::default(),
        }
    }

    /// Midpoint of the bar's range
    pub fn midpoint(&self) -> f64 {
        (self.high + self.low) / 2.0
    }
}

/// All-time-high and drawdown facts for one candle series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrawdownSignals {
    pub ath_price: f64,
    pub ath_time: DateTime<Utc>,
    /// Lowest low strictly after the ATH; unset when the ATH is the newest bar
    pub drawdown_price: Option<f64>,
    pub drawdown_time: Option<DateTime<Utc>>,
    pub drawdown_percent: Option<f64>,
    /// First bar of the first qualifying run of closes below the dip threshold
    pub dip_run_start: Option<DateTime<Utc>>,
}

/// Everything known about a token for one evaluation pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenSignal {
    pub asset: String,
    pub created_at: DateTime<Utc>,
    pub candles: Vec<Candle>,
    pub signals: DrawdownSignals,
}

impl TokenSignal {
    pub fn ath_price(&self) -> f64 {
        self.signals.ath_price
    }

    pub fn drawdown_percent(&self) -> Option<f64> {
        self.signals.drawdown_percent
    }
}

/// Metadata for a tradeable token
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Token {
    pub address: String,
    pub symbol: String,
    pub name: String,
    pub decimals: u8,
    #[serde(default)]
    pub volume_24h_usd: f64,
    #[serde(default)]
    pub price: f64,
}

/// Raw token balance of an account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenBalance {
    pub asset: String,
    pub raw_amount: u64,
    pub decimals: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl fmt::Display for TradeSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeSide::Buy => f.write_str("buy"),
            TradeSide::Sell => f.write_str("sell"),
        }
    }
}

/// Size of an order
///
/// Buys spend quote currency (SOL); sells give up raw token units, which
/// stay integral so a full exit always matches the held balance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderAmount {
    Quote(f64),
    Raw(u64),
}

impl fmt::Display for OrderAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderAmount::Quote(sol) => write!(f, "{} SOL", sol),
            OrderAmount::Raw(raw) => write!(f, "{} raw", raw),
        }
    }
}

/// Mint and holder facts used to vet a discovered token
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenSecurity {
    pub update_authority: Option<String>,
    pub creation_time: Option<DateTime<Utc>>,
    pub freezeable: Option<bool>,
    /// Share of supply held by the ten largest holders, 0..=1
    pub top10_holder_percent: Option<f64>,
}

/// A trading pool for a token on some DEX
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketPool {
    pub address: String,
    /// DEX name as reported, e.g. "Raydium"
    pub source: String,
    pub created_at: Option<DateTime<Utc>>,
    pub volume_24h_usd: Option<f64>,
    pub liquidity_usd: Option<f64>,
}

/// A filled order as reported by the account history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeEvent {
    pub id: Uuid,
    pub asset: String,
    pub side: TradeSide,
    /// Token amount in raw (smallest) units
    pub raw_amount: u64,
    /// Quote currency paid or received
    pub quote_amount: f64,
    /// Quote price per whole token at fill time
    pub price: f64,
    pub time: DateTime<Utc>,
}

/// Aggregated position in one asset, rebuilt every polling cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holding {
    pub asset: String,
    pub decimals: u8,
    pub buy_time: DateTime<Utc>,
    pub buy_amount_raw: u64,
    /// Total quote currency spent
    pub buy_price_total: f64,
    /// Quote price per whole token
    pub buy_price_per_token: f64,
    pub current_amount_raw: u64,
    pub sell_count: u32,
    pub sell_amount_raw: u64,
    pub sell_amount_quote: f64,
    pub sell_percent: f64,
    pub sell_percent_remaining: f64,
    pub initial_stop_price: f64,
    /// Tier stop from the latest exit evaluation, see `Holding::apply`
    pub stop_price: Option<f64>,
}

impl Holding {
    fn scale(&self) -> f64 {
        10f64.powi(self.decimals as i32)
    }

    pub fn current_amount(&self) -> f64 {
        self.current_amount_raw as f64 / self.scale()
    }

    pub fn buy_amount(&self) -> f64 {
        self.buy_amount_raw as f64 / self.scale()
    }

    /// Share of the original buy still held
    pub fn remaining_fraction(&self) -> Option<f64> {
        if self.buy_amount_raw == 0 {
            return None;
        }
        Some(self.current_amount_raw as f64 / self.buy_amount_raw as f64)
    }

    pub fn age_hours(&self, now: DateTime<Utc>) -> f64 {
        (now - self.buy_time).num_seconds() as f64 / 3600.0
    }

    /// Reject holdings whose sell bookkeeping is inconsistent
    pub fn validate(&self) -> Result<(), EngineError> {
        let malformed = |reason: String| EngineError::MalformedHolding {
            asset: self.asset.clone(),
            reason,
        };

        if !(0.0..=1.0).contains(&self.sell_percent)
            || !(0.0..=1.0).contains(&self.sell_percent_remaining)
        {
            return Err(malformed(format!(
                "sell percentages out of range ({}, {})",
                self.sell_percent, self.sell_percent_remaining
            )));
        }
        if (self.sell_percent + self.sell_percent_remaining - 1.0).abs() > 1e-9 {
            return Err(malformed(format!(
                "sell percentages do not sum to 1 ({} + {})",
                self.sell_percent, self.sell_percent_remaining
            )));
        }
        if self.buy_amount_raw == 0 {
            return Err(malformed("zero buy amount".to_string()));
        }
        if self.buy_price_per_token <= 0.0 {
            return Err(malformed("non-positive buy price".to_string()));
        }
        Ok(())
    }
}

/// One row of the exit policy, active on `(lower, upper]` of the remaining fraction
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExitTier {
    pub lower: f64,
    pub upper: f64,
    pub stop_pct: f64,
    pub profit_pct: f64,
    pub sell_fraction: f64,
}

impl ExitTier {
    pub fn contains(&self, fraction: f64) -> bool {
        fraction > self.lower && fraction <= self.upper
    }
}
