//! Collaborator interfaces the decision engine consumes, plus the Birdeye
//! market data client that implements the market-side ones.

pub mod birdeye;
pub mod retry;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;

use crate::error::EngineError;
use crate::models::{
    Candle, MarketPool, OrderAmount, Token, TokenBalance, TokenSecurity, TradeEvent, TradeSide,
};

pub use birdeye::BirdeyeClient;
pub use retry::{RetryConfig, RetryPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CandleInterval {
    OneHour,
    OneDay,
}

impl CandleInterval {
    pub fn duration(&self) -> Duration {
        match self {
            CandleInterval::OneHour => Duration::hours(1),
            CandleInterval::OneDay => Duration::days(1),
        }
    }
}

/// Historical OHLCV bars
pub trait CandleSource: Send + Sync {
    /// Bars with timestamps in `[start, end]`; an asset with no trading returns an empty vec
    fn fetch_candles(
        &self,
        asset: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        interval: CandleInterval,
    ) -> impl Future<Output = Result<Vec<Candle>, EngineError>> + Send;
}

/// Current prices in USD
pub trait QuoteSource: Send + Sync {
    fn fetch_quote(
        &self,
        asset: &str,
    ) -> impl Future<Output = Result<Option<f64>, EngineError>> + Send;

    /// Prices for many assets; assets without a price are left out
    fn fetch_quotes(
        &self,
        assets: &[String],
    ) -> impl Future<Output = Result<HashMap<String, f64>, EngineError>> + Send {
        async move {
            let mut quotes = HashMap::new();
            for asset in assets {
                if let Some(price) = self.fetch_quote(asset).await? {
                    quotes.insert(asset.clone(), price);
                }
            }
            Ok(quotes)
        }
    }
}

/// Tokens ranked by traded volume, used for discovery
pub trait TokenListSource: Send + Sync {
    fn list_tokens(
        &self,
        min_volume_usd: f64,
    ) -> impl Future<Output = Result<Vec<Token>, EngineError>> + Send;
}

/// Security and market facts for vetting discovered tokens
pub trait TokenSafetySource: Send + Sync {
    /// `None` when the provider has no security record for the token
    fn fetch_security(
        &self,
        asset: &str,
    ) -> impl Future<Output = Result<Option<TokenSecurity>, EngineError>> + Send;

    /// Pools trading the token, deepest liquidity first
    fn fetch_markets(
        &self,
        asset: &str,
    ) -> impl Future<Output = Result<Vec<MarketPool>, EngineError>> + Send;
}

/// Authoritative account state
pub trait HoldingsSource: Send + Sync {
    fn fetch_holdings(
        &self,
        account: &str,
    ) -> impl Future<Output = Result<Vec<TokenBalance>, EngineError>> + Send;

    /// Spendable quote currency (SOL)
    fn fetch_balance(&self, account: &str)
        -> impl Future<Output = Result<f64, EngineError>> + Send;
}

/// Order placement
///
/// Buys carry `OrderAmount::Quote`, sells `OrderAmount::Raw`.
/// Returns whether the order filled.
pub trait OrderSink: Send + Sync {
    fn submit_order(
        &self,
        asset: &str,
        side: TradeSide,
        amount: OrderAmount,
    ) -> impl Future<Output = bool> + Send;
}

/// Past fills for an account
pub trait TradeHistorySource: Send + Sync {
    fn fetch_trades(
        &self,
        account: &str,
        asset: &str,
    ) -> impl Future<Output = Result<Vec<TradeEvent>, EngineError>> + Send;
}
