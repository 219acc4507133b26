use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{MarketPool, TokenSecurity};

/// Pump.fun mint update authorities
pub const PUMP_UPDATE_AUTHORITIES: &[&str] = &[
    "TSLvdd1pWpHVjahSpsvCXUbgwsL3JAcvokwaKt1eokM",
    "WLHv2UAZm6z4KyaaELi5pjdbJh6RESMva1Rnn8pJVVh",
];

/// DEX sources a discovered token may trade on, compared case-insensitively
pub const DEFAULT_MARKET_SOURCES: &[&str] =
    &["Pump Amm", "Raydium", "Raydium Cp", "Raydium CPMM"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenSafetyConfig {
    /// Vet discovered tokens before they reach the watchlist
    pub enabled: bool,
    /// Empty accepts any update authority
    pub allowed_update_authorities: Vec<String>,
    /// Minimum age of both the token and its pool
    pub min_age_days: i64,
    pub max_top10_holder_percent: f64,
    pub allowed_market_sources: Vec<String>,
    pub min_market_volume_usd: f64,
    pub min_market_liquidity_usd: f64,
}

impl Default for TokenSafetyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allowed_update_authorities: PUMP_UPDATE_AUTHORITIES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            min_age_days: 14,
            max_top10_holder_percent: 0.5,
            allowed_market_sources: DEFAULT_MARKET_SOURCES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            min_market_volume_usd: 100_000.0,
            min_market_liquidity_usd: 100_000.0,
        }
    }
}

/// Security and market vetting for discovered tokens
#[derive(Debug, Clone, Default)]
pub struct TokenSafety {
    config: TokenSafetyConfig,
}

impl TokenSafety {
    pub fn new(config: TokenSafetyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TokenSafetyConfig {
        &self.config
    }

    fn old_enough(&self, created: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now - created >= Duration::days(self.config.min_age_days)
    }

    /// Mint-level checks, in order:
    /// 1. A security record exists
    /// 2. Update authority is on the allow list
    /// 3. Token is at least `min_age_days` old
    /// 4. Mint cannot freeze accounts
    /// 5. Top 10 holders own at most `max_top10_holder_percent`
    ///
    /// Returns (passed, reason) tuple
    pub fn check_security(
        &self,
        security: Option<&TokenSecurity>,
        now: DateTime<Utc>,
    ) -> (bool, String) {
        let c = &self.config;

        let Some(security) = security else {
            return (false, "NoSecurityData".to_string());
        };

        if !c.allowed_update_authorities.is_empty() {
            let allowed = security
                .update_authority
                .as_ref()
                .is_some_and(|a| c.allowed_update_authorities.contains(a));
            if !allowed {
                return (
                    false,
                    format!(
                        "UpdateAuthority: {} not allowed",
                        security.update_authority.as_deref().unwrap_or("none")
                    ),
                );
            }
        }

        match security.creation_time {
            None => return (false, "NoCreationDate".to_string()),
            Some(created) if !self.old_enough(created, now) => {
                return (false, format!("TooNew: created {}", created.format("%Y-%m-%d")));
            }
            Some(_) => {}
        }

        if security.freezeable == Some(true) {
            return (false, "Freezeable".to_string());
        }

        if let Some(top10) = security.top10_holder_percent {
            if top10 > c.max_top10_holder_percent {
                return (
                    false,
                    format!("ConcentratedHolders: top 10 hold {:.1}%", top10 * 100.0),
                );
            }
        }

        (true, "Passed security".to_string())
    }

    /// Security checks, then a qualifying pool from `pick_market`
    ///
    /// Returns (is_safe, reason) tuple
    pub fn is_safe_token(
        &self,
        security: Option<&TokenSecurity>,
        markets: &[MarketPool],
        now: DateTime<Utc>,
    ) -> (bool, String) {
        let (passed, reason) = self.check_security(security, now);
        if !passed {
            return (false, reason);
        }

        match self.pick_market(markets, now) {
            Some(pool) => (true, format!("Market: {} {}", pool.source, pool.address)),
            None => (false, format!("NoQualifyingMarket: {} pools checked", markets.len())),
        }
    }

    /// First pool on an allowed DEX that is old, liquid and active enough
    pub fn pick_market<'a>(
        &self,
        markets: &'a [MarketPool],
        now: DateTime<Utc>,
    ) -> Option<&'a MarketPool> {
        let c = &self.config;
        markets.iter().find(|pool| {
            let source_ok = c
                .allowed_market_sources
                .iter()
                .any(|s| s.eq_ignore_ascii_case(&pool.source));
            let age_ok = pool.created_at.map_or(true, |t| self.old_enough(t, now));
            let volume_ok = pool.volume_24h_usd.is_some_and(|v| v >= c.min_market_volume_usd);
            let liquidity_ok = pool.liquidity_usd.is_some_and(|l| l >= c.min_market_liquidity_usd);

            if source_ok && !(age_ok && volume_ok && liquidity_ok) {
                tracing::debug!(
                    "Pool {} on {} rejected (age ok {}, volume {:?}, liquidity {:?})",
                    pool.address,
                    pool.source,
                    age_ok,
                    pool.volume_24h_usd,
                    pool.liquidity_usd
                );
            }
            source_ok && age_ok && volume_ok && liquidity_ok
        })
    }
}
