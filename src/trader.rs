use chrono::{DateTime, Duration, Timelike, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};

use crate::api::{
    CandleInterval, CandleSource, HoldingsSource, OrderSink, QuoteSource, TokenListSource,
    TokenSafetySource, TradeHistorySource,
};
use crate::config::Settings;
use crate::error::EngineError;
use crate::execution::{ExitAction, ExitStrategyEngine, PositionTracker};
use crate::indicators::IndicatorEngine;
use crate::models::{OrderAmount, TokenBalance, TradeSide};
use crate::strategy::{DrawdownScreen, EntryDecision, EntryGate, TokenSafety, Watchlist};

/// Outcome of one buyer or seller pass
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TickSummary {
    /// Assets (or holdings) that reached a decision
    pub evaluated: usize,
    /// Assets with a filled order
    pub filled: Vec<String>,
    /// Per-asset failures that were logged and skipped
    pub failed: usize,
}

/// Drives the buyer and seller passes against market data and a broker
///
/// Single-task: ticks take `&mut self` and never run concurrently.
pub struct Trader<M, B> {
    settings: Settings,
    market: M,
    broker: B,
    gate: EntryGate,
    screen: DrawdownScreen,
    safety: TokenSafety,
    exits: ExitStrategyEngine,
    tracker: PositionTracker,
    watchlist: Watchlist,
    recent_buys: HashMap<String, DateTime<Utc>>,
    watchlist_refreshed: Option<DateTime<Utc>>,
}

impl<M, B> Trader<M, B>
where
    M: CandleSource + QuoteSource + TokenListSource + TokenSafetySource,
    B: HoldingsSource + OrderSink + TradeHistorySource,
{
    pub fn new(settings: Settings, market: M, broker: B) -> Self {
        let engine = IndicatorEngine::new(settings.indicators.clone());
        Self {
            gate: EntryGate::new(settings.entry.clone(), engine),
            screen: DrawdownScreen::new(settings.drawdown.clone()),
            safety: TokenSafety::new(settings.safety.clone()),
            exits: ExitStrategyEngine::new(settings.exit.clone()),
            tracker: PositionTracker::new(settings.exit.initial_stop_percent_change),
            watchlist: Watchlist::new(),
            recent_buys: HashMap::new(),
            watchlist_refreshed: None,
            settings,
            market,
            broker,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn market(&self) -> &M {
        &self.market
    }

    pub fn broker(&self) -> &B {
        &self.broker
    }

    pub fn watchlist(&self) -> &Watchlist {
        &self.watchlist
    }

    pub fn watchlist_refreshed(&self) -> Option<DateTime<Utc>> {
        self.watchlist_refreshed
    }

    /// Whether `asset` was bought within the recent-buy window ending at `now`
    pub fn recently_bought(&self, asset: &str, now: DateTime<Utc>) -> bool {
        self.recent_buys
            .get(asset)
            .is_some_and(|t| now - *t < Duration::minutes(self.settings.recent_buy_minutes))
    }

    /// Volume-ranked tokens from the market, empty when discovery is off or fails
    async fn discovered(&self) -> Vec<String> {
        if !self.settings.discovery.enabled {
            return Vec::new();
        }
        match self
            .market
            .list_tokens(self.settings.discovery.min_volume_usd)
            .await
        {
            Ok(tokens) => {
                tracing::debug!("Discovered {} tokens", tokens.len());
                tokens.into_iter().map(|t| t.address).collect()
            }
            Err(e) => {
                tracing::warn!("Token discovery failed: {}", e);
                Vec::new()
            }
        }
    }

    /// Configured candidates followed by `extra`, deduplicated, minus exclusions
    fn with_configured(&self, extra: Vec<String>) -> Vec<String> {
        let mut assets = self.settings.candidates.clone();
        assets.extend(extra);

        let mut seen = HashSet::new();
        assets.retain(|a| seen.insert(a.clone()));
        self.settings
            .exclusions
            .retain_allowed(assets, |a| a.as_str())
    }

    /// Configured candidates followed by discovered ones, minus exclusions
    pub async fn candidates(&self) -> Vec<String> {
        let discovered = self.discovered().await;
        self.with_configured(discovered)
    }

    /// Keep discovered tokens that pass security and market vetting
    ///
    /// Configured candidates and excluded tokens pass through untouched.
    pub async fn vet(&self, assets: Vec<String>, now: DateTime<Utc>) -> Vec<String> {
        if !self.safety.config().enabled {
            return assets;
        }

        let mut passed = Vec::new();
        for asset in assets {
            if self.settings.candidates.contains(&asset) || self.settings.exclusions.contains(&asset) {
                passed.push(asset);
                continue;
            }
            match self.vet_one(&asset, now).await {
                Ok((true, reason)) => {
                    tracing::debug!("  ✓ {} vetted: {}", asset, reason);
                    passed.push(asset);
                }
                Ok((false, reason)) => tracing::info!("  {} failed vetting: {}", asset, reason),
                Err(e) => tracing::warn!("  ✗ {} vetting failed: {}", asset, e),
            }
        }
        passed
    }

    /// Security first; pools are only fetched for tokens that pass it
    async fn vet_one(&self, asset: &str, now: DateTime<Utc>) -> Result<(bool, String), EngineError> {
        let security = self.market.fetch_security(asset).await?;
        let (passed, reason) = self.safety.check_security(security.as_ref(), now);
        if !passed {
            return Ok((false, reason));
        }
        let markets = self.market.fetch_markets(asset).await?;
        Ok(self.safety.is_safe_token(security.as_ref(), &markets, now))
    }

    /// Evaluate the entry gate for one asset over the configured history
    pub async fn scan(&self, asset: &str, now: DateTime<Utc>) -> Result<EntryDecision, EngineError> {
        let start = now - Duration::days(self.settings.entry.history_days);
        let candles = self
            .market
            .fetch_candles(asset, start, now, CandleInterval::OneHour)
            .await?;
        Ok(self.gate.evaluate_candles(candles))
    }

    /// Buyer pass: run every candidate through the entry gate and buy passes
    pub async fn entry_tick(&mut self, now: DateTime<Utc>) -> Result<TickSummary, EngineError> {
        self.prune_recent_buys(now);
        let held = self.held_assets().await?;
        let candidates = self.candidates().await;
        tracing::info!("💹 [BUYER] Evaluating {} candidates", candidates.len());

        let mut summary = TickSummary::default();
        for asset in candidates {
            if held.contains(&asset) || self.recently_bought(&asset, now) {
                tracing::debug!("Skipping {}: held or recently bought", asset);
                continue;
            }

            let decision = match self.scan(&asset, now).await {
                Ok(d) => d,
                Err(e) => {
                    tracing::warn!("  ✗ {} candle fetch failed: {}", asset, e);
                    summary.failed += 1;
                    continue;
                }
            };
            summary.evaluated += 1;

            if !decision.passed {
                let reasons: Vec<String> = decision.reasons.iter().map(|r| r.to_string()).collect();
                tracing::info!("  {} rejected: {}", asset, reasons.join("; "));
                continue;
            }

            tracing::info!("  ✓ {} passed the entry gate", asset);
            if self.buy(&asset, now).await {
                summary.filled.push(asset);
            }
        }
        Ok(summary)
    }

    /// Rebuild the drawdown watchlist from daily-condensed history
    pub async fn refresh_watchlist(&mut self, now: DateTime<Utc>) -> usize {
        let start = now - Duration::days(self.settings.drawdown.history_days);
        let mut signals = Vec::new();

        let discovered = self.discovered().await;
        let vetted = self.vet(discovered, now).await;
        for asset in self.with_configured(vetted) {
            let hourly = match self
                .market
                .fetch_candles(&asset, start, now, CandleInterval::OneHour)
                .await
            {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!("  ✗ {} history fetch failed: {}", asset, e);
                    continue;
                }
            };
            match self.screen.screen(&asset, &hourly, now) {
                Ok(signal) => {
                    tracing::info!(
                        "  ✓ {} on watchlist: ATH {:.6}, drawdown {:.1}%",
                        asset,
                        signal.ath_price(),
                        signal.drawdown_percent().unwrap_or(0.0) * 100.0
                    );
                    signals.push(signal);
                }
                Err(reason) => tracing::debug!("  {} screened out: {}", asset, reason),
            }
        }

        self.watchlist.replace(signals);
        self.watchlist_refreshed = Some(now);
        tracing::info!("🔍 Watchlist refreshed: {} tokens", self.watchlist.len());
        self.watchlist.len()
    }

    /// Whether the watchlist should be rebuilt at `now`
    ///
    /// Due on first use, once `refresh_hours` have passed, or on a new UTC
    /// day once past `new_day_after_minute`.
    pub fn watchlist_due(&self, now: DateTime<Utc>) -> bool {
        let Some(last) = self.watchlist_refreshed else {
            return true;
        };
        let discovery = &self.settings.discovery;
        if now - last >= Duration::hours(discovery.refresh_hours) {
            return true;
        }
        last.date_naive() != now.date_naive() && now.minute() > discovery.new_day_after_minute
    }

    /// Drop stale watchlist entries and buy tokens that reclaimed their ATH
    pub async fn watchlist_tick(&mut self, now: DateTime<Utc>) -> Result<TickSummary, EngineError> {
        if self.watchlist_due(now) {
            self.refresh_watchlist(now).await;
        }

        let mut summary = TickSummary::default();
        if self.watchlist.is_empty() {
            return Ok(summary);
        }

        let assets = self.watchlist.assets();
        let quotes = match self.market.fetch_quotes(&assets).await {
            Ok(q) => q,
            Err(e) => {
                tracing::warn!("Watchlist quotes failed: {}", e);
                summary.failed = assets.len();
                return Ok(summary);
            }
        };

        let screen = &self.screen;
        self.watchlist
            .retain(|s| screen.keep_on_watchlist(s, quotes.get(&s.asset).copied()));

        let held = self.held_assets().await?;
        let mut breakouts: Vec<String> = self
            .watchlist
            .assets()
            .into_iter()
            .filter(|a| {
                self.watchlist
                    .get(a)
                    .is_some_and(|s| self.screen.is_breakout(s, quotes.get(a).copied()))
            })
            .collect();
        breakouts.sort();
        summary.evaluated = self.watchlist.len();

        for asset in breakouts {
            if held.contains(&asset) || self.recently_bought(&asset, now) {
                continue;
            }
            tracing::info!("🚀 {} broke above its ATH", asset);
            if self.buy(&asset, now).await {
                self.watchlist.retain(|s| s.asset != asset);
                summary.filled.push(asset);
            }
        }
        Ok(summary)
    }

    /// Seller pass: evaluate exits for every held asset
    ///
    /// `evaluated` in the summary is the number of holdings considered.
    pub async fn exit_tick(&mut self, now: DateTime<Utc>) -> Result<TickSummary, EngineError> {
        let balances = self.holdings().await?;
        let mut summary = TickSummary {
            evaluated: balances.len(),
            ..TickSummary::default()
        };
        if balances.is_empty() {
            return Ok(summary);
        }
        tracing::info!("📉 [SELLER] Checking {} holdings", balances.len());

        for balance in balances {
            match self.exit_one(&balance, now).await {
                Ok(true) => summary.filled.push(balance.asset),
                Ok(false) => {}
                Err(e) => {
                    if e.is_per_asset() {
                        tracing::warn!("  ✗ {} skipped: {}", balance.asset, e);
                    } else {
                        tracing::error!("  ✗ {} exit failed: {}", balance.asset, e);
                    }
                    summary.failed += 1;
                }
            }
        }
        Ok(summary)
    }

    async fn exit_one(&self, balance: &TokenBalance, now: DateTime<Utc>) -> Result<bool, EngineError> {
        let asset = &balance.asset;
        let trades = self
            .broker
            .fetch_trades(&self.settings.account, asset)
            .await?;
        let Some(mut holding) = self
            .tracker
            .build(asset, balance.decimals, &trades, balance.raw_amount)
        else {
            tracing::warn!("  {} has no buy history, skipping", asset);
            return Ok(false);
        };

        let Some(price) = self.market.fetch_quote(asset).await? else {
            tracing::warn!("  {} has no quote, skipping", asset);
            return Ok(false);
        };

        let decision = self.exits.evaluate_exit(&holding, price, now)?;
        holding.apply(&decision);
        let amount = match decision.action {
            ExitAction::None => {
                tracing::debug!(
                    "  {} holding at {:.6} (stop {:.6?}, target {:.6})",
                    asset,
                    price,
                    holding.stop_price,
                    decision.profit_price
                );
                return Ok(false);
            }
            ExitAction::SellPartial { amount } | ExitAction::SellAll { amount } => amount,
        };

        tracing::info!(
            "  {} {:?}: selling {} raw at {:.6} ({:?})",
            asset,
            decision.reason,
            amount,
            price,
            decision.state
        );
        Ok(self
            .broker
            .submit_order(asset, TradeSide::Sell, OrderAmount::Raw(amount))
            .await)
    }

    async fn buy(&mut self, asset: &str, now: DateTime<Utc>) -> bool {
        let balance = match self.broker.fetch_balance(&self.settings.account).await {
            Ok(b) => b,
            Err(e) => {
                tracing::error!("Balance fetch failed, not buying {}: {}", asset, e);
                return false;
            }
        };
        let amount = self.settings.sizing.buy_amount(balance);
        tracing::info!("  Buying {} with {:.4} SOL", asset, amount);

        let filled = self
            .broker
            .submit_order(asset, TradeSide::Buy, OrderAmount::Quote(amount))
            .await;
        if filled {
            self.recent_buys.insert(asset.to_string(), now);
        } else {
            tracing::warn!("  ✗ Buy of {} did not fill", asset);
        }
        filled
    }

    /// Non-dust, non-excluded balances
    async fn holdings(&self) -> Result<Vec<TokenBalance>, EngineError> {
        let balances: Vec<TokenBalance> = self
            .broker
            .fetch_holdings(&self.settings.account)
            .await?
            .into_iter()
            .filter(|b| b.raw_amount > self.settings.min_holding_raw)
            .collect();
        Ok(self
            .settings
            .exclusions
            .retain_allowed(balances, |b| b.asset.as_str()))
    }

    async fn held_assets(&self) -> Result<HashSet<String>, EngineError> {
        Ok(self
            .holdings()
            .await?
            .into_iter()
            .map(|b| b.asset)
            .collect())
    }

    fn prune_recent_buys(&mut self, now: DateTime<Utc>) {
        let window = Duration::minutes(self.settings.recent_buy_minutes);
        self.recent_buys.retain(|_, t| now - *t < window);
    }
}
