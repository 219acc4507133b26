use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use crate::api::{HoldingsSource, OrderSink, QuoteSource, TradeHistorySource};
use crate::error::EngineError;
use crate::models::{OrderAmount, TokenBalance, TradeEvent, TradeSide};

pub const WRAPPED_SOL: &str = "So11111111111111111111111111111111111111112";

#[derive(Debug, Default)]
struct PaperAccount {
    balance: f64,
    positions: HashMap<String, TokenBalance>,
    trades: Vec<TradeEvent>,
}

/// Simulated single-account broker that fills at the current quote
///
/// Balances are in SOL; fills are valued in USD using the SOL quote.
pub struct PaperBroker<Q> {
    quotes: Q,
    account: String,
    default_decimals: u8,
    state: Mutex<PaperAccount>,
}

impl<Q: QuoteSource> PaperBroker<Q> {
    pub fn new(quotes: Q, account: &str, starting_balance: f64) -> Self {
        Self {
            quotes,
            account: account.to_string(),
            default_decimals: 6,
            state: Mutex::new(PaperAccount {
                balance: starting_balance,
                ..PaperAccount::default()
            }),
        }
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, PaperAccount>, EngineError> {
        self.state
            .lock()
            .map_err(|e| EngineError::upstream("paper", e.to_string()))
    }

    /// Record a fill directly, e.g. to restore a position opened elsewhere
    pub fn record_fill(
        &self,
        asset: &str,
        decimals: u8,
        side: TradeSide,
        raw_amount: u64,
        quote_amount: f64,
        time: DateTime<Utc>,
    ) -> Result<TradeEvent, EngineError> {
        let mut state = self.lock()?;

        let position = state
            .positions
            .entry(asset.to_string())
            .or_insert_with(|| TokenBalance {
                asset: asset.to_string(),
                raw_amount: 0,
                decimals,
            });
        position.raw_amount = match side {
            TradeSide::Buy => position.raw_amount.saturating_add(raw_amount),
            TradeSide::Sell => position.raw_amount.saturating_sub(raw_amount),
        };
        if position.raw_amount == 0 {
            state.positions.remove(asset);
        }

        let tokens = raw_amount as f64 / 10f64.powi(decimals as i32);
        let event = TradeEvent {
            id: Uuid::new_v4(),
            asset: asset.to_string(),
            side,
            raw_amount,
            quote_amount,
            price: if tokens > 0.0 { quote_amount / tokens } else { 0.0 },
            time,
        };
        state.trades.push(event.clone());
        Ok(event)
    }

    async fn fill(&self, asset: &str, side: TradeSide, amount: OrderAmount) -> Result<(), EngineError> {
        let sol_usd = self
            .quotes
            .fetch_quote(WRAPPED_SOL)
            .await?
            .ok_or_else(|| EngineError::upstream("paper", "no SOL quote"))?;
        let token_usd = self
            .quotes
            .fetch_quote(asset)
            .await?
            .ok_or_else(|| EngineError::upstream("paper", format!("no quote for {}", asset)))?;

        let decimals = self
            .lock()?
            .positions
            .get(asset)
            .map(|p| p.decimals)
            .unwrap_or(self.default_decimals);
        let scale = 10f64.powi(decimals as i32);

        let rejected = |message: String| EngineError::Rejected {
            service: "paper".into(),
            status: 400,
            message,
        };

        match (side, amount) {
            (TradeSide::Buy, OrderAmount::Quote(sol)) => {
                {
                    let mut state = self.lock()?;
                    if sol <= 0.0 || sol > state.balance {
                        return Err(rejected(format!(
                            "cannot spend {} of {} SOL",
                            sol, state.balance
                        )));
                    }
                    state.balance -= sol;
                }
                let usd = sol * sol_usd;
                let raw = (usd / token_usd * scale).floor() as u64;
                self.record_fill(asset, decimals, side, raw, usd, Utc::now())?;
            }
            (TradeSide::Sell, OrderAmount::Raw(raw)) => {
                let held = self
                    .lock()?
                    .positions
                    .get(asset)
                    .map(|p| p.raw_amount)
                    .unwrap_or(0);
                if raw == 0 || raw > held {
                    return Err(rejected(format!("cannot sell {} of {} held", raw, held)));
                }
                let usd = raw as f64 / scale * token_usd;
                self.lock()?.balance += usd / sol_usd;
                self.record_fill(asset, decimals, side, raw, usd, Utc::now())?;
            }
            (side, amount) => {
                return Err(rejected(format!("{} order cannot be sized as {}", side, amount)));
            }
        }
        Ok(())
    }
}

impl<Q: QuoteSource> HoldingsSource for PaperBroker<Q> {
    async fn fetch_holdings(&self, _account: &str) -> Result<Vec<TokenBalance>, EngineError> {
        Ok(self.lock()?.positions.values().cloned().collect())
    }

    async fn fetch_balance(&self, _account: &str) -> Result<f64, EngineError> {
        Ok(self.lock()?.balance)
    }
}

impl<Q: QuoteSource> OrderSink for PaperBroker<Q> {
    async fn submit_order(&self, asset: &str, side: TradeSide, amount: OrderAmount) -> bool {
        match self.fill(asset, side, amount).await {
            Ok(()) => {
                tracing::info!("📝 Paper {} {} {}", side, asset, amount);
                true
            }
            Err(e) => {
                tracing::error!("Paper {} {} failed: {}", side, asset, e);
                false
            }
        }
    }
}

impl<Q: QuoteSource> TradeHistorySource for PaperBroker<Q> {
    async fn fetch_trades(&self, _account: &str, asset: &str) -> Result<Vec<TradeEvent>, EngineError> {
        Ok(self
            .lock()?
            .trades
            .iter()
            .filter(|t| t.asset == asset)
            .cloned()
            .collect())
    }
}
