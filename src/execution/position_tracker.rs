use crate::models::{Holding, TradeEvent, TradeSide};

/// Rebuilds holdings from fill history and live balances
#[derive(Debug, Clone)]
pub struct PositionTracker {
    initial_stop_percent_change: f64,
}

impl PositionTracker {
    pub fn new(initial_stop_percent_change: f64) -> Self {
        Self {
            initial_stop_percent_change,
        }
    }

    /// Aggregate the fills for `asset` with its current raw balance
    ///
    /// Returns `None` when there is no buy to anchor the position.
    pub fn build(
        &self,
        asset: &str,
        decimals: u8,
        events: &[TradeEvent],
        current_amount_raw: u64,
    ) -> Option<Holding> {
        let buys: Vec<&TradeEvent> = events
            .iter()
            .filter(|e| e.asset == asset && e.side == TradeSide::Buy)
            .collect();

        let buy_time = buys.iter().map(|b| b.time).min()?;
        let buy_amount_raw = buys
            .iter()
            .fold(0u64, |acc, b| acc.saturating_add(b.raw_amount));
        let buy_price_total: f64 = buys.iter().map(|b| b.quote_amount).sum();

        let (sell_count, sell_amount_raw, sell_amount_quote) = events
            .iter()
            .filter(|e| e.asset == asset && e.side == TradeSide::Sell)
            .fold((0u32, 0u64, 0.0), |(n, raw, quote), e| {
                (n + 1, raw.saturating_add(e.raw_amount), quote + e.quote_amount)
            });

        let scale = 10f64.powi(decimals as i32);
        let buy_tokens = buy_amount_raw as f64 / scale;
        let buy_price_per_token = if buy_tokens > 0.0 {
            buy_price_total / buy_tokens
        } else {
            0.0
        };

        let sell_percent_remaining = if buy_amount_raw > 0 {
            current_amount_raw as f64 / buy_amount_raw as f64
        } else {
            0.0
        };

        Some(Holding {
            asset: asset.to_string(),
            decimals,
            buy_time,
            buy_amount_raw,
            buy_price_total,
            buy_price_per_token,
            current_amount_raw,
            sell_count,
            sell_amount_raw,
            sell_amount_quote,
            sell_percent: 1.0 - sell_percent_remaining,
            sell_percent_remaining,
            initial_stop_price: buy_price_per_token * (1.0 + self.initial_stop_percent_change),
            stop_price: None,
        })
    }
}

impl Default for PositionTracker {
    fn default() -> Self {
        Self::new(-0.5)
    }
}
