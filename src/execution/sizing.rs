use serde::{Deserialize, Serialize};

/// Buy size in quote currency (SOL) for a given account balance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BetSizing {
    pub bet_amount: f64,
    /// Balance always left untouched for fees and exits
    pub reserve: f64,
    /// Token purchase used to mark an asset as seen when funds are short
    pub dust_amount: f64,
}

impl Default for BetSizing {
    fn default() -> Self {
        Self {
            bet_amount: 1.0,
            reserve: 2.0,
            dust_amount: 0.001,
        }
    }
}

impl BetSizing {
    pub fn buy_amount(&self, balance: f64) -> f64 {
        if balance <= self.reserve {
            tracing::warn!("Insufficient balance {:.4}, buying dust", balance);
            self.dust_amount
        } else if self.bet_amount + self.reserve > balance {
            tracing::warn!("Balance {:.4} below bet plus reserve", balance);
            round_cents(balance - self.reserve)
        } else if balance / 2.0 > self.bet_amount {
            tracing::info!("Balance {:.4} more than double the bet", balance);
            round_cents(balance / 2.0)
        } else {
            self.bet_amount
        }
    }
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
