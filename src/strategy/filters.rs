use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Stablecoins, wrapped SOL and liquid staking tokens never traded by the bot
pub const DEFAULT_EXCLUDED: &[&str] = &[
    "So11111111111111111111111111111111111111112",
    "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v",
    "6p6xgHyF7AeE6TZkSmFsko444wqoP15icUSqi2jfGiPN",
    "Es9vMFrzaCERmJfrF4H2FYD4KCoNkY11McCe8BenwNYB",
    "3NZ9JMVBmGAqocybic2c7LQCJScmgsAZ6vQqTDzcqmJh",
    "8x5VqbHA8D7NkD52uNuS5nnt3PwA8pLD34ymskeSo2Wn",
    "2qEHjDLDLbuBgRYvsxhc5D6uDWAivNFZGan56P1tpump",
    "J1toso1uCk3RLmjorhTtrVwY9HJ7X8V9yYac6Y7kGCPn",
    "27G8MtK7VtTcCHkpASjSDdkWWYfoqT6ggEuKidVJidD4",
    "ArUyEVWGCzZMtAxcPmNH8nDFZ4kMjxrMbpsQf3NEpump",
];

/// Set of asset ids the bot must not buy or manage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Exclusions(HashSet<String>);

impl Exclusions {
    pub fn new(assets: impl IntoIterator<Item = String>) -> Self {
        Self(assets.into_iter().collect())
    }

    pub fn empty() -> Self {
        Self(HashSet::new())
    }

    pub fn contains(&self, asset: &str) -> bool {
        self.0.contains(asset)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Keep only items whose asset id is not excluded
    pub fn retain_allowed<T>(&self, items: Vec<T>, asset_of: impl Fn(&T) -> &str) -> Vec<T> {
        items
            .into_iter()
            .filter(|item| !self.contains(asset_of(item)))
            .collect()
    }
}

impl Default for Exclusions {
    fn default() -> Self {
        Self::new(DEFAULT_EXCLUDED.iter().map(|s| s.to_string()))
    }
}
