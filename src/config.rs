use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::api::birdeye::BirdeyeConfig;
use crate::api::RetryConfig;
use crate::error::EngineError;
use crate::execution::{BetSizing, ExitStrategyConfig, ExitTierTable};
use crate::indicators::IndicatorConfig;
use crate::strategy::{DrawdownScreenConfig, EntryThresholds, Exclusions, TokenSafetyConfig};

const CONFIG_FILE: &str = "drawdownbot";
const ENV_PREFIX: &str = "DRAWDOWNBOT";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub buyer_secs: u64,
    pub seller_secs: u64,
    /// Seller interval with nothing held during the second half of the hour
    pub seller_idle_secs: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            buyer_secs: 60,
            seller_secs: 15,
            seller_idle_secs: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Pull candidates from the volume-ranked token list
    pub enabled: bool,
    pub min_volume_usd: f64,
    /// The drawdown watchlist is rebuilt once this many hours have passed
    pub refresh_hours: i64,
    /// or on a new UTC day once past this minute of the hour
    pub new_day_after_minute: u32,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_volume_usd: 500_000.0,
            refresh_hours: 24,
            new_day_after_minute: 10,
        }
    }
}

/// Runtime settings
///
/// Layered from built-in defaults, an optional `drawdownbot.toml`, then
/// `DRAWDOWNBOT__SECTION__KEY` environment variables, then the plain
/// `BIRDEYE_API_KEY`, `BET_AMOUNT_SOL` and `MIN_24HR_VOLUME` variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub account: String,
    pub paper_balance: f64,
    pub birdeye: BirdeyeConfig,
    pub retry: RetryConfig,
    pub indicators: IndicatorConfig,
    pub entry: EntryThresholds,
    pub drawdown: DrawdownScreenConfig,
    pub exit: ExitStrategyConfig,
    pub sizing: BetSizing,
    pub polling: PollingConfig,
    pub discovery: DiscoveryConfig,
    pub safety: TokenSafetyConfig,
    pub exclusions: Exclusions,
    /// Assets always scanned, in addition to discovered ones
    pub candidates: Vec<String>,
    /// Balances at or below this many raw units are dust and ignored
    pub min_holding_raw: u64,
    /// How long a bought asset is skipped by the buyer
    pub recent_buy_minutes: i64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            account: "paper".to_string(),
            paper_balance: 10.0,
            birdeye: BirdeyeConfig::default(),
            retry: RetryConfig::default(),
            indicators: IndicatorConfig::default(),
            entry: EntryThresholds::default(),
            drawdown: DrawdownScreenConfig::default(),
            exit: ExitStrategyConfig::default(),
            sizing: BetSizing::default(),
            polling: PollingConfig::default(),
            discovery: DiscoveryConfig::default(),
            safety: TokenSafetyConfig::default(),
            exclusions: Exclusions::default(),
            candidates: Vec::new(),
            min_holding_raw: 1000,
            recent_buy_minutes: 90,
        }
    }
}

impl Settings {
    /// Load and validate settings; `path` replaces the default config file lookup
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let defaults = config::Config::try_from(&Settings::default())
            .context("Failed to serialize default settings")?;

        let mut builder = config::Config::builder().add_source(defaults);
        builder = match path {
            Some(p) => builder.add_source(config::File::from(p)),
            None => builder.add_source(config::File::with_name(CONFIG_FILE).required(false)),
        };
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("exclusions")
                .with_list_parse_key("candidates")
                .with_list_parse_key("safety.allowed_update_authorities")
                .with_list_parse_key("safety.allowed_market_sources"),
        );

        for (var, key) in [
            ("BIRDEYE_API_KEY", "birdeye.api_key"),
            ("BET_AMOUNT_SOL", "sizing.bet_amount"),
            ("MIN_24HR_VOLUME", "discovery.min_volume_usd"),
        ] {
            if let Ok(value) = std::env::var(var) {
                builder = builder
                    .set_override(key, value)
                    .with_context(|| format!("Failed to apply {}", var))?;
            }
        }

        let settings: Settings = builder
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;

        settings.validate()?;
        Ok(settings)
    }

    /// Reject settings the bot cannot safely run with
    pub fn validate(&self) -> Result<(), EngineError> {
        let fail = |msg: &str| Err(EngineError::Config(msg.to_string()));

        if self.birdeye.api_key.trim().is_empty() {
            return fail("BIRDEYE_API_KEY is required");
        }
        ExitTierTable::new(self.exit.tiers.tiers().to_vec())?;

        if self.sizing.bet_amount <= 0.0 {
            return fail("sizing.bet_amount must be positive");
        }
        if self.polling.buyer_secs == 0
            || self.polling.seller_secs == 0
            || self.polling.seller_idle_secs == 0
        {
            return fail("polling intervals must be positive");
        }
        if self.discovery.refresh_hours <= 0 || self.discovery.new_day_after_minute > 59 {
            return fail("discovery refresh must be positive hours and a minute of the hour");
        }
        if self.safety.min_age_days < 0 {
            return fail("safety.min_age_days must not be negative");
        }
        if self.retry.max_attempts == 0 {
            return fail("retry.max_attempts must be at least 1");
        }
        let ind = &self.indicators;
        if [ind.volume_sum_hours, ind.short_hours, ind.long_hours]
            .iter()
            .any(|h| *h <= 0)
            || ind.change_short_bars <= 0
            || ind.change_long_bars <= 0
        {
            return fail("indicator windows must be positive");
        }
        if self.exit.max_hold_hours <= 0.0 {
            return fail("exit.max_hold_hours must be positive");
        }
        if self.entry.history_days <= 0 || self.drawdown.history_days <= 0 {
            return fail("history windows must be positive");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn with_key() -> Settings {
        let mut settings = Settings::default();
        settings.birdeye.api_key = "key".to_string();
        settings
    }

    #[test]
    fn test_defaults_need_api_key() {
        let err = Settings::default().validate().unwrap_err();
        assert!(err.to_string().contains("BIRDEYE_API_KEY"));
        assert!(with_key().validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_bet() {
        let mut settings = with_key();
        settings.sizing.bet_amount = 0.0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_polling() {
        let mut settings = with_key();
        settings.polling.seller_secs = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_refresh() {
        let mut settings = with_key();
        settings.discovery.refresh_hours = 0;
        assert!(settings.validate().is_err());

        let mut settings = with_key();
        settings.discovery.new_day_after_minute = 60;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("drawdownbot-{}.toml", uuid::Uuid::new_v4()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
account = "wallet-1"
candidates = ["AAA", "BBB"]

[birdeye]
api_key = "from-file"

[entry]
volume_floor = 1000000.0

[safety]
allowed_market_sources = ["Meteora"]

[[exit.tiers]]
lower = 0.0
upper = 1.0
stop_pct = -0.3
profit_pct = 1.0
sell_fraction = 0.5
"#
        )
        .unwrap();

        let settings = Settings::load(Some(&path)).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(settings.account, "wallet-1");
        assert_eq!(settings.candidates, vec!["AAA".to_string(), "BBB".to_string()]);
        assert_eq!(settings.entry.volume_floor, 1_000_000.0);
        assert_eq!(settings.entry.spike_ceiling, 40.0);
        assert_eq!(settings.exit.tiers.tiers().len(), 1);
        assert_eq!(settings.exit.max_hold_hours, 240.0);
        assert_eq!(settings.safety.allowed_market_sources, vec!["Meteora".to_string()]);
        assert_eq!(settings.safety.min_age_days, 14);
        assert_eq!(settings.discovery.refresh_hours, 24);
        assert!(!settings.birdeye.api_key.is_empty());
    }

    #[test]
    fn test_load_rejects_bad_tiers() {
        let path = std::env::temp_dir().join(format!("drawdownbot-{}.toml", uuid::Uuid::new_v4()));
        std::fs::write(
            &path,
            r#"
[birdeye]
api_key = "from-file"

[[exit.tiers]]
lower = 0.5
upper = 1.0
stop_pct = -0.3
profit_pct = 1.0
sell_fraction = 0.5
"#,
        )
        .unwrap();

        let result = Settings::load(Some(&path));
        std::fs::remove_file(&path).ok();
        assert!(result.is_err());
    }
}
