use chrono::{DateTime, Duration, TimeZone, Utc};
use drawdownbot::api::BirdeyeClient;
use drawdownbot::config::Settings;
use drawdownbot::execution::paper::WRAPPED_SOL;
use drawdownbot::execution::PaperBroker;
use drawdownbot::strategy::{evaluate_entry, RejectionReason};
use drawdownbot::*;
use mockito::Matcher;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

fn hour_aligned_now() -> DateTime<Utc> {
    Utc.timestamp_opt(Utc::now().timestamp() / 3600 * 3600, 0)
        .unwrap()
}

/// Two weeks of hourly bars ending at `now`, finishing with a volume-backed breakout
fn breakout_bars(now: DateTime<Utc>) -> Vec<Candle> {
    let hour = |h: i64| now - Duration::hours(335 - h);
    let mut candles: Vec<Candle> = (0..333)
        .map(|h| {
            let price = 1.0 + h as f64 * 0.0005;
            Candle::new(hour(h), price, price * 1.01, price * 0.99, price, 300_000.0)
        })
        .collect();

    let mut price = 1.0 + 333.0 * 0.0005;
    for h in 333..336 {
        let open = price;
        price *= 1.05;
        candles.push(Candle::new(hour(h), open, price, open, price, 3_000_000.0));
    }
    candles
}

fn ohlcv_body(candles: &[Candle]) -> String {
    let items: Vec<serde_json::Value> = candles
        .iter()
        .map(|c| {
            serde_json::json!({
                "unix_time": c.timestamp.timestamp(),
                "o": c.open, "h": c.high, "l": c.low, "c": c.close, "v_usd": c.volume
            })
        })
        .collect();
    serde_json::json!({ "success": true, "data": { "items": items } }).to_string()
}

fn price_body(price: f64) -> String {
    serde_json::json!({ "success": true, "data": { "value": price } }).to_string()
}

fn settings(base_url: String) -> Settings {
    let mut settings = Settings::default();
    settings.birdeye.api_key = "test_key".into();
    settings.birdeye.base_url = base_url;
    settings.retry.max_attempts = 1;
    settings.retry.delay_secs = 0;
    settings.discovery.enabled = false;
    settings.candidates = vec!["AAA".into()];
    settings
}

#[tokio::test]
async fn test_buy_then_stop_out_against_birdeye() {
    let _ = tracing_subscriber::fmt::try_init();
    let now = hour_aligned_now();

    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/defi/v3/ohlcv")
        .match_query(Matcher::UrlEncoded("address".into(), "AAA".into()))
        .with_status(200)
        .with_body(ohlcv_body(&breakout_bars(now)))
        .expect_at_least(1)
        .create_async()
        .await;
    server
        .mock("GET", "/defi/price")
        .match_query(Matcher::UrlEncoded("address".into(), WRAPPED_SOL.into()))
        .with_status(200)
        .with_body(price_body(100.0))
        .create_async()
        .await;
    let entry_price = server
        .mock("GET", "/defi/price")
        .match_query(Matcher::UrlEncoded("address".into(), "AAA".into()))
        .with_status(200)
        .with_body(price_body(1.2))
        .create_async()
        .await;

    let settings = settings(server.url());
    let market = BirdeyeClient::from_config(&settings.birdeye, (&settings.retry).into()).unwrap();
    let broker = PaperBroker::new(market.clone(), "paper", 10.0);
    let mut trader = Trader::new(settings, market, broker);

    // 1. Buyer: breakout passes the gate, half of the 10 SOL balance goes in
    let summary = trader.entry_tick(now).await.unwrap();
    assert_eq!(summary.filled, vec!["AAA".to_string()]);
    assert_eq!(trader.broker().fetch_balance("paper").await.unwrap(), 5.0);

    let holdings = trader.broker().fetch_holdings("paper").await.unwrap();
    assert_eq!(holdings.len(), 1);
    // $500 at $1.20 with 6 decimals
    assert_eq!(holdings[0].raw_amount, 416_666_666);

    // 2. Seller at the entry price: nothing to do
    let summary = trader.exit_tick(now).await.unwrap();
    assert_eq!(summary.evaluated, 1);
    assert!(summary.filled.is_empty());

    // 3. Price collapses below the initial stop
    entry_price.remove_async().await;
    server
        .mock("GET", "/defi/price")
        .match_query(Matcher::UrlEncoded("address".into(), "AAA".into()))
        .with_status(200)
        .with_body(price_body(0.5))
        .create_async()
        .await;

    let summary = trader.exit_tick(now).await.unwrap();
    assert_eq!(summary.filled, vec!["AAA".to_string()]);
    assert!(trader.broker().fetch_holdings("paper").await.unwrap().is_empty());

    let trades = trader.broker().fetch_trades("paper", "AAA").await.unwrap();
    assert_eq!(trades.len(), 2);
    assert_eq!(trades[1].side, TradeSide::Sell);
    assert_eq!(trades[1].raw_amount, 416_666_666);
}

/// Quotes shared between the fake market and the paper broker
#[derive(Clone, Default)]
struct SharedQuotes(Arc<Mutex<HashMap<String, f64>>>);

impl SharedQuotes {
    fn set(&self, asset: &str, price: f64) {
        self.0.lock().unwrap().insert(asset.to_string(), price);
    }
}

impl QuoteSource for SharedQuotes {
    async fn fetch_quote(&self, asset: &str) -> std::result::Result<Option<f64>, EngineError> {
        Ok(self.0.lock().unwrap().get(asset).copied())
    }
}

impl CandleSource for SharedQuotes {
    async fn fetch_candles(
        &self,
        _asset: &str,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
        _interval: CandleInterval,
    ) -> std::result::Result<Vec<Candle>, EngineError> {
        Ok(Vec::new())
    }
}

impl TokenListSource for SharedQuotes {
    async fn list_tokens(&self, _min_volume_usd: f64) -> std::result::Result<Vec<Token>, EngineError> {
        Ok(Vec::new())
    }
}

impl TokenSafetySource for SharedQuotes {
    async fn fetch_security(&self, _asset: &str) -> std::result::Result<Option<TokenSecurity>, EngineError> {
        Ok(None)
    }

    async fn fetch_markets(&self, _asset: &str) -> std::result::Result<Vec<MarketPool>, EngineError> {
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn test_exit_tiers_step_down_as_position_shrinks() {
    let now = Utc::now();
    let quotes = SharedQuotes::default();
    quotes.set(WRAPPED_SOL, 100.0);
    quotes.set("AAA", 1.0);

    let broker = PaperBroker::new(quotes.clone(), "paper", 10.0);
    // 1000 tokens bought for $1000
    broker
        .record_fill("AAA", 6, TradeSide::Buy, 1_000_000_000, 1000.0, now - Duration::hours(1))
        .unwrap();

    let mut settings = Settings::default();
    settings.birdeye.api_key = "test_key".into();
    settings.discovery.enabled = false;
    let mut trader = Trader::new(settings, quotes.clone(), broker);

    // Top tier takes profit at +50%, selling half of the original buy
    quotes.set("AAA", 1.6);
    let summary = trader.exit_tick(now).await.unwrap();
    assert_eq!(summary.filled, vec!["AAA".to_string()]);
    let held = trader.broker().fetch_holdings("paper").await.unwrap();
    assert_eq!(held[0].raw_amount, 500_000_001);

    // Middle tier: stop at cost, next target +100%
    let summary = trader.exit_tick(now).await.unwrap();
    assert!(summary.filled.is_empty());

    quotes.set("AAA", 0.9);
    let summary = trader.exit_tick(now).await.unwrap();
    assert_eq!(summary.filled, vec!["AAA".to_string()]);
    assert!(trader.broker().fetch_holdings("paper").await.unwrap().is_empty());
}

#[test]
fn test_flat_market_lists_every_failed_check() {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let candles: Vec<Candle> = (0..336)
        .map(|h| Candle::new(start + Duration::hours(h), 1.0, 1.0, 1.0, 1.0, 500.0))
        .collect();

    let decision = evaluate_entry(&candles);
    assert!(!decision.passed);
    for reason in [
        RejectionReason::EmaNotAboveShortSma,
        RejectionReason::ShortSmaNotAboveLongSma,
        RejectionReason::ShortMoveOutOfRange,
        RejectionReason::DayMoveOutOfRange,
        RejectionReason::VolumeBelowFloor,
        RejectionReason::PriceNotNewHigh,
    ] {
        assert!(decision.reasons.contains(&reason), "missing {:?}", reason);
    }
    assert!(!decision.reasons.contains(&RejectionReason::InsufficientHistory));
}
