use anyhow::Context;
use chrono::{Timelike, Utc};
use clap::{Parser, Subcommand};
use drawdownbot::api::{BirdeyeClient, RetryPolicy};
use drawdownbot::config::{PollingConfig, Settings};
use drawdownbot::execution::PaperBroker;
use drawdownbot::strategy::EntryDecision;
use drawdownbot::Trader;
use serde::Serialize;
use std::path::PathBuf;
use tokio::time::{sleep_until, Duration, Instant};
use tracing_subscriber::EnvFilter;

type PaperTrader = Trader<BirdeyeClient, PaperBroker<BirdeyeClient>>;

#[derive(Parser)]
#[command(name = "drawdownbot", version, about = "Hourly breakout and drawdown recovery trading bot")]
struct Cli {
    /// Config file (defaults to ./drawdownbot.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the buyer and seller loops against the paper broker
    Run {
        /// Run one buyer and one seller pass, then exit
        #[arg(long)]
        once: bool,
    },
    /// Evaluate the entry gate for each asset and print the decisions as JSON
    Scan {
        #[arg(required = true)]
        assets: Vec<String>,
    },
}

#[derive(Serialize)]
struct ScanOutput {
    asset: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    decision: Option<EntryDecision>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;

    let market = BirdeyeClient::from_config(&settings.birdeye, RetryPolicy::from(&settings.retry))
        .context("Failed to create Birdeye client")?;
    let broker = PaperBroker::new(market.clone(), &settings.account, settings.paper_balance);
    let mut trader = Trader::new(settings, market, broker);

    match cli.command {
        Command::Scan { assets } => scan(&trader, assets).await,
        Command::Run { once } => run(&mut trader, once).await,
    }
}

fn setup_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("drawdownbot=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn scan(trader: &PaperTrader, assets: Vec<String>) -> anyhow::Result<()> {
    let now = Utc::now();
    let mut outputs = Vec::with_capacity(assets.len());

    for asset in assets {
        let output = match trader.scan(&asset, now).await {
            Ok(decision) => ScanOutput {
                asset,
                decision: Some(decision),
                error: None,
            },
            Err(e) => {
                tracing::warn!("Scan of {} failed: {}", asset, e);
                ScanOutput {
                    asset,
                    decision: None,
                    error: Some(e.to_string()),
                }
            }
        };
        outputs.push(output);
    }

    println!("{}", serde_json::to_string_pretty(&outputs)?);
    Ok(())
}

async fn run(trader: &mut PaperTrader, once: bool) -> anyhow::Result<()> {
    let settings = trader.settings();
    let polling = settings.polling.clone();

    tracing::info!("🚀 drawdownbot starting (paper account {})", settings.account);
    tracing::info!("📊 Configuration:");
    tracing::info!("  Bet: {} SOL (reserve {})", settings.sizing.bet_amount, settings.sizing.reserve);
    tracing::info!("  Candidates: {} configured, discovery {}", settings.candidates.len(), settings.discovery.enabled);
    tracing::info!("  Exclusions: {}", settings.exclusions.len());
    tracing::info!("  Buyer every {}s, seller every {}s", polling.buyer_secs, polling.seller_secs);

    if once {
        buyer_pass(trader).await;
        seller_pass(trader).await;
        return Ok(());
    }

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut next_buy = Instant::now();
    let mut next_sell = Instant::now();
    loop {
        tokio::select! {
            result = &mut shutdown => {
                result.context("Failed to listen for ctrl-c")?;
                tracing::info!("⚠️  Received Ctrl+C, shutting down...");
                break;
            }
            _ = sleep_until(next_buy) => {
                buyer_pass(trader).await;
                next_buy = Instant::now() + Duration::from_secs(polling.buyer_secs);
            }
            _ = sleep_until(next_sell) => {
                let held = seller_pass(trader).await;
                next_sell = Instant::now() + seller_delay(&polling, held, Utc::now().minute());
            }
        }
    }

    tracing::info!("👋 drawdownbot stopped");
    Ok(())
}

async fn buyer_pass(trader: &mut PaperTrader) {
    let now = Utc::now();
    match trader.entry_tick(now).await {
        Ok(summary) => tracing::info!(
            "💹 [BUYER] {} evaluated, {} bought, {} failed",
            summary.evaluated,
            summary.filled.len(),
            summary.failed
        ),
        Err(e) => tracing::error!("💹 [BUYER] Tick failed: {}", e),
    }
    match trader.watchlist_tick(now).await {
        Ok(summary) if !summary.filled.is_empty() => {
            tracing::info!("🔍 [WATCHLIST] Bought {:?}", summary.filled)
        }
        Ok(_) => {}
        Err(e) => tracing::error!("🔍 [WATCHLIST] Tick failed: {}", e),
    }
}

/// Returns the number of holdings seen, if the pass got that far
async fn seller_pass(trader: &mut PaperTrader) -> Option<usize> {
    match trader.exit_tick(Utc::now()).await {
        Ok(summary) => {
            if summary.evaluated > 0 {
                tracing::info!(
                    "📉 [SELLER] {} holdings, {} sold, {} failed",
                    summary.evaluated,
                    summary.filled.len(),
                    summary.failed
                );
            }
            Some(summary.evaluated)
        }
        Err(e) => {
            tracing::error!("📉 [SELLER] Tick failed: {}", e);
            None
        }
    }
}

/// Slow down the seller in the second half of the hour when nothing is held
fn seller_delay(polling: &PollingConfig, holdings: Option<usize>, minute: u32) -> Duration {
    if holdings == Some(0) && (25..=59).contains(&minute) {
        Duration::from_secs(polling.seller_idle_secs)
    } else {
        Duration::from_secs(polling.seller_secs)
    }
}
