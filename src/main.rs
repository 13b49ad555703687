//! Trading bot CLI: paper and live engines over the streaming feed.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use polybot::bot::{LiveTradingEngine, PaperTradingEngine};
use polybot::clob::{ClobClient, ClobCredentials};
use polybot::config::BotConfig;
use polybot::feed::MarketFeed;
use polybot::strategies;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

const FEED_RECONNECT_BASE_DELAY: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "polybot")]
#[command(about = "Prediction market trading bot")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Trade with virtual capital.
    Paper {
        /// Strategy name (e.g. late_snipe).
        #[arg(long, default_value = "late_snipe")]
        strategy: String,

        /// Static condition IDs to track.
        #[arg(long, value_delimiter = ',')]
        markets: Vec<String>,

        /// Event series slugs for 5-minute window rotation.
        #[arg(long, value_delimiter = ',')]
        series_slugs: Vec<String>,

        /// Stop after this many feed events.
        #[arg(long)]
        max_ticks: Option<u64>,
    },

    /// Trade with real orders on the CLOB. Requires API credentials in the
    /// environment (CLOB_API_KEY, CLOB_API_SECRET, CLOB_PASSPHRASE,
    /// CLOB_WALLET_ADDRESS).
    Live {
        #[arg(long, default_value = "late_snipe")]
        strategy: String,

        #[arg(long, value_delimiter = ',')]
        markets: Vec<String>,

        #[arg(long, value_delimiter = ',')]
        series_slugs: Vec<String>,

        #[arg(long)]
        max_ticks: Option<u64>,

        /// Stop when equity falls below this fraction of the starting
        /// balance.
        #[arg(long, default_value = "0.10")]
        max_loss_pct: String,

        /// Place GTC limit orders instead of FOK market orders.
        #[arg(long)]
        limit_orders: bool,
    },
}

fn merge_config(markets: Vec<String>, series_slugs: Vec<String>) -> Result<BotConfig> {
    let mut config = BotConfig::from_env()?;
    if !markets.is_empty() {
        config.markets = markets;
    }
    if !series_slugs.is_empty() {
        config.series_slugs = series_slugs;
    }
    if config.markets.is_empty() && config.series_slugs.is_empty() {
        bail!("nothing to trade: provide --markets or --series-slugs");
    }
    Ok(config)
}

fn credentials_from_env() -> Result<ClobCredentials> {
    let var = |key: &str| -> Result<String> {
        std::env::var(key).with_context(|| format!("{key} is not set"))
    };
    Ok(ClobCredentials {
        api_key: var("CLOB_API_KEY")?,
        secret: var("CLOB_API_SECRET")?,
        passphrase: var("CLOB_PASSPHRASE")?,
        wallet_address: var("CLOB_WALLET_ADDRESS")?,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Paper {
            strategy,
            markets,
            series_slugs,
            max_ticks,
        } => {
            let config = merge_config(markets, series_slugs)?;
            let strategy = strategies::prediction_strategy(&strategy)?;
            let api = Arc::new(ClobClient::new());
            let feed = MarketFeed::new(FEED_RECONNECT_BASE_DELAY);

            let mut engine = PaperTradingEngine::new(api, strategy, config, feed);
            let result = engine.run(max_ticks).await?;

            println!("\n--- Paper Trading Results ---");
            println!("Strategy: {}", result.strategy_name);
            println!("Snapshots processed: {}", result.snapshots_processed);
            println!("Initial capital: ${}", result.initial_capital);
            println!("Final capital:   ${}", result.final_capital);
            println!("Trades: {}", result.trades.len());
            if let Some(total_return) = result.metrics.get("total_return") {
                println!("Return: {}%", *total_return * Decimal::ONE_HUNDRED);
            }
        }
        Commands::Live {
            strategy,
            markets,
            series_slugs,
            max_ticks,
            max_loss_pct,
            limit_orders,
        } => {
            let config = merge_config(markets, series_slugs)?;
            let max_loss_pct = Decimal::from_str(&max_loss_pct)
                .context("invalid --max-loss-pct")?;
            let strategy = strategies::prediction_strategy(&strategy)?;
            let api = Arc::new(ClobClient::new().with_credentials(credentials_from_env()?));
            let feed = MarketFeed::new(FEED_RECONNECT_BASE_DELAY);

            let mut engine = LiveTradingEngine::new(api, strategy, config, feed, !limit_orders)
                .with_max_loss_pct(max_loss_pct);
            let result = engine.run(max_ticks).await?;

            println!("\n--- Live Trading Results ---");
            println!("Strategy: {}", result.strategy_name);
            println!("Snapshots processed: {}", result.snapshots_processed);
            println!("Initial balance: ${}", result.initial_balance);
            println!("Final balance:   ${}", result.final_balance);
            println!("Trades: {}", result.trades.len());
            if let Some(total_return) = result.metrics.get("total_return") {
                println!("Return: {}%", *total_return * Decimal::ONE_HUNDRED);
            }
        }
    }
    Ok(())
}
