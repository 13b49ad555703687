//! Tick collector service entrypoint.
//!
//! Subscribes to the CLOB trade feed for the configured markets and series
//! slugs and persists every print to SQLite. Runs until SIGINT/SIGTERM.

use anyhow::Result;
use clap::Parser;
use polybot::clob::ClobClient;
use polybot::collector::{TickCollector, TickRepository};
use polybot::config::CollectorConfig;
use polybot::feed::MarketFeed;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "tick-collector")]
#[command(about = "Record prediction-market trade prints to SQLite")]
struct Args {
    /// SQLite database path.
    #[arg(long)]
    db: Option<String>,

    /// Static condition IDs to record.
    #[arg(long, value_delimiter = ',')]
    markets: Vec<String>,

    /// Event series slugs for window-aligned discovery.
    #[arg(long, value_delimiter = ',')]
    series_slugs: Vec<String>,

    /// Buffer size that triggers an immediate write.
    #[arg(long)]
    flush_batch_size: Option<usize>,

    /// Timer flush interval in seconds.
    #[arg(long)]
    flush_interval: Option<u64>,

    /// Seconds before each 5-minute boundary to re-run discovery.
    #[arg(long)]
    discovery_lead: Option<i64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut config = CollectorConfig::from_env()?;
    if let Some(db) = args.db {
        config.db_path = db;
    }
    if !args.markets.is_empty() {
        config.markets = args.markets;
    }
    if !args.series_slugs.is_empty() {
        config.series_slugs = args.series_slugs;
    }
    if let Some(batch) = args.flush_batch_size {
        config.flush_batch_size = batch;
    }
    if let Some(interval) = args.flush_interval {
        config.flush_interval_seconds = interval;
    }
    if let Some(lead) = args.discovery_lead {
        config.discovery_lead_seconds = lead;
    }
    config.validate()?;

    let repository = TickRepository::open(&config.db_path)?;
    let feed = MarketFeed::new(config.reconnect_base_delay);
    let api = Arc::new(ClobClient::new());

    TickCollector::new(api, config, repository, feed).run().await
}
