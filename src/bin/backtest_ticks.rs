//! Replay recorded ticks through a prediction-market strategy.
//!
//! Reads windows from the tick-collector database and reports how the
//! strategy would have traded them.

use anyhow::Result;
use clap::Parser;
use polybot::bot::replay::TickReplay;
use polybot::collector::TickRepository;
use polybot::strategies;
use rust_decimal::Decimal;
use std::str::FromStr;

#[derive(Parser, Debug)]
#[command(name = "backtest-ticks")]
#[command(about = "Replay recorded tick windows through a strategy")]
struct Args {
    /// SQLite database written by the tick collector.
    #[arg(long, default_value = "./ticks.db")]
    db: String,

    #[arg(long, default_value = "late_snipe")]
    strategy: String,

    /// Inclusive start of the replay range, epoch milliseconds.
    #[arg(long)]
    start_ms: i64,

    /// Inclusive end of the replay range, epoch milliseconds.
    #[arg(long)]
    end_ms: i64,

    #[arg(long, default_value = "1000")]
    capital: String,

    #[arg(long, default_value = "0.1")]
    max_position_pct: String,

    #[arg(long, default_value = "0.25")]
    kelly_fraction: String,

    /// Snapshot bucket width in seconds.
    #[arg(long, default_value = "1")]
    bucket_seconds: i64,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let repository = TickRepository::open(&args.db)?;
    let mut strategy = strategies::prediction_strategy(&args.strategy)?;

    let replay = TickReplay::new(
        Decimal::from_str(&args.capital)?,
        Decimal::from_str(&args.max_position_pct)?,
        Decimal::from_str(&args.kelly_fraction)?,
        args.bucket_seconds,
    );
    let result = replay.run(&repository, strategy.as_mut(), args.start_ms, args.end_ms)?;

    println!("\n--- Tick Replay Results ---");
    println!("Strategy: {}", result.strategy_name);
    println!("Snapshots processed: {}", result.snapshots_processed);
    println!("Initial capital: ${}", result.initial_capital);
    println!("Final capital:   ${}", result.final_capital);
    for (name, value) in &result.metrics {
        println!("{name}: {value}");
    }
    Ok(())
}
