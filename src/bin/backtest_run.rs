//! Historical backtest runner over Binance candles.
//!
//! Usage:
//!   backtest --symbol BTCUSDT --interval 1h --start 2025-01-01 --end 2025-06-01

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::Parser;
use polybot::backtest::BacktestEngine;
use polybot::models::{ExecutionConfig, Interval, RiskConfig};
use polybot::providers::BinanceProvider;
use polybot::strategies;
use rust_decimal::Decimal;
use std::str::FromStr;

#[derive(Parser, Debug)]
#[command(name = "backtest")]
#[command(about = "Run a strategy over historical candles")]
struct Args {
    #[arg(long, default_value = "BTCUSDT")]
    symbol: String,

    /// Candle interval: 1m, 5m, 15m, 1h, 4h, 1d, 1w.
    #[arg(long, default_value = "1h")]
    interval: String,

    /// Start date, YYYY-MM-DD (UTC midnight).
    #[arg(long)]
    start: String,

    /// End date, YYYY-MM-DD (UTC midnight).
    #[arg(long)]
    end: String,

    #[arg(long, default_value = "sma_cross")]
    strategy: String,

    #[arg(long, default_value = "10000")]
    capital: String,

    /// Taker fee as a decimal fraction (0.001 = 0.1%).
    #[arg(long, default_value = "0")]
    taker_fee: String,

    /// Slippage as a decimal fraction.
    #[arg(long, default_value = "0")]
    slippage: String,

    /// Fraction of capital per trade, in (0, 1].
    #[arg(long, default_value = "1")]
    position_size: String,

    /// Stop-loss as a fraction of entry price.
    #[arg(long)]
    stop_loss: Option<String>,

    /// Take-profit as a fraction of entry price.
    #[arg(long)]
    take_profit: Option<String>,
}

fn parse_date(value: &str) -> Result<i64> {
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .with_context(|| format!("invalid date {value:?} (expected YYYY-MM-DD)"))?;
    Ok(date
        .and_hms_opt(0, 0, 0)
        .expect("midnight is valid")
        .and_utc()
        .timestamp())
}

fn parse_decimal(value: &str, flag: &str) -> Result<Decimal> {
    Decimal::from_str(value).with_context(|| format!("invalid value for {flag}: {value:?}"))
}

fn parse_optional_decimal(value: &Option<String>, flag: &str) -> Result<Option<Decimal>> {
    value.as_deref().map(|v| parse_decimal(v, flag)).transpose()
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
    let interval = Interval::from_str(&args.interval)?;
    let start_ts = parse_date(&args.start)?;
    let end_ts = parse_date(&args.end)?;

    let execution = ExecutionConfig {
        taker_fee_pct: parse_decimal(&args.taker_fee, "--taker-fee")?,
        slippage_pct: parse_decimal(&args.slippage, "--slippage")?,
        position_size_pct: parse_decimal(&args.position_size, "--position-size")?,
        ..Default::default()
    };
    let risk = RiskConfig {
        stop_loss_pct: parse_optional_decimal(&args.stop_loss, "--stop-loss")?,
        take_profit_pct: parse_optional_decimal(&args.take_profit, "--take-profit")?,
        ..Default::default()
    };

    let strategy = strategies::candle_strategy(&args.strategy)?;
    let provider = BinanceProvider::new();
    let capital = parse_decimal(&args.capital, "--capital")?;

    let mut engine = BacktestEngine::new(provider, strategy, capital)
        .with_execution(execution)
        .with_risk(risk);
    let result = engine.run(&args.symbol, interval, start_ts, end_ts).await?;

    println!("\n--- Backtest Results ---");
    println!("Strategy: {}", result.strategy_name);
    println!("Symbol: {} ({})", result.symbol, result.interval);
    println!("Candles: {}", result.candles.len());
    println!("Initial capital: ${}", result.initial_capital);
    println!("Final capital:   ${}", result.final_capital);
    for (name, value) in &result.metrics {
        println!("{name}: {value}");
    }
    Ok(())
}
