//! polybot: prediction-market and crypto trading toolkit.
//!
//! Three engines over a shared data model: a historical backtester with
//! realistic execution costs and risk exits, a paper/live trading loop for
//! 5-minute prediction markets sized with fractional Kelly, and a tick
//! collector that persists the streaming trade feed.

pub mod backtest;
pub mod bot;
pub mod clob;
pub mod collector;
pub mod config;
pub mod feed;
pub mod models;
pub mod providers;
pub mod strategies;

pub use clob::{ClobClient, TradingApi};
pub use config::{BotConfig, CollectorConfig};
pub use feed::MarketFeed;
