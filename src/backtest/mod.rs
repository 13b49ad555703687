//! Historical backtesting: candle providers, strategy contract, engines.

pub mod engine;
pub mod execution;
pub mod metrics;
pub mod multi_asset;
pub mod portfolio;

use crate::models::{Candle, Interval, Signal};
use anyhow::Result;
use async_trait::async_trait;

pub use engine::BacktestEngine;
pub use multi_asset::{MultiAssetEngine, MultiAssetPortfolio};
pub use portfolio::Portfolio;

/// Pull-based source of historical candles.
///
/// Pagination is an implementation detail; callers receive a single list,
/// which may be empty.
#[async_trait]
pub trait CandleProvider: Send + Sync {
    async fn get_candles(
        &self,
        symbol: &str,
        interval: Interval,
        start_ts: i64,
        end_ts: i64,
    ) -> Result<Vec<Candle>>;
}

/// Candle-driven trading strategy.
///
/// `history` holds the candles seen before the current one, oldest first.
pub trait Strategy: Send {
    fn name(&self) -> String;

    fn on_candle(&mut self, candle: &Candle, history: &[Candle]) -> Option<Signal>;
}

impl<S: Strategy + ?Sized> Strategy for Box<S> {
    fn name(&self) -> String {
        (**self).name()
    }

    fn on_candle(&mut self, candle: &Candle, history: &[Candle]) -> Option<Signal> {
        (**self).on_candle(candle, history)
    }
}
