//! Paper and live trading engines for short-lived prediction markets.

pub mod core;
pub mod kelly;
pub mod live;
pub mod live_portfolio;
pub mod models;
pub mod paper;
pub mod portfolio;
pub mod price_tracker;
pub mod replay;

use crate::models::Signal;
use models::MarketSnapshot;

pub use live::LiveTradingEngine;
pub use live_portfolio::LivePortfolio;
pub use models::{LiveTrade, LiveTradingResult, Outcome, PaperTrade, PaperTradingResult};
pub use paper::PaperTradingEngine;
pub use portfolio::PaperPortfolio;
pub use replay::TickReplay;

/// Snapshot-driven strategy for prediction markets.
///
/// `history` holds the snapshots that preceded the current one, oldest
/// first. A SELL signal on a market with no open position means "buy the
/// complement (NO) outcome"; engines rely on that convention.
pub trait PredictionMarketStrategy: Send {
    fn name(&self) -> String;

    fn on_snapshot(
        &mut self,
        snapshot: &MarketSnapshot,
        history: &[MarketSnapshot],
    ) -> Option<Signal>;
}
