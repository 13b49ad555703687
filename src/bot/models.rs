//! Data models for the prediction-market trading bot.
//!
//! Market snapshots replace candles as the primary data unit; paper and
//! live trades record executions; the result objects summarise a run.

use crate::clob::models::OrderBook;
use crate::models::Side;
use anyhow::{ensure, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Which outcome token a position sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    Yes,
    No,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Yes => "Yes",
            Outcome::No => "No",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of a prediction market.
///
/// YES and NO prices are probability-like values in `[0, 1]`. They need not
/// sum to one; the live feed carries each side's last trade independently
/// and the market may have a spread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub condition_id: String,
    pub question: String,
    /// Unix epoch seconds when the snapshot was taken.
    pub timestamp: i64,
    pub yes_price: Decimal,
    pub no_price: Decimal,
    pub order_book: OrderBook,
    pub volume: Decimal,
    pub liquidity: Decimal,
    /// ISO-8601 resolution time.
    pub end_date: String,
}

impl MarketSnapshot {
    /// Build a snapshot, rejecting prices outside `[0, 1]`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        condition_id: impl Into<String>,
        question: impl Into<String>,
        timestamp: i64,
        yes_price: Decimal,
        no_price: Decimal,
        order_book: OrderBook,
        volume: Decimal,
        liquidity: Decimal,
        end_date: impl Into<String>,
    ) -> Result<Self> {
        ensure!(
            Decimal::ZERO <= yes_price && yes_price <= Decimal::ONE,
            "yes_price must be between 0 and 1, got {yes_price}"
        );
        ensure!(
            Decimal::ZERO <= no_price && no_price <= Decimal::ONE,
            "no_price must be between 0 and 1, got {no_price}"
        );
        Ok(Self {
            condition_id: condition_id.into(),
            question: question.into(),
            timestamp,
            yes_price,
            no_price,
            order_book,
            volume,
            liquidity,
            end_date: end_date.into(),
        })
    }

    /// Price of the given outcome's token.
    pub fn price_for(&self, outcome: Outcome) -> Decimal {
        match outcome {
            Outcome::Yes => self.yes_price,
            Outcome::No => self.no_price,
        }
    }
}

/// A virtual execution recorded by the paper portfolio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperTrade {
    pub condition_id: String,
    pub token_outcome: Outcome,
    pub side: Side,
    pub quantity: Decimal,
    pub price: Decimal,
    pub timestamp: i64,
    pub reason: String,
    /// Strategy's estimated probability edge over the market price.
    pub estimated_edge: Decimal,
}

/// A real execution recorded by the live portfolio, including the
/// broker-assigned order ID and fill quantity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveTrade {
    pub condition_id: String,
    pub token_id: String,
    pub token_outcome: Outcome,
    pub order_id: String,
    pub side: Side,
    pub quantity: Decimal,
    pub price: Decimal,
    pub filled: Decimal,
    pub timestamp: i64,
    pub reason: String,
    pub estimated_edge: Decimal,
}

/// Summary of a completed paper trading run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperTradingResult {
    pub strategy_name: String,
    pub initial_capital: Decimal,
    pub final_capital: Decimal,
    pub trades: Vec<PaperTrade>,
    pub snapshots_processed: u64,
    pub metrics: BTreeMap<String, Decimal>,
}

/// Summary of a completed live trading run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveTradingResult {
    pub strategy_name: String,
    pub initial_balance: Decimal,
    pub final_balance: Decimal,
    pub trades: Vec<LiveTrade>,
    pub snapshots_processed: u64,
    pub metrics: BTreeMap<String, Decimal>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn snapshot(yes: Decimal, no: Decimal) -> Result<MarketSnapshot> {
        MarketSnapshot::new(
            "cond_a",
            "BTC up?",
            1000,
            yes,
            no,
            OrderBook::empty("tok"),
            dec!(1000),
            dec!(500),
            "2026-02-22T12:05:00Z",
        )
    }

    #[test]
    fn test_snapshot_accepts_valid_prices() {
        assert!(snapshot(dec!(0.6), dec!(0.4)).is_ok());
        assert!(snapshot(Decimal::ZERO, Decimal::ONE).is_ok());
    }

    #[test]
    fn test_snapshot_prices_need_not_sum_to_one() {
        let snap = snapshot(dec!(0.6), dec!(0.45)).unwrap();
        assert_eq!(snap.yes_price + snap.no_price, dec!(1.05));
    }

    #[test]
    fn test_snapshot_rejects_out_of_range_prices() {
        assert!(snapshot(dec!(1.2), dec!(0.4)).is_err());
        assert!(snapshot(dec!(0.6), dec!(-0.1)).is_err());
    }

    #[test]
    fn test_price_for_outcome() {
        let snap = snapshot(dec!(0.6), dec!(0.4)).unwrap();
        assert_eq!(snap.price_for(Outcome::Yes), dec!(0.6));
        assert_eq!(snap.price_for(Outcome::No), dec!(0.4));
    }
}
