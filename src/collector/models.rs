//! Tick record captured from the trade feed.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One trade print, as stored.
///
/// `timestamp` is the exchange timestamp and `received_at` the local wall
/// clock at ingestion, both in epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub asset_id: String,
    pub condition_id: String,
    pub price: Decimal,
    pub size: Decimal,
    pub side: String,
    pub fee_rate_bps: i64,
    pub timestamp: i64,
    pub received_at: i64,
}
