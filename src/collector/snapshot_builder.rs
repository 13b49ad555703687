//! Replay support: turn raw ticks into bucketed snapshot series.
//!
//! Ticks for one market are grouped into fixed-width time buckets with
//! last-price-wins, then forward-filled into a continuous series suitable
//! for feeding a strategy offline. The lexicographically smaller asset ID
//! is taken as the YES token; NO-side prints contribute as the complement
//! `1 - price`.

use crate::bot::models::MarketSnapshot;
use crate::clob::models::OrderBook;
use crate::collector::models::Tick;
use anyhow::{ensure, Result};
use chrono::DateTime;
use rust_decimal::Decimal;
use std::collections::HashMap;

const FIVE_MINUTES_MS: i64 = 300_000;
const MS_PER_SECOND: i64 = 1000;
const HALF: Decimal = Decimal::from_parts(5, 0, 0, false, 1);

/// Time boundaries of one 5-minute market window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketWindow {
    pub condition_id: String,
    /// Window start, epoch milliseconds, 5-minute aligned.
    pub start_ms: i64,
    /// `start_ms + 300_000`.
    pub end_ms: i64,
    /// ISO-8601 end time for the strategy's time-remaining calculation.
    pub end_date: String,
}

pub struct SnapshotBuilder {
    bucket_seconds: i64,
}

impl SnapshotBuilder {
    pub fn new(bucket_seconds: i64) -> Result<Self> {
        ensure!(bucket_seconds >= 1, "bucket_seconds must be >= 1");
        Ok(Self { bucket_seconds })
    }

    /// Infer the containing window from the earliest tick timestamp.
    pub fn detect_window(&self, condition_id: &str, ticks: &[Tick]) -> Result<MarketWindow> {
        ensure!(!ticks.is_empty(), "ticks list must not be empty");

        let earliest_ms = ticks.iter().map(|t| t.timestamp).min().expect("non-empty");
        let start_ms = (earliest_ms / FIVE_MINUTES_MS) * FIVE_MINUTES_MS;
        let end_ms = start_ms + FIVE_MINUTES_MS;
        let end_date = DateTime::from_timestamp(end_ms / MS_PER_SECOND, 0)
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_default();

        Ok(MarketWindow {
            condition_id: condition_id.to_string(),
            start_ms,
            end_ms,
            end_date,
        })
    }

    /// Build one snapshot per bucket across the window.
    ///
    /// Buckets without a print carry the previous price forward, starting
    /// from 0.5 before the first print. `no = 1 - yes` throughout.
    pub fn build_snapshots(&self, ticks: &[Tick], window: &MarketWindow) -> Result<Vec<MarketSnapshot>> {
        ensure!(!ticks.is_empty(), "ticks list must not be empty");

        let mut asset_ids: Vec<&str> = ticks.iter().map(|t| t.asset_id.as_str()).collect();
        asset_ids.sort_unstable();
        asset_ids.dedup();
        let yes_asset = asset_ids[0];

        let bucket_ms = self.bucket_seconds * MS_PER_SECOND;
        let num_buckets = FIVE_MINUTES_MS / bucket_ms;

        let mut bucket_prices: HashMap<i64, Decimal> = HashMap::new();
        for tick in ticks {
            let yes_price = if tick.asset_id == yes_asset {
                tick.price
            } else {
                Decimal::ONE - tick.price
            };
            let index = ((tick.timestamp - window.start_ms) / bucket_ms).clamp(0, num_buckets - 1);
            bucket_prices.insert(index, yes_price);
        }

        let empty_book = OrderBook {
            token_id: String::new(),
            bids: Vec::new(),
            asks: Vec::new(),
            spread: Decimal::ZERO,
            midpoint: HALF,
        };

        let mut snapshots = Vec::with_capacity(num_buckets as usize);
        let mut last_price = HALF;
        for index in 0..num_buckets {
            if let Some(price) = bucket_prices.get(&index) {
                last_price = *price;
            }
            let bucket_start_ms = window.start_ms + index * bucket_ms;
            snapshots.push(MarketSnapshot::new(
                &window.condition_id,
                format!("Market {}", window.condition_id),
                bucket_start_ms / MS_PER_SECOND,
                last_price,
                Decimal::ONE - last_price,
                empty_book.clone(),
                Decimal::ZERO,
                Decimal::ZERO,
                &window.end_date,
            )?);
        }
        Ok(snapshots)
    }
}
