//! Late snipe strategy for short-lived binary markets.
//!
//! In the final seconds of a market's life, a heavily one-sided price is
//! usually right. When fewer than `window_seconds` remain and one side
//! trades at or above `threshold`, bet that side once and hold to
//! resolution.

use crate::bot::models::MarketSnapshot;
use crate::bot::PredictionMarketStrategy;
use crate::models::{Side, Signal};
use anyhow::{ensure, Result};
use chrono::DateTime;
use rust_decimal::Decimal;
use std::collections::HashSet;

const MIN_THRESHOLD_EXCLUSIVE: Decimal = Decimal::from_parts(5, 0, 0, false, 1);

pub struct LateSnipeStrategy {
    threshold: Decimal,
    window_seconds: i64,
    fired: HashSet<String>,
}

impl LateSnipeStrategy {
    /// `threshold` must lie in the open interval (0.5, 1.0) and the window
    /// must be at least one second.
    pub fn new(threshold: Decimal, window_seconds: i64) -> Result<Self> {
        ensure!(
            MIN_THRESHOLD_EXCLUSIVE < threshold && threshold < Decimal::ONE,
            "threshold must be in (0.5, 1.0), got {threshold}"
        );
        ensure!(
            window_seconds >= 1,
            "window_seconds must be >= 1, got {window_seconds}"
        );
        Ok(Self {
            threshold,
            window_seconds,
            fired: HashSet::new(),
        })
    }
}

impl PredictionMarketStrategy for LateSnipeStrategy {
    fn name(&self) -> String {
        format!("pm_late_snipe_{}_{}s", self.threshold, self.window_seconds)
    }

    fn on_snapshot(
        &mut self,
        snapshot: &MarketSnapshot,
        _history: &[MarketSnapshot],
    ) -> Option<Signal> {
        if self.fired.contains(&snapshot.condition_id) {
            return None;
        }

        let end_ts = parse_end_date(&snapshot.end_date)?;
        // Still fires at or past the end time; resolution can lag.
        let remaining = (end_ts - snapshot.timestamp).max(0);
        if remaining > self.window_seconds {
            return None;
        }

        let signal = if snapshot.yes_price >= self.threshold {
            Signal::new(
                Side::Buy,
                &snapshot.condition_id,
                Decimal::ONE,
                format!(
                    "Late snipe YES at {} with {remaining}s remaining",
                    snapshot.yes_price
                ),
            )
            .ok()
        } else if snapshot.no_price >= self.threshold {
            Signal::new(
                Side::Sell,
                &snapshot.condition_id,
                Decimal::ONE,
                format!(
                    "Late snipe NO at {} with {remaining}s remaining",
                    snapshot.no_price
                ),
            )
            .ok()
        } else {
            None
        };

        if signal.is_some() {
            self.fired.insert(snapshot.condition_id.clone());
        }
        signal
    }
}

fn parse_end_date(end_date: &str) -> Option<i64> {
    if end_date.trim().is_empty() {
        return None;
    }
    DateTime::parse_from_rfc3339(end_date)
        .ok()
        .map(|dt| dt.timestamp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clob::models::OrderBook;
    use rust_decimal_macros::dec;

    const THRESHOLD: Decimal = Decimal::from_parts(90, 0, 0, false, 2);
    const WINDOW: i64 = 60;
    // 2026-02-22T12:05:00+00:00
    const END_EPOCH: i64 = 1771761900;
    const END_DATE: &str = "2026-02-22T12:05:00+00:00";

    fn snap(ts: i64, yes: Decimal, no: Decimal, end_date: &str) -> MarketSnapshot {
        MarketSnapshot::new(
            "cond_test",
            "BTC Up or Down?",
            ts,
            yes,
            no,
            OrderBook::empty("tok1"),
            dec!(1000),
            dec!(500),
            end_date,
        )
        .unwrap()
    }

    fn strategy() -> LateSnipeStrategy {
        LateSnipeStrategy::new(THRESHOLD, WINDOW).unwrap()
    }

    #[test]
    fn test_name_format_includes_parameters() {
        let s = LateSnipeStrategy::new(dec!(0.85), 45).unwrap();
        assert_eq!(s.name(), "pm_late_snipe_0.85_45s");
    }

    #[test]
    fn test_threshold_bounds_rejected() {
        assert!(LateSnipeStrategy::new(dec!(0.5), 60).is_err());
        assert!(LateSnipeStrategy::new(dec!(1.0), 60).is_err());
        assert!(LateSnipeStrategy::new(dec!(0.51), 60).is_ok());
    }

    #[test]
    fn test_window_seconds_must_be_positive() {
        assert!(LateSnipeStrategy::new(dec!(0.9), 0).is_err());
    }

    #[test]
    fn test_no_signal_outside_window() {
        let mut s = strategy();
        let snapshot = snap(END_EPOCH - 120, dec!(0.95), dec!(0.05), END_DATE);
        assert!(s.on_snapshot(&snapshot, &[]).is_none());
    }

    #[test]
    fn test_buy_signal_when_yes_above_threshold() {
        let mut s = strategy();
        let snapshot = snap(END_EPOCH - 30, dec!(0.92), dec!(0.08), END_DATE);
        let signal = s.on_snapshot(&snapshot, &[]).unwrap();
        assert_eq!(signal.side, Side::Buy);
        assert!(signal.reason.contains("Late snipe YES"));
        assert!(signal.reason.contains("30s remaining"));
    }

    #[test]
    fn test_sell_signal_when_no_above_threshold() {
        let mut s = strategy();
        let snapshot = snap(END_EPOCH - 45, dec!(0.08), dec!(0.92), END_DATE);
        let signal = s.on_snapshot(&snapshot, &[]).unwrap();
        assert_eq!(signal.side, Side::Sell);
        assert!(signal.reason.contains("Late snipe NO"));
    }

    #[test]
    fn test_no_signal_below_threshold() {
        let mut s = strategy();
        let snapshot = snap(END_EPOCH - 30, dec!(0.60), dec!(0.40), END_DATE);
        assert!(s.on_snapshot(&snapshot, &[]).is_none());
    }

    #[test]
    fn test_fires_once_per_market() {
        let mut s = strategy();
        let first = snap(END_EPOCH - 30, dec!(0.92), dec!(0.08), END_DATE);
        let second = snap(END_EPOCH - 25, dec!(0.95), dec!(0.05), END_DATE);
        assert!(s.on_snapshot(&first, &[]).is_some());
        assert!(s.on_snapshot(&second, &[first]).is_none());
    }

    #[test]
    fn test_signal_at_exact_threshold() {
        let mut s = strategy();
        let snapshot = snap(END_EPOCH - 10, dec!(0.90), dec!(0.10), END_DATE);
        let signal = s.on_snapshot(&snapshot, &[]).unwrap();
        assert_eq!(signal.side, Side::Buy);
    }

    #[test]
    fn test_signal_at_window_boundary() {
        let mut s = strategy();
        let snapshot = snap(END_EPOCH - WINDOW, dec!(0.95), dec!(0.05), END_DATE);
        assert!(s.on_snapshot(&snapshot, &[]).is_some());
    }

    #[test]
    fn test_no_signal_with_empty_end_date() {
        let mut s = strategy();
        let snapshot = snap(END_EPOCH - 10, dec!(0.95), dec!(0.05), "");
        assert!(s.on_snapshot(&snapshot, &[]).is_none());
    }

    #[test]
    fn test_no_signal_with_invalid_end_date() {
        let mut s = strategy();
        let snapshot = snap(END_EPOCH - 10, dec!(0.95), dec!(0.05), "not-a-date");
        assert!(s.on_snapshot(&snapshot, &[]).is_none());
    }

    #[test]
    fn test_fires_after_market_end() {
        let mut s = strategy();
        let snapshot = snap(END_EPOCH + 5, dec!(0.99), dec!(0.01), END_DATE);
        assert!(s.on_snapshot(&snapshot, &[]).is_some());
    }

    #[test]
    fn test_configurable_window() {
        let mut s = LateSnipeStrategy::new(THRESHOLD, 30).unwrap();
        let outside = snap(END_EPOCH - 45, dec!(0.95), dec!(0.05), END_DATE);
        assert!(s.on_snapshot(&outside, &[]).is_none());
        let inside = snap(END_EPOCH - 25, dec!(0.95), dec!(0.05), END_DATE);
        assert!(s.on_snapshot(&inside, &[]).is_some());
    }
}
