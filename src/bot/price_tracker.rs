//! Many-to-one price tracker mapping asset IDs onto market sides.
//!
//! Each market registers its YES and NO token IDs; every feed event for one
//! of those tokens updates the corresponding side's last price. An update
//! reports which market it touched so callers can cheaply detect "did this
//! event change this market's (yes, no) pair".

use crate::bot::models::Outcome;
use rust_decimal::Decimal;
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct PriceTracker {
    /// asset_id -> (condition_id, side)
    assets: HashMap<String, (String, Outcome)>,
    /// condition_id -> (last yes price, last no price)
    prices: HashMap<String, (Option<Decimal>, Option<Decimal>)>,
}

impl PriceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a market's YES and NO token IDs.
    pub fn register_market(&mut self, condition_id: &str, yes_token_id: &str, no_token_id: &str) {
        self.assets.insert(
            yes_token_id.to_string(),
            (condition_id.to_string(), Outcome::Yes),
        );
        self.assets.insert(
            no_token_id.to_string(),
            (condition_id.to_string(), Outcome::No),
        );
        self.prices
            .entry(condition_id.to_string())
            .or_insert((None, None));
    }

    /// Record a price for an asset. Returns the affected condition ID, or
    /// `None` for an unknown asset.
    pub fn update(&mut self, asset_id: &str, price: Decimal) -> Option<String> {
        let (condition_id, side) = self.assets.get(asset_id)?.clone();
        let entry = self
            .prices
            .entry(condition_id.clone())
            .or_insert((None, None));
        match side {
            Outcome::Yes => entry.0 = Some(price),
            Outcome::No => entry.1 = Some(price),
        }
        Some(condition_id)
    }

    /// Latest `(yes, no)` pair once both sides have been seen.
    pub fn prices(&self, condition_id: &str) -> Option<(Decimal, Decimal)> {
        let (yes, no) = self.prices.get(condition_id)?;
        Some(((*yes)?, (*no)?))
    }

    /// Drop every registration and price (market rotation).
    pub fn clear(&mut self) {
        self.assets.clear();
        self.prices.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_unknown_asset_returns_none() {
        let mut tracker = PriceTracker::new();
        assert_eq!(tracker.update("nope", dec!(0.5)), None);
    }

    #[test]
    fn test_pair_available_after_both_sides() {
        let mut tracker = PriceTracker::new();
        tracker.register_market("cond_a", "yes_tok", "no_tok");
        assert_eq!(tracker.prices("cond_a"), None);

        assert_eq!(tracker.update("yes_tok", dec!(0.6)).as_deref(), Some("cond_a"));
        assert_eq!(tracker.prices("cond_a"), None);

        assert_eq!(tracker.update("no_tok", dec!(0.4)).as_deref(), Some("cond_a"));
        assert_eq!(tracker.prices("cond_a"), Some((dec!(0.6), dec!(0.4))));
    }

    #[test]
    fn test_update_overwrites_side() {
        let mut tracker = PriceTracker::new();
        tracker.register_market("cond_a", "yes_tok", "no_tok");
        tracker.update("yes_tok", dec!(0.6));
        tracker.update("no_tok", dec!(0.4));
        tracker.update("yes_tok", dec!(0.65));
        assert_eq!(tracker.prices("cond_a"), Some((dec!(0.65), dec!(0.4))));
    }

    #[test]
    fn test_two_markets_are_independent() {
        let mut tracker = PriceTracker::new();
        tracker.register_market("cond_a", "a_yes", "a_no");
        tracker.register_market("cond_b", "b_yes", "b_no");
        tracker.update("a_yes", dec!(0.7));
        tracker.update("b_yes", dec!(0.3));
        tracker.update("b_no", dec!(0.7));
        assert_eq!(tracker.prices("cond_a"), None);
        assert_eq!(tracker.prices("cond_b"), Some((dec!(0.3), dec!(0.7))));
    }

    #[test]
    fn test_clear_drops_everything() {
        let mut tracker = PriceTracker::new();
        tracker.register_market("cond_a", "yes_tok", "no_tok");
        tracker.update("yes_tok", dec!(0.6));
        tracker.clear();
        assert_eq!(tracker.update("yes_tok", dec!(0.6)), None);
        assert_eq!(tracker.prices("cond_a"), None);
    }
}
