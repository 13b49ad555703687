//! Multi-market paper portfolio.
//!
//! Tracks virtual positions across prediction markets, one per condition
//! ID, with a per-market allocation cap and mark-to-market equity.

use crate::bot::models::{Outcome, PaperTrade};
use crate::models::{Position, Side};
use rust_decimal::Decimal;
use std::collections::HashMap;

#[derive(Debug)]
pub struct PaperPortfolio {
    cash: Decimal,
    max_position_pct: Decimal,
    positions: HashMap<String, Position>,
    mark_prices: HashMap<String, Decimal>,
    trades: Vec<PaperTrade>,
    outcomes: HashMap<String, Outcome>,
    edges: HashMap<String, Decimal>,
}

impl PaperPortfolio {
    pub fn new(initial_capital: Decimal, max_position_pct: Decimal) -> Self {
        Self {
            cash: initial_capital,
            max_position_pct,
            positions: HashMap::new(),
            mark_prices: HashMap::new(),
            trades: Vec::new(),
            outcomes: HashMap::new(),
            edges: HashMap::new(),
        }
    }

    /// Open a virtual position.
    ///
    /// Rejected (returns `None`) when a position already exists for the
    /// market or when `price * quantity` exceeds the per-market allocation
    /// cap or available cash.
    #[allow(clippy::too_many_arguments)]
    pub fn open_position(
        &mut self,
        condition_id: &str,
        outcome: Outcome,
        side: Side,
        price: Decimal,
        quantity: Decimal,
        timestamp: i64,
        reason: &str,
        edge: Decimal,
    ) -> Option<PaperTrade> {
        if self.positions.contains_key(condition_id) {
            return None;
        }

        let cost = price * quantity;
        let max_allocation = self.cash * self.max_position_pct;
        if cost > max_allocation || cost > self.cash {
            return None;
        }

        self.cash -= cost;
        self.positions.insert(
            condition_id.to_string(),
            Position::new(condition_id, side, quantity, price, timestamp),
        );
        self.mark_prices.insert(condition_id.to_string(), price);
        self.outcomes.insert(condition_id.to_string(), outcome);
        self.edges.insert(condition_id.to_string(), edge);

        let trade = PaperTrade {
            condition_id: condition_id.to_string(),
            token_outcome: outcome,
            side,
            quantity,
            price,
            timestamp,
            reason: reason.to_string(),
            estimated_edge: edge,
        };
        self.trades.push(trade.clone());
        Some(trade)
    }

    /// Close a position, crediting `entry_value + pnl` back to cash.
    pub fn close_position(
        &mut self,
        condition_id: &str,
        price: Decimal,
        timestamp: i64,
    ) -> Option<PaperTrade> {
        let position = self.positions.remove(condition_id)?;
        self.mark_prices.remove(condition_id);
        let outcome = self.outcomes.remove(condition_id).unwrap_or(Outcome::Yes);
        let edge = self.edges.remove(condition_id).unwrap_or(Decimal::ZERO);

        let pnl = position.unrealised(price);
        self.cash += position.entry_price * position.quantity + pnl;

        let trade = PaperTrade {
            condition_id: condition_id.to_string(),
            token_outcome: outcome,
            side: position.side.opposite(),
            quantity: position.quantity,
            price,
            timestamp,
            reason: "close_position".to_string(),
            estimated_edge: edge,
        };
        self.trades.push(trade.clone());
        Some(trade)
    }

    /// Update the mark price for an open position; ignored otherwise.
    pub fn mark_to_market(&mut self, condition_id: &str, current_price: Decimal) {
        if self.positions.contains_key(condition_id) {
            self.mark_prices
                .insert(condition_id.to_string(), current_price);
        }
    }

    /// Cash balance, excluding unrealised gains.
    pub fn capital(&self) -> Decimal {
        self.cash
    }

    /// Cash plus position cost plus unrealised profit across all markets.
    pub fn total_equity(&self) -> Decimal {
        let mut equity = self.cash;
        for (condition_id, position) in &self.positions {
            let mark = self
                .mark_prices
                .get(condition_id)
                .copied()
                .unwrap_or(position.entry_price);
            equity += position.entry_price * position.quantity + position.unrealised(mark);
        }
        equity
    }

    pub fn positions(&self) -> &HashMap<String, Position> {
        &self.positions
    }

    pub fn trades(&self) -> &[PaperTrade] {
        &self.trades
    }

    /// Largest whole-share quantity affordable at `price` under the
    /// per-market cap and available cash.
    pub fn max_quantity_for(&self, price: Decimal) -> Decimal {
        if price <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        let max_allocation = self.cash * self.max_position_pct;
        let budget = max_allocation.min(self.cash);
        (budget / price).floor()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn portfolio() -> PaperPortfolio {
        PaperPortfolio::new(dec!(1000), dec!(0.1))
    }

    #[test]
    fn test_open_deducts_cost() {
        let mut p = portfolio();
        let trade = p.open_position(
            "cond_a",
            Outcome::Yes,
            Side::Buy,
            dec!(0.5),
            dec!(10),
            1000,
            "test",
            dec!(0.1),
        );
        assert!(trade.is_some());
        assert_eq!(p.capital(), dec!(995.0));
        assert_eq!(p.positions().len(), 1);
    }

    #[test]
    fn test_duplicate_open_rejected_and_cash_unchanged() {
        let mut p = portfolio();
        p.open_position(
            "cond_a",
            Outcome::Yes,
            Side::Buy,
            dec!(0.5),
            dec!(100),
            1000,
            "test",
            dec!(0.1),
        )
        .unwrap();
        assert_eq!(p.capital(), dec!(950.0));

        let second = p.open_position(
            "cond_a",
            Outcome::Yes,
            Side::Buy,
            dec!(0.5),
            dec!(10),
            2000,
            "test",
            dec!(0.1),
        );
        assert!(second.is_none());
        assert_eq!(p.capital(), dec!(950.0));
        assert_eq!(p.trades().len(), 1);
    }

    #[test]
    fn test_allocation_cap_rejects_oversized_position() {
        let mut p = portfolio();
        // Cap is 10% of 1000 = 100; cost 0.5 * 300 = 150
        let trade = p.open_position(
            "cond_a",
            Outcome::Yes,
            Side::Buy,
            dec!(0.5),
            dec!(300),
            1000,
            "test",
            dec!(0.1),
        );
        assert!(trade.is_none());
        assert_eq!(p.capital(), dec!(1000));
    }

    #[test]
    fn test_close_restores_cash_plus_pnl() {
        let mut p = portfolio();
        p.open_position(
            "cond_a",
            Outcome::Yes,
            Side::Buy,
            dec!(0.5),
            dec!(100),
            1000,
            "test",
            dec!(0.1),
        )
        .unwrap();
        let trade = p.close_position("cond_a", dec!(0.8), 2000).unwrap();
        assert_eq!(trade.side, Side::Sell);
        assert_eq!(p.capital(), dec!(1030.0));
        assert!(p.positions().is_empty());
    }

    #[test]
    fn test_close_at_entry_price_restores_cash_exactly() {
        let mut p = portfolio();
        p.open_position(
            "cond_a",
            Outcome::Yes,
            Side::Buy,
            dec!(0.5),
            dec!(100),
            1000,
            "test",
            dec!(0.1),
        )
        .unwrap();
        p.close_position("cond_a", dec!(0.5), 2000).unwrap();
        assert_eq!(p.capital(), dec!(1000.0));
    }

    #[test]
    fn test_close_unknown_market_is_none() {
        let mut p = portfolio();
        assert!(p.close_position("cond_x", dec!(0.5), 1000).is_none());
    }

    #[test]
    fn test_total_equity_with_mark_to_market() {
        let mut p = portfolio();
        p.open_position(
            "cond_a",
            Outcome::Yes,
            Side::Buy,
            dec!(0.5),
            dec!(100),
            1000,
            "test",
            dec!(0.1),
        )
        .unwrap();
        assert_eq!(p.total_equity(), dec!(1000.0));

        p.mark_to_market("cond_a", dec!(0.7));
        // 950 cash + 50 cost + 20 unrealised
        assert_eq!(p.total_equity(), dec!(1020.0));
    }

    #[test]
    fn test_mark_to_market_ignored_without_position() {
        let mut p = portfolio();
        p.mark_to_market("cond_a", dec!(0.7));
        assert_eq!(p.total_equity(), dec!(1000));
    }

    #[test]
    fn test_max_quantity_for() {
        let p = portfolio();
        // Budget 100 at price 0.5 -> 200 shares
        assert_eq!(p.max_quantity_for(dec!(0.5)), dec!(200));
        assert_eq!(p.max_quantity_for(dec!(0.3)), dec!(333));
        assert_eq!(p.max_quantity_for(Decimal::ZERO), Decimal::ZERO);
    }

    #[test]
    fn test_cash_never_negative_under_accepted_opens() {
        let mut p = PaperPortfolio::new(dec!(100), dec!(1));
        for i in 0..10 {
            p.open_position(
                &format!("cond_{i}"),
                Outcome::Yes,
                Side::Buy,
                dec!(0.9),
                dec!(20),
                1000,
                "test",
                Decimal::ZERO,
            );
        }
        assert!(p.capital() >= Decimal::ZERO);
    }
}
