//! Single-asset ledger used by the backtest engine.
//!
//! Holds cash and at most one open position. Opening deducts cost plus fee
//! from cash; closing credits the entry value plus net PnL, so final capital
//! equals initial capital plus the sum of trade PnLs.

use crate::models::{Position, Side, Trade};
use rust_decimal::Decimal;

#[derive(Debug)]
pub struct Portfolio {
    cash: Decimal,
    position: Option<Position>,
    entry_fee: Decimal,
    trades: Vec<Trade>,
}

impl Portfolio {
    pub fn new(initial_capital: Decimal) -> Self {
        Self {
            cash: initial_capital,
            position: None,
            entry_fee: Decimal::ZERO,
            trades: Vec::new(),
        }
    }

    pub fn cash(&self) -> Decimal {
        self.cash
    }

    pub fn position(&self) -> Option<&Position> {
        self.position.as_ref()
    }

    pub fn trades(&self) -> &[Trade] {
        &self.trades
    }

    /// Open a position, deducting `price * quantity + fee` from cash.
    /// Ignored when a position is already open.
    pub fn open(
        &mut self,
        symbol: &str,
        side: Side,
        price: Decimal,
        quantity: Decimal,
        fee: Decimal,
        timestamp: i64,
    ) {
        if self.position.is_some() {
            return;
        }
        self.cash -= price * quantity + fee;
        self.entry_fee = fee;
        self.position = Some(Position::new(symbol, side, quantity, price, timestamp));
    }

    /// Close the open position.
    ///
    /// Cash receives the gross proceeds net of the exit fee; the entry fee
    /// was already paid at open. Net effect across the round trip is
    /// exactly the trade's `pnl`.
    pub fn close(&mut self, exit_price: Decimal, exit_fee: Decimal, timestamp: i64) -> Option<Trade> {
        let position = self.position.take()?;
        let entry_value = position.entry_price * position.quantity;
        let raw_pnl = position.unrealised(exit_price);
        let trade = position.close(exit_price, timestamp, self.entry_fee, exit_fee);
        self.cash += entry_value + raw_pnl - exit_fee;
        self.entry_fee = Decimal::ZERO;
        self.trades.push(trade.clone());
        Some(trade)
    }

    /// Close any open position at `last_price` with no further costs.
    pub fn force_close_all(&mut self, last_price: Decimal, timestamp: i64) -> Option<Trade> {
        self.close(last_price, Decimal::ZERO, timestamp)
    }

    /// Cash plus position value marked at `mark`.
    pub fn equity(&self, mark: Decimal) -> Decimal {
        match &self.position {
            Some(position) => {
                self.cash + position.entry_price * position.quantity + position.unrealised(mark)
            }
            None => self.cash,
        }
    }
}
