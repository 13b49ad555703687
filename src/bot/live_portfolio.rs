//! Live portfolio that executes real orders through the trading API.
//!
//! Order placement failures are caught and logged; a failed order returns
//! `None` with no cash debit and no position record, so the engine keeps
//! running.

use crate::bot::models::{LiveTrade, Outcome};
use crate::clob::api::TradingApi;
use crate::clob::models::{OrderRequest, OrderType};
use crate::models::{Position, Side};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, warn};

const COLLATERAL: &str = "COLLATERAL";

pub struct LivePortfolio<A> {
    api: Arc<A>,
    max_position_pct: Decimal,
    use_market_orders: bool,
    balance: Decimal,
    positions: HashMap<String, Position>,
    mark_prices: HashMap<String, Decimal>,
    trades: Vec<LiveTrade>,
    outcomes: HashMap<String, Outcome>,
    token_ids: HashMap<String, String>,
}

impl<A: TradingApi> LivePortfolio<A> {
    pub fn new(api: Arc<A>, max_position_pct: Decimal, use_market_orders: bool) -> Self {
        Self {
            api,
            max_position_pct,
            use_market_orders,
            balance: Decimal::ZERO,
            positions: HashMap::new(),
            mark_prices: HashMap::new(),
            trades: Vec::new(),
            outcomes: HashMap::new(),
            token_ids: HashMap::new(),
        }
    }

    fn order_type(&self) -> OrderType {
        if self.use_market_orders {
            OrderType::Market
        } else {
            OrderType::Limit
        }
    }

    /// Fetch the collateral balance, keeping the last known value on
    /// transient failures so the engine can continue.
    pub async fn refresh_balance(&mut self) -> Decimal {
        match self.api.get_balance(COLLATERAL).await {
            Ok(balance) => self.balance = balance.balance,
            Err(e) => {
                warn!(error = %e, last_known = %self.balance, "balance refresh failed");
            }
        }
        self.balance
    }

    /// Place a real entry order and record the position on success.
    ///
    /// Rejects duplicates and orders beyond the per-market cap before any
    /// API call. On an API error the trade is dropped entirely.
    #[allow(clippy::too_many_arguments)]
    pub async fn open_position(
        &mut self,
        condition_id: &str,
        token_id: &str,
        outcome: Outcome,
        side: Side,
        price: Decimal,
        quantity: Decimal,
        timestamp: i64,
        reason: &str,
        edge: Decimal,
    ) -> Option<LiveTrade> {
        if self.positions.contains_key(condition_id) {
            warn!(condition_id, "rejected order: duplicate position");
            return None;
        }

        let cost = price * quantity;
        let max_allocation = self.balance * self.max_position_pct;
        if cost > max_allocation || cost > self.balance {
            warn!(
                condition_id,
                cost = %cost,
                max_allocation = %max_allocation,
                balance = %self.balance,
                "rejected order: exceeds allocation cap or balance"
            );
            return None;
        }

        let request = OrderRequest {
            token_id: token_id.to_string(),
            side: side.as_str().to_string(),
            price,
            size: quantity,
            order_type: self.order_type(),
        };
        let response = match self.api.place_order(&request).await {
            Ok(response) => response,
            Err(e) => {
                error!(condition_id, error = %e, "order placement failed");
                return None;
            }
        };

        self.positions.insert(
            condition_id.to_string(),
            Position::new(condition_id, side, quantity, price, timestamp),
        );
        self.mark_prices.insert(condition_id.to_string(), price);
        self.outcomes.insert(condition_id.to_string(), outcome);
        self.token_ids
            .insert(condition_id.to_string(), token_id.to_string());

        let trade = LiveTrade {
            condition_id: condition_id.to_string(),
            token_id: token_id.to_string(),
            token_outcome: outcome,
            order_id: response.order_id,
            side,
            quantity,
            price,
            filled: response.filled,
            timestamp,
            reason: reason.to_string(),
            estimated_edge: edge,
        };
        self.trades.push(trade.clone());
        Some(trade)
    }

    /// Place a real exit order; the position is removed only on success.
    pub async fn close_position(
        &mut self,
        condition_id: &str,
        token_id: &str,
        price: Decimal,
        quantity: Decimal,
        timestamp: i64,
    ) -> Option<LiveTrade> {
        let position = self.positions.get(condition_id)?;
        let exit_side = position.side.opposite();

        let request = OrderRequest {
            token_id: token_id.to_string(),
            side: exit_side.as_str().to_string(),
            price,
            size: quantity,
            order_type: self.order_type(),
        };
        let response = match self.api.place_order(&request).await {
            Ok(response) => response,
            Err(e) => {
                error!(condition_id, error = %e, "close order failed");
                return None;
            }
        };

        self.positions.remove(condition_id);
        self.mark_prices.remove(condition_id);
        let outcome = self.outcomes.remove(condition_id).unwrap_or(Outcome::Yes);
        self.token_ids.remove(condition_id);

        let trade = LiveTrade {
            condition_id: condition_id.to_string(),
            token_id: token_id.to_string(),
            token_outcome: outcome,
            order_id: response.order_id,
            side: exit_side,
            quantity,
            price,
            filled: response.filled,
            timestamp,
            reason: "close_position".to_string(),
            estimated_edge: Decimal::ZERO,
        };
        self.trades.push(trade.clone());
        Some(trade)
    }

    /// Drop all local tracking without placing orders.
    ///
    /// Used at window rotation when resolved markets redeem on-chain; the
    /// next balance refresh picks up the redeemed value.
    pub fn clear_positions(&mut self) {
        self.positions.clear();
        self.mark_prices.clear();
        self.outcomes.clear();
        self.token_ids.clear();
    }

    pub fn mark_to_market(&mut self, condition_id: &str, current_price: Decimal) {
        if self.positions.contains_key(condition_id) {
            self.mark_prices
                .insert(condition_id.to_string(), current_price);
        }
    }

    /// Largest whole-share quantity affordable at `price` under the
    /// per-market cap and current balance.
    pub fn max_quantity_for(&self, price: Decimal) -> Decimal {
        if price <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        let max_allocation = self.balance * self.max_position_pct;
        let budget = max_allocation.min(self.balance);
        (budget / price).floor()
    }

    /// Last fetched collateral balance.
    pub fn balance(&self) -> Decimal {
        self.balance
    }

    /// Balance plus position cost plus unrealised profit.
    pub fn total_equity(&self) -> Decimal {
        let mut equity = self.balance;
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

    pub fn trades(&self) -> &[LiveTrade] {
        &self.trades
    }

    pub fn token_id_for(&self, condition_id: &str) -> Option<&str> {
        self.token_ids.get(condition_id).map(String::as_str)
    }
}
