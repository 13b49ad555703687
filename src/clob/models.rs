//! Typed data models for prediction market data.
//!
//! Frozen value objects that insulate the engines from the raw JSON shapes
//! of the CLOB and Gamma APIs. All monetary values use `Decimal`.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Single price level in an order book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderLevel {
    pub price: Decimal,
    pub size: Decimal,
}

/// Order book snapshot for one outcome token.
///
/// Bids are ordered best-to-worst (price descending), asks ascending.
/// An empty book is a valid state with zero spread and midpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBook {
    pub token_id: String,
    pub bids: Vec<OrderLevel>,
    pub asks: Vec<OrderLevel>,
    pub spread: Decimal,
    pub midpoint: Decimal,
}

impl OrderBook {
    /// Build a book from unordered levels, sorting each side and deriving
    /// spread and midpoint from the best bid/ask. Either side may be empty,
    /// which zeroes the derived fields.
    pub fn from_levels(
        token_id: impl Into<String>,
        mut bids: Vec<OrderLevel>,
        mut asks: Vec<OrderLevel>,
    ) -> Self {
        bids.sort_by(|a, b| b.price.cmp(&a.price));
        asks.sort_by(|a, b| a.price.cmp(&b.price));

        let best_bid = bids.first().map(|l| l.price);
        let best_ask = asks.first().map(|l| l.price);
        let (spread, midpoint) = match (best_bid, best_ask) {
            (Some(bid), Some(ask)) => ((ask - bid), (bid + ask) / Decimal::TWO),
            _ => (Decimal::ZERO, Decimal::ZERO),
        };

        Self {
            token_id: token_id.into(),
            bids,
            asks,
            spread,
            midpoint,
        }
    }

    /// An empty book for a token with no resting liquidity.
    pub fn empty(token_id: impl Into<String>) -> Self {
        Self {
            token_id: token_id.into(),
            bids: Vec::new(),
            asks: Vec::new(),
            spread: Decimal::ZERO,
            midpoint: Decimal::ZERO,
        }
    }
}

/// A YES or NO outcome token with its current price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketToken {
    pub token_id: String,
    pub outcome: String,
    /// Probability-like price between 0 and 1.
    pub price: Decimal,
}

/// A prediction market: metadata plus its outcome tokens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Market {
    pub condition_id: String,
    pub question: String,
    pub description: String,
    pub tokens: Vec<MarketToken>,
    /// ISO-8601 resolution date.
    pub end_date: String,
    pub volume: Decimal,
    pub liquidity: Decimal,
    pub active: bool,
}

/// Order type: GTC limit or FOK market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Limit,
    Market,
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderType::Limit => f.write_str("limit"),
            OrderType::Market => f.write_str("market"),
        }
    }
}

/// Parameters for submitting an order.
///
/// `price` is the limit price in the open interval (0, 1); market orders
/// ignore it at the venue but it is kept for the trade log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub token_id: String,
    pub side: String,
    pub price: Decimal,
    pub size: Decimal,
    pub order_type: OrderType,
}

/// Result of submitting an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderResponse {
    pub order_id: String,
    pub status: String,
    pub token_id: String,
    pub side: String,
    pub price: Decimal,
    pub size: Decimal,
    pub filled: Decimal,
}

/// Balance and allowance for a collateral or conditional asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub asset_type: String,
    pub balance: Decimal,
    pub allowance: Decimal,
}
