//! Polymarket-style CLOB and Gamma API integration.
//!
//! Typed models, the `TradingApi` trait the engines program against, and a
//! reqwest-backed client with HMAC-signed order placement.

pub mod api;
pub mod client;
pub mod error;
pub mod gamma;
pub mod models;

pub use api::TradingApi;
pub use client::{ClobClient, ClobCredentials};
pub use error::ClobError;
pub use models::{
    Balance, Market, MarketToken, OrderBook, OrderLevel, OrderRequest, OrderResponse, OrderType,
};
