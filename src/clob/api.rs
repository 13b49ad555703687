//! The trading API the engines program against.

use crate::clob::error::ClobError;
use crate::clob::models::{Balance, Market, OrderBook, OrderRequest, OrderResponse};
use async_trait::async_trait;

/// Abstract prediction-market venue.
///
/// `get_market` fails with `NotFound` for unknown markets; `get_order_book`
/// returns an empty book rather than failing when there is no resting
/// liquidity; `discover_series_markets` may legitimately return an empty
/// list. `get_balance` and `place_order` need authentication and are only
/// used by the live engine.
#[async_trait]
pub trait TradingApi: Send + Sync {
    async fn get_market(&self, condition_id: &str) -> Result<Market, ClobError>;

    async fn get_order_book(&self, token_id: &str) -> Result<OrderBook, ClobError>;

    /// Resolve event series slugs into `(condition_id, end_date_iso)` pairs
    /// for the currently active markets. With `include_next`, markets of the
    /// upcoming 5-minute window are included before they open.
    async fn discover_series_markets(
        &self,
        series_slugs: &[String],
        include_next: bool,
    ) -> Result<Vec<(String, String)>, ClobError>;

    async fn get_balance(&self, asset_type: &str) -> Result<Balance, ClobError>;

    async fn place_order(&self, request: &OrderRequest) -> Result<OrderResponse, ClobError>;
}
