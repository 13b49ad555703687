//! reqwest-backed CLOB client.
//!
//! Public market data (markets, midpoints, books) needs no authentication.
//! Balance and order placement sign each request with HMAC-SHA256 L2
//! headers derived from API credentials.

use crate::clob::api::TradingApi;
use crate::clob::error::ClobError;
use crate::clob::gamma;
use crate::clob::models::{
    Balance, Market, MarketToken, OrderBook, OrderLevel, OrderRequest, OrderResponse, OrderType,
};
use crate::models::safe_decimal;
use async_trait::async_trait;
use base64::engine::general_purpose::{STANDARD as BASE64, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use hmac::{Hmac, Mac};
use reqwest::StatusCode;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;
use sha2::Sha256;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

const CLOB_API_BASE: &str = "https://clob.polymarket.com";
const GAMMA_API_BASE: &str = "https://gamma-api.polymarket.com";

const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF: Duration = Duration::from_millis(100);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// On-chain USDC uses 6 decimal places; balances come back in raw units.
const USDC_UNITS: Decimal = Decimal::from_parts(1_000_000, 0, 0, false, 0);

type HmacSha256 = Hmac<Sha256>;

/// L2 API credentials plus the funding wallet address.
#[derive(Debug, Clone)]
pub struct ClobCredentials {
    pub api_key: String,
    pub secret: String,
    pub passphrase: String,
    pub wallet_address: String,
}

pub struct ClobClient {
    http: reqwest::Client,
    clob_base: String,
    gamma_base: String,
    credentials: Option<ClobCredentials>,
}

impl ClobClient {
    /// Unauthenticated client for market data and discovery.
    pub fn new() -> Self {
        Self::with_bases(CLOB_API_BASE, GAMMA_API_BASE)
    }

    pub fn with_bases(clob_base: impl Into<String>, gamma_base: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent("polybot/0.1")
            .build()
            .expect("reqwest client");
        Self {
            http,
            clob_base: clob_base.into(),
            gamma_base: gamma_base.into(),
            credentials: None,
        }
    }

    /// Enable balance queries and order placement.
    pub fn with_credentials(mut self, credentials: ClobCredentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    fn require_auth(&self) -> Result<&ClobCredentials, ClobError> {
        self.credentials
            .as_ref()
            .ok_or_else(|| ClobError::Auth("api credentials required for trading".to_string()))
    }

    /// GET with bounded retries on transport errors and 5xx responses.
    async fn get_with_retry(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<reqwest::Response, ClobError> {
        let mut backoff = INITIAL_BACKOFF;
        let mut last_err: Option<ClobError> = None;
        for attempt in 0..MAX_RETRIES {
            match self.http.get(url).query(query).send().await {
                Ok(response) if response.status().is_server_error() => {
                    last_err = Some(ClobError::Api {
                        status: response.status().as_u16(),
                        msg: "server error".to_string(),
                    });
                }
                Ok(response) => return Ok(response),
                Err(e) => last_err = Some(ClobError::Transport(e)),
            }
            if attempt + 1 < MAX_RETRIES {
                sleep(backoff).await;
                backoff *= 2;
            }
        }
        Err(last_err.expect("at least one attempt"))
    }

    async fn fetch_midpoint(&self, token_id: &str) -> Option<Decimal> {
        let url = format!("{}/midpoint", self.clob_base);
        let response = self
            .get_with_retry(&url, &[("token_id", token_id)])
            .await
            .ok()?;
        let value: Value = response.json().await.ok()?;
        let mid = value.get("mid")?;
        value_to_decimal(mid).ok()
    }

    fn sign_request(
        credentials: &ClobCredentials,
        method: &str,
        path: &str,
        body: &str,
        timestamp: i64,
    ) -> Result<String, ClobError> {
        let message = format!("{timestamp}{method}{path}{body}");

        // Secrets show up URL-safe encoded, with or without padding.
        let secret_bytes = URL_SAFE
            .decode(&credentials.secret)
            .or_else(|_| URL_SAFE_NO_PAD.decode(&credentials.secret))
            .or_else(|_| BASE64.decode(&credentials.secret))
            .map_err(|e| ClobError::Auth(format!("cannot decode api secret: {e}")))?;

        let mut mac = HmacSha256::new_from_slice(&secret_bytes)
            .map_err(|e| ClobError::Auth(format!("hmac key error: {e}")))?;
        mac.update(message.as_bytes());
        Ok(URL_SAFE.encode(mac.finalize().into_bytes()))
    }

    fn auth_headers(
        &self,
        method: &str,
        path: &str,
        body: &str,
    ) -> Result<Vec<(&'static str, String)>, ClobError> {
        let credentials = self.require_auth()?;
        let timestamp = chrono::Utc::now().timestamp();
        let signature = Self::sign_request(credentials, method, path, body, timestamp)?;
        Ok(vec![
            ("POLY_ADDRESS", credentials.wallet_address.clone()),
            ("POLY_API_KEY", credentials.api_key.clone()),
            ("POLY_SIGNATURE", signature),
            ("POLY_TIMESTAMP", timestamp.to_string()),
            ("POLY_PASSPHRASE", credentials.passphrase.clone()),
        ])
    }
}

impl Default for ClobClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TradingApi for ClobClient {
    async fn get_market(&self, condition_id: &str) -> Result<Market, ClobError> {
        let url = format!("{}/markets/{condition_id}", self.clob_base);
        let response = self.get_with_retry(&url, &[]).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(ClobError::NotFound(condition_id.to_string()));
        }
        let response = response.error_for_status()?;
        let raw: Value = response.json().await?;
        let mut market = parse_market(condition_id, &raw)?;

        // Enrich token prices with live midpoints; keep the static price on
        // a per-token failure.
        let midpoints =
            futures_util::future::join_all(market.tokens.iter().map(|t| {
                let token_id = t.token_id.clone();
                async move { self.fetch_midpoint(&token_id).await }
            }))
            .await;
        for (token, midpoint) in market.tokens.iter_mut().zip(midpoints) {
            if let Some(price) = midpoint {
                token.price = price;
            }
        }
        Ok(market)
    }

    async fn get_order_book(&self, token_id: &str) -> Result<OrderBook, ClobError> {
        let url = format!("{}/book", self.clob_base);
        let response = self.get_with_retry(&url, &[("token_id", token_id)]).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(OrderBook::empty(token_id));
        }
        let response = response.error_for_status()?;
        let raw: Value = response.json().await?;
        parse_order_book(token_id, &raw)
    }

    async fn discover_series_markets(
        &self,
        series_slugs: &[String],
        include_next: bool,
    ) -> Result<Vec<(String, String)>, ClobError> {
        let now = chrono::Utc::now().timestamp();
        gamma::discover_series_markets(&self.http, &self.gamma_base, series_slugs, include_next, now)
            .await
    }

    async fn get_balance(&self, asset_type: &str) -> Result<Balance, ClobError> {
        let path = "/balance-allowance";
        let headers = self.auth_headers("GET", path, "")?;
        let mut request = self
            .http
            .get(format!("{}{path}", self.clob_base))
            .query(&[("asset_type", asset_type), ("signature_type", "0")]);
        for (key, value) in headers {
            request = request.header(key, value);
        }
        let response = request.send().await?.error_for_status()?;
        let raw: Value = response.json().await?;

        let balance = raw
            .get("balance")
            .map(value_to_decimal)
            .transpose()?
            .unwrap_or(Decimal::ZERO);
        let allowance = raw
            .get("allowance")
            .map(value_to_decimal)
            .transpose()?
            .unwrap_or(Decimal::ZERO);
        Ok(Balance {
            asset_type: asset_type.to_string(),
            balance: balance / USDC_UNITS,
            allowance: allowance / USDC_UNITS,
        })
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<OrderResponse, ClobError> {
        if request.size <= Decimal::ZERO {
            return Err(ClobError::malformed(format!(
                "order size must be positive, got {}",
                request.size
            )));
        }
        if request.order_type == OrderType::Limit
            && !(Decimal::ZERO < request.price && request.price < Decimal::ONE)
        {
            return Err(ClobError::malformed(format!(
                "limit price must be inside (0, 1), got {}",
                request.price
            )));
        }

        let payload = OrderPayload {
            token_id: request.token_id.clone(),
            price: request.price.to_string(),
            size: request.size.to_string(),
            side: request.side.clone(),
            // Market orders execute fill-or-kill, limit orders rest GTC.
            time_in_force: match request.order_type {
                OrderType::Market => "FOK",
                OrderType::Limit => "GTC",
            },
        };
        let body = serde_json::to_string(&payload)
            .map_err(|e| ClobError::malformed(format!("order serialization: {e}")))?;

        let path = "/order";
        let headers = self.auth_headers("POST", path, &body)?;
        let mut http_request = self
            .http
            .post(format!("{}{path}", self.clob_base))
            .header("Content-Type", "application/json");
        for (key, value) in headers {
            http_request = http_request.header(key, value);
        }

        debug!(
            token_id = %request.token_id,
            side = %request.side,
            price = %request.price,
            size = %request.size,
            "submitting order"
        );
        let response = http_request.body(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            warn!(status = %status, error = %error_text, "order rejected");
            return Err(ClobError::Api {
                status: status.as_u16(),
                msg: error_text,
            });
        }

        let raw: Value = response.json().await?;
        Ok(parse_order_response(&raw, request))
    }
}

#[derive(Debug, Serialize)]
struct OrderPayload {
    token_id: String,
    price: String,
    size: String,
    side: String,
    time_in_force: &'static str,
}

/// Convert a JSON number or string to `Decimal` without a float round trip.
fn value_to_decimal(value: &Value) -> Result<Decimal, ClobError> {
    match value {
        Value::Null => Ok(Decimal::ZERO),
        Value::Number(n) => safe_decimal(&n.to_string())
            .map_err(|e| ClobError::malformed(e.to_string())),
        Value::String(s) => safe_decimal(s).map_err(|e| ClobError::malformed(e.to_string())),
        other => Err(ClobError::malformed(format!(
            "expected number or string, got {other}"
        ))),
    }
}

fn parse_market(condition_id: &str, raw: &Value) -> Result<Market, ClobError> {
    let tokens_raw = raw
        .get("tokens")
        .and_then(Value::as_array)
        .ok_or_else(|| ClobError::malformed("market response missing tokens"))?;

    let mut tokens = Vec::with_capacity(tokens_raw.len());
    for token in tokens_raw {
        let token_id = token
            .get("token_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let outcome = token
            .get("outcome")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let price = token
            .get("price")
            .map(value_to_decimal)
            .transpose()?
            .unwrap_or(Decimal::ZERO);
        tokens.push(MarketToken {
            token_id,
            outcome,
            price,
        });
    }

    let str_field = |key: &str| -> String {
        raw.get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    let decimal_field = |key: &str| -> Result<Decimal, ClobError> {
        raw.get(key)
            .map(value_to_decimal)
            .transpose()
            .map(|d| d.unwrap_or(Decimal::ZERO))
    };

    Ok(Market {
        condition_id: condition_id.to_string(),
        question: str_field("question"),
        description: str_field("description"),
        tokens,
        end_date: {
            let end = str_field("end_date_iso");
            if end.is_empty() {
                str_field("end_date")
            } else {
                end
            }
        },
        volume: decimal_field("volume")?,
        liquidity: decimal_field("liquidity")?,
        active: raw.get("active").and_then(Value::as_bool).unwrap_or(true),
    })
}

fn parse_order_book(token_id: &str, raw: &Value) -> Result<OrderBook, ClobError> {
    let parse_side = |key: &str| -> Result<Vec<OrderLevel>, ClobError> {
        let mut levels = Vec::new();
        if let Some(entries) = raw.get(key).and_then(Value::as_array) {
            for entry in entries {
                let price = entry
                    .get("price")
                    .map(value_to_decimal)
                    .transpose()?
                    .unwrap_or(Decimal::ZERO);
                let size = entry
                    .get("size")
                    .map(value_to_decimal)
                    .transpose()?
                    .unwrap_or(Decimal::ZERO);
                levels.push(OrderLevel { price, size });
            }
        }
        Ok(levels)
    };

    let bids = parse_side("bids")?;
    let asks = parse_side("asks")?;
    Ok(OrderBook::from_levels(token_id, bids, asks))
}

/// The order endpoint varies its key names; fall back to the request values
/// for anything missing.
fn parse_order_response(raw: &Value, request: &OrderRequest) -> OrderResponse {
    let order_id = raw
        .get("orderID")
        .or_else(|| raw.get("id"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let status = raw
        .get("status")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string();
    let filled = raw
        .get("size_matched")
        .or_else(|| raw.get("filled"))
        .and_then(|v| value_to_decimal(v).ok())
        .unwrap_or(Decimal::ZERO);
    OrderResponse {
        order_id,
        status,
        token_id: request.token_id.clone(),
        side: request.side.clone(),
        price: request.price,
        size: request.size,
        filled,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_order_book_sorts_sides() {
        let raw: Value = serde_json::from_str(
            r#"{
                "bids": [{"price": "0.40", "size": "10"}, {"price": "0.45", "size": "5"}],
                "asks": [{"price": "0.55", "size": "8"}, {"price": "0.50", "size": "2"}]
            }"#,
        )
        .unwrap();
        let book = parse_order_book("tok", &raw).unwrap();
        assert_eq!(book.bids[0].price, dec!(0.45));
        assert_eq!(book.asks[0].price, dec!(0.50));
        assert_eq!(book.spread, dec!(0.05));
        assert_eq!(book.midpoint, dec!(0.475));
    }

    #[test]
    fn test_parse_order_book_accepts_empty() {
        let raw: Value = serde_json::from_str(r#"{"bids": [], "asks": []}"#).unwrap();
        let book = parse_order_book("tok", &raw).unwrap();
        assert!(book.bids.is_empty());
        assert_eq!(book.midpoint, Decimal::ZERO);
    }

    #[test]
    fn test_parse_market_tokens_and_fields() {
        let raw: Value = serde_json::from_str(
            r#"{
                "question": "BTC up?",
                "description": "resolves up or down",
                "end_date_iso": "2026-02-22",
                "volume": "12345.5",
                "liquidity": 678,
                "active": true,
                "tokens": [
                    {"token_id": "111", "outcome": "Yes", "price": 0.6},
                    {"token_id": "222", "outcome": "No", "price": "0.4"}
                ]
            }"#,
        )
        .unwrap();
        let market = parse_market("0xabc", &raw).unwrap();
        assert_eq!(market.condition_id, "0xabc");
        assert_eq!(market.tokens.len(), 2);
        assert_eq!(market.tokens[0].price, dec!(0.6));
        assert_eq!(market.tokens[1].price, dec!(0.4));
        assert_eq!(market.volume, dec!(12345.5));
        assert_eq!(market.liquidity, dec!(678));
    }

    #[test]
    fn test_parse_market_without_tokens_is_malformed() {
        let raw: Value = serde_json::from_str(r#"{"question": "?"}"#).unwrap();
        assert!(parse_market("0xabc", &raw).is_err());
    }

    #[test]
    fn test_order_response_falls_back_to_request() {
        let request = OrderRequest {
            token_id: "111".to_string(),
            side: "BUY".to_string(),
            price: dec!(0.55),
            size: dec!(10),
            order_type: OrderType::Market,
        };
        let raw: Value = serde_json::from_str(r#"{"orderID": "ord-1", "status": "matched"}"#).unwrap();
        let response = parse_order_response(&raw, &request);
        assert_eq!(response.order_id, "ord-1");
        assert_eq!(response.status, "matched");
        assert_eq!(response.price, dec!(0.55));
        assert_eq!(response.filled, Decimal::ZERO);
    }

    #[test]
    fn test_signature_is_deterministic() {
        let credentials = ClobCredentials {
            api_key: "key".to_string(),
            secret: URL_SAFE.encode(b"super-secret"),
            passphrase: "pass".to_string(),
            wallet_address: "0xwallet".to_string(),
        };
        let a = ClobClient::sign_request(&credentials, "POST", "/order", "{}", 1_700_000_000)
            .unwrap();
        let b = ClobClient::sign_request(&credentials, "POST", "/order", "{}", 1_700_000_000)
            .unwrap();
        assert_eq!(a, b);
        let c = ClobClient::sign_request(&credentials, "POST", "/order", "{}", 1_700_000_001)
            .unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn test_value_to_decimal_shapes() {
        assert_eq!(
            value_to_decimal(&serde_json::json!("0.25")).unwrap(),
            dec!(0.25)
        );
        assert_eq!(value_to_decimal(&serde_json::json!(4)).unwrap(), dec!(4));
        assert_eq!(value_to_decimal(&Value::Null).unwrap(), Decimal::ZERO);
        assert!(value_to_decimal(&serde_json::json!(["x"])).is_err());
    }
}
