//! Binance klines candle provider.
//!
//! Pages through the public `/api/v3/klines` endpoint; callers see a single
//! list. Symbols accept either exchange form (`BTCUSDT`) or dashed form
//! (`BTC-USDT`).

use crate::backtest::CandleProvider;
use crate::models::{safe_decimal, Candle, Interval};
use anyhow::{ensure, Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://api.binance.com";
const PAGE_LIMIT: usize = 1000;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MS_PER_SECOND: i64 = 1000;

pub struct BinanceProvider {
    http: reqwest::Client,
    base_url: String,
}

impl BinanceProvider {
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent("polybot/0.1")
            .build()
            .expect("reqwest client");
        Self {
            http,
            base_url: base_url.into(),
        }
    }
}

impl Default for BinanceProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CandleProvider for BinanceProvider {
    async fn get_candles(
        &self,
        symbol: &str,
        interval: Interval,
        start_ts: i64,
        end_ts: i64,
    ) -> Result<Vec<Candle>> {
        let exchange_symbol = symbol.replace('-', "").to_uppercase();
        let end_ms = end_ts * MS_PER_SECOND;
        let mut cursor_ms = start_ts * MS_PER_SECOND;
        let mut candles: Vec<Candle> = Vec::new();

        loop {
            let response = self
                .http
                .get(format!("{}/api/v3/klines", self.base_url))
                .query(&[
                    ("symbol", exchange_symbol.clone()),
                    ("interval", interval.as_str().to_string()),
                    ("startTime", cursor_ms.to_string()),
                    ("endTime", end_ms.to_string()),
                    ("limit", PAGE_LIMIT.to_string()),
                ])
                .send()
                .await
                .context("klines request failed")?
                .error_for_status()
                .context("klines request status")?;

            let rows: Vec<Vec<Value>> = response.json().await.context("klines json parse")?;
            if rows.is_empty() {
                break;
            }
            let page_len = rows.len();
            debug!(symbol, page_len, cursor_ms, "fetched klines page");

            let mut last_open_ms = cursor_ms;
            for row in &rows {
                let candle = parse_kline(symbol, interval, row)?;
                last_open_ms = candle.timestamp * MS_PER_SECOND;
                candles.push(candle);
            }

            if page_len < PAGE_LIMIT {
                break;
            }
            cursor_ms = last_open_ms + interval.seconds() * MS_PER_SECOND;
            if cursor_ms > end_ms {
                break;
            }
        }

        Ok(candles)
    }
}

/// A kline row is a positional array:
/// `[open_time_ms, open, high, low, close, volume, close_time_ms, ...]`.
fn parse_kline(symbol: &str, interval: Interval, row: &[Value]) -> Result<Candle> {
    ensure!(row.len() >= 6, "kline row has {} fields, expected 6", row.len());

    let open_time_ms = row[0]
        .as_i64()
        .context("kline open time is not an integer")?;

    Candle::new(
        symbol,
        open_time_ms / MS_PER_SECOND,
        decimal_field(row, 1)?,
        decimal_field(row, 2)?,
        decimal_field(row, 3)?,
        decimal_field(row, 4)?,
        decimal_field(row, 5)?,
        interval,
    )
}

fn decimal_field(row: &[Value], index: usize) -> Result<rust_decimal::Decimal> {
    let raw = row[index]
        .as_str()
        .with_context(|| format!("kline field {index} is not a string"))?;
    safe_decimal(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_kline_row() {
        let row: Vec<Value> = serde_json::from_str(
            r#"[1700000000000, "100.5", "110.0", "99.0", "105.25", "12.34", 1700003599999]"#,
        )
        .unwrap();
        let candle = parse_kline("BTCUSDT", Interval::H1, &row).unwrap();
        assert_eq!(candle.timestamp, 1_700_000_000);
        assert_eq!(candle.open, dec!(100.5));
        assert_eq!(candle.high, dec!(110.0));
        assert_eq!(candle.low, dec!(99.0));
        assert_eq!(candle.close, dec!(105.25));
        assert_eq!(candle.volume, dec!(12.34));
    }

    #[test]
    fn test_parse_kline_rejects_short_rows() {
        let row: Vec<Value> = serde_json::from_str(r#"[1700000000000, "100"]"#).unwrap();
        assert!(parse_kline("BTCUSDT", Interval::H1, &row).is_err());
    }

    #[test]
    fn test_parse_kline_rejects_inconsistent_prices() {
        // close above high
        let row: Vec<Value> = serde_json::from_str(
            r#"[1700000000000, "100", "110", "99", "111", "1", 0]"#,
        )
        .unwrap();
        assert!(parse_kline("BTCUSDT", Interval::H1, &row).is_err());
    }
}
