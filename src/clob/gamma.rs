//! Gamma API discovery for event series markets.
//!
//! The Gamma API encodes some array fields as JSON strings and numeric
//! fields as strings, so the deserializers here accept both shapes.
//! Rotating 5-minute markets use slugs suffixed with the epoch of the
//! window start (`btc-updown-5m-1771758600`); `resolve_timestamped_slugs`
//! appends the suffix for `*-5m` base slugs.

use crate::clob::error::ClobError;
use futures_util::future::join_all;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

const FIVE_MINUTES: i64 = 300;
const EVENT_QUERY_LIMIT: &str = "5";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(8);

#[derive(Debug, Clone, Deserialize)]
pub struct GammaEvent {
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub markets: Vec<GammaMarket>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GammaMarket {
    #[serde(rename = "conditionId", default, alias = "condition_id")]
    pub condition_id: String,
    #[serde(default)]
    pub question: Option<String>,
    #[serde(rename = "endDate", default, alias = "end_date")]
    pub end_date: Option<String>,
    #[serde(default)]
    pub active: bool,
    #[serde(default, deserialize_with = "de_string_vec")]
    pub outcomes: Vec<String>,
    #[serde(rename = "clobTokenIds", default, deserialize_with = "de_string_vec")]
    pub clob_token_ids: Vec<String>,
}

/// Accept a JSON array, or a JSON array encoded as a string
/// (e.g. `"[\"Yes\",\"No\"]"`), which Gamma returns for some fields.
fn de_string_vec<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Value::deserialize(deserializer)?;
    match v {
        Value::Array(arr) => Ok(arr
            .into_iter()
            .filter_map(|x| match x {
                Value::String(s) => Some(s),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect()),
        Value::String(s) => serde_json::from_str::<Vec<String>>(&s).map_err(serde::de::Error::custom),
        _ => Ok(Vec::new()),
    }
}

/// Expand series slugs into timestamped slugs for rotating markets.
///
/// Slugs ending in `-5m` get the current window epoch appended; with
/// `include_next` the next window's slug is added as well so upcoming
/// markets can be subscribed before they open. Other slugs pass through
/// unchanged.
pub fn resolve_timestamped_slugs(
    series_slugs: &[String],
    include_next: bool,
    now: i64,
) -> Vec<String> {
    let current_window = (now / FIVE_MINUTES) * FIVE_MINUTES;
    let mut resolved = Vec::with_capacity(series_slugs.len());
    for slug in series_slugs {
        if slug.ends_with("-5m") {
            resolved.push(format!("{slug}-{current_window}"));
            if include_next {
                resolved.push(format!("{slug}-{}", current_window + FIVE_MINUTES));
            }
        } else {
            resolved.push(slug.clone());
        }
    }
    resolved
}

/// Query the events endpoint for each resolved slug and collect the
/// condition IDs and end dates of active markets.
pub async fn discover_series_markets(
    http: &reqwest::Client,
    gamma_base: &str,
    series_slugs: &[String],
    include_next: bool,
    now: i64,
) -> Result<Vec<(String, String)>, ClobError> {
    let resolved = resolve_timestamped_slugs(series_slugs, include_next, now);
    let fetches = resolved.iter().map(|slug| fetch_events(http, gamma_base, slug));
    let all_events = join_all(fetches).await;

    let mut results: Vec<(String, String)> = Vec::new();
    let mut succeeded = 0usize;
    let mut last_error: Option<ClobError> = None;
    for (slug, events) in resolved.iter().zip(all_events) {
        let events = match events {
            Ok(events) => {
                succeeded += 1;
                events
            }
            Err(e) => {
                warn!(slug = %slug, error = %e, "gamma events query failed");
                last_error = Some(e);
                continue;
            }
        };
        for event in events {
            for market in event.markets {
                if !market.active || market.condition_id.is_empty() {
                    continue;
                }
                results.push((market.condition_id, market.end_date.unwrap_or_default()));
            }
        }
    }

    // Per-slug failures are tolerated, but when every query failed the
    // transport error reaches the caller.
    if succeeded == 0 {
        if let Some(error) = last_error {
            return Err(error);
        }
    }
    Ok(results)
}

async fn fetch_events(
    http: &reqwest::Client,
    gamma_base: &str,
    slug: &str,
) -> Result<Vec<GammaEvent>, ClobError> {
    let response = http
        .get(format!("{gamma_base}/events"))
        .timeout(REQUEST_TIMEOUT)
        .query(&[("slug", slug), ("active", "true"), ("limit", EVENT_QUERY_LIMIT)])
        .send()
        .await?
        .error_for_status()?;

    let body = response.text().await?;
    debug!(slug = %slug, body_len = body.len(), "gamma events response");
    serde_json::from_str(&body)
        .map_err(|e| ClobError::malformed(format!("gamma events parse for {slug}: {e}")))
}
