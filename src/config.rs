//! Environment-driven configuration for the trading bot and tick collector.
//!
//! Values come from the process environment (a `.env` file is honoured).
//! Absent variables fall back to defaults; present-but-malformed values are
//! an error, never silently replaced.

use anyhow::{ensure, Context, Result};
use rust_decimal::Decimal;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_POLL_INTERVAL_SECONDS: u64 = 30;
const DEFAULT_INITIAL_CAPITAL: &str = "1000";
const DEFAULT_MAX_POSITION_PCT: &str = "0.1";
const DEFAULT_KELLY_FRACTION: &str = "0.25";
const DEFAULT_MAX_HISTORY: usize = 500;
const DEFAULT_ORDER_BOOK_REFRESH_SECONDS: u64 = 30;

const DEFAULT_DB_PATH: &str = "./ticks.db";
const DEFAULT_FLUSH_BATCH_SIZE: usize = 100;
const DEFAULT_FLUSH_INTERVAL_SECONDS: u64 = 10;
const DEFAULT_DISCOVERY_LEAD_SECONDS: i64 = 30;
const DEFAULT_RECONNECT_BASE_DELAY_SECONDS: u64 = 5;

fn env_parse<T: FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("invalid value for {key}: {raw:?}")),
        Err(_) => Ok(default),
    }
}

fn env_list(key: &str) -> Vec<String> {
    std::env::var(key)
        .unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Trading bot configuration: polling cadence, capital, Kelly sizing, and
/// the markets to track.
#[derive(Debug, Clone)]
pub struct BotConfig {
    /// Seconds between polls when no streaming feed drives the loop.
    pub poll_interval_seconds: u64,
    /// Starting virtual capital in USD (paper engine only).
    pub initial_capital: Decimal,
    /// Maximum fraction of capital per market, in (0, 1].
    pub max_position_pct: Decimal,
    /// Fractional Kelly multiplier, in (0, 1].
    pub kelly_fraction: Decimal,
    /// Snapshots retained per market.
    pub max_history: usize,
    /// Static condition IDs to track.
    pub markets: Vec<String>,
    /// Precise (condition_id, ISO end time) overrides; the CLOB often
    /// returns only a date.
    pub market_end_times: Vec<(String, String)>,
    /// Event series slugs for automatic 5-minute window rotation.
    pub series_slugs: Vec<String>,
    /// Seconds between background order book refreshes.
    pub order_book_refresh_seconds: u64,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: DEFAULT_POLL_INTERVAL_SECONDS,
            initial_capital: Decimal::from_str(DEFAULT_INITIAL_CAPITAL).unwrap(),
            max_position_pct: Decimal::from_str(DEFAULT_MAX_POSITION_PCT).unwrap(),
            kelly_fraction: Decimal::from_str(DEFAULT_KELLY_FRACTION).unwrap(),
            max_history: DEFAULT_MAX_HISTORY,
            markets: Vec::new(),
            market_end_times: Vec::new(),
            series_slugs: Vec::new(),
            order_book_refresh_seconds: DEFAULT_ORDER_BOOK_REFRESH_SECONDS,
        }
    }
}

impl BotConfig {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        let defaults = Self::default();

        let config = Self {
            poll_interval_seconds: env_parse(
                "BOT_POLL_INTERVAL_SECONDS",
                defaults.poll_interval_seconds,
            )?,
            initial_capital: env_parse("BOT_INITIAL_CAPITAL", defaults.initial_capital)?,
            max_position_pct: env_parse("BOT_MAX_POSITION_PCT", defaults.max_position_pct)?,
            kelly_fraction: env_parse("BOT_KELLY_FRACTION", defaults.kelly_fraction)?,
            max_history: env_parse("BOT_MAX_HISTORY", defaults.max_history)?,
            markets: env_list("BOT_MARKETS"),
            market_end_times: Vec::new(),
            series_slugs: env_list("BOT_SERIES_SLUGS"),
            order_book_refresh_seconds: env_parse(
                "BOT_ORDER_BOOK_REFRESH_SECONDS",
                defaults.order_book_refresh_seconds,
            )?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.initial_capital > Decimal::ZERO,
            "initial capital must be positive"
        );
        ensure!(
            Decimal::ZERO < self.max_position_pct && self.max_position_pct <= Decimal::ONE,
            "max position pct must be in (0, 1]"
        );
        ensure!(
            Decimal::ZERO < self.kelly_fraction && self.kelly_fraction <= Decimal::ONE,
            "kelly fraction must be in (0, 1]"
        );
        ensure!(self.max_history >= 1, "max history must be >= 1");
        Ok(())
    }
}

/// Tick collector configuration: database path, markets, and flush tuning.
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    pub db_path: String,
    /// Static condition IDs to record.
    pub markets: Vec<String>,
    /// Event series slugs for window-aligned market discovery.
    pub series_slugs: Vec<String>,
    /// Buffer size that triggers an immediate batch write.
    pub flush_batch_size: usize,
    /// Timer flush interval bounding write latency in quiet periods.
    pub flush_interval_seconds: u64,
    /// How many seconds before a 5-minute boundary discovery fires.
    pub discovery_lead_seconds: i64,
    /// Initial WebSocket reconnect delay, doubled per consecutive failure.
    pub reconnect_base_delay: Duration,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            db_path: DEFAULT_DB_PATH.to_string(),
            markets: Vec::new(),
            series_slugs: Vec::new(),
            flush_batch_size: DEFAULT_FLUSH_BATCH_SIZE,
            flush_interval_seconds: DEFAULT_FLUSH_INTERVAL_SECONDS,
            discovery_lead_seconds: DEFAULT_DISCOVERY_LEAD_SECONDS,
            reconnect_base_delay: Duration::from_secs(DEFAULT_RECONNECT_BASE_DELAY_SECONDS),
        }
    }
}

impl CollectorConfig {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        let defaults = Self::default();

        let config = Self {
            db_path: std::env::var("TICKS_DB_PATH").unwrap_or(defaults.db_path),
            markets: env_list("COLLECTOR_MARKETS"),
            series_slugs: env_list("COLLECTOR_SERIES_SLUGS"),
            flush_batch_size: env_parse("COLLECTOR_FLUSH_BATCH_SIZE", defaults.flush_batch_size)?,
            flush_interval_seconds: env_parse(
                "COLLECTOR_FLUSH_INTERVAL_SECONDS",
                defaults.flush_interval_seconds,
            )?,
            discovery_lead_seconds: env_parse(
                "COLLECTOR_DISCOVERY_LEAD_SECONDS",
                defaults.discovery_lead_seconds,
            )?,
            reconnect_base_delay: Duration::from_secs(env_parse(
                "COLLECTOR_RECONNECT_BASE_DELAY_SECONDS",
                DEFAULT_RECONNECT_BASE_DELAY_SECONDS,
            )?),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.flush_batch_size >= 1, "flush batch size must be >= 1");
        ensure!(
            self.flush_interval_seconds >= 1,
            "flush interval must be >= 1 second"
        );
        ensure!(
            (0..300).contains(&self.discovery_lead_seconds),
            "discovery lead must be within a 5-minute window"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_bot_config_defaults_validate() {
        let config = BotConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.initial_capital, dec!(1000));
        assert_eq!(config.max_position_pct, dec!(0.1));
        assert_eq!(config.kelly_fraction, dec!(0.25));
        assert_eq!(config.max_history, 500);
    }

    #[test]
    fn test_bot_config_rejects_bad_position_pct() {
        let mut config = BotConfig::default();
        config.max_position_pct = dec!(1.5);
        assert!(config.validate().is_err());
        config.max_position_pct = Decimal::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bot_config_rejects_bad_kelly_fraction() {
        let mut config = BotConfig::default();
        config.kelly_fraction = dec!(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_collector_config_defaults_validate() {
        let config = CollectorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.flush_batch_size, 100);
        assert_eq!(config.discovery_lead_seconds, 30);
    }

    #[test]
    fn test_collector_config_rejects_oversized_lead() {
        let mut config = CollectorConfig::default();
        config.discovery_lead_seconds = 300;
        assert!(config.validate().is_err());
    }
}
