//! Core data model shared across the backtester, trading bot, and collector.
//!
//! Immutable value objects (candles, signals, trades, results) plus the
//! mutable `Position` that turns into a `Trade` when closed. All monetary
//! and price quantities use `Decimal`; binary floats never touch price math.

use anyhow::{bail, ensure, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Direction of a trade: BUY (go long) or SELL (close / go short).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }

    /// The side that closes a position opened on `self`.
    pub fn opposite(&self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Supported candle time intervals from 1 minute to 1 week.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    M1,
    M5,
    M15,
    H1,
    H4,
    D1,
    W1,
}

impl Interval {
    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::M1 => "1m",
            Interval::M5 => "5m",
            Interval::M15 => "15m",
            Interval::H1 => "1h",
            Interval::H4 => "4h",
            Interval::D1 => "1d",
            Interval::W1 => "1w",
        }
    }

    /// Interval length in seconds.
    pub fn seconds(&self) -> i64 {
        match self {
            Interval::M1 => 60,
            Interval::M5 => 300,
            Interval::M15 => 900,
            Interval::H1 => 3_600,
            Interval::H4 => 14_400,
            Interval::D1 => 86_400,
            Interval::W1 => 604_800,
        }
    }
}

impl FromStr for Interval {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "1m" => Ok(Interval::M1),
            "5m" => Ok(Interval::M5),
            "15m" => Ok(Interval::M15),
            "1h" => Ok(Interval::H1),
            "4h" => Ok(Interval::H4),
            "1d" => Ok(Interval::D1),
            "1w" => Ok(Interval::W1),
            other => bail!("unsupported interval: {other}"),
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable OHLCV candle for one symbol over one interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,
    /// Unix epoch seconds at the candle open.
    pub timestamp: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub interval: Interval,
}

impl Candle {
    /// Build a candle, rejecting prices outside the `low..=high` range and
    /// negative volume.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        symbol: impl Into<String>,
        timestamp: i64,
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
        volume: Decimal,
        interval: Interval,
    ) -> Result<Self> {
        ensure!(low <= high, "candle low {low} exceeds high {high}");
        ensure!(
            low <= open && open <= high,
            "candle open {open} outside [{low}, {high}]"
        );
        ensure!(
            low <= close && close <= high,
            "candle close {close} outside [{low}, {high}]"
        );
        ensure!(volume >= Decimal::ZERO, "candle volume {volume} is negative");
        Ok(Self {
            symbol: symbol.into(),
            timestamp,
            open,
            high,
            low,
            close,
            volume,
            interval,
        })
    }
}

/// Immutable trading signal emitted by a strategy.
///
/// Carries the direction, target symbol, a confidence strength in `[0, 1]`,
/// and a human-readable reason string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub side: Side,
    pub symbol: String,
    pub strength: Decimal,
    pub reason: String,
}

impl Signal {
    /// Build a signal, rejecting a strength outside `[0, 1]`.
    pub fn new(
        side: Side,
        symbol: impl Into<String>,
        strength: Decimal,
        reason: impl Into<String>,
    ) -> Result<Self> {
        ensure!(
            Decimal::ZERO <= strength && strength <= Decimal::ONE,
            "signal strength must be between 0 and 1, got {strength}"
        );
        Ok(Self {
            side,
            symbol: symbol.into(),
            strength,
            reason: reason.into(),
        })
    }
}

/// Mutable open position awaiting an exit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub side: Side,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub entry_time: i64,
}

impl Position {
    pub fn new(
        symbol: impl Into<String>,
        side: Side,
        quantity: Decimal,
        entry_price: Decimal,
        entry_time: i64,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            quantity,
            entry_price,
            entry_time,
        }
    }

    /// Close this position at the given exit price and produce the round-trip
    /// trade record.
    pub fn close(
        self,
        exit_price: Decimal,
        exit_time: i64,
        entry_fee: Decimal,
        exit_fee: Decimal,
    ) -> Trade {
        Trade {
            symbol: self.symbol,
            side: self.side,
            quantity: self.quantity,
            entry_price: self.entry_price,
            entry_time: self.entry_time,
            exit_price,
            exit_time,
            entry_fee,
            exit_fee,
        }
    }

    /// Unrealised profit at `mark`, direction aware.
    pub fn unrealised(&self, mark: Decimal) -> Decimal {
        match self.side {
            Side::Buy => (mark - self.entry_price) * self.quantity,
            Side::Sell => (self.entry_price - mark) * self.quantity,
        }
    }
}

/// Immutable record of a completed round-trip trade (entry plus exit).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub symbol: String,
    pub side: Side,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub entry_time: i64,
    pub exit_price: Decimal,
    pub exit_time: i64,
    pub entry_fee: Decimal,
    pub exit_fee: Decimal,
}

impl Trade {
    /// Absolute profit or loss in quote currency, net of fees.
    pub fn pnl(&self) -> Decimal {
        let raw = match self.side {
            Side::Sell => (self.entry_price - self.exit_price) * self.quantity,
            Side::Buy => (self.exit_price - self.entry_price) * self.quantity,
        };
        raw - self.entry_fee - self.exit_fee
    }

    /// Percentage gain or loss relative to cost basis (entry value plus the
    /// entry fee), so returns account for transaction costs.
    pub fn pnl_pct(&self) -> Decimal {
        let cost_basis = self.entry_price * self.quantity + self.entry_fee;
        if cost_basis == Decimal::ZERO {
            return Decimal::ZERO;
        }
        self.pnl() / cost_basis
    }
}

/// Trade execution costs and position sizing.
///
/// All percentages are decimal fractions (0.001 means 0.1%). Defaults keep
/// the zero-cost, full-deployment behaviour.
///
/// With `volatility_sizing` enabled, position size targets roughly
/// `target_risk_pct` of capital at risk per trade based on ATR, capped at
/// `position_size_pct`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionConfig {
    pub maker_fee_pct: Decimal,
    pub taker_fee_pct: Decimal,
    pub slippage_pct: Decimal,
    pub position_size_pct: Decimal,
    pub volatility_sizing: bool,
    pub atr_period: usize,
    pub target_risk_pct: Decimal,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            maker_fee_pct: Decimal::ZERO,
            taker_fee_pct: Decimal::ZERO,
            slippage_pct: Decimal::ZERO,
            position_size_pct: Decimal::ONE,
            volatility_sizing: false,
            atr_period: 14,
            target_risk_pct: Decimal::new(2, 2),
        }
    }
}

impl ExecutionConfig {
    /// Reject out-of-range cost parameters: fees non-negative, slippage in
    /// `[0, 1]`, position size in `(0, 1]`.
    pub fn validate(&self) -> Result<()> {
        ensure!(self.maker_fee_pct >= Decimal::ZERO, "maker fee must be >= 0");
        ensure!(self.taker_fee_pct >= Decimal::ZERO, "taker fee must be >= 0");
        ensure!(
            Decimal::ZERO <= self.slippage_pct && self.slippage_pct <= Decimal::ONE,
            "slippage must be between 0 and 1"
        );
        ensure!(
            Decimal::ZERO < self.position_size_pct && self.position_size_pct <= Decimal::ONE,
            "position size must be in (0, 1]"
        );
        Ok(())
    }
}

/// Automatic risk-management exits.
///
/// Stop-loss and take-profit thresholds are decimal fractions of the entry
/// price; `None` disables the corresponding exit. The drawdown circuit
/// breaker halts new trades when equity drops by `circuit_breaker_pct` from
/// peak and re-arms after a `recovery_pct` recovery from the halt level.
/// Both must be set for the breaker to engage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskConfig {
    pub stop_loss_pct: Option<Decimal>,
    pub take_profit_pct: Option<Decimal>,
    pub circuit_breaker_pct: Option<Decimal>,
    pub recovery_pct: Option<Decimal>,
}

/// Immutable summary of a completed backtest run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestResult {
    pub strategy_name: String,
    pub symbol: String,
    pub interval: Interval,
    pub initial_capital: Decimal,
    pub final_capital: Decimal,
    pub trades: Vec<Trade>,
    pub metrics: std::collections::BTreeMap<String, Decimal>,
    pub candles: Vec<Candle>,
}

/// Convert a wire string to `Decimal`.
///
/// Empty or whitespace-only input maps to zero (the Gamma API encodes absent
/// numeric fields as `""`). Non-empty malformed input is an error rather
/// than a silent zero.
pub fn safe_decimal(value: &str) -> Result<Decimal> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(Decimal::ZERO);
    }
    match Decimal::from_str(trimmed) {
        Ok(d) => Ok(d),
        Err(_) => bail!("cannot convert {value:?} to decimal"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn trade(side: Side, entry: Decimal, exit: Decimal, qty: Decimal) -> Trade {
        Trade {
            symbol: "BTC-USD".to_string(),
            side,
            quantity: qty,
            entry_price: entry,
            entry_time: 1000,
            exit_price: exit,
            exit_time: 2000,
            entry_fee: Decimal::ZERO,
            exit_fee: Decimal::ZERO,
        }
    }

    #[test]
    fn test_long_trade_pnl() {
        let t = trade(Side::Buy, dec!(100), dec!(120), dec!(10));
        assert_eq!(t.pnl(), dec!(200));
        assert_eq!(t.pnl_pct(), dec!(0.2));
    }

    #[test]
    fn test_short_trade_pnl() {
        let t = trade(Side::Sell, dec!(100), dec!(90), dec!(10));
        assert_eq!(t.pnl(), dec!(100));
        assert_eq!(t.pnl_pct(), dec!(0.1));
    }

    #[test]
    fn test_pnl_net_of_fees() {
        let mut t = trade(Side::Buy, dec!(100), dec!(120), dec!(10));
        t.entry_fee = dec!(5);
        t.exit_fee = dec!(7);
        assert_eq!(t.pnl(), dec!(188));
        // pnl_pct is pnl over (entry value + entry fee)
        assert_eq!(t.pnl_pct(), dec!(188) / dec!(1005));
    }

    #[test]
    fn test_pnl_identity() {
        let mut t = trade(Side::Buy, dec!(0.55), dec!(0.80), dec!(40));
        t.entry_fee = dec!(0.10);
        t.exit_fee = dec!(0.05);
        let cost_basis = t.entry_price * t.quantity + t.entry_fee;
        // Equal up to decimal rounding of the non-terminating quotient.
        let difference = (t.pnl() - t.pnl_pct() * cost_basis).abs();
        assert!(difference < dec!(0.000000000000000000000001));
    }

    #[test]
    fn test_position_close_produces_trade() {
        let pos = Position::new("BTC-USD", Side::Buy, dec!(2), dec!(100), 1000);
        let t = pos.close(dec!(110), 2000, dec!(1), dec!(2));
        assert_eq!(t.entry_price, dec!(100));
        assert_eq!(t.exit_price, dec!(110));
        assert_eq!(t.pnl(), dec!(17));
    }

    #[test]
    fn test_signal_rejects_out_of_range_strength() {
        assert!(Signal::new(Side::Buy, "BTC-USD", dec!(1.01), "x").is_err());
        assert!(Signal::new(Side::Buy, "BTC-USD", dec!(-0.01), "x").is_err());
        assert!(Signal::new(Side::Buy, "BTC-USD", Decimal::ONE, "x").is_ok());
        assert!(Signal::new(Side::Buy, "BTC-USD", Decimal::ZERO, "x").is_ok());
    }

    #[test]
    fn test_candle_validation() {
        let bad = Candle::new(
            "BTC-USD",
            1000,
            dec!(100),
            dec!(90),
            dec!(80),
            dec!(85),
            dec!(1),
            Interval::H1,
        );
        assert!(bad.is_err());
        let good = Candle::new(
            "BTC-USD",
            1000,
            dec!(100),
            dec!(110),
            dec!(90),
            dec!(105),
            dec!(1),
            Interval::H1,
        );
        assert!(good.is_ok());
    }

    #[test]
    fn test_safe_decimal_empty_is_zero() {
        assert_eq!(safe_decimal("").unwrap(), Decimal::ZERO);
        assert_eq!(safe_decimal("   ").unwrap(), Decimal::ZERO);
    }

    #[test]
    fn test_safe_decimal_malformed_is_error() {
        assert!(safe_decimal("not-a-number").is_err());
    }

    #[test]
    fn test_safe_decimal_parses() {
        assert_eq!(safe_decimal("0.123").unwrap(), dec!(0.123));
    }

    #[test]
    fn test_interval_round_trip() {
        for s in ["1m", "5m", "15m", "1h", "4h", "1d", "1w"] {
            let interval: Interval = s.parse().unwrap();
            assert_eq!(interval.as_str(), s);
        }
        assert!("3h".parse::<Interval>().is_err());
    }
}
