//! Concrete strategies and the string-keyed factories the CLIs use.

pub mod late_snipe;
pub mod sma_cross;

use crate::backtest::Strategy;
use crate::bot::PredictionMarketStrategy;
use anyhow::{bail, Result};
use rust_decimal::Decimal;

pub use late_snipe::LateSnipeStrategy;
pub use sma_cross::SmaCrossStrategy;

const DEFAULT_SNIPE_THRESHOLD: Decimal = Decimal::from_parts(90, 0, 0, false, 2);
const DEFAULT_SNIPE_WINDOW_SECONDS: i64 = 60;
const DEFAULT_FAST_PERIOD: usize = 10;
const DEFAULT_SLOW_PERIOD: usize = 30;

/// Build a candle strategy by name. Unknown names are an error, never a
/// silent default.
pub fn candle_strategy(name: &str) -> Result<Box<dyn Strategy>> {
    match name {
        "sma_cross" => Ok(Box::new(SmaCrossStrategy::new(
            DEFAULT_FAST_PERIOD,
            DEFAULT_SLOW_PERIOD,
        )?)),
        other => bail!("unknown strategy: {other}"),
    }
}

/// Build a prediction-market strategy by name.
pub fn prediction_strategy(name: &str) -> Result<Box<dyn PredictionMarketStrategy>> {
    match name {
        "late_snipe" => Ok(Box::new(LateSnipeStrategy::new(
            DEFAULT_SNIPE_THRESHOLD,
            DEFAULT_SNIPE_WINDOW_SECONDS,
        )?)),
        other => bail!("unknown strategy: {other}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_strategies_resolve() {
        assert_eq!(candle_strategy("sma_cross").unwrap().name(), "sma_cross_10_30");
        assert_eq!(
            prediction_strategy("late_snipe").unwrap().name(),
            "pm_late_snipe_0.90_60s"
        );
    }

    #[test]
    fn test_unknown_strategy_is_an_error() {
        assert!(candle_strategy("hodl").is_err());
        assert!(prediction_strategy("hodl").is_err());
    }
}
