//! Execution helpers shared by the backtest engines.
//!
//! Pure functions for slippage, position allocation (flat or ATR-based),
//! and stop-loss / take-profit trigger detection.

use crate::models::{Candle, ExecutionConfig, RiskConfig, Side};
use rust_decimal::Decimal;

/// Worsen a buy price upward by the slippage fraction.
pub fn apply_entry_slippage(price: Decimal, slippage_pct: Decimal) -> Decimal {
    price * (Decimal::ONE + slippage_pct)
}

/// Worsen a sell price downward by the slippage fraction.
pub fn apply_exit_slippage(price: Decimal, slippage_pct: Decimal) -> Decimal {
    price * (Decimal::ONE - slippage_pct)
}

/// Average true range over the trailing `period` candles.
///
/// True range needs the previous close, so `history` must hold at least
/// `period + 1` candles; returns `None` otherwise.
pub fn average_true_range(history: &[Candle], period: usize) -> Option<Decimal> {
    if period == 0 || history.len() < period + 1 {
        return None;
    }
    let window = &history[history.len() - (period + 1)..];
    let mut sum = Decimal::ZERO;
    for pair in window.windows(2) {
        let prev_close = pair[0].close;
        let candle = &pair[1];
        let high_low = candle.high - candle.low;
        let high_close = (candle.high - prev_close).abs();
        let low_close = (candle.low - prev_close).abs();
        sum += high_low.max(high_close).max(low_close);
    }
    Some(sum / Decimal::from(period))
}

/// Compute `(allocation, entry_fee, quantity)` for a new position.
///
/// Base allocation is `capital * position_size_pct`; the taker fee comes out
/// of the allocation before the quantity is derived. With volatility sizing
/// and enough history, the allocation targets `target_risk_pct` of capital
/// per unit of ATR-relative volatility, never exceeding the base allocation.
/// A non-positive price yields zeros.
pub fn compute_allocation(
    capital: Decimal,
    price: Decimal,
    exec_config: &ExecutionConfig,
    history: Option<&[Candle]>,
) -> (Decimal, Decimal, Decimal) {
    if price <= Decimal::ZERO {
        return (Decimal::ZERO, Decimal::ZERO, Decimal::ZERO);
    }

    let mut allocation = capital * exec_config.position_size_pct;

    if exec_config.volatility_sizing {
        if let Some(atr) = history.and_then(|h| average_true_range(h, exec_config.atr_period)) {
            let atr_ratio = atr / price;
            if atr_ratio > Decimal::ZERO {
                let target = capital * exec_config.target_risk_pct / atr_ratio;
                allocation = allocation.min(target);
            }
        }
    }

    let entry_fee = allocation * exec_config.taker_fee_pct;
    let quantity = (allocation - entry_fee) / price;
    (allocation, entry_fee, quantity)
}

/// Evaluate stop-loss and take-profit against a candle's range.
///
/// Returns the threshold exit price when a trigger fires, direction aware.
/// When both would fire on the same candle the stop-loss wins.
pub fn check_risk_triggers(
    candle: &Candle,
    entry_price: Decimal,
    risk_config: &RiskConfig,
    side: Side,
) -> Option<Decimal> {
    match side {
        Side::Buy => {
            if let Some(sl) = risk_config.stop_loss_pct {
                let stop = entry_price * (Decimal::ONE - sl);
                if candle.low <= stop {
                    return Some(stop);
                }
            }
            if let Some(tp) = risk_config.take_profit_pct {
                let target = entry_price * (Decimal::ONE + tp);
                if candle.high >= target {
                    return Some(target);
                }
            }
        }
        Side::Sell => {
            if let Some(sl) = risk_config.stop_loss_pct {
                let stop = entry_price * (Decimal::ONE + sl);
                if candle.high >= stop {
                    return Some(stop);
                }
            }
            if let Some(tp) = risk_config.take_profit_pct {
                let target = entry_price * (Decimal::ONE - tp);
                if candle.low <= target {
                    return Some(target);
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Interval;
    use rust_decimal_macros::dec;

    const ATR_PERIOD: usize = 2;

    fn candle(close: Decimal, high: Decimal, low: Decimal, ts: i64) -> Candle {
        Candle::new("BTC-USD", ts, close, high, low, close, dec!(100), Interval::H1).unwrap()
    }

    fn high_vol_history() -> Vec<Candle> {
        vec![
            candle(dec!(100), dec!(120), dec!(80), 1000),
            candle(dec!(105), dec!(130), dec!(75), 2000),
            candle(dec!(110), dec!(140), dec!(70), 3000),
        ]
    }

    fn low_vol_history() -> Vec<Candle> {
        vec![
            candle(dec!(100), dec!(101), dec!(99), 1000),
            candle(dec!(100), dec!(101), dec!(99), 2000),
            candle(dec!(100), dec!(101), dec!(99), 3000),
        ]
    }

    #[test]
    fn test_entry_slippage_increases_price() {
        assert_eq!(apply_entry_slippage(dec!(100), dec!(0.01)), dec!(101.00));
    }

    #[test]
    fn test_exit_slippage_decreases_price() {
        assert_eq!(apply_exit_slippage(dec!(100), dec!(0.01)), dec!(99.00));
    }

    #[test]
    fn test_zero_slippage_preserves_price() {
        assert_eq!(apply_entry_slippage(dec!(100), Decimal::ZERO), dec!(100));
        assert_eq!(apply_exit_slippage(dec!(100), Decimal::ZERO), dec!(100));
    }

    #[test]
    fn test_full_deployment() {
        let cfg = ExecutionConfig::default();
        let (allocation, entry_fee, quantity) =
            compute_allocation(dec!(10000), dec!(100), &cfg, None);
        assert_eq!(allocation, dec!(10000));
        assert_eq!(entry_fee, Decimal::ZERO);
        assert_eq!(quantity, dec!(100));
    }

    #[test]
    fn test_half_position_size() {
        let cfg = ExecutionConfig {
            position_size_pct: dec!(0.5),
            ..Default::default()
        };
        let (allocation, _fee, quantity) = compute_allocation(dec!(10000), dec!(100), &cfg, None);
        assert_eq!(allocation, dec!(5000.0));
        assert_eq!(quantity, dec!(50));
    }

    #[test]
    fn test_allocation_with_fees() {
        let cfg = ExecutionConfig {
            taker_fee_pct: dec!(0.001),
            ..Default::default()
        };
        let (allocation, entry_fee, quantity) =
            compute_allocation(dec!(10000), dec!(100), &cfg, None);
        assert_eq!(allocation, dec!(10000));
        assert_eq!(entry_fee, dec!(10.000));
        assert_eq!(quantity, dec!(99.9));
    }

    #[test]
    fn test_volatility_sizing_reduces_allocation() {
        let cfg = ExecutionConfig {
            volatility_sizing: true,
            atr_period: ATR_PERIOD,
            target_risk_pct: dec!(0.02),
            ..Default::default()
        };
        let history = high_vol_history();
        let (allocation, _fee, quantity) =
            compute_allocation(dec!(10000), dec!(100), &cfg, Some(&history));
        // Full deployment would be 10000; wide ranges should shrink it
        assert!(allocation < dec!(10000));
        assert!(quantity < dec!(100));
    }

    #[test]
    fn test_volatility_sizing_caps_at_position_size() {
        let cfg = ExecutionConfig {
            position_size_pct: dec!(0.5),
            volatility_sizing: true,
            atr_period: ATR_PERIOD,
            target_risk_pct: dec!(0.50),
            ..Default::default()
        };
        let history = low_vol_history();
        let (allocation, _fee, _qty) =
            compute_allocation(dec!(10000), dec!(100), &cfg, Some(&history));
        assert!(allocation <= dec!(5000.0));
    }

    #[test]
    fn test_falls_back_with_insufficient_history() {
        let cfg = ExecutionConfig {
            volatility_sizing: true,
            atr_period: ATR_PERIOD,
            target_risk_pct: dec!(0.02),
            ..Default::default()
        };
        let short_history = vec![candle(dec!(100), dec!(105), dec!(95), 1000)];
        let (allocation, _fee, quantity) =
            compute_allocation(dec!(10000), dec!(100), &cfg, Some(&short_history));
        assert_eq!(allocation, dec!(10000));
        assert_eq!(quantity, dec!(100));
    }

    #[test]
    fn test_zero_price_returns_zeros() {
        let cfg = ExecutionConfig::default();
        let (allocation, entry_fee, quantity) =
            compute_allocation(dec!(10000), Decimal::ZERO, &cfg, None);
        assert_eq!(allocation, Decimal::ZERO);
        assert_eq!(entry_fee, Decimal::ZERO);
        assert_eq!(quantity, Decimal::ZERO);
    }

    #[test]
    fn test_negative_price_returns_zeros() {
        let cfg = ExecutionConfig::default();
        let (allocation, entry_fee, quantity) =
            compute_allocation(dec!(10000), dec!(-100), &cfg, None);
        assert_eq!(allocation, Decimal::ZERO);
        assert_eq!(entry_fee, Decimal::ZERO);
        assert_eq!(quantity, Decimal::ZERO);
    }

    #[test]
    fn test_atr_value() {
        // TRs: max(55, 30, 25) = 55 and max(70, 35, 35) = 70, mean 62.5
        let atr = average_true_range(&high_vol_history(), ATR_PERIOD).unwrap();
        assert_eq!(atr, dec!(62.5));
    }

    #[test]
    fn test_stop_loss_triggers() {
        let risk = RiskConfig {
            stop_loss_pct: Some(dec!(0.05)),
            ..Default::default()
        };
        let c = candle(dec!(95), dec!(100), dec!(93), 1000);
        let result = check_risk_triggers(&c, dec!(100), &risk, Side::Buy);
        assert_eq!(result, Some(dec!(95.00)));
    }

    #[test]
    fn test_take_profit_triggers() {
        let risk = RiskConfig {
            take_profit_pct: Some(dec!(0.10)),
            ..Default::default()
        };
        let c = candle(dec!(108), dec!(112), dec!(104), 1000);
        let result = check_risk_triggers(&c, dec!(100), &risk, Side::Buy);
        assert_eq!(result, Some(dec!(110.00)));
    }

    #[test]
    fn test_stop_loss_priority_over_take_profit() {
        let risk = RiskConfig {
            stop_loss_pct: Some(dec!(0.05)),
            take_profit_pct: Some(dec!(0.10)),
            ..Default::default()
        };
        let c = candle(dec!(100), dec!(115), dec!(90), 1000);
        let result = check_risk_triggers(&c, dec!(100), &risk, Side::Buy);
        assert_eq!(result, Some(dec!(95.00)));
    }

    #[test]
    fn test_no_trigger_returns_none() {
        let risk = RiskConfig {
            stop_loss_pct: Some(dec!(0.05)),
            take_profit_pct: Some(dec!(0.10)),
            ..Default::default()
        };
        let c = candle(dec!(102), dec!(104), dec!(98), 1000);
        assert_eq!(check_risk_triggers(&c, dec!(100), &risk, Side::Buy), None);
    }

    #[test]
    fn test_no_risk_config_returns_none() {
        let risk = RiskConfig::default();
        let c = candle(dec!(50), dec!(200), dec!(1), 1000);
        assert_eq!(check_risk_triggers(&c, dec!(100), &risk, Side::Buy), None);
    }

    #[test]
    fn test_short_stop_loss_triggers_on_high() {
        let risk = RiskConfig {
            stop_loss_pct: Some(dec!(0.05)),
            ..Default::default()
        };
        let c = candle(dec!(103), dec!(106), dec!(100), 1000);
        let result = check_risk_triggers(&c, dec!(100), &risk, Side::Sell);
        assert_eq!(result, Some(dec!(105.00)));
    }

    #[test]
    fn test_short_take_profit_triggers_on_low() {
        let risk = RiskConfig {
            take_profit_pct: Some(dec!(0.10)),
            ..Default::default()
        };
        let c = candle(dec!(92), dec!(95), dec!(88), 1000);
        let result = check_risk_triggers(&c, dec!(100), &risk, Side::Sell);
        assert_eq!(result, Some(dec!(90.00)));
    }

    #[test]
    fn test_short_no_trigger_returns_none() {
        let risk = RiskConfig {
            stop_loss_pct: Some(dec!(0.05)),
            take_profit_pct: Some(dec!(0.10)),
            ..Default::default()
        };
        let c = candle(dec!(98), dec!(102), dec!(96), 1000);
        assert_eq!(check_risk_triggers(&c, dec!(100), &risk, Side::Sell), None);
    }
}
