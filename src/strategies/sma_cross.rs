//! Moving-average crossover strategy for candle data.

use crate::backtest::Strategy;
use crate::models::{Candle, Side, Signal};
use anyhow::{ensure, Result};
use rust_decimal::Decimal;

pub struct SmaCrossStrategy {
    fast: usize,
    slow: usize,
}

impl SmaCrossStrategy {
    pub fn new(fast: usize, slow: usize) -> Result<Self> {
        ensure!(fast >= 1, "fast period must be >= 1");
        ensure!(
            fast < slow,
            "fast period must be shorter than slow, got {fast} >= {slow}"
        );
        Ok(Self { fast, slow })
    }
}

fn sma(closes: &[Decimal], period: usize) -> Option<Decimal> {
    if period == 0 || closes.len() < period {
        return None;
    }
    let window = &closes[closes.len() - period..];
    Some(window.iter().copied().sum::<Decimal>() / Decimal::from(period))
}

impl Strategy for SmaCrossStrategy {
    fn name(&self) -> String {
        format!("sma_cross_{}_{}", self.fast, self.slow)
    }

    fn on_candle(&mut self, candle: &Candle, history: &[Candle]) -> Option<Signal> {
        // The previous averages come from history alone, so a crossover is
        // detectable only once history already covers the slow period.
        if history.len() < self.slow {
            return None;
        }

        let prev_closes: Vec<Decimal> = history.iter().map(|c| c.close).collect();
        let mut closes = prev_closes.clone();
        closes.push(candle.close);

        let fast_prev = sma(&prev_closes, self.fast)?;
        let slow_prev = sma(&prev_closes, self.slow)?;
        let fast_now = sma(&closes, self.fast)?;
        let slow_now = sma(&closes, self.slow)?;

        if fast_prev <= slow_prev && fast_now > slow_now {
            return Signal::new(
                Side::Buy,
                &candle.symbol,
                Decimal::ONE,
                format!("fast SMA({}) crossed above slow SMA({})", self.fast, self.slow),
            )
            .ok();
        }
        if fast_prev >= slow_prev && fast_now < slow_now {
            return Signal::new(
                Side::Sell,
                &candle.symbol,
                Decimal::ONE,
                format!("fast SMA({}) crossed below slow SMA({})", self.fast, self.slow),
            )
            .ok();
        }
        None
    }
}
