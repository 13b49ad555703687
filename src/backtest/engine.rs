//! Single-asset backtest engine.
//!
//! Replays historical candles through a strategy with realistic execution
//! costs, stop-loss / take-profit exits, and a drawdown circuit breaker.

use crate::backtest::execution::{
    apply_entry_slippage, apply_exit_slippage, check_risk_triggers, compute_allocation,
};
use crate::backtest::metrics::calculate_metrics;
use crate::backtest::portfolio::Portfolio;
use crate::backtest::{CandleProvider, Strategy};
use crate::models::{BacktestResult, Candle, ExecutionConfig, Interval, RiskConfig, Side};
use anyhow::Result;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

pub struct BacktestEngine<P, S> {
    provider: P,
    strategy: S,
    initial_capital: Decimal,
    execution: ExecutionConfig,
    risk: RiskConfig,
}

impl<P: CandleProvider, S: Strategy> BacktestEngine<P, S> {
    pub fn new(provider: P, strategy: S, initial_capital: Decimal) -> Self {
        Self {
            provider,
            strategy,
            initial_capital,
            execution: ExecutionConfig::default(),
            risk: RiskConfig::default(),
        }
    }

    pub fn with_execution(mut self, execution: ExecutionConfig) -> Self {
        self.execution = execution;
        self
    }

    pub fn with_risk(mut self, risk: RiskConfig) -> Self {
        self.risk = risk;
        self
    }

    /// Run the backtest over `[start_ts, end_ts]`.
    ///
    /// An empty candle list yields a zero-trade result with capital intact.
    /// Provider errors propagate to the caller.
    pub async fn run(
        &mut self,
        symbol: &str,
        interval: Interval,
        start_ts: i64,
        end_ts: i64,
    ) -> Result<BacktestResult> {
        self.execution.validate()?;

        let candles = self
            .provider
            .get_candles(symbol, interval, start_ts, end_ts)
            .await?;
        if candles.is_empty() {
            return Ok(self.empty_result(symbol, interval));
        }

        info!(
            strategy = %self.strategy.name(),
            symbol,
            candles = candles.len(),
            "starting backtest"
        );

        let mut portfolio = Portfolio::new(self.initial_capital);
        let mut history: Vec<Candle> = Vec::with_capacity(candles.len());
        let mut peak_equity = self.initial_capital;
        let mut breaker_trip: Option<Decimal> = None;

        for candle in &candles {
            // Circuit breaker gate: while tripped, no new signal processing
            // until equity recovers from the trip level.
            let mut halted = false;
            if let Some(trip_level) = breaker_trip {
                let recovery = self.risk.recovery_pct.unwrap_or(Decimal::ZERO);
                let equity = portfolio.equity(candle.close);
                if equity >= trip_level * (Decimal::ONE + recovery) {
                    info!(equity = %equity, "circuit breaker cleared");
                    breaker_trip = None;
                } else {
                    halted = true;
                }
            }

            // Risk exits run before signals; the exit price is the threshold
            // itself, not the candle close.
            let mut risk_exited = false;
            if let Some(position) = portfolio.position() {
                if let Some(exit_price) =
                    check_risk_triggers(candle, position.entry_price, &self.risk, position.side)
                {
                    let exit_fee = exit_price * position.quantity * self.execution.taker_fee_pct;
                    if let Some(trade) = portfolio.close(exit_price, exit_fee, candle.timestamp) {
                        debug!(exit = %exit_price, pnl = %trade.pnl(), "risk exit");
                    }
                    risk_exited = true;
                }
            }

            if !risk_exited && !halted {
                if let Some(signal) = self.strategy.on_candle(candle, &history) {
                    self.apply_signal(&mut portfolio, candle, &history, signal.side);
                }
            }

            let equity = portfolio.equity(candle.close);
            if equity > peak_equity {
                peak_equity = equity;
            }
            if breaker_trip.is_none() {
                if let (Some(trip_pct), Some(_)) =
                    (self.risk.circuit_breaker_pct, self.risk.recovery_pct)
                {
                    if peak_equity > Decimal::ZERO
                        && (peak_equity - equity) / peak_equity >= trip_pct
                    {
                        warn!(equity = %equity, peak = %peak_equity, "circuit breaker tripped");
                        breaker_trip = Some(equity);
                    }
                }
            }

            history.push(candle.clone());
        }

        // Anything still open exits at the final close.
        let last = candles.last().expect("candles is non-empty");
        if let Some(position) = portfolio.position() {
            let exit_price = apply_exit_slippage(last.close, self.execution.slippage_pct);
            let exit_fee = exit_price * position.quantity * self.execution.taker_fee_pct;
            portfolio.close(exit_price, exit_fee, last.timestamp);
        }

        let final_capital = portfolio.cash();
        let metrics = calculate_metrics(portfolio.trades(), self.initial_capital, final_capital);
        info!(
            final_capital = %final_capital,
            trades = portfolio.trades().len(),
            "backtest complete"
        );

        Ok(BacktestResult {
            strategy_name: self.strategy.name(),
            symbol: symbol.to_string(),
            interval,
            initial_capital: self.initial_capital,
            final_capital,
            trades: portfolio.trades().to_vec(),
            metrics,
            candles,
        })
    }

    fn apply_signal(
        &self,
        portfolio: &mut Portfolio,
        candle: &Candle,
        history: &[Candle],
        side: Side,
    ) {
        match side {
            Side::Buy if portfolio.position().is_none() => {
                let entry_price = apply_entry_slippage(candle.close, self.execution.slippage_pct);
                let (_allocation, entry_fee, quantity) = compute_allocation(
                    portfolio.cash(),
                    entry_price,
                    &self.execution,
                    Some(history),
                );
                if quantity > Decimal::ZERO {
                    portfolio.open(
                        &candle.symbol,
                        Side::Buy,
                        entry_price,
                        quantity,
                        entry_fee,
                        candle.timestamp,
                    );
                }
            }
            Side::Sell => {
                if let Some(position) = portfolio.position() {
                    let exit_price = apply_exit_slippage(candle.close, self.execution.slippage_pct);
                    let exit_fee = exit_price * position.quantity * self.execution.taker_fee_pct;
                    portfolio.close(exit_price, exit_fee, candle.timestamp);
                }
            }
            // BUY while a position is open is ignored
            _ => {}
        }
    }

    fn empty_result(&self, symbol: &str, interval: Interval) -> BacktestResult {
        BacktestResult {
            strategy_name: self.strategy.name(),
            symbol: symbol.to_string(),
            interval,
            initial_capital: self.initial_capital,
            final_capital: self.initial_capital,
            trades: Vec::new(),
            metrics: calculate_metrics(&[], self.initial_capital, self.initial_capital),
            candles: Vec::new(),
        }
    }
}
