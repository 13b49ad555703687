//! Multi-asset backtest engine for simultaneous positions across symbols.
//!
//! Fetches candles for every symbol, merges them into a single
//! timestamp-ordered stream, and feeds each candle to the strategy with that
//! symbol's history only. The shared portfolio holds one position per symbol
//! and carries the drawdown circuit breaker.

use crate::backtest::execution::{
    apply_entry_slippage, apply_exit_slippage, check_risk_triggers, compute_allocation,
};
use crate::backtest::metrics::calculate_metrics;
use crate::backtest::{CandleProvider, Strategy};
use crate::models::{
    BacktestResult, Candle, ExecutionConfig, Interval, Position, RiskConfig, Side, Signal, Trade,
};
use anyhow::Result;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::{info, warn};

/// Ledger holding at most one position per symbol, with shared cash and a
/// drawdown circuit breaker over total equity.
#[derive(Debug)]
pub struct MultiAssetPortfolio {
    cash: Decimal,
    execution: ExecutionConfig,
    risk: RiskConfig,
    positions: HashMap<String, Position>,
    entry_fees: HashMap<String, Decimal>,
    trades: Vec<Trade>,
    peak_equity: Decimal,
    breaker_trip: Option<Decimal>,
}

impl MultiAssetPortfolio {
    pub fn new(initial_capital: Decimal, execution: ExecutionConfig, risk: RiskConfig) -> Self {
        Self {
            cash: initial_capital,
            execution,
            risk,
            positions: HashMap::new(),
            entry_fees: HashMap::new(),
            trades: Vec::new(),
            peak_equity: initial_capital,
            breaker_trip: None,
        }
    }

    /// Cash balance (realised capital only).
    pub fn capital(&self) -> Decimal {
        self.cash
    }

    pub fn positions(&self) -> &HashMap<String, Position> {
        &self.positions
    }

    pub fn trades(&self) -> &[Trade] {
        &self.trades
    }

    /// True while the circuit breaker blocks new entries.
    pub fn halted(&self) -> bool {
        self.breaker_trip.is_some()
    }

    /// Re-mark total equity at the latest prices, advancing the running peak
    /// and tripping or clearing the circuit breaker.
    pub fn update_equity(&mut self, latest_prices: &HashMap<String, Decimal>) {
        let equity = self.total_equity(latest_prices);
        if equity > self.peak_equity {
            self.peak_equity = equity;
        }

        match self.breaker_trip {
            Some(trip_level) => {
                let recovery = self.risk.recovery_pct.unwrap_or(Decimal::ZERO);
                if equity >= trip_level * (Decimal::ONE + recovery) {
                    info!(equity = %equity, "circuit breaker cleared");
                    self.breaker_trip = None;
                }
            }
            None => {
                if let (Some(trip_pct), Some(_)) =
                    (self.risk.circuit_breaker_pct, self.risk.recovery_pct)
                {
                    if self.peak_equity > Decimal::ZERO
                        && (self.peak_equity - equity) / self.peak_equity >= trip_pct
                    {
                        warn!(equity = %equity, peak = %self.peak_equity, "circuit breaker tripped");
                        self.breaker_trip = Some(equity);
                    }
                }
            }
        }
    }

    fn total_equity(&self, latest_prices: &HashMap<String, Decimal>) -> Decimal {
        let mut equity = self.cash;
        for (symbol, position) in &self.positions {
            let mark = latest_prices
                .get(symbol)
                .copied()
                .unwrap_or(position.entry_price);
            equity += position.entry_price * position.quantity + position.unrealised(mark);
        }
        equity
    }

    /// Convert a strategy signal at `price` into a ledger action.
    ///
    /// BUY opens a position when the symbol is flat, the breaker is clear,
    /// and cash covers the cost; SELL closes the symbol's position. Only a
    /// close produces a `Trade`.
    pub fn process_signal(
        &mut self,
        signal: &Signal,
        price: Decimal,
        timestamp: i64,
        history: &[Candle],
    ) -> Option<Trade> {
        match signal.side {
            Side::Buy => {
                if self.halted() || self.positions.contains_key(&signal.symbol) {
                    return None;
                }
                let entry_price = apply_entry_slippage(price, self.execution.slippage_pct);
                let (_allocation, entry_fee, quantity) =
                    compute_allocation(self.cash, entry_price, &self.execution, Some(history));
                if quantity <= Decimal::ZERO {
                    return None;
                }
                let cost = entry_price * quantity + entry_fee;
                if cost > self.cash {
                    return None;
                }
                self.cash -= cost;
                self.entry_fees.insert(signal.symbol.clone(), entry_fee);
                self.positions.insert(
                    signal.symbol.clone(),
                    Position::new(&signal.symbol, Side::Buy, quantity, entry_price, timestamp),
                );
                None
            }
            Side::Sell => {
                let quantity = self.positions.get(&signal.symbol)?.quantity;
                let exit_price = apply_exit_slippage(price, self.execution.slippage_pct);
                let exit_fee = exit_price * quantity * self.execution.taker_fee_pct;
                self.close_at(&signal.symbol, exit_price, exit_fee, timestamp)
            }
        }
    }

    /// Close a symbol's position at an explicit price (risk exits pass the
    /// threshold price here, bypassing slippage).
    pub fn close_at(
        &mut self,
        symbol: &str,
        exit_price: Decimal,
        exit_fee: Decimal,
        timestamp: i64,
    ) -> Option<Trade> {
        let position = self.positions.remove(symbol)?;
        let entry_fee = self.entry_fees.remove(symbol).unwrap_or(Decimal::ZERO);
        let entry_value = position.entry_price * position.quantity;
        let raw_pnl = position.unrealised(exit_price);
        let trade = position.close(exit_price, timestamp, entry_fee, exit_fee);
        // Gross proceeds net of the exit fee; the entry fee left cash at
        // open, so the round trip nets to the trade's pnl.
        self.cash += entry_value + raw_pnl - exit_fee;
        self.trades.push(trade.clone());
        Some(trade)
    }

    /// Close every open position at that symbol's last seen price, applying
    /// exit slippage and the taker fee.
    pub fn force_close_all(
        &mut self,
        last_prices: &HashMap<String, Decimal>,
        timestamp: i64,
    ) -> Vec<Trade> {
        let symbols: Vec<String> = self.positions.keys().cloned().collect();
        let mut closed = Vec::with_capacity(symbols.len());
        for symbol in symbols {
            let position = &self.positions[&symbol];
            let mark = last_prices
                .get(&symbol)
                .copied()
                .unwrap_or(position.entry_price);
            let exit_price = apply_exit_slippage(mark, self.execution.slippage_pct);
            let exit_fee = exit_price * position.quantity * self.execution.taker_fee_pct;
            if let Some(trade) = self.close_at(&symbol, exit_price, exit_fee, timestamp) {
                closed.push(trade);
            }
        }
        closed
    }
}

/// Runs one strategy against several symbols over a merged candle stream.
pub struct MultiAssetEngine<P, S> {
    provider: P,
    strategy: S,
    symbols: Vec<String>,
    initial_capital: Decimal,
    execution: ExecutionConfig,
    risk: RiskConfig,
}

impl<P: CandleProvider, S: Strategy> MultiAssetEngine<P, S> {
    pub fn new(provider: P, strategy: S, symbols: Vec<String>, initial_capital: Decimal) -> Self {
        Self {
            provider,
            strategy,
            symbols,
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

    /// Execute the multi-asset backtest over `[start_ts, end_ts]`.
    ///
    /// Candles across symbols merge into one stream, stably sorted by
    /// timestamp, so same-timestamp candles process in fetch order.
    pub async fn run(
        &mut self,
        interval: Interval,
        start_ts: i64,
        end_ts: i64,
    ) -> Result<BacktestResult> {
        self.execution.validate()?;

        let mut all_candles: Vec<Candle> = Vec::new();
        for symbol in &self.symbols {
            let candles = self
                .provider
                .get_candles(symbol, interval, start_ts, end_ts)
                .await?;
            all_candles.extend(candles);
        }
        all_candles.sort_by_key(|c| c.timestamp);

        if all_candles.is_empty() {
            return Ok(self.empty_result(interval));
        }

        let mut portfolio = MultiAssetPortfolio::new(
            self.initial_capital,
            self.execution.clone(),
            self.risk.clone(),
        );
        let mut history: HashMap<String, Vec<Candle>> = self
            .symbols
            .iter()
            .map(|s| (s.clone(), Vec::new()))
            .collect();
        let mut latest_prices: HashMap<String, Decimal> = HashMap::new();

        for candle in &all_candles {
            let symbol = candle.symbol.clone();
            latest_prices.insert(symbol.clone(), candle.close);
            portfolio.update_equity(&latest_prices);

            let risk_exited = self.check_risk_exit(candle, &mut portfolio);
            if !risk_exited {
                let symbol_history = history.entry(symbol.clone()).or_default();
                if let Some(signal) = self.strategy.on_candle(candle, symbol_history) {
                    portfolio.process_signal(
                        &signal,
                        candle.close,
                        candle.timestamp,
                        symbol_history,
                    );
                }
            }

            history.entry(symbol).or_default().push(candle.clone());
        }

        let mut last_prices: HashMap<String, Decimal> = HashMap::new();
        for candle in all_candles.iter().rev() {
            last_prices
                .entry(candle.symbol.clone())
                .or_insert(candle.close);
        }
        let last_ts = all_candles.last().expect("candles is non-empty").timestamp;
        portfolio.force_close_all(&last_prices, last_ts);

        let final_capital = portfolio.capital();
        let metrics = calculate_metrics(portfolio.trades(), self.initial_capital, final_capital);

        Ok(BacktestResult {
            strategy_name: self.strategy.name(),
            symbol: self.symbols.join(","),
            interval,
            initial_capital: self.initial_capital,
            final_capital,
            trades: portfolio.trades().to_vec(),
            metrics,
            candles: all_candles,
        })
    }

    /// Evaluate stop-loss / take-profit for the candle's symbol and close at
    /// the threshold price when triggered.
    fn check_risk_exit(&self, candle: &Candle, portfolio: &mut MultiAssetPortfolio) -> bool {
        let Some(position) = portfolio.positions().get(&candle.symbol) else {
            return false;
        };
        let Some(exit_price) =
            check_risk_triggers(candle, position.entry_price, &self.risk, position.side)
        else {
            return false;
        };
        let exit_fee = exit_price * position.quantity * self.execution.taker_fee_pct;
        portfolio.close_at(&candle.symbol, exit_price, exit_fee, candle.timestamp);
        true
    }

    fn empty_result(&self, interval: Interval) -> BacktestResult {
        BacktestResult {
            strategy_name: self.strategy.name(),
            symbol: self.symbols.join(","),
            interval,
            initial_capital: self.initial_capital,
            final_capital: self.initial_capital,
            trades: Vec::new(),
            metrics: calculate_metrics(&[], self.initial_capital, self.initial_capital),
            candles: Vec::new(),
        }
    }
}
