//! Live trading engine.
//!
//! Same event loop as the paper engine, but every entry and exit goes
//! through the venue as a real order and sizing runs against the live
//! collateral balance. Guardrails: a loss limit that stops the engine when
//! equity drops below the configured fraction of the starting balance,
//! balance refresh before every entry, ctrl-c shutdown, and position
//! closing on exit.

use crate::bot::core::EngineCore;
use crate::bot::kelly::{estimated_probability, kelly_fraction};
use crate::bot::live_portfolio::LivePortfolio;
use crate::bot::models::{LiveTradingResult, MarketSnapshot, Outcome};
use crate::bot::PredictionMarketStrategy;
use crate::clob::api::TradingApi;
use crate::config::BotConfig;
use crate::feed::{MarketFeed, TradeEvent};
use crate::models::{Side, Signal};
use anyhow::Result;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const ROTATION_CHECK_INTERVAL: Duration = Duration::from_secs(1);
const FALLBACK_CLOSE_PRICE: Decimal = Decimal::from_parts(50, 0, 0, false, 2);
const DEFAULT_MAX_LOSS_PCT: Decimal = Decimal::from_parts(10, 0, 0, false, 2);

pub struct LiveTradingEngine<A> {
    core: EngineCore<A>,
    strategy: Box<dyn PredictionMarketStrategy>,
    portfolio: LivePortfolio<A>,
    feed: MarketFeed,
    max_loss_pct: Decimal,
    initial_balance: Decimal,
}

impl<A: TradingApi> LiveTradingEngine<A> {
    pub fn new(
        api: Arc<A>,
        strategy: Box<dyn PredictionMarketStrategy>,
        config: BotConfig,
        feed: MarketFeed,
        use_market_orders: bool,
    ) -> Self {
        let portfolio =
            LivePortfolio::new(Arc::clone(&api), config.max_position_pct, use_market_orders);
        let now = chrono::Utc::now().timestamp();
        Self {
            core: EngineCore::new(api, config, now),
            strategy,
            portfolio,
            feed,
            max_loss_pct: DEFAULT_MAX_LOSS_PCT,
            initial_balance: Decimal::ZERO,
        }
    }

    pub fn with_max_loss_pct(mut self, max_loss_pct: Decimal) -> Self {
        self.max_loss_pct = max_loss_pct;
        self
    }

    /// Run until the feed ends, ctrl-c, the loss limit, or `max_ticks`.
    pub async fn run(&mut self, max_ticks: Option<u64>) -> Result<LiveTradingResult> {
        self.core.bootstrap().await;
        self.initial_balance = self.portfolio.refresh_balance().await;
        info!(balance = %self.initial_balance, "initial collateral balance");

        let mut events = self.feed.stream(self.core.asset_ids.clone());

        let refresh_period =
            Duration::from_secs(self.core.config.order_book_refresh_seconds.max(1));
        let mut refresh =
            tokio::time::interval_at(tokio::time::Instant::now() + refresh_period, refresh_period);
        refresh.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut rotation_check = tokio::time::interval(ROTATION_CHECK_INTERVAL);
        rotation_check.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        let mut ticks: u64 = 0;
        loop {
            if let Some(limit) = max_ticks {
                if ticks >= limit {
                    break;
                }
            }
            if self.loss_limit_breached() {
                warn!(
                    max_loss_pct = %self.max_loss_pct,
                    equity = %self.portfolio.total_equity(),
                    "loss limit reached, stopping engine"
                );
                break;
            }
            tokio::select! {
                event = events.recv() => {
                    match event {
                        Some(event) => {
                            ticks += 1;
                            self.on_price_update(&event).await;
                        }
                        None => {
                            info!("feed stream ended");
                            break;
                        }
                    }
                }
                _ = refresh.tick() => {
                    self.core.refresh_order_books().await;
                }
                _ = rotation_check.tick() => {
                    let now = chrono::Utc::now().timestamp();
                    if self.core.rotation_due(now) {
                        self.rotate_markets().await;
                    }
                }
                _ = &mut ctrl_c => {
                    info!("shutdown signal received, closing positions");
                    break;
                }
            }
        }

        self.feed.close();
        self.close_all_positions().await;
        Ok(self.build_result().await)
    }

    /// Equity below `initial * (1 - max_loss_pct)` stops the engine.
    pub fn loss_limit_breached(&self) -> bool {
        if self.initial_balance <= Decimal::ZERO {
            return false;
        }
        self.portfolio.total_equity() / self.initial_balance
            < Decimal::ONE - self.max_loss_pct
    }

    /// Handle one trade event.
    ///
    /// Markets with an open position are skipped entirely: positions exit
    /// at rotation or shutdown, never on a second in-window signal, which
    /// prevents double entries on the same market.
    pub async fn on_price_update(&mut self, event: &TradeEvent) {
        let Some(condition_id) = self.core.track_event(event) else {
            return;
        };
        if self.portfolio.positions().contains_key(&condition_id) {
            return;
        }
        let now = chrono::Utc::now().timestamp();
        let Some(snapshot) = self.core.build_snapshot(&condition_id, now) else {
            return;
        };
        self.core.note_snapshot(&snapshot);

        let signal = {
            let history = self.core.history_before(&condition_id);
            self.strategy.on_snapshot(&snapshot, history)
        };
        self.core.push_history(snapshot.clone());

        if let Some(signal) = signal {
            info!(
                side = %signal.side,
                symbol = %signal.symbol,
                strength = %signal.strength,
                reason = %signal.reason,
                "signal"
            );
            self.apply_signal(&signal, snapshot).await;
        }
    }

    /// Convert a signal into a real order.
    pub async fn apply_signal(&mut self, signal: &Signal, snapshot: MarketSnapshot) {
        let condition_id = snapshot.condition_id.clone();
        let Some((yes_token, no_token)) = self.core.token_ids_for(&condition_id).cloned() else {
            warn!(condition_id = %condition_id, "no cached token ids, skipping signal");
            return;
        };
        let now = snapshot.timestamp;

        // Close path; only reachable via direct calls (the event loop skips
        // markets with open positions).
        if signal.side == Side::Sell && self.portfolio.positions().contains_key(&condition_id) {
            let fresh = self
                .core
                .refresh_order_book_for_trade(&condition_id, now)
                .await
                .unwrap_or(snapshot);
            let outcome = self
                .core
                .position_outcomes
                .get(&condition_id)
                .copied()
                .unwrap_or(Outcome::Yes);
            let token_id = match outcome {
                Outcome::Yes => yes_token,
                Outcome::No => no_token,
            };
            let close_price = fresh.price_for(outcome);
            let quantity = self.portfolio.positions()[&condition_id].quantity;
            match self
                .portfolio
                .close_position(&condition_id, &token_id, close_price, quantity, fresh.timestamp)
                .await
            {
                Some(trade) => {
                    info!(
                        condition_id = %condition_id,
                        price = %close_price,
                        order_id = %trade.order_id,
                        filled = %trade.filled,
                        "position closed"
                    );
                    self.core.position_outcomes.remove(&condition_id);
                }
                None => warn!(condition_id = %condition_id, "close order failed, keeping position"),
            }
            return;
        }

        if self.portfolio.positions().contains_key(&condition_id) {
            return;
        }

        let fresh = self
            .core
            .refresh_order_book_for_trade(&condition_id, now)
            .await
            .unwrap_or(snapshot);
        let (buy_price, outcome, token_id) = match signal.side {
            Side::Buy => (fresh.yes_price, Outcome::Yes, yes_token),
            Side::Sell => (fresh.no_price, Outcome::No, no_token),
        };

        // Balance is refreshed from the venue before every entry.
        self.portfolio.refresh_balance().await;

        let estimate = estimated_probability(buy_price, signal.strength);
        let fraction = kelly_fraction(estimate, buy_price, self.core.config.kelly_fraction);
        if fraction <= Decimal::ZERO {
            return;
        }
        let max_quantity = self.portfolio.max_quantity_for(buy_price);
        let quantity = (max_quantity * fraction).floor().max(Decimal::ONE);
        let edge = estimate - buy_price;

        match self
            .portfolio
            .open_position(
                &condition_id,
                &token_id,
                outcome,
                Side::Buy,
                buy_price,
                quantity,
                fresh.timestamp,
                &signal.reason,
                edge,
            )
            .await
        {
            Some(trade) => {
                self.core
                    .position_outcomes
                    .insert(condition_id.clone(), outcome);
                info!(
                    condition_id = %condition_id,
                    outcome = %outcome,
                    quantity = %quantity,
                    price = %buy_price,
                    edge = %edge,
                    order_id = %trade.order_id,
                    filled = %trade.filled,
                    "trade opened"
                );
            }
            None => {
                warn!(
                    condition_id = %condition_id,
                    "trade rejected (duplicate, insufficient balance, or api error)"
                );
            }
        }
    }

    /// Rotate into the new 5-minute window.
    ///
    /// Resolved markets redeem on-chain, so local tracking is cleared
    /// without placing orders; the balance refresh picks up redeemed value.
    pub async fn rotate_markets(&mut self) {
        self.portfolio.clear_positions();
        self.core.position_outcomes.clear();
        self.portfolio.refresh_balance().await;

        let discovered = match self.core.discover().await {
            Ok(discovered) => discovered,
            Err(e) => {
                warn!(error = %e, "market rotation discovery failed");
                return;
            }
        };
        if discovered.is_empty() {
            warn!("market rotation found no new markets");
            return;
        }

        self.core.apply_rotation(&discovered);
        self.core.bootstrap().await;
        self.feed.update_subscription(self.core.asset_ids.clone());
        info!(
            markets = discovered.len(),
            window = self.core.current_window,
            "rotated markets"
        );
        self.log_performance();
    }

    /// Close every open position with a real SELL order at the last known
    /// mark (0.50 without history). Failures keep the position and log.
    pub async fn close_all_positions(&mut self) {
        let now = chrono::Utc::now().timestamp();
        let open: Vec<String> = self.portfolio.positions().keys().cloned().collect();
        for condition_id in open {
            let outcome = self
                .core
                .position_outcomes
                .get(&condition_id)
                .copied()
                .unwrap_or(Outcome::Yes);
            let Some((yes_token, no_token)) = self.core.token_ids_for(&condition_id).cloned()
            else {
                warn!(condition_id = %condition_id, "no cached token id, cannot close");
                continue;
            };
            let token_id = match outcome {
                Outcome::Yes => yes_token,
                Outcome::No => no_token,
            };
            let close_price = match self.core.last_snapshot(&condition_id) {
                Some(snapshot) => snapshot.price_for(outcome),
                None => FALLBACK_CLOSE_PRICE,
            };
            let quantity = self.portfolio.positions()[&condition_id].quantity;
            match self
                .portfolio
                .close_position(&condition_id, &token_id, close_price, quantity, now)
                .await
            {
                Some(trade) => {
                    info!(
                        condition_id = %condition_id,
                        price = %close_price,
                        order_id = %trade.order_id,
                        filled = %trade.filled,
                        "shutdown close"
                    );
                    self.core.position_outcomes.remove(&condition_id);
                }
                None => warn!(condition_id = %condition_id, "shutdown close failed"),
            }
        }
    }

    fn log_performance(&self) {
        let equity = self.portfolio.total_equity();
        let return_pct = if self.initial_balance > Decimal::ZERO {
            (equity - self.initial_balance) / self.initial_balance * Decimal::ONE_HUNDRED
        } else {
            Decimal::ZERO
        };
        info!(
            tick = self.core.snapshots_processed,
            equity = %equity,
            balance = %self.portfolio.balance(),
            positions = self.portfolio.positions().len(),
            trades = self.portfolio.trades().len(),
            return_pct = %return_pct,
            "performance"
        );
    }

    pub async fn build_result(&mut self) -> LiveTradingResult {
        let final_balance = self.portfolio.refresh_balance().await;
        let trades = self.portfolio.trades().to_vec();

        let mut metrics = BTreeMap::new();
        if !trades.is_empty() {
            let buys = trades.iter().filter(|t| t.side == Side::Buy).count();
            let sells = trades.len() - buys;
            metrics.insert("total_trades".to_string(), Decimal::from(trades.len()));
            metrics.insert("buy_trades".to_string(), Decimal::from(buys));
            metrics.insert("sell_trades".to_string(), Decimal::from(sells));
            metrics.insert(
                "total_return".to_string(),
                if self.initial_balance > Decimal::ZERO {
                    (final_balance - self.initial_balance) / self.initial_balance
                } else {
                    Decimal::ZERO
                },
            );
        }

        LiveTradingResult {
            strategy_name: self.strategy.name(),
            initial_balance: self.initial_balance,
            final_balance,
            trades,
            snapshots_processed: self.core.snapshots_processed,
            metrics,
        }
    }

    pub fn portfolio(&self) -> &LivePortfolio<A> {
        &self.portfolio
    }

    pub fn core(&self) -> &EngineCore<A> {
        &self.core
    }
}
