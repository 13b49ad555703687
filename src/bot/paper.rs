//! Paper trading engine.
//!
//! Streams trade events, builds snapshots, runs the strategy, sizes bets
//! with fractional Kelly, and tracks virtual P&L in a `PaperPortfolio`.
//! Series markets rotate at every 5-minute window boundary.

use crate::bot::core::EngineCore;
use crate::bot::kelly::{estimated_probability, kelly_fraction};
use crate::bot::models::{MarketSnapshot, Outcome, PaperTradingResult};
use crate::bot::portfolio::PaperPortfolio;
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

pub struct PaperTradingEngine<A> {
    core: EngineCore<A>,
    strategy: Box<dyn PredictionMarketStrategy>,
    portfolio: PaperPortfolio,
    feed: MarketFeed,
}

impl<A: TradingApi> PaperTradingEngine<A> {
    pub fn new(
        api: Arc<A>,
        strategy: Box<dyn PredictionMarketStrategy>,
        config: BotConfig,
        feed: MarketFeed,
    ) -> Self {
        let portfolio = PaperPortfolio::new(config.initial_capital, config.max_position_pct);
        let now = chrono::Utc::now().timestamp();
        Self {
            core: EngineCore::new(api, config, now),
            strategy,
            portfolio,
            feed,
        }
    }

    /// Run until the feed ends, ctrl-c, or `max_ticks` processed events.
    pub async fn run(&mut self, max_ticks: Option<u64>) -> Result<PaperTradingResult> {
        self.core.bootstrap().await;
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
        self.close_all_positions();
        Ok(self.build_result())
    }

    /// Handle one trade event: track the price, rebuild the snapshot, run
    /// the strategy, then mark any open position on its outcome side.
    pub async fn on_price_update(&mut self, event: &TradeEvent) {
        let Some(condition_id) = self.core.track_event(event) else {
            return;
        };
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
            self.apply_signal(&signal, snapshot.clone()).await;
        }

        if let Some(mark) = self.core.mark_price(&condition_id, &snapshot) {
            self.portfolio.mark_to_market(&condition_id, mark);
        }
    }

    /// Convert a signal into a portfolio action.
    ///
    /// SELL with an open position closes it; SELL while flat buys the NO
    /// side. The order book is refreshed immediately before any trade.
    pub async fn apply_signal(&mut self, signal: &Signal, snapshot: MarketSnapshot) {
        let condition_id = snapshot.condition_id.clone();
        let now = snapshot.timestamp;

        if signal.side == Side::Sell && self.portfolio.positions().contains_key(&condition_id) {
            let fresh = self
                .core
                .refresh_order_book_for_trade(&condition_id, now)
                .await
                .unwrap_or(snapshot);
            let outcome = self
                .core
                .position_outcomes
                .remove(&condition_id)
                .unwrap_or(Outcome::Yes);
            let close_price = fresh.price_for(outcome);
            if self
                .portfolio
                .close_position(&condition_id, close_price, fresh.timestamp)
                .is_some()
            {
                info!(condition_id = %condition_id, price = %close_price, "position closed");
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
        let (buy_price, outcome) = match signal.side {
            Side::Buy => (fresh.yes_price, Outcome::Yes),
            Side::Sell => (fresh.no_price, Outcome::No),
        };

        let estimate = estimated_probability(buy_price, signal.strength);
        let fraction = kelly_fraction(estimate, buy_price, self.core.config.kelly_fraction);
        if fraction <= Decimal::ZERO {
            return;
        }
        let max_quantity = self.portfolio.max_quantity_for(buy_price);
        let quantity = (max_quantity * fraction).floor().max(Decimal::ONE);
        let edge = estimate - buy_price;

        match self.portfolio.open_position(
            &condition_id,
            outcome,
            Side::Buy,
            buy_price,
            quantity,
            fresh.timestamp,
            &signal.reason,
            edge,
        ) {
            Some(_) => {
                self.core.position_outcomes.insert(condition_id.clone(), outcome);
                info!(
                    condition_id = %condition_id,
                    outcome = %outcome,
                    quantity = %quantity,
                    price = %buy_price,
                    edge = %edge,
                    "trade opened"
                );
            }
            None => {
                warn!(condition_id = %condition_id, "trade rejected (duplicate or insufficient capital)");
            }
        }
    }

    /// Close everything at the last mark, re-discover the window's markets,
    /// re-bootstrap, and point the feed at the new asset list.
    pub async fn rotate_markets(&mut self) {
        let now = chrono::Utc::now().timestamp();
        self.close_open_positions(now);

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

    /// Close all open positions at their last seen mark; previous-window
    /// markets have resolved. Falls back to 0.50 without any history.
    fn close_open_positions(&mut self, now: i64) {
        let open: Vec<String> = self.portfolio.positions().keys().cloned().collect();
        for condition_id in open {
            let outcome = self
                .core
                .position_outcomes
                .remove(&condition_id)
                .unwrap_or(Outcome::Yes);
            let close_price = match self.core.last_snapshot(&condition_id) {
                Some(snapshot) => snapshot.price_for(outcome),
                None => {
                    warn!(condition_id = %condition_id, "no price history, closing at fallback 0.50");
                    FALLBACK_CLOSE_PRICE
                }
            };
            if self
                .portfolio
                .close_position(&condition_id, close_price, now)
                .is_some()
            {
                info!(condition_id = %condition_id, price = %close_price, "rotation close");
            }
        }
    }

    fn close_all_positions(&mut self) {
        let now = chrono::Utc::now().timestamp();
        self.close_open_positions(now);
    }

    fn log_performance(&self) {
        let equity = self.portfolio.total_equity();
        let initial = self.core.config.initial_capital;
        let return_pct = if initial > Decimal::ZERO {
            (equity - initial) / initial * Decimal::ONE_HUNDRED
        } else {
            Decimal::ZERO
        };
        info!(
            tick = self.core.snapshots_processed,
            equity = %equity,
            cash = %self.portfolio.capital(),
            positions = self.portfolio.positions().len(),
            trades = self.portfolio.trades().len(),
            return_pct = %return_pct,
            "performance"
        );
    }

    pub fn build_result(&self) -> PaperTradingResult {
        let trades = self.portfolio.trades().to_vec();
        let final_capital = self.portfolio.total_equity();
        let initial = self.core.config.initial_capital;

        let mut metrics = BTreeMap::new();
        if !trades.is_empty() {
            let buys = trades.iter().filter(|t| t.side == Side::Buy).count();
            let sells = trades.len() - buys;
            metrics.insert("total_trades".to_string(), Decimal::from(trades.len()));
            metrics.insert("buy_trades".to_string(), Decimal::from(buys));
            metrics.insert("sell_trades".to_string(), Decimal::from(sells));
            metrics.insert(
                "total_return".to_string(),
                if initial > Decimal::ZERO {
                    (final_capital - initial) / initial
                } else {
                    Decimal::ZERO
                },
            );
        }

        PaperTradingResult {
            strategy_name: self.strategy.name(),
            initial_capital: initial,
            final_capital,
            trades,
            snapshots_processed: self.core.snapshots_processed,
            metrics,
        }
    }

    pub fn portfolio(&self) -> &PaperPortfolio {
        &self.portfolio
    }

    pub fn core(&self) -> &EngineCore<A> {
        &self.core
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clob::error::ClobError;
    use crate::clob::models::{
        Balance, Market, MarketToken, OrderBook, OrderRequest, OrderResponse,
    };
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    struct StubApi {
        markets: HashMap<String, Market>,
        discovered: Mutex<Vec<(String, String)>>,
        fail_discovery: bool,
    }

    impl StubApi {
        fn with_market(condition_id: &str, yes_price: Decimal, no_price: Decimal) -> Self {
            let market = Market {
                condition_id: condition_id.to_string(),
                question: "BTC up in the next 5 minutes?".to_string(),
                description: String::new(),
                tokens: vec![
                    MarketToken {
                        token_id: format!("{condition_id}_yes"),
                        outcome: "Yes".to_string(),
                        price: yes_price,
                    },
                    MarketToken {
                        token_id: format!("{condition_id}_no"),
                        outcome: "No".to_string(),
                        price: no_price,
                    },
                ],
                end_date: "2026-02-22T12:05:00Z".to_string(),
                volume: dec!(1000),
                liquidity: dec!(500),
                active: true,
            };
            let mut markets = HashMap::new();
            markets.insert(condition_id.to_string(), market);
            Self {
                markets,
                discovered: Mutex::new(Vec::new()),
                fail_discovery: false,
            }
        }
    }

    #[async_trait]
    impl TradingApi for StubApi {
        async fn get_market(&self, condition_id: &str) -> Result<Market, ClobError> {
            self.markets
                .get(condition_id)
                .cloned()
                .ok_or_else(|| ClobError::NotFound(condition_id.to_string()))
        }

        async fn get_order_book(&self, token_id: &str) -> Result<OrderBook, ClobError> {
            Ok(OrderBook::empty(token_id))
        }

        async fn discover_series_markets(
            &self,
            _series_slugs: &[String],
            _include_next: bool,
        ) -> Result<Vec<(String, String)>, ClobError> {
            if self.fail_discovery {
                return Err(ClobError::Api {
                    status: 500,
                    msg: "boom".to_string(),
                });
            }
            Ok(self.discovered.lock().clone())
        }

        async fn get_balance(&self, asset_type: &str) -> Result<Balance, ClobError> {
            Ok(Balance {
                asset_type: asset_type.to_string(),
                balance: Decimal::ZERO,
                allowance: Decimal::ZERO,
            })
        }

        async fn place_order(&self, _request: &OrderRequest) -> Result<OrderResponse, ClobError> {
            Err(ClobError::Auth("paper engine never places orders".to_string()))
        }
    }

    /// Always signals the given side with full strength.
    struct AlwaysSignal {
        side: Side,
    }

    impl PredictionMarketStrategy for AlwaysSignal {
        fn name(&self) -> String {
            "always_signal".to_string()
        }

        fn on_snapshot(
            &mut self,
            snapshot: &MarketSnapshot,
            _history: &[MarketSnapshot],
        ) -> Option<Signal> {
            Signal::new(self.side, &snapshot.condition_id, Decimal::ONE, "test").ok()
        }
    }

    struct NeverSignal;

    impl PredictionMarketStrategy for NeverSignal {
        fn name(&self) -> String {
            "never_signal".to_string()
        }

        fn on_snapshot(
            &mut self,
            _snapshot: &MarketSnapshot,
            _history: &[MarketSnapshot],
        ) -> Option<Signal> {
            None
        }
    }

    fn config(markets: Vec<String>) -> BotConfig {
        BotConfig {
            markets,
            series_slugs: vec!["btc-updown-5m".to_string()],
            ..Default::default()
        }
    }

    fn event(asset_id: &str, price: &str) -> TradeEvent {
        TradeEvent {
            event_type: "last_trade_price".to_string(),
            asset_id: asset_id.to_string(),
            price: price.to_string(),
            ..Default::default()
        }
    }

    async fn engine_with(
        strategy: Box<dyn PredictionMarketStrategy>,
        api: StubApi,
    ) -> PaperTradingEngine<StubApi> {
        let mut engine = PaperTradingEngine::new(
            Arc::new(api),
            strategy,
            config(vec!["cond_a".to_string()]),
            MarketFeed::new(Duration::from_secs(1)),
        );
        engine.core.bootstrap().await;
        engine
    }

    #[tokio::test]
    async fn test_buy_signal_opens_yes_position() {
        let api = StubApi::with_market("cond_a", dec!(0.6), dec!(0.4));
        let mut engine = engine_with(Box::new(AlwaysSignal { side: Side::Buy }), api).await;

        engine.on_price_update(&event("cond_a_yes", "0.6")).await;

        let positions = engine.portfolio().positions();
        assert_eq!(positions.len(), 1);
        let position = &positions["cond_a"];
        assert_eq!(position.entry_price, dec!(0.6));
        assert_eq!(
            engine.core().position_outcomes.get("cond_a"),
            Some(&Outcome::Yes)
        );
        // strength 1 -> estimate 0.99, fraction 0.25 * (0.39/0.4)
        let expected_fraction =
            kelly_fraction(dec!(0.99), dec!(0.6), dec!(0.25));
        let expected_qty = (dec!(1000) * dec!(0.1) / dec!(0.6)).floor() * expected_fraction;
        assert_eq!(position.quantity, expected_qty.floor().max(Decimal::ONE));
    }

    #[tokio::test]
    async fn test_sell_signal_without_position_buys_no_side() {
        let api = StubApi::with_market("cond_a", dec!(0.6), dec!(0.4));
        let mut engine = engine_with(Box::new(AlwaysSignal { side: Side::Sell }), api).await;

        engine.on_price_update(&event("cond_a_no", "0.4")).await;

        let positions = engine.portfolio().positions();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions["cond_a"].entry_price, dec!(0.4));
        assert_eq!(
            engine.core().position_outcomes.get("cond_a"),
            Some(&Outcome::No)
        );
    }

    #[tokio::test]
    async fn test_sell_signal_with_position_closes_it() {
        let api = StubApi::with_market("cond_a", dec!(0.6), dec!(0.4));
        let mut engine = engine_with(Box::new(AlwaysSignal { side: Side::Buy }), api).await;
        engine.on_price_update(&event("cond_a_yes", "0.6")).await;
        assert_eq!(engine.portfolio().positions().len(), 1);

        let sell = Signal::new(Side::Sell, "cond_a", Decimal::ONE, "close").unwrap();
        let snapshot = engine
            .core
            .build_snapshot("cond_a", 2000)
            .expect("snapshot available");
        engine.apply_signal(&sell, snapshot).await;

        assert!(engine.portfolio().positions().is_empty());
        assert!(engine.core().position_outcomes.is_empty());
        // Open plus close recorded
        assert_eq!(engine.portfolio().trades().len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_asset_is_ignored() {
        let api = StubApi::with_market("cond_a", dec!(0.6), dec!(0.4));
        let mut engine = engine_with(Box::new(AlwaysSignal { side: Side::Buy }), api).await;
        engine.on_price_update(&event("mystery_asset", "0.5")).await;
        assert!(engine.portfolio().positions().is_empty());
        assert_eq!(engine.core().snapshots_processed, 0);
    }

    #[tokio::test]
    async fn test_invalid_price_is_ignored() {
        let api = StubApi::with_market("cond_a", dec!(0.6), dec!(0.4));
        let mut engine = engine_with(Box::new(AlwaysSignal { side: Side::Buy }), api).await;
        engine.on_price_update(&event("cond_a_yes", "garbage")).await;
        assert!(engine.portfolio().positions().is_empty());
        assert_eq!(engine.core().snapshots_processed, 0);
    }

    #[tokio::test]
    async fn test_strategy_sees_history_before_append() {
        struct HistoryLen {
            observed: Arc<Mutex<Vec<usize>>>,
        }
        impl PredictionMarketStrategy for HistoryLen {
            fn name(&self) -> String {
                "history_len".to_string()
            }
            fn on_snapshot(
                &mut self,
                _snapshot: &MarketSnapshot,
                history: &[MarketSnapshot],
            ) -> Option<Signal> {
                self.observed.lock().push(history.len());
                None
            }
        }

        let observed = Arc::new(Mutex::new(Vec::new()));
        let api = StubApi::with_market("cond_a", dec!(0.6), dec!(0.4));
        let mut engine = PaperTradingEngine::new(
            Arc::new(api),
            Box::new(HistoryLen {
                observed: observed.clone(),
            }),
            config(vec!["cond_a".to_string()]),
            MarketFeed::new(Duration::from_secs(1)),
        );
        engine.core.bootstrap().await;

        engine.on_price_update(&event("cond_a_yes", "0.60")).await;
        engine.on_price_update(&event("cond_a_yes", "0.61")).await;
        engine.on_price_update(&event("cond_a_yes", "0.62")).await;

        // The current snapshot is appended only after the strategy returns.
        assert_eq!(*observed.lock(), vec![0, 1, 2]);
        assert_eq!(engine.core().snapshots_processed, 3);
    }

    /// Signals once, then stays quiet.
    struct OneShot {
        side: Side,
        fired: bool,
    }

    impl PredictionMarketStrategy for OneShot {
        fn name(&self) -> String {
            "one_shot".to_string()
        }

        fn on_snapshot(
            &mut self,
            snapshot: &MarketSnapshot,
            _history: &[MarketSnapshot],
        ) -> Option<Signal> {
            if self.fired {
                return None;
            }
            self.fired = true;
            Signal::new(self.side, &snapshot.condition_id, Decimal::ONE, "test").ok()
        }
    }

    #[tokio::test]
    async fn test_mark_to_market_follows_outcome_side() {
        let api = StubApi::with_market("cond_a", dec!(0.6), dec!(0.4));
        let mut engine = engine_with(
            Box::new(OneShot {
                side: Side::Sell,
                fired: false,
            }),
            api,
        )
        .await;

        // SELL while flat buys NO at 0.4.
        engine.on_price_update(&event("cond_a_no", "0.4")).await;
        assert_eq!(engine.portfolio().positions().len(), 1);

        // NO price moves to 0.7; the position stays open and equity marks
        // on the NO side.
        engine.on_price_update(&event("cond_a_no", "0.7")).await;
        assert_eq!(engine.portfolio().positions().len(), 1);
        assert!(engine.portfolio().total_equity() > dec!(1000));
    }

    #[tokio::test]
    async fn test_rotation_with_empty_discovery_keeps_markets() {
        let api = StubApi::with_market("cond_a", dec!(0.6), dec!(0.4));
        let mut engine = engine_with(Box::new(NeverSignal), api).await;
        let before = engine.core().active_markets.clone();

        engine.rotate_markets().await;

        assert_eq!(engine.core().active_markets, before);
    }

    #[tokio::test]
    async fn test_rotation_discovery_failure_keeps_markets() {
        let mut api = StubApi::with_market("cond_a", dec!(0.6), dec!(0.4));
        api.fail_discovery = true;
        let mut engine = engine_with(Box::new(NeverSignal), api).await;
        let before = engine.core().active_markets.clone();

        engine.rotate_markets().await;

        assert_eq!(engine.core().active_markets, before);
    }

    #[tokio::test]
    async fn test_rotation_closes_positions_at_last_mark() {
        let api = StubApi::with_market("cond_a", dec!(0.6), dec!(0.4));
        let mut engine = engine_with(Box::new(AlwaysSignal { side: Side::Buy }), api).await;
        engine.on_price_update(&event("cond_a_yes", "0.6")).await;
        assert_eq!(engine.portfolio().positions().len(), 1);

        engine.rotate_markets().await;

        // Discovery returned nothing, but positions were already closed.
        assert!(engine.portfolio().positions().is_empty());
        let trades = engine.portfolio().trades();
        assert_eq!(trades.last().unwrap().side, Side::Sell);
        assert_eq!(trades.last().unwrap().price, dec!(0.6));
    }

    #[tokio::test]
    async fn test_result_metrics() {
        let api = StubApi::with_market("cond_a", dec!(0.6), dec!(0.4));
        let mut engine = engine_with(Box::new(AlwaysSignal { side: Side::Buy }), api).await;
        engine.on_price_update(&event("cond_a_yes", "0.6")).await;

        let result = engine.build_result();
        assert_eq!(result.strategy_name, "always_signal");
        assert_eq!(result.snapshots_processed, 1);
        assert_eq!(result.metrics["buy_trades"], dec!(1));
        assert_eq!(result.metrics["total_trades"], dec!(1));
    }
}
