//! Shared state and operations for the paper and live trading engines.
//!
//! Both engines compose an `EngineCore`: price tracking, market and order
//! book caches, bounded snapshot history, bootstrap, and 5-minute window
//! rotation plumbing. The engines themselves own their portfolio variant
//! and decide how signals turn into trades.

use crate::bot::models::{MarketSnapshot, Outcome};
use crate::bot::price_tracker::PriceTracker;
use crate::clob::api::TradingApi;
use crate::clob::error::ClobError;
use crate::clob::models::{Market, OrderBook};
use crate::config::BotConfig;
use crate::feed::TradeEvent;
use crate::models::safe_decimal;
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const FIVE_MINUTES: i64 = 300;
const MIN_TOKENS: usize = 2;

/// Floor a timestamp to its containing 5-minute window start.
pub fn window_start(now: i64) -> i64 {
    (now / FIVE_MINUTES) * FIVE_MINUTES
}

pub struct EngineCore<A> {
    api: Arc<A>,
    pub config: BotConfig,
    pub price_tracker: PriceTracker,
    pub active_markets: Vec<String>,
    history: HashMap<String, VecDeque<MarketSnapshot>>,
    pub snapshots_processed: u64,
    pub position_outcomes: HashMap<String, Outcome>,
    end_time_overrides: HashMap<String, String>,
    cached_order_books: HashMap<String, OrderBook>,
    cached_markets: HashMap<String, Market>,
    pub current_window: i64,
    pub asset_ids: Vec<String>,
    token_ids: HashMap<String, (String, String)>,
}

impl<A: TradingApi> EngineCore<A> {
    pub fn new(api: Arc<A>, config: BotConfig, now: i64) -> Self {
        let active_markets = config.markets.clone();
        let end_time_overrides = config.market_end_times.iter().cloned().collect();
        let history = active_markets
            .iter()
            .map(|cid| (cid.clone(), VecDeque::new()))
            .collect();
        Self {
            api,
            config,
            price_tracker: PriceTracker::new(),
            active_markets,
            history,
            snapshots_processed: 0,
            position_outcomes: HashMap::new(),
            end_time_overrides,
            cached_order_books: HashMap::new(),
            cached_markets: HashMap::new(),
            current_window: window_start(now),
            asset_ids: Vec::new(),
            token_ids: HashMap::new(),
        }
    }

    pub fn api(&self) -> Arc<A> {
        Arc::clone(&self.api)
    }

    /// Fetch and register one market with the price tracker.
    ///
    /// The first token is YES, the second NO. Markets with fewer than two
    /// tokens are skipped.
    pub async fn bootstrap_market(&mut self, condition_id: &str) -> Result<Option<Market>, ClobError> {
        let api = self.api();
        let market = api.get_market(condition_id).await?;

        if market.tokens.len() < MIN_TOKENS {
            warn!(condition_id = %condition_id, "market has fewer than 2 tokens");
            return Ok(None);
        }
        let yes = &market.tokens[0];
        let no = &market.tokens[1];

        self.price_tracker
            .register_market(condition_id, &yes.token_id, &no.token_id);
        self.price_tracker.update(&yes.token_id, yes.price);
        self.price_tracker.update(&no.token_id, no.price);
        self.token_ids.insert(
            condition_id.to_string(),
            (yes.token_id.clone(), no.token_id.clone()),
        );
        self.asset_ids.push(yes.token_id.clone());
        self.asset_ids.push(no.token_id.clone());
        self.history
            .entry(condition_id.to_string())
            .or_default();
        self.cached_markets
            .insert(condition_id.to_string(), market.clone());
        Ok(Some(market))
    }

    /// Fetch markets and YES-token order books for every active market.
    /// Per-market failures log and continue; bootstrap never aborts.
    pub async fn bootstrap(&mut self) {
        for condition_id in self.active_markets.clone() {
            let market = match self.bootstrap_market(&condition_id).await {
                Ok(Some(market)) => market,
                Ok(None) => continue,
                Err(e) => {
                    warn!(condition_id = %condition_id, error = %e, "failed to fetch market");
                    continue;
                }
            };

            let api = self.api();
            match api.get_order_book(&market.tokens[0].token_id).await {
                Ok(book) => {
                    self.cached_order_books.insert(condition_id.clone(), book);
                }
                Err(e) => {
                    warn!(condition_id = %condition_id, error = %e, "failed to fetch order book");
                }
            }
        }
        info!(
            markets = self.cached_markets.len(),
            assets = self.asset_ids.len(),
            "bootstrapped markets"
        );
    }

    /// Background refresh of every active market's YES-token order book.
    pub async fn refresh_order_books(&mut self) {
        for condition_id in self.active_markets.clone() {
            let Some(token_id) = self.yes_token_id(&condition_id) else {
                continue;
            };
            let api = self.api();
            match api.get_order_book(&token_id).await {
                Ok(book) => {
                    self.cached_order_books.insert(condition_id, book);
                }
                Err(e) => {
                    warn!(condition_id = %condition_id, error = %e, "failed to refresh order book");
                }
            }
        }
    }

    /// Fetch a fresh order book right before a trade and rebuild the
    /// snapshot. On failure the cached book stays and the stale snapshot is
    /// returned.
    pub async fn refresh_order_book_for_trade(
        &mut self,
        condition_id: &str,
        now: i64,
    ) -> Option<MarketSnapshot> {
        let token_id = self.yes_token_id(condition_id)?;
        let api = self.api();
        match api.get_order_book(&token_id).await {
            Ok(book) => {
                self.cached_order_books
                    .insert(condition_id.to_string(), book);
                debug!(condition_id = %condition_id, "refreshed order book before trade");
            }
            Err(e) => {
                warn!(condition_id = %condition_id, error = %e, "pre-trade order book refresh failed, using cached");
            }
        }
        self.build_snapshot(condition_id, now)
    }

    fn yes_token_id(&self, condition_id: &str) -> Option<String> {
        let market = self.cached_markets.get(condition_id)?;
        if market.tokens.len() < MIN_TOKENS {
            return None;
        }
        Some(market.tokens[0].token_id.clone())
    }

    /// Parse a feed event and feed it to the price tracker.
    ///
    /// Returns the affected condition ID, or `None` for unknown assets and
    /// unparseable prices.
    pub fn track_event(&mut self, event: &TradeEvent) -> Option<String> {
        if event.asset_id.is_empty() {
            return None;
        }
        let price = match safe_decimal(&event.price) {
            Ok(price) => price,
            Err(_) => {
                debug!(asset_id = %event.asset_id, price = %event.price, "skipping event with invalid price");
                return None;
            }
        };
        self.price_tracker.update(&event.asset_id, price)
    }

    /// Build a snapshot from the cached market, order book, and latest
    /// prices. `None` until all three are available.
    pub fn build_snapshot(&self, condition_id: &str, now: i64) -> Option<MarketSnapshot> {
        let (yes_price, no_price) = self.price_tracker.prices(condition_id)?;
        let order_book = self.cached_order_books.get(condition_id)?.clone();
        let market = self.cached_markets.get(condition_id)?;
        let end_date = self
            .end_time_overrides
            .get(condition_id)
            .cloned()
            .unwrap_or_else(|| market.end_date.clone());

        match MarketSnapshot::new(
            condition_id,
            &market.question,
            now,
            yes_price,
            no_price,
            order_book,
            market.volume,
            market.liquidity,
            end_date,
        ) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!(condition_id = %condition_id, error = %e, "dropping out-of-range snapshot");
                None
            }
        }
    }

    /// Count and log a snapshot that is about to be processed.
    pub fn note_snapshot(&mut self, snapshot: &MarketSnapshot) {
        self.snapshots_processed += 1;
        info!(
            tick = self.snapshots_processed,
            question = %truncate(&snapshot.question, 50),
            yes = %snapshot.yes_price,
            no = %snapshot.no_price,
            bids = snapshot.order_book.bids.len(),
            asks = snapshot.order_book.asks.len(),
            "snapshot"
        );
    }

    /// History of previous snapshots for a market, oldest first, not
    /// including the one currently being processed.
    pub fn history_before(&mut self, condition_id: &str) -> &[MarketSnapshot] {
        let deque = self.history.entry(condition_id.to_string()).or_default();
        deque.make_contiguous();
        deque.as_slices().0
    }

    /// Append a processed snapshot, evicting the oldest past `max_history`.
    pub fn push_history(&mut self, snapshot: MarketSnapshot) {
        let max_history = self.config.max_history;
        let deque = self
            .history
            .entry(snapshot.condition_id.clone())
            .or_default();
        if deque.len() >= max_history {
            deque.pop_front();
        }
        deque.push_back(snapshot);
    }

    pub fn last_snapshot(&self, condition_id: &str) -> Option<&MarketSnapshot> {
        self.history.get(condition_id)?.back()
    }

    /// Check the 5-minute boundary; crossing it advances the window and
    /// reports that a rotation is due. Only active with series slugs.
    pub fn rotation_due(&mut self, now: i64) -> bool {
        if self.config.series_slugs.is_empty() {
            return false;
        }
        let window = window_start(now);
        if window != self.current_window {
            self.current_window = window;
            return true;
        }
        false
    }

    pub async fn discover(&self) -> Result<Vec<(String, String)>, ClobError> {
        self.api
            .discover_series_markets(&self.config.series_slugs, false)
            .await
    }

    /// Swap in a freshly discovered market set, clearing all per-market
    /// state. Callers re-bootstrap and update the feed subscription after.
    pub fn apply_rotation(&mut self, discovered: &[(String, String)]) {
        self.active_markets = discovered.iter().map(|(cid, _)| cid.clone()).collect();
        self.end_time_overrides = discovered.iter().cloned().collect();
        self.price_tracker.clear();
        self.asset_ids.clear();
        self.cached_markets.clear();
        self.cached_order_books.clear();
        self.token_ids.clear();
        for condition_id in &self.active_markets {
            self.history.entry(condition_id.clone()).or_default();
        }
    }

    /// `(yes_token_id, no_token_id)` cached at bootstrap.
    pub fn token_ids_for(&self, condition_id: &str) -> Option<&(String, String)> {
        self.token_ids.get(condition_id)
    }

    /// The price to mark an open position at, per its outcome side.
    pub fn mark_price(&self, condition_id: &str, snapshot: &MarketSnapshot) -> Option<Decimal> {
        let outcome = self.position_outcomes.get(condition_id)?;
        Some(snapshot.price_for(*outcome))
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}
