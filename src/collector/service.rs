//! Tick collector service.
//!
//! One task drives everything: the WebSocket consumer, batch and timer
//! flushes, 5-minute-window-aligned market discovery, and a heartbeat log.
//! Shutdown (ctrl-c or SIGTERM) drains the buffer and closes the feed.

use crate::clob::api::TradingApi;
use crate::collector::models::Tick;
use crate::collector::repository::TickRepository;
use crate::config::CollectorConfig;
use crate::feed::{MarketFeed, TradeEvent};
use crate::models::safe_decimal;
use anyhow::Result;
use futures_util::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

const FIVE_MINUTES: i64 = 300;
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);

/// Seconds to sleep so discovery fires `lead_seconds` before the next
/// 5-minute boundary. Past this window's fire time, the wait wraps to the
/// next window's fire time.
pub fn seconds_until_next_discovery(now: i64, lead_seconds: i64) -> i64 {
    let elapsed = now % FIVE_MINUTES;
    let fire_at = FIVE_MINUTES - lead_seconds;
    let remaining = fire_at - elapsed;
    if remaining >= 0 {
        remaining
    } else {
        remaining + FIVE_MINUTES
    }
}

pub struct TickCollector<A> {
    api: Arc<A>,
    config: CollectorConfig,
    repository: TickRepository,
    feed: MarketFeed,
    buffer: Vec<Tick>,
    ticks_since_heartbeat: u64,
    total_ticks: u64,
    asset_ids: Vec<String>,
    condition_map: HashMap<String, String>,
    last_flush: Instant,
}

impl<A: TradingApi> TickCollector<A> {
    pub fn new(
        api: Arc<A>,
        config: CollectorConfig,
        repository: TickRepository,
        feed: MarketFeed,
    ) -> Self {
        Self {
            api,
            config,
            repository,
            feed,
            buffer: Vec::new(),
            ticks_since_heartbeat: 0,
            total_ticks: 0,
            asset_ids: Vec::new(),
            condition_map: HashMap::new(),
            last_flush: Instant::now(),
        }
    }

    /// Collect until a shutdown signal arrives or the feed ends for good.
    pub async fn run(mut self) -> Result<()> {
        self.discover_and_resolve().await;
        if self.asset_ids.is_empty() {
            error!("no asset ids discovered, nothing to subscribe to");
            return Ok(());
        }
        info!(assets = self.asset_ids.len(), "starting tick collection");

        self.last_flush = Instant::now();
        let mut events = self.feed.stream(self.asset_ids.clone());

        let flush_interval = Duration::from_secs(self.config.flush_interval_seconds);
        let mut flush_timer =
            tokio::time::interval_at(Instant::now() + flush_interval, flush_interval);
        flush_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut heartbeat =
            tokio::time::interval_at(Instant::now() + HEARTBEAT_INTERVAL, HEARTBEAT_INTERVAL);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let first_discovery = seconds_until_next_discovery(
            chrono::Utc::now().timestamp(),
            self.config.discovery_lead_seconds,
        );
        let discovery_sleep = tokio::time::sleep(Duration::from_secs(first_discovery as u64));
        tokio::pin!(discovery_sleep);

        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

        loop {
            tokio::select! {
                event = events.recv() => {
                    match event {
                        Some(event) => {
                            self.handle_event(&event);
                            if self.buffer.len() >= self.config.flush_batch_size {
                                self.flush_buffer().await;
                            }
                        }
                        None => {
                            info!("feed stream ended");
                            break;
                        }
                    }
                }
                _ = flush_timer.tick() => {
                    // Bound write latency during quiet periods.
                    if self.last_flush.elapsed() >= flush_interval && !self.buffer.is_empty() {
                        self.flush_buffer().await;
                    }
                }
                _ = heartbeat.tick() => {
                    self.heartbeat().await;
                }
                _ = &mut discovery_sleep => {
                    let known = self.asset_ids.len();
                    self.discover_and_resolve().await;
                    if self.asset_ids.len() > known {
                        self.feed.update_subscription(self.asset_ids.clone());
                    }
                    // At least 1s before recomputing, in case the lead time
                    // puts the fire point at the boundary itself.
                    let next = seconds_until_next_discovery(
                        chrono::Utc::now().timestamp(),
                        self.config.discovery_lead_seconds,
                    )
                    .max(1);
                    discovery_sleep
                        .as_mut()
                        .reset(Instant::now() + Duration::from_secs(next as u64));
                }
                _ = &mut ctrl_c => {
                    info!("shutdown signal received");
                    break;
                }
                _ = sigterm.recv() => {
                    info!("termination signal received");
                    break;
                }
            }
        }

        self.flush_buffer().await;
        self.feed.close();
        info!(total = self.total_ticks, "tick collector shut down");
        Ok(())
    }

    /// Parse a trade event into a `Tick` and buffer it. Malformed events
    /// are dropped with a debug log.
    pub fn handle_event(&mut self, event: &TradeEvent) {
        let Some(tick) = self.parse_tick(event) else {
            debug!(asset_id = %event.asset_id, "skipping malformed event");
            return;
        };
        self.buffer.push(tick);
        self.ticks_since_heartbeat += 1;
        self.total_ticks += 1;
    }

    fn parse_tick(&self, event: &TradeEvent) -> Option<Tick> {
        if event.asset_id.is_empty() {
            return None;
        }
        let price = safe_decimal(&event.price).ok()?;
        let size = safe_decimal(&event.size).ok()?;
        Some(Tick {
            asset_id: event.asset_id.clone(),
            condition_id: self
                .condition_map
                .get(&event.asset_id)
                .cloned()
                .unwrap_or_default(),
            price,
            size,
            side: event.side.clone(),
            fee_rate_bps: parse_integer_field(&event.fee_rate_bps)?,
            timestamp: parse_integer_field(&event.timestamp)?,
            received_at: chrono::Utc::now().timestamp_millis(),
        })
    }

    /// Write the buffered batch. The buffer is cleared first; a failed
    /// write logs and drops the batch rather than wedging ingestion.
    pub async fn flush_buffer(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let batch = std::mem::take(&mut self.buffer);
        self.last_flush = Instant::now();

        let repository = self.repository.clone();
        let result =
            tokio::task::spawn_blocking(move || repository.save_ticks(&batch)).await;
        match result {
            Ok(Ok(count)) => debug!(count, "flushed ticks"),
            Ok(Err(e)) => warn!(error = %e, "tick batch write failed, dropping batch"),
            Err(e) => warn!(error = %e, "tick flush task failed"),
        }
    }

    async fn heartbeat(&mut self) {
        let repository = self.repository.clone();
        let total_stored = tokio::task::spawn_blocking(move || repository.get_tick_count())
            .await
            .ok()
            .and_then(Result::ok)
            .unwrap_or(0);
        info!(
            ticks_last_min = self.ticks_since_heartbeat,
            total_stored,
            assets = self.asset_ids.len(),
            "collector heartbeat"
        );
        self.ticks_since_heartbeat = 0;
    }

    /// Discover markets from series slugs plus the static list, then
    /// resolve every condition ID to its token IDs concurrently. Only new
    /// token IDs are appended. Failures log and leave the known set as is.
    pub async fn discover_and_resolve(&mut self) {
        let mut condition_ids = self.config.markets.clone();

        if !self.config.series_slugs.is_empty() {
            // include_next subscribes to the upcoming window's markets
            // before they open.
            match self
                .api
                .discover_series_markets(&self.config.series_slugs, true)
                .await
            {
                Ok(discovered) => {
                    info!(count = discovered.len(), "discovered series markets");
                    for (condition_id, _end_date) in discovered {
                        if !condition_ids.contains(&condition_id) {
                            condition_ids.push(condition_id);
                        }
                    }
                }
                Err(e) => error!(error = %e, "series discovery failed"),
            }
        }

        let fetches = condition_ids.iter().map(|condition_id| {
            let api = Arc::clone(&self.api);
            let condition_id = condition_id.clone();
            async move {
                match api.get_market(&condition_id).await {
                    Ok(market) => market
                        .tokens
                        .iter()
                        .map(|token| (token.token_id.clone(), condition_id.clone()))
                        .collect(),
                    Err(e) => {
                        error!(condition_id = %condition_id, error = %e, "failed to resolve market");
                        Vec::new()
                    }
                }
            }
        });
        let resolved: Vec<Vec<(String, String)>> = join_all(fetches).await;

        let mut added = 0usize;
        for (token_id, condition_id) in resolved.into_iter().flatten() {
            if token_id.is_empty() || self.condition_map.contains_key(&token_id) {
                continue;
            }
            self.condition_map.insert(token_id.clone(), condition_id);
            self.asset_ids.push(token_id);
            added += 1;
        }
        if added > 0 {
            info!(added, total = self.asset_ids.len(), "resolved new asset ids");
        }
    }

    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn asset_ids(&self) -> &[String] {
        &self.asset_ids
    }
}

/// Missing numeric string fields mean zero; malformed ones poison the event.
fn parse_integer_field(raw: &str) -> Option<i64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Some(0);
    }
    trimmed.parse().ok()
}
