//! Streaming WebSocket client for the CLOB market channel.
//!
//! Connects, subscribes to a set of asset IDs, and forwards only
//! `last_trade_price` events to the consumer. Transport failures trigger
//! reconnects with exponential backoff (capped at 60 s, reset on any
//! successful event). Subscription changes close the socket on purpose,
//! because the server ignores re-subscribe messages on a live connection;
//! the loop then reconnects immediately, skipping the backoff once.

use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::time::sleep;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

const DEFAULT_WS_URL: &str = "wss://ws-subscriptions-clob.polymarket.com/ws/market";
const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(60);
const PING_INTERVAL: Duration = Duration::from_secs(20);
const EVENT_CHANNEL_CAPACITY: usize = 1024;
const TRADE_EVENT_TYPE: &str = "last_trade_price";

/// A `last_trade_price` event. The wire format carries numbers as strings;
/// they stay strings here and parse at the point of use.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TradeEvent {
    #[serde(default)]
    pub event_type: String,
    #[serde(default)]
    pub asset_id: String,
    #[serde(default)]
    pub price: String,
    #[serde(default)]
    pub size: String,
    #[serde(default)]
    pub side: String,
    #[serde(default)]
    pub fee_rate_bps: String,
    #[serde(default)]
    pub timestamp: String,
}

struct FeedShared {
    ws_url: String,
    reconnect_base_delay: Duration,
    closed: AtomicBool,
    reconnect_requested: AtomicBool,
    asset_ids: RwLock<Vec<String>>,
    restart: Notify,
}

/// Handle to the streaming trade feed.
///
/// `stream` spawns the connection loop and returns the receiving end of the
/// event channel; `update_subscription` and `close` steer the loop from
/// outside.
#[derive(Clone)]
pub struct MarketFeed {
    shared: Arc<FeedShared>,
}

impl MarketFeed {
    pub fn new(reconnect_base_delay: Duration) -> Self {
        Self::with_url(DEFAULT_WS_URL, reconnect_base_delay)
    }

    pub fn with_url(ws_url: impl Into<String>, reconnect_base_delay: Duration) -> Self {
        Self {
            shared: Arc::new(FeedShared {
                ws_url: ws_url.into(),
                reconnect_base_delay,
                closed: AtomicBool::new(false),
                reconnect_requested: AtomicBool::new(false),
                asset_ids: RwLock::new(Vec::new()),
                restart: Notify::new(),
            }),
        }
    }

    /// Start streaming trade events for `asset_ids`.
    ///
    /// The connect loop runs until `close` is called or the receiver is
    /// dropped.
    pub fn stream(&self, asset_ids: Vec<String>) -> mpsc::Receiver<TradeEvent> {
        *self.shared.asset_ids.write() = asset_ids;
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let shared = self.shared.clone();
        tokio::spawn(async move {
            run_feed(shared, tx).await;
        });
        rx
    }

    /// Swap the subscription list and force a reconnect.
    ///
    /// The server silently ignores re-subscribes on an open socket, so the
    /// socket is closed instead; the connect loop picks up the new list on
    /// the immediate (backoff-free) reconnect. Safe to call while
    /// disconnected: the next connect simply uses the updated list.
    pub fn update_subscription(&self, asset_ids: Vec<String>) {
        let count = asset_ids.len();
        *self.shared.asset_ids.write() = asset_ids;
        self.shared.reconnect_requested.store(true, Ordering::SeqCst);
        info!(assets = count, "closing socket for subscription update");
        self.shared.restart.notify_waiters();
    }

    /// Permanent shutdown; the stream ends and later errors are suppressed.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        self.shared.restart.notify_waiters();
        info!("market feed closed");
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }
}

async fn run_feed(shared: Arc<FeedShared>, tx: mpsc::Sender<TradeEvent>) {
    let mut delay = shared.reconnect_base_delay;

    while !shared.closed.load(Ordering::SeqCst) {
        let asset_ids = shared.asset_ids.read().clone();
        match connect_and_listen(&shared, &asset_ids, &tx, &mut delay).await {
            Ok(()) => {}
            Err(e) => {
                if shared.closed.load(Ordering::SeqCst) {
                    break;
                }
                if !shared.reconnect_requested.load(Ordering::SeqCst) {
                    warn!(error = %e, "websocket connection error");
                }
            }
        }

        if shared.closed.load(Ordering::SeqCst) || tx.is_closed() {
            break;
        }

        // An intentional close for a subscription update skips the backoff
        // sleep exactly once.
        if shared.reconnect_requested.swap(false, Ordering::SeqCst) {
            delay = shared.reconnect_base_delay;
            info!("reconnecting immediately for subscription update");
            continue;
        }

        info!(delay_ms = delay.as_millis() as u64, "reconnecting after delay");
        sleep(delay).await;
        delay = (delay * 2).min(RECONNECT_MAX_DELAY);
    }
}

async fn connect_and_listen(
    shared: &FeedShared,
    asset_ids: &[String],
    tx: &mpsc::Sender<TradeEvent>,
    delay: &mut Duration,
) -> anyhow::Result<()> {
    let (ws_stream, _response) = connect_async(shared.ws_url.as_str()).await?;
    let (mut write, mut read) = ws_stream.split();

    let subscribe = build_subscribe_message(asset_ids);
    write.send(Message::Text(subscribe.to_string())).await?;
    info!(assets = asset_ids.len(), "connected and subscribed");

    let mut ping = tokio::time::interval(PING_INTERVAL);
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            message = read.next() => {
                let Some(message) = message else {
                    return Ok(());
                };
                match message? {
                    Message::Text(raw) => {
                        for event in parse_events(&raw) {
                            // Any successful event resets the backoff.
                            *delay = shared.reconnect_base_delay;
                            if tx.send(event).await.is_err() {
                                shared.closed.store(true, Ordering::SeqCst);
                                return Ok(());
                            }
                        }
                    }
                    Message::Close(_) => return Ok(()),
                    _ => {}
                }
            }
            _ = ping.tick() => {
                write.send(Message::Ping(Vec::new())).await?;
            }
            _ = shared.restart.notified() => {
                let _ = write.send(Message::Close(None)).await;
                return Ok(());
            }
        }
    }
}

/// The market-channel subscription message.
pub fn build_subscribe_message(asset_ids: &[String]) -> Value {
    serde_json::json!({
        "type": "market",
        "assets_ids": asset_ids,
    })
}

/// Extract `last_trade_price` events from a raw message.
///
/// Messages arrive as a single object or an array of objects; anything that
/// is not a trade event (book snapshots, price changes, acks) is dropped.
pub fn parse_events(raw: &str) -> Vec<TradeEvent> {
    let value: Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(_) => {
            debug!(preview = %raw.chars().take(100).collect::<String>(), "ignoring unparseable message");
            return Vec::new();
        }
    };

    let items: Vec<Value> = match value {
        Value::Array(items) => items,
        object @ Value::Object(_) => vec![object],
        _ => return Vec::new(),
    };

    items
        .into_iter()
        .filter(|item| {
            item.get("event_type").and_then(Value::as_str) == Some(TRADE_EVENT_TYPE)
        })
        .filter_map(|item| serde_json::from_value::<TradeEvent>(item).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribe_message_shape() {
        let message = build_subscribe_message(&["111".to_string(), "222".to_string()]);
        assert_eq!(message["type"], "market");
        assert_eq!(message["assets_ids"][0], "111");
        assert_eq!(message["assets_ids"][1], "222");
    }

    #[test]
    fn test_parse_single_trade_event() {
        let raw = r#"{"event_type": "last_trade_price", "asset_id": "111", "price": "0.55", "size": "10", "side": "BUY"}"#;
        let events = parse_events(raw);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].asset_id, "111");
        assert_eq!(events[0].price, "0.55");
    }

    #[test]
    fn test_parse_event_array_filters_non_trades() {
        let raw = r#"[
            {"event_type": "book", "asset_id": "111"},
            {"event_type": "last_trade_price", "asset_id": "222", "price": "0.40"},
            {"event_type": "price_change", "asset_id": "333"}
        ]"#;
        let events = parse_events(raw);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].asset_id, "222");
    }

    #[test]
    fn test_non_trade_message_yields_nothing() {
        assert!(parse_events(r#"{"event_type": "book", "asset_id": "111"}"#).is_empty());
        assert!(parse_events("not json").is_empty());
        assert!(parse_events("42").is_empty());
    }

    #[test]
    fn test_update_subscription_while_disconnected() {
        let feed = MarketFeed::new(Duration::from_secs(1));
        feed.update_subscription(vec!["111".to_string(), "222".to_string()]);
        // The next connect reads the updated list.
        assert_eq!(feed.shared.asset_ids.read().len(), 2);
        assert!(feed.shared.reconnect_requested.load(Ordering::SeqCst));
        assert!(!feed.is_closed());
    }

    #[test]
    fn test_close_is_permanent() {
        let feed = MarketFeed::new(Duration::from_secs(1));
        feed.close();
        assert!(feed.is_closed());
    }
}
