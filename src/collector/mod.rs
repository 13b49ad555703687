//! Real-time tick capture: WebSocket ingestion, buffered persistence, and
//! window-aligned market discovery.

pub mod models;
pub mod repository;
pub mod service;
pub mod snapshot_builder;

pub use models::Tick;
pub use repository::TickRepository;
pub use service::TickCollector;
pub use snapshot_builder::{MarketWindow, SnapshotBuilder};
