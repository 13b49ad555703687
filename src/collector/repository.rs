//! SQLite persistence for tick records.
//!
//! Single-connection store behind a mutex, WAL journaling, batch inserts
//! inside one transaction. Prices round-trip as decimal strings so nothing
//! is lost to binary floats.

use crate::collector::models::Tick;
use anyhow::{Context, Result};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags};
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};

const SCHEMA: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA temp_store = MEMORY;

CREATE TABLE IF NOT EXISTS ticks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    asset_id TEXT NOT NULL,
    condition_id TEXT NOT NULL,
    price TEXT NOT NULL,
    size TEXT NOT NULL,
    side TEXT NOT NULL,
    fee_rate_bps INTEGER NOT NULL,
    timestamp_ms INTEGER NOT NULL,
    received_at_ms INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_ticks_asset_time
    ON ticks(asset_id, timestamp_ms);

CREATE INDEX IF NOT EXISTS idx_ticks_condition_time
    ON ticks(condition_id, timestamp_ms);
"#;

/// Cheaply cloneable handle to the tick store.
#[derive(Clone)]
pub struct TickRepository {
    conn: Arc<Mutex<Connection>>,
}

impl TickRepository {
    /// Open or create the database. Schema creation is idempotent, safe on
    /// every startup.
    pub fn open(db_path: &str) -> Result<Self> {
        let path = Path::new(db_path);
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(db_path, flags)
            .with_context(|| format!("opening tick database {db_path}"))?;
        conn.execute_batch(SCHEMA).context("tick schema")?;
        info!(path = %db_path, "tick database opened");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory store for tests.
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Insert a batch inside a single transaction. Returns rows written.
    pub fn save_ticks(&self, ticks: &[Tick]) -> Result<usize> {
        if ticks.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut statement = tx.prepare_cached(
                r#"
                INSERT INTO ticks (
                    asset_id, condition_id, price, size, side,
                    fee_rate_bps, timestamp_ms, received_at_ms
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
            )?;
            for tick in ticks {
                statement.execute(params![
                    tick.asset_id,
                    tick.condition_id,
                    tick.price.to_string(),
                    tick.size.to_string(),
                    tick.side,
                    tick.fee_rate_bps,
                    tick.timestamp,
                    tick.received_at,
                ])?;
            }
        }
        tx.commit()?;
        debug!(count = ticks.len(), "saved ticks");
        Ok(ticks.len())
    }

    /// Ticks for one asset within `[start_ms, end_ms]`, oldest first.
    pub fn get_ticks(&self, asset_id: &str, start_ms: i64, end_ms: i64) -> Result<Vec<Tick>> {
        let conn = self.conn.lock();
        let mut statement = conn.prepare_cached(
            r#"
            SELECT asset_id, condition_id, price, size, side,
                   fee_rate_bps, timestamp_ms, received_at_ms
            FROM ticks
            WHERE asset_id = ?1 AND timestamp_ms >= ?2 AND timestamp_ms <= ?3
            ORDER BY timestamp_ms
            "#,
        )?;
        let rows = statement.query_map(params![asset_id, start_ms, end_ms], row_to_tick)?;
        collect_ticks(rows)
    }

    /// Ticks for one market within `[start_ms, end_ms]`, oldest first.
    pub fn get_ticks_by_condition(
        &self,
        condition_id: &str,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<Tick>> {
        let conn = self.conn.lock();
        let mut statement = conn.prepare_cached(
            r#"
            SELECT asset_id, condition_id, price, size, side,
                   fee_rate_bps, timestamp_ms, received_at_ms
            FROM ticks
            WHERE condition_id = ?1 AND timestamp_ms >= ?2 AND timestamp_ms <= ?3
            ORDER BY timestamp_ms
            "#,
        )?;
        let rows = statement.query_map(params![condition_id, start_ms, end_ms], row_to_tick)?;
        collect_ticks(rows)
    }

    /// Distinct condition IDs seen within `[start_ms, end_ms]`, sorted.
    pub fn get_distinct_condition_ids(&self, start_ms: i64, end_ms: i64) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut statement = conn.prepare_cached(
            r#"
            SELECT DISTINCT condition_id FROM ticks
            WHERE timestamp_ms >= ?1 AND timestamp_ms <= ?2
            ORDER BY condition_id
            "#,
        )?;
        let rows = statement.query_map(params![start_ms, end_ms], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Total stored tick count.
    pub fn get_tick_count(&self) -> Result<i64> {
        let conn = self.conn.lock();
        let count =
            conn.query_row("SELECT COUNT(*) FROM ticks", [], |row| row.get::<_, i64>(0))?;
        Ok(count)
    }
}

fn row_to_tick(row: &rusqlite::Row<'_>) -> rusqlite::Result<Tick> {
    let price: String = row.get(2)?;
    let size: String = row.get(3)?;
    Ok(Tick {
        asset_id: row.get(0)?,
        condition_id: row.get(1)?,
        price: Decimal::from_str(&price).unwrap_or(Decimal::ZERO),
        size: Decimal::from_str(&size).unwrap_or(Decimal::ZERO),
        side: row.get(4)?,
        fee_rate_bps: row.get(5)?,
        timestamp: row.get(6)?,
        received_at: row.get(7)?,
    })
}

fn collect_ticks(
    rows: impl Iterator<Item = rusqlite::Result<Tick>>,
) -> Result<Vec<Tick>> {
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}
