//! Persistent store: positions, daily PnL, and the append-only trade log.
//! `rusqlite` behind an async mutex, WAL journal mode,
//! `INSERT ... ON CONFLICT DO UPDATE SET` upserts, `prepare_cached` for
//! the hot paths.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{NaiveDate, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Mutex;
use tracing::info;

use crate::models::{DailyPnlRow, PositionRow, Side, TradeAction, TradeLogEntry, TradeNote};

#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    pub fn open(database_path: &str) -> Result<Self> {
        let conn = Connection::open(database_path)
            .with_context(|| format!("failed to open database at {}", database_path))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .context("failed to enable WAL mode")?;
        init_schema(&conn)?;
        info!(database_path, "store initialized");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory database")?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub async fn get_position(&self, market_id: &str) -> Result<f64> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached("SELECT position FROM positions WHERE market_id = ?1")?;
        let position = stmt
            .query_row(params![market_id], |row| row.get::<_, f64>(0))
            .optional()?
            .unwrap_or(0.0);
        Ok(position)
    }

    pub async fn upsert_position(&self, market_id: &str, position: f64) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.prepare_cached(
            "INSERT INTO positions (market_id, position, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(market_id) DO UPDATE SET position = excluded.position, updated_at = excluded.updated_at",
        )?
        .execute(params![market_id, position, Utc::now().timestamp()])?;
        Ok(())
    }

    pub async fn list_positions(&self) -> Result<Vec<PositionRow>> {
        let conn = self.conn.lock().await;
        let mut stmt =
            conn.prepare_cached("SELECT market_id, position, updated_at FROM positions ORDER BY market_id")?;
        let rows = stmt
            .query_map([], |row| {
                let ts: i64 = row.get(2)?;
                Ok(PositionRow {
                    market_id: row.get(0)?,
                    position: row.get(1)?,
                    updated_at: Utc.timestamp_opt(ts, 0).single().unwrap_or_else(Utc::now),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Zeroes every stored position. Used by the `reset_positions` control
    /// action and by the risk governor's auto-repair pass.
    pub async fn reset_positions(&self) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute("UPDATE positions SET position = 0.0, updated_at = ?1", params![Utc::now().timestamp()])?;
        Ok(())
    }

    /// Zeroes a single position whose magnitude has drifted past
    /// `1.5 * max_position`.
    pub async fn zero_position(&self, market_id: &str) -> Result<()> {
        self.upsert_position(market_id, 0.0).await
    }

    pub async fn get_daily_pnl(&self, date: NaiveDate) -> Result<Option<DailyPnlRow>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT date, realized_pnl, total_capital, trade_count, circuit_breaker_triggered
             FROM daily_pnl WHERE date = ?1",
        )?;
        let row = stmt
            .query_row(params![date.to_string()], row_to_daily_pnl)
            .optional()?;
        Ok(row)
    }

    /// Creates today's row lazily with `total_capital` if absent, then
    /// returns it.
    pub async fn get_or_create_daily_pnl(&self, date: NaiveDate, total_capital: f64) -> Result<DailyPnlRow> {
        if let Some(row) = self.get_daily_pnl(date).await? {
            return Ok(row);
        }
        let conn = self.conn.lock().await;
        conn.prepare_cached(
            "INSERT INTO daily_pnl (date, realized_pnl, total_capital, trade_count, circuit_breaker_triggered)
             VALUES (?1, 0.0, ?2, 0, 0)
             ON CONFLICT(date) DO NOTHING",
        )?
        .execute(params![date.to_string(), total_capital])?;
        drop(conn);
        Ok(self
            .get_daily_pnl(date)
            .await?
            .expect("row was just inserted"))
    }

    /// Applies a realized-PnL delta and increments the trade count
    /// atomically.
    pub async fn apply_pnl_delta(&self, date: NaiveDate, delta: f64, trade_count_incr: u64) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.prepare_cached(
            "UPDATE daily_pnl SET realized_pnl = realized_pnl + ?2, trade_count = trade_count + ?3
             WHERE date = ?1",
        )?
        .execute(params![date.to_string(), delta, trade_count_incr as i64])?;
        Ok(())
    }

    /// Latches the circuit breaker for the given date. This persists;
    /// `start` only clears the in-process state, never this row.
    pub async fn latch_circuit_breaker(&self, date: NaiveDate) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE daily_pnl SET circuit_breaker_triggered = 1 WHERE date = ?1",
            params![date.to_string()],
        )?;
        Ok(())
    }

    /// Up to 30 most-recent daily rows, newest first, with a running
    /// cumulative-PnL column computed by the `cumulative_pnl` view.
    pub async fn recent_pnl_history(&self, limit: u32) -> Result<Vec<(DailyPnlRow, f64)>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT date, realized_pnl, total_capital, trade_count, circuit_breaker_triggered, cumulative_pnl
             FROM cumulative_pnl ORDER BY date DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit], |row| {
                let pnl_row = row_to_daily_pnl(row)?;
                let cumulative: f64 = row.get(5)?;
                Ok((pnl_row, cumulative))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Up to `limit` most-recent trade-log rows, newest first.
    pub async fn recent_trade_log(&self, limit: u32) -> Result<Vec<TradeLogEntry>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT id, ts, market_id, market_name, action, side, price, size, paper,
                    event_type, order_id, latency_ms, error
             FROM trade_log ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit], row_to_trade_log_entry)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub async fn append_trade_log(&self, entry: &TradeLogEntry) -> Result<i64> {
        let conn = self.conn.lock().await;
        conn.prepare_cached(
            "INSERT INTO trade_log
                (ts, market_id, market_name, action, side, price, size, paper,
                 event_type, order_id, latency_ms, error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        )?
        .execute(params![
            entry.ts.timestamp(),
            entry.market_id,
            entry.market_name,
            entry.action.as_str(),
            entry.side.map(|s| s.as_str()),
            entry.price,
            entry.size,
            entry.paper as i64,
            entry.note.event_type,
            entry.note.order_id,
            entry.note.latency_ms.map(|v| v as i64),
            entry.note.error,
        ])?;
        Ok(conn.last_insert_rowid())
    }

    pub async fn append_trade_logs(&self, entries: &[TradeLogEntry]) -> Result<()> {
        for entry in entries {
            self.append_trade_log(entry).await?;
        }
        Ok(())
    }
}

fn row_to_daily_pnl(row: &rusqlite::Row) -> rusqlite::Result<DailyPnlRow> {
    let date_str: String = row.get(0)?;
    Ok(DailyPnlRow {
        date: date_str.parse().unwrap_or_else(|_| Utc::now().date_naive()),
        realized_pnl: row.get(1)?,
        total_capital: row.get(2)?,
        trade_count: row.get::<_, i64>(3)? as u64,
        circuit_breaker_triggered: row.get::<_, i64>(4)? != 0,
    })
}

fn row_to_trade_log_entry(row: &rusqlite::Row) -> rusqlite::Result<TradeLogEntry> {
    let ts: i64 = row.get(1)?;
    let action_str: String = row.get(4)?;
    let side_str: Option<String> = row.get(5)?;
    Ok(TradeLogEntry {
        id: row.get(0)?,
        ts: Utc.timestamp_opt(ts, 0).single().unwrap_or_else(Utc::now),
        market_id: row.get(2)?,
        market_name: row.get(3)?,
        action: match action_str.as_str() {
            "place" => TradeAction::Place,
            "cancel" => TradeAction::Cancel,
            _ => TradeAction::Error,
        },
        side: side_str.map(|s| if s == "BUY" { Side::Buy } else { Side::Sell }),
        price: row.get(6)?,
        size: row.get(7)?,
        paper: row.get::<_, i64>(8)? != 0,
        note: TradeNote {
            event_type: row.get(9)?,
            order_id: row.get(10)?,
            latency_ms: row.get::<_, Option<i64>>(11)?.map(|v| v as u64),
            error: row.get(12)?,
        },
    })
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS positions (
            market_id TEXT PRIMARY KEY,
            position REAL NOT NULL DEFAULT 0.0,
            updated_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS daily_pnl (
            date TEXT PRIMARY KEY,
            realized_pnl REAL NOT NULL DEFAULT 0.0,
            total_capital REAL NOT NULL DEFAULT 0.0,
            trade_count INTEGER NOT NULL DEFAULT 0,
            circuit_breaker_triggered INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS trade_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            ts INTEGER NOT NULL,
            market_id TEXT NOT NULL,
            market_name TEXT NOT NULL,
            action TEXT NOT NULL,
            side TEXT,
            price REAL,
            size REAL,
            paper INTEGER NOT NULL DEFAULT 0,
            event_type TEXT NOT NULL,
            order_id TEXT,
            latency_ms INTEGER,
            error TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_trade_log_market ON trade_log(market_id);
        CREATE INDEX IF NOT EXISTS idx_trade_log_ts ON trade_log(ts);

        CREATE VIEW IF NOT EXISTS cumulative_pnl AS
        SELECT date, realized_pnl, total_capital, trade_count, circuit_breaker_triggered,
               SUM(realized_pnl) OVER (ORDER BY date) AS cumulative_pnl
        FROM daily_pnl;
        ",
    )?;
    Ok(())
}

/// Helper only used by tests to build a fully-qualified `TradeLogEntry`
/// without repeating every field.
#[cfg(test)]
pub fn test_trade_entry(market_id: &str, action: TradeAction, side: Option<Side>) -> TradeLogEntry {
    TradeLogEntry {
        id: None,
        ts: Utc::now(),
        market_id: market_id.to_string(),
        market_name: market_id.to_string(),
        action,
        side,
        price: Some(0.5),
        size: Some(10.0),
        paper: false,
        note: TradeNote {
            event_type: "test".to_string(),
            order_id: None,
            latency_ms: Some(5),
            error: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn position_upsert_round_trips() {
        let store = Store::open_in_memory().unwrap();
        store.upsert_position("m1", 42.0).await.unwrap();
        assert_eq!(store.get_position("m1").await.unwrap(), 42.0);
        store.upsert_position("m1", -5.0).await.unwrap();
        assert_eq!(store.get_position("m1").await.unwrap(), -5.0);
    }

    #[tokio::test]
    async fn reset_positions_zeroes_everything() {
        let store = Store::open_in_memory().unwrap();
        store.upsert_position("m1", 10.0).await.unwrap();
        store.upsert_position("m2", -20.0).await.unwrap();
        store.reset_positions().await.unwrap();
        assert_eq!(store.get_position("m1").await.unwrap(), 0.0);
        assert_eq!(store.get_position("m2").await.unwrap(), 0.0);
    }

    #[tokio::test]
    async fn daily_pnl_row_created_lazily_and_accumulates() {
        let store = Store::open_in_memory().unwrap();
        let date = Utc::now().date_naive();
        let row = store.get_or_create_daily_pnl(date, 1000.0).await.unwrap();
        assert_eq!(row.realized_pnl, 0.0);
        store.apply_pnl_delta(date, -12.5, 1).await.unwrap();
        let row = store.get_daily_pnl(date).await.unwrap().unwrap();
        assert_eq!(row.realized_pnl, -12.5);
        assert_eq!(row.trade_count, 1);
    }

    #[tokio::test]
    async fn circuit_breaker_latches_and_persists() {
        let store = Store::open_in_memory().unwrap();
        let date = Utc::now().date_naive();
        store.get_or_create_daily_pnl(date, 1000.0).await.unwrap();
        store.latch_circuit_breaker(date).await.unwrap();
        let row = store.get_daily_pnl(date).await.unwrap().unwrap();
        assert!(row.circuit_breaker_triggered);
    }

    #[tokio::test]
    async fn trade_log_is_append_only_and_ordered() {
        let store = Store::open_in_memory().unwrap();
        let entry = test_trade_entry("m1", TradeAction::Place, Some(Side::Buy));
        let id = store.append_trade_log(&entry).await.unwrap();
        assert!(id > 0);
    }

    #[tokio::test]
    async fn recent_trade_log_returns_newest_first() {
        let store = Store::open_in_memory().unwrap();
        store
            .append_trade_log(&test_trade_entry("m1", TradeAction::Place, Some(Side::Buy)))
            .await
            .unwrap();
        store
            .append_trade_log(&test_trade_entry("m2", TradeAction::Cancel, Some(Side::Sell)))
            .await
            .unwrap();
        let rows = store.recent_trade_log(10).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].market_id, "m2");
        assert_eq!(rows[0].action, TradeAction::Cancel);
        assert_eq!(rows[1].market_id, "m1");
    }
}
