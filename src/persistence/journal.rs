//! Append-only SQLite trade journal.
//!
//! One row per executed order: venue tag, symbol, action and the raw venue
//! payload. Writes never fail the caller.

use crate::exchange::{OrderResult, Venue};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use std::fmt;
use std::path::Path;
use tracing::{debug, info, warn};

/// What an order did for the hedge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalAction {
    Open,
    Compensate,
    MarketExit,
    LimitExit,
    StopLoss,
    ForcedExit,
    Cancel,
}

impl fmt::Display for JournalAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JournalAction::Open => "open",
            JournalAction::Compensate => "compensate",
            JournalAction::MarketExit => "market_exit",
            JournalAction::LimitExit => "limit_exit",
            JournalAction::StopLoss => "stop_loss",
            JournalAction::ForcedExit => "forced_exit",
            JournalAction::Cancel => "cancel",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JournalEntry {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub venue: String,
    pub symbol: String,
    pub action: String,
    pub payload: serde_json::Value,
}

pub struct TradeJournal {
    conn: Mutex<Connection>,
}

impl TradeJournal {
    /// Open (or create) the journal database.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {:?}", parent))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {:?}", path))?;

        let journal = Self {
            conn: Mutex::new(conn),
        };
        journal.init_schema()?;

        info!("Trade journal initialized at {:?}", path);
        Ok(journal)
    }

    /// In-memory journal for tests.
    pub fn in_memory() -> Result<Self> {
        let journal = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        journal.init_schema()?;
        Ok(journal)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.lock().execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS trade_journal (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                venue TEXT NOT NULL,
                symbol TEXT NOT NULL,
                action TEXT NOT NULL,
                payload TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_journal_symbol ON trade_journal(symbol);
            CREATE INDEX IF NOT EXISTS idx_journal_timestamp ON trade_journal(timestamp);
            "#,
        )?;
        debug!("Journal schema initialized");
        Ok(())
    }

    fn insert(
        &self,
        at: DateTime<Utc>,
        venue: Venue,
        symbol: &str,
        action: JournalAction,
        payload: &serde_json::Value,
    ) -> Result<()> {
        self.conn.lock().execute(
            r#"
            INSERT INTO trade_journal (timestamp, venue, symbol, action, payload)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                at.to_rfc3339(),
                venue.short_code(),
                symbol,
                action.to_string(),
                payload.to_string(),
            ],
        )?;
        Ok(())
    }

    /// Append one executed order. Failures are logged and dropped.
    pub fn record(&self, at: DateTime<Utc>, symbol: &str, action: JournalAction, order: &OrderResult) {
        if let Err(e) = self.insert(at, order.venue, symbol, action, &order.raw) {
            warn!(%symbol, %action, venue = %order.venue, "Failed to journal order: {:#}", e);
        }
    }

    /// Entries for one symbol, oldest first.
    pub fn entries(&self, symbol: &str) -> Result<Vec<JournalEntry>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            r#"
            SELECT id, timestamp, venue, symbol, action, payload
            FROM trade_journal WHERE symbol = ?1 ORDER BY id
            "#,
        )?;

        let entries = stmt
            .query_map([symbol], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })?
            .filter_map(|r| r.ok())
            .map(|(id, timestamp, venue, symbol, action, payload)| JournalEntry {
                id,
                timestamp: DateTime::parse_from_rfc3339(&timestamp)
                    .map(|dt| dt.with_timezone(&Utc))
                    .unwrap_or_default(),
                venue,
                symbol,
                action,
                payload: serde_json::from_str(&payload).unwrap_or(serde_json::Value::Null),
            })
            .collect();
        Ok(entries)
    }

    pub fn count(&self) -> Result<usize> {
        let count: i64 =
            self.conn
                .lock()
                .query_row("SELECT COUNT(*) FROM trade_journal", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::OrderId;
    use chrono::TimeZone;
    use rust_decimal::Decimal;

    fn order(venue: Venue, id: &str) -> OrderResult {
        OrderResult {
            venue,
            order_id: OrderId::regular(id),
            filled: true,
            fill_price: None,
            filled_qty: Decimal::ZERO,
            raw: serde_json::json!({"orderId": id, "status": "FILLED"}),
        }
    }

    #[test]
    fn test_record_and_read_back() {
        let journal = TradeJournal::in_memory().unwrap();
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 7, 59, 0).unwrap();

        journal.record(at, "BTCUSDT", JournalAction::Open, &order(Venue::Binance, "1"));
        journal.record(at, "BTCUSDT", JournalAction::Open, &order(Venue::Gate, "2"));
        journal.record(at, "ETHUSDT", JournalAction::MarketExit, &order(Venue::Gate, "3"));

        let entries = journal.entries("BTCUSDT").unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].venue, "BN");
        assert_eq!(entries[1].venue, "GT");
        assert_eq!(entries[0].action, "open");
        assert_eq!(entries[1].payload["orderId"], "2");
        assert_eq!(entries[0].timestamp, at);
        assert_eq!(journal.count().unwrap(), 3);
    }

    #[test]
    fn test_file_journal_creates_parent_dir() {
        let dir = std::env::temp_dir().join(format!("fdh-journal-{}", std::process::id()));
        let path = dir.join("nested").join("journal.db");
        let journal = TradeJournal::new(&path).unwrap();
        assert_eq!(journal.count().unwrap(), 0);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
