// SQLite store for raw Etherscan responses, historical prices and monitor state
// Read-through for fetches; SQLite file locking serializes concurrent runs

use anyhow::{anyhow, Result};
use chrono::{NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::{
    path::Path,
    sync::{Mutex, MutexGuard},
    time::Duration,
};

const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub raw_responses: u64,
    pub prices: u64,
}

pub struct CacheStore {
    conn: Mutex<Connection>,
}

impl CacheStore {
    /// Create or open the cache database
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        if let Some(parent) = db_path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.busy_timeout(BUSY_TIMEOUT)?;

        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let store = Self { conn: Mutex::new(conn) };
        store.create_schema()?;
        Ok(store)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| anyhow!("cache connection lock poisoned"))
    }

    fn create_schema(&self) -> Result<()> {
        self.lock()?.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS raw_responses (
                key TEXT PRIMARY KEY,
                body TEXT NOT NULL,
                fetched_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS price_cache (
                symbol TEXT NOT NULL,
                date TEXT NOT NULL,
                price REAL NOT NULL,
                PRIMARY KEY (symbol, date)
            );

            CREATE TABLE IF NOT EXISTS monitor_state (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            ",
        )?;
        Ok(())
    }

    /// Cached body for `key`, ignoring entries fetched more than `max_age` ago
    pub fn get_raw(&self, key: &str, max_age: Duration) -> Result<Option<String>> {
        let max_age = i64::try_from(max_age.as_secs()).unwrap_or(i64::MAX);
        let cutoff = Utc::now().timestamp().saturating_sub(max_age);

        let body = self
            .lock()?
            .query_row(
                "SELECT body FROM raw_responses WHERE key = ?1 AND fetched_at >= ?2",
                params![key, cutoff],
                |row| row.get(0),
            )
            .optional()?;
        Ok(body)
    }

    pub fn put_raw(&self, key: &str, body: &str) -> Result<()> {
        self.put_raw_at(key, body, Utc::now().timestamp())
    }

    pub fn put_raw_at(&self, key: &str, body: &str, fetched_at: i64) -> Result<()> {
        self.lock()?.execute(
            "INSERT OR REPLACE INTO raw_responses (key, body, fetched_at) VALUES (?1, ?2, ?3)",
            params![key, body, fetched_at],
        )?;
        Ok(())
    }

    pub fn get_price(&self, symbol: &str, date: NaiveDate) -> Result<Option<f64>> {
        let price = self
            .lock()?
            .query_row(
                "SELECT price FROM price_cache WHERE symbol = ?1 AND date = ?2",
                params![symbol, date.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(price)
    }

    pub fn put_price(&self, symbol: &str, date: NaiveDate, price: f64) -> Result<()> {
        self.lock()?.execute(
            "INSERT OR REPLACE INTO price_cache (symbol, date, price) VALUES (?1, ?2, ?3)",
            params![symbol, date.to_string(), price],
        )?;
        Ok(())
    }

    pub fn get_state(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .lock()?
            .query_row("SELECT value FROM monitor_state WHERE key = ?1", params![key], |row| row.get(0))
            .optional()?;
        Ok(value)
    }

    pub fn put_state(&self, key: &str, value: &str) -> Result<()> {
        self.lock()?.execute(
            "INSERT OR REPLACE INTO monitor_state (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn stats(&self) -> Result<CacheStats> {
        let conn = self.lock()?;
        let raw_responses: i64 = conn.query_row("SELECT COUNT(*) FROM raw_responses", [], |row| row.get(0))?;
        let prices: i64 = conn.query_row("SELECT COUNT(*) FROM price_cache", [], |row| row.get(0))?;

        Ok(CacheStats { raw_responses: raw_responses as u64, prices: prices as u64 })
    }
}
