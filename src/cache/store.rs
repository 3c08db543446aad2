//! SQLite-backed snapshot store for the read cache.

use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use serde_json::Value;
use std::path::Path;
use std::sync::Mutex;

use super::keys::{record_id, resolve_store, CacheStore};

/// Schema for the read-cache tables. One physical table holds all stores;
/// the `store` column is the partition and `(store, record_id)` is the key.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS read_cache (
    store TEXT NOT NULL,
    record_id TEXT NOT NULL,
    logical_key TEXT NOT NULL,
    data BLOB NOT NULL,
    updated_at INTEGER NOT NULL,
    PRIMARY KEY (store, record_id)
);

CREATE INDEX IF NOT EXISTS idx_read_cache_key
    ON read_cache(store, logical_key);
"#;

/// A cached value and its write timestamp (epoch milliseconds).
#[derive(Debug, Clone, PartialEq)]
pub struct CachedValue {
  pub data: Value,
  pub updated_at: i64,
}

/// Durable keyed snapshot store. Writes are last-write-wins per
/// `(store, record_id)`; reads by logical key return the newest row.
pub struct ReadCacheStore {
  conn: Mutex<Connection>,
}

impl ReadCacheStore {
  /// Open (or create) the cache database at the default location.
  pub fn open_default(data_dir: &Path) -> Result<Self> {
    std::fs::create_dir_all(data_dir)
      .map_err(|e| eyre!("Failed to create data directory: {}", e))?;
    Self::open(&data_dir.join("read_cache.db"))
  }

  pub fn open(path: &Path) -> Result<Self> {
    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;

    Ok(store)
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self.lock_conn()?;
    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;
    Ok(())
  }

  fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  /// Get the cached value for a logical key. Unmapped keys are a miss.
  pub fn get_cached(&self, key: &str) -> Result<Option<CachedValue>> {
    let store = match resolve_store(key) {
      Some(s) => s,
      None => return Ok(None),
    };

    let conn = self.lock_conn()?;
    let mut stmt = conn
      .prepare(
        "SELECT data, updated_at FROM read_cache
         WHERE store = ? AND logical_key = ?
         ORDER BY updated_at DESC LIMIT 1",
      )
      .map_err(|e| eyre!("Failed to prepare cache query: {}", e))?;

    let row: Option<(Vec<u8>, i64)> = stmt
      .query_row(params![store.name(), key], |row| {
        Ok((row.get(0)?, row.get(1)?))
      })
      .ok();

    match row {
      Some((bytes, updated_at)) => {
        let data = serde_json::from_slice(&bytes)
          .map_err(|e| eyre!("Failed to deserialize cached value for {}: {}", key, e))?;
        Ok(Some(CachedValue { data, updated_at }))
      }
      None => Ok(None),
    }
  }

  /// Store a value under a logical key; unmapped keys are a silent no-op.
  pub fn set_cached(&self, key: &str, data: &Value) -> Result<()> {
    let store = match resolve_store(key) {
      Some(s) => s,
      None => return Ok(()),
    };

    let id = record_id(data, key);
    let bytes = serde_json::to_vec(data)
      .map_err(|e| eyre!("Failed to serialize cached value for {}: {}", key, e))?;
    let updated_at = Utc::now().timestamp_millis();

    let conn = self.lock_conn()?;
    conn
      .execute(
        "INSERT OR REPLACE INTO read_cache (store, record_id, logical_key, data, updated_at)
         VALUES (?, ?, ?, ?, ?)",
        params![store.name(), id, key, bytes, updated_at],
      )
      .map_err(|e| eyre!("Failed to store cached value for {}: {}", key, e))?;

    Ok(())
  }

  /// Remove the entry for a logical key, if any.
  pub fn remove_cached(&self, key: &str) -> Result<()> {
    let store = match resolve_store(key) {
      Some(s) => s,
      None => return Ok(()),
    };

    let conn = self.lock_conn()?;
    conn
      .execute(
        "DELETE FROM read_cache WHERE store = ? AND logical_key = ?",
        params![store.name(), key],
      )
      .map_err(|e| eyre!("Failed to remove cached value for {}: {}", key, e))?;

    Ok(())
  }

  /// Clear a physical store wholesale.
  pub fn clear_store(&self, store: CacheStore) -> Result<()> {
    let conn = self.lock_conn()?;
    conn
      .execute("DELETE FROM read_cache WHERE store = ?", params![store.name()])
      .map_err(|e| eyre!("Failed to clear cache store {}: {}", store.name(), e))?;
    Ok(())
  }

  #[cfg(test)]
  pub fn record_id_for(&self, key: &str) -> Result<Option<String>> {
    let store = match resolve_store(key) {
      Some(s) => s,
      None => return Ok(None),
    };
    let conn = self.lock_conn()?;
    let id = conn
      .query_row(
        "SELECT record_id FROM read_cache WHERE store = ? AND logical_key = ?",
        params![store.name(), key],
        |row| row.get(0),
      )
      .ok();
    Ok(id)
  }
}
