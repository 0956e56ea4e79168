//! SQLite-backed key-value store.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use super::KvStore;
use crate::error::EngineError;

/// Schema for the key-value table.
const STORE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS kv (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

/// Key-value store persisted in a single SQLite table.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl SqliteStore {
  /// Open or create the store at `path`, or at the default location.
  pub fn open(path: Option<&Path>) -> Result<Self> {
    let path = match path {
      Some(p) => p.to_path_buf(),
      None => Self::default_path()?,
    };

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create store directory: {}", e))?;
    }

    let conn = Connection::open(&path)
      .map_err(|e| eyre!("Failed to open store at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Open a throwaway store that lives only as long as this value.
  pub fn open_in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory store: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(STORE_SCHEMA)
      .map_err(|e| eyre!("Failed to run store migrations: {}", e))?;

    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  /// Get the default database path.
  fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("portal-cache").join("store.db"))
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>, EngineError> {
    self
      .conn
      .lock()
      .map_err(|e| EngineError::Store(format!("Lock poisoned: {}", e)))
  }
}

fn store_err(context: &str) -> impl FnOnce(rusqlite::Error) -> EngineError + '_ {
  move |e| EngineError::Store(format!("{}: {}", context, e))
}

fn parse_value(key: &str, raw: &str) -> Result<Value, EngineError> {
  serde_json::from_str(raw).map_err(|e| EngineError::MalformedData(format!("{}: {}", key, e)))
}

fn read_value(conn: &Connection, key: &str) -> Result<Option<Value>, EngineError> {
  let raw: Option<String> = conn
    .query_row("SELECT value FROM kv WHERE key = ?", params![key], |row| {
      row.get(0)
    })
    .optional()
    .map_err(store_err("Failed to read key"))?;

  raw.map(|raw| parse_value(key, &raw)).transpose()
}

fn write_value(conn: &Connection, key: &str, value: &Value) -> Result<(), EngineError> {
  let raw = serde_json::to_string(value)?;
  conn
    .execute(
      "INSERT OR REPLACE INTO kv (key, value, updated_at) VALUES (?, ?, datetime('now'))",
      params![key, raw],
    )
    .map_err(store_err("Failed to write key"))?;
  Ok(())
}

impl KvStore for SqliteStore {
  async fn get(&self, key: &str) -> Result<Option<Value>, EngineError> {
    let conn = self.lock()?;
    read_value(&conn, key)
  }

  async fn set(&self, key: &str, value: Value) -> Result<(), EngineError> {
    let conn = self.lock()?;
    write_value(&conn, key, &value)
  }

  async fn delete(&self, key: &str) -> Result<bool, EngineError> {
    let conn = self.lock()?;
    let removed = conn
      .execute("DELETE FROM kv WHERE key = ?", params![key])
      .map_err(store_err("Failed to delete key"))?;
    Ok(removed > 0)
  }

  async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, EngineError> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare("SELECT key FROM kv WHERE substr(key, 1, length(?1)) = ?1 ORDER BY key")
      .map_err(store_err("Failed to prepare prefix scan"))?;

    let keys = stmt
      .query_map(params![prefix], |row| row.get::<_, String>(0))
      .map_err(store_err("Failed to scan keys"))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(store_err("Failed to read scanned key"))?;

    Ok(keys)
  }

  async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Value>>, EngineError> {
    let conn = self.lock()?;
    keys.iter().map(|key| read_value(&conn, key)).collect()
  }

  async fn compare_and_set(
    &self,
    key: &str,
    expected: Option<&Value>,
    value: Value,
  ) -> Result<bool, EngineError> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction_with_behavior(TransactionBehavior::Immediate)
      .map_err(store_err("Failed to begin transaction"))?;

    let current = read_value(&tx, key)?;
    if current.as_ref() != expected {
      return Ok(false);
    }

    write_value(&tx, key, &value)?;
    tx.commit().map_err(store_err("Failed to commit transaction"))?;
    Ok(true)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[tokio::test]
  async fn test_round_trip_and_prefix_scan() {
    let store = SqliteStore::open_in_memory().unwrap();
    store.set("team:a:customer", json!("c1")).await.unwrap();
    store.set("team:b:customer", json!("c2")).await.unwrap();
    store.set("customer:c1:teams", json!(["a"])).await.unwrap();

    assert_eq!(
      store.get("team:a:customer").await.unwrap(),
      Some(json!("c1"))
    );
    assert_eq!(
      store.keys_with_prefix("team:").await.unwrap(),
      vec!["team:a:customer", "team:b:customer"]
    );
    // `_` and `%` are literal in a prefix
    assert!(store.keys_with_prefix("team_").await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_compare_and_set() {
    let store = SqliteStore::open_in_memory().unwrap();

    assert!(store.compare_and_set("k", None, json!("c1")).await.unwrap());
    assert!(!store.compare_and_set("k", None, json!("c2")).await.unwrap());
    assert!(store
      .compare_and_set("k", Some(&json!("c1")), json!("c2"))
      .await
      .unwrap());
    assert_eq!(store.get("k").await.unwrap(), Some(json!("c2")));
  }

  #[tokio::test]
  async fn test_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("store.db");

    {
      let store = SqliteStore::open(Some(path.as_path())).unwrap();
      store.set("customer:c1:teams", json!(["t1"])).await.unwrap();
    }

    let store = SqliteStore::open(Some(path.as_path())).unwrap();
    let values = store
      .mget(&["customer:c1:teams".to_string(), "missing".to_string()])
      .await
      .unwrap();
    assert_eq!(values, vec![Some(json!(["t1"])), None]);
    assert!(store.delete("customer:c1:teams").await.unwrap());
  }
}
