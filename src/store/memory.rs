//! In-memory backing store.

use serde_json::Value;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use super::KvStore;
use crate::error::EngineError;

/// Store that keeps everything in a sorted map. Used for tests and for
/// running the CLI without a database file.
#[derive(Default)]
pub struct MemoryStore {
  data: RwLock<BTreeMap<String, Value>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }
}

impl KvStore for MemoryStore {
  async fn get(&self, key: &str) -> Result<Option<Value>, EngineError> {
    Ok(self.data.read().await.get(key).cloned())
  }

  async fn set(&self, key: &str, value: Value) -> Result<(), EngineError> {
    self.data.write().await.insert(key.to_string(), value);
    Ok(())
  }

  async fn delete(&self, key: &str) -> Result<bool, EngineError> {
    Ok(self.data.write().await.remove(key).is_some())
  }

  async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, EngineError> {
    let data = self.data.read().await;
    Ok(
      data
        .range(prefix.to_string()..)
        .take_while(|(key, _)| key.starts_with(prefix))
        .map(|(key, _)| key.clone())
        .collect(),
    )
  }

  async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Value>>, EngineError> {
    let data = self.data.read().await;
    Ok(keys.iter().map(|key| data.get(key).cloned()).collect())
  }

  async fn compare_and_set(
    &self,
    key: &str,
    expected: Option<&Value>,
    value: Value,
  ) -> Result<bool, EngineError> {
    let mut data = self.data.write().await;
    if data.get(key) != expected {
      return Ok(false);
    }
    data.insert(key.to_string(), value);
    Ok(true)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[tokio::test]
  async fn test_prefix_scan_is_bounded() {
    let store = MemoryStore::new();
    for key in ["team:a:customer", "team:b:customer", "teams:all", "tea"] {
      store.set(key, json!(1)).await.unwrap();
    }

    let keys = store.keys_with_prefix("team:").await.unwrap();
    assert_eq!(keys, vec!["team:a:customer", "team:b:customer"]);
  }

  #[tokio::test]
  async fn test_mget_keeps_positions() {
    let store = MemoryStore::new();
    store.set("a", json!("x")).await.unwrap();
    store.set("c", json!("z")).await.unwrap();

    let values = store
      .mget(&["a".to_string(), "b".to_string(), "c".to_string()])
      .await
      .unwrap();
    assert_eq!(values, vec![Some(json!("x")), None, Some(json!("z"))]);
  }

  #[tokio::test]
  async fn test_compare_and_set() {
    let store = MemoryStore::new();

    assert!(store.compare_and_set("k", None, json!("c1")).await.unwrap());
    assert!(!store.compare_and_set("k", None, json!("c2")).await.unwrap());
    assert!(!store
      .compare_and_set("k", Some(&json!("c2")), json!("c3"))
      .await
      .unwrap());
    assert!(store
      .compare_and_set("k", Some(&json!("c1")), json!("c3"))
      .await
      .unwrap());
    assert_eq!(store.get("k").await.unwrap(), Some(json!("c3")));
  }

  #[tokio::test]
  async fn test_delete_reports_existence() {
    let store = MemoryStore::new();
    store.set("k", json!(true)).await.unwrap();
    assert!(store.delete("k").await.unwrap());
    assert!(!store.delete("k").await.unwrap());
  }
}
