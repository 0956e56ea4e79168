//! Backing key-value store: the system of record for ownership data.
//!
//! Values cross this boundary as `serde_json::Value` and are decoded into
//! typed records exactly once, in [`decode`].

pub mod keys;
mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;

use crate::error::EngineError;

/// Trait for backing store implementations.
///
/// The store has no notion of expiry; the engine keeps its own TTLs.
pub trait KvStore: Send + Sync {
  fn get(&self, key: &str) -> impl Future<Output = Result<Option<Value>, EngineError>> + Send;

  fn set(&self, key: &str, value: Value) -> impl Future<Output = Result<(), EngineError>> + Send;

  /// Remove a key. Returns whether it existed.
  fn delete(&self, key: &str) -> impl Future<Output = Result<bool, EngineError>> + Send;

  /// All keys starting with `prefix`, in lexical order.
  fn keys_with_prefix(
    &self,
    prefix: &str,
  ) -> impl Future<Output = Result<Vec<String>, EngineError>> + Send;

  /// Values for `keys`, position for position.
  fn mget(
    &self,
    keys: &[String],
  ) -> impl Future<Output = Result<Vec<Option<Value>>, EngineError>> + Send;

  /// Atomically write `value` only if the current value equals `expected`
  /// (`None` meaning absent). Returns whether the write happened.
  fn compare_and_set(
    &self,
    key: &str,
    expected: Option<&Value>,
    value: Value,
  ) -> impl Future<Output = Result<bool, EngineError>> + Send;
}

/// Decode a stored value into `T`.
///
/// Older writers stored some records as JSON-encoded strings. Those are
/// unwrapped here so nothing past the store boundary ever sees them.
pub fn decode<T: DeserializeOwned>(key: &str, value: Value) -> Result<T, EngineError> {
  match serde_json::from_value::<T>(value.clone()) {
    Ok(decoded) => Ok(decoded),
    Err(err) => match value {
      Value::String(raw) => serde_json::from_str(&raw)
        .map_err(|e| EngineError::MalformedData(format!("{}: {}", key, e))),
      _ => Err(EngineError::MalformedData(format!("{}: {}", key, err))),
    },
  }
}

pub async fn get_typed<K, T>(store: &K, key: &str) -> Result<Option<T>, EngineError>
where
  K: KvStore + ?Sized,
  T: DeserializeOwned,
{
  match store.get(key).await? {
    Some(value) => decode(key, value).map(Some),
    None => Ok(None),
  }
}

pub async fn set_typed<K, T>(store: &K, key: &str, value: &T) -> Result<(), EngineError>
where
  K: KvStore + ?Sized,
  T: Serialize + ?Sized,
{
  let value = serde_json::to_value(value)?;
  store.set(key, value).await
}
