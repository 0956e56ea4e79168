//! Cache layer that orchestrates caching logic with upstream fetching.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::traits::{CacheResult, CacheValue, Cacheable};
use super::ttl::TtlCache;
use crate::error::EngineError;

/// The process-wide cache instance, built once at startup and handed to
/// every component that needs it.
pub type SharedCache = Arc<TtlCache<CacheValue>>;

/// Typed read-through access to the shared [`TtlCache`].
#[derive(Clone)]
pub struct CacheLayer {
  cache: SharedCache,
}

impl CacheLayer {
  pub fn new(cache: SharedCache) -> Self {
    Self { cache }
  }

  pub fn cache(&self) -> &SharedCache {
    &self.cache
  }

  /// Read a typed entry. An entry of the wrong shape is dropped and reported
  /// as a miss.
  pub fn get<T: Cacheable>(&self, key: &str) -> Option<Arc<T>> {
    let value = self.cache.get(key)?;
    match T::from_value(&value) {
      Some(typed) => Some(typed),
      None => {
        warn!(key, expected = T::entity_type(), "cache entry has unexpected shape");
        self.cache.delete(key);
        None
      }
    }
  }

  pub fn put<T: Cacheable>(&self, key: &str, value: Arc<T>, ttl: Duration) {
    self.cache.set(key, T::into_value(value), ttl);
  }

  /// Current invalidation generation of the shared cache.
  pub fn generation(&self) -> u64 {
    self.cache.generation()
  }

  /// Store `value` unless an invalidation ran after `seen` was read. A value
  /// built from reads that raced an invalidation is dropped instead.
  pub fn put_if_unchanged<T: Cacheable>(
    &self,
    key: &str,
    value: Arc<T>,
    ttl: Duration,
    seen: u64,
  ) -> bool {
    let stored = self.cache.set_if_unchanged(key, T::into_value(value), ttl, seen);
    if !stored {
      debug!(key, entity = T::entity_type(), "invalidated during fetch, not cached");
    }
    stored
  }

  /// Fetch with cache-first strategy.
  ///
  /// 1. Check cache - if live, return immediately
  /// 2. Otherwise call the fetcher
  /// 3. Store the result only if the fetch succeeded and nothing was
  ///    invalidated while it ran
  pub async fn fetch<T, F, Fut>(
    &self,
    key: &str,
    ttl: Duration,
    fetcher: F,
  ) -> Result<CacheResult<Arc<T>>, EngineError>
  where
    T: Cacheable,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, EngineError>>,
  {
    if let Some(cached) = self.get::<T>(key) {
      return Ok(CacheResult::from_cache(cached));
    }

    debug!(key, entity = T::entity_type(), "cache miss, fetching");
    let seen = self.generation();
    let data = Arc::new(fetcher().await?);
    self.put_if_unchanged(key, Arc::clone(&data), ttl, seen);
    Ok(CacheResult::from_network(data))
  }
}
