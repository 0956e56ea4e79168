//! Process-local key/value cache with per-entry expiry.
//!
//! Entries live in a single mutex-guarded map. Nothing here is shared across
//! processes: two portal instances each hold their own copy and only learn
//! about each other's writes when their entries expire.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tracing::{debug, warn};

use super::pattern::glob_match;

/// A stored value together with its lifetime.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
  pub value: V,
  pub created_at: Instant,
  pub expires_at: Instant,
}

impl<V> CacheEntry<V> {
  fn is_live(&self, now: Instant) -> bool {
    now < self.expires_at
  }
}

/// Snapshot of cache counters for the stats endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
  pub hits: u64,
  pub misses: u64,
  pub hit_ratio: f64,
  pub entries: usize,
  pub max_entries: usize,
}

/// In-memory TTL cache.
///
/// `set` never evicts live entries. When the map is full it sweeps expired
/// entries first and then inserts regardless, so TTLs are what bound growth.
pub struct TtlCache<V> {
  entries: Mutex<HashMap<String, CacheEntry<V>>>,
  max_entries: usize,
  default_ttl: Duration,
  hits: AtomicU64,
  misses: AtomicU64,
  /// Bumped by every pattern delete and clear, while the map is locked.
  generation: AtomicU64,
}

impl<V: Clone> TtlCache<V> {
  pub fn new(max_entries: usize, default_ttl: Duration) -> Self {
    Self {
      entries: Mutex::new(HashMap::new()),
      max_entries,
      default_ttl,
      hits: AtomicU64::new(0),
      misses: AtomicU64::new(0),
      generation: AtomicU64::new(0),
    }
  }

  pub fn default_ttl(&self) -> Duration {
    self.default_ttl
  }

  fn lock(&self) -> MutexGuard<'_, HashMap<String, CacheEntry<V>>> {
    // No operation leaves the map half-written
    self.entries.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Store `value` under `key`, replacing any previous entry.
  pub fn set(&self, key: impl Into<String>, value: V, ttl: Duration) {
    let mut entries = self.lock();
    self.insert(&mut entries, key.into(), value, ttl);
  }

  /// Store `value` only if no pattern delete or clear ran since
  /// [`generation`](Self::generation) returned `seen`. Returns whether it
  /// was stored.
  pub fn set_if_unchanged(&self, key: impl Into<String>, value: V, ttl: Duration, seen: u64) -> bool {
    let mut entries = self.lock();
    if self.generation.load(Ordering::Acquire) != seen {
      return false;
    }
    self.insert(&mut entries, key.into(), value, ttl);
    true
  }

  /// Invalidation counter. Read it before fetching a value that is going to
  /// be stored with [`set_if_unchanged`](Self::set_if_unchanged).
  pub fn generation(&self) -> u64 {
    self.generation.load(Ordering::Acquire)
  }

  fn insert(&self, entries: &mut HashMap<String, CacheEntry<V>>, key: String, value: V, ttl: Duration) {
    let now = Instant::now();

    if entries.len() >= self.max_entries && !entries.contains_key(&key) {
      let before = entries.len();
      entries.retain(|_, entry| entry.is_live(now));
      let removed = before - entries.len();
      if entries.len() >= self.max_entries {
        warn!(
          entries = entries.len(),
          max_entries = self.max_entries,
          "cache full of live entries, growing past capacity"
        );
      } else {
        debug!(removed, "swept expired entries to make room");
      }
    }

    entries.insert(
      key,
      CacheEntry {
        value,
        created_at: now,
        expires_at: now + ttl,
      },
    );
  }

  /// Store `value` with the cache-wide default TTL.
  pub fn set_default(&self, key: impl Into<String>, value: V) {
    self.set(key, value, self.default_ttl);
  }

  /// Look up a live entry. Expired entries are dropped and count as misses.
  pub fn get(&self, key: &str) -> Option<V> {
    let now = Instant::now();
    let mut entries = self.lock();

    match entries.get(key) {
      Some(entry) if entry.is_live(now) => {
        self.hits.fetch_add(1, Ordering::Relaxed);
        Some(entry.value.clone())
      }
      Some(_) => {
        entries.remove(key);
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
      }
      None => {
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
      }
    }
  }

  /// Time left before `key` expires, without touching the hit counters.
  pub fn remaining_ttl(&self, key: &str) -> Option<Duration> {
    let now = Instant::now();
    self
      .lock()
      .get(key)
      .filter(|entry| entry.is_live(now))
      .map(|entry| entry.expires_at - now)
  }

  /// Remove one entry. Returns whether it existed.
  pub fn delete(&self, key: &str) -> bool {
    self.lock().remove(key).is_some()
  }

  /// Remove every key matching a `*` wildcard pattern.
  pub fn delete_pattern(&self, pattern: &str) -> usize {
    let mut entries = self.lock();
    self.generation.fetch_add(1, Ordering::AcqRel);
    let before = entries.len();
    entries.retain(|key, _| !glob_match(pattern, key));
    before - entries.len()
  }

  /// Remove every expired entry.
  pub fn cleanup(&self) -> usize {
    let now = Instant::now();
    let mut entries = self.lock();
    let before = entries.len();
    entries.retain(|_, entry| entry.is_live(now));
    before - entries.len()
  }

  pub fn clear(&self) {
    let mut entries = self.lock();
    self.generation.fetch_add(1, Ordering::AcqRel);
    entries.clear();
  }

  /// Number of stored entries, including expired ones not yet swept.
  pub fn len(&self) -> usize {
    self.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn reset_stats(&self) {
    self.hits.store(0, Ordering::Relaxed);
    self.misses.store(0, Ordering::Relaxed);
  }

  pub fn stats(&self) -> CacheStats {
    let hits = self.hits.load(Ordering::Relaxed);
    let misses = self.misses.load(Ordering::Relaxed);
    let total = hits + misses;

    CacheStats {
      hits,
      misses,
      hit_ratio: if total > 0 {
        hits as f64 / total as f64
      } else {
        0.0
      },
      entries: self.len(),
      max_entries: self.max_entries,
    }
  }
}

/// Run [`TtlCache::cleanup`] every `every` until the returned task is aborted.
pub fn spawn_cleanup<V>(cache: Arc<TtlCache<V>>, every: Duration) -> JoinHandle<()>
where
  V: Clone + Send + 'static,
{
  tokio::spawn(async move {
    let mut interval = tokio::time::interval(every);
    interval.tick().await;
    loop {
      interval.tick().await;
      let removed = cache.cleanup();
      if removed > 0 {
        debug!(removed, "periodic cache sweep");
      }
    }
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  fn cache() -> TtlCache<String> {
    TtlCache::new(100, Duration::from_secs(60))
  }

  #[test]
  fn test_set_twice_keeps_latest() {
    let cache = cache();
    cache.set("k", "first".to_string(), Duration::from_secs(10));
    cache.set("k", "second".to_string(), Duration::from_secs(10));

    assert_eq!(cache.len(), 1);
    assert_eq!(cache.get("k"), Some("second".to_string()));
  }

  #[tokio::test(start_paused = true)]
  async fn test_expiry_boundary() {
    let cache = cache();
    cache.set("k", "v".to_string(), Duration::from_secs(5));

    tokio::time::advance(Duration::from_millis(4_999)).await;
    assert_eq!(cache.get("k"), Some("v".to_string()));

    tokio::time::advance(Duration::from_millis(1)).await;
    assert_eq!(cache.get("k"), None);
    // The stale entry is dropped on read.
    assert_eq!(cache.len(), 0);
  }

  #[tokio::test(start_paused = true)]
  async fn test_remaining_ttl() {
    let cache = cache();
    cache.set("k", "v".to_string(), Duration::from_secs(10));
    tokio::time::advance(Duration::from_secs(4)).await;

    assert_eq!(cache.remaining_ttl("k"), Some(Duration::from_secs(6)));
    assert_eq!(cache.remaining_ttl("missing"), None);
    assert_eq!(cache.stats().hits + cache.stats().misses, 0);
  }

  #[test]
  fn test_delete_is_silent_when_absent() {
    let cache = cache();
    assert!(!cache.delete("nothing"));
    cache.set_default("k", "v".to_string());
    assert!(cache.delete("k"));
    assert_eq!(cache.get("k"), None);
  }

  #[test]
  fn test_delete_pattern_only_touches_matches() {
    let cache = cache();
    for key in [
      "admin:users",
      "admin:users:42",
      "admin:customers",
      "team:t1:issues_by_state",
      "team:t2:issues_by_state",
      "team:t1:states",
    ] {
      cache.set_default(key, key.to_string());
    }

    assert_eq!(cache.delete_pattern("admin:users*"), 2);
    assert_eq!(cache.delete_pattern("team:*:issues_by_state"), 2);

    assert_eq!(cache.get("admin:customers"), Some("admin:customers".to_string()));
    assert_eq!(cache.get("team:t1:states"), Some("team:t1:states".to_string()));
    assert_eq!(cache.get("admin:users"), None);
    assert_eq!(cache.get("team:t2:issues_by_state"), None);
  }

  #[tokio::test(start_paused = true)]
  async fn test_cleanup_removes_only_expired() {
    let cache = cache();
    cache.set("short", "a".to_string(), Duration::from_secs(1));
    cache.set("long", "b".to_string(), Duration::from_secs(100));

    tokio::time::advance(Duration::from_secs(2)).await;

    assert_eq!(cache.cleanup(), 1);
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.get("long"), Some("b".to_string()));
  }

  #[tokio::test(start_paused = true)]
  async fn test_full_cache_sweeps_expired_before_insert() {
    let cache: TtlCache<u32> = TtlCache::new(2, Duration::from_secs(60));
    cache.set("a", 1, Duration::from_secs(1));
    cache.set("b", 2, Duration::from_secs(100));

    tokio::time::advance(Duration::from_secs(2)).await;
    cache.set("c", 3, Duration::from_secs(100));

    assert_eq!(cache.len(), 2);
    assert_eq!(cache.get("b"), Some(2));
    assert_eq!(cache.get("c"), Some(3));
  }

  #[test]
  fn test_full_cache_never_evicts_live_entries() {
    let cache: TtlCache<u32> = TtlCache::new(2, Duration::from_secs(60));
    cache.set_default("a", 1);
    cache.set_default("b", 2);
    cache.set_default("c", 3);

    assert_eq!(cache.len(), 3);
    assert_eq!(cache.get("a"), Some(1));
  }

  #[test]
  fn test_hit_ratio() {
    let cache = cache();
    cache.set_default("k", "v".to_string());
    cache.get("k");
    cache.get("k");
    cache.get("k");
    cache.get("missing");

    let stats = cache.stats();
    assert_eq!(stats.hits, 3);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hit_ratio, 0.75);
    assert_eq!(stats.entries, 1);
    assert_eq!(stats.max_entries, 100);

    cache.reset_stats();
    assert_eq!(cache.stats().hit_ratio, 0.0);
  }

  #[test]
  fn test_set_if_unchanged_skips_after_invalidation() {
    let cache = cache();
    let seen = cache.generation();
    assert!(cache.set_if_unchanged("a", "1".to_string(), Duration::from_secs(10), seen));

    let seen = cache.generation();
    cache.delete_pattern("nothing:*");
    assert!(!cache.set_if_unchanged("b", "2".to_string(), Duration::from_secs(10), seen));
    assert_eq!(cache.get("b"), None);

    let seen = cache.generation();
    cache.delete("a");
    assert!(cache.set_if_unchanged("b", "2".to_string(), Duration::from_secs(10), seen));
  }

  #[test]
  fn test_concurrent_access_from_many_threads() {
    const THREADS: usize = 8;
    const KEYS: usize = 200;
    let cache: TtlCache<usize> = TtlCache::new(10_000, Duration::from_secs(600));

    std::thread::scope(|scope| {
      for t in 0..THREADS {
        let cache = &cache;
        scope.spawn(move || {
          for k in 0..KEYS {
            cache.set(format!("t{}:{}", t, k), k, Duration::from_secs(600));
            assert_eq!(cache.get(&format!("t{}:{}", t, k)), Some(k));
            assert_eq!(cache.get(&format!("absent:{}:{}", t, k)), None);
          }
          if t % 2 == 0 {
            assert_eq!(cache.delete_pattern(&format!("t{}:*", t)), KEYS);
          }
        });
      }
    });

    let stats = cache.stats();
    assert_eq!(stats.entries, THREADS / 2 * KEYS);
    assert_eq!(stats.hits, (THREADS * KEYS) as u64);
    assert_eq!(stats.misses, (THREADS * KEYS) as u64);
    assert_eq!(cache.generation(), (THREADS / 2) as u64);
  }

  #[tokio::test(start_paused = true)]
  async fn test_periodic_cleanup_task() {
    let cache = Arc::new(cache());
    cache.set("k", "v".to_string(), Duration::from_secs(1));

    let handle = spawn_cleanup(Arc::clone(&cache), Duration::from_secs(5));
    tokio::time::sleep(Duration::from_secs(6)).await;

    assert_eq!(cache.len(), 0);
    handle.abort();
  }
}
