//! In-memory caching for upstream lookups and derived indexes.
//!
//! This module provides:
//! - A TTL cache with wildcard invalidation and hit/miss counters
//! - A typed read-through layer over it
//! - The [`CacheValue`] variants every cached shape maps onto
//!
//! The cache is process-local. It is never the system of record: the backing
//! store and the issue tracker are, and every write path invalidates instead
//! of patching cached copies.

mod layer;
mod pattern;
mod traits;
mod ttl;

pub use layer::{CacheLayer, SharedCache};
pub use pattern::glob_match;
pub use traits::{CacheResult, CacheSource, CacheValue, Cacheable};
pub use ttl::{spawn_cleanup, CacheEntry, CacheStats, TtlCache};
