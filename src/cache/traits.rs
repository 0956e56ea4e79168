//! Core traits and types for the caching system.

use std::sync::Arc;

use crate::aggregate::TeamIssuesByState;
use crate::linear::types::{Issue, Team, WorkflowState};
use crate::ownership::OwnershipMap;

/// Everything the shared cache can hold.
///
/// One variant per cached shape, so readers get a typed value back instead of
/// re-parsing JSON on every hit.
#[derive(Debug, Clone)]
pub enum CacheValue {
  Teams(Arc<Vec<Team>>),
  States(Arc<Vec<WorkflowState>>),
  Issue(Arc<Issue>),
  Ownership(Arc<OwnershipMap>),
  IssuesByState(Arc<TeamIssuesByState>),
  /// Loosely typed payloads cached by the CRUD layer (`admin:*` keys).
  Json(Arc<serde_json::Value>),
}

/// Trait for values that can be cached.
///
/// Implementors map themselves onto exactly one [`CacheValue`] variant.
pub trait Cacheable: Send + Sync + 'static {
  fn into_value(value: Arc<Self>) -> CacheValue;

  /// Returns `None` when the entry holds a different variant.
  fn from_value(value: &CacheValue) -> Option<Arc<Self>>;

  /// Entity type name used in logs (e.g., "teams", "issue")
  fn entity_type() -> &'static str;
}

impl Cacheable for serde_json::Value {
  fn into_value(value: Arc<Self>) -> CacheValue {
    CacheValue::Json(value)
  }

  fn from_value(value: &CacheValue) -> Option<Arc<Self>> {
    match value {
      CacheValue::Json(v) => Some(Arc::clone(v)),
      _ => None,
    }
  }

  fn entity_type() -> &'static str {
    "json"
  }
}

/// Result from a cache operation, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
}

impl<T> CacheResult<T> {
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
    }
  }

  pub fn from_cache(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Cache,
    }
  }
}

/// Indicates where cached data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fetched from the upstream source on this call
  Network,
  /// Served from a live cache entry
  Cache,
}
