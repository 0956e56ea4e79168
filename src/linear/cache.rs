//! Caching implementations for issue tracker types.

use std::sync::Arc;

use crate::cache::{CacheValue, Cacheable};

use super::types::{Issue, Team, WorkflowState};

impl Cacheable for Vec<Team> {
  fn into_value(value: Arc<Self>) -> CacheValue {
    CacheValue::Teams(value)
  }

  fn from_value(value: &CacheValue) -> Option<Arc<Self>> {
    match value {
      CacheValue::Teams(teams) => Some(Arc::clone(teams)),
      _ => None,
    }
  }

  fn entity_type() -> &'static str {
    "teams"
  }
}

impl Cacheable for Vec<WorkflowState> {
  fn into_value(value: Arc<Self>) -> CacheValue {
    CacheValue::States(value)
  }

  fn from_value(value: &CacheValue) -> Option<Arc<Self>> {
    match value {
      CacheValue::States(states) => Some(Arc::clone(states)),
      _ => None,
    }
  }

  fn entity_type() -> &'static str {
    "workflow_states"
  }
}

impl Cacheable for Issue {
  fn into_value(value: Arc<Self>) -> CacheValue {
    CacheValue::Issue(value)
  }

  fn from_value(value: &CacheValue) -> Option<Arc<Self>> {
    match value {
      CacheValue::Issue(issue) => Some(Arc::clone(issue)),
      _ => None,
    }
  }

  fn entity_type() -> &'static str {
    "issue"
  }
}
