//! Cache invalidation keyed by what changed.
//!
//! Write paths report a [`CacheEvent`] and this module decides which cache
//! keys go. No other code deletes cache entries by pattern.

use tracing::debug;

use crate::cache::SharedCache;
use crate::store::keys;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
  /// An ownership record was created, moved or removed.
  TeamOwnershipChanged {
    team_id: String,
    customer_id: String,
  },
  /// An issue changed state or got a comment.
  /// `team_id` is `None` when the caller does not know the issue's team.
  IssueMutated {
    issue_id: String,
    team_id: Option<String>,
  },
  /// Issues of a team changed in a way not tied to one issue.
  TeamIssuesChanged { team_id: String },
  /// Teams were added, renamed or had their workflow edited.
  TeamCatalogChanged,
  CustomerChanged { customer_id: String },
  UserChanged,
}

impl CacheEvent {
  /// Cache key patterns invalidated by this event.
  pub fn patterns(&self) -> Vec<String> {
    match self {
      Self::TeamOwnershipChanged { customer_id, .. } => vec![
        keys::OWNERSHIP_MAP.to_string(),
        format!("customer:{}:*", customer_id),
        // Availability of the team changed for every customer
        "customer:*:available_teams".to_string(),
        "admin:teams*".to_string(),
      ],
      Self::IssueMutated { issue_id, team_id } => vec![
        keys::issue_detail(issue_id),
        match team_id {
          Some(team_id) => format!("team:{}:issues*", team_id),
          None => "team:*:issues*".to_string(),
        },
      ],
      Self::TeamIssuesChanged { team_id } => vec![format!("team:{}:issues*", team_id)],
      Self::TeamCatalogChanged => vec![keys::TEAMS_ALL.to_string(), "team:*:states".to_string()],
      Self::CustomerChanged { customer_id } => vec![
        format!("customer:{}:*", customer_id),
        "admin:customers*".to_string(),
      ],
      Self::UserChanged => vec!["admin:users*".to_string()],
    }
  }
}

/// Applies [`CacheEvent`]s to the shared cache.
#[derive(Clone)]
pub struct Invalidator {
  cache: SharedCache,
}

impl Invalidator {
  pub fn new(cache: SharedCache) -> Self {
    Self { cache }
  }

  /// Drop every entry the event touches. Returns how many were removed.
  pub fn emit(&self, event: &CacheEvent) -> usize {
    let removed = event
      .patterns()
      .iter()
      .map(|pattern| self.cache.delete_pattern(pattern))
      .sum();
    debug!(?event, removed, "cache invalidated");
    removed
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheValue, TtlCache};
  use serde_json::json;
  use std::sync::Arc;
  use std::time::Duration;

  fn seeded() -> (SharedCache, Invalidator) {
    let cache: SharedCache = Arc::new(TtlCache::new(100, Duration::from_secs(60)));
    for key in [
      "team_ownership_map:all",
      "teams:all",
      "team:t1:states",
      "team:t1:issues_by_state",
      "team:t2:issues_by_state",
      "issue:i1",
      "issue:i2",
      "customer:c1:available_teams",
      "customer:c2:available_teams",
      "admin:teams",
      "admin:users:page:1",
      "admin:customers",
    ] {
      cache.set_default(key, CacheValue::Json(Arc::new(json!(key))));
    }
    let invalidator = Invalidator::new(Arc::clone(&cache));
    (cache, invalidator)
  }

  fn live(cache: &SharedCache, key: &str) -> bool {
    cache.remaining_ttl(key).is_some()
  }

  #[test]
  fn test_ownership_change() {
    let (cache, invalidator) = seeded();
    let removed = invalidator.emit(&CacheEvent::TeamOwnershipChanged {
      team_id: "t1".to_string(),
      customer_id: "c1".to_string(),
    });

    assert_eq!(removed, 4);
    assert!(!live(&cache, "team_ownership_map:all"));
    assert!(!live(&cache, "customer:c1:available_teams"));
    assert!(!live(&cache, "customer:c2:available_teams"));
    assert!(!live(&cache, "admin:teams"));
    assert!(live(&cache, "admin:customers"));
    assert!(live(&cache, "team:t1:issues_by_state"));
  }

  #[test]
  fn test_issue_mutation_with_team() {
    let (cache, invalidator) = seeded();
    invalidator.emit(&CacheEvent::IssueMutated {
      issue_id: "i1".to_string(),
      team_id: Some("t1".to_string()),
    });

    assert!(!live(&cache, "issue:i1"));
    assert!(!live(&cache, "team:t1:issues_by_state"));
    assert!(live(&cache, "issue:i2"));
    assert!(live(&cache, "team:t2:issues_by_state"));
    assert!(live(&cache, "team:t1:states"));
  }

  #[test]
  fn test_issue_mutation_without_team_clears_all_boards() {
    let (cache, invalidator) = seeded();
    invalidator.emit(&CacheEvent::IssueMutated {
      issue_id: "i2".to_string(),
      team_id: None,
    });

    assert!(!live(&cache, "team:t1:issues_by_state"));
    assert!(!live(&cache, "team:t2:issues_by_state"));
    assert!(live(&cache, "issue:i1"));
  }

  #[test]
  fn test_catalog_and_admin_events() {
    let (cache, invalidator) = seeded();
    assert_eq!(invalidator.emit(&CacheEvent::TeamCatalogChanged), 2);
    assert_eq!(invalidator.emit(&CacheEvent::UserChanged), 1);
    assert_eq!(
      invalidator.emit(&CacheEvent::CustomerChanged {
        customer_id: "c2".to_string()
      }),
      2
    );
    assert!(live(&cache, "admin:teams"));
    assert!(live(&cache, "customer:c1:available_teams"));
  }
}
