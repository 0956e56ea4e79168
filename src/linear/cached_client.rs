//! Issue source wrapper with transparent caching.

use std::sync::Arc;
use std::time::Duration;

use crate::cache::CacheLayer;
use crate::config::CacheConfig;
use crate::error::EngineError;
use crate::invalidation::{CacheEvent, Invalidator};
use crate::store::keys;

use super::source::IssueSource;
use super::types::{Issue, Team, WorkflowState};

#[derive(Debug, Clone, Copy)]
pub struct SourceTtls {
  pub teams: Duration,
  pub issue_detail: Duration,
}

impl From<&CacheConfig> for SourceTtls {
  fn from(config: &CacheConfig) -> Self {
    Self {
      teams: config.teams_ttl(),
      issue_detail: config.issue_detail_ttl(),
    }
  }
}

/// Issue source with transparent caching support.
///
/// Wraps another [`IssueSource`] and exposes the same API. Team catalog,
/// workflow states and single issues are cached; state buckets are passed
/// through because the assembled board is cached one level up. Mutations go
/// straight to the inner source and then invalidate what they touched.
pub struct CachedIssueSource<S> {
  inner: S,
  cache: CacheLayer,
  invalidator: Invalidator,
  ttls: SourceTtls,
}

impl<S: IssueSource> CachedIssueSource<S> {
  pub fn new(inner: S, cache: CacheLayer, invalidator: Invalidator, ttls: SourceTtls) -> Self {
    Self {
      inner,
      cache,
      invalidator,
      ttls,
    }
  }

  /// Team catalog shared with callers without cloning the list.
  pub async fn teams(&self) -> Result<Arc<Vec<Team>>, EngineError> {
    let result = self
      .cache
      .fetch(keys::TEAMS_ALL, self.ttls.teams, || self.inner.list_teams())
      .await?;
    Ok(result.data)
  }

  pub async fn states(&self, team_id: &str) -> Result<Arc<Vec<WorkflowState>>, EngineError> {
    let result = self
      .cache
      .fetch(&keys::team_states(team_id), self.ttls.teams, || {
        self.inner.team_states(team_id)
      })
      .await?;
    Ok(result.data)
  }

  pub async fn issue(&self, issue_id: &str) -> Result<Arc<Issue>, EngineError> {
    let result = self
      .cache
      .fetch(&keys::issue_detail(issue_id), self.ttls.issue_detail, || {
        self.inner.get_issue(issue_id)
      })
      .await?;
    Ok(result.data)
  }

  /// Team of an issue, from the detail cache when possible.
  fn cached_team_of(&self, issue_id: &str) -> Option<String> {
    self
      .cache
      .get::<Issue>(&keys::issue_detail(issue_id))
      .and_then(|issue| issue.team_id.clone())
  }
}

impl<S: IssueSource> IssueSource for CachedIssueSource<S> {
  async fn list_teams(&self) -> Result<Vec<Team>, EngineError> {
    Ok(self.teams().await?.as_ref().clone())
  }

  async fn get_team(&self, team_id: &str) -> Result<Team, EngineError> {
    let teams = self.teams().await?;
    if let Some(team) = teams.iter().find(|t| t.id == team_id) {
      return Ok(team.clone());
    }
    // Not in the cached catalog; it may be newer than the cache.
    self.inner.get_team(team_id).await
  }

  async fn team_states(&self, team_id: &str) -> Result<Vec<WorkflowState>, EngineError> {
    Ok(self.states(team_id).await?.as_ref().clone())
  }

  async fn state_issues(&self, team_id: &str, state_id: &str) -> Result<Vec<Issue>, EngineError> {
    self.inner.state_issues(team_id, state_id).await
  }

  async fn get_issue(&self, issue_id: &str) -> Result<Issue, EngineError> {
    Ok(self.issue(issue_id).await?.as_ref().clone())
  }

  async fn update_issue_state(&self, issue_id: &str, state_id: &str) -> Result<Issue, EngineError> {
    let issue = self.inner.update_issue_state(issue_id, state_id).await?;
    self.invalidator.emit(&CacheEvent::IssueMutated {
      issue_id: issue_id.to_string(),
      team_id: issue.team_id.clone(),
    });
    Ok(issue)
  }

  async fn add_comment(&self, issue_id: &str, body: &str) -> Result<(), EngineError> {
    let team_id = self.cached_team_of(issue_id);
    self.inner.add_comment(issue_id, body).await?;
    self.invalidator.emit(&CacheEvent::IssueMutated {
      issue_id: issue_id.to_string(),
      team_id,
    });
    Ok(())
  }
}
