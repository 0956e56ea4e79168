//! Query interface exposed to the route layer.
//!
//! Every operation answers with an [`ApiResponse`] envelope. Errors are
//! logged in full here and reduced to [`EngineError::user_message`] in the
//! envelope.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::aggregate::{StateAggregator, TeamIssuesByState};
use crate::cache::{CacheLayer, CacheStats, SharedCache};
use crate::config::Config;
use crate::error::EngineError;
use crate::hierarchy::HierarchyResolver;
use crate::invalidation::{CacheEvent, Invalidator};
use crate::linear::cached_client::{CachedIssueSource, SourceTtls};
use crate::linear::source::IssueSource;
use crate::linear::types::{Issue, Team};
use crate::ownership::{AvailableTeams, OwnershipIndex};
use crate::store::{keys, KvStore};

/// Uniform result envelope: `{success, data?, error?}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiResponse<T> {
  pub success: bool,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub data: Option<T>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
}

impl<T> ApiResponse<T> {
  pub fn ok(data: T) -> Self {
    Self {
      success: true,
      data: Some(data),
      error: None,
    }
  }

  pub fn err(error: &EngineError) -> Self {
    Self {
      success: false,
      data: None,
      error: Some(error.user_message()),
    }
  }
}

impl<T> From<Result<T, EngineError>> for ApiResponse<T> {
  fn from(result: Result<T, EngineError>) -> Self {
    match result {
      Ok(data) => Self::ok(data),
      Err(err) => {
        warn!(error = %err, retriable = err.is_retriable(), "request failed");
        Self::err(&err)
      }
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
  pub team_id: String,
  pub customer_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Removal {
  pub team_id: String,
  pub customer_id: String,
  /// Whether an ownership record was actually deleted
  pub released: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Invalidated {
  pub removed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Commented {
  pub issue_id: String,
}

/// The engine behind the portal: caching, ownership and board assembly
/// over one backing store and one issue source.
pub struct PortalService<K, S> {
  cache: CacheLayer,
  invalidator: Invalidator,
  source: Arc<CachedIssueSource<S>>,
  ownership: OwnershipIndex<K, CachedIssueSource<S>>,
  aggregator: StateAggregator<CachedIssueSource<S>>,
  board_ttl: Duration,
}

impl<K: KvStore, S: IssueSource> PortalService<K, S> {
  pub fn new(store: Arc<K>, source: S, cache: SharedCache, config: &Config) -> Self {
    let layer = CacheLayer::new(Arc::clone(&cache));
    let invalidator = Invalidator::new(cache);
    let source = Arc::new(CachedIssueSource::new(
      source,
      layer.clone(),
      invalidator.clone(),
      SourceTtls::from(&config.cache),
    ));

    let ownership = OwnershipIndex::new(
      store,
      Arc::clone(&source),
      layer.clone(),
      invalidator.clone(),
      config.cache.ownership_ttl(),
    );
    let aggregator = StateAggregator::new(
      Arc::clone(&source),
      HierarchyResolver::default(),
      config.aggregation.fail_fast,
    );

    Self {
      cache: layer,
      invalidator,
      source,
      ownership,
      aggregator,
      board_ttl: config.cache.issues_by_state_ttl(),
    }
  }

  pub async fn get_team_available_for_customer(&self, customer_id: &str) -> ApiResponse<AvailableTeams> {
    self.ownership.get_available_teams(customer_id).await.into()
  }

  pub async fn assign_team_to_customer(&self, team_id: &str, customer_id: &str) -> ApiResponse<Assignment> {
    self
      .ownership
      .assign(team_id, customer_id)
      .await
      .map(|()| Assignment {
        team_id: team_id.to_string(),
        customer_id: customer_id.to_string(),
      })
      .into()
  }

  pub async fn remove_team_from_customer(&self, team_id: &str, customer_id: &str) -> ApiResponse<Removal> {
    self
      .ownership
      .remove(team_id, customer_id)
      .await
      .map(|released| Removal {
        team_id: team_id.to_string(),
        customer_id: customer_id.to_string(),
        released,
      })
      .into()
  }

  /// Board for a team. Only complete boards are cached; a board with failed
  /// columns is returned but fetched again on the next call. So is a board
  /// assembled while an invalidation ran.
  pub async fn get_team_issues_by_state(&self, team_id: &str) -> ApiResponse<Arc<TeamIssuesByState>> {
    self.issues_by_state(team_id).await.into()
  }

  async fn issues_by_state(&self, team_id: &str) -> Result<Arc<TeamIssuesByState>, EngineError> {
    let key = keys::team_issues_by_state(team_id);
    if let Some(board) = self.cache.get::<TeamIssuesByState>(&key) {
      return Ok(board);
    }

    let seen = self.cache.generation();
    let board = Arc::new(self.aggregator.resolve_team_by_state(team_id).await?);
    if board.is_complete() {
      self.cache.put_if_unchanged(&key, Arc::clone(&board), self.board_ttl, seen);
    } else {
      debug!(team = team_id, failed = board.failed_states, "partial board not cached");
    }
    Ok(board)
  }

  /// Drop cached boards of a team after out-of-band changes.
  pub fn invalidate_issue_cache(&self, team_id: &str) -> ApiResponse<Invalidated> {
    let removed = self.invalidator.emit(&CacheEvent::TeamIssuesChanged {
      team_id: team_id.to_string(),
    });
    ApiResponse::ok(Invalidated { removed })
  }

  pub fn get_cache_stats(&self) -> ApiResponse<CacheStats> {
    ApiResponse::ok(self.cache.cache().stats())
  }

  pub async fn get_issue(&self, issue_id: &str) -> ApiResponse<Arc<Issue>> {
    self.source.issue(issue_id).await.into()
  }

  pub async fn move_issue(&self, issue_id: &str, state_id: &str) -> ApiResponse<Issue> {
    self.source.update_issue_state(issue_id, state_id).await.into()
  }

  pub async fn comment_on_issue(&self, issue_id: &str, body: &str) -> ApiResponse<Commented> {
    self
      .source
      .add_comment(issue_id, body)
      .await
      .map(|()| Commented {
        issue_id: issue_id.to_string(),
      })
      .into()
  }

  /// Teams on a customer's list, in list order.
  pub async fn get_customer_teams(&self, customer_id: &str) -> ApiResponse<Vec<Team>> {
    self.customer_teams(customer_id).await.into()
  }

  async fn customer_teams(&self, customer_id: &str) -> Result<Vec<Team>, EngineError> {
    let (ids, catalog) = futures::try_join!(
      self.ownership.customer_teams(customer_id),
      self.source.teams()
    )?;

    let mut teams = Vec::with_capacity(ids.len());
    for id in &ids {
      match catalog.iter().find(|t| &t.id == id) {
        Some(team) => teams.push(team.clone()),
        None => warn!(customer = customer_id, team = %id, "listed team missing from catalog"),
      }
    }
    Ok(teams)
  }
}
