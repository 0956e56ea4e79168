//! Kanban board assembly: one resolved column per workflow state.

use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::cache::{CacheValue, Cacheable};
use crate::error::EngineError;
use crate::hierarchy::{HierarchyNode, HierarchyResolver};
use crate::linear::source::IssueSource;
use crate::linear::types::{Team, WorkflowState};

/// One board column.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateColumn {
  pub state: WorkflowState,
  pub issues: Vec<HierarchyNode>,
  pub root_count: usize,
  pub sub_issue_count: usize,
  pub total_count: usize,
  /// Set when this column could not be loaded; the column is then empty.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
}

impl StateColumn {
  fn resolved(state: WorkflowState, issues: Vec<HierarchyNode>) -> Self {
    let root_count = issues.len();
    let sub_issue_count = issues.iter().map(|n| n.visible_children.len()).sum();
    Self {
      state,
      issues,
      root_count,
      sub_issue_count,
      total_count: root_count + sub_issue_count,
      error: None,
    }
  }

  fn failed(state: WorkflowState, err: &EngineError) -> Self {
    Self {
      state,
      issues: Vec::new(),
      root_count: 0,
      sub_issue_count: 0,
      total_count: 0,
      error: Some(err.user_message()),
    }
  }
}

/// Every column of a team's board.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamIssuesByState {
  pub team: Team,
  pub states: Vec<StateColumn>,
  pub total_issues: usize,
  pub failed_states: usize,
}

impl TeamIssuesByState {
  pub fn is_complete(&self) -> bool {
    self.failed_states == 0
  }
}

impl Cacheable for TeamIssuesByState {
  fn into_value(value: Arc<Self>) -> CacheValue {
    CacheValue::IssuesByState(value)
  }

  fn from_value(value: &CacheValue) -> Option<Arc<Self>> {
    match value {
      CacheValue::IssuesByState(board) => Some(Arc::clone(board)),
      _ => None,
    }
  }

  fn entity_type() -> &'static str {
    "issues_by_state"
  }
}

/// Drives the [`HierarchyResolver`] across every workflow state of a team.
pub struct StateAggregator<S> {
  source: Arc<S>,
  resolver: HierarchyResolver,
  fail_fast: bool,
}

impl<S: IssueSource> StateAggregator<S> {
  pub fn new(source: Arc<S>, resolver: HierarchyResolver, fail_fast: bool) -> Self {
    Self {
      source,
      resolver,
      fail_fast,
    }
  }

  /// Fetch and resolve every state bucket of `team_id` concurrently.
  ///
  /// A failing bucket becomes an empty column carrying an error, unless
  /// `fail_fast` is set, in which case the first failure fails the call.
  /// Failing to load the team or its states always fails the call.
  pub async fn resolve_team_by_state(&self, team_id: &str) -> Result<TeamIssuesByState, EngineError> {
    let (team, states) = futures::try_join!(
      self.source.get_team(team_id),
      self.source.team_states(team_id)
    )?;

    let buckets = states.iter().map(|state| async move {
      let issues = self.source.state_issues(team_id, &state.id).await?;
      self.resolver.resolve(issues)
    });
    let results = join_all(buckets).await;

    let mut columns = Vec::with_capacity(states.len());
    let mut failed_states = 0;
    for (state, result) in states.into_iter().zip(results) {
      match result {
        Ok(nodes) => columns.push(StateColumn::resolved(state, nodes)),
        Err(err) if self.fail_fast => return Err(err),
        Err(err) => {
          warn!(team = team_id, state = %state.name, error = %err, "state bucket failed");
          failed_states += 1;
          columns.push(StateColumn::failed(state, &err));
        }
      }
    }

    let total_issues = columns.iter().map(|c| c.total_count).sum();
    info!(
      team = team_id,
      states = columns.len(),
      total_issues,
      failed_states,
      "resolved board"
    );

    Ok(TeamIssuesByState {
      team,
      states: columns,
      total_issues,
      failed_states,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::linear::fixture::{Fixture, StaticSource};

  const FIXTURE: &str = r#"
teams:
  - id: t1
    key: ENG
    name: Engineering
    states:
      - { id: todo, name: Todo, type: unstarted, position: 1 }
      - { id: doing, name: Doing, type: started, position: 2 }
      - { id: done, name: Done, type: completed, position: 3 }
issues:
  - { id: a, team_id: t1, state_id: doing }
  - { id: b, team_id: t1, state_id: doing, parent: a }
  - { id: c, team_id: t1, state_id: doing, parent: b }
  - { id: d, team_id: t1, state_id: todo, parent: a }
  - { id: e, team_id: t1, state_id: todo }
  - { id: f, team_id: t1, state_id: done }
"#;

  fn aggregator(fail_fast: bool) -> (Arc<StaticSource>, StateAggregator<StaticSource>) {
    let fixture: Fixture = serde_yaml::from_str(FIXTURE).unwrap();
    let source = Arc::new(StaticSource::new(fixture));
    let aggregator = StateAggregator::new(Arc::clone(&source), HierarchyResolver::default(), fail_fast);
    (source, aggregator)
  }

  #[tokio::test]
  async fn test_columns_and_tallies() {
    let (_, aggregator) = aggregator(false);
    let board = aggregator.resolve_team_by_state("t1").await.unwrap();

    assert_eq!(board.team.key, "ENG");
    let names: Vec<&str> = board.states.iter().map(|c| c.state.name.as_str()).collect();
    assert_eq!(names, vec!["Todo", "Doing", "Done"]);

    // Todo: d (parent a is in Doing) and e are both roots
    let todo = &board.states[0];
    assert_eq!((todo.root_count, todo.sub_issue_count, todo.total_count), (2, 0, 2));

    // Doing: a with b nested, c hidden
    let doing = &board.states[1];
    assert_eq!((doing.root_count, doing.sub_issue_count, doing.total_count), (1, 1, 2));
    assert_eq!(doing.issues[0].descendant_count, 3);
    assert_eq!(doing.issues[0].breakdown.by_state.get("Todo"), Some(&1));

    assert_eq!(board.total_issues, 5);
    assert!(board.is_complete());
  }

  #[tokio::test]
  async fn test_deep_chain_counts_every_descendant() {
    let fixture: Fixture = serde_yaml::from_str(
      r#"
teams:
  - id: t1
    key: ENG
    name: Engineering
    states:
      - { id: todo, name: Todo, type: unstarted, position: 1 }
      - { id: doing, name: Doing, type: started, position: 2 }
issues:
  - { id: a, team_id: t1, state_id: doing }
  - { id: b, team_id: t1, state_id: todo, parent: a }
  - { id: c, team_id: t1, state_id: todo, parent: b }
  - { id: d, team_id: t1, state_id: todo, parent: c }
  - { id: e, team_id: t1, state_id: todo, parent: d }
  - { id: f, team_id: t1, state_id: todo, parent: e }
"#,
    )
    .unwrap();
    let aggregator = StateAggregator::new(
      Arc::new(StaticSource::new(fixture)),
      HierarchyResolver::default(),
      false,
    );

    let board = aggregator.resolve_team_by_state("t1").await.unwrap();
    let epic = &board.states[1].issues[0];
    assert_eq!(epic.issue.id, "a");
    assert_eq!(epic.descendant_count, 5);
    assert_eq!(
      (epic.breakdown.level1, epic.breakdown.level2, epic.breakdown.level3_plus),
      (1, 1, 3)
    );
    assert_eq!(epic.breakdown.by_state.get("Todo"), Some(&5));

    // b heads the Todo column; its own subtree is four deep
    let todo = &board.states[0];
    assert_eq!(todo.issues[0].issue.id, "b");
    assert_eq!(todo.issues[0].descendant_count, 4);
  }

  #[tokio::test]
  async fn test_failed_state_is_reported_per_column() {
    let (source, aggregator) = aggregator(false);
    source.fail_state("done");

    let board = aggregator.resolve_team_by_state("t1").await.unwrap();

    assert_eq!(board.failed_states, 1);
    assert!(!board.is_complete());
    let done = &board.states[2];
    assert!(done.issues.is_empty());
    assert_eq!(
      done.error.as_deref(),
      Some("The issue tracker request failed")
    );
    assert_eq!(board.total_issues, 4);
  }

  #[tokio::test]
  async fn test_fail_fast() {
    let (source, aggregator) = aggregator(true);
    source.fail_state("todo");

    let err = aggregator.resolve_team_by_state("t1").await.unwrap_err();
    assert!(err.is_retriable());
  }

  #[tokio::test]
  async fn test_unknown_team() {
    let (_, aggregator) = aggregator(false);
    let err = aggregator.resolve_team_by_state("nope").await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound { entity: "Team", .. }));
  }

  #[tokio::test]
  async fn test_every_state_is_fetched() {
    let (source, aggregator) = aggregator(false);
    aggregator.resolve_team_by_state("t1").await.unwrap();
    assert_eq!(source.call_count("state_issues:t1:"), 3);
  }
}
