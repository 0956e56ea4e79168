//! The boundary to the issue tracker.

use std::future::Future;

use super::types::{Issue, Team, WorkflowState};
use crate::error::EngineError;

/// Read and write access to the issue tracker.
///
/// Reads may be retried by implementations; mutations must not be.
pub trait IssueSource: Send + Sync {
  /// Full team catalog.
  fn list_teams(&self) -> impl Future<Output = Result<Vec<Team>, EngineError>> + Send;

  fn get_team(&self, team_id: &str) -> impl Future<Output = Result<Team, EngineError>> + Send;

  /// Workflow states of a team, in board order.
  fn team_states(
    &self,
    team_id: &str,
  ) -> impl Future<Output = Result<Vec<WorkflowState>, EngineError>> + Send;

  /// Every issue of `team_id` currently in `state_id`, each with its
  /// sub-issue tree.
  fn state_issues(
    &self,
    team_id: &str,
    state_id: &str,
  ) -> impl Future<Output = Result<Vec<Issue>, EngineError>> + Send;

  fn get_issue(&self, issue_id: &str) -> impl Future<Output = Result<Issue, EngineError>> + Send;

  /// Move an issue to another workflow state and return the updated issue.
  fn update_issue_state(
    &self,
    issue_id: &str,
    state_id: &str,
  ) -> impl Future<Output = Result<Issue, EngineError>> + Send;

  fn add_comment(
    &self,
    issue_id: &str,
    body: &str,
  ) -> impl Future<Output = Result<(), EngineError>> + Send;
}

impl<T: IssueSource> IssueSource for std::sync::Arc<T> {
  fn list_teams(&self) -> impl Future<Output = Result<Vec<Team>, EngineError>> + Send {
    (**self).list_teams()
  }

  fn get_team(&self, team_id: &str) -> impl Future<Output = Result<Team, EngineError>> + Send {
    (**self).get_team(team_id)
  }

  fn team_states(
    &self,
    team_id: &str,
  ) -> impl Future<Output = Result<Vec<WorkflowState>, EngineError>> + Send {
    (**self).team_states(team_id)
  }

  fn state_issues(
    &self,
    team_id: &str,
    state_id: &str,
  ) -> impl Future<Output = Result<Vec<Issue>, EngineError>> + Send {
    (**self).state_issues(team_id, state_id)
  }

  fn get_issue(&self, issue_id: &str) -> impl Future<Output = Result<Issue, EngineError>> + Send {
    (**self).get_issue(issue_id)
  }

  fn update_issue_state(
    &self,
    issue_id: &str,
    state_id: &str,
  ) -> impl Future<Output = Result<Issue, EngineError>> + Send {
    (**self).update_issue_state(issue_id, state_id)
  }

  fn add_comment(
    &self,
    issue_id: &str,
    body: &str,
  ) -> impl Future<Output = Result<(), EngineError>> + Send {
    (**self).add_comment(issue_id, body)
  }
}
