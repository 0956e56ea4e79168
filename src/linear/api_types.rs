//! Serde-deserializable types matching Linear GraphQL responses.
//!
//! These types are separate from domain types to allow clean deserialization
//! while keeping domain types focused on application needs.

use serde::Deserialize;

use super::types::{Issue, IssueRef, Team, WorkflowState};
use crate::error::EngineError;

// ============================================================================
// GraphQL envelope
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct GraphQlResponse<T> {
  pub data: Option<T>,
  #[serde(default)]
  pub errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
pub struct GraphQlError {
  pub message: String,
  #[serde(default)]
  pub extensions: Option<GraphQlErrorExtensions>,
}

#[derive(Debug, Deserialize)]
pub struct GraphQlErrorExtensions {
  #[serde(rename = "type")]
  pub error_type: Option<String>,
  pub code: Option<String>,
}

impl GraphQlError {
  pub fn is_not_found(&self) -> bool {
    let by_code = self.extensions.as_ref().is_some_and(|ext| {
      ext.code.as_deref() == Some("ENTITY_NOT_FOUND")
        || ext
          .error_type
          .as_deref()
          .is_some_and(|t| t.eq_ignore_ascii_case("entity not found"))
    });
    by_code || self.message.to_lowercase().contains("not found")
  }
}

// ============================================================================
// Pagination
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
  #[serde(default)]
  pub has_next_page: bool,
  pub end_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiConnection<T> {
  #[serde(default = "Vec::new")]
  pub nodes: Vec<T>,
  pub page_info: Option<PageInfo>,
}

// ============================================================================
// Common nested field types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiState {
  pub id: String,
  pub name: String,
  #[serde(rename = "type", default)]
  pub state_type: String,
  #[serde(default)]
  pub position: f64,
  pub color: Option<String>,
}

impl From<ApiState> for WorkflowState {
  fn from(state: ApiState) -> Self {
    WorkflowState {
      id: state.id,
      name: state.name,
      state_type: state.state_type,
      position: state.position,
      color: state.color,
    }
  }
}

#[derive(Debug, Deserialize)]
pub struct ApiRef {
  pub id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiUser {
  pub name: String,
  pub display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ApiLabel {
  pub name: String,
}

// ============================================================================
// Teams
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiTeam {
  pub id: String,
  #[serde(default)]
  pub key: String,
  pub name: String,
  pub states: Option<ApiConnection<ApiState>>,
}

impl ApiTeam {
  pub fn into_team(self) -> Team {
    Team {
      id: self.id,
      key: self.key,
      name: self.name,
    }
  }

  /// Workflow states sorted into board order.
  pub fn into_states(self) -> Vec<WorkflowState> {
    let mut states: Vec<WorkflowState> = self
      .states
      .map(|c| c.nodes)
      .unwrap_or_default()
      .into_iter()
      .map(WorkflowState::from)
      .collect();
    states.sort_by(|a, b| a.position.total_cmp(&b.position));
    states
  }
}

#[derive(Debug, Deserialize)]
pub struct TeamsData {
  pub teams: ApiConnection<ApiTeam>,
}

#[derive(Debug, Deserialize)]
pub struct TeamData {
  pub team: Option<ApiTeam>,
}

// ============================================================================
// Issues
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiIssue {
  pub id: String,
  #[serde(default)]
  pub identifier: String,
  #[serde(default)]
  pub title: String,
  pub description: Option<String>,
  pub priority: Option<f64>,
  pub state: Option<ApiState>,
  pub parent: Option<ApiRef>,
  pub children: Option<ApiConnection<ApiIssue>>,
  /// First child id, asked for at the deepest level a query nests to.
  #[serde(default)]
  pub sub_issues: Option<ApiConnection<ApiRef>>,
  pub team: Option<ApiRef>,
  pub assignee: Option<ApiUser>,
  pub labels: Option<ApiConnection<ApiLabel>>,
  #[serde(default)]
  pub created_at: String,
  #[serde(default)]
  pub updated_at: String,
}

impl ApiIssue {
  /// Whether the sub-issues in this response are incomplete: another page
  /// exists, or the query stopped nesting while children exist.
  pub fn needs_children(&self) -> bool {
    match &self.children {
      Some(children) => children.page_info.as_ref().is_some_and(|p| p.has_next_page),
      None => self.sub_issues.as_ref().is_some_and(|s| !s.nodes.is_empty()),
    }
  }

  /// Convert into the domain type. Every issue, including nested children,
  /// must carry a workflow state.
  pub fn into_issue(self) -> Result<Issue, EngineError> {
    let state = self.state.ok_or_else(|| {
      EngineError::MalformedData(format!("issue {} has no workflow state", self.id))
    })?;

    let children = self
      .children
      .map(|c| c.nodes)
      .unwrap_or_default()
      .into_iter()
      .map(ApiIssue::into_issue)
      .collect::<Result<Vec<_>, _>>()?;

    Ok(Issue {
      id: self.id,
      identifier: self.identifier,
      title: self.title,
      description: self.description,
      priority: self.priority.map(|p| p as i32),
      state: state.into(),
      parent: self.parent.map(|p| IssueRef { id: p.id }),
      children,
      team_id: self.team.map(|t| t.id),
      assignee: self.assignee.map(|u| u.display_name.unwrap_or(u.name)),
      labels: self
        .labels
        .map(|c| c.nodes.into_iter().map(|l| l.name).collect())
        .unwrap_or_default(),
      created_at: self.created_at,
      updated_at: self.updated_at,
    })
  }
}

#[derive(Debug, Deserialize)]
pub struct IssuesData {
  pub issues: ApiConnection<ApiIssue>,
}

#[derive(Debug, Deserialize)]
pub struct IssueData {
  pub issue: Option<ApiIssue>,
}

#[derive(Debug, Deserialize)]
pub struct ApiIssuePayload {
  pub success: bool,
  pub issue: Option<ApiIssue>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueUpdateData {
  pub issue_update: ApiIssuePayload,
}

#[derive(Debug, Deserialize)]
pub struct ApiSuccessPayload {
  pub success: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentCreateData {
  pub comment_create: ApiSuccessPayload,
}
