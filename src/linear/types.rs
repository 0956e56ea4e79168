use serde::{Deserialize, Serialize};

/// Team as listed in the issue tracker's catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
  pub id: String,
  #[serde(default)]
  pub key: String,
  pub name: String,
}

/// Workflow state (one Kanban column)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowState {
  pub id: String,
  pub name: String,
  /// "backlog", "unstarted", "started", "completed" or "canceled"
  #[serde(rename = "type")]
  pub state_type: String,
  #[serde(default)]
  pub position: f64,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub color: Option<String>,
}

/// Reference to another issue by id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueRef {
  pub id: String,
}

/// Issue with its sub-issue tree as reported by the tracker.
///
/// `children` is the tracker's view of the hierarchy and is not limited to
/// any one workflow state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
  pub id: String,
  pub identifier: String,
  pub title: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub priority: Option<i32>,
  pub state: WorkflowState,
  #[serde(default, rename = "parentRef", skip_serializing_if = "Option::is_none")]
  pub parent: Option<IssueRef>,
  #[serde(default, rename = "directChildren")]
  pub children: Vec<Issue>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub team_id: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub assignee: Option<String>,
  #[serde(default)]
  pub labels: Vec<String>,
  #[serde(default)]
  pub created_at: String,
  #[serde(default)]
  pub updated_at: String,
}

impl Issue {
  pub fn parent_id(&self) -> Option<&str> {
    self.parent.as_ref().map(|p| p.id.as_str())
  }
}
