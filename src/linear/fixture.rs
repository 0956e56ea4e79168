//! Issue source served from a fixture file.
//!
//! Lets the portal run without network access (demos, local development) and
//! gives the tests a scriptable tracker.

use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Mutex, RwLock};

use super::source::IssueSource;
use super::types::{Issue, IssueRef, Team, WorkflowState};
use crate::error::EngineError;
use crate::hierarchy::DEFAULT_MAX_DEPTH;

#[derive(Debug, Clone, Deserialize)]
pub struct FixtureTeam {
  #[serde(flatten)]
  pub team: Team,
  #[serde(default)]
  pub states: Vec<WorkflowState>,
}

/// Flat issue record; the tree is derived from `parent` links.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FixtureIssue {
  pub id: String,
  #[serde(default)]
  pub identifier: String,
  #[serde(default)]
  pub title: String,
  pub team_id: String,
  pub state_id: String,
  #[serde(default)]
  pub parent: Option<String>,
  #[serde(default)]
  pub assignee: Option<String>,
  #[serde(default)]
  pub labels: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Fixture {
  #[serde(default)]
  pub teams: Vec<FixtureTeam>,
  #[serde(default)]
  pub issues: Vec<FixtureIssue>,
}

/// In-memory [`IssueSource`].
#[derive(Default)]
pub struct StaticSource {
  data: RwLock<Fixture>,
  failing_states: RwLock<HashSet<String>>,
  comments: Mutex<Vec<(String, String)>>,
  calls: Mutex<Vec<String>>,
}

impl StaticSource {
  pub fn new(fixture: Fixture) -> Self {
    Self {
      data: RwLock::new(fixture),
      ..Self::default()
    }
  }

  /// Load a YAML (or JSON) fixture file.
  pub fn from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read fixture {}: {}", path.display(), e))?;
    let fixture: Fixture = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse fixture {}: {}", path.display(), e))?;
    Ok(Self::new(fixture))
  }

  /// Make every fetch of `state_id` fail with a retriable upstream error.
  pub fn fail_state(&self, state_id: &str) {
    write(&self.failing_states).insert(state_id.to_string());
  }

  /// Recorded calls, e.g. `"state_issues:t1:s1"`.
  pub fn calls(&self) -> Vec<String> {
    lock(&self.calls).clone()
  }

  pub fn call_count(&self, prefix: &str) -> usize {
    lock(&self.calls)
      .iter()
      .filter(|c| c.starts_with(prefix))
      .count()
  }

  pub fn comments(&self, issue_id: &str) -> Vec<String> {
    lock(&self.comments)
      .iter()
      .filter(|(id, _)| id == issue_id)
      .map(|(_, body)| body.clone())
      .collect()
  }

  fn record(&self, call: String) {
    lock(&self.calls).push(call);
  }

  fn find_team<'a>(fixture: &'a Fixture, team_id: &str) -> Result<&'a FixtureTeam, EngineError> {
    fixture
      .teams
      .iter()
      .find(|t| t.team.id == team_id)
      .ok_or_else(|| EngineError::not_found("Team", team_id))
  }

  fn build_issue(fixture: &Fixture, record: &FixtureIssue, depth: usize) -> Result<Issue, EngineError> {
    let state = Self::find_team(fixture, &record.team_id)?
      .states
      .iter()
      .find(|s| s.id == record.state_id)
      .cloned()
      .ok_or_else(|| {
        EngineError::MalformedData(format!("issue {} has unknown state {}", record.id, record.state_id))
      })?;

    // Only a parent cycle gets this deep
    if depth > DEFAULT_MAX_DEPTH {
      return Err(EngineError::MalformedData(format!(
        "sub-issues of {} nest deeper than {} levels",
        record.id, DEFAULT_MAX_DEPTH
      )));
    }

    let children = fixture
      .issues
      .iter()
      .filter(|child| child.parent.as_deref() == Some(record.id.as_str()))
      .map(|child| Self::build_issue(fixture, child, depth + 1))
      .collect::<Result<Vec<_>, _>>()?;

    Ok(Issue {
      id: record.id.clone(),
      identifier: record.identifier.clone(),
      title: record.title.clone(),
      description: None,
      priority: None,
      state,
      parent: record.parent.clone().map(|id| IssueRef { id }),
      children,
      team_id: Some(record.team_id.clone()),
      assignee: record.assignee.clone(),
      labels: record.labels.clone(),
      created_at: String::new(),
      updated_at: String::new(),
    })
  }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
  lock.read().unwrap_or_else(std::sync::PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
  lock.write().unwrap_or_else(std::sync::PoisonError::into_inner)
}

impl IssueSource for StaticSource {
  async fn list_teams(&self) -> Result<Vec<Team>, EngineError> {
    self.record("list_teams".to_string());
    Ok(read(&self.data).teams.iter().map(|t| t.team.clone()).collect())
  }

  async fn get_team(&self, team_id: &str) -> Result<Team, EngineError> {
    self.record(format!("get_team:{}", team_id));
    let data = read(&self.data);
    Ok(Self::find_team(&data, team_id)?.team.clone())
  }

  async fn team_states(&self, team_id: &str) -> Result<Vec<WorkflowState>, EngineError> {
    self.record(format!("team_states:{}", team_id));
    let data = read(&self.data);
    let mut states = Self::find_team(&data, team_id)?.states.clone();
    states.sort_by(|a, b| a.position.total_cmp(&b.position));
    Ok(states)
  }

  async fn state_issues(&self, team_id: &str, state_id: &str) -> Result<Vec<Issue>, EngineError> {
    self.record(format!("state_issues:{}:{}", team_id, state_id));
    if read(&self.failing_states).contains(state_id) {
      return Err(EngineError::upstream(format!("state {} unavailable", state_id)));
    }

    let data = read(&self.data);
    data
      .issues
      .iter()
      .filter(|i| i.team_id == team_id && i.state_id == state_id)
      .map(|i| Self::build_issue(&data, i, 0))
      .collect()
  }

  async fn get_issue(&self, issue_id: &str) -> Result<Issue, EngineError> {
    self.record(format!("get_issue:{}", issue_id));
    let data = read(&self.data);
    let record = data
      .issues
      .iter()
      .find(|i| i.id == issue_id)
      .ok_or_else(|| EngineError::not_found("Issue", issue_id))?;
    Self::build_issue(&data, record, 0)
  }

  async fn update_issue_state(&self, issue_id: &str, state_id: &str) -> Result<Issue, EngineError> {
    self.record(format!("update_issue_state:{}:{}", issue_id, state_id));
    let mut data = write(&self.data);

    let team_id = data
      .issues
      .iter()
      .find(|i| i.id == issue_id)
      .map(|i| i.team_id.clone())
      .ok_or_else(|| EngineError::not_found("Issue", issue_id))?;
    let known_state = Self::find_team(&data, &team_id)?
      .states
      .iter()
      .any(|s| s.id == state_id);
    if !known_state {
      return Err(EngineError::not_found("State", state_id));
    }

    if let Some(record) = data.issues.iter_mut().find(|i| i.id == issue_id) {
      record.state_id = state_id.to_string();
    }

    let record = data
      .issues
      .iter()
      .find(|i| i.id == issue_id)
      .ok_or_else(|| EngineError::not_found("Issue", issue_id))?;
    Self::build_issue(&data, record, 0)
  }

  async fn add_comment(&self, issue_id: &str, body: &str) -> Result<(), EngineError> {
    self.record(format!("add_comment:{}", issue_id));
    if !read(&self.data).issues.iter().any(|i| i.id == issue_id) {
      return Err(EngineError::not_found("Issue", issue_id));
    }
    lock(&self.comments).push((issue_id.to_string(), body.to_string()));
    Ok(())
  }
}
