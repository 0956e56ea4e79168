use crate::config::{Config, LinearConfig};
use crate::error::EngineError;
use crate::hierarchy::DEFAULT_MAX_DEPTH;
use crate::linear::api_types::{
  ApiConnection, ApiIssue, ApiTeam, CommentCreateData, GraphQlResponse, IssueData,
  IssueUpdateData, IssuesData, PageInfo, TeamData, TeamsData,
};
use crate::linear::source::IssueSource;
use crate::linear::types::{Issue, Team, WorkflowState};
use color_eyre::{eyre::eyre, Result};
use futures::future::{try_join_all, BoxFuture, FutureExt};
use reqwest::header::AUTHORIZATION;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Upper bound on pages per listing, in case the cursor never advances.
const MAX_PAGES: usize = 200;

const RETRY_BASE_DELAY: Duration = Duration::from_millis(200);

macro_rules! issue_fragments {
  () => {
    r#"
fragment StateFields on WorkflowState { id name type position color }
fragment IssueCore on Issue {
  id identifier title description priority createdAt updatedAt
  state { ...StateFields }
  parent { id }
  team { id }
  assignee { name displayName }
  labels { nodes { name } }
}
fragment IssueTree on Issue {
  ...IssueCore
  children {
    nodes {
      ...IssueCore
      children {
        nodes {
          ...IssueCore
          children {
            nodes { ...IssueCore subIssues: children(first: 1) { nodes { id } } }
            pageInfo { hasNextPage endCursor }
          }
        }
        pageInfo { hasNextPage endCursor }
      }
    }
    pageInfo { hasNextPage endCursor }
  }
}
"#
  };
}

const TEAMS_QUERY: &str = r#"
query Teams($first: Int!, $after: String) {
  teams(first: $first, after: $after) {
    nodes { id key name }
    pageInfo { hasNextPage endCursor }
  }
}
"#;

const TEAM_QUERY: &str = r#"
query Team($id: String!) {
  team(id: $id) {
    id key name
    states { nodes { id name type position color } }
  }
}
"#;

const STATE_ISSUES_QUERY: &str = concat!(
  r#"
query StateIssues($teamId: ID!, $stateId: ID!, $first: Int!, $after: String) {
  issues(
    filter: { team: { id: { eq: $teamId } }, state: { id: { eq: $stateId } } }
    first: $first
    after: $after
  ) {
    nodes { ...IssueTree }
    pageInfo { hasNextPage endCursor }
  }
}
"#,
  issue_fragments!()
);

const CHILD_ISSUES_QUERY: &str = concat!(
  r#"
query ChildIssues($parentId: ID!, $first: Int!, $after: String) {
  issues(filter: { parent: { id: { eq: $parentId } } }, first: $first, after: $after) {
    nodes { ...IssueTree }
    pageInfo { hasNextPage endCursor }
  }
}
"#,
  issue_fragments!()
);

const ISSUE_QUERY: &str = concat!(
  r#"
query Issue($id: String!) {
  issue(id: $id) { ...IssueTree }
}
"#,
  issue_fragments!()
);

const ISSUE_UPDATE_MUTATION: &str = concat!(
  r#"
mutation IssueUpdate($id: String!, $stateId: String!) {
  issueUpdate(id: $id, input: { stateId: $stateId }) {
    success
    issue { ...IssueTree }
  }
}
"#,
  issue_fragments!()
);

const COMMENT_CREATE_MUTATION: &str = r#"
mutation CommentCreate($issueId: String!, $body: String!) {
  commentCreate(input: { issueId: $issueId, body: $body }) { success }
}
"#;

/// Entity named in a not-found error.
type Lookup<'a> = Option<(&'static str, &'a str)>;

/// Linear GraphQL API client
#[derive(Clone)]
pub struct LinearClient {
  http: reqwest::Client,
  endpoint: Url,
  api_key: String,
  timeout: Duration,
  page_size: u32,
  max_retries: u32,
}

impl LinearClient {
  pub fn new(config: &Config) -> Result<Self> {
    let api_key = Config::get_api_key()?;
    Self::with_api_key(&config.linear, api_key)
  }

  pub fn with_api_key(config: &LinearConfig, api_key: String) -> Result<Self> {
    let endpoint = Url::parse(&config.url)
      .map_err(|e| eyre!("Invalid Linear URL {}: {}", config.url, e))?;

    let http = reqwest::Client::builder()
      .timeout(config.timeout())
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      http,
      endpoint,
      api_key,
      timeout: config.timeout(),
      page_size: config.page_size.max(1),
      max_retries: config.max_retries,
    })
  }

  fn transport_error(&self, err: reqwest::Error) -> EngineError {
    if err.is_timeout() {
      EngineError::UpstreamTimeout(self.timeout)
    } else if err.is_decode() {
      EngineError::MalformedData(format!("undecodable response: {}", err))
    } else {
      EngineError::upstream(err.to_string())
    }
  }

  /// Send one GraphQL request. No retries.
  async fn send<D: DeserializeOwned>(
    &self,
    query: &str,
    variables: &Value,
  ) -> Result<GraphQlResponse<D>, EngineError> {
    let response = self
      .http
      .post(self.endpoint.clone())
      .header(AUTHORIZATION, &self.api_key)
      .json(&json!({ "query": query, "variables": variables }))
      .send()
      .await
      .map_err(|e| self.transport_error(e))?;

    let status = response.status();
    if !status.is_success() {
      return Err(EngineError::Upstream {
        message: format!("HTTP {}", status),
        retriable: status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS,
      });
    }

    response
      .json::<GraphQlResponse<D>>()
      .await
      .map_err(|e| self.transport_error(e))
  }

  /// Run a read query, retrying retriable failures with exponential backoff.
  async fn query<D: DeserializeOwned>(
    &self,
    query: &str,
    variables: &Value,
    lookup: Lookup<'_>,
  ) -> Result<D, EngineError> {
    let mut attempt = 0;
    loop {
      let result = match self.send::<D>(query, variables).await {
        Ok(response) => into_data(response, lookup),
        Err(err) => Err(err),
      };

      match result {
        Err(err) if err.is_retriable() && attempt < self.max_retries => {
          attempt += 1;
          let backoff = RETRY_BASE_DELAY * 2u32.pow(attempt - 1);
          warn!(attempt, error = %err, ?backoff, "upstream read failed, retrying");
          tokio::time::sleep(backoff).await;
        }
        other => return other,
      }
    }
  }

  /// Run a mutation exactly once.
  async fn mutate<D: DeserializeOwned>(
    &self,
    query: &str,
    variables: &Value,
    lookup: Lookup<'_>,
  ) -> Result<D, EngineError> {
    let response = self.send::<D>(query, variables).await?;
    into_data(response, lookup)
  }

  /// Follow cursor pagination until the last page.
  async fn paginate<D, T>(
    &self,
    query: &str,
    mut variables: Value,
    extract: fn(D) -> ApiConnection<T>,
  ) -> Result<Vec<T>, EngineError>
  where
    D: DeserializeOwned,
  {
    let mut nodes = Vec::new();
    let mut after: Option<String> = None;

    for page in 0..MAX_PAGES {
      variables["first"] = json!(self.page_size);
      variables["after"] = json!(after);

      let connection = extract(self.query::<D>(query, &variables, None).await?);
      debug!(page, count = connection.nodes.len(), "fetched page");
      nodes.extend(connection.nodes);

      match connection.page_info {
        Some(PageInfo {
          has_next_page: true,
          end_cursor: Some(cursor),
        }) if after.as_ref() != Some(&cursor) => after = Some(cursor),
        _ => return Ok(nodes),
      }
    }

    Err(EngineError::MalformedData(format!(
      "pagination did not finish after {} pages",
      MAX_PAGES
    )))
  }

  /// Fill in sub-issues the query could not return in one response: trees
  /// nested deeper than the fragment and child lists longer than one page.
  fn complete_tree(
    &self,
    mut issue: ApiIssue,
    depth: usize,
  ) -> BoxFuture<'_, Result<ApiIssue, EngineError>> {
    async move {
      if depth > DEFAULT_MAX_DEPTH {
        return Err(EngineError::MalformedData(format!(
          "sub-issues of {} nest deeper than {} levels",
          issue.id, DEFAULT_MAX_DEPTH
        )));
      }

      let children = if issue.needs_children() {
        debug!(issue = %issue.id, depth, "fetching remaining sub-issues");
        self
          .paginate(
            CHILD_ISSUES_QUERY,
            json!({ "parentId": issue.id }),
            |data: IssuesData| data.issues,
          )
          .await?
      } else {
        issue.children.take().map(|c| c.nodes).unwrap_or_default()
      };

      let nodes = try_join_all(
        children
          .into_iter()
          .map(|child| self.complete_tree(child, depth + 1)),
      )
      .await?;
      issue.children = Some(ApiConnection {
        nodes,
        page_info: None,
      });
      issue.sub_issues = None;
      Ok(issue)
    }
    .boxed()
  }

  async fn complete_trees(&self, issues: Vec<ApiIssue>) -> Result<Vec<Issue>, EngineError> {
    try_join_all(issues.into_iter().map(|issue| self.complete_tree(issue, 0)))
      .await?
      .into_iter()
      .map(ApiIssue::into_issue)
      .collect()
  }

  async fn fetch_team(&self, team_id: &str) -> Result<ApiTeam, EngineError> {
    let data: TeamData = self
      .query(TEAM_QUERY, &json!({ "id": team_id }), Some(("Team", team_id)))
      .await?;
    data.team.ok_or_else(|| EngineError::not_found("Team", team_id))
  }
}

/// Unwrap a GraphQL response, turning `errors` into an [`EngineError`].
fn into_data<D>(response: GraphQlResponse<D>, lookup: Lookup<'_>) -> Result<D, EngineError> {
  if !response.errors.is_empty() {
    if let Some((entity, id)) = lookup {
      if response.errors.iter().all(|e| e.is_not_found()) {
        return Err(EngineError::not_found(entity, id));
      }
    }

    let message = response
      .errors
      .iter()
      .map(|e| e.message.as_str())
      .collect::<Vec<_>>()
      .join("; ");
    return Err(EngineError::Upstream {
      message,
      retriable: false,
    });
  }

  response
    .data
    .ok_or_else(|| EngineError::upstream("response carried no data"))
}

impl IssueSource for LinearClient {
  async fn list_teams(&self) -> Result<Vec<Team>, EngineError> {
    let teams = self
      .paginate(TEAMS_QUERY, json!({}), |data: TeamsData| data.teams)
      .await?;
    Ok(teams.into_iter().map(ApiTeam::into_team).collect())
  }

  async fn get_team(&self, team_id: &str) -> Result<Team, EngineError> {
    Ok(self.fetch_team(team_id).await?.into_team())
  }

  async fn team_states(&self, team_id: &str) -> Result<Vec<WorkflowState>, EngineError> {
    Ok(self.fetch_team(team_id).await?.into_states())
  }

  async fn state_issues(&self, team_id: &str, state_id: &str) -> Result<Vec<Issue>, EngineError> {
    let issues = self
      .paginate(
        STATE_ISSUES_QUERY,
        json!({ "teamId": team_id, "stateId": state_id }),
        |data: IssuesData| data.issues,
      )
      .await?;

    self.complete_trees(issues).await
  }

  async fn get_issue(&self, issue_id: &str) -> Result<Issue, EngineError> {
    let data: IssueData = self
      .query(ISSUE_QUERY, &json!({ "id": issue_id }), Some(("Issue", issue_id)))
      .await?;

    let issue = data
      .issue
      .ok_or_else(|| EngineError::not_found("Issue", issue_id))?;
    self.complete_tree(issue, 0).await?.into_issue()
  }

  async fn update_issue_state(&self, issue_id: &str, state_id: &str) -> Result<Issue, EngineError> {
    let data: IssueUpdateData = self
      .mutate(
        ISSUE_UPDATE_MUTATION,
        &json!({ "id": issue_id, "stateId": state_id }),
        Some(("Issue", issue_id)),
      )
      .await?;

    if !data.issue_update.success {
      return Err(EngineError::Upstream {
        message: format!("state update of issue {} was rejected", issue_id),
        retriable: false,
      });
    }

    let issue = data
      .issue_update
      .issue
      .ok_or_else(|| EngineError::upstream("state update returned no issue"))?;
    self.complete_tree(issue, 0).await?.into_issue()
  }

  async fn add_comment(&self, issue_id: &str, body: &str) -> Result<(), EngineError> {
    let data: CommentCreateData = self
      .mutate(
        COMMENT_CREATE_MUTATION,
        &json!({ "issueId": issue_id, "body": body }),
        Some(("Issue", issue_id)),
      )
      .await?;

    if !data.comment_create.success {
      return Err(EngineError::Upstream {
        message: format!("comment on issue {} was rejected", issue_id),
        retriable: false,
      });
    }
    Ok(())
  }
}
