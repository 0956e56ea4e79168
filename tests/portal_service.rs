use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use portal_cache::cache::{SharedCache, TtlCache};
use portal_cache::config::Config;
use portal_cache::linear::fixture::Fixture;
use portal_cache::linear::types::{Issue, Team, WorkflowState};
use portal_cache::linear::{IssueSource, StaticSource};
use portal_cache::store::{keys, KvStore, MemoryStore};
use portal_cache::{EngineError, PortalService};

const FIXTURE: &str = r#"
teams:
  - id: t1
    key: ONE
    name: One
    states:
      - { id: todo, name: Todo, type: unstarted, position: 1 }
      - { id: doing, name: Doing, type: started, position: 2 }
      - { id: done, name: Done, type: completed, position: 3 }
  - { id: t2, key: TWO, name: Two }
  - { id: t3, key: THREE, name: Three }
issues:
  - { id: a, identifier: ONE-1, title: Epic, team_id: t1, state_id: doing }
  - { id: b, identifier: ONE-2, title: Story, team_id: t1, state_id: doing, parent: a }
  - { id: c, identifier: ONE-3, title: Task, team_id: t1, state_id: doing, parent: b }
  - { id: d, identifier: ONE-4, title: Split off, team_id: t1, state_id: todo, parent: a }
  - { id: e, identifier: ONE-5, title: Shipped, team_id: t1, state_id: done }
"#;

struct Portal {
  cache: SharedCache,
  source: Arc<StaticSource>,
  service: PortalService<MemoryStore, Arc<StaticSource>>,
}

async fn portal() -> Portal {
  portal_with(Config::default()).await
}

async fn portal_with(config: Config) -> Portal {
  let store = Arc::new(MemoryStore::new());
  for customer in ["c1", "c2"] {
    store
      .set(&keys::customer(customer), json!({ "name": customer }))
      .await
      .unwrap();
  }

  let fixture: Fixture = serde_yaml::from_str(FIXTURE).unwrap();
  let source = Arc::new(StaticSource::new(fixture));
  let cache: SharedCache = Arc::new(TtlCache::new(1_000, Duration::from_secs(300)));
  let service = PortalService::new(store, Arc::clone(&source), Arc::clone(&cache), &config);

  Portal {
    cache,
    source,
    service,
  }
}

fn team_ids(teams: &[Team]) -> Vec<&str> {
  teams.iter().map(|t| t.id.as_str()).collect()
}

#[tokio::test]
async fn test_available_teams_after_assignment() {
  let p = portal().await;

  let assigned = p.service.assign_team_to_customer("t1", "c1").await;
  assert!(assigned.success, "{:?}", assigned.error);

  let c1 = p.service.get_team_available_for_customer("c1").await;
  assert_eq!(team_ids(&c1.data.unwrap().available), vec!["t1", "t2", "t3"]);

  let c2 = p.service.get_team_available_for_customer("c2").await;
  assert_eq!(team_ids(&c2.data.unwrap().available), vec!["t2", "t3"]);
}

#[tokio::test]
async fn test_second_customer_gets_conflict() {
  let p = portal().await;
  assert!(p.service.assign_team_to_customer("t2", "c1").await.success);

  let second = p.service.assign_team_to_customer("t2", "c2").await;
  assert!(!second.success);
  assert!(second.data.is_none());
  let message = second.error.unwrap();
  assert_eq!(message, "Team is already assigned to another customer");
  assert!(!message.contains("c1"));
}

#[tokio::test]
async fn test_remove_frees_the_team() {
  let p = portal().await;
  assert!(p.service.assign_team_to_customer("t3", "c1").await.success);

  let customer_teams = p.service.get_customer_teams("c1").await.data.unwrap();
  assert_eq!(team_ids(&customer_teams), vec!["t3"]);

  let removal = p.service.remove_team_from_customer("t3", "c1").await.data.unwrap();
  assert!(removal.released);
  assert!(p.service.get_customer_teams("c1").await.data.unwrap().is_empty());

  let c2 = p.service.get_team_available_for_customer("c2").await;
  assert_eq!(team_ids(&c2.data.unwrap().available), vec!["t1", "t2", "t3"]);
}

#[tokio::test]
async fn test_board_is_cached_until_invalidated() {
  let p = portal().await;

  let board = p.service.get_team_issues_by_state("t1").await.data.unwrap();
  assert_eq!(board.states.len(), 3);
  let doing = &board.states[1];
  assert_eq!(doing.root_count, 1);
  assert_eq!(doing.sub_issue_count, 1);
  assert_eq!(doing.issues[0].issue.id, "a");
  assert_eq!(doing.issues[0].visible_children[0].issue.id, "b");
  assert_eq!(board.total_issues, 4);

  p.service.get_team_issues_by_state("t1").await;
  assert_eq!(p.source.call_count("state_issues:t1:"), 3);

  let invalidated = p.service.invalidate_issue_cache("t1").data.unwrap();
  assert_eq!(invalidated.removed, 1);

  p.service.get_team_issues_by_state("t1").await;
  assert_eq!(p.source.call_count("state_issues:t1:"), 6);
}

/// Source whose first bucket read is overtaken by an invalidation of the
/// team's boards, as when an issue is moved meanwhile.
struct MovedMidRead {
  inner: Arc<StaticSource>,
  cache: SharedCache,
  moved: AtomicBool,
}

impl IssueSource for MovedMidRead {
  async fn list_teams(&self) -> Result<Vec<Team>, EngineError> {
    self.inner.list_teams().await
  }

  async fn get_team(&self, team_id: &str) -> Result<Team, EngineError> {
    self.inner.get_team(team_id).await
  }

  async fn team_states(&self, team_id: &str) -> Result<Vec<WorkflowState>, EngineError> {
    self.inner.team_states(team_id).await
  }

  async fn state_issues(&self, team_id: &str, state_id: &str) -> Result<Vec<Issue>, EngineError> {
    let issues = self.inner.state_issues(team_id, state_id).await?;
    if !self.moved.swap(true, Ordering::SeqCst) {
      self.cache.delete_pattern(&format!("team:{}:issues*", team_id));
    }
    Ok(issues)
  }

  async fn get_issue(&self, issue_id: &str) -> Result<Issue, EngineError> {
    self.inner.get_issue(issue_id).await
  }

  async fn update_issue_state(&self, issue_id: &str, state_id: &str) -> Result<Issue, EngineError> {
    self.inner.update_issue_state(issue_id, state_id).await
  }

  async fn add_comment(&self, issue_id: &str, body: &str) -> Result<(), EngineError> {
    self.inner.add_comment(issue_id, body).await
  }
}

#[tokio::test]
async fn test_board_built_across_an_invalidation_is_not_cached() {
  let fixture: Fixture = serde_yaml::from_str(FIXTURE).unwrap();
  let inner = Arc::new(StaticSource::new(fixture));
  let cache: SharedCache = Arc::new(TtlCache::new(1_000, Duration::from_secs(300)));
  let source = MovedMidRead {
    inner: Arc::clone(&inner),
    cache: Arc::clone(&cache),
    moved: AtomicBool::new(false),
  };
  let service = PortalService::new(
    Arc::new(MemoryStore::new()),
    source,
    Arc::clone(&cache),
    &Config::default(),
  );

  assert!(service.get_team_issues_by_state("t1").await.success);
  assert!(cache.remaining_ttl(&keys::team_issues_by_state("t1")).is_none());

  service.get_team_issues_by_state("t1").await;
  service.get_team_issues_by_state("t1").await;
  assert_eq!(inner.call_count("state_issues:t1:"), 6);
}

#[tokio::test]
async fn test_partial_board_is_not_cached() {
  let p = portal().await;
  p.source.fail_state("done");

  let board = p.service.get_team_issues_by_state("t1").await;
  assert!(board.success);
  let board = board.data.unwrap();
  assert_eq!(board.failed_states, 1);
  assert!(board.states[2].error.is_some());

  p.service.get_team_issues_by_state("t1").await;
  assert_eq!(p.source.call_count("state_issues:t1:"), 6);
}

#[tokio::test]
async fn test_fail_fast_board() {
  let mut config = Config::default();
  config.aggregation.fail_fast = true;
  let p = portal_with(config).await;
  p.source.fail_state("todo");

  let board = p.service.get_team_issues_by_state("t1").await;
  assert!(!board.success);
  assert_eq!(board.error.as_deref(), Some("The issue tracker request failed"));
}

#[tokio::test]
async fn test_moving_an_issue_refreshes_detail_and_board() {
  let p = portal().await;

  let before = p.service.get_issue("e").await.data.unwrap();
  assert_eq!(before.state.id, "done");
  p.service.get_team_issues_by_state("t1").await;

  let moved = p.service.move_issue("e", "todo").await;
  assert!(moved.success);

  let after = p.service.get_issue("e").await.data.unwrap();
  assert_eq!(after.state.id, "todo");
  assert_eq!(p.source.call_count("get_issue:e"), 2);

  let board = p.service.get_team_issues_by_state("t1").await.data.unwrap();
  assert_eq!(board.states[0].root_count, 2);
  assert_eq!(board.states[2].root_count, 0);
}

#[tokio::test]
async fn test_comment_invalidates_issue_detail() {
  let p = portal().await;
  p.service.get_issue("a").await;

  let commented = p.service.comment_on_issue("a", "Looks good").await;
  assert!(commented.success);
  assert_eq!(p.source.comments("a"), vec!["Looks good"]);

  p.service.get_issue("a").await;
  assert_eq!(p.source.call_count("get_issue:a"), 2);
}

#[tokio::test]
async fn test_unknown_issue() {
  let p = portal().await;
  let response = p.service.get_issue("zzz").await;
  assert!(!response.success);
  assert_eq!(response.error.as_deref(), Some("Issue not found"));
}

#[tokio::test]
async fn test_cache_stats_report_hit_ratio() {
  let p = portal().await;
  p.service.get_team_issues_by_state("t1").await;
  p.cache.reset_stats();

  // Three board hits, then one detail miss
  for _ in 0..3 {
    assert!(p.service.get_team_issues_by_state("t1").await.success);
  }
  assert!(!p.service.get_issue("zzz").await.success);

  let stats = p.service.get_cache_stats().data.unwrap();
  assert_eq!(stats.hits, 3);
  assert_eq!(stats.misses, 1);
  assert!((stats.hit_ratio - 0.75).abs() < f64::EPSILON);
  assert_eq!(stats.max_entries, 1_000);
}
