//! Team ownership: which customer a team belongs to.
//!
//! The backing store holds one record per assigned team
//! (`team:{team}:customer -> customer`). Reads go through a derived
//! team → customer map that is cached in memory, mirrored to the store as a
//! snapshot, and rebuilt from the records when both are missing or stale.
//! Writes take an in-process lock, use compare-and-set on the record and
//! verify the result before anything is invalidated.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::cache::{CacheLayer, CacheValue, Cacheable};
use crate::error::EngineError;
use crate::invalidation::{CacheEvent, Invalidator};
use crate::linear::source::IssueSource;
use crate::linear::types::Team;
use crate::store::{self, keys, KvStore};

/// Team id → owning customer id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OwnershipMap {
  owners: HashMap<String, String>,
}

impl OwnershipMap {
  pub fn owner_of(&self, team_id: &str) -> Option<&str> {
    self.owners.get(team_id).map(String::as_str)
  }

  /// Whether `customer_id` may see the team: unowned, or owned by them.
  pub fn is_available_to(&self, team_id: &str, customer_id: &str) -> bool {
    self.owner_of(team_id).map_or(true, |owner| owner == customer_id)
  }

  pub fn len(&self) -> usize {
    self.owners.len()
  }

  pub fn is_empty(&self) -> bool {
    self.owners.is_empty()
  }
}

impl FromIterator<(String, String)> for OwnershipMap {
  fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
    Self {
      owners: iter.into_iter().collect(),
    }
  }
}

impl Cacheable for OwnershipMap {
  fn into_value(value: Arc<Self>) -> CacheValue {
    CacheValue::Ownership(value)
  }

  fn from_value(value: &CacheValue) -> Option<Arc<Self>> {
    match value {
      CacheValue::Ownership(map) => Some(Arc::clone(map)),
      _ => None,
    }
  }

  fn entity_type() -> &'static str {
    "ownership"
  }
}

/// Persisted form of the map: `{data: [[team, customer], ...], timestamp}`
/// with the timestamp in epoch milliseconds.
#[derive(Debug, Serialize, Deserialize)]
struct OwnershipSnapshot {
  data: Vec<(String, String)>,
  timestamp: i64,
}

impl OwnershipSnapshot {
  fn of(map: &OwnershipMap) -> Self {
    let mut data: Vec<(String, String)> = map
      .owners
      .iter()
      .map(|(team, owner)| (team.clone(), owner.clone()))
      .collect();
    data.sort();
    Self {
      data,
      timestamp: Utc::now().timestamp_millis(),
    }
  }

  fn is_fresh(&self, ttl: Duration) -> bool {
    let age = Utc::now().timestamp_millis() - self.timestamp;
    age >= 0 && (age as u128) < ttl.as_millis()
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AvailableTeams {
  pub available: Vec<Team>,
}

pub struct OwnershipIndex<K, S> {
  store: Arc<K>,
  source: Arc<S>,
  cache: CacheLayer,
  invalidator: Invalidator,
  ttl: Duration,
  writes: Mutex<()>,
}

impl<K: KvStore, S: IssueSource> OwnershipIndex<K, S> {
  pub fn new(
    store: Arc<K>,
    source: Arc<S>,
    cache: CacheLayer,
    invalidator: Invalidator,
    ttl: Duration,
  ) -> Self {
    Self {
      store,
      source,
      cache,
      invalidator,
      ttl,
      writes: Mutex::new(()),
    }
  }

  /// Teams that are unowned or already owned by `customer_id`, in catalog
  /// order.
  pub async fn get_available_teams(&self, customer_id: &str) -> Result<AvailableTeams, EngineError> {
    let (teams, map) = futures::try_join!(self.source.list_teams(), self.ownership_map())?;
    let available = teams
      .into_iter()
      .filter(|team| map.is_available_to(&team.id, customer_id))
      .collect();
    Ok(AvailableTeams { available })
  }

  /// The current ownership map: cache, then persisted snapshot, then a full
  /// scan of the ownership records.
  ///
  /// A map read while an assignment or removal was landing is returned to
  /// the caller but neither cached nor persisted.
  pub async fn ownership_map(&self) -> Result<Arc<OwnershipMap>, EngineError> {
    if let Some(map) = self.cache.get::<OwnershipMap>(keys::OWNERSHIP_MAP) {
      return Ok(map);
    }

    let seen = self.cache.generation();
    let (map, rebuilt) = match self.load_snapshot().await {
      Some(map) => (Arc::new(map), false),
      None => (Arc::new(self.rebuild().await?), true),
    };

    // Writers invalidate under this lock, so no ownership write lands
    // between the check and the writes below.
    let _guard = self.writes.lock().await;
    if self.cache.generation() != seen {
      debug!("ownership changed during load, map not kept");
      return Ok(map);
    }
    if rebuilt {
      self.persist_snapshot(&map).await;
    }
    self.cache.put_if_unchanged(keys::OWNERSHIP_MAP, Arc::clone(&map), self.ttl, seen);
    Ok(map)
  }

  /// Give `team_id` to `customer_id`.
  ///
  /// Fails with `Conflict` when another customer owns the team. Assigning a
  /// team to its current owner succeeds and changes nothing.
  pub async fn assign(&self, team_id: &str, customer_id: &str) -> Result<(), EngineError> {
    let _guard = self.writes.lock().await;

    self.source.get_team(team_id).await?;
    if self.store.get(&keys::customer(customer_id)).await?.is_none() {
      return Err(EngineError::not_found("Customer", customer_id));
    }

    let owner_key = keys::team_owner(team_id);
    let current: Option<String> = store::get_typed(self.store.as_ref(), &owner_key).await?;
    match current {
      Some(owner) if owner != customer_id => {
        return Err(EngineError::Conflict {
          team_id: team_id.to_string(),
          owner_id: owner,
        })
      }
      Some(_) => debug!(team = team_id, customer = customer_id, "team already assigned"),
      None => {
        let written = self
          .store
          .compare_and_set(&owner_key, None, owner_value(customer_id))
          .await?;
        if !written {
          // Another writer got there first
          let owner: Option<String> = store::get_typed(self.store.as_ref(), &owner_key).await?;
          if let Some(owner) = owner.filter(|owner| owner != customer_id) {
            warn!(team = team_id, customer = customer_id, owner = %owner, "lost assignment race");
            return Err(EngineError::Conflict {
              team_id: team_id.to_string(),
              owner_id: owner,
            });
          }
        }
      }
    }

    let persisted: Option<String> = store::get_typed(self.store.as_ref(), &owner_key).await?;
    if persisted.as_deref() != Some(customer_id) {
      error!(
        team = team_id,
        customer = customer_id,
        persisted = ?persisted,
        "ownership record did not persist"
      );
      return Err(EngineError::CacheWriteFailure(owner_key));
    }

    let mut teams = self.customer_teams(customer_id).await?;
    if !teams.iter().any(|t| t == team_id) {
      teams.push(team_id.to_string());
      store::set_typed(self.store.as_ref(), &keys::customer_teams(customer_id), &teams).await?;
    }

    self.invalidate(team_id, customer_id).await?;
    info!(team = team_id, customer = customer_id, "team assigned");
    Ok(())
  }

  /// Take `team_id` away from `customer_id`.
  ///
  /// The ownership record is deleted only when it points at `customer_id`;
  /// the return value says whether that happened. The customer's team list
  /// and membership records under the pair are cleaned up either way.
  pub async fn remove(&self, team_id: &str, customer_id: &str) -> Result<bool, EngineError> {
    let _guard = self.writes.lock().await;

    let owner_key = keys::team_owner(team_id);
    let current: Option<String> = store::get_typed(self.store.as_ref(), &owner_key).await?;
    let released = match current.as_deref() {
      Some(owner) if owner == customer_id => self.store.delete(&owner_key).await?,
      Some(owner) => {
        warn!(team = team_id, customer = customer_id, owner, "team owned by someone else, record kept");
        false
      }
      None => false,
    };

    let teams = self.customer_teams(customer_id).await?;
    if teams.iter().any(|t| t == team_id) {
      let remaining: Vec<String> = teams.into_iter().filter(|t| t != team_id).collect();
      store::set_typed(self.store.as_ref(), &keys::customer_teams(customer_id), &remaining).await?;
    }

    let scope = keys::customer_team_scope(customer_id, team_id);
    let scoped = self.store.keys_with_prefix(&scope).await?;
    for key in &scoped {
      self.store.delete(key).await?;
    }

    self.invalidate(team_id, customer_id).await?;
    info!(
      team = team_id,
      customer = customer_id,
      released,
      memberships = scoped.len(),
      "team removed"
    );
    Ok(released)
  }

  /// Team ids listed for a customer; empty when the customer has none.
  pub async fn customer_teams(&self, customer_id: &str) -> Result<Vec<String>, EngineError> {
    let teams: Option<Vec<String>> =
      store::get_typed(self.store.as_ref(), &keys::customer_teams(customer_id)).await?;
    Ok(teams.unwrap_or_default())
  }

  async fn load_snapshot(&self) -> Option<OwnershipMap> {
    let value = match self.store.get(keys::OWNERSHIP_MAP).await {
      Ok(Some(value)) => value,
      Ok(None) => return None,
      Err(err) => {
        warn!(error = %err, "could not read ownership snapshot");
        return None;
      }
    };

    let snapshot: OwnershipSnapshot = match store::decode(keys::OWNERSHIP_MAP, value) {
      Ok(snapshot) => snapshot,
      Err(err) => {
        warn!(error = %err, "ignoring malformed ownership snapshot");
        return None;
      }
    };

    if !snapshot.is_fresh(self.ttl) {
      debug!("ownership snapshot is stale");
      return None;
    }
    debug!(teams = snapshot.data.len(), "ownership map loaded from snapshot");
    Some(snapshot.data.into_iter().collect())
  }

  async fn rebuild(&self) -> Result<OwnershipMap, EngineError> {
    let record_keys: Vec<String> = self
      .store
      .keys_with_prefix(keys::TEAM_PREFIX)
      .await?
      .into_iter()
      .filter(|key| keys::parse_team_owner(key).is_some())
      .collect();
    let values = self.store.mget(&record_keys).await?;

    let mut owners = HashMap::with_capacity(record_keys.len());
    for (key, value) in record_keys.iter().zip(values) {
      // Deleted between the scan and the read
      let Some(value) = value else { continue };
      let Some(team_id) = keys::parse_team_owner(key) else {
        continue;
      };
      let owner: String = store::decode(key, value)?;
      owners.insert(team_id.to_string(), owner);
    }

    info!(teams = owners.len(), "rebuilt ownership index from records");
    Ok(OwnershipMap { owners })
  }

  async fn persist_snapshot(&self, map: &OwnershipMap) {
    let result = store::set_typed(self.store.as_ref(), keys::OWNERSHIP_MAP, &OwnershipSnapshot::of(map)).await;
    if let Err(err) = result {
      warn!(error = %err, "could not persist ownership snapshot");
    }
  }

  async fn invalidate(&self, team_id: &str, customer_id: &str) -> Result<(), EngineError> {
    self.invalidator.emit(&CacheEvent::TeamOwnershipChanged {
      team_id: team_id.to_string(),
      customer_id: customer_id.to_string(),
    });
    self.store.delete(keys::OWNERSHIP_MAP).await?;
    Ok(())
  }
}

/// Raw value written for an ownership record.
pub fn owner_value(customer_id: &str) -> Value {
  json!(customer_id)
}
