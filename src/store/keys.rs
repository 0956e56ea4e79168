//! Key layout for the backing store and the shared cache.
//!
//! Every key string the engine reads or writes is built here.

/// Ownership record: `team:{team}:customer -> customer id`.
pub fn team_owner(team_id: &str) -> String {
  format!("team:{}:customer", team_id)
}

/// Prefix scanned when rebuilding the ownership index.
pub const TEAM_PREFIX: &str = "team:";

/// Extract the team id from an ownership record key.
pub fn parse_team_owner(key: &str) -> Option<&str> {
  key
    .strip_prefix(TEAM_PREFIX)?
    .strip_suffix(":customer")
    .filter(|id| !id.is_empty() && !id.contains(':'))
}

/// Customer record, written by the admin layer.
pub fn customer(customer_id: &str) -> String {
  format!("customer:{}", customer_id)
}

/// Team ids assigned to a customer: `customer:{id}:teams -> [team id]`.
pub fn customer_teams(customer_id: &str) -> String {
  format!("customer:{}:teams", customer_id)
}

/// Prefix of membership records scoped to one customer/team pair.
pub fn customer_team_scope(customer_id: &str, team_id: &str) -> String {
  format!("customer:{}:team:{}:", customer_id, team_id)
}

/// Persisted ownership snapshot, and the cache key of the in-memory copy.
pub const OWNERSHIP_MAP: &str = "team_ownership_map:all";

/// Team catalog fetched from the issue tracker.
pub const TEAMS_ALL: &str = "teams:all";

pub fn team_states(team_id: &str) -> String {
  format!("team:{}:states", team_id)
}

pub fn team_issues_by_state(team_id: &str) -> String {
  format!("team:{}:issues_by_state", team_id)
}

pub fn issue_detail(issue_id: &str) -> String {
  format!("issue:{}", issue_id)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_team_owner() {
    assert_eq!(parse_team_owner(&team_owner("abc")), Some("abc"));
    assert_eq!(parse_team_owner("team:abc:states"), None);
    assert_eq!(parse_team_owner("team::customer"), None);
    assert_eq!(parse_team_owner("team:a:b:customer"), None);
    assert_eq!(parse_team_owner("customer:abc"), None);
  }
}
