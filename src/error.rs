//! Error taxonomy shared by the cache, ownership and hierarchy components.
//!
//! The `Display` form of [`EngineError`] is meant for logs and may mention
//! store keys or upstream details. Anything shown to a portal user goes
//! through [`EngineError::user_message`] instead.

use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
  /// A referenced team, customer or issue does not exist.
  #[error("{entity} not found: {id}")]
  NotFound { entity: &'static str, id: String },

  /// The team is already owned by a different customer.
  #[error("team {team_id} is already owned by customer {owner_id}")]
  Conflict { team_id: String, owner_id: String },

  /// The issue tracker did not answer within the request budget.
  #[error("upstream request timed out after {0:?}")]
  UpstreamTimeout(Duration),

  /// The issue tracker answered with an error.
  #[error("upstream error: {message}")]
  Upstream { message: String, retriable: bool },

  /// A write to the backing store could not be read back.
  #[error("write verification failed: {0}")]
  CacheWriteFailure(String),

  /// A stored or fetched record does not have the expected shape.
  #[error("malformed data: {0}")]
  MalformedData(String),

  /// The backing store itself failed.
  #[error("store error: {0}")]
  Store(String),
}

impl EngineError {
  pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
    Self::NotFound {
      entity,
      id: id.into(),
    }
  }

  pub fn upstream(message: impl Into<String>) -> Self {
    Self::Upstream {
      message: message.into(),
      retriable: true,
    }
  }

  /// Whether repeating the same read request may succeed.
  pub fn is_retriable(&self) -> bool {
    match self {
      Self::UpstreamTimeout(_) => true,
      Self::Upstream { retriable, .. } => *retriable,
      _ => false,
    }
  }

  /// Message safe to hand to portal users verbatim.
  pub fn user_message(&self) -> String {
    match self {
      Self::NotFound { entity, .. } => format!("{} not found", entity),
      Self::Conflict { .. } => "Team is already assigned to another customer".to_string(),
      Self::UpstreamTimeout(_) => "The issue tracker did not respond in time".to_string(),
      Self::Upstream { .. } => "The issue tracker request failed".to_string(),
      Self::CacheWriteFailure(_) => "The change could not be saved, please retry".to_string(),
      Self::MalformedData(_) => "Received malformed data".to_string(),
      Self::Store(_) => "Storage is currently unavailable".to_string(),
    }
  }
}

impl From<serde_json::Error> for EngineError {
  fn from(err: serde_json::Error) -> Self {
    Self::MalformedData(err.to_string())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_user_message_hides_keys() {
    let err = EngineError::Conflict {
      team_id: "team-1".to_string(),
      owner_id: "customer-9".to_string(),
    };
    assert!(err.to_string().contains("customer-9"));
    assert!(!err.user_message().contains("customer-9"));

    let err = EngineError::CacheWriteFailure("team:team-1:customer".to_string());
    assert!(!err.user_message().contains("team:"));
  }

  #[test]
  fn test_retriable_classification() {
    assert!(EngineError::UpstreamTimeout(Duration::from_secs(5)).is_retriable());
    assert!(EngineError::upstream("502 Bad Gateway").is_retriable());
    assert!(!EngineError::Upstream {
      message: "401".to_string(),
      retriable: false
    }
    .is_retriable());
    assert!(!EngineError::not_found("Team", "t1").is_retriable());
    assert!(!EngineError::MalformedData("cycle".to_string()).is_retriable());
  }

  #[test]
  fn test_not_found_message() {
    assert_eq!(
      EngineError::not_found("Customer", "c-1").user_message(),
      "Customer not found"
    );
  }
}
