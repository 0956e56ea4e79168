use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub linear: LinearConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub store: StoreConfig,
  #[serde(default)]
  pub aggregation: AggregationConfig,
  #[serde(default)]
  pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LinearConfig {
  /// GraphQL endpoint
  pub url: String,
  /// Per-request budget; a hung upstream call fails after this long
  pub timeout_secs: u64,
  pub page_size: u32,
  /// Extra attempts for failed reads. Mutations are never retried.
  pub max_retries: u32,
  /// Serve issues from a fixture file instead of the network
  pub fixture: Option<PathBuf>,
}

impl Default for LinearConfig {
  fn default() -> Self {
    Self {
      url: "https://api.linear.app/graphql".to_string(),
      timeout_secs: 10,
      page_size: 50,
      max_retries: 2,
      fixture: None,
    }
  }
}

impl LinearConfig {
  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  pub max_entries: usize,
  pub default_ttl_secs: u64,
  pub ownership_ttl_secs: u64,
  pub issues_by_state_ttl_secs: u64,
  pub issue_detail_ttl_secs: u64,
  pub teams_ttl_secs: u64,
  /// Seconds between expired-entry sweeps; 0 disables the sweep
  pub cleanup_interval_secs: u64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      max_entries: 10_000,
      default_ttl_secs: 300,
      ownership_ttl_secs: 120,
      issues_by_state_ttl_secs: 180,
      issue_detail_ttl_secs: 60,
      teams_ttl_secs: 600,
      cleanup_interval_secs: 60,
    }
  }
}

impl CacheConfig {
  pub fn default_ttl(&self) -> Duration {
    Duration::from_secs(self.default_ttl_secs)
  }

  pub fn ownership_ttl(&self) -> Duration {
    Duration::from_secs(self.ownership_ttl_secs)
  }

  pub fn issues_by_state_ttl(&self) -> Duration {
    Duration::from_secs(self.issues_by_state_ttl_secs)
  }

  pub fn issue_detail_ttl(&self) -> Duration {
    Duration::from_secs(self.issue_detail_ttl_secs)
  }

  pub fn teams_ttl(&self) -> Duration {
    Duration::from_secs(self.teams_ttl_secs)
  }

  pub fn cleanup_interval(&self) -> Option<Duration> {
    (self.cleanup_interval_secs > 0).then(|| Duration::from_secs(self.cleanup_interval_secs))
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
  /// SQLite file (default: $XDG_DATA_HOME/portal-cache/store.db)
  pub path: Option<PathBuf>,
  /// Keep the store in memory; everything is lost on exit
  pub in_memory: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
  /// Fail the whole board when any single state cannot be fetched
  pub fail_fast: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
  /// Write daily-rotated log files here instead of stderr
  pub directory: Option<PathBuf>,
  /// EnvFilter directive, overridden by PORTAL_CACHE_LOG
  pub filter: Option<String>,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./portal-cache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/portal-cache/config.yaml
  ///
  /// Falls back to defaults when no file is found.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("portal-cache.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("portal-cache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    // An empty file is a valid, all-defaults config
    if contents.trim().is_empty() {
      return Ok(Self::default());
    }
    Ok(serde_yaml::from_str(contents)?)
  }

  /// Get the Linear API key from environment variables.
  ///
  /// Checks PORTAL_CACHE_API_KEY first, then LINEAR_API_KEY as fallback.
  pub fn get_api_key() -> Result<String> {
    std::env::var("PORTAL_CACHE_API_KEY")
      .or_else(|_| std::env::var("LINEAR_API_KEY"))
      .map_err(|_| {
        eyre!("Linear API key not found. Set PORTAL_CACHE_API_KEY or LINEAR_API_KEY environment variable.")
      })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_empty_config_uses_defaults() {
    let config = Config::parse("").unwrap();
    assert_eq!(config.linear.timeout(), Duration::from_secs(10));
    assert_eq!(config.cache.ownership_ttl(), Duration::from_secs(120));
    assert_eq!(config.cache.cleanup_interval(), Some(Duration::from_secs(60)));
    assert!(!config.aggregation.fail_fast);
    assert!(!config.store.in_memory);
  }

  #[test]
  fn test_partial_sections() {
    let config = Config::parse(
      r#"
linear:
  timeout_secs: 3
cache:
  issue_detail_ttl_secs: 15
  cleanup_interval_secs: 0
aggregation:
  fail_fast: true
store:
  in_memory: true
"#,
    )
    .unwrap();

    assert_eq!(config.linear.timeout(), Duration::from_secs(3));
    assert_eq!(config.linear.page_size, 50);
    assert_eq!(config.cache.issue_detail_ttl(), Duration::from_secs(15));
    assert_eq!(config.cache.teams_ttl(), Duration::from_secs(600));
    assert_eq!(config.cache.cleanup_interval(), None);
    assert!(config.aggregation.fail_fast);
    assert!(config.store.in_memory);
  }

  #[test]
  fn test_missing_explicit_path_is_an_error() {
    let result = Config::load(Some(Path::new("/definitely/not/here.yaml")));
    assert!(result.is_err());
  }
}
