//! Tracing subscriber setup for the binary.

use color_eyre::{eyre::eyre, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Environment variable holding an `EnvFilter` directive.
pub const LOG_ENV: &str = "PORTAL_CACHE_LOG";

const DEFAULT_FILTER: &str = "info";

/// Pick the filter directive: environment first, then config, then `info`.
fn filter_directive(config: &LoggingConfig, env: Option<String>) -> String {
  env
    .filter(|d| !d.trim().is_empty())
    .or_else(|| config.filter.clone())
    .unwrap_or_else(|| DEFAULT_FILTER.to_string())
}

/// Install the global subscriber.
///
/// Logs go to stderr so stdout stays clean for JSON output, or to a daily
/// rolling file under `config.directory`. Keep the returned guard alive until
/// exit or buffered file output is lost.
pub fn init(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
  let directive = filter_directive(config, std::env::var(LOG_ENV).ok());
  let filter = EnvFilter::try_new(&directive)
    .map_err(|e| eyre!("Invalid log filter '{}': {}", directive, e))?;

  match &config.directory {
    Some(dir) => {
      std::fs::create_dir_all(dir)
        .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;
      let appender = tracing_appender::rolling::daily(dir, "portal-cache.log");
      let (writer, guard) = tracing_appender::non_blocking(appender);
      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .try_init()
        .map_err(|e| eyre!("Failed to install log subscriber: {}", e))?;
      Ok(Some(guard))
    }
    None => {
      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| eyre!("Failed to install log subscriber: {}", e))?;
      Ok(None)
    }
  }
}
