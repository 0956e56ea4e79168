use clap::{Parser, Subcommand};
use color_eyre::Result;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

use portal_cache::cache::{spawn_cleanup, SharedCache, TtlCache};
use portal_cache::config::Config;
use portal_cache::linear::{IssueSource, LinearClient, StaticSource};
use portal_cache::store::{KvStore, MemoryStore, SqliteStore};
use portal_cache::{logging, ApiResponse, PortalService};

#[derive(Parser, Debug)]
#[command(name = "portal-cache")]
#[command(about = "Team ownership and issue board engine for the customer portal")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/portal-cache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Teams a customer may be given: unowned or already theirs
  AvailableTeams { customer: String },
  /// Give a team to a customer
  Assign { team: String, customer: String },
  /// Take a team away from a customer
  Remove { team: String, customer: String },
  /// Teams on a customer's list
  CustomerTeams { customer: String },
  /// Kanban board of a team, one column per workflow state
  IssuesByState { team: String },
  /// One issue with its sub-issue tree
  Issue { id: String },
  /// Move an issue to another workflow state
  MoveIssue { id: String, state: String },
  /// Comment on an issue
  Comment { id: String, body: String },
  /// Drop cached boards of a team
  Invalidate { team: String },
  /// Cache hit/miss counters
  Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;
  let log_guard = logging::init(&config.logging)?;

  let cache: SharedCache = Arc::new(TtlCache::new(
    config.cache.max_entries,
    config.cache.default_ttl(),
  ));
  let sweeper = config
    .cache
    .cleanup_interval()
    .map(|every| spawn_cleanup(Arc::clone(&cache), every));

  let result = match &config.linear.fixture {
    Some(path) => with_store(StaticSource::from_path(path)?, cache, &config, args.command).await,
    None => with_store(LinearClient::new(&config)?, cache, &config, args.command).await,
  };

  if let Some(sweeper) = sweeper {
    sweeper.abort();
  }
  let success = result?;
  drop(log_guard);

  if !success {
    std::process::exit(1);
  }
  Ok(())
}

async fn with_store<S: IssueSource>(
  source: S,
  cache: SharedCache,
  config: &Config,
  command: Command,
) -> Result<bool> {
  if config.store.in_memory {
    run(Arc::new(MemoryStore::new()), source, cache, config, command).await
  } else {
    let store = SqliteStore::open(config.store.path.as_deref())?;
    run(Arc::new(store), source, cache, config, command).await
  }
}

/// Execute one command and print its envelope. Returns the envelope's
/// `success` flag.
async fn run<K: KvStore, S: IssueSource>(
  store: Arc<K>,
  source: S,
  cache: SharedCache,
  config: &Config,
  command: Command,
) -> Result<bool> {
  let service = PortalService::new(store, source, cache, config);

  match command {
    Command::AvailableTeams { customer } => {
      print(&service.get_team_available_for_customer(&customer).await)
    }
    Command::Assign { team, customer } => {
      print(&service.assign_team_to_customer(&team, &customer).await)
    }
    Command::Remove { team, customer } => {
      print(&service.remove_team_from_customer(&team, &customer).await)
    }
    Command::CustomerTeams { customer } => print(&service.get_customer_teams(&customer).await),
    Command::IssuesByState { team } => print(&service.get_team_issues_by_state(&team).await),
    Command::Issue { id } => print(&service.get_issue(&id).await),
    Command::MoveIssue { id, state } => print(&service.move_issue(&id, &state).await),
    Command::Comment { id, body } => print(&service.comment_on_issue(&id, &body).await),
    Command::Invalidate { team } => print(&service.invalidate_issue_cache(&team)),
    Command::Stats => print(&service.get_cache_stats()),
  }
}

fn print<T: Serialize>(response: &ApiResponse<T>) -> Result<bool> {
  println!("{}", serde_json::to_string_pretty(response)?);
  Ok(response.success)
}
