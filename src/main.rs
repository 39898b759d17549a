mod commands;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::path::PathBuf;

use dashsync::{logging, Config, DataSavingMode};

#[derive(Parser, Debug)]
#[command(name = "dashsync")]
#[command(about = "Offline-aware sync for dashboard data on unreliable connections")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/dashsync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Cache database path (overrides cache.path)
  #[arg(long)]
  db: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Probe the API once and print connectivity state
  Status,
  /// Monitor connectivity and log transitions until Ctrl-C
  Watch,
  /// Sync one cache key from an endpoint and print the resulting snapshot
  Fetch {
    /// Cache key to store the response under
    key: String,
    /// Endpoint, absolute or relative to api.base_url
    endpoint: String,
  },
  /// Print the cached envelope for a key
  Show { key: String },
  /// Remove a key from the cache
  Clear { key: String },
  /// Show or set the data saving mode
  Mode {
    #[arg(value_parser = parse_mode)]
    mode: Option<DataSavingMode>,
  },
}

fn parse_mode(s: &str) -> Result<DataSavingMode, String> {
  s.parse()
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  let config = Config::load(args.config.as_deref())?;

  // Override cache path if specified on command line
  let config = if let Some(db) = args.db {
    let mut config = config;
    config.cache.path = Some(db);
    config
  } else {
    config
  };

  let _log_guard = logging::init(&config.log)?;

  let session = commands::Session::open(config)?;
  match args.command {
    Command::Status => session.status().await,
    Command::Watch => session.watch().await,
    Command::Fetch { key, endpoint } => session.fetch(&key, &endpoint).await,
    Command::Show { key } => session.show(&key),
    Command::Clear { key } => session.clear(&key),
    Command::Mode { mode } => session.mode(mode),
  }
}
