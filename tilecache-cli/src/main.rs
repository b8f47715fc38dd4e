//! Tilecache CLI - Command-line interface
//!
//! Inspect and clear an on-disk tile cache, or pull a block of tiles from
//! an HTTP tile server through the full caching engine.

mod commands;
mod error;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tilecache::logging::{default_log_dir, default_log_file, init_logging};
use tracing::debug;

use commands::cache::CacheAction;
use commands::fetch::FetchArgs;
use error::CliError;

#[derive(Parser)]
#[command(name = "tilecache")]
#[command(version, about = "Multi-tier map tile cache", long_about = None)]
struct Cli {
    /// Directory for the log file
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Log at debug level (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage the disk cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
    /// Fetch a range of tiles through the cache
    Fetch(FetchArgs),
}

fn main() {
    let cli = Cli::parse();

    let log_dir = cli.log_dir.unwrap_or_else(default_log_dir);
    let level = if cli.verbose { "debug" } else { "info" };
    let logging_guard = match init_logging(&log_dir, default_log_file(), level) {
        Ok(guard) => guard,
        Err(e) => CliError::LoggingInit(e).exit(),
    };

    debug!(log_dir = %log_dir.display(), "Logging initialized");

    let result = match cli.command {
        Commands::Cache { action } => commands::cache::run(action),
        Commands::Fetch(args) => commands::fetch::run(args),
    };

    if let Err(e) = result {
        drop(logging_guard);
        e.exit();
    }
}
