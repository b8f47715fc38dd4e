//! Disk cache management CLI commands.

use std::path::{Path, PathBuf};

use clap::Subcommand;
use tilecache::config::{default_cache_root, format_size};
use tilecache::store::{TileStore, SCHEMA_VERSION};

use crate::error::CliError;

/// Cache action subcommands.
#[derive(Debug, Subcommand)]
pub enum CacheAction {
    /// Show disk cache statistics
    Stats {
        /// Cache directory (defaults to the platform cache directory)
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    /// List cached tiles
    List {
        /// Cache directory (defaults to the platform cache directory)
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    /// Delete every cached tile file
    Clear {
        /// Cache directory (defaults to the platform cache directory)
        #[arg(long)]
        dir: Option<PathBuf>,
    },
}

/// Run a cache subcommand.
pub fn run(action: CacheAction) -> Result<(), CliError> {
    match action {
        CacheAction::Stats { dir } => stats(&resolve(dir)),
        CacheAction::List { dir } => list(&resolve(dir)),
        CacheAction::Clear { dir } => clear(&resolve(dir)),
    }
}

fn resolve(dir: Option<PathBuf>) -> PathBuf {
    dir.unwrap_or_else(default_cache_root)
}

fn open(dir: &Path) -> Option<TileStore> {
    if !dir.is_dir() {
        println!("No disk cache at: {}", dir.display());
        return None;
    }
    Some(TileStore::open(dir, SCHEMA_VERSION))
}

fn stats(dir: &Path) -> Result<(), CliError> {
    println!("Disk cache: {}", dir.display());
    let Some(store) = open(dir) else {
        return Ok(());
    };

    let report = store.scan();
    println!("  Tiles:   {}", report.stats.files_indexed);
    println!("  Size:    {}", format_size(report.stats.total_bytes));
    if report.stats.skipped_unparseable > 0 {
        println!("  Skipped: {} unrecognised files", report.stats.skipped_unparseable);
    }
    if !store.is_writable() {
        println!("  (read-only)");
    }
    Ok(())
}

fn list(dir: &Path) -> Result<(), CliError> {
    let Some(store) = open(dir) else {
        return Ok(());
    };

    let report = store.scan();
    for tile in &report.tiles {
        println!(
            "{:<40} {:>6} {:>10}",
            tile.id.to_string(),
            tile.entry.format,
            format_size(tile.entry.size)
        );
    }
    println!("{} tiles", report.tiles.len());
    Ok(())
}

fn clear(dir: &Path) -> Result<(), CliError> {
    println!("Clearing disk cache at: {}", dir.display());
    let Some(store) = open(dir) else {
        return Ok(());
    };

    let before = store.scan().stats.total_bytes;
    let removed = store.clear()?;
    println!("Deleted {} files, freed {}", removed, format_size(before));
    Ok(())
}
