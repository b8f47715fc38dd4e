//! `tilecache fetch`: pull a block of tiles through the engine.
//!
//! Registers a single viewer whose visible set is the requested range, then
//! waits for every tile to be delivered from cache or network, or to fail.

use std::collections::HashSet;
use std::path::PathBuf;
use std::str::FromStr;

use clap::Args;
use tilecache::config::{format_size, ConfigFile, TileCacheConfig};
use tilecache::coordinator::ViewerEvent;
use tilecache::fetcher::{HttpFetcher, UrlTemplate};
use tilecache::{TileCacheApp, TileFormat, TileId};
use tokio::runtime::Runtime;

use crate::error::CliError;

/// Upper bound on tiles per invocation.
const MAX_TILES: usize = 10_000;

/// Inclusive coordinate range, written `a..b` or a single `n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRange {
    pub start: i32,
    pub end: i32,
}

impl TileRange {
    fn len(&self) -> usize {
        (self.end as i64 - self.start as i64 + 1) as usize
    }
}

impl FromStr for TileRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse = |v: &str| {
            v.trim()
                .parse::<i32>()
                .map_err(|_| format!("'{}' is not a tile coordinate", v.trim()))
        };
        let (start, end) = match s.split_once("..") {
            Some((a, b)) => (parse(a)?, parse(b.strip_prefix('=').unwrap_or(b))?),
            None => {
                let n = parse(s)?;
                (n, n)
            }
        };
        if start > end {
            return Err(format!("range {}..{} is empty", start, end));
        }
        Ok(Self { start, end })
    }
}

/// Arguments for `tilecache fetch`.
#[derive(Debug, Args)]
pub struct FetchArgs {
    /// URL template, e.g. https://tile.example.com/{z}/{x}/{y}.png
    #[arg(long)]
    pub url: String,

    /// Provider name used in tile ids and filenames
    #[arg(long)]
    pub provider: String,

    /// Map id
    #[arg(long, default_value = "0")]
    pub map_id: i32,

    /// Zoom level
    #[arg(long)]
    pub zoom: i32,

    /// Column range, inclusive (e.g. 10..12)
    #[arg(long)]
    pub x: TileRange,

    /// Row range, inclusive (e.g. 20..21)
    #[arg(long)]
    pub y: TileRange,

    /// Format tag of the downloaded payloads
    #[arg(long, default_value = "png")]
    pub format: String,

    /// INI configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Cache directory (overrides the configuration file)
    #[arg(long)]
    pub dir: Option<PathBuf>,
}

impl FetchArgs {
    fn tiles(&self) -> Result<HashSet<TileId>, CliError> {
        let count = self.x.len().saturating_mul(self.y.len());
        if count > MAX_TILES {
            return Err(CliError::InvalidArgument(format!(
                "{} tiles requested, at most {} per run",
                count, MAX_TILES
            )));
        }
        let mut tiles = HashSet::with_capacity(count);
        for x in self.x.start..=self.x.end {
            for y in self.y.start..=self.y.end {
                tiles.insert(TileId::new(self.provider.as_str(), self.map_id, self.zoom, x, y));
            }
        }
        Ok(tiles)
    }

    fn config(&self) -> Result<TileCacheConfig, CliError> {
        let mut config = match &self.config {
            Some(path) => ConfigFile::load(path)?.into_config(),
            None => TileCacheConfig::default(),
        };
        if let Some(dir) = &self.dir {
            config = config.with_cache_root(dir);
        }
        Ok(config)
    }
}

/// Run the fetch command on a dedicated runtime.
pub fn run(args: FetchArgs) -> Result<(), CliError> {
    let runtime = Runtime::new().map_err(CliError::Runtime)?;
    runtime.block_on(fetch(args))
}

async fn fetch(args: FetchArgs) -> Result<(), CliError> {
    let tiles = args.tiles()?;
    let config = args.config()?;
    let template = UrlTemplate::parse(&args.url)?;
    let format = TileFormat::new(&args.format).ok_or_else(|| {
        CliError::InvalidArgument(format!("'{}' is not a valid format tag", args.format))
    })?;

    println!("Cache directory: {}", config.cache_root.display());
    let app = TileCacheApp::start(config, move |reporter| {
        HttpFetcher::new(template, format, reporter)
    })
    .await?;

    let handle = app.handle();
    let (viewer, mut events) = handle.register_viewer().await?;
    let total = tiles.len();
    let mut outstanding = tiles.clone();

    for tile in handle.set_visible_tiles(viewer, tiles).await? {
        println!("  cached  {}", tile.id);
        outstanding.remove(&tile.id);
    }

    let mut failed = 0;
    while !outstanding.is_empty() {
        tokio::select! {
            event = events.recv() => match event {
                Some(ViewerEvent::TileReady(tile)) => {
                    if outstanding.remove(&tile.id) {
                        println!(
                            "  fetched {} ({}x{})",
                            tile.id,
                            tile.image.width(),
                            tile.image.height()
                        );
                    }
                }
                Some(ViewerEvent::TileFailed { id, message }) => {
                    if outstanding.remove(&id) {
                        println!("  failed  {}: {}", id, message);
                        failed += 1;
                    }
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                println!("Interrupted, {} tiles still outstanding", outstanding.len());
                break;
            }
        }
    }

    let stats = handle.stats().await?;
    println!();
    println!(
        "Requests: {}  Retries: {}  Cache hits: {}",
        stats.coordinator.requests, stats.coordinator.retries, stats.coordinator.cache_hits
    );
    let tiers = [
        ("disk", &stats.cache.disk),
        ("memory", &stats.cache.memory),
        ("upload", &stats.cache.upload),
    ];
    for (name, tier) in tiers {
        println!(
            "  {:<7} {} tiles, {} of {}",
            name,
            tier.entry_count,
            format_size(tier.total_cost),
            format_size(tier.max_cost)
        );
    }

    handle.remove_viewer(viewer)?;
    app.shutdown().await;

    if failed > 0 {
        return Err(CliError::TilesFailed { failed, total });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(x: &str, y: &str) -> FetchArgs {
        FetchArgs {
            url: "http://localhost/{z}/{x}/{y}.png".to_string(),
            provider: "osm".to_string(),
            map_id: 0,
            zoom: 5,
            x: x.parse().unwrap(),
            y: y.parse().unwrap(),
            format: "png".to_string(),
            config: None,
            dir: None,
        }
    }

    #[test]
    fn test_parse_range() {
        assert_eq!("3..5".parse::<TileRange>(), Ok(TileRange { start: 3, end: 5 }));
        assert_eq!("3..=5".parse::<TileRange>(), Ok(TileRange { start: 3, end: 5 }));
        assert_eq!("7".parse::<TileRange>(), Ok(TileRange { start: 7, end: 7 }));
        assert_eq!("-2..1".parse::<TileRange>().unwrap().len(), 4);
        assert!("5..3".parse::<TileRange>().is_err());
        assert!("a..b".parse::<TileRange>().is_err());
    }

    #[test]
    fn test_tiles_cover_range() {
        let tiles = args("1..2", "10..12").tiles().unwrap();
        assert_eq!(tiles.len(), 6);
        assert!(tiles.contains(&TileId::new("osm", 0, 5, 2, 12)));
    }

    #[test]
    fn test_too_many_tiles() {
        assert!(matches!(
            args("0..1000", "0..1000").tiles(),
            Err(CliError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_dir_overrides_config() {
        let mut a = args("0", "0");
        a.dir = Some(PathBuf::from("/tmp/elsewhere"));
        assert_eq!(a.config().unwrap().cache_root, PathBuf::from("/tmp/elsewhere"));
    }
}
