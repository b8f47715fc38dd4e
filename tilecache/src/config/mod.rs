//! Engine configuration.
//!
//! [`TileCacheConfig`] gathers everything needed to bootstrap the engine:
//! where the disk tier lives, the three tier budgets and policies, the retry
//! policy and which cache areas fetched tiles go to. Values come from
//! [`Default`], the `with_*` builders, or an INI file via [`ConfigFile`].

mod file;
mod size;

pub use file::{ConfigFile, ConfigFileError};
pub use size::{format_size, parse_size, SizeParseError};

use std::path::PathBuf;

use crate::cache::{CacheAreas, TierConfig};
use crate::coordinator::RetryPolicy;
use crate::store::SCHEMA_VERSION;

/// Default disk tier budget (100 MB).
pub const DEFAULT_DISK_MAX_COST: u64 = 100 * 1024 * 1024;

/// Default decoded-memory tier budget (50 MB).
pub const DEFAULT_MEMORY_MAX_COST: u64 = 50 * 1024 * 1024;

/// Default upload tier budget (100 MB).
pub const DEFAULT_UPLOAD_MAX_COST: u64 = 100 * 1024 * 1024;

/// Platform cache directory plus `tilecache/tiles`.
///
/// Falls back to a relative `tilecache/tiles` when the platform has no
/// cache directory.
pub fn default_cache_root() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tilecache")
        .join("tiles")
}

/// Complete engine configuration.
#[derive(Debug, Clone)]
pub struct TileCacheConfig {
    /// Disk tier directory.
    pub cache_root: PathBuf,
    pub disk: TierConfig,
    pub memory: TierConfig,
    pub upload: TierConfig,
    pub retry: RetryPolicy,
    /// Tiers a fetched tile is written to.
    pub cache_areas: CacheAreas,
    /// Schema the disk tier must carry; a mismatch purges it.
    pub schema_version: u32,
}

impl Default for TileCacheConfig {
    fn default() -> Self {
        Self {
            cache_root: default_cache_root(),
            disk: TierConfig::new(DEFAULT_DISK_MAX_COST),
            memory: TierConfig::new(DEFAULT_MEMORY_MAX_COST),
            upload: TierConfig::new(DEFAULT_UPLOAD_MAX_COST),
            retry: RetryPolicy::default(),
            cache_areas: CacheAreas::ALL,
            schema_version: SCHEMA_VERSION,
        }
    }
}

impl TileCacheConfig {
    /// Defaults with the disk tier rooted at `cache_root`.
    pub fn new(cache_root: impl Into<PathBuf>) -> Self {
        Self {
            cache_root: cache_root.into(),
            ..Self::default()
        }
    }

    pub fn with_cache_root(mut self, cache_root: impl Into<PathBuf>) -> Self {
        self.cache_root = cache_root.into();
        self
    }

    pub fn with_disk(mut self, disk: TierConfig) -> Self {
        self.disk = disk;
        self
    }

    pub fn with_memory(mut self, memory: TierConfig) -> Self {
        self.memory = memory;
        self
    }

    pub fn with_upload(mut self, upload: TierConfig) -> Self {
        self.upload = upload;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_cache_areas(mut self, areas: CacheAreas) -> Self {
        self.cache_areas = areas;
        self
    }

    pub fn with_schema_version(mut self, version: u32) -> Self {
        self.schema_version = version;
        self
    }
}
