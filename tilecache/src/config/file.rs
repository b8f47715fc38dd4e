//! INI configuration file.
//!
//! ```ini
//! [cache]
//! directory = ~/.cache/tilecache/tiles
//! areas = disk,memory,upload
//!
//! [disk]
//! max_size = 100MB
//! cost = bytesize
//!
//! [memory]
//! max_size = 50MB
//! cold = ghost
//! warm_share = 0.25
//!
//! [upload]
//! max_size = 256
//! cost = unitary
//!
//! [retry]
//! max_attempts = 5
//! base_delay_ms = 500
//! max_delay_ms = 30000
//! ```
//!
//! Every key is optional; anything missing keeps its default. For a tier
//! using the `unitary` cost strategy, `max_size` is an entry count.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use ini::{Ini, Properties};
use thiserror::Error;

use super::size::parse_size;
use super::TileCacheConfig;
use crate::cache::{CacheAreas, ColdPolicy, CostStrategy, TierConfig};

/// Configuration file errors.
#[derive(Debug, Error)]
pub enum ConfigFileError {
    /// The file could not be read.
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid INI.
    #[error("Failed to parse config file: {0}")]
    Parse(String),

    /// A key holds a value that does not make sense.
    #[error("Invalid configuration: {section}.{key} = '{value}' - {reason}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
        reason: String,
    },
}

/// Parsed configuration file.
#[derive(Debug, Clone, Default)]
pub struct ConfigFile {
    pub config: TileCacheConfig,
}

impl ConfigFile {
    /// Load from `path`. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigFileError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path).map_err(|source| ConfigFileError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse_str(&text)
    }

    /// Parse INI text.
    pub fn parse_str(text: &str) -> Result<Self, ConfigFileError> {
        let ini = Ini::load_from_str(text).map_err(|e| ConfigFileError::Parse(e.to_string()))?;
        let mut config = TileCacheConfig::default();

        if let Some(section) = ini.section(Some("cache")) {
            if let Some(v) = section.get("directory") {
                let v = v.trim();
                if !v.is_empty() {
                    config.cache_root = expand_tilde(v);
                }
            }
            if let Some(areas) = parse_key::<CacheAreas>(section, "cache", "areas")? {
                config.cache_areas = areas;
            }
        }

        config.disk = parse_tier(&ini, "disk", config.disk)?;
        config.memory = parse_tier(&ini, "memory", config.memory)?;
        config.upload = parse_tier(&ini, "upload", config.upload)?;

        if let Some(section) = ini.section(Some("retry")) {
            if let Some(attempts) = parse_key::<u32>(section, "retry", "max_attempts")? {
                if attempts == 0 {
                    return Err(invalid("retry", "max_attempts", "0", "must be at least 1"));
                }
                config.retry.max_attempts = attempts;
            }
            if let Some(ms) = parse_key::<u64>(section, "retry", "base_delay_ms")? {
                config.retry.base_delay = Duration::from_millis(ms);
            }
            if let Some(ms) = parse_key::<u64>(section, "retry", "max_delay_ms")? {
                config.retry.max_delay = Some(Duration::from_millis(ms));
            }
        }

        Ok(Self { config })
    }

    pub fn into_config(self) -> TileCacheConfig {
        self.config
    }
}

fn parse_tier(ini: &Ini, name: &str, mut tier: TierConfig) -> Result<TierConfig, ConfigFileError> {
    let Some(section) = ini.section(Some(name)) else {
        return Ok(tier);
    };

    if let Some(v) = section.get("max_size") {
        tier.max_cost = parse_size(v).map_err(|e| invalid(name, "max_size", v, &e.to_string()))?;
    }
    if let Some(strategy) = parse_key::<CostStrategy>(section, name, "cost")? {
        tier = tier.with_cost_strategy(strategy);
    }
    if let Some(policy) = parse_key::<ColdPolicy>(section, name, "cold")? {
        tier = tier.with_cold_policy(policy);
    }
    if let Some(v) = section.get("warm_share") {
        let share: f64 = v
            .trim()
            .parse()
            .map_err(|_| invalid(name, "warm_share", v, "must be a number"))?;
        if !(0.0..=1.0).contains(&share) {
            return Err(invalid(name, "warm_share", v, "must be between 0.0 and 1.0"));
        }
        tier = tier.with_warm_share(share);
    }
    if let Some(capacity) = parse_key::<usize>(section, name, "ghost_capacity")? {
        tier = tier.with_ghost_capacity(capacity);
    }
    Ok(tier)
}

fn parse_key<T>(section: &Properties, name: &str, key: &str) -> Result<Option<T>, ConfigFileError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match section.get(key) {
        None => Ok(None),
        Some(v) => v
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| invalid(name, key, v, &e.to_string())),
    }
}

fn invalid(section: &str, key: &str, value: &str, reason: &str) -> ConfigFileError {
    ConfigFileError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

/// Expand a leading `~/` to the home directory.
pub(super) fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const MB: u64 = 1024 * 1024;

    #[test]
    fn test_empty_file_gives_defaults() {
        let file = ConfigFile::parse_str("").unwrap();
        let defaults = TileCacheConfig::default();
        assert_eq!(file.config.disk, defaults.disk);
        assert_eq!(file.config.retry, defaults.retry);
        assert_eq!(file.config.cache_areas, CacheAreas::ALL);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let file = ConfigFile::load(&dir.path().join("absent.ini")).unwrap();
        assert_eq!(file.config.memory.max_cost, 50 * MB);
    }

    #[test]
    fn test_full_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tilecache.ini");
        std::fs::write(
            &path,
            r#"
[cache]
directory = /var/cache/tiles
areas = disk,upload

[memory]
max_size = 8MB
cold = ghost
warm_share = 0.5
ghost_capacity = 64

[upload]
max_size = 256
cost = unitary

[retry]
max_attempts = 3
base_delay_ms = 250
max_delay_ms = 4000
"#,
        )
        .unwrap();

        let config = ConfigFile::load(&path).unwrap().into_config();
        assert_eq!(config.cache_root, PathBuf::from("/var/cache/tiles"));
        assert_eq!(config.cache_areas, CacheAreas::DISK | CacheAreas::UPLOAD);
        assert_eq!(config.memory.max_cost, 8 * MB);
        assert_eq!(config.memory.cold_policy, ColdPolicy::Ghost);
        assert_eq!(config.memory.warm_share, 0.5);
        assert_eq!(config.memory.ghost_capacity, 64);
        assert_eq!(config.upload.max_cost, 256);
        assert_eq!(config.upload.cost_strategy, CostStrategy::Unitary);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay, Duration::from_millis(250));
        assert_eq!(config.retry.max_delay, Some(Duration::from_millis(4000)));
        // Untouched sections keep their defaults.
        assert_eq!(config.disk, TileCacheConfig::default().disk);
    }

    #[test]
    fn test_invalid_size() {
        let err = ConfigFile::parse_str("[disk]\nmax_size = lots\n").unwrap_err();
        match err {
            ConfigFileError::InvalidValue { section, key, .. } => {
                assert_eq!(section, "disk");
                assert_eq!(key, "max_size");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_invalid_policies() {
        assert!(ConfigFile::parse_str("[memory]\ncold = sometimes\n").is_err());
        assert!(ConfigFile::parse_str("[upload]\ncost = weight\n").is_err());
        assert!(ConfigFile::parse_str("[memory]\nwarm_share = 1.5\n").is_err());
        assert!(ConfigFile::parse_str("[cache]\nareas = attic\n").is_err());
        assert!(ConfigFile::parse_str("[retry]\nmax_attempts = 0\n").is_err());
        assert!(ConfigFile::parse_str("[retry]\nbase_delay_ms = soon\n").is_err());
    }

    #[test]
    fn test_expand_tilde() {
        assert_eq!(expand_tilde("/abs/path"), PathBuf::from("/abs/path"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde("~/tiles"), home.join("tiles"));
        }
    }
}
