//! Disk persistence for the disk cache tier.
//!
//! The store is a flat directory of tile files named by
//! [`encode_filename`] plus a `SCHEMA_VERSION` marker. It keeps no index of
//! its own: the disk [`CacheTier`](crate::cache::CacheTier) is the index, and
//! is rebuilt from [`TileStore::scan`] at startup.
//!
//! # Layout
//!
//! ```text
//! <cache root>/
//!   SCHEMA_VERSION            "1"
//!   osm-1-12-2048-1361.png
//!   osm-1-12-2049-1361.png
//!   ...
//! ```
//!
//! Writes go to `<name>.tmp` and are renamed into place, so a crash never
//! leaves a truncated tile under a valid name. Files whose names do not
//! decode are ignored, never deleted, except temp files.
//!
//! All operations are synchronous and are expected to run on the
//! coordinator task, which serializes them per tile.

mod filename;

pub use filename::{decode_filename, encode_filename, FilenameError};

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cache::Weighted;
use crate::tile::{TileFormat, TileId};

/// Name of the schema marker file in the cache root.
pub const SCHEMA_MARKER: &str = "SCHEMA_VERSION";

/// Current on-disk schema.
pub const SCHEMA_VERSION: u32 = 1;

const WRITE_PROBE: &str = ".write-probe";
const TEMP_EXTENSION: &str = "tmp";

/// Errors from disk store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The writability probe at open time failed.
    #[error("Cache directory is not writable: {0}")]
    ReadOnly(PathBuf),

    /// The id cannot be represented as a filename.
    #[error("Tile {0} cannot be stored on disk")]
    NotStorable(TileId),
}

/// A tile file known to the disk tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskEntry {
    pub path: PathBuf,
    pub format: TileFormat,
    /// File size in bytes.
    pub size: u64,
    /// Version of the tile whose bytes the file holds.
    pub version: i32,
}

impl Weighted for DiskEntry {
    fn weight(&self) -> u64 {
        self.size
    }
}

/// A tile found by a directory scan.
#[derive(Debug, Clone)]
pub struct ScannedTile {
    pub id: TileId,
    pub entry: DiskEntry,
}

/// Statistics from scanning the cache root.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PopulateStats {
    /// Number of tile files found.
    pub files_indexed: u64,
    /// Number of files skipped because their names do not decode.
    pub skipped_unparseable: u64,
    /// Total size of the indexed files in bytes.
    pub total_bytes: u64,
}

/// Result of [`TileStore::scan`].
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    pub tiles: Vec<ScannedTile>,
    pub stats: PopulateStats,
}

/// Tile files under one cache root.
#[derive(Debug, Clone)]
pub struct TileStore {
    root: PathBuf,
    writable: bool,
}

impl TileStore {
    /// Open (creating if needed) a cache root.
    ///
    /// Never fails: a root that cannot be created or written yields a
    /// read-only store, and the failure is logged.
    ///
    /// If a schema marker exists and names a different version, every tile
    /// file is deleted and the marker rewritten. A missing marker is simply
    /// written.
    ///
    /// # Arguments
    ///
    /// * `root` - Cache directory
    /// * `schema_version` - Schema the caller expects
    pub fn open(root: impl Into<PathBuf>, schema_version: u32) -> Self {
        let root = root.into();
        if let Err(e) = fs::create_dir_all(&root) {
            warn!(path = %root.display(), error = %e, "Failed to create cache directory");
        }

        let writable = probe_writable(&root);
        if !writable {
            warn!(path = %root.display(), "Cache directory is not writable, disk tier is read-only");
        }

        let store = Self { root, writable };
        store.check_schema(schema_version);
        store
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether the writability probe succeeded.
    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// Path a tile with the given format is stored at.
    pub fn path_for(&self, id: &TileId, format: &TileFormat) -> PathBuf {
        self.root.join(encode_filename(id, format))
    }

    /// List tile files in the cache root (non-recursive).
    ///
    /// File contents are not read; each entry is costed by its size. A scan
    /// failure is logged and produces an empty report.
    pub fn scan(&self) -> ScanReport {
        match self.try_scan() {
            Ok(report) => {
                info!(
                    path = %self.root.display(),
                    files = report.stats.files_indexed,
                    skipped = report.stats.skipped_unparseable,
                    bytes = report.stats.total_bytes,
                    "Disk cache scanned"
                );
                report
            }
            Err(e) => {
                warn!(path = %self.root.display(), error = %e, "Disk cache scan failed");
                ScanReport::default()
            }
        }
    }

    fn try_scan(&self) -> io::Result<ScanReport> {
        let mut report = ScanReport::default();

        for dir_entry in fs::read_dir(&self.root)? {
            let dir_entry = dir_entry?;
            let metadata = match dir_entry.metadata() {
                Ok(m) if m.is_file() => m,
                _ => continue,
            };
            let path = dir_entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                report.stats.skipped_unparseable += 1;
                continue;
            };
            if name == SCHEMA_MARKER || name == WRITE_PROBE {
                continue;
            }

            match decode_filename(name) {
                Ok((id, format)) => {
                    let size = metadata.len();
                    report.stats.files_indexed += 1;
                    report.stats.total_bytes += size;
                    report.tiles.push(ScannedTile {
                        id,
                        entry: DiskEntry {
                            path,
                            format,
                            size,
                            version: crate::tile::DEFAULT_VERSION,
                        },
                    });
                }
                Err(e) => {
                    if self.writable && is_temp_file(&path) {
                        debug!(path = %path.display(), "Removing stale temp file");
                        if let Err(e) = fs::remove_file(&path) {
                            warn!(path = %path.display(), error = %e, "Failed to remove stale temp file");
                        }
                    } else {
                        debug!(file = name, error = %e, "Skipping non-tile file");
                        report.stats.skipped_unparseable += 1;
                    }
                }
            }
        }

        // Duplicates of one tile come out in filename order.
        report
            .tiles
            .sort_by(|a, b| a.id.cmp(&b.id).then_with(|| a.entry.path.cmp(&b.entry.path)));
        Ok(report)
    }

    /// Write a tile atomically.
    ///
    /// Fails with [`StoreError::ReadOnly`] when the store is read-only and
    /// [`StoreError::NotStorable`] when the id has no filename.
    pub fn write(
        &self,
        id: &TileId,
        format: &TileFormat,
        bytes: &[u8],
    ) -> Result<DiskEntry, StoreError> {
        if !self.writable {
            return Err(StoreError::ReadOnly(self.root.clone()));
        }
        if !id.is_storable() {
            return Err(StoreError::NotStorable(id.clone()));
        }

        let path = self.path_for(id, format);
        let temp = path.with_extension(format!("{}.{}", format, TEMP_EXTENSION));
        fs::write(&temp, bytes)?;
        if let Err(e) = fs::rename(&temp, &path) {
            let _ = fs::remove_file(&temp);
            return Err(e.into());
        }

        Ok(DiskEntry {
            path,
            format: format.clone(),
            size: bytes.len() as u64,
            version: id.version(),
        })
    }

    /// Read a tile file's bytes.
    pub fn read(&self, entry: &DiskEntry) -> Result<Vec<u8>, StoreError> {
        Ok(fs::read(&entry.path)?)
    }

    /// Delete a tile file. A missing file is not an error.
    pub fn delete(&self, path: &Path) -> Result<(), StoreError> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete every tile file, returning how many were removed.
    ///
    /// Non-tile files and the schema marker are left alone.
    pub fn clear(&self) -> Result<usize, StoreError> {
        if !self.writable {
            return Err(StoreError::ReadOnly(self.root.clone()));
        }
        let report = self.try_scan()?;
        let mut removed = 0;
        for tile in &report.tiles {
            self.delete(&tile.entry.path)?;
            removed += 1;
        }
        info!(path = %self.root.display(), removed, "Disk cache cleared");
        Ok(removed)
    }

    fn check_schema(&self, version: u32) {
        let marker = self.root.join(SCHEMA_MARKER);
        match fs::read_to_string(&marker) {
            Ok(contents) if contents.trim() == version.to_string() => return,
            Ok(contents) => {
                info!(
                    found = contents.trim(),
                    expected = version,
                    "Cache schema changed, purging tiles"
                );
                if !self.writable {
                    warn!("Cannot purge tiles from a read-only cache directory");
                    return;
                }
                if let Err(e) = self.clear() {
                    warn!(error = %e, "Failed to purge tiles after schema change");
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path = %marker.display(), error = %e, "Failed to read schema marker");
                return;
            }
        }

        if self.writable {
            if let Err(e) = fs::write(&marker, format!("{}\n", version)) {
                warn!(path = %marker.display(), error = %e, "Failed to write schema marker");
            }
        }
    }
}

fn probe_writable(root: &Path) -> bool {
    let probe = root.join(WRITE_PROBE);
    match fs::write(&probe, b"") {
        Ok(()) => {
            let _ = fs::remove_file(&probe);
            true
        }
        Err(_) => false,
    }
}

fn is_temp_file(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some(TEMP_EXTENSION)
}
