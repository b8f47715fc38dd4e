//! The three cache tiers and the lookup/promotion path.
//!
//! ```text
//!   lookup:  upload ──miss──► memory ──miss──► disk ──miss──► Miss
//!              ▲                 │ hit           │ hit (read + decode)
//!              └──── promote ────┴───────────────┘
//! ```
//!
//! [`TileCaches`] owns a disk tier (file metadata, bytes on disk through
//! [`TileStore`]), a decoded-memory tier and an upload-ready tier. Which of
//! them participate in a lookup or store is chosen per call with
//! [`CacheAreas`].

use std::fmt;
use std::ops::BitOr;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use tracing::{debug, warn};

use super::handoff::{Handoff, HandoffQueue, UploadHandle, UploadResource};
use super::policy::{CostStrategy, EvictionCause, TierConfig, UnknownVariant};
use super::stats::CacheStats;
use super::tier::{CacheEntry, CacheTier};
use crate::store::{DiskEntry, ScanReport, TileStore};
use crate::tile::{DecodeError, DecodedImage, TileFormat, TileId};

/// Set of cache tiers an operation applies to.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheAreas(u8);

impl CacheAreas {
    pub const NONE: CacheAreas = CacheAreas(0);
    pub const DISK: CacheAreas = CacheAreas(0b001);
    pub const MEMORY: CacheAreas = CacheAreas(0b010);
    pub const UPLOAD: CacheAreas = CacheAreas(0b100);
    pub const ALL: CacheAreas = CacheAreas(0b111);

    /// Whether every area in `other` is included.
    pub fn contains(self, other: CacheAreas) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl Default for CacheAreas {
    fn default() -> Self {
        Self::ALL
    }
}

impl BitOr for CacheAreas {
    type Output = CacheAreas;

    fn bitor(self, rhs: Self) -> Self::Output {
        CacheAreas(self.0 | rhs.0)
    }
}

impl fmt::Debug for CacheAreas {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CacheAreas({})", self)
    }
}

impl fmt::Display for CacheAreas {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        let names: Vec<&str> = [
            (CacheAreas::DISK, "disk"),
            (CacheAreas::MEMORY, "memory"),
            (CacheAreas::UPLOAD, "upload"),
        ]
        .into_iter()
        .filter(|(area, _)| self.contains(*area))
        .map(|(_, name)| name)
        .collect();
        f.write_str(&names.join(","))
    }
}

impl FromStr for CacheAreas {
    type Err = UnknownVariant;

    /// Parse `all`, `none`, or a comma-separated list of
    /// `disk`, `memory` and `upload`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut areas = CacheAreas::NONE;
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            areas = areas
                | match part.to_ascii_lowercase().as_str() {
                    "all" => CacheAreas::ALL,
                    "none" => CacheAreas::NONE,
                    "disk" => CacheAreas::DISK,
                    "memory" => CacheAreas::MEMORY,
                    "upload" | "texture" => CacheAreas::UPLOAD,
                    other => {
                        return Err(UnknownVariant {
                            kind: "cache area",
                            value: other.to_string(),
                        })
                    }
                };
        }
        Ok(areas)
    }
}

/// Tier a lookup was served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileOrigin {
    Upload,
    Memory,
    Disk,
    /// Freshly fetched.
    Network,
}

/// A tile available to viewers.
#[derive(Debug, Clone)]
pub struct CachedTile {
    pub id: TileId,
    pub image: Arc<DecodedImage>,
    /// Upload resource staged for this tile, if the upload tier holds it.
    pub upload: Option<UploadHandle>,
    pub origin: TileOrigin,
}

/// Outcome of [`TileCaches::lookup`].
#[derive(Debug, Clone)]
pub enum Lookup {
    Hit(CachedTile),
    Miss,
    /// A cached copy existed but could not be read or decoded; it has been
    /// removed.
    Corrupt,
}

/// Disk, memory and upload tiers together.
pub struct TileCaches {
    store: Option<TileStore>,
    disk: CacheTier<DiskEntry>,
    memory: CacheTier<Arc<DecodedImage>>,
    upload: CacheTier<UploadResource>,
    handoff: HandoffQueue,
    next_handle: u64,
}

impl TileCaches {
    /// Build the tiers.
    ///
    /// # Arguments
    ///
    /// * `store` - Backing store for the disk tier; `None` disables disk caching
    /// * `disk` / `memory` / `upload` - Per-tier configuration
    pub fn new(
        store: Option<TileStore>,
        disk: TierConfig,
        memory: TierConfig,
        upload: TierConfig,
    ) -> Self {
        let disk_store = store.clone();
        let disk = CacheTier::new("disk", disk).with_eviction_listener(
            move |id: &TileId, entry: &CacheEntry<DiskEntry>, cause| {
                // A replacement was written to the same path.
                if cause == EvictionCause::Replaced {
                    return;
                }
                if let Some(store) = &disk_store {
                    if let Err(e) = store.delete(&entry.payload().path) {
                        warn!(tile = %id, error = %e, "Failed to delete evicted tile file");
                    }
                }
            },
        );

        let handoff = HandoffQueue::new();
        let release = handoff.clone();
        let upload = CacheTier::new("upload", upload).with_eviction_listener(
            move |id: &TileId, entry: &CacheEntry<UploadResource>, _cause| {
                release.push(Handoff::Release {
                    id: id.clone(),
                    handle: entry.payload().handle,
                });
            },
        );

        Self {
            store,
            disk,
            memory: CacheTier::new("memory", memory),
            upload,
            handoff,
            next_handle: 1,
        }
    }

    pub fn tile_store(&self) -> Option<&TileStore> {
        self.store.as_ref()
    }

    pub fn disk(&self) -> &CacheTier<DiskEntry> {
        &self.disk
    }

    pub fn memory(&self) -> &CacheTier<Arc<DecodedImage>> {
        &self.memory
    }

    pub fn upload(&self) -> &CacheTier<UploadResource> {
        &self.upload
    }

    /// Queue the render side drains to apply upload-tier changes.
    pub fn handoff(&self) -> HandoffQueue {
        self.handoff.clone()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            disk: self.disk.stats(),
            memory: self.memory.stats(),
            upload: self.upload.stats(),
        }
    }

    /// Register scanned disk files with the disk tier.
    ///
    /// Only one file per tile is kept: a second file for an already loaded
    /// tile (same name, other format) is deleted, as is a file the tier
    /// rejects, so every tile file left on disk is charged to the tier.
    /// Returns how many were admitted.
    pub fn load_scan(&mut self, report: ScanReport) -> usize {
        let mut loaded = 0;
        for tile in report.tiles {
            if self.disk.contains(&tile.id) {
                debug!(tile = %tile.id, path = %tile.entry.path.display(), "Removing duplicate tile file");
                self.delete_file(&tile.id, &tile.entry.path);
                continue;
            }
            let path = tile.entry.path.clone();
            match self.disk.insert(tile.id.clone(), tile.entry) {
                Ok(()) => loaded += 1,
                Err(e) => {
                    debug!(tile = %tile.id, error = %e, "Removing scanned tile the disk tier rejected");
                    self.delete_file(&tile.id, &path);
                }
            }
        }
        loaded
    }

    /// Whether `id` is resident in any of `areas`.
    pub fn contains(&self, id: &TileId, areas: CacheAreas) -> bool {
        (areas.contains(CacheAreas::UPLOAD) && self.upload.contains(id))
            || (areas.contains(CacheAreas::MEMORY) && self.memory.contains(id))
            || (areas.contains(CacheAreas::DISK) && self.disk_version_matches(id))
    }

    /// Look a tile up, upload tier first.
    ///
    /// A hit in a lower tier is promoted into every higher tier in `areas`.
    /// A disk copy that fails to read or decode is removed and reported as
    /// [`Lookup::Corrupt`].
    pub fn lookup(&mut self, id: &TileId, areas: CacheAreas) -> Lookup {
        if areas.contains(CacheAreas::UPLOAD) {
            if let Some(entry) = self.upload.get(id) {
                let resource = entry.payload();
                return Lookup::Hit(CachedTile {
                    id: id.clone(),
                    image: resource.image.clone(),
                    upload: Some(resource.handle),
                    origin: TileOrigin::Upload,
                });
            }
        }

        if areas.contains(CacheAreas::MEMORY) {
            if let Some(entry) = self.memory.get(id) {
                let image = entry.payload().clone();
                let upload = self.stage_if(areas, id, &image);
                return Lookup::Hit(CachedTile {
                    id: id.clone(),
                    image,
                    upload,
                    origin: TileOrigin::Memory,
                });
            }
        }

        if areas.contains(CacheAreas::DISK) {
            return self.lookup_disk(id, areas);
        }

        Lookup::Miss
    }

    fn lookup_disk(&mut self, id: &TileId, areas: CacheAreas) -> Lookup {
        let key = id.disk_key();
        // Another version owns the file: a miss, without promoting it.
        if self
            .disk
            .peek(&key)
            .is_some_and(|e| e.payload().version != id.version())
        {
            self.disk.record_miss();
            return Lookup::Miss;
        }
        let entry = match self.disk.get(&key) {
            Some(e) => e.payload().clone(),
            None => return Lookup::Miss,
        };
        let Some(store) = &self.store else {
            return Lookup::Miss;
        };

        let decoded = store
            .read(&entry)
            .map_err(|e| e.to_string())
            .and_then(|bytes| {
                DecodedImage::decode(&bytes, &entry.format).map_err(|e| e.to_string())
            });
        let image = match decoded {
            Ok(image) => Arc::new(image),
            Err(reason) => {
                warn!(tile = %id, path = %entry.path.display(), reason = %reason, "Removing unreadable disk tile");
                self.disk.remove(&key);
                return Lookup::Corrupt;
            }
        };

        if areas.contains(CacheAreas::MEMORY) {
            if let Err(e) = self.memory.insert(id.clone(), image.clone()) {
                debug!(tile = %id, error = %e, "Not promoting to memory");
            }
        }
        let upload = self.stage_if(areas, id, &image);

        Lookup::Hit(CachedTile {
            id: id.clone(),
            image,
            upload,
            origin: TileOrigin::Disk,
        })
    }

    /// Decode a fetched payload and insert it into `areas`.
    ///
    /// Fails only if the payload does not decode; nothing is cached then.
    /// Disk write failures are logged and the other tiers are still filled.
    pub fn store(
        &mut self,
        id: &TileId,
        bytes: &[u8],
        format: &TileFormat,
        areas: CacheAreas,
    ) -> Result<CachedTile, DecodeError> {
        let image = Arc::new(DecodedImage::decode(bytes, format)?);

        if areas.contains(CacheAreas::DISK) {
            self.write_disk(id, bytes, format);
        }
        if areas.contains(CacheAreas::MEMORY) {
            if let Err(e) = self.memory.insert(id.clone(), image.clone()) {
                debug!(tile = %id, error = %e, "Not caching in memory");
            }
        }
        let upload = self.stage_if(areas, id, &image);

        Ok(CachedTile {
            id: id.clone(),
            image,
            upload,
            origin: TileOrigin::Network,
        })
    }

    /// Remove `id` from every tier.
    pub fn invalidate(&mut self, id: &TileId) {
        self.upload.remove(id);
        self.memory.remove(id);
        if self.disk_version_matches(id) {
            self.disk.remove(&id.disk_key());
        }
        debug!(tile = %id, "Tile invalidated");
    }

    fn disk_version_matches(&self, id: &TileId) -> bool {
        self.disk
            .peek(&id.disk_key())
            .is_some_and(|e| e.payload().version == id.version())
    }

    fn write_disk(&mut self, id: &TileId, bytes: &[u8], format: &TileFormat) {
        let Some(store) = &self.store else {
            return;
        };
        if !store.is_writable() {
            return;
        }
        if !id.is_storable() {
            debug!(tile = %id, "Tile id has no filename, not caching on disk");
            return;
        }
        let size = bytes.len() as u64;
        if self.disk.config().cost_strategy == CostStrategy::ByteSize && size > self.disk.max_cost()
        {
            debug!(tile = %id, size, "Tile larger than disk cache, not caching on disk");
            return;
        }

        // Same tile under another format: drop the old file first.
        let key = id.disk_key();
        let path = store.path_for(id, format);
        if self
            .disk
            .peek(&key)
            .is_some_and(|e| e.payload().path != path)
        {
            self.disk.remove(&key);
        }

        match store.write(id, format, bytes) {
            Ok(entry) => {
                if let Err(e) = self.disk.insert(key, entry) {
                    debug!(tile = %id, error = %e, "Disk tier rejected tile");
                    self.delete_file(id, &path);
                }
            }
            Err(e) => {
                warn!(tile = %id, error = %e, "Failed to write tile to disk cache");
            }
        }
    }

    fn delete_file(&self, id: &TileId, path: &Path) {
        if let Some(store) = &self.store {
            if let Err(e) = store.delete(path) {
                warn!(tile = %id, path = %path.display(), error = %e, "Failed to delete tile file");
            }
        }
    }

    fn stage_if(
        &mut self,
        areas: CacheAreas,
        id: &TileId,
        image: &Arc<DecodedImage>,
    ) -> Option<UploadHandle> {
        if !areas.contains(CacheAreas::UPLOAD) {
            return None;
        }
        let handle = UploadHandle::new(self.next_handle);
        self.next_handle += 1;

        let resource = UploadResource {
            handle,
            image: image.clone(),
        };
        match self.upload.insert(id.clone(), resource) {
            Ok(()) => {
                self.handoff.push(Handoff::Upload {
                    id: id.clone(),
                    handle,
                    image: image.clone(),
                });
                Some(handle)
            }
            Err(e) => {
                debug!(tile = %id, error = %e, "Not staging for upload");
                None
            }
        }
    }
}

impl fmt::Debug for TileCaches {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TileCaches")
            .field("store", &self.store.as_ref().map(|s| s.root()))
            .field("disk", &self.disk)
            .field("memory", &self.memory)
            .field("upload", &self.upload)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{TileStore, SCHEMA_VERSION};
    use crate::cache::Queue;
    use crate::tile::png_bytes;
    use std::fs;
    use tempfile::TempDir;

    const MB: u64 = 1024 * 1024;

    fn id(x: i32) -> TileId {
        TileId::new("p", 1, 3, x, 5)
    }

    fn caches(dir: &TempDir, disk_max: u64) -> TileCaches {
        let store = TileStore::open(dir.path(), SCHEMA_VERSION);
        TileCaches::new(
            Some(store),
            TierConfig::new(disk_max),
            TierConfig::new(MB),
            TierConfig::new(MB),
        )
    }

    #[test]
    fn test_parse_cache_areas() {
        assert_eq!("all".parse::<CacheAreas>().unwrap(), CacheAreas::ALL);
        assert_eq!(
            "disk, memory".parse::<CacheAreas>().unwrap(),
            CacheAreas::DISK | CacheAreas::MEMORY
        );
        assert_eq!("none".parse::<CacheAreas>().unwrap(), CacheAreas::NONE);
        assert!("gpu".parse::<CacheAreas>().is_err());
        assert_eq!((CacheAreas::DISK | CacheAreas::UPLOAD).to_string(), "disk,upload");
    }

    #[test]
    fn test_store_fills_every_area() {
        let dir = TempDir::new().unwrap();
        let mut caches = caches(&dir, MB);
        let handoff = caches.handoff();

        let tile = caches
            .store(&id(4), &png_bytes(2, 2), &TileFormat::png(), CacheAreas::ALL)
            .unwrap();
        assert_eq!(tile.origin, TileOrigin::Network);
        assert!(tile.upload.is_some());
        assert!(dir.path().join("p-1-3-4-5.png").exists());
        assert!(caches.memory().contains(&id(4)));
        assert!(matches!(handoff.drain().as_slice(), [Handoff::Upload { .. }]));

        match caches.lookup(&id(4), CacheAreas::ALL) {
            Lookup::Hit(hit) => assert_eq!(hit.origin, TileOrigin::Upload),
            other => panic!("expected hit, got {:?}", other),
        }
    }

    #[test]
    fn test_areas_limit_where_tiles_go() {
        let dir = TempDir::new().unwrap();
        let mut caches = caches(&dir, MB);
        caches
            .store(&id(4), &png_bytes(2, 2), &TileFormat::png(), CacheAreas::MEMORY)
            .unwrap();

        assert!(!dir.path().join("p-1-3-4-5.png").exists());
        assert!(caches.upload().is_empty());
        assert!(caches.contains(&id(4), CacheAreas::MEMORY));
        assert!(!caches.contains(&id(4), CacheAreas::DISK));
        assert!(matches!(caches.lookup(&id(4), CacheAreas::DISK), Lookup::Miss));
    }

    #[test]
    fn test_disk_hit_promotes_into_higher_tiers() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("p-1-3-4-5.png"), png_bytes(2, 2)).unwrap();
        let mut caches = caches(&dir, MB);
        let store = caches.tile_store().unwrap().clone();
        assert_eq!(caches.load_scan(store.scan()), 1);

        match caches.lookup(&id(4), CacheAreas::ALL) {
            Lookup::Hit(hit) => {
                assert_eq!(hit.origin, TileOrigin::Disk);
                assert_eq!(hit.image.width(), 2);
                assert!(hit.upload.is_some());
            }
            other => panic!("expected hit, got {:?}", other),
        }
        assert!(caches.memory().contains(&id(4)));
        assert!(caches.upload().contains(&id(4)));
        assert_eq!(caches.handoff().len(), 1);
    }

    #[test]
    fn test_corrupt_disk_tile_is_removed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("p-1-3-4-5.png");
        fs::write(&path, b"not a png").unwrap();
        let mut caches = caches(&dir, MB);
        let store = caches.tile_store().unwrap().clone();
        caches.load_scan(store.scan());

        assert!(matches!(
            caches.lookup(&id(4), CacheAreas::ALL),
            Lookup::Corrupt
        ));
        assert!(caches.disk().is_empty());
        assert!(!path.exists());
        assert!(matches!(caches.lookup(&id(4), CacheAreas::ALL), Lookup::Miss));
    }

    #[test]
    fn test_disk_eviction_deletes_files() {
        let dir = TempDir::new().unwrap();
        let bytes = png_bytes(2, 2);
        let size = bytes.len() as u64;
        let mut caches = caches(&dir, size * 2);

        for x in 0..3 {
            caches
                .store(&id(x), &bytes, &TileFormat::png(), CacheAreas::DISK)
                .unwrap();
        }
        assert_eq!(caches.disk().len(), 2);
        assert!(!dir.path().join("p-1-3-0-5.png").exists());
        assert!(dir.path().join("p-1-3-2-5.png").exists());
    }

    #[test]
    fn test_upload_departures_push_release() {
        let dir = TempDir::new().unwrap();
        let store = TileStore::open(dir.path(), SCHEMA_VERSION);
        let mut caches = TileCaches::new(
            Some(store),
            TierConfig::new(MB),
            TierConfig::new(MB),
            TierConfig::new(1).with_cost_strategy(CostStrategy::Unitary),
        );
        let handoff = caches.handoff();

        caches
            .store(&id(1), &png_bytes(1, 1), &TileFormat::png(), CacheAreas::UPLOAD)
            .unwrap();
        caches
            .store(&id(2), &png_bytes(1, 1), &TileFormat::png(), CacheAreas::UPLOAD)
            .unwrap();

        let drained = handoff.drain();
        assert_eq!(drained.len(), 3);
        assert!(matches!(&drained[1], Handoff::Release { id, .. } if *id == self::id(1)));
        assert_eq!(drained[0].handle(), drained[1].handle());
        assert!(matches!(&drained[2], Handoff::Upload { id, .. } if *id == self::id(2)));

        caches.invalidate(&id(2));
        assert!(matches!(handoff.drain().as_slice(), [Handoff::Release { .. }]));
    }

    #[test]
    fn test_version_bump_replaces_disk_file() {
        let dir = TempDir::new().unwrap();
        let mut caches = caches(&dir, MB);
        caches
            .store(&id(4), &png_bytes(1, 1), &TileFormat::png(), CacheAreas::DISK)
            .unwrap();

        let v2 = id(4).with_version(2);
        assert!(matches!(caches.lookup(&v2, CacheAreas::DISK), Lookup::Miss));

        caches
            .store(&v2, &png_bytes(3, 3), &TileFormat::png(), CacheAreas::DISK)
            .unwrap();
        assert_eq!(caches.disk().len(), 1);
        assert!(dir.path().join("p-1-3-4-5.png").exists());
        assert!(matches!(caches.lookup(&v2, CacheAreas::DISK), Lookup::Hit(_)));
        assert!(matches!(caches.lookup(&id(4), CacheAreas::DISK), Lookup::Miss));
    }

    #[test]
    fn test_other_version_lookup_is_a_plain_miss() {
        let dir = TempDir::new().unwrap();
        let mut caches = caches(&dir, MB);
        caches
            .store(&id(4), &png_bytes(1, 1), &TileFormat::png(), CacheAreas::DISK)
            .unwrap();
        assert_eq!(caches.disk().peek(&id(4)).unwrap().queue(), Queue::Warm);

        let v2 = id(4).with_version(2);
        assert!(matches!(caches.lookup(&v2, CacheAreas::DISK), Lookup::Miss));

        let stats = caches.disk().stats();
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 1);
        assert_eq!(caches.disk().peek(&id(4)).unwrap().queue(), Queue::Warm);
        assert!(caches.memory().is_empty());
    }

    #[test]
    fn test_scan_keeps_one_file_per_tile() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("p-1-3-4-5.png"), png_bytes(2, 2)).unwrap();
        fs::write(dir.path().join("p-1-3-4-5.jpg"), vec![0u8; 5000]).unwrap();
        let mut caches = caches(&dir, MB);
        let store = caches.tile_store().unwrap().clone();

        assert_eq!(caches.load_scan(store.scan()), 1);

        // The first name in filename order wins.
        let kept = dir.path().join("p-1-3-4-5.jpg");
        assert!(kept.exists());
        assert!(!dir.path().join("p-1-3-4-5.png").exists());
        assert_eq!(caches.disk().total_cost(), 5000);
        assert_eq!(caches.disk().peek(&id(4)).unwrap().payload().path, kept);

        caches.invalidate(&id(4));
        assert!(caches.disk().is_empty());
        assert!(!kept.exists());
    }

    #[test]
    fn test_scan_removes_files_the_tier_rejects() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("p-1-3-4-5.png");
        fs::write(&path, png_bytes(8, 8)).unwrap();
        let mut caches = caches(&dir, 16);
        let store = caches.tile_store().unwrap().clone();

        assert_eq!(caches.load_scan(store.scan()), 0);
        assert!(!path.exists());
    }

    #[test]
    fn test_rejected_disk_insert_removes_written_file() {
        let dir = TempDir::new().unwrap();
        let store = TileStore::open(dir.path(), SCHEMA_VERSION);
        let mut caches = TileCaches::new(
            Some(store),
            TierConfig::new(0).with_cost_strategy(CostStrategy::Unitary),
            TierConfig::new(MB),
            TierConfig::new(MB),
        );

        caches
            .store(&id(4), &png_bytes(1, 1), &TileFormat::png(), CacheAreas::ALL)
            .unwrap();
        assert!(caches.disk().is_empty());
        assert!(!dir.path().join("p-1-3-4-5.png").exists());
        assert!(caches.memory().contains(&id(4)));
    }

    #[test]
    fn test_format_change_removes_old_file() {
        let dir = TempDir::new().unwrap();
        let mut caches = caches(&dir, MB);
        let bytes = png_bytes(1, 1);
        caches
            .store(&id(4), &bytes, &TileFormat::png(), CacheAreas::DISK)
            .unwrap();
        let other = TileFormat::new("tile").unwrap();
        caches
            .store(&id(4), &bytes, &other, CacheAreas::DISK)
            .unwrap();

        assert!(!dir.path().join("p-1-3-4-5.png").exists());
        assert!(dir.path().join("p-1-3-4-5.tile").exists());
        assert_eq!(caches.disk().len(), 1);
    }

    #[test]
    fn test_unstorable_id_skips_disk() {
        let dir = TempDir::new().unwrap();
        let mut caches = caches(&dir, MB);
        let odd = TileId::new("a-b", 0, 0, 0, 0);
        caches
            .store(&odd, &png_bytes(1, 1), &TileFormat::png(), CacheAreas::ALL)
            .unwrap();
        assert!(caches.disk().is_empty());
        assert!(caches.contains(&odd, CacheAreas::MEMORY));
    }

    #[test]
    fn test_store_rejects_undecodable_payload() {
        let dir = TempDir::new().unwrap();
        let mut caches = caches(&dir, MB);
        assert!(caches
            .store(&id(4), b"junk", &TileFormat::png(), CacheAreas::ALL)
            .is_err());
        assert!(caches.disk().is_empty());
        assert!(caches.memory().is_empty());
        assert!(caches.handoff().is_empty());
    }

    #[test]
    fn test_without_store_disk_is_skipped() {
        let mut caches = TileCaches::new(
            None,
            TierConfig::new(MB),
            TierConfig::new(MB),
            TierConfig::new(MB),
        );
        caches
            .store(&id(4), &png_bytes(1, 1), &TileFormat::png(), CacheAreas::ALL)
            .unwrap();
        assert!(caches.disk().is_empty());
        assert!(matches!(caches.lookup(&id(4), CacheAreas::MEMORY), Lookup::Hit(_)));
    }
}
