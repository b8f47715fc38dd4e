//! Per-viewer visible sets and the global interest they add up to.
//!
//! [`InterestMap`] keeps two views of the same relation: which tiles each
//! viewer sees, and which viewers see each tile. A tile is *wanted* while
//! at least one viewer sees it. Updating a viewer's set reports which tiles
//! the viewer gained and which stopped being wanted altogether, which is
//! what the coordinator turns into lookups, fetches and cancels.

use std::collections::{HashMap, HashSet};

use super::viewer::ViewerId;
use crate::tile::TileId;

/// Changes produced by [`InterestMap::update`].
///
/// Every list is sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterestDelta {
    /// Tiles the viewer did not see before.
    pub added: Vec<TileId>,
    /// Tiles the viewer no longer sees.
    pub removed: Vec<TileId>,
    /// Removed tiles no viewer wants any more.
    pub no_longer_needed: Vec<TileId>,
}

/// Viewer ↔ tile interest relation.
#[derive(Debug, Default)]
pub struct InterestMap {
    viewer_tiles: HashMap<ViewerId, HashSet<TileId>>,
    tile_viewers: HashMap<TileId, HashSet<ViewerId>>,
}

impl InterestMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace `viewer`'s visible set with `tiles`.
    pub fn update(&mut self, viewer: ViewerId, tiles: HashSet<TileId>) -> InterestDelta {
        let previous = self.viewer_tiles.remove(&viewer).unwrap_or_default();
        let mut delta = InterestDelta::default();

        for id in tiles.difference(&previous) {
            self.tile_viewers
                .entry(id.clone())
                .or_default()
                .insert(viewer);
            delta.added.push(id.clone());
        }

        for id in previous.difference(&tiles) {
            if let Some(viewers) = self.tile_viewers.get_mut(id) {
                viewers.remove(&viewer);
                if viewers.is_empty() {
                    self.tile_viewers.remove(id);
                    delta.no_longer_needed.push(id.clone());
                }
            }
            delta.removed.push(id.clone());
        }

        if !tiles.is_empty() {
            self.viewer_tiles.insert(viewer, tiles);
        }

        delta.added.sort();
        delta.removed.sort();
        delta.no_longer_needed.sort();
        delta
    }

    /// Drop `viewer` entirely.
    pub fn remove_viewer(&mut self, viewer: ViewerId) -> InterestDelta {
        self.update(viewer, HashSet::new())
    }

    /// Whether any viewer sees `id`.
    pub fn is_wanted(&self, id: &TileId) -> bool {
        self.tile_viewers.contains_key(id)
    }

    /// Viewers that see `id`, sorted.
    pub fn viewers_of(&self, id: &TileId) -> Vec<ViewerId> {
        let mut viewers: Vec<ViewerId> = self
            .tile_viewers
            .get(id)
            .map(|v| v.iter().copied().collect())
            .unwrap_or_default();
        viewers.sort();
        viewers
    }

    /// Tiles `viewer` currently sees.
    pub fn tiles_of(&self, viewer: ViewerId) -> Option<&HashSet<TileId>> {
        self.viewer_tiles.get(&viewer)
    }

    /// Remove `id` from every viewer's set, returning the viewers that saw it.
    pub fn forget_tile(&mut self, id: &TileId) -> Vec<ViewerId> {
        let Some(viewers) = self.tile_viewers.remove(id) else {
            return Vec::new();
        };
        for viewer in &viewers {
            if let Some(tiles) = self.viewer_tiles.get_mut(viewer) {
                tiles.remove(id);
                if tiles.is_empty() {
                    self.viewer_tiles.remove(viewer);
                }
            }
        }
        let mut viewers: Vec<ViewerId> = viewers.into_iter().collect();
        viewers.sort();
        viewers
    }

    /// Number of viewers with a non-empty visible set.
    pub fn viewer_count(&self) -> usize {
        self.viewer_tiles.len()
    }

    /// Number of distinct wanted tiles.
    pub fn wanted_count(&self) -> usize {
        self.tile_viewers.len()
    }
}
