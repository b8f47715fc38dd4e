//! Viewer identity and notifications.

use std::fmt;

use crate::cache::CachedTile;
use crate::tile::TileId;

/// Opaque token naming a registered viewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ViewerId(u64);

impl ViewerId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ViewerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "viewer#{}", self.0)
    }
}

/// Notification delivered to a viewer.
#[derive(Debug, Clone)]
pub enum ViewerEvent {
    /// A tile the viewer asked for is now available.
    TileReady(CachedTile),
    /// Fetching a tile the viewer asked for was abandoned.
    TileFailed { id: TileId, message: String },
}

impl ViewerEvent {
    pub fn tile_id(&self) -> &TileId {
        match self {
            ViewerEvent::TileReady(tile) => &tile.id,
            ViewerEvent::TileFailed { id, .. } => id,
        }
    }
}

/// Receiver of viewer notifications.
///
/// The coordinator calls these from its own task; implementations must not
/// block.
pub trait ViewerSink: Send {
    /// `tile` became available for `viewer`.
    fn tile_ready(&mut self, viewer: ViewerId, tile: &CachedTile);

    /// Fetching `id` was abandoned after exhausting its retries.
    fn tile_failed(&mut self, viewer: ViewerId, id: &TileId, message: &str);

    /// `viewer` was removed; no further notifications will name it.
    fn viewer_removed(&mut self, _viewer: ViewerId) {}
}
