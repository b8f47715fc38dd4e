//! Tile identifiers and format tags.
//!
//! A [`TileId`] addresses one raster tile: the provider that serves it, the
//! provider-specific map id, the zoom level, the x/y grid position, and a
//! version that is bumped when the provider's imagery changes.
//!
//! Identifiers are immutable values. The provider name is held in an
//! `Arc<str>` so cloning an id (which the cache and coordinator do on every
//! bookkeeping step) never allocates.
//!
//! # Example
//!
//! ```
//! use tilecache::tile::TileId;
//!
//! let id = TileId::new("osm", 1, 3, 4, 5);
//! assert_eq!(id.provider(), "osm");
//! assert_eq!(id.zoom(), 3);
//! assert_eq!(id.version(), 0);
//! assert!(id.is_storable());
//! ```

use std::fmt;
use std::sync::Arc;

/// Version assigned to identifiers that do not name one explicitly.
///
/// Ids decoded from disk filenames always carry this version, since the
/// filename layout has no version field.
pub const DEFAULT_VERSION: i32 = 0;

/// Identifier of a single map tile.
///
/// Ordering and hashing are lexicographic over
/// `(provider, map_id, zoom, x, y, version)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TileId {
    provider: Arc<str>,
    map_id: i32,
    zoom: i32,
    x: i32,
    y: i32,
    version: i32,
}

impl TileId {
    /// Create an identifier with the default version.
    ///
    /// # Arguments
    ///
    /// * `provider` - Provider name (e.g. `"osm"`)
    /// * `map_id` - Provider-specific map id
    /// * `zoom` - Zoom level
    /// * `x` - Column in the tile grid
    /// * `y` - Row in the tile grid
    pub fn new(provider: impl Into<Arc<str>>, map_id: i32, zoom: i32, x: i32, y: i32) -> Self {
        Self {
            provider: provider.into(),
            map_id,
            zoom,
            x,
            y,
            version: DEFAULT_VERSION,
        }
    }

    /// Return a copy of this id with a different version.
    pub fn with_version(mut self, version: i32) -> Self {
        self.version = version;
        self
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn map_id(&self) -> i32 {
        self.map_id
    }

    pub fn zoom(&self) -> i32 {
        self.zoom
    }

    pub fn x(&self) -> i32 {
        self.x
    }

    pub fn y(&self) -> i32 {
        self.y
    }

    pub fn version(&self) -> i32 {
        self.version
    }

    /// Whether this id can be represented as a disk filename.
    ///
    /// The provider must be non-empty and consist only of ASCII
    /// alphanumerics or `_` (no `-` or `.`, which delimit filename fields),
    /// and every integer field must be non-negative.
    pub fn is_storable(&self) -> bool {
        is_valid_provider(&self.provider)
            && self.map_id >= 0
            && self.zoom >= 0
            && self.x >= 0
            && self.y >= 0
            && self.version >= 0
    }

    /// The identifier as the disk tier sees it.
    ///
    /// Disk filenames have no version field, so every version of a tile maps
    /// to the same disk key.
    pub fn disk_key(&self) -> TileId {
        if self.version == DEFAULT_VERSION {
            self.clone()
        } else {
            self.clone().with_version(DEFAULT_VERSION)
        }
    }
}

impl fmt::Display for TileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}/{}",
            self.provider, self.map_id, self.zoom, self.x, self.y
        )?;
        if self.version != DEFAULT_VERSION {
            write!(f, "@v{}", self.version)?;
        }
        Ok(())
    }
}

pub(crate) fn is_valid_provider(provider: &str) -> bool {
    !provider.is_empty()
        && provider
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

/// Format tag of a tile payload, stored verbatim as the file extension.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TileFormat(Arc<str>);

impl TileFormat {
    /// Create a format tag.
    ///
    /// Returns `None` unless the tag is non-empty ASCII alphanumeric.
    pub fn new(tag: &str) -> Option<Self> {
        if !tag.is_empty() && tag.bytes().all(|b| b.is_ascii_alphanumeric()) {
            Some(Self(Arc::from(tag)))
        } else {
            None
        }
    }

    /// The `png` tag.
    pub fn png() -> Self {
        Self(Arc::from("png"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The image codec this tag names, if the `image` crate knows it.
    pub fn image_format(&self) -> Option<image::ImageFormat> {
        image::ImageFormat::from_extension(self.as_str())
    }
}

impl Default for TileFormat {
    fn default() -> Self {
        Self::png()
    }
}

impl fmt::Display for TileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_accessors() {
        let id = TileId::new("osm", 1, 3, 4, 5).with_version(2);
        assert_eq!(id.provider(), "osm");
        assert_eq!(id.map_id(), 1);
        assert_eq!(id.zoom(), 3);
        assert_eq!(id.x(), 4);
        assert_eq!(id.y(), 5);
        assert_eq!(id.version(), 2);
    }

    #[test]
    fn test_ordering_is_lexicographic() {
        let a = TileId::new("a", 9, 9, 9, 9);
        let b = TileId::new("b", 0, 0, 0, 0);
        assert!(a < b);

        let low = TileId::new("p", 1, 3, 4, 5);
        let high = TileId::new("p", 1, 3, 4, 6);
        assert!(low < high);
        assert!(low < low.clone().with_version(1));
    }

    #[test]
    fn test_versions_are_distinct_keys() {
        let v0 = TileId::new("p", 1, 3, 4, 5);
        let v1 = v0.clone().with_version(1);
        let set: HashSet<_> = [v0.clone(), v1.clone()].into_iter().collect();
        assert_eq!(set.len(), 2);
        assert_eq!(v1.disk_key(), v0);
    }

    #[test]
    fn test_storable() {
        assert!(TileId::new("open_street_map2", 0, 0, 0, 0).is_storable());
        assert!(!TileId::new("", 0, 0, 0, 0).is_storable());
        assert!(!TileId::new("a-b", 0, 0, 0, 0).is_storable());
        assert!(!TileId::new("a.b", 0, 0, 0, 0).is_storable());
        assert!(!TileId::new("p", -1, 0, 0, 0).is_storable());
        assert!(!TileId::new("p", 0, 0, 0, -3).is_storable());
    }

    #[test]
    fn test_display() {
        let id = TileId::new("p", 1, 3, 4, 5);
        assert_eq!(id.to_string(), "p/1/3/4/5");
        assert_eq!(id.with_version(7).to_string(), "p/1/3/4/5@v7");
    }

    #[test]
    fn test_format_tag() {
        assert_eq!(TileFormat::new("png"), Some(TileFormat::png()));
        assert!(TileFormat::new("").is_none());
        assert!(TileFormat::new("p.g").is_none());
        assert_eq!(
            TileFormat::new("jpg").and_then(|f| f.image_format()),
            Some(image::ImageFormat::Jpeg)
        );
        assert!(TileFormat::new("xyz").and_then(|f| f.image_format()).is_none());
    }
}
