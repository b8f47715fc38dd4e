//! Tile filename encoding.
//!
//! Disk tiles are named `{provider}-{map_id}-{zoom}-{x}-{y}.{format}`, for
//! example `osm-1-12-2048-1361.png`. Integer fields are plain decimal with no
//! sign and no leading zeros, so every valid filename has exactly one
//! decoding and re-encodes to itself.
//!
//! # Example
//!
//! ```
//! use tilecache::store::{decode_filename, encode_filename};
//! use tilecache::tile::{TileFormat, TileId};
//!
//! let id = TileId::new("osm", 1, 12, 2048, 1361);
//! let name = encode_filename(&id, &TileFormat::png());
//! assert_eq!(name, "osm-1-12-2048-1361.png");
//!
//! let (decoded, format) = decode_filename(&name).unwrap();
//! assert_eq!(decoded, id);
//! assert_eq!(format.as_str(), "png");
//! ```

use thiserror::Error;

use crate::tile::{is_valid_provider, TileFormat, TileId};

/// Reasons a filename does not name a tile.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilenameError {
    /// Not exactly one `.` separating stem and extension.
    #[error("Expected <stem>.<format>, got '{0}'")]
    InvalidShape(String),

    /// The stem does not have exactly five `-` separated fields.
    #[error("Expected 5 fields, got {0}")]
    FieldCount(usize),

    #[error("Invalid provider '{0}'")]
    InvalidProvider(String),

    /// A numeric field is not a canonical non-negative decimal.
    #[error("Invalid {field} '{value}'")]
    InvalidNumber { field: &'static str, value: String },

    #[error("Invalid format tag '{0}'")]
    InvalidFormat(String),
}

/// Filename for a tile.
///
/// The version is not encoded. Callers should only encode ids for which
/// [`TileId::is_storable`] holds; other ids produce names that do not decode.
pub fn encode_filename(id: &TileId, format: &TileFormat) -> String {
    format!(
        "{}-{}-{}-{}-{}.{}",
        id.provider(),
        id.map_id(),
        id.zoom(),
        id.x(),
        id.y(),
        format
    )
}

/// Parse a filename produced by [`encode_filename`].
///
/// The decoded id carries the default version.
pub fn decode_filename(name: &str) -> Result<(TileId, TileFormat), FilenameError> {
    let parts: Vec<&str> = name.split('.').collect();
    let [stem, ext] = parts.as_slice() else {
        return Err(FilenameError::InvalidShape(name.to_string()));
    };

    let fields: Vec<&str> = stem.split('-').collect();
    let [provider, map_id, zoom, x, y] = fields.as_slice() else {
        return Err(FilenameError::FieldCount(fields.len()));
    };

    if !is_valid_provider(provider) {
        return Err(FilenameError::InvalidProvider(provider.to_string()));
    }
    let format =
        TileFormat::new(ext).ok_or_else(|| FilenameError::InvalidFormat(ext.to_string()))?;

    let id = TileId::new(
        *provider,
        parse_field("map_id", map_id)?,
        parse_field("zoom", zoom)?,
        parse_field("x", x)?,
        parse_field("y", y)?,
    );
    Ok((id, format))
}

fn parse_field(field: &'static str, value: &str) -> Result<i32, FilenameError> {
    let invalid = || FilenameError::InvalidNumber {
        field,
        value: value.to_string(),
    };

    let canonical = !value.is_empty()
        && value.bytes().all(|b| b.is_ascii_digit())
        && (value == "0" || !value.starts_with('0'));
    if !canonical {
        return Err(invalid());
    }
    value.parse::<i32>().map_err(|_| invalid())
}
