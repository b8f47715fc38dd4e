//! Tile identifiers, format tags and decoded images.
//!
//! These are the value types every other module passes around:
//!
//! - [`TileId`] - the cache key
//! - [`TileFormat`] - the payload's format tag (file extension)
//! - [`DecodedImage`] - an RGBA8 decode of a payload

mod decoded;
mod id;

pub use decoded::{DecodeError, DecodedImage};
pub(crate) use id::is_valid_provider;
pub use id::{TileFormat, TileId, DEFAULT_VERSION};

#[cfg(test)]
pub(crate) use decoded::png_bytes;
