//! Cost-bounded tile caching.
//!
//! This module provides the cache tiers and the machinery that ties them
//! together:
//!
//! - [`CacheTier`]: generic cost-bounded cache with HOT/WARM/COLD eviction
//! - [`TileCaches`]: the disk, decoded-memory and upload tiers plus the
//!   lookup/promotion path
//! - [`HandoffQueue`]: upload/release instructions for the render thread
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │                  TileCaches                   │
//! │  ┌──────────┐   ┌──────────┐   ┌──────────┐   │
//! │  │  upload  │ ◄ │  memory  │ ◄ │   disk   │   │
//! │  │   tier   │   │   tier   │   │   tier   │   │
//! │  └────┬─────┘   └──────────┘   └────┬─────┘   │
//! └───────┼─────────────────────────────┼─────────┘
//!         ▼                             ▼
//!   HandoffQueue                    TileStore
//!  (render thread)                 (tile files)
//! ```

mod error;
mod handoff;
mod policy;
mod stats;
mod tier;
mod tiers;

pub use error::CacheError;
pub use handoff::{Handoff, HandoffQueue, UploadHandle, UploadResource};
pub use policy::{
    ColdPolicy, CostStrategy, EvictionCause, Queue, TierConfig, UnknownVariant, Weighted,
    DEFAULT_GHOST_CAPACITY, DEFAULT_WARM_SHARE,
};
pub use stats::{CacheStats, TierStats};
pub use tier::{CacheEntry, CacheTier, EvictionListener};
pub use tiers::{CacheAreas, CachedTile, Lookup, TileCaches, TileOrigin};
