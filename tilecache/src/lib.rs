//! Tilecache - multi-tier map tile caching and fetch coordination
//!
//! This library supplies map tiles to any number of concurrent viewers. It
//! keeps tiles in three cost-bounded tiers (tile files on disk, decoded
//! images in memory, upload-ready images for the renderer), deduplicates
//! fetches across viewers, retries failures with exponential backoff and
//! cancels work nobody needs any more.
//!
//! # Modules
//!
//! - [`tile`]: tile identifiers, format tags and decoded images
//! - [`cache`]: the cost-bounded HOT/WARM/COLD cache tiers
//! - [`store`]: on-disk persistence for the disk tier
//! - [`coordinator`]: interest tracking, retries and the coordinator daemon
//! - [`fetcher`]: the fetcher interface and an HTTP implementation
//! - [`config`]: engine configuration and INI loading
//! - [`app`]: bootstrap and shutdown
//! - [`logging`]: tracing subscriber setup

pub mod app;
pub mod cache;
pub mod config;
pub mod coordinator;
pub mod fetcher;
pub mod logging;
pub mod store;
pub mod tile;

pub use app::{AppError, TileCacheApp};
pub use config::TileCacheConfig;
pub use coordinator::{CoordinatorHandle, ViewerEvent, ViewerId};
pub use tile::{TileFormat, TileId};
