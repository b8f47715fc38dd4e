//! Engine bootstrap and lifecycle management.
//!
//! [`TileCacheApp`] wires the store, the three cache tiers, a fetcher and
//! the coordinator daemon together, and owns shutdown.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        TileCacheApp                          │
//! │                                                              │
//! │  1. TileStore::open ──► scan ──► TileCaches::load_scan       │
//! │                                                              │
//! │  2. command_channel ──► CoordinatorHandle (viewers)          │
//! │                    └──► FetchReporter ──► Fetcher            │
//! │                                                              │
//! │  3. CoordinatorDaemon (owns FetchCoordinator + TileCaches)   │
//! │     └── stopped by CancellationToken on shutdown()           │
//! └──────────────────────────────────────────────────────────────┘
//! ```

mod bootstrap;
mod error;

pub use bootstrap::TileCacheApp;
pub use error::AppError;
