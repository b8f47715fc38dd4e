//! The fetch coordinator state machine.
//!
//! [`FetchCoordinator`] is single-threaded and has no clock of its own: every
//! input carries `now`, and retry deadlines are exposed through
//! [`FetchCoordinator::next_retry_deadline`] for the daemon to sleep on.
//! That makes the whole fetch lifecycle testable without a runtime.
//!
//! # Guarantees
//!
//! - At most one fetch is in flight per tile, however many viewers want it.
//! - A tile no viewer wants is never fetched or retried.
//! - Completions for tiles nobody waits for are cached but not announced.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use tracing::{debug, warn};

use super::interest::InterestMap;
use super::retry::{FailureOutcome, FetchState, PendingFetch, RetryPolicy, RetryScheduler};
use super::viewer::{ViewerId, ViewerSink};
use crate::cache::{CacheAreas, CachedTile, Lookup, TileCaches};
use crate::fetcher::Fetcher;
use crate::tile::{TileFormat, TileId};

/// Message delivered to viewers when a fetched payload does not decode.
pub const CORRUPT_PAYLOAD: &str = "corrupt payload";

/// Counters for coordinator activity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoordinatorStats {
    /// Fetch requests issued, including retries.
    pub requests: u64,
    pub cancellations: u64,
    /// Fetch requests re-issued after a failure.
    pub retries: u64,
    pub abandoned: u64,
    pub completed: u64,
    /// Tiles served from a cache tier instead of fetched.
    pub cache_hits: u64,
    /// Completions that arrived with no fetch pending.
    pub late_completions: u64,
}

/// Deduplicates, retries and cancels tile fetches for a set of viewers.
pub struct FetchCoordinator<F, S> {
    caches: TileCaches,
    interest: InterestMap,
    pending: HashMap<TileId, PendingFetch>,
    retries: RetryScheduler,
    fetcher: F,
    sink: S,
    default_areas: CacheAreas,
    viewers: HashSet<ViewerId>,
    next_viewer: u64,
    stats: CoordinatorStats,
}

impl<F: Fetcher, S: ViewerSink> FetchCoordinator<F, S> {
    /// Create a coordinator.
    ///
    /// # Arguments
    ///
    /// * `caches` - The cache tiers completions are stored into
    /// * `policy` - Retry policy for failed fetches
    /// * `fetcher` - Where fetch and cancel requests go
    /// * `sink` - Where viewer notifications go
    pub fn new(caches: TileCaches, policy: RetryPolicy, fetcher: F, sink: S) -> Self {
        Self {
            caches,
            interest: InterestMap::new(),
            pending: HashMap::new(),
            retries: RetryScheduler::new(policy),
            fetcher,
            sink,
            default_areas: CacheAreas::ALL,
            viewers: HashSet::new(),
            next_viewer: 1,
            stats: CoordinatorStats::default(),
        }
    }

    /// Set the tiers lookups and completions use by default.
    pub fn with_default_areas(mut self, areas: CacheAreas) -> Self {
        self.default_areas = areas;
        self
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn caches(&self) -> &TileCaches {
        &self.caches
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    pub fn fetcher_mut(&mut self) -> &mut F {
        &mut self.fetcher
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn stats(&self) -> &CoordinatorStats {
        &self.stats
    }

    pub fn default_areas(&self) -> CacheAreas {
        self.default_areas
    }

    /// State of the pending fetch for `id`, if any.
    pub fn pending_state(&self, id: &TileId) -> Option<FetchState> {
        self.pending.get(id).map(|p| p.state)
    }

    /// Failures recorded for the pending fetch of `id`.
    pub fn pending_attempt(&self, id: &TileId) -> Option<u32> {
        self.pending.get(id).map(|p| p.attempt)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn viewer_count(&self) -> usize {
        self.viewers.len()
    }

    /// Whether any viewer currently sees `id`.
    pub fn is_wanted(&self, id: &TileId) -> bool {
        self.interest.is_wanted(id)
    }

    /// Earliest retry deadline.
    pub fn next_retry_deadline(&self) -> Option<Instant> {
        self.retries.next_deadline()
    }

    // =========================================================================
    // Viewer inputs
    // =========================================================================

    /// Allocate a new viewer token.
    pub fn register_viewer(&mut self) -> ViewerId {
        let viewer = ViewerId::new(self.next_viewer);
        self.next_viewer += 1;
        self.viewers.insert(viewer);
        debug!(%viewer, "Viewer registered");
        viewer
    }

    /// Replace `viewer`'s visible set.
    ///
    /// Tiles newly in view are looked up in the cache tiers; those found are
    /// returned, the rest are fetched unless a fetch is already pending.
    /// Tiles no viewer sees any more have their fetch or retry cancelled.
    pub fn set_visible_tiles(
        &mut self,
        viewer: ViewerId,
        tiles: HashSet<TileId>,
        _now: Instant,
    ) -> Vec<CachedTile> {
        let delta = self.interest.update(viewer, tiles);
        let mut cached = Vec::new();

        for id in &delta.added {
            match self.caches.lookup(id, self.default_areas) {
                Lookup::Hit(tile) => {
                    self.stats.cache_hits += 1;
                    cached.push(tile);
                }
                Lookup::Miss | Lookup::Corrupt => {
                    if !self.pending.contains_key(id) {
                        self.start_fetch(id.clone());
                    }
                }
            }
        }

        for id in &delta.no_longer_needed {
            self.cancel_fetch(id);
        }

        debug!(
            %viewer,
            added = delta.added.len(),
            removed = delta.removed.len(),
            cached = cached.len(),
            pending = self.pending.len(),
            "Visible tiles updated"
        );
        cached
    }

    /// Drop `viewer`, cancelling fetches only it was waiting for.
    pub fn remove_viewer(&mut self, viewer: ViewerId, _now: Instant) {
        let delta = self.interest.remove_viewer(viewer);
        for id in &delta.no_longer_needed {
            self.cancel_fetch(id);
        }
        if self.viewers.remove(&viewer) {
            self.sink.viewer_removed(viewer);
            debug!(%viewer, "Viewer removed");
        }
    }

    // =========================================================================
    // Fetcher inputs
    // =========================================================================

    /// A fetch completed; store it in the pending fetch's tiers.
    pub fn on_fetched(&mut self, id: TileId, bytes: &[u8], format: &TileFormat, now: Instant) {
        self.complete(id, bytes, format, None, now);
    }

    /// A fetch completed; store it in `areas`.
    pub fn on_fetched_with_areas(
        &mut self,
        id: TileId,
        bytes: &[u8],
        format: &TileFormat,
        areas: CacheAreas,
        now: Instant,
    ) {
        self.complete(id, bytes, format, Some(areas), now);
    }

    /// A fetch failed. Ignored unless a fetch for `id` is in flight.
    pub fn on_error(&mut self, id: TileId, message: &str, now: Instant) {
        let Some(fetch) = self.pending.get_mut(&id) else {
            debug!(tile = %id, error = message, "Ignoring error for tile with no pending fetch");
            return;
        };
        if fetch.state != FetchState::Requested {
            return;
        }

        match self.retries.record_failure(fetch, now) {
            FailureOutcome::Retry { attempt, delay, .. } => {
                debug!(
                    tile = %id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = message,
                    "Tile fetch failed, retrying"
                );
            }
            FailureOutcome::Abandon { attempts } => {
                self.pending.remove(&id);
                self.stats.abandoned += 1;
                warn!(tile = %id, attempts, error = message, "Abandoning tile fetch");
                for viewer in self.interest.forget_tile(&id) {
                    self.sink.tile_failed(viewer, &id, message);
                }
            }
        }
    }

    /// Re-issue fetches whose retry deadline has passed.
    pub fn fire_due_retries(&mut self, now: Instant) {
        for id in self.retries.take_due(now) {
            let wanted = self.interest.is_wanted(&id);
            match self.pending.get(&id).map(|p| p.state) {
                Some(FetchState::Retrying) if wanted => {
                    if let Some(fetch) = self.pending.get_mut(&id) {
                        fetch.state = FetchState::Requested;
                        debug!(tile = %id, attempt = fetch.attempt, "Retrying tile fetch");
                    }
                    self.stats.retries += 1;
                    self.stats.requests += 1;
                    self.fetcher.request(&id);
                }
                Some(_) if !wanted => {
                    self.pending.remove(&id);
                }
                _ => {}
            }
        }
    }

    /// Remove `id` from every cache tier.
    pub fn invalidate(&mut self, id: &TileId) {
        self.caches.invalidate(id);
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn start_fetch(&mut self, id: TileId) {
        let mut fetch = PendingFetch::new(id.clone(), self.default_areas);
        fetch.state = FetchState::Requested;
        self.pending.insert(id.clone(), fetch);
        self.stats.requests += 1;
        debug!(tile = %id, "Requesting tile");
        self.fetcher.request(&id);
    }

    fn cancel_fetch(&mut self, id: &TileId) {
        let Some(fetch) = self.pending.remove(id) else {
            return;
        };
        match fetch.state {
            FetchState::Requested => self.fetcher.cancel(id),
            FetchState::Retrying => {
                self.retries.cancel(id);
            }
            FetchState::Idle | FetchState::Abandoned => {}
        }
        self.stats.cancellations += 1;
        debug!(tile = %id, state = ?fetch.state, "Tile fetch cancelled");
    }

    fn complete(
        &mut self,
        id: TileId,
        bytes: &[u8],
        format: &TileFormat,
        areas: Option<CacheAreas>,
        now: Instant,
    ) {
        let Some((state, pending_areas)) = self.pending.get(&id).map(|p| (p.state, p.areas)) else {
            self.stats.late_completions += 1;
            let areas = areas.unwrap_or(self.default_areas);
            match self.caches.store(&id, bytes, format, areas) {
                Ok(_) => debug!(tile = %id, "Cached late tile completion"),
                Err(e) => debug!(tile = %id, error = %e, "Discarding undecodable late completion"),
            }
            return;
        };

        let areas = areas.unwrap_or(pending_areas);
        match self.caches.store(&id, bytes, format, areas) {
            Ok(tile) => {
                if state == FetchState::Retrying {
                    self.retries.cancel(&id);
                }
                self.pending.remove(&id);
                self.stats.completed += 1;

                let viewers = self.interest.viewers_of(&id);
                debug!(tile = %id, viewers = viewers.len(), "Tile fetched");
                for viewer in viewers {
                    self.sink.tile_ready(viewer, &tile);
                }
            }
            Err(e) => {
                warn!(tile = %id, error = %e, "Fetched tile failed to decode");
                if state == FetchState::Requested {
                    self.on_error(id, CORRUPT_PAYLOAD, now);
                }
            }
        }
    }
}
