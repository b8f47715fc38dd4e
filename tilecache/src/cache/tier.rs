//! Cost-bounded cache tier with three-queue eviction.
//!
//! [`CacheTier`] is generic over its payload and is instantiated once per
//! storage level (disk, decoded memory, upload-ready). It is a plain
//! single-owner data structure: no locks, no background tasks. Callers that
//! need cross-thread access route through the coordinator's command queue.
//!
//! # Eviction
//!
//! Eviction is synchronous. Every insert finishes with the tier's summed cost
//! at or below `max_cost`, and every payload that leaves the tier is first
//! handed to the tier's eviction listener together with the
//! [`EvictionCause`]. The disk tier uses this to delete files, the upload
//! tier to schedule GPU resource release.
//!
//! See [`policy`](super::policy) for the queue discipline.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use tracing::trace;

use super::error::CacheError;
use super::policy::{ColdPolicy, EvictionCause, Queue, TierConfig, Weighted};
use super::stats::TierStats;
use crate::tile::TileId;

/// Callback invoked with every payload leaving a tier, before it is dropped.
pub type EvictionListener<P> = Box<dyn FnMut(&TileId, &CacheEntry<P>, EvictionCause) + Send>;

/// A resident cache entry.
#[derive(Debug, Clone)]
pub struct CacheEntry<P> {
    id: TileId,
    payload: P,
    cost: u64,
    queue: Queue,
}

impl<P> CacheEntry<P> {
    pub fn id(&self) -> &TileId {
        &self.id
    }

    pub fn payload(&self) -> &P {
        &self.payload
    }

    pub fn cost(&self) -> u64 {
        self.cost
    }

    pub fn queue(&self) -> Queue {
        self.queue
    }

    pub fn into_payload(self) -> P {
        self.payload
    }
}

struct Resident<P> {
    entry: CacheEntry<P>,
    /// Position within the entry's queue; larger is newer.
    seq: u64,
}

/// Cost-bounded cache keyed by [`TileId`].
pub struct CacheTier<P> {
    name: &'static str,
    config: TierConfig,
    entries: HashMap<TileId, Resident<P>>,
    hot: BTreeMap<u64, TileId>,
    warm: BTreeMap<u64, TileId>,
    cold: BTreeMap<u64, TileId>,
    ghosts: HashMap<TileId, u64>,
    ghost_order: BTreeMap<u64, TileId>,
    total_cost: u64,
    warm_cost: u64,
    next_seq: u64,
    listener: Option<EvictionListener<P>>,
    stats: TierStats,
}

impl<P> CacheTier<P> {
    /// Create an empty tier.
    ///
    /// # Arguments
    ///
    /// * `name` - Tier name used in logs and errors (e.g. `"disk"`)
    /// * `config` - Budget and policies
    pub fn new(name: &'static str, config: TierConfig) -> Self {
        Self {
            name,
            config,
            entries: HashMap::new(),
            hot: BTreeMap::new(),
            warm: BTreeMap::new(),
            cold: BTreeMap::new(),
            ghosts: HashMap::new(),
            ghost_order: BTreeMap::new(),
            total_cost: 0,
            warm_cost: 0,
            next_seq: 0,
            listener: None,
            stats: TierStats::default(),
        }
    }

    /// Install the eviction listener.
    pub fn with_eviction_listener<F>(mut self, listener: F) -> Self
    where
        F: FnMut(&TileId, &CacheEntry<P>, EvictionCause) + Send + 'static,
    {
        self.listener = Some(Box::new(listener));
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn config(&self) -> &TierConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_cost(&self) -> u64 {
        self.total_cost
    }

    pub fn max_cost(&self) -> u64 {
        self.config.max_cost
    }

    /// Whether `id` has a resident payload.
    pub fn contains(&self, id: &TileId) -> bool {
        self.entries.contains_key(id)
    }

    /// Whether `id` is remembered as a ghost (payload released).
    pub fn is_ghost(&self, id: &TileId) -> bool {
        self.ghosts.contains_key(id)
    }

    /// Resident ids, in no particular order.
    pub fn ids(&self) -> impl Iterator<Item = &TileId> {
        self.entries.keys()
    }

    /// Snapshot of the tier's counters.
    pub fn stats(&self) -> TierStats {
        TierStats {
            entry_count: self.entries.len(),
            total_cost: self.total_cost,
            max_cost: self.config.max_cost,
            ghost_count: self.ghosts.len(),
            ..self.stats.clone()
        }
    }

    /// Look up an entry without promoting it or touching the counters.
    pub fn peek(&self, id: &TileId) -> Option<&CacheEntry<P>> {
        self.entries.get(id).map(|r| &r.entry)
    }

    /// Count a miss the caller decided on after a [`peek`](Self::peek),
    /// such as a resident entry of the wrong version.
    pub fn record_miss(&mut self) {
        self.stats.misses += 1;
    }

    /// Look up an entry, promoting it to HOT on a hit.
    pub fn get(&mut self, id: &TileId) -> Option<&CacheEntry<P>> {
        let (queue, seq, cost) = match self.entries.get(id) {
            Some(r) => (r.entry.queue, r.seq, r.entry.cost),
            None => {
                self.stats.misses += 1;
                return None;
            }
        };

        self.queue_mut(queue).remove(&seq);
        if queue == Queue::Warm {
            self.warm_cost -= cost;
        }
        let new_seq = self.bump_seq();
        self.hot.insert(new_seq, id.clone());
        self.stats.hits += 1;

        let resident = self.entries.get_mut(id)?;
        resident.seq = new_seq;
        resident.entry.queue = Queue::Hot;
        Some(&resident.entry)
    }

    /// Insert or replace an entry with an explicit cost.
    ///
    /// Fails with [`CacheError::EntryTooLarge`] and leaves the tier untouched
    /// when `cost` alone exceeds the budget. Otherwise the entry is admitted
    /// and older entries are aged out and evicted until the tier fits again.
    /// The entry just inserted is never evicted by its own insert.
    pub fn insert_with_cost(&mut self, id: TileId, payload: P, cost: u64) -> Result<(), CacheError> {
        if cost > self.config.max_cost {
            return Err(CacheError::EntryTooLarge {
                tier: self.name,
                cost,
                max: self.config.max_cost,
            });
        }

        let queue = if let Some(old) = self.detach(&id) {
            self.stats.replacements += 1;
            self.notify(&old, EvictionCause::Replaced);
            Queue::Hot
        } else if self.forget_ghost(&id) {
            self.stats.ghost_hits += 1;
            Queue::Hot
        } else {
            Queue::Warm
        };

        trace!(tier = self.name, tile = %id, cost, ?queue, "cache insert");
        self.attach(CacheEntry {
            id: id.clone(),
            payload,
            cost,
            queue,
        });
        self.stats.inserts += 1;

        self.rebalance(Some(&id));
        self.evict_to_fit(Some(&id));
        Ok(())
    }

    /// Remove an entry explicitly.
    ///
    /// The listener sees the entry with [`EvictionCause::Removed`]; the entry
    /// is then returned to the caller. Any ghost for `id` is forgotten too.
    pub fn remove(&mut self, id: &TileId) -> Option<CacheEntry<P>> {
        self.forget_ghost(id);
        let entry = self.detach(id)?;
        self.stats.removals += 1;
        self.notify(&entry, EvictionCause::Removed);
        Some(entry)
    }

    /// Change the budget, evicting immediately if the tier no longer fits.
    pub fn set_max_cost(&mut self, max_cost: u64) {
        self.config.max_cost = max_cost;
        self.rebalance(None);
        self.evict_to_fit(None);
    }

    /// Remove every entry and ghost.
    pub fn clear(&mut self) {
        let ids: Vec<TileId> = [&self.cold, &self.warm, &self.hot]
            .into_iter()
            .flat_map(|q| q.values().cloned())
            .collect();
        for id in ids {
            if let Some(entry) = self.detach(&id) {
                self.stats.removals += 1;
                self.notify(&entry, EvictionCause::Removed);
            }
        }
        self.ghosts.clear();
        self.ghost_order.clear();
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn bump_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    fn queue_mut(&mut self, queue: Queue) -> &mut BTreeMap<u64, TileId> {
        match queue {
            Queue::Hot => &mut self.hot,
            Queue::Warm => &mut self.warm,
            Queue::Cold => &mut self.cold,
        }
    }

    fn attach(&mut self, entry: CacheEntry<P>) {
        let seq = self.bump_seq();
        let queue = entry.queue;
        self.queue_mut(queue).insert(seq, entry.id.clone());
        self.total_cost += entry.cost;
        if queue == Queue::Warm {
            self.warm_cost += entry.cost;
        }
        self.entries
            .insert(entry.id.clone(), Resident { entry, seq });
    }

    fn detach(&mut self, id: &TileId) -> Option<CacheEntry<P>> {
        let resident = self.entries.remove(id)?;
        let entry = resident.entry;
        self.queue_mut(entry.queue).remove(&resident.seq);
        self.total_cost -= entry.cost;
        if entry.queue == Queue::Warm {
            self.warm_cost -= entry.cost;
        }
        Some(entry)
    }

    fn notify(&mut self, entry: &CacheEntry<P>, cause: EvictionCause) {
        if let Some(listener) = self.listener.as_mut() {
            listener(&entry.id, entry, cause);
        }
    }

    fn remember_ghost(&mut self, id: TileId) {
        if self.config.ghost_capacity == 0 {
            return;
        }
        let seq = self.bump_seq();
        if let Some(old) = self.ghosts.insert(id.clone(), seq) {
            self.ghost_order.remove(&old);
        }
        self.ghost_order.insert(seq, id);
        while self.ghosts.len() > self.config.ghost_capacity {
            match self.ghost_order.pop_first() {
                Some((_, oldest)) => {
                    self.ghosts.remove(&oldest);
                }
                None => break,
            }
        }
    }

    fn forget_ghost(&mut self, id: &TileId) -> bool {
        match self.ghosts.remove(id) {
            Some(seq) => {
                self.ghost_order.remove(&seq);
                true
            }
            None => false,
        }
    }

    fn oldest_in(&self, queue: Queue, protect: Option<&TileId>) -> Option<TileId> {
        let map = match queue {
            Queue::Hot => &self.hot,
            Queue::Warm => &self.warm,
            Queue::Cold => &self.cold,
        };
        map.values().find(|id| Some(*id) != protect).cloned()
    }

    /// Age WARM's oldest entries out until it fits its share.
    fn rebalance(&mut self, protect: Option<&TileId>) {
        let warm_limit = self.config.warm_limit();
        while self.warm_cost > warm_limit {
            let Some(id) = self.oldest_in(Queue::Warm, protect) else {
                break;
            };
            let Some(mut entry) = self.detach(&id) else {
                break;
            };

            match self.config.cold_policy {
                ColdPolicy::Retain => {
                    entry.queue = Queue::Cold;
                    self.attach(entry);
                }
                ColdPolicy::Ghost => {
                    self.stats.decays += 1;
                    self.notify(&entry, EvictionCause::Decayed);
                    self.remember_ghost(id);
                }
                ColdPolicy::Drop => {
                    self.stats.decays += 1;
                    self.notify(&entry, EvictionCause::Decayed);
                }
            }
        }
    }

    /// Evict COLD, then WARM, then HOT (oldest first) until the tier fits.
    fn evict_to_fit(&mut self, protect: Option<&TileId>) {
        while self.total_cost > self.config.max_cost {
            let victim = self
                .oldest_in(Queue::Cold, protect)
                .or_else(|| self.oldest_in(Queue::Warm, protect))
                .or_else(|| self.oldest_in(Queue::Hot, protect));
            let Some(id) = victim else {
                break;
            };
            let Some(entry) = self.detach(&id) else {
                break;
            };

            trace!(tier = self.name, tile = %id, cost = entry.cost, "cache evict");
            self.stats.evictions += 1;
            self.notify(&entry, EvictionCause::Capacity);
            if entry.queue == Queue::Warm && self.config.cold_policy == ColdPolicy::Ghost {
                self.remember_ghost(id);
            }
        }
    }
}

impl<P: Weighted> CacheTier<P> {
    /// Insert or replace an entry, costed by the tier's strategy.
    pub fn insert(&mut self, id: TileId, payload: P) -> Result<(), CacheError> {
        let cost = self.config.cost_strategy.cost_of(&payload);
        self.insert_with_cost(id, payload, cost)
    }
}

impl<P> fmt::Debug for CacheTier<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheTier")
            .field("name", &self.name)
            .field("entries", &self.entries.len())
            .field("hot", &self.hot.len())
            .field("warm", &self.warm.len())
            .field("cold", &self.cold.len())
            .field("ghosts", &self.ghosts.len())
            .field("total_cost", &self.total_cost)
            .field("max_cost", &self.config.max_cost)
            .finish()
    }
}

#[cfg(test)]
impl<P> CacheTier<P> {
    fn check_invariants(&self) {
        assert!(self.total_cost <= self.config.max_cost);
        let sum: u64 = self.entries.values().map(|r| r.entry.cost).sum();
        assert_eq!(sum, self.total_cost);
        let warm: u64 = self
            .entries
            .values()
            .filter(|r| r.entry.queue == Queue::Warm)
            .map(|r| r.entry.cost)
            .sum();
        assert_eq!(warm, self.warm_cost);
        assert_eq!(
            self.hot.len() + self.warm.len() + self.cold.len(),
            self.entries.len()
        );
        assert!(self.ghosts.len() <= self.config.ghost_capacity);
        for id in self.ghosts.keys() {
            assert!(!self.entries.contains_key(id));
        }
    }
}
