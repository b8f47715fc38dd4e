//! Retry and backoff for failed fetches.
//!
//! Each pending fetch moves through a small state machine:
//!
//! ```text
//!   Idle ──► Requested ──► (success: removed)
//!                │
//!                │ failure, attempt += 1
//!                ▼
//!       attempt < max_attempts ──► Retrying ──(deadline)──► Requested
//!       attempt ≥ max_attempts ──► Abandoned (terminal)
//! ```
//!
//! [`RetryScheduler`] owns the retry deadlines. It never sleeps itself: the
//! coordinator daemon asks for [`RetryScheduler::next_deadline`], sleeps
//! until then, and collects due ids with [`RetryScheduler::take_due`].

use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};

use crate::cache::CacheAreas;
use crate::tile::TileId;

// =============================================================================
// Constants
// =============================================================================

/// Default number of fetch attempts before a tile is abandoned.
pub const DEFAULT_MAX_RETRY_ATTEMPTS: u32 = 5;

/// Default base delay for exponential backoff (500ms).
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 500;

/// Backoff configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total fetch attempts (including the first) before abandoning.
    pub max_attempts: u32,
    /// Delay unit; the wait after failure `n` is `base_delay * 2^n`.
    pub base_delay: Duration,
    /// Optional cap on a single wait.
    pub max_delay: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_RETRY_ATTEMPTS,
            base_delay: Duration::from_millis(DEFAULT_RETRY_BASE_DELAY_MS),
            max_delay: None,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay: None,
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    /// Delay before retrying after `attempt` failures.
    ///
    /// Saturates instead of overflowing, then applies `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(0);
        let delay = if factor == 0 {
            Duration::MAX
        } else {
            self.base_delay.saturating_mul(factor)
        };
        match self.max_delay {
            Some(cap) => delay.min(cap),
            None => delay,
        }
    }
}

/// Lifecycle state of a pending fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchState {
    Idle,
    /// A fetch is in flight.
    Requested,
    /// Waiting for a retry deadline.
    Retrying,
    /// Gave up; terminal.
    Abandoned,
}

/// Bookkeeping for one tile being fetched.
#[derive(Debug, Clone)]
pub struct PendingFetch {
    pub id: TileId,
    /// Failures so far.
    pub attempt: u32,
    pub state: FetchState,
    /// Tiers the fetched tile is stored into.
    pub areas: CacheAreas,
}

impl PendingFetch {
    pub fn new(id: TileId, areas: CacheAreas) -> Self {
        Self {
            id,
            attempt: 0,
            state: FetchState::Idle,
            areas,
        }
    }
}

/// What [`RetryScheduler::record_failure`] decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Retry once `deadline` passes.
    Retry {
        attempt: u32,
        delay: Duration,
        deadline: Instant,
    },
    /// No attempts left.
    Abandon { attempts: u32 },
}

/// Retry deadlines, ordered so the earliest is cheap to find.
#[derive(Debug)]
pub struct RetryScheduler {
    policy: RetryPolicy,
    deadlines: BTreeSet<(Instant, u64, TileId)>,
    timers: HashMap<TileId, (Instant, u64)>,
    next_seq: u64,
}

impl RetryScheduler {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            deadlines: BTreeSet::new(),
            timers: HashMap::new(),
            next_seq: 0,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Record a failed attempt for `fetch` and update its state.
    ///
    /// On `Retry` a deadline is scheduled and the fetch becomes `Retrying`;
    /// on `Abandon` it becomes `Abandoned` and no deadline is kept.
    pub fn record_failure(&mut self, fetch: &mut PendingFetch, now: Instant) -> FailureOutcome {
        fetch.attempt += 1;
        self.cancel(&fetch.id);

        if fetch.attempt >= self.policy.max_attempts {
            fetch.state = FetchState::Abandoned;
            return FailureOutcome::Abandon {
                attempts: fetch.attempt,
            };
        }

        let delay = self.policy.delay_for_attempt(fetch.attempt);
        let deadline = now.checked_add(delay).unwrap_or(now + Duration::from_secs(86_400 * 365));
        let seq = self.next_seq;
        self.next_seq += 1;
        self.deadlines.insert((deadline, seq, fetch.id.clone()));
        self.timers.insert(fetch.id.clone(), (deadline, seq));
        fetch.state = FetchState::Retrying;

        FailureOutcome::Retry {
            attempt: fetch.attempt,
            delay,
            deadline,
        }
    }

    /// Cancel `id`'s timer. Returns whether one was scheduled.
    pub fn cancel(&mut self, id: &TileId) -> bool {
        match self.timers.remove(id) {
            Some((deadline, seq)) => {
                self.deadlines.remove(&(deadline, seq, id.clone()));
                true
            }
            None => false,
        }
    }

    pub fn is_scheduled(&self, id: &TileId) -> bool {
        self.timers.contains_key(id)
    }

    /// Earliest scheduled deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.first().map(|(deadline, _, _)| *deadline)
    }

    /// Remove and return every id whose deadline is at or before `now`,
    /// earliest first.
    pub fn take_due(&mut self, now: Instant) -> Vec<TileId> {
        let mut due = Vec::new();
        while let Some((deadline, _, _)) = self.deadlines.first() {
            if *deadline > now {
                break;
            }
            if let Some((_, _, id)) = self.deadlines.pop_first() {
                self.timers.remove(&id);
                due.push(id);
            }
        }
        due
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }
}
