//! Eviction policy types for cache tiers.
//!
//! A [`CacheTier`](super::CacheTier) keeps its entries in three queues:
//!
//! ```text
//!   insert ──► WARM ──(2nd access)──► HOT
//!               │                      ▲
//!               │ over warm_share      │ hit
//!               ▼                      │
//!             COLD ────────────────────┘
//! ```
//!
//! New entries enter WARM. A second access promotes them to HOT. When WARM
//! grows past its share of the tier's budget its oldest entries age out
//! according to the tier's [`ColdPolicy`]. Under capacity pressure COLD is
//! evicted first, then WARM, then HOT.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::tile::DecodedImage;

// =============================================================================
// Constants
// =============================================================================

/// Default fraction of a tier's budget WARM may occupy.
pub const DEFAULT_WARM_SHARE: f64 = 0.25;

/// Default number of ghost keys a tier remembers.
pub const DEFAULT_GHOST_CAPACITY: usize = 1024;

/// Payloads whose cost can be measured in bytes.
pub trait Weighted {
    /// Size of the payload in bytes.
    fn weight(&self) -> u64;
}

impl Weighted for DecodedImage {
    fn weight(&self) -> u64 {
        self.byte_size()
    }
}

impl<T: Weighted + ?Sized> Weighted for Arc<T> {
    fn weight(&self) -> u64 {
        (**self).weight()
    }
}

/// How a tier measures entry cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CostStrategy {
    /// Every entry costs 1, so `max_cost` is an entry count.
    Unitary,
    /// Entries cost their payload's byte size.
    #[default]
    ByteSize,
}

impl CostStrategy {
    /// Cost of `payload` under this strategy.
    pub fn cost_of<P: Weighted>(self, payload: &P) -> u64 {
        match self {
            CostStrategy::Unitary => 1,
            CostStrategy::ByteSize => payload.weight(),
        }
    }
}

/// Queue an entry currently sits in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Queue {
    Hot,
    Warm,
    Cold,
}

/// What happens to entries that age out of WARM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColdPolicy {
    /// Move to COLD keeping the payload.
    #[default]
    Retain,
    /// Release the payload and remember the key; a re-insert goes to HOT.
    Ghost,
    /// Evict entirely.
    Drop,
}

/// Why a payload left a tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EvictionCause {
    /// Evicted under capacity pressure.
    Capacity,
    /// Aged out of WARM under the `Ghost` or `Drop` policy.
    Decayed,
    /// Removed explicitly (`remove` or `clear`).
    Removed,
    /// Superseded by an insert with the same id.
    Replaced,
}

/// Configuration of a single cache tier.
#[derive(Debug, Clone, PartialEq)]
pub struct TierConfig {
    /// Upper bound on the summed cost of resident entries.
    pub max_cost: u64,
    pub cost_strategy: CostStrategy,
    pub cold_policy: ColdPolicy,
    /// Fraction of `max_cost` WARM may hold before it ages out (0.0..=1.0).
    pub warm_share: f64,
    /// Maximum number of ghost keys remembered under [`ColdPolicy::Ghost`].
    pub ghost_capacity: usize,
}

impl TierConfig {
    /// Create a tier config with the given budget and default policies.
    pub fn new(max_cost: u64) -> Self {
        Self {
            max_cost,
            cost_strategy: CostStrategy::default(),
            cold_policy: ColdPolicy::default(),
            warm_share: DEFAULT_WARM_SHARE,
            ghost_capacity: DEFAULT_GHOST_CAPACITY,
        }
    }

    pub fn with_max_cost(mut self, max_cost: u64) -> Self {
        self.max_cost = max_cost;
        self
    }

    pub fn with_cost_strategy(mut self, strategy: CostStrategy) -> Self {
        self.cost_strategy = strategy;
        self
    }

    pub fn with_cold_policy(mut self, policy: ColdPolicy) -> Self {
        self.cold_policy = policy;
        self
    }

    /// Set the WARM share, clamped to `0.0..=1.0`.
    pub fn with_warm_share(mut self, share: f64) -> Self {
        self.warm_share = if share.is_nan() {
            DEFAULT_WARM_SHARE
        } else {
            share.clamp(0.0, 1.0)
        };
        self
    }

    pub fn with_ghost_capacity(mut self, capacity: usize) -> Self {
        self.ghost_capacity = capacity;
        self
    }

    /// WARM's cost budget.
    pub fn warm_limit(&self) -> u64 {
        (self.max_cost as f64 * self.warm_share) as u64
    }
}

// =============================================================================
// Parsing
// =============================================================================

/// Error for an unrecognised policy name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {} '{}'", self.kind, self.value)
    }
}

impl std::error::Error for UnknownVariant {}

impl FromStr for CostStrategy {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "unitary" | "count" => Ok(CostStrategy::Unitary),
            "bytesize" | "byte_size" | "bytes" => Ok(CostStrategy::ByteSize),
            other => Err(UnknownVariant {
                kind: "cost strategy",
                value: other.to_string(),
            }),
        }
    }
}

impl FromStr for ColdPolicy {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "retain" => Ok(ColdPolicy::Retain),
            "ghost" => Ok(ColdPolicy::Ghost),
            "drop" => Ok(ColdPolicy::Drop),
            other => Err(UnknownVariant {
                kind: "cold policy",
                value: other.to_string(),
            }),
        }
    }
}
