//! Cache error types.

use thiserror::Error;

/// Errors from cache tier operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// An entry's cost alone exceeds the tier's budget.
    #[error("Entry too large for {tier} tier: cost {cost} (max: {max})")]
    EntryTooLarge {
        tier: &'static str,
        cost: u64,
        max: u64,
    },
}
