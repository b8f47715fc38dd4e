//! Per-tier cache statistics.

use std::fmt;

/// Counters and gauges for one cache tier.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TierStats {
    pub hits: u64,
    pub misses: u64,
    pub inserts: u64,
    /// Entries evicted under capacity pressure.
    pub evictions: u64,
    /// Entries aged out of WARM under the ghost or drop policy.
    pub decays: u64,
    /// Explicit removals, including `clear`.
    pub removals: u64,
    /// Inserts that replaced a resident entry.
    pub replacements: u64,
    /// Inserts admitted straight to HOT because their key was a ghost.
    pub ghost_hits: u64,
    pub entry_count: usize,
    pub total_cost: u64,
    pub max_cost: u64,
    pub ghost_count: usize,
}

impl TierStats {
    /// Hit rate as a fraction (0.0 - 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// How full the tier is, as a fraction of its budget.
    pub fn utilization(&self) -> f64 {
        if self.max_cost == 0 {
            0.0
        } else {
            self.total_cost as f64 / self.max_cost as f64
        }
    }
}

impl fmt::Display for TierStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} entries, cost {}/{} ({:.1}%), hit rate {:.1}%, {} evicted, {} decayed",
            self.entry_count,
            self.total_cost,
            self.max_cost,
            self.utilization() * 100.0,
            self.hit_rate() * 100.0,
            self.evictions,
            self.decays
        )
    }
}

/// Snapshot of all three tiers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub disk: TierStats,
    pub memory: TierStats,
    pub upload: TierStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate() {
        let stats = TierStats {
            hits: 3,
            misses: 1,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.75).abs() < f64::EPSILON);
        assert_eq!(TierStats::default().hit_rate(), 0.0);
    }

    #[test]
    fn test_utilization() {
        let stats = TierStats {
            total_cost: 50,
            max_cost: 200,
            ..Default::default()
        };
        assert!((stats.utilization() - 0.25).abs() < f64::EPSILON);
    }
}
