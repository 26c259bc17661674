//! Cache hit/miss accounting.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters updated on the cache hot path.
///
/// Every counter is an independent relaxed atomic; a snapshot is not a
/// consistent cut across counters.
#[derive(Debug, Default)]
pub struct CacheStats {
    memory_hits: AtomicU64,
    durable_hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    store_faults: AtomicU64,
    expired_cleanups: AtomicU64,
}

/// Point-in-time copy of [`CacheStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub memory_hits: u64,
    pub durable_hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub store_faults: u64,
    pub expired_cleanups: u64,
}

impl StatsSnapshot {
    /// Fraction of lookups answered by either tier.
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.memory_hits + self.durable_hits;
        let total = hits + self.misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_memory_hit(&self) {
        self.memory_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_durable_hit(&self) {
        self.durable_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_store_fault(&self) {
        self.store_faults.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_expired_cleanup(&self) {
        self.expired_cleanups.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the current counter values.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            memory_hits: self.memory_hits.load(Ordering::Relaxed),
            durable_hits: self.durable_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            store_faults: self.store_faults.load(Ordering::Relaxed),
            expired_cleanups: self.expired_cleanups.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_ratio_empty() {
        assert_eq!(CacheStats::new().snapshot().hit_ratio(), 0.0);
    }

    #[test]
    fn test_hit_ratio_counts_both_tiers() {
        let stats = CacheStats::new();
        stats.record_memory_hit();
        stats.record_durable_hit();
        stats.record_miss();
        stats.record_miss();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.memory_hits, 1);
        assert_eq!(snapshot.durable_hits, 1);
        assert_eq!(snapshot.misses, 2);
        assert_eq!(snapshot.hit_ratio(), 0.5);
    }
}
