//! Per-edge counters and snapshots.

use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters for one edge node. All fields are relaxed atomics; the
/// numbers are observability, not control flow.
#[derive(Debug, Default)]
pub struct EdgeStats {
    local_hits: AtomicU64,
    cooperative_hits: AtomicU64,
    cooperative_invalids: AtomicU64,
    global_misses: AtomicU64,
    puts: AtomicU64,
    dels: AtomicU64,
    evictions: AtomicU64,
    invalidations: AtomicU64,
    bandwidth_bytes: AtomicU64,
}

impl EdgeStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_local_hit(&self) {
        self.local_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cooperative_hit(&self) {
        self.cooperative_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cooperative_invalid(&self) {
        self.cooperative_invalids.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_global_miss(&self) {
        self.global_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_put(&self) {
        self.puts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_del(&self) {
        self.dels.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalidation(&self) {
        self.invalidations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bandwidth(&self, bytes: u64) {
        self.bandwidth_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> EdgeStatsSnapshot {
        EdgeStatsSnapshot {
            local_hits: self.local_hits.load(Ordering::Relaxed),
            cooperative_hits: self.cooperative_hits.load(Ordering::Relaxed),
            cooperative_invalids: self.cooperative_invalids.load(Ordering::Relaxed),
            global_misses: self.global_misses.load(Ordering::Relaxed),
            puts: self.puts.load(Ordering::Relaxed),
            dels: self.dels.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            bandwidth_bytes: self.bandwidth_bytes.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of one edge's counters.
#[derive(Debug, Clone, Default)]
pub struct EdgeStatsSnapshot {
    pub local_hits: u64,
    pub cooperative_hits: u64,
    pub cooperative_invalids: u64,
    pub global_misses: u64,
    pub puts: u64,
    pub dels: u64,
    pub evictions: u64,
    pub invalidations: u64,
    pub bandwidth_bytes: u64,
}

impl EdgeStatsSnapshot {
    pub fn gets(&self) -> u64 {
        self.local_hits + self.cooperative_hits + self.cooperative_invalids + self.global_misses
    }
}
