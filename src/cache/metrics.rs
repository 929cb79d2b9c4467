//! Cache Metrics Collection
//!
//! I/O counters for monitoring how much work the cache pushes to each store.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Cache metrics collector
#[derive(Debug, Default)]
pub struct CacheMetrics {
    // Source
    source_reads: AtomicU64,
    source_bytes: AtomicU64,

    // Cache file
    cache_reads: AtomicU64,
    cache_read_bytes: AtomicU64,
    cache_writes: AtomicU64,
    cache_write_bytes: AtomicU64,

    // Status file
    status_writes: AtomicU64,

    // Scratch buffer
    scratch_hits: AtomicU64,
    scratch_loads: AtomicU64,

    // Scheduler
    schedule_rounds: AtomicU64,
    pages_claimed: AtomicU64,
}

impl CacheMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_source_read(&self, bytes: u64) {
        self.source_reads.fetch_add(1, Ordering::Relaxed);
        self.source_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_cache_read(&self, bytes: u64) {
        self.cache_reads.fetch_add(1, Ordering::Relaxed);
        self.cache_read_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_cache_write(&self, bytes: u64) {
        self.cache_writes.fetch_add(1, Ordering::Relaxed);
        self.cache_write_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_status_write(&self) {
        self.status_writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_scratch_hit(&self) {
        self.scratch_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_scratch_load(&self) {
        self.scratch_loads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_schedule_round(&self, pages_claimed: u64) {
        self.schedule_rounds.fetch_add(1, Ordering::Relaxed);
        self.pages_claimed.fetch_add(pages_claimed, Ordering::Relaxed);
    }

    /// Fraction of windowed reads served from the scratch buffer
    pub fn scratch_hit_ratio(&self) -> f64 {
        let hits = self.scratch_hits.load(Ordering::Relaxed) as f64;
        let total = hits + self.scratch_loads.load(Ordering::Relaxed) as f64;
        if total == 0.0 {
            0.0
        } else {
            hits / total
        }
    }

    /// Take a point-in-time snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            source_reads: self.source_reads.load(Ordering::Relaxed),
            source_bytes: self.source_bytes.load(Ordering::Relaxed),
            cache_reads: self.cache_reads.load(Ordering::Relaxed),
            cache_read_bytes: self.cache_read_bytes.load(Ordering::Relaxed),
            cache_writes: self.cache_writes.load(Ordering::Relaxed),
            cache_write_bytes: self.cache_write_bytes.load(Ordering::Relaxed),
            status_writes: self.status_writes.load(Ordering::Relaxed),
            scratch_hits: self.scratch_hits.load(Ordering::Relaxed),
            scratch_loads: self.scratch_loads.load(Ordering::Relaxed),
            scratch_hit_ratio: self.scratch_hit_ratio(),
            schedule_rounds: self.schedule_rounds.load(Ordering::Relaxed),
            pages_claimed: self.pages_claimed.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time metrics snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub source_reads: u64,
    pub source_bytes: u64,
    pub cache_reads: u64,
    pub cache_read_bytes: u64,
    pub cache_writes: u64,
    pub cache_write_bytes: u64,
    pub status_writes: u64,
    pub scratch_hits: u64,
    pub scratch_loads: u64,
    pub scratch_hit_ratio: f64,
    pub schedule_rounds: u64,
    pub pages_claimed: u64,
}
