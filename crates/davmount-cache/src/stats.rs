//! Cache statistics.
//!
//! Lock-free counters updated on every cache decision. A serializable
//! [`CacheStatsSnapshot`] is handed to monitoring collaborators.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters for node cache and refresh activity.
#[derive(Debug, Default)]
pub struct CacheStats {
    /// Lookups answered with a cached node.
    pub hits: AtomicU64,
    /// Lookups that had to go to the repository.
    pub misses: AtomicU64,
    /// Lookups answered by an unexpired missing-entry marker.
    pub negative_hits: AtomicU64,
    /// Lookups that found a fetch already in flight.
    pub pending_hits: AtomicU64,
    /// Nodes inserted or replaced.
    pub inserts: AtomicU64,
    /// Nodes removed (including cascades).
    pub evictions: AtomicU64,
    /// Background refreshes accepted by the coordinator.
    pub refreshes_scheduled: AtomicU64,
    /// Background refreshes that reconciled the cache.
    pub refreshes_completed: AtomicU64,
    /// Background refreshes whose enumeration failed.
    pub refreshes_failed: AtomicU64,
    /// Schedule requests dropped because the worker queue was full.
    pub refreshes_dropped: AtomicU64,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_negative_hit(&self) {
        self.negative_hits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_pending_hit(&self) {
        self.pending_hits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_insert(&self) {
        self.inserts.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_evictions(&self, count: u64) {
        self.evictions.fetch_add(count, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_refresh_scheduled(&self) {
        self.refreshes_scheduled.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_refresh_completed(&self) {
        self.refreshes_completed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_refresh_failed(&self) {
        self.refreshes_failed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_refresh_dropped(&self) {
        self.refreshes_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Fraction of lookups answered without a repository call.
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed) + self.negative_hits.load(Ordering::Relaxed);
        let total = hits + self.misses.load(Ordering::Relaxed);
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    /// Point-in-time copy of every counter.
    pub fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            negative_hits: self.negative_hits.load(Ordering::Relaxed),
            pending_hits: self.pending_hits.load(Ordering::Relaxed),
            inserts: self.inserts.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            refreshes_scheduled: self.refreshes_scheduled.load(Ordering::Relaxed),
            refreshes_completed: self.refreshes_completed.load(Ordering::Relaxed),
            refreshes_failed: self.refreshes_failed.load(Ordering::Relaxed),
            refreshes_dropped: self.refreshes_dropped.load(Ordering::Relaxed),
            hit_rate: self.hit_rate(),
        }
    }
}

/// Serializable view of [`CacheStats`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub negative_hits: u64,
    pub pending_hits: u64,
    pub inserts: u64,
    pub evictions: u64,
    pub refreshes_scheduled: u64,
    pub refreshes_completed: u64,
    pub refreshes_failed: u64,
    pub refreshes_dropped: u64,
    pub hit_rate: f64,
}
