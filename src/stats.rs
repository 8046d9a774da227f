//! Retrieval and cache-fill counters

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

#[derive(Debug, Default)]
pub struct Stats {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    cache_corruptions: AtomicU64,
    remote_fetches: AtomicU64,
    fills_committed: AtomicU64,
    fills_superseded: AtomicU64,
    fills_failed: AtomicU64,
    uploads: AtomicU64,
}

/// Point-in-time copy of [`Stats`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_corruptions: u64,
    pub remote_fetches: u64,
    pub fills_committed: u64,
    pub fills_superseded: u64,
    pub fills_failed: u64,
    pub uploads: u64,
    /// Percentage of reads served from cache
    pub hit_rate: f64,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// A fresh record whose cache copy could not be read
    pub fn record_corruption(&self) {
        self.cache_corruptions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_remote_fetch(&self) {
        self.remote_fetches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fill_committed(&self) {
        self.fills_committed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fill_superseded(&self) {
        self.fills_superseded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fill_failed(&self) {
        self.fills_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_upload(&self) {
        self.uploads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let cache_hits = self.cache_hits.load(Ordering::Relaxed);
        let cache_misses = self.cache_misses.load(Ordering::Relaxed);
        let cache_corruptions = self.cache_corruptions.load(Ordering::Relaxed);
        // Corrupt copies count against the cache: the read went remote
        let total = cache_hits + cache_misses + cache_corruptions;
        let hit_rate = if total > 0 {
            (cache_hits as f64 / total as f64) * 100.0
        } else {
            0.0
        };

        StatsSnapshot {
            cache_hits,
            cache_misses,
            cache_corruptions,
            remote_fetches: self.remote_fetches.load(Ordering::Relaxed),
            fills_committed: self.fills_committed.load(Ordering::Relaxed),
            fills_superseded: self.fills_superseded.load(Ordering::Relaxed),
            fills_failed: self.fills_failed.load(Ordering::Relaxed),
            uploads: self.uploads.load(Ordering::Relaxed),
            hit_rate,
        }
    }

    /// Log current statistics
    pub fn log_stats(&self) {
        let s = self.snapshot();
        info!(
            hits = s.cache_hits,
            misses = s.cache_misses,
            corruptions = s.cache_corruptions,
            remote_fetches = s.remote_fetches,
            fills_committed = s.fills_committed,
            fills_superseded = s.fills_superseded,
            fills_failed = s.fills_failed,
            uploads = s.uploads,
            hit_rate = %format!("{:.1}%", s.hit_rate),
            "Store statistics"
        );
    }
}
