//! Cache Statistics Module
//!
//! Tracks engine activity: local hits and misses, remote fetches,
//! evictions and purged entries.

use serde::Serialize;

// == Cache Stats ==
/// Tracks cache performance metrics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Lookups served from local storage
    pub hits: u64,
    /// Lookups that fell through to the remote source
    pub misses: u64,
    /// Calls made to the remote collaborator
    pub remote_fetches: u64,
    /// Entries evicted to make room for a write
    pub evictions: u64,
    /// Entries removed because they expired, were malformed or outdated
    pub purged: u64,
}

impl CacheStats {
    // == Constructor ==
    /// Creates a new CacheStats with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    // == Hit Rate ==
    /// Calculates the cache hit rate.
    ///
    /// Returns hits / (hits + misses), or 0.0 if no requests have been made.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    pub fn record_hit(&mut self) {
        self.hits += 1;
    }

    pub fn record_miss(&mut self) {
        self.misses += 1;
    }

    pub fn record_remote_fetch(&mut self) {
        self.remote_fetches += 1;
    }

    pub fn record_eviction(&mut self) {
        self.evictions += 1;
    }

    pub fn record_purged(&mut self, count: usize) {
        self.purged += count as u64;
    }
}
