//! Core type definitions for the cache system

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Cache key type
pub type CacheKey = String;

/// Cache value type - drivers store serialized strings
pub type CacheValue = String;

/// Counters describing how a tiered cache has been serving reads
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Reads answered by a fresh local item
    pub local_hits: u64,

    /// Reads answered by the remote tier
    pub remote_hits: u64,

    /// Reads answered with a stale item (grace period)
    pub stale_hits: u64,

    /// Reads no cache tier could answer (loader-served reads included)
    pub misses: u64,

    /// Number of loader invocations, shared fetches counted once
    pub loader_calls: u64,

    /// Remote reads and writes that failed
    pub remote_errors: u64,

    /// Invalidation messages published
    pub bus_published: u64,

    /// Invalidation messages received from peers
    pub bus_received: u64,

    /// Invalidation messages that could not be published
    pub bus_publish_failures: u64,
}

impl CacheStats {
    /// Total number of reads observed
    pub fn total_reads(&self) -> u64 {
        self.local_hits + self.remote_hits + self.stale_hits + self.misses
    }

    /// Calculate cache hit rate as a percentage
    ///
    /// Stale hits count as hits.
    pub fn hit_rate(&self) -> f64 {
        let total = self.total_reads();
        if total == 0 {
            0.0
        } else {
            ((self.local_hits + self.remote_hits + self.stale_hits) as f64 / total as f64) * 100.0
        }
    }

    /// Calculate miss rate as a percentage
    pub fn miss_rate(&self) -> f64 {
        100.0 - self.hit_rate()
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CacheStats {{ local_hits: {}, remote_hits: {}, stale_hits: {}, misses: {}, hit_rate: {:.2}%, loader_calls: {}, remote_errors: {} }}",
            self.local_hits,
            self.remote_hits,
            self.stale_hits,
            self.misses,
            self.hit_rate(),
            self.loader_calls,
            self.remote_errors
        )
    }
}

/// Lock-free counters behind [`CacheStats`]
#[derive(Debug, Default)]
pub(crate) struct StatsRecorder {
    pub local_hits: AtomicU64,
    pub remote_hits: AtomicU64,
    pub stale_hits: AtomicU64,
    pub misses: AtomicU64,
    pub loader_calls: AtomicU64,
    pub remote_errors: AtomicU64,
    pub bus_published: AtomicU64,
    pub bus_received: AtomicU64,
    pub bus_publish_failures: AtomicU64,
}

impl StatsRecorder {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CacheStats {
        CacheStats {
            local_hits: self.local_hits.load(Ordering::Relaxed),
            remote_hits: self.remote_hits.load(Ordering::Relaxed),
            stale_hits: self.stale_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            loader_calls: self.loader_calls.load(Ordering::Relaxed),
            remote_errors: self.remote_errors.load(Ordering::Relaxed),
            bus_published: self.bus_published.load(Ordering::Relaxed),
            bus_received: self.bus_received.load(Ordering::Relaxed),
            bus_publish_failures: self.bus_publish_failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_stats_hit_rate() {
        let stats = CacheStats {
            local_hits: 60,
            remote_hits: 15,
            stale_hits: 5,
            misses: 20,
            ..Default::default()
        };

        assert_eq!(stats.hit_rate(), 80.0);
        assert_eq!(stats.miss_rate(), 20.0);
    }

    #[test]
    fn test_cache_stats_zero_requests() {
        let stats = CacheStats::default();
        assert_eq!(stats.hit_rate(), 0.0);
        assert_eq!(stats.miss_rate(), 100.0);
    }

    #[test]
    fn test_cache_stats_display() {
        let stats = CacheStats {
            local_hits: 100,
            misses: 50,
            ..Default::default()
        };

        let display = format!("{}", stats);
        assert!(display.contains("local_hits: 100"));
        assert!(display.contains("misses: 50"));
    }

    #[test]
    fn test_recorder_snapshot() {
        let recorder = StatsRecorder::default();
        StatsRecorder::incr(&recorder.local_hits);
        StatsRecorder::incr(&recorder.local_hits);
        StatsRecorder::incr(&recorder.bus_received);

        let stats = recorder.snapshot();
        assert_eq!(stats.local_hits, 2);
        assert_eq!(stats.bus_received, 1);
        assert_eq!(stats.misses, 0);
    }
}
