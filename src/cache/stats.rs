//! Monitoring counters. None of these carry a correctness invariant.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use super::lock;

const SOURCE: &str = "cache::stats";

/// Snapshot returned by `ViewCache::stats`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CacheStats {
    pub size: usize,
    pub hits: u64,
    pub misses: u64,
    pub stale_served: u64,
    pub prefetches: u64,
    pub evictions: u64,
    /// Requests seen in the current observation window.
    pub requests_per_window: u64,
    pub window_secs: u64,
    pub registered_keys: usize,
    pub priority_keys: usize,
    pub prefetches_in_flight: usize,
}

struct RequestWindow {
    started_at: Instant,
    count: u64,
}

pub(crate) struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    stale_served: AtomicU64,
    prefetches: AtomicU64,
    evictions: AtomicU64,
    window_len: Duration,
    window: Mutex<RequestWindow>,
}

impl CacheCounters {
    pub(crate) fn new(window_len: Duration) -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            stale_served: AtomicU64::new(0),
            prefetches: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            window_len,
            window: Mutex::new(RequestWindow {
                started_at: Instant::now(),
                count: 0,
            }),
        }
    }

    /// Count a request, starting a fresh window when the current one elapsed.
    pub(crate) fn record_request(&self) {
        let now = Instant::now();
        let mut window = lock::lock(&self.window, SOURCE, "record_request");
        if now.duration_since(window.started_at) >= self.window_len {
            window.started_at = now;
            window.count = 0;
        }
        window.count += 1;
    }

    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_stale(&self) {
        self.stale_served.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_prefetch(&self) {
        self.prefetches.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_evictions(&self, count: usize) {
        self.evictions.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn requests_in_window(&self) -> u64 {
        let window = lock::lock(&self.window, SOURCE, "requests_in_window");
        if Instant::now().duration_since(window.started_at) >= self.window_len {
            0
        } else {
            window.count
        }
    }

    pub(crate) fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub(crate) fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub(crate) fn stale_served(&self) -> u64 {
        self.stale_served.load(Ordering::Relaxed)
    }

    pub(crate) fn prefetches(&self) -> u64 {
        self.prefetches.load(Ordering::Relaxed)
    }

    pub(crate) fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    pub(crate) fn window_len(&self) -> Duration {
        self.window_len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn request_window_resets_after_it_elapses() {
        let counters = CacheCounters::new(Duration::from_secs(60));
        counters.record_request();
        counters.record_request();
        assert_eq!(counters.requests_in_window(), 2);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(counters.requests_in_window(), 0);

        counters.record_request();
        assert_eq!(counters.requests_in_window(), 1);
    }

    #[test]
    fn hit_and_miss_counters_accumulate() {
        let counters = CacheCounters::new(Duration::from_secs(60));
        counters.record_hit();
        counters.record_hit();
        counters.record_miss();
        counters.record_evictions(3);

        assert_eq!(counters.hits(), 2);
        assert_eq!(counters.misses(), 1);
        assert_eq!(counters.evictions(), 3);
    }
}
