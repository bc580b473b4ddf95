//! Background prefetch bookkeeping.
//!
//! A key sits in the [`PrefetchQueue`] from the moment a refresh is scheduled
//! until that refresh settles, so at most one prefetch per key is in flight.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::config::CacheConfig;

#[derive(Clone, Default)]
pub struct PrefetchQueue {
    keys: Arc<DashMap<String, ()>>,
}

impl PrefetchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the prefetch slot for `key`.
    ///
    /// Returns `None` when a prefetch for the key is already in flight. The
    /// slot is released when the returned guard drops.
    pub fn try_acquire(&self, key: &str) -> Option<PrefetchGuard> {
        match self.keys.entry(key.to_string()) {
            Entry::Vacant(vacant) => {
                vacant.insert(());
                Some(PrefetchGuard {
                    key: key.to_string(),
                    keys: Arc::clone(&self.keys),
                })
            }
            Entry::Occupied(_) => None,
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

pub struct PrefetchGuard {
    key: String,
    keys: Arc<DashMap<String, ()>>,
}

impl PrefetchGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for PrefetchGuard {
    fn drop(&mut self) {
        self.keys.remove(&self.key);
    }
}

/// Whether a hit with `remaining` time left out of `ttl` should refresh now.
pub fn should_prefetch(remaining: Duration, ttl: Duration, threshold: f64) -> bool {
    if ttl.is_zero() || threshold <= 0.0 {
        return false;
    }
    remaining < ttl.mul_f64(threshold.min(1.0))
}

/// TTL for a prefetched value, stretched when the fetch itself was slow.
pub fn adaptive_ttl(config: &CacheConfig, nominal: Duration, fetch_latency: Duration) -> Duration {
    if fetch_latency <= config.slow_fetch_threshold() || config.slow_fetch_ttl_multiplier <= 1.0 {
        return nominal;
    }
    let stretched = nominal.mul_f64(config.slow_fetch_ttl_multiplier);
    stretched.min(config.max_adaptive_ttl()).max(nominal)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_one_prefetch_per_key() {
        let queue = PrefetchQueue::new();

        let guard = queue.try_acquire("summary").expect("first claim");
        assert!(queue.try_acquire("summary").is_none());
        assert!(queue.try_acquire("other").is_some());
        assert!(queue.contains("summary"));

        drop(guard);
        assert!(!queue.contains("summary"));
        assert!(queue.try_acquire("summary").is_some());
    }

    #[test]
    fn prefetch_fires_inside_threshold_window() {
        let ttl = Duration::from_secs(300);
        assert!(should_prefetch(Duration::from_secs(5), ttl, 0.1));
        assert!(!should_prefetch(Duration::from_secs(31), ttl, 0.1));
        assert!(!should_prefetch(Duration::from_secs(5), ttl, 0.0));
        assert!(!should_prefetch(Duration::ZERO, Duration::ZERO, 0.5));
    }

    #[test]
    fn slow_fetches_stretch_ttl_up_to_cap() {
        let config = CacheConfig {
            slow_fetch_threshold_ms: 500,
            slow_fetch_ttl_multiplier: 2.0,
            max_adaptive_ttl_secs: 900,
            ..Default::default()
        };
        let nominal = Duration::from_secs(300);

        assert_eq!(adaptive_ttl(&config, nominal, Duration::from_millis(100)), nominal);
        assert_eq!(
            adaptive_ttl(&config, nominal, Duration::from_secs(2)),
            Duration::from_secs(600)
        );
        assert_eq!(
            adaptive_ttl(&config, Duration::from_secs(600), Duration::from_secs(2)),
            Duration::from_secs(900)
        );
    }
}
