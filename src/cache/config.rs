//! Cache configuration.
//!
//! Controls capacity, prefetch thresholds, adaptive TTL and fetch timeouts via
//! the `[cache]` section of `viewcache.toml`.

use std::num::NonZeroUsize;
use std::time::Duration;

use serde::Deserialize;

// Default values for cache configuration
const DEFAULT_MAX_ITEMS: usize = 500;
const DEFAULT_PRUNE_TARGET_RATIO: f64 = 0.8;
const DEFAULT_PREFETCH_THRESHOLD: f64 = 0.1;
const DEFAULT_PRIORITY_PREFETCH_THRESHOLD: f64 = 0.2;
const DEFAULT_SLOW_FETCH_THRESHOLD_MS: u64 = 1000;
const DEFAULT_SLOW_FETCH_TTL_MULTIPLIER: f64 = 1.5;
const DEFAULT_MAX_ADAPTIVE_TTL_SECS: u64 = 3600;
const DEFAULT_FETCH_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_STATS_WINDOW_SECS: u64 = 60;

/// Cache configuration from `viewcache.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Entry count above which pruning runs.
    pub max_items: usize,
    /// Fill ratio of `max_items` that pruning reduces the store to.
    pub prune_target_ratio: f64,
    /// Fraction of the TTL remaining at which a hit schedules a prefetch.
    pub prefetch_threshold: f64,
    /// Same as `prefetch_threshold`, for priority keys (refreshes earlier).
    pub priority_prefetch_threshold: f64,
    /// Fetch latency (ms) above which a prefetched entry gets a longer TTL.
    pub slow_fetch_threshold_ms: u64,
    /// TTL multiplier applied to slow prefetches.
    pub slow_fetch_ttl_multiplier: f64,
    /// Upper bound (secs) for an adapted TTL.
    pub max_adaptive_ttl_secs: u64,
    /// Timeout (ms) wrapped around every fetch. Zero disables it.
    pub fetch_timeout_ms: u64,
    /// Share one pending fetch between concurrent misses of the same key.
    pub coalesce_misses: bool,
    /// Length (secs) of the request-rate observation window.
    pub stats_window_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_items: DEFAULT_MAX_ITEMS,
            prune_target_ratio: DEFAULT_PRUNE_TARGET_RATIO,
            prefetch_threshold: DEFAULT_PREFETCH_THRESHOLD,
            priority_prefetch_threshold: DEFAULT_PRIORITY_PREFETCH_THRESHOLD,
            slow_fetch_threshold_ms: DEFAULT_SLOW_FETCH_THRESHOLD_MS,
            slow_fetch_ttl_multiplier: DEFAULT_SLOW_FETCH_TTL_MULTIPLIER,
            max_adaptive_ttl_secs: DEFAULT_MAX_ADAPTIVE_TTL_SECS,
            fetch_timeout_ms: DEFAULT_FETCH_TIMEOUT_MS,
            coalesce_misses: true,
            stats_window_secs: DEFAULT_STATS_WINDOW_SECS,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            max_items: settings.max_items.get(),
            prune_target_ratio: settings.prune_target_ratio,
            prefetch_threshold: settings.prefetch_threshold,
            priority_prefetch_threshold: settings.priority_prefetch_threshold,
            slow_fetch_threshold_ms: settings.slow_fetch_threshold.as_millis() as u64,
            slow_fetch_ttl_multiplier: settings.slow_fetch_ttl_multiplier,
            max_adaptive_ttl_secs: settings.max_adaptive_ttl.as_secs(),
            fetch_timeout_ms: settings
                .fetch_timeout
                .map(|timeout| timeout.as_millis() as u64)
                .unwrap_or(0),
            coalesce_misses: settings.coalesce_misses,
            stats_window_secs: settings.stats_window.as_secs(),
        }
    }
}

impl CacheConfig {
    /// Returns the capacity as NonZeroUsize, clamping to 1 if zero.
    pub fn max_items_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.max_items).unwrap_or(NonZeroUsize::MIN)
    }

    /// Number of entries pruning reduces the store to.
    pub fn prune_target(&self) -> usize {
        let ratio = self.prune_target_ratio.clamp(0.0, 1.0);
        (self.max_items_non_zero().get() as f64 * ratio).floor() as usize
    }

    /// Prefetch threshold for a key, as a fraction of its TTL.
    pub fn prefetch_threshold_for(&self, priority: bool) -> f64 {
        if priority {
            self.priority_prefetch_threshold
        } else {
            self.prefetch_threshold
        }
    }

    pub fn slow_fetch_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_fetch_threshold_ms)
    }

    pub fn max_adaptive_ttl(&self) -> Duration {
        Duration::from_secs(self.max_adaptive_ttl_secs)
    }

    /// Fetch timeout, or `None` when disabled.
    pub fn fetch_timeout(&self) -> Option<Duration> {
        (self.fetch_timeout_ms > 0).then(|| Duration::from_millis(self.fetch_timeout_ms))
    }

    pub fn stats_window(&self) -> Duration {
        Duration::from_secs(self.stats_window_secs.max(1))
    }
}
