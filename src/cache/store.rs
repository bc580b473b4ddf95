//! The read-through view cache.
//!
//! Entries are keyed by logical view name and filled by fetch functions. A
//! live hit returns immediately and may schedule a background prefetch; a miss
//! awaits the fetch; a failed miss falls back to the expired entry when one is
//! still stored.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use futures::FutureExt;
use metrics::{counter, gauge, histogram};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use super::config::CacheConfig;
use super::entry::{CacheEntry, EntrySnapshot, ViewData};
use super::fetch::{CacheError, SharedFetcher};
use super::inflight::InFlightFetches;
use super::lock;
use super::prefetch::{PrefetchGuard, PrefetchQueue, adaptive_ttl, should_prefetch};
use super::registry::{FetchRegistry, Registration};
use super::stats::{CacheCounters, CacheStats};
use super::tasks::BackgroundTasks;

const SOURCE: &str = "cache::store";

const METRIC_HIT: &str = "viewcache_hit_total";
const METRIC_MISS: &str = "viewcache_miss_total";
const METRIC_STALE_SERVED: &str = "viewcache_stale_served_total";
const METRIC_EVICT: &str = "viewcache_evict_total";
const METRIC_EVICTION_STARVATION: &str = "viewcache_eviction_starvation_total";
const METRIC_PREFETCH: &str = "viewcache_prefetch_total";
const METRIC_FETCH_MS: &str = "viewcache_fetch_ms";
const METRIC_ENTRIES: &str = "viewcache_entries";

/// Process-wide cache service. Construct once and share behind an `Arc`.
pub struct ViewCache {
    config: CacheConfig,
    entries: RwLock<HashMap<String, CacheEntry>>,
    registry: FetchRegistry,
    prefetch: PrefetchQueue,
    inflight: InFlightFetches,
    counters: CacheCounters,
    tasks: BackgroundTasks,
}

impl ViewCache {
    pub fn new(config: CacheConfig) -> Arc<Self> {
        let counters = CacheCounters::new(config.stats_window());
        Arc::new(Self {
            config,
            entries: RwLock::new(HashMap::new()),
            registry: FetchRegistry::new(),
            prefetch: PrefetchQueue::new(),
            inflight: InFlightFetches::new(),
            counters,
            tasks: BackgroundTasks::new(),
        })
    }

    /// Resolve `key`, fetching it with `fetcher` on a miss.
    ///
    /// The key is registered with `(fetcher, ttl)` the first time it is seen,
    /// so it can later be prefetched and warmed without the caller.
    #[instrument(skip_all, fields(key = %key))]
    pub async fn get(
        self: &Arc<Self>,
        key: &str,
        fetcher: SharedFetcher,
        ttl: Duration,
    ) -> Result<ViewData, CacheError> {
        self.counters.record_request();
        let now = Instant::now();

        if let Some(data) = self.lookup_live(key, now) {
            return Ok(data);
        }

        self.counters.record_miss();
        counter!(METRIC_MISS).increment(1);
        debug!(outcome = "miss", "cache miss, fetching");

        self.registry
            .register_if_absent(key, Arc::clone(&fetcher), ttl);

        match self.fill(key, fetcher, ttl).await {
            Ok(data) => Ok(data),
            Err(error) => self.fallback_after_failure(key, error),
        }
    }

    /// Insert or replace the registration for `key`.
    ///
    /// `priority` keys are exempt from pruning and survive
    /// `invalidate_all(true)`.
    pub fn register(&self, key: &str, fetcher: SharedFetcher, ttl: Duration, priority: bool) {
        self.registry.register(key, fetcher, ttl, priority);
        debug!(key, ttl_secs = ttl.as_secs(), priority, "view registered");
    }

    /// Fetch `key` through its registration and store the result.
    ///
    /// Joins a miss already in flight for the key. No stale fallback: warming
    /// reports failures instead of hiding them.
    pub async fn warm_key(self: &Arc<Self>, key: &str) -> Result<ViewData, CacheError> {
        let registration = self
            .registry
            .get(key)
            .ok_or_else(|| CacheError::NotRegistered {
                key: key.to_string(),
            })?;
        self.fill(key, registration.fetcher, registration.ttl).await
    }

    /// Remove the entry for `key`; its registration stays.
    pub fn invalidate(&self, key: &str) -> bool {
        let removed = lock::write(&self.entries, SOURCE, "invalidate")
            .remove(key)
            .is_some();
        if removed {
            debug!(key, "entry invalidated");
            self.record_size();
        }
        removed
    }

    /// Remove every entry, keeping priority entries when `preserve_priority`.
    ///
    /// Returns the number of entries removed.
    pub fn invalidate_all(&self, preserve_priority: bool) -> usize {
        let priority = if preserve_priority {
            self.registry.priority_keys()
        } else {
            Default::default()
        };

        let removed = {
            let mut entries = lock::write(&self.entries, SOURCE, "invalidate_all");
            let before = entries.len();
            entries.retain(|key, _| priority.contains(key));
            before - entries.len()
        };

        info!(
            removed,
            preserved = priority.len(),
            preserve_priority,
            "bulk invalidation"
        );
        self.record_size();
        removed
    }

    /// Prune if the store is over capacity. Returns the number of evictions.
    pub fn prune(&self) -> usize {
        self.prune_protecting(None)
    }

    /// Current state of `key`'s entry, without touching stats or prefetch.
    pub fn peek(&self, key: &str) -> Option<EntrySnapshot> {
        let now = Instant::now();
        lock::read(&self.entries, SOURCE, "peek")
            .get(key)
            .map(|entry| entry.snapshot(key, now))
    }

    pub fn len(&self) -> usize {
        lock::read(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            size: self.len(),
            hits: self.counters.hits(),
            misses: self.counters.misses(),
            stale_served: self.counters.stale_served(),
            prefetches: self.counters.prefetches(),
            evictions: self.counters.evictions(),
            requests_per_window: self.counters.requests_in_window(),
            window_secs: self.counters.window_len().as_secs(),
            registered_keys: self.registry.len(),
            priority_keys: self.registry.priority_count(),
            prefetches_in_flight: self.prefetch.len(),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn registry(&self) -> &FetchRegistry {
        &self.registry
    }

    pub fn prefetch_queue(&self) -> &PrefetchQueue {
        &self.prefetch
    }

    pub fn tasks(&self) -> &BackgroundTasks {
        &self.tasks
    }

    /// Abort background prefetches and warms. Reads keep working afterwards,
    /// without prefetch.
    pub async fn shutdown(&self) {
        self.tasks.shutdown().await;
    }

    fn lookup_live(self: &Arc<Self>, key: &str, now: Instant) -> Option<ViewData> {
        let entry = lock::read(&self.entries, SOURCE, "lookup")
            .get(key)
            .filter(|entry| entry.is_live(now))
            .cloned()?;

        self.counters.record_hit();
        counter!(METRIC_HIT).increment(1);
        self.maybe_prefetch(key, &entry, now);
        Some(Arc::clone(entry.data()))
    }

    fn fallback_after_failure(
        &self,
        key: &str,
        error: CacheError,
    ) -> Result<ViewData, CacheError> {
        let now = Instant::now();
        let existing = lock::read(&self.entries, SOURCE, "fallback")
            .get(key)
            .map(|entry| (Arc::clone(entry.data()), entry.is_live(now)));

        match existing {
            // Another caller refilled the key while this fetch was failing.
            Some((data, true)) => Ok(data),
            Some((data, false)) => {
                self.counters.record_stale();
                counter!(METRIC_STALE_SERVED).increment(1);
                warn!(
                    key,
                    outcome = "stale_on_error",
                    error = %error,
                    "serving stale value after fetch failure"
                );
                Ok(data)
            }
            None => {
                warn!(
                    key,
                    outcome = "fetch_failed",
                    error = %error,
                    "fetch failed with no cached value to fall back to"
                );
                Err(error)
            }
        }
    }

    async fn fill(
        self: &Arc<Self>,
        key: &str,
        fetcher: SharedFetcher,
        ttl: Duration,
    ) -> Result<ViewData, CacheError> {
        if !self.config.coalesce_misses {
            return self.fetch_and_store(key, &fetcher, ttl).await;
        }

        let (pending, leader) = self.inflight.join_or_start(key, || {
            let cache = Arc::clone(self);
            let key = key.to_string();
            async move { cache.fetch_and_store(&key, &fetcher, ttl).await }.boxed()
        });
        if !leader {
            debug!(key, "joining in-flight fetch");
        }
        pending.await
    }

    async fn fetch_and_store(
        &self,
        key: &str,
        fetcher: &SharedFetcher,
        ttl: Duration,
    ) -> Result<ViewData, CacheError> {
        let (value, _) = self.run_fetch(key, fetcher).await?;
        let data = Arc::new(value);
        self.insert(key, Arc::clone(&data), ttl);
        Ok(data)
    }

    /// Call the fetch function under the configured timeout.
    async fn run_fetch(
        &self,
        key: &str,
        fetcher: &SharedFetcher,
    ) -> Result<(serde_json::Value, Duration), CacheError> {
        let started = Instant::now();
        let outcome = match self.config.fetch_timeout() {
            Some(after) => match tokio::time::timeout(after, fetcher.fetch()).await {
                Ok(result) => result,
                Err(_) => {
                    return Err(CacheError::Timeout {
                        key: key.to_string(),
                        after,
                    });
                }
            },
            None => fetcher.fetch().await,
        };
        let elapsed = started.elapsed();
        histogram!(METRIC_FETCH_MS).record(elapsed.as_secs_f64() * 1000.0);

        outcome
            .map(|value| (value, elapsed))
            .map_err(|source| CacheError::Fetch {
                key: key.to_string(),
                source,
            })
    }

    fn insert(&self, key: &str, data: ViewData, ttl: Duration) {
        let over_capacity = {
            let mut entries = lock::write(&self.entries, SOURCE, "insert");
            entries.insert(key.to_string(), CacheEntry::new(data, Instant::now(), ttl));
            entries.len() > self.config.max_items_non_zero().get()
        };
        if over_capacity {
            self.prune_protecting(Some(key));
        }
        self.record_size();
    }

    /// Two-phase pruning: expired non-priority entries first, then the oldest
    /// non-priority entries until the store is at its target fill. `protect`
    /// is never a candidate.
    fn prune_protecting(&self, protect: Option<&str>) -> usize {
        let max_items = self.config.max_items_non_zero().get();
        let target = self.config.prune_target();
        let priority = self.registry.priority_keys();
        let now = Instant::now();

        let (evicted, remaining) = {
            let mut entries = lock::write(&self.entries, SOURCE, "prune");
            if entries.len() <= max_items {
                return 0;
            }
            let before = entries.len();
            let evictable = |key: &str| !priority.contains(key) && Some(key) != protect;

            entries.retain(|key, entry| !evictable(key.as_str()) || entry.is_live(now));

            if entries.len() > target {
                let mut oldest: Vec<(Instant, String)> = entries
                    .iter()
                    .filter(|(key, _)| evictable(key.as_str()))
                    .map(|(key, entry)| (entry.created_at(), key.clone()))
                    .collect();
                oldest.sort();
                let excess = entries.len() - target;
                for (_, key) in oldest.into_iter().take(excess) {
                    entries.remove(&key);
                }
            }

            (before - entries.len(), entries.len())
        };

        if evicted > 0 {
            self.counters.record_evictions(evicted);
            counter!(METRIC_EVICT).increment(evicted as u64);
            debug!(evicted, remaining, target, "pruned cache");
        }

        if remaining > max_items {
            counter!(METRIC_EVICTION_STARVATION).increment(1);
            warn!(
                remaining,
                max_items,
                priority_keys = priority.len(),
                "cache over capacity with only priority entries left to evict"
            );
        }

        evicted
    }

    fn maybe_prefetch(self: &Arc<Self>, key: &str, entry: &CacheEntry, now: Instant) {
        let priority = self.registry.is_priority(key);
        let threshold = self.config.prefetch_threshold_for(priority);
        if !should_prefetch(entry.remaining(now), entry.ttl(), threshold) {
            return;
        }

        let Some(registration) = self.registry.get(key) else {
            return;
        };
        let Some(guard) = self.prefetch.try_acquire(key) else {
            debug!(key, "prefetch already in flight");
            return;
        };

        debug!(
            key,
            remaining_ms = entry.remaining(now).as_millis() as u64,
            priority,
            "scheduling prefetch"
        );
        let cache = Arc::clone(self);
        self.tasks.spawn("prefetch", async move {
            cache.run_prefetch(guard, registration).await;
        });
    }

    async fn run_prefetch(&self, guard: PrefetchGuard, registration: Registration) {
        let key = guard.key();
        match self.run_fetch(key, &registration.fetcher).await {
            Ok((value, latency)) => {
                let ttl = adaptive_ttl(&self.config, registration.ttl, latency);
                if ttl != registration.ttl {
                    info!(
                        key,
                        latency_ms = latency.as_millis() as u64,
                        nominal_ttl_secs = registration.ttl.as_secs(),
                        ttl_secs = ttl.as_secs(),
                        "slow fetch, extending ttl"
                    );
                }
                self.insert(key, Arc::new(value), ttl);
                self.counters.record_prefetch();
                counter!(METRIC_PREFETCH, "outcome" => "ok").increment(1);
            }
            Err(error) => {
                counter!(METRIC_PREFETCH, "outcome" => "error").increment(1);
                warn!(key, error = %error, "prefetch failed, keeping existing entry");
            }
        }
    }

    fn record_size(&self) {
        gauge!(METRIC_ENTRIES).set(self.len() as f64);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::{Value, json};

    use super::*;
    use crate::cache::fetch::{FetchError, fetcher};

    fn counting(value: Value, calls: Arc<AtomicUsize>) -> SharedFetcher {
        fetcher(move || {
            let value = value.clone();
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(value)
            }
        })
    }

    fn failing() -> SharedFetcher {
        fetcher(|| async { Err(FetchError::upstream("backing store unavailable")) })
    }

    #[tokio::test(start_paused = true)]
    async fn live_hits_do_not_refetch() {
        let cache = ViewCache::new(CacheConfig::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let fetch = counting(json!({"items": 3}), Arc::clone(&calls));
        let ttl = Duration::from_secs(300);

        for _ in 0..5 {
            let value = cache.get("summary", Arc::clone(&fetch), ttl).await;
            assert_eq!(value.ok().map(|v| (*v).clone()), Some(json!({"items": 3})));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stats = cache.stats();
        assert_eq!(stats.hits, 4);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.requests_per_window, 5);
        assert_eq!(stats.registered_keys, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entries_are_refetched() {
        let cache = ViewCache::new(CacheConfig::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let fetch = counting(json!(1), Arc::clone(&calls));
        let ttl = Duration::from_secs(60);

        cache.get("k", Arc::clone(&fetch), ttl).await.expect("fill");
        tokio::time::advance(Duration::from_secs(60)).await;
        cache.get("k", Arc::clone(&fetch), ttl).await.expect("refill");

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn miss_without_history_propagates_the_error() {
        let cache = ViewCache::new(CacheConfig::default());
        let result = cache.get("k", failing(), Duration::from_secs(60)).await;
        assert!(matches!(result, Err(CacheError::Fetch { ref key, .. }) if key == "k"));
        assert!(cache.peek("k").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_fetch_times_out() {
        let cache = ViewCache::new(CacheConfig {
            fetch_timeout_ms: 100,
            ..Default::default()
        });
        let slow = fetcher(|| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(json!("late"))
        });

        let result = cache.get("k", slow, Duration::from_secs(60)).await;
        assert!(matches!(result, Err(CacheError::Timeout { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn invalidate_keeps_the_registration() {
        let cache = ViewCache::new(CacheConfig::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let fetch = counting(json!(1), Arc::clone(&calls));

        cache.get("k", fetch, Duration::from_secs(60)).await.expect("fill");
        assert!(cache.invalidate("k"));
        assert!(!cache.invalidate("k"));
        assert!(cache.peek("k").is_none());

        cache.warm_key("k").await.expect("warm through registration");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(cache.peek("k").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn warm_key_requires_registration() {
        let cache = ViewCache::new(CacheConfig::default());
        let result = cache.warm_key("unknown").await;
        assert!(matches!(result, Err(CacheError::NotRegistered { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn pruning_drops_expired_entries_first() {
        let cache = ViewCache::new(CacheConfig {
            max_items: 3,
            prune_target_ratio: 1.0,
            ..Default::default()
        });
        let calls = Arc::new(AtomicUsize::new(0));

        cache
            .get("short", counting(json!(1), Arc::clone(&calls)), Duration::from_secs(10))
            .await
            .expect("fill");
        tokio::time::advance(Duration::from_secs(1)).await;
        for key in ["a", "b"] {
            cache
                .get(key, counting(json!(2), Arc::clone(&calls)), Duration::from_secs(600))
                .await
                .expect("fill");
        }
        tokio::time::advance(Duration::from_secs(30)).await;
        cache
            .get("c", counting(json!(3), Arc::clone(&calls)), Duration::from_secs(600))
            .await
            .expect("fill");

        assert!(cache.peek("short").is_none());
        for key in ["a", "b", "c"] {
            assert!(cache.peek(key).is_some(), "{key} should survive");
        }
        assert_eq!(cache.stats().evictions, 1);
    }
}
