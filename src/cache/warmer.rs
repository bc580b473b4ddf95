//! Tiered cache warming and invalidate-and-refresh.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use futures::future::join_all;
use metrics::histogram;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use super::fetch::{CacheError, SharedFetcher};
use super::lock;
use super::store::ViewCache;

const SOURCE: &str = "cache::warmer";
const METRIC_WARM_MS: &str = "viewcache_warm_ms";

const DEFAULT_BATCH_SIZE: usize = 4;
const DEFAULT_BATCH_PAUSE_MS: u64 = 100;
const DEFAULT_INVALIDATE_DEBOUNCE_MS: u64 = 500;
const DEFAULT_FAMILY_WARM_LIMIT: usize = 10;
const MAX_FAMILY_ID_LEN: usize = 128;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WarmerConfig {
    pub on_startup: bool,
    /// Keys fetched concurrently per regular-tier chunk.
    pub batch_size: usize,
    pub batch_pause_ms: u64,
    pub invalidate_debounce_ms: u64,
    /// Parameter values kept per family; extra values are dropped.
    pub family_warm_limit: usize,
}

impl Default for WarmerConfig {
    fn default() -> Self {
        Self {
            on_startup: true,
            batch_size: DEFAULT_BATCH_SIZE,
            batch_pause_ms: DEFAULT_BATCH_PAUSE_MS,
            invalidate_debounce_ms: DEFAULT_INVALIDATE_DEBOUNCE_MS,
            family_warm_limit: DEFAULT_FAMILY_WARM_LIMIT,
        }
    }
}

impl From<&crate::config::WarmingSettings> for WarmerConfig {
    fn from(settings: &crate::config::WarmingSettings) -> Self {
        Self {
            on_startup: settings.on_startup,
            batch_size: settings.batch_size.get(),
            batch_pause_ms: settings.batch_pause.as_millis() as u64,
            invalidate_debounce_ms: settings.invalidate_debounce.as_millis() as u64,
            family_warm_limit: settings.family_warm_limit.get(),
        }
    }
}

impl WarmerConfig {
    fn batch_size(&self) -> usize {
        self.batch_size.max(1)
    }

    fn batch_pause(&self) -> Duration {
        Duration::from_millis(self.batch_pause_ms)
    }

    fn invalidate_debounce(&self) -> Duration {
        Duration::from_millis(self.invalidate_debounce_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WarmTier {
    Critical,
    High,
    Regular,
}

impl WarmTier {
    pub fn as_str(self) -> &'static str {
        match self {
            WarmTier::Critical => "critical",
            WarmTier::High => "high",
            WarmTier::Regular => "regular",
        }
    }
}

impl std::fmt::Display for WarmTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error)]
#[error("warming `{key}` ({tier}) failed: {source}")]
pub struct WarmError {
    pub key: String,
    pub tier: WarmTier,
    #[source]
    pub source: CacheError,
}

/// Outcome of one preload pass. A failed key never stops the pass.
#[derive(Debug, Default)]
pub struct WarmReport {
    pub warmed: Vec<String>,
    pub failed: Vec<WarmError>,
}

impl WarmReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    fn record(&mut self, key: &str, tier: WarmTier, outcome: Result<(), CacheError>) {
        match outcome {
            Ok(()) => self.warmed.push(key.to_string()),
            Err(source) => {
                warn!(
                    target = "viewcache::cache::warmer",
                    key,
                    tier = tier.as_str(),
                    error = %source,
                    "failed to warm view"
                );
                self.failed.push(WarmError {
                    key: key.to_string(),
                    tier,
                    source,
                });
            }
        }
    }
}

/// Builds the fetcher for one parameter value of a family.
pub type FamilyFactory = Arc<dyn Fn(&str) -> SharedFetcher + Send + Sync>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FamilyError {
    #[error("unknown view family `{0}`")]
    Unknown(String),
    #[error("invalid id `{id}` for view family `{family}`")]
    InvalidId { family: String, id: String },
}

/// Family ids are limited to URL-safe characters so they substitute into
/// upstream URLs and cache keys unchanged.
pub fn valid_family_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_FAMILY_ID_LEN
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
}

struct Family {
    ttl: Duration,
    priority: bool,
    factory: FamilyFactory,
    warm_ids: Vec<String>,
}

/// Key order for one preload pass.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct WarmPlan {
    pub critical: Vec<String>,
    pub high: Vec<String>,
    pub regular: Vec<String>,
}

impl WarmPlan {
    pub fn len(&self) -> usize {
        self.critical.len() + self.high.len() + self.regular.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub fn family_key(family: &str, id: &str) -> String {
    format!("{family}:{id}")
}

pub struct CacheWarmer {
    cache: Arc<ViewCache>,
    config: WarmerConfig,
    critical: RwLock<HashSet<String>>,
    families: RwLock<HashMap<String, Family>>,
    generation: AtomicU64,
}

impl CacheWarmer {
    pub fn new(cache: Arc<ViewCache>, config: WarmerConfig) -> Arc<Self> {
        Arc::new(Self {
            cache,
            config,
            critical: RwLock::new(HashSet::new()),
            families: RwLock::new(HashMap::new()),
            generation: AtomicU64::new(0),
        })
    }

    pub fn cache(&self) -> &Arc<ViewCache> {
        &self.cache
    }

    pub fn config(&self) -> &WarmerConfig {
        &self.config
    }

    /// Warm `key` sequentially, ahead of every other tier.
    pub fn mark_critical(&self, key: &str) {
        lock::write(&self.critical, SOURCE, "mark_critical").insert(key.to_string());
    }

    pub fn is_critical(&self, key: &str) -> bool {
        lock::read(&self.critical, SOURCE, "is_critical").contains(key)
    }

    /// Declare a parameterized view. Keys are `<name>:<id>`.
    pub fn register_family(
        &self,
        name: &str,
        ttl: Duration,
        priority: bool,
        factory: FamilyFactory,
    ) {
        lock::write(&self.families, SOURCE, "register_family").insert(
            name.to_string(),
            Family {
                ttl,
                priority,
                factory,
                warm_ids: Vec::new(),
            },
        );
        debug!(family = name, ttl_secs = ttl.as_secs(), priority, "family registered");
    }

    /// Replace the parameter values warmed for `name`, keeping the first
    /// `family_warm_limit` of them. Returns the number kept.
    ///
    /// Empty ids are skipped. Any id failing [`valid_family_id`] rejects the
    /// whole call and leaves the previous parameters in place.
    pub fn set_family_parameters(&self, name: &str, ids: &[String]) -> Result<usize, FamilyError> {
        if let Some(bad) = ids.iter().find(|id| !id.is_empty() && !valid_family_id(id)) {
            warn!(
                target = "viewcache::cache::warmer",
                family = name,
                id = %bad,
                "rejected family parameters"
            );
            return Err(FamilyError::InvalidId {
                family: name.to_string(),
                id: bad.clone(),
            });
        }

        let limit = self.config.family_warm_limit;
        let (kept, ttl, priority, factory) = {
            let mut families = lock::write(&self.families, SOURCE, "set_family_parameters");
            let family = families
                .get_mut(name)
                .ok_or_else(|| FamilyError::Unknown(name.to_string()))?;

            let mut seen = HashSet::new();
            family.warm_ids = ids
                .iter()
                .filter(|id| !id.is_empty() && seen.insert(id.as_str()))
                .take(limit)
                .cloned()
                .collect();
            (
                family.warm_ids.clone(),
                family.ttl,
                family.priority,
                Arc::clone(&family.factory),
            )
        };

        for id in &kept {
            self.cache
                .register(&family_key(name, id), factory(id), ttl, priority);
        }
        if ids.len() > kept.len() {
            debug!(
                family = name,
                offered = ids.len(),
                kept = kept.len(),
                "family parameters truncated"
            );
        }
        Ok(kept.len())
    }

    /// The fetcher and TTL serving `<family>:<id>`, if the family exists.
    pub fn family_view(&self, name: &str, id: &str) -> Option<(String, SharedFetcher, Duration)> {
        let families = lock::read(&self.families, SOURCE, "family_view");
        let family = families.get(name)?;
        Some((family_key(name, id), (family.factory)(id), family.ttl))
    }

    /// Partition the registrations into warm tiers, in registration order.
    ///
    /// Family keys are included only for the family's current parameter
    /// values; keys registered by ad hoc reads of other ids are skipped.
    pub fn plan(&self) -> WarmPlan {
        let critical = lock::read(&self.critical, SOURCE, "plan").clone();
        let family_keys: HashMap<String, HashSet<String>> = {
            let families = lock::read(&self.families, SOURCE, "plan");
            families
                .iter()
                .map(|(name, family)| {
                    let keys = family
                        .warm_ids
                        .iter()
                        .map(|id| family_key(name, id))
                        .collect();
                    (name.clone(), keys)
                })
                .collect()
        };

        let mut plan = WarmPlan::default();
        for registration in self.cache.registry().registrations() {
            let key = registration.key;
            let retired = key
                .split_once(':')
                .and_then(|(family, _)| family_keys.get(family))
                .is_some_and(|current| !current.contains(&key));
            if retired {
                continue;
            }

            if critical.contains(&key) {
                plan.critical.push(key);
            } else if registration.priority {
                plan.high.push(key);
            } else {
                plan.regular.push(key);
            }
        }
        plan
    }

    /// Populate the cache tier by tier.
    ///
    /// Critical keys are warmed one at a time and all settle before any
    /// high-priority fetch starts. High-priority keys then run together, and
    /// the rest follow in chunks of `batch_size` separated by `batch_pause`.
    #[instrument(skip_all)]
    pub async fn preload(&self) -> WarmReport {
        let plan = self.plan();
        let mut report = WarmReport::default();
        if plan.is_empty() {
            debug!(target = "viewcache::cache::warmer", "nothing to warm");
            return report;
        }
        info!(
            target = "viewcache::cache::warmer",
            critical = plan.critical.len(),
            high = plan.high.len(),
            regular = plan.regular.len(),
            "warming view cache"
        );

        let started = Instant::now();
        for key in &plan.critical {
            let outcome = self.cache.warm_key(key).await.map(drop);
            report.record(key, WarmTier::Critical, outcome);
        }
        record_tier(WarmTier::Critical, started);

        let started = Instant::now();
        let outcomes = join_all(plan.high.iter().map(|key| self.cache.warm_key(key))).await;
        for (key, outcome) in plan.high.iter().zip(outcomes) {
            report.record(key, WarmTier::High, outcome.map(drop));
        }
        record_tier(WarmTier::High, started);

        let started = Instant::now();
        for (index, chunk) in plan.regular.chunks(self.config.batch_size()).enumerate() {
            if index > 0 && !self.config.batch_pause().is_zero() {
                tokio::time::sleep(self.config.batch_pause()).await;
            }
            let outcomes = join_all(chunk.iter().map(|key| self.cache.warm_key(key))).await;
            for (key, outcome) in chunk.iter().zip(outcomes) {
                report.record(key, WarmTier::Regular, outcome.map(drop));
            }
        }
        record_tier(WarmTier::Regular, started);

        info!(
            target = "viewcache::cache::warmer",
            warmed = report.warmed.len(),
            failed = report.failed.len(),
            "view cache warmed"
        );
        report
    }

    /// Drop non-priority entries, wait out the debounce delay, then preload.
    ///
    /// Returns `None` when a newer invalidation arrived during the debounce;
    /// that call performs the preload instead.
    #[instrument(skip_all)]
    pub async fn invalidate_and_refresh(&self) -> Option<WarmReport> {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let removed = self.cache.invalidate_all(true);
        info!(
            target = "viewcache::cache::warmer",
            removed, generation, "invalidated views, scheduling re-warm"
        );

        let debounce = self.config.invalidate_debounce();
        if !debounce.is_zero() {
            tokio::time::sleep(debounce).await;
        }
        if self.generation.load(Ordering::Acquire) != generation {
            debug!(
                target = "viewcache::cache::warmer",
                generation, "re-warm superseded by a newer invalidation"
            );
            return None;
        }
        Some(self.preload().await)
    }

    /// Run `preload` as tracked background work.
    pub fn spawn_preload(self: &Arc<Self>) -> bool {
        let warmer = Arc::clone(self);
        self.cache.tasks().spawn("preload", async move {
            warmer.preload().await;
        })
    }

    /// Run `invalidate_and_refresh` as tracked background work.
    pub fn spawn_invalidate_and_refresh(self: &Arc<Self>) -> bool {
        let warmer = Arc::clone(self);
        self.cache.tasks().spawn("invalidate_and_refresh", async move {
            warmer.invalidate_and_refresh().await;
        })
    }
}

fn record_tier(tier: WarmTier, started: Instant) {
    histogram!(METRIC_WARM_MS, "tier" => tier.as_str())
        .record(started.elapsed().as_secs_f64() * 1000.0);
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::cache::config::CacheConfig;
    use crate::cache::fetch::fetcher;

    fn constant(value: serde_json::Value) -> SharedFetcher {
        fetcher(move || {
            let value = value.clone();
            async move { Ok(value) }
        })
    }

    fn warmer() -> Arc<CacheWarmer> {
        CacheWarmer::new(ViewCache::new(CacheConfig::default()), WarmerConfig::default())
    }

    #[test]
    fn plan_partitions_by_tier_in_registration_order() {
        let warmer = warmer();
        let ttl = Duration::from_secs(60);
        let cache = warmer.cache();
        cache.register("stats", constant(json!(1)), ttl, true);
        cache.register("summary", constant(json!(2)), ttl, true);
        cache.register("history", constant(json!(3)), ttl, false);
        cache.register("leaders", constant(json!(4)), ttl, false);
        warmer.mark_critical("summary");

        let plan = warmer.plan();
        assert_eq!(plan.critical, vec!["summary"]);
        assert_eq!(plan.high, vec!["stats"]);
        assert_eq!(plan.regular, vec!["history", "leaders"]);
    }

    #[test]
    fn family_parameters_are_truncated_and_deduplicated() {
        let cache = ViewCache::new(CacheConfig::default());
        let warmer = CacheWarmer::new(
            Arc::clone(&cache),
            WarmerConfig {
                family_warm_limit: 2,
                ..Default::default()
            },
        );
        let factory: FamilyFactory = Arc::new(|id: &str| constant(json!({ "id": id })));
        warmer.register_family("item", Duration::from_secs(60), false, factory);

        let ids = ["7", "7", "", "3", "9"].map(String::from);
        assert_eq!(warmer.set_family_parameters("item", &ids), Ok(2));
        assert_eq!(warmer.plan().regular, vec!["item:7", "item:3"]);
        assert_eq!(
            warmer.set_family_parameters("missing", &ids),
            Err(FamilyError::Unknown("missing".into()))
        );
    }

    #[test]
    fn unsafe_family_ids_are_rejected_without_registering() {
        let warmer = warmer();
        let factory: FamilyFactory = Arc::new(|id: &str| constant(json!(id)));
        warmer.register_family("item", Duration::from_secs(60), false, factory);
        warmer
            .set_family_parameters("item", &["1".into()])
            .expect("known family");

        let ids = ["2", "../../admin?x=1"].map(String::from);
        assert_eq!(
            warmer.set_family_parameters("item", &ids),
            Err(FamilyError::InvalidId {
                family: "item".into(),
                id: "../../admin?x=1".into(),
            })
        );
        assert_eq!(warmer.plan().regular, vec!["item:1"]);
        assert!(warmer.cache().registry().get("item:2").is_none());
        assert!(warmer.cache().registry().get("item:../../admin?x=1").is_none());
    }

    #[test]
    fn family_ids_are_url_safe() {
        assert!(valid_family_id("item-42_v1.2"));
        assert!(!valid_family_id(""));
        assert!(!valid_family_id("../etc"));
        assert!(!valid_family_id("a b"));
        assert!(!valid_family_id(&"x".repeat(MAX_FAMILY_ID_LEN + 1)));
    }

    #[test]
    fn stale_family_ids_drop_out_of_the_plan() {
        let warmer = warmer();
        let factory: FamilyFactory = Arc::new(|id: &str| constant(json!(id)));
        warmer.register_family("item", Duration::from_secs(60), false, factory);

        warmer
            .set_family_parameters("item", &["1".into(), "2".into()])
            .expect("known family");
        warmer
            .set_family_parameters("item", &["2".into()])
            .expect("known family");

        assert_eq!(warmer.plan().regular, vec!["item:2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_are_reported_without_stopping_the_pass() {
        let warmer = warmer();
        let ttl = Duration::from_secs(60);
        let cache = warmer.cache();
        cache.register("ok", constant(json!(1)), ttl, false);
        cache.register(
            "broken",
            fetcher(|| async { Err(crate::cache::FetchError::upstream("down")) }),
            ttl,
            false,
        );
        cache.register("also_ok", constant(json!(2)), ttl, false);

        let report = warmer.preload().await;
        assert_eq!(report.warmed, vec!["ok", "also_ok"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].key, "broken");
        assert_eq!(report.failed[0].tier, WarmTier::Regular);
        assert!(cache.peek("also_ok").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn newer_invalidation_supersedes_pending_refresh() {
        let warmer = warmer();
        warmer
            .cache()
            .register("k", constant(json!(1)), Duration::from_secs(60), false);

        let (first, second) = tokio::join!(
            warmer.invalidate_and_refresh(),
            async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                warmer.invalidate_and_refresh().await
            }
        );

        assert!(first.is_none());
        let report = second.expect("latest invalidation re-warms");
        assert_eq!(report.warmed, vec!["k"]);
    }
}
