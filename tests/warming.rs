use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tokio::time::Instant;
use viewcache::cache::{
    CacheConfig, CacheWarmer, FamilyFactory, SharedFetcher, ViewCache, WarmerConfig, family_key,
    fetcher,
};

type Log = Arc<Mutex<Vec<String>>>;

/// Logs `<key>:start` and `<key>:end` around a fetch that takes `delay`.
fn logged(key: &'static str, delay: Duration, log: &Log) -> SharedFetcher {
    let log = Arc::clone(log);
    fetcher(move || {
        let log = Arc::clone(&log);
        async move {
            log.lock().unwrap().push(format!("{key}:start"));
            tokio::time::sleep(delay).await;
            log.lock().unwrap().push(format!("{key}:end"));
            Ok(json!(key))
        }
    })
}

/// Records the instant each fetch starts, relative to `origin`.
fn timed(origin: Instant, starts: &Arc<Mutex<Vec<Duration>>>) -> SharedFetcher {
    let starts = Arc::clone(starts);
    fetcher(move || {
        let starts = Arc::clone(&starts);
        async move {
            starts.lock().unwrap().push(origin.elapsed());
            Ok(json!(null))
        }
    })
}

fn position(log: &[String], entry: &str) -> usize {
    log.iter()
        .position(|logged| logged == entry)
        .unwrap_or_else(|| panic!("`{entry}` missing from {log:?}"))
}

#[tokio::test(start_paused = true)]
async fn critical_views_settle_before_high_priority_ones_start() {
    let cache = ViewCache::new(CacheConfig::default());
    let warmer = CacheWarmer::new(Arc::clone(&cache), WarmerConfig::default());
    let log: Log = Arc::default();
    let ttl = Duration::from_secs(300);

    cache.register("high-a", logged("high-a", Duration::from_millis(10), &log), ttl, true);
    cache.register("crit-1", logged("crit-1", Duration::from_secs(2), &log), ttl, true);
    cache.register("regular", logged("regular", Duration::ZERO, &log), ttl, false);
    cache.register("crit-2", logged("crit-2", Duration::from_secs(1), &log), ttl, false);
    cache.register("high-b", logged("high-b", Duration::from_millis(10), &log), ttl, true);
    warmer.mark_critical("crit-1");
    warmer.mark_critical("crit-2");

    let report = warmer.preload().await;
    assert!(report.is_clean());
    assert_eq!(report.warmed.len(), 5);

    let log = log.lock().unwrap().clone();
    // Critical views run one at a time.
    assert!(position(&log, "crit-1:end") < position(&log, "crit-2:start"));
    for high in ["high-a", "high-b"] {
        assert!(position(&log, "crit-2:end") < position(&log, &format!("{high}:start")));
        assert!(position(&log, &format!("{high}:end")) < position(&log, "regular:start"));
    }
    // High-priority views run together.
    assert!(position(&log, "high-b:start") < position(&log, "high-a:end"));

    for key in ["crit-1", "crit-2", "high-a", "high-b", "regular"] {
        assert!(cache.peek(key).is_some(), "`{key}` not warmed");
    }
}

#[tokio::test(start_paused = true)]
async fn regular_views_are_warmed_in_paced_chunks() {
    let cache = ViewCache::new(CacheConfig::default());
    let warmer = CacheWarmer::new(
        Arc::clone(&cache),
        WarmerConfig {
            batch_size: 2,
            batch_pause_ms: 100,
            ..Default::default()
        },
    );
    let origin = Instant::now();
    let starts = Arc::new(Mutex::new(Vec::new()));
    for index in 0..5 {
        cache.register(
            &format!("view-{index}"),
            timed(origin, &starts),
            Duration::from_secs(60),
            false,
        );
    }

    let report = warmer.preload().await;
    assert_eq!(report.warmed.len(), 5);

    let starts = starts.lock().unwrap().clone();
    let ms: Vec<u128> = starts.iter().map(Duration::as_millis).collect();
    assert_eq!(ms, vec![0, 0, 100, 100, 200]);
}

#[tokio::test(start_paused = true)]
async fn invalidate_and_refresh_keeps_priority_views_while_rewarming() {
    let cache = ViewCache::new(CacheConfig::default());
    let warmer = CacheWarmer::new(
        Arc::clone(&cache),
        WarmerConfig {
            invalidate_debounce_ms: 500,
            ..Default::default()
        },
    );
    let log: Log = Arc::default();
    let ttl = Duration::from_secs(300);
    cache.register("pinned", logged("pinned", Duration::ZERO, &log), ttl, true);
    cache.register("plain", logged("plain", Duration::ZERO, &log), ttl, false);
    warmer.preload().await;
    let pinned_before = cache.peek("pinned").expect("pinned warmed");

    tokio::time::advance(Duration::from_secs(10)).await;
    let refresh = {
        let warmer = Arc::clone(&warmer);
        tokio::spawn(async move { warmer.invalidate_and_refresh().await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    // During the debounce only the priority entry is left.
    assert!(cache.peek("plain").is_none());
    let pinned_during = cache.peek("pinned").expect("pinned kept");
    assert_eq!(pinned_during.created_at, pinned_before.created_at);

    let report = refresh
        .await
        .expect("refresh task")
        .expect("no newer invalidation");
    assert!(report.is_clean());
    assert!(cache.peek("plain").is_some());
    let pinned_after = cache.peek("pinned").expect("pinned refreshed");
    assert!(pinned_after.created_at > pinned_before.created_at);
}

#[tokio::test(start_paused = true)]
async fn burst_of_invalidations_rewarms_once() {
    let cache = ViewCache::new(CacheConfig::default());
    let warmer = CacheWarmer::new(
        Arc::clone(&cache),
        WarmerConfig {
            invalidate_debounce_ms: 500,
            ..Default::default()
        },
    );
    let log: Log = Arc::default();
    cache.register("plain", logged("plain", Duration::ZERO, &log), Duration::from_secs(60), false);

    for _ in 0..3 {
        assert!(warmer.spawn_invalidate_and_refresh());
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    tokio::time::sleep(Duration::from_secs(1)).await;

    let starts = log
        .lock()
        .unwrap()
        .iter()
        .filter(|entry| entry.as_str() == "plain:start")
        .count();
    assert_eq!(starts, 1);
    assert!(cache.peek("plain").is_some());
}

#[tokio::test(start_paused = true)]
async fn family_views_are_warmed_for_their_current_ids_only() {
    let cache = ViewCache::new(CacheConfig::default());
    let warmer = CacheWarmer::new(Arc::clone(&cache), WarmerConfig::default());
    let factory: FamilyFactory = Arc::new(|id: &str| {
        let id = id.to_string();
        fetcher(move || {
            let id = id.clone();
            async move { Ok(json!({ "id": id })) }
        })
    });
    warmer.register_family("tag", Duration::from_secs(120), false, factory);
    warmer
        .set_family_parameters("tag", &["rust".into(), "tokio".into()])
        .expect("family exists");

    // An ad hoc read registers a key outside the warm set.
    let (key, fetch, ttl) = warmer.family_view("tag", "serde").expect("family exists");
    cache.get(&key, fetch, ttl).await.expect("ad hoc read");
    cache.invalidate(&key);

    let report = warmer.preload().await;
    assert_eq!(
        report.warmed,
        vec![family_key("tag", "rust"), family_key("tag", "tokio")]
    );
    assert_eq!(
        *cache.peek("tag:rust").expect("warmed").data,
        json!({ "id": "rust" })
    );
    assert!(cache.peek("tag:serde").is_none());
    assert!(warmer.family_view("unknown", "x").is_none());
}

#[tokio::test(start_paused = true)]
async fn shutdown_cancels_a_running_preload() {
    let cache = ViewCache::new(CacheConfig::default());
    let warmer = CacheWarmer::new(Arc::clone(&cache), WarmerConfig::default());
    let log: Log = Arc::default();
    let ttl = Duration::from_secs(60);
    cache.register("slow", logged("slow", Duration::from_secs(30), &log), ttl, false);

    assert!(warmer.spawn_preload());
    tokio::time::sleep(Duration::from_secs(1)).await;
    cache.shutdown().await;
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert!(cache.peek("slow").is_none());
    assert_eq!(log.lock().unwrap().as_slice(), ["slow:start"]);
    assert!(!warmer.spawn_preload());
}
