use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::{
    body::Body,
    http::{Method, Request, StatusCode, header::ETAG},
};
use metrics_util::debugging::DebuggingRecorder;
use serde_json::json;
use tower::ServiceExt;
use viewcache::cache::{
    CacheConfig, CacheWarmer, FetchError, SharedFetcher, ViewCache, WarmerConfig, fetcher,
};
use viewcache::http::{AppState, HttpOptions, ViewEndpoint, ViewRoute, build_router};

fn constant(value: serde_json::Value) -> SharedFetcher {
    fetcher(move || {
        let value = value.clone();
        async move { Ok(value) }
    })
}

#[tokio::test(start_paused = true)]
async fn cache_paths_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");

    let ttl = Duration::from_secs(100);

    // Eviction and starvation on a one-slot store.
    let tiny = ViewCache::new(CacheConfig {
        max_items: 1,
        ..Default::default()
    });
    tiny.get("a", constant(json!(1)), ttl).await.expect("fill a");
    tiny.get("b", constant(json!(2)), ttl).await.expect("fill b");
    for key in ["p1", "p2"] {
        tiny.register(key, constant(json!(key)), ttl, true);
        tiny.get(key, constant(json!(key)), ttl).await.expect("fill priority");
    }

    // Hit, prefetch and stale-on-error.
    let cache = ViewCache::new(CacheConfig::default());
    cache.get("hot", constant(json!("v1")), ttl).await.expect("fill hot");
    tokio::time::advance(Duration::from_secs(95)).await;
    cache.get("hot", constant(json!("v1")), ttl).await.expect("hit hot");
    tokio::time::sleep(Duration::from_millis(10)).await;

    let broken = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&broken);
    let flaky = fetcher(move || {
        let flag = Arc::clone(&flag);
        async move {
            if flag.load(Ordering::SeqCst) {
                Err(FetchError::upstream("down"))
            } else {
                Ok(json!("ok"))
            }
        }
    });
    cache.get("flaky", Arc::clone(&flaky), ttl).await.expect("fill flaky");
    tokio::time::advance(ttl).await;
    broken.store(true, Ordering::SeqCst);
    cache.get("flaky", flaky, ttl).await.expect("stale value");

    // Warming.
    let warmer = CacheWarmer::new(Arc::clone(&cache), WarmerConfig::default());
    cache.register("warm", constant(json!("w")), ttl, false);
    warmer.preload().await;

    // Conditional request through the adapter.
    let views = vec![ViewEndpoint {
        path: "/api/summary".into(),
        route: ViewRoute {
            key: "summary".into(),
            fetcher: constant(json!({ "total": 1 })),
            ttl,
        },
    }];
    let app = build_router(AppState::new(warmer, HttpOptions::default()), &views, &[]);
    let mut etag = None;
    for _ in 0..2 {
        let mut builder = Request::builder().method(Method::GET).uri("/api/summary");
        if let Some(etag) = &etag {
            builder = builder.header("if-none-match", etag);
        }
        let response = app
            .clone()
            .oneshot(builder.body(Body::empty()).expect("request should build"))
            .await
            .expect("router should respond");
        assert!(matches!(
            response.status(),
            StatusCode::OK | StatusCode::NOT_MODIFIED
        ));
        etag = response
            .headers()
            .get(ETAG)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
    }

    let names: HashSet<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();

    let expected = [
        "viewcache_hit_total",
        "viewcache_miss_total",
        "viewcache_stale_served_total",
        "viewcache_evict_total",
        "viewcache_eviction_starvation_total",
        "viewcache_prefetch_total",
        "viewcache_fetch_ms",
        "viewcache_entries",
        "viewcache_warm_ms",
        "viewcache_http_not_modified_total",
    ];

    for metric in expected {
        assert!(names.contains(metric), "missing metric: {metric}");
    }
}
