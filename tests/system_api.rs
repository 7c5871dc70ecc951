//! HTTP surface tests: webhook ingestion, dashboard reads, stats, health.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use bytes::Bytes;
use http_body_util::BodyExt;
use mirador::{
    application::{
        invalidation::InvalidationService, reads::DashboardReadService, replay::ReplayService,
    },
    cache::{CacheStore, ModulePolicy, PolicyTable},
    infra::http::{AppState, build_router},
    infra::objstore::MemoryObjectStore,
    stream::{BroadcastHub, DEFAULT_CHANNEL_CAPACITY},
};
use serde_json::{Value, json};
use tower::ServiceExt;

fn test_policies() -> PolicyTable {
    let mut modules = HashMap::new();
    modules.insert(
        "recommendations".to_string(),
        ModulePolicy {
            ttl: Duration::from_secs(300),
            enabled: true,
        },
    );
    PolicyTable::new(modules)
}

fn build_app() -> (Arc<MemoryObjectStore>, Arc<CacheStore>, Router) {
    let objects = Arc::new(MemoryObjectStore::new());
    let objects_dyn: Arc<dyn mirador::infra::objstore::ObjectStore> = objects.clone();

    let store = Arc::new(CacheStore::new(test_policies()));
    let hub = Arc::new(BroadcastHub::new(DEFAULT_CHANNEL_CAPACITY));
    let reads = Arc::new(DashboardReadService::new(store.clone(), objects_dyn.clone()));
    let invalidation = Arc::new(InvalidationService::new(store.clone(), hub.clone()));
    let replay = Arc::new(ReplayService::new(
        objects_dyn.clone(),
        HashMap::new(),
        vec!["events".to_string()],
        Duration::from_millis(1),
    ));

    let router = build_router(AppState {
        store: store.clone(),
        objects: objects_dyn,
        hub,
        reads,
        invalidation,
        replay,
    });

    (objects, store, router)
}

async fn get_json(router: &Router, uri: &str) -> (StatusCode, Value) {
    let response = router
        .clone()
        .oneshot(Request::get(uri).body(Body::empty()).expect("request"))
        .await
        .expect("response");
    let status = response.status();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

async fn post_hook(router: &Router, body: &str) -> StatusCode {
    let request = Request::post("/hooks/storage")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("request");
    router
        .clone()
        .oneshot(request)
        .await
        .expect("response")
        .status()
}

#[tokio::test]
async fn webhook_always_answers_no_content() {
    let (_objects, _store, router) = build_app();

    let valid = json!({"event": "created", "key": "recommendations/instagram/jane/feed.json"});
    assert_eq!(
        post_hook(&router, &valid.to_string()).await,
        StatusCode::NO_CONTENT
    );

    // Malformed payloads are ignored, not retried.
    assert_eq!(post_hook(&router, "not json").await, StatusCode::NO_CONTENT);
    assert_eq!(
        post_hook(&router, r#"{"unexpected": true}"#).await,
        StatusCode::NO_CONTENT
    );
}

#[tokio::test]
async fn dashboard_read_populates_and_serves_from_cache() {
    let (objects, store, router) = build_app();
    objects
        .put_at(
            "recommendations/instagram/jane/feed.json",
            Bytes::from(r#"{"id": 1}"#),
            time::OffsetDateTime::now_utc(),
        );

    let (status, body) = get_json(&router, "/api/data/recommendations/instagram/jane").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([{"id": 1}]));

    // Second read is a hit: the store can go away without affecting it.
    objects.set_fail_reads(true);
    let (status, body) = get_json(&router, "/api/data/recommendations/instagram/jane").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([{"id": 1}]));
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn webhook_invalidation_forces_a_refetch() {
    let (objects, store, router) = build_app();
    objects.put_at(
        "recommendations/instagram/jane/feed.json",
        Bytes::from(r#""v1""#),
        time::OffsetDateTime::now_utc(),
    );

    let (_, body) = get_json(&router, "/api/data/recommendations/instagram/jane").await;
    assert_eq!(body, json!(["v1"]));

    objects.put_at(
        "recommendations/instagram/jane/feed.json",
        Bytes::from(r#""v2""#),
        time::OffsetDateTime::now_utc(),
    );

    // Without invalidation the TTL would keep serving v1.
    let notification =
        json!({"event": "updated", "key": "recommendations/instagram/jane/feed.json"});
    assert_eq!(
        post_hook(&router, &notification.to_string()).await,
        StatusCode::NO_CONTENT
    );
    assert_eq!(store.len(), 0);

    let (_, body) = get_json(&router, "/api/data/recommendations/instagram/jane").await;
    assert_eq!(body, json!(["v2"]));
}

#[tokio::test]
async fn cache_stats_snapshot_reflects_activity() {
    let (objects, _store, router) = build_app();
    objects.put_at(
        "recommendations/instagram/jane/feed.json",
        Bytes::from(r#"{"id": 1}"#),
        time::OffsetDateTime::now_utc(),
    );

    // One miss (populate) followed by one hit.
    get_json(&router, "/api/data/recommendations/instagram/jane").await;
    get_json(&router, "/api/data/recommendations/instagram/jane").await;

    let (status, stats) = get_json(&router, "/api/system/cache-stats").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["total_entries"], json!(1));
    assert_eq!(stats["modules"]["recommendations"]["entries"], json!(1));

    let counters = &stats["keys"]["recommendations/instagram/jane"];
    assert_eq!(counters["misses"], json!(1));
    assert_eq!(counters["hits"], json!(1));

    // The snapshot itself is read-only: asking again changes nothing.
    let (_, again) = get_json(&router, "/api/system/cache-stats").await;
    assert_eq!(again["keys"]["recommendations/instagram/jane"], *counters);
}

#[tokio::test]
async fn degraded_read_returns_empty_not_error() {
    let (objects, _store, router) = build_app();
    objects.set_fail_reads(true);

    let (status, body) = get_json(&router, "/api/data/recommendations/instagram/jane").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));
}

#[tokio::test]
async fn healthz_tracks_store_reachability() {
    let (objects, _store, router) = build_app();

    let response = router
        .clone()
        .oneshot(Request::get("/healthz").body(Body::empty()).expect("request"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    objects.set_fail_reads(true);
    let response = router
        .clone()
        .oneshot(Request::get("/healthz").body(Body::empty()).expect("request"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}
