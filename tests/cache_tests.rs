//! ID cache: single-flight refresh, ordering, failure isolation, snapshots

mod common;

use common::MockRegistry;
use promlith::cache::{CacheKind, IdCache, TargetKey};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_refresh_populates_all_sub_caches() {
    let cache = IdCache::new(Arc::new(MockRegistry::populated()), Duration::from_secs(60));
    cache.try_refresh().await.unwrap();

    assert_eq!(cache.metric_name.id("up"), Some(1));
    assert_eq!(cache.label_name.id("pod"), Some(3));
    assert_eq!(cache.label_value.id("pod-0"), Some(12));
    assert_eq!(cache.layout.column_index("up", "pod"), Some(1));
    assert!(cache.target.is_target_label("job"));
    assert_eq!(
        cache.target.id(&TargetKey::new(vec![
            ("instance".into(), "h1".into()),
            ("job".into(), "node".into()),
        ])),
        Some(3)
    );
    assert_eq!(cache.metric_label.label_ids("up"), Some(vec![100]));
    assert_eq!(cache.metric_target.metric_ids(3), Some(vec![1]));
    assert!(cache.metric_target.metric_seen_on_target("up", 3));
}

#[tokio::test]
async fn test_concurrent_refreshes_are_single_flight() {
    let registry = Arc::new(MockRegistry {
        delay: Duration::from_millis(50),
        ..MockRegistry::populated()
    });
    let cache = IdCache::new(registry.clone(), Duration::from_secs(60));

    let (a, b) = tokio::join!(cache.try_refresh(), cache.try_refresh());
    a.unwrap();
    b.unwrap();

    // two refreshes ran, strictly one after the other: the first sixteen
    // events are the first run's start/end pairs, with no interleaving from
    // the second run
    let events = registry.events.lock().clone();
    assert_eq!(events.len(), 32);
    let first_run = &events[..16];
    assert_eq!(first_run.iter().filter(|e| e.ends_with(":start")).count(), 8);
    assert_eq!(first_run.iter().filter(|e| e.ends_with(":end")).count(), 8);

    // the second refresh observes everything the first populated
    assert_eq!(cache.metric_name.id("up"), Some(1));
}

#[tokio::test]
async fn test_metric_name_and_label_refresh_ahead_of_the_rest() {
    let registry = Arc::new(MockRegistry {
        delay: Duration::from_millis(10),
        ..MockRegistry::populated()
    });
    let cache = IdCache::new(registry.clone(), Duration::from_secs(60));
    cache.try_refresh().await.unwrap();

    let events = registry.events.lock().clone();
    let position = |event: &str| events.iter().position(|e| e == event).unwrap();

    for later in [
        "label_names:start",
        "label_values:start",
        "layouts:start",
        "metric_labels:start",
        "targets:start",
        "metric_targets:start",
    ] {
        assert!(position("metric_names:end") < position(later), "{later}");
        assert!(position("labels:end") < position(later), "{later}");
    }
}

#[tokio::test]
async fn test_failing_sub_cache_keeps_prior_contents() {
    let registry = Arc::new(MockRegistry::populated());
    let cache = IdCache::new(registry.clone(), Duration::from_secs(60));
    cache.try_refresh().await.unwrap();
    assert_eq!(cache.layout.column_index("up", "pod"), Some(1));

    registry.fail.lock().insert("layouts");
    let err = cache.try_refresh().await.unwrap_err();
    assert!(err.to_string().contains("layout"));

    // the failed sub-cache kept its previous contents, the others refreshed
    assert_eq!(cache.layout.column_index("up", "pod"), Some(1));
    assert_eq!(cache.metric_name.id("up"), Some(1));
}

#[tokio::test]
async fn test_initial_refresh_failure_propagates_from_start() {
    let registry = Arc::new(MockRegistry::populated());
    registry.fail.lock().insert("metric_names");
    let cache = IdCache::new(registry, Duration::from_secs(60));

    let cancel = tokio_util::sync::CancellationToken::new();
    assert!(cache.start(cancel.clone()).await.is_err());
    cancel.cancel();
}

#[tokio::test]
async fn test_debug_snapshot_subset_and_composite_keys() {
    let cache = IdCache::new(Arc::new(MockRegistry::populated()), Duration::from_secs(60));
    cache.try_refresh().await.unwrap();

    let snapshot = cache.debug_snapshot(&[CacheKind::MetricName]);
    assert_eq!(snapshot["metric_name"]["name_to_id"]["up"], 1);
    assert!(snapshot.get("target").is_none());

    let snapshot = cache.debug_snapshot(&[CacheKind::All]);
    assert!(snapshot.get("target").is_some());
    assert!(snapshot.get("metric_and_app_label_layout").is_some());
    // composite keys serialize as JSON strings
    let layouts = snapshot["metric_and_app_label_layout"]["layout_key_to_index"]
        .as_object()
        .unwrap();
    let key = layouts.keys().next().unwrap();
    assert!(key.contains("\"metric_name\":\"up\""));

    // snapshots of never-refreshed instances are empty but well-formed
    let empty = IdCache::new(Arc::new(MockRegistry::default()), Duration::from_secs(60));
    let snapshot = empty.debug_snapshot(&[CacheKind::All]);
    assert!(snapshot["metric_name"]["name_to_id"]
        .as_object()
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_periodic_refresh_runs_until_cancelled() {
    let registry = Arc::new(MockRegistry::populated());
    let cache = IdCache::new(registry.clone(), Duration::from_millis(30));
    let cancel = tokio_util::sync::CancellationToken::new();
    cache.start(cancel.clone()).await.unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    cancel.cancel();
    // let any refresh that was mid-flight at cancellation finish
    tokio::time::sleep(Duration::from_millis(20)).await;
    let calls_after_cancel = registry.events.lock().len();
    tokio::time::sleep(Duration::from_millis(80)).await;

    // at least the initial refresh plus two periodic ones
    assert!(calls_after_cancel >= 48, "saw {calls_after_cancel} events");
    // no further refreshes after cancellation
    assert_eq!(registry.events.lock().len(), calls_after_cancel);
}
