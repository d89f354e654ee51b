//! Integration tests for access-pattern prefetching

use deferred_prover::computation::{AttemptContext, ComputationStatus, Priority, TriggerPolicy};
use deferred_prover::prefetch::{AccessPrefetcher, PrefetchConfig};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn prefetcher_with(ids: &[&'static str], calls: Arc<AtomicUsize>, config: PrefetchConfig) -> AccessPrefetcher<String> {
    let prefetcher = AccessPrefetcher::new(config);
    for id in ids {
        let calls = Arc::clone(&calls);
        let id = *id;
        prefetcher.register(id, move |_ctx: AttemptContext| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                Ok(format!("proof-{}", id))
            }
        });
    }
    prefetcher
}

#[tokio::test]
async fn test_threshold_selects_only_hot_resource() {
    let calls = Arc::new(AtomicUsize::new(0));
    let prefetcher = prefetcher_with(
        &["a", "b"],
        calls.clone(),
        PrefetchConfig {
            analysis_window_ms: 60_000,
            likelihood_threshold: 0.7,
            max_prefetch: 3,
        },
    );

    for _ in 0..10 {
        prefetcher.record_access("a");
    }
    prefetcher.record_access("b");

    let likelihoods = prefetcher.likelihoods();
    assert_eq!(likelihoods[0].0, "a");
    assert!((likelihoods[0].1 - 10.0 / 11.0).abs() < 1e-9);
    assert_eq!(likelihoods[1].0, "b");

    let speculative = prefetcher.get_prefetched("a").expect("a should be prefetched");
    assert!(prefetcher.get_prefetched("b").is_none());
    assert_eq!(speculative.config().trigger, TriggerPolicy::Immediate);
    assert_eq!(speculative.priority(), Priority::Low);
    assert!(speculative.config().prefetch);
    assert_eq!(speculative.config().metadata.get("resource_id").map(String::as_str), Some("a"));

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(speculative.status(), ComputationStatus::Resolved);
    // A later real request is served from cache.
    assert_eq!(speculative.resolve().await.unwrap(), "proof-a");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_repeat_accesses_do_not_duplicate_speculation() {
    let calls = Arc::new(AtomicUsize::new(0));
    let prefetcher = prefetcher_with(&["vk"], calls.clone(), PrefetchConfig::default());

    let first = prefetcher.record_access("vk");
    let second = prefetcher.record_access("vk");
    assert_eq!(first, vec!["vk".to_string()]);
    assert!(second.is_empty());
    assert_eq!(prefetcher.tracked_count(), 1);

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_ties_break_by_id() {
    let calls = Arc::new(AtomicUsize::new(0));
    let prefetcher = prefetcher_with(
        &["x", "y"],
        calls,
        PrefetchConfig {
            likelihood_threshold: 0.5,
            max_prefetch: 1,
            ..PrefetchConfig::default()
        },
    );

    prefetcher.record_access("y");
    prefetcher.record_access("x");

    // Both sit at 0.5; x sorts first but the only slot is held by y.
    assert_eq!(
        prefetcher.likelihoods(),
        vec![("x".to_string(), 0.5), ("y".to_string(), 0.5)]
    );
    assert!(prefetcher.get_prefetched("y").is_some());
    assert!(prefetcher.get_prefetched("x").is_none());
}
