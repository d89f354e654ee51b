//! Integration tests for the deferred computation lifecycle
//!
//! Tests cover:
//! - At-most-once execution under concurrent resolution
//! - Retry then success, and retry exhaustion
//! - Cancellation during the retry delay
//! - Listener isolation and removal

use deferred_prover::computation::{
    AttemptContext, ComputationConfig, ComputationStatus, DeferredComputation, EventKind,
};
use deferred_prover::error::ComputeError;
use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use std::error::Error;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn record_events<T>(computation: &DeferredComputation<T>) -> Arc<Mutex<Vec<EventKind>>>
where
    T: Clone + Send + Sync + 'static,
{
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    computation.add_listener(move |event| sink.lock().push(event.kind));
    events
}

fn count(events: &Mutex<Vec<EventKind>>, kind: EventKind) -> usize {
    events.lock().iter().filter(|k| **k == kind).count()
}

/// Fails the first `failures` attempts, then yields `value`.
fn flaky(
    calls: Arc<AtomicUsize>,
    failures: usize,
    value: u64,
) -> impl Fn(AttemptContext) -> BoxFuture<'static, anyhow::Result<u64>> + Send + Sync {
    move |_ctx: AttemptContext| {
        let n = calls.fetch_add(1, Ordering::SeqCst);
        async move {
            if n < failures {
                anyhow::bail!("witness generation failed (attempt {})", n + 1);
            }
            Ok(value)
        }
        .boxed()
    }
}

#[tokio::test]
async fn test_concurrent_resolves_share_one_execution() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let computation = DeferredComputation::<String>::new(
        ComputationConfig::default(),
        move |_ctx: AttemptContext| {
            counter.fetch_add(1, Ordering::SeqCst);
            async {
                tokio::time::sleep(Duration::from_millis(30)).await;
                Ok("proof".to_string())
            }
        },
    );

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let computation = computation.clone();
            tokio::spawn(async move { computation.resolve().await })
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), "proof");
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(computation.resolve().await.unwrap(), "proof");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_dropped_caller_does_not_strand_others() {
    let computation = DeferredComputation::<u32>::new(
        ComputationConfig::default(),
        |_ctx: AttemptContext| async {
            tokio::time::sleep(Duration::from_millis(30)).await;
            Ok(5)
        },
    );

    let first = computation.clone();
    let abandoned = tokio::spawn(async move { first.resolve().await });
    tokio::time::sleep(Duration::from_millis(5)).await;
    abandoned.abort();

    assert_eq!(computation.resolve().await.unwrap(), 5);
    assert_eq!(computation.status(), ComputationStatus::Resolved);
}

#[tokio::test]
async fn test_retry_then_succeed() {
    let calls = Arc::new(AtomicUsize::new(0));
    let computation = DeferredComputation::new(
        ComputationConfig::default().with_retries(2, 5),
        flaky(calls.clone(), 2, 11),
    );
    let events = record_events(&computation);

    assert_eq!(computation.resolve().await.unwrap(), 11);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(computation.attempts(), 3);
    assert_eq!(count(&events, EventKind::Start), 1);
    assert_eq!(count(&events, EventKind::Retry), 2);
    assert_eq!(count(&events, EventKind::Complete), 1);
    assert_eq!(count(&events, EventKind::Error), 0);
}

#[tokio::test]
async fn test_retry_exhaustion_fails_with_cause() {
    let calls = Arc::new(AtomicUsize::new(0));
    let computation = DeferredComputation::new(
        ComputationConfig::default().with_retries(1, 5),
        flaky(calls.clone(), usize::MAX, 0),
    );
    let events = record_events(&computation);

    let err = computation.resolve().await.unwrap_err();
    match &err {
        ComputeError::Failed { attempts, .. } => assert_eq!(*attempts, 2),
        other => panic!("expected Failed, got {other:?}"),
    }
    let source = err.source().map(|s| s.to_string()).unwrap_or_default();
    assert!(source.contains("attempt 2"), "unexpected source: {source}");

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(computation.status(), ComputationStatus::Failed);
    assert!(computation.error().is_some());
    assert!(matches!(computation.result(), Err(ComputeError::NotResolved)));
    assert_eq!(count(&events, EventKind::Retry), 1);
    assert_eq!(count(&events, EventKind::Error), 1);
}

#[tokio::test]
async fn test_cancel_during_retry_wait_is_terminal() {
    let calls = Arc::new(AtomicUsize::new(0));
    let computation = DeferredComputation::new(
        ComputationConfig::default().with_retries(5, 10_000),
        flaky(calls.clone(), usize::MAX, 0),
    );
    let events = record_events(&computation);

    let waiter = computation.clone();
    let handle = tokio::spawn(async move { waiter.resolve().await });
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(count(&events, EventKind::Retry), 1);

    let cancelled_at = Instant::now();
    assert!(computation.cancel());
    let outcome = handle.await.unwrap();
    assert!(matches!(outcome, Err(ComputeError::Cancelled)));
    assert!(cancelled_at.elapsed() < Duration::from_secs(1));

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(computation.status(), ComputationStatus::Cancelled);
    assert!(matches!(computation.resolve().await, Err(ComputeError::Cancelled)));
    assert_eq!(count(&events, EventKind::Cancel), 1);
}

#[tokio::test]
async fn test_panicking_listener_is_isolated() {
    let computation = DeferredComputation::<u32>::new(
        ComputationConfig::default(),
        |_ctx: AttemptContext| async { Ok(3) },
    );
    computation.add_listener(|_event| panic!("listener exploded"));
    let events = record_events(&computation);

    assert_eq!(computation.resolve().await.unwrap(), 3);
    assert_eq!(*events.lock(), vec![EventKind::Start, EventKind::Complete]);
}

#[tokio::test]
async fn test_removed_listener_stops_receiving() {
    let computation = DeferredComputation::<u32>::new(
        ComputationConfig::default(),
        |_ctx: AttemptContext| async { Ok(3) },
    );
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&seen);
    let id = computation.add_listener(move |_event| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    assert_eq!(computation.listener_count(), 1);

    assert!(computation.remove_listener(id));
    assert!(!computation.remove_listener(id));
    computation.resolve().await.unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_attempt_numbers_reach_work() {
    let attempts = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&attempts);
    let computation = DeferredComputation::<u32>::with_id(
        "circuit-7",
        ComputationConfig::default().with_retries(2, 1),
        move |ctx: AttemptContext| {
            sink.lock().push((ctx.computation_id().to_string(), ctx.attempt()));
            let attempt = ctx.attempt();
            async move {
                if attempt < 3 {
                    anyhow::bail!("not yet");
                }
                Ok(attempt)
            }
        },
    );

    assert_eq!(computation.resolve().await.unwrap(), 3);
    assert_eq!(
        *attempts.lock(),
        vec![
            ("circuit-7".to_string(), 1),
            ("circuit-7".to_string(), 2),
            ("circuit-7".to_string(), 3)
        ]
    );
}
