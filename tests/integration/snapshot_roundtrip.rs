//! Integration tests for snapshot persistence of computations

use deferred_prover::computation::{
    AttemptContext, ComputationConfig, ComputationSnapshot, ComputationStatus,
    DeferredComputation, Priority, TriggerPolicy,
};
use deferred_prover::error::ComputeError;
use futures::future::{BoxFuture, FutureExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

type Proof = Vec<u8>;

fn prover(
    calls: Arc<AtomicUsize>,
) -> impl Fn(AttemptContext) -> BoxFuture<'static, anyhow::Result<Proof>> + Send + Sync {
    move |ctx: AttemptContext| {
        calls.fetch_add(1, Ordering::SeqCst);
        async move {
            tokio::select! {
                _ = ctx.signal().cancelled() => anyhow::bail!("aborted"),
                _ = tokio::time::sleep(Duration::from_millis(10)) => Ok(vec![1, 2, 3]),
            }
        }
        .boxed()
    }
}

#[tokio::test]
async fn test_resolved_snapshot_survives_json() {
    let calls = Arc::new(AtomicUsize::new(0));
    let config = ComputationConfig::default()
        .with_priority(Priority::High)
        .with_metadata("system", "halo2");
    let computation = DeferredComputation::with_id("settlement-9", config, prover(calls.clone()));
    computation.resolve().await.unwrap();

    let json = computation.to_json().unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(value["id"], "settlement-9");
    assert_eq!(value["status"], "resolved");
    assert_eq!(value["result"], serde_json::json!([1, 2, 3]));
    assert_eq!(value["config"]["priority"], "high");
    assert_eq!(value["config"]["metadata"]["system"], "halo2");
    assert!(value.get("error").is_none());

    let restored = DeferredComputation::from_snapshot(
        ComputationSnapshot::<Proof>::from_json(&json).unwrap(),
        prover(calls.clone()),
    );
    assert_eq!(restored.status(), ComputationStatus::Resolved);
    assert_eq!(restored.result().unwrap(), vec![1, 2, 3]);
    assert_eq!(restored.resolved_at(), computation.resolved_at());
    assert_eq!(restored.priority(), Priority::High);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_cancelled_snapshot_stays_cancelled() {
    let calls = Arc::new(AtomicUsize::new(0));
    let computation = DeferredComputation::new(ComputationConfig::default(), prover(calls.clone()));
    computation.cancel();

    let snapshot = computation.snapshot();
    let restored = DeferredComputation::from_snapshot(snapshot, prover(calls.clone()));
    assert_eq!(restored.status(), ComputationStatus::Cancelled);
    assert!(matches!(restored.resolve().await, Err(ComputeError::Cancelled)));

    restored.reset();
    assert_eq!(restored.resolve().await.unwrap(), vec![1, 2, 3]);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_generating_snapshot_restores_as_fresh_pending() {
    let calls = Arc::new(AtomicUsize::new(0));
    let computation = DeferredComputation::new(ComputationConfig::default(), prover(calls.clone()));
    let waiter = computation.clone();
    let handle = tokio::spawn(async move { waiter.resolve().await });
    tokio::time::sleep(Duration::from_millis(2)).await;

    let snapshot = computation.snapshot();
    assert_eq!(snapshot.status, ComputationStatus::Generating);

    let restored = DeferredComputation::from_snapshot(snapshot, prover(calls.clone()));
    assert_eq!(restored.status(), ComputationStatus::Pending);
    assert_eq!(restored.id(), computation.id());

    handle.await.unwrap().unwrap();
    assert_eq!(restored.resolve().await.unwrap(), vec![1, 2, 3]);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_pending_restore_honors_immediate_trigger() {
    let calls = Arc::new(AtomicUsize::new(0));
    let snapshot = ComputationSnapshot::<Proof> {
        id: "warm-1".to_string(),
        status: ComputationStatus::Pending,
        result: None,
        error: None,
        config: ComputationConfig::default().with_trigger(TriggerPolicy::Immediate),
        created_at: chrono::Utc::now(),
        resolved_at: None,
        attempts: 0,
    };

    let restored = DeferredComputation::from_snapshot(snapshot, prover(calls.clone()));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(restored.status(), ComputationStatus::Resolved);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
struct CircuitProof {
    circuit: String,
    bytes: Vec<u8>,
}

#[tokio::test]
async fn test_snapshot_roundtrip_for_result_without_default() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let work = move |_ctx: AttemptContext| {
        counter.fetch_add(1, Ordering::SeqCst);
        async move {
            Ok(CircuitProof {
                circuit: "transfer".to_string(),
                bytes: vec![7, 7, 9],
            })
        }
        .boxed()
    };
    let computation = DeferredComputation::with_id("transfer-1", ComputationConfig::default(), work.clone());
    computation.resolve().await.unwrap();

    let json = computation.to_json().unwrap();
    let snapshot = ComputationSnapshot::<CircuitProof>::from_json(&json).unwrap();
    assert_eq!(snapshot.status, ComputationStatus::Resolved);

    let restored = DeferredComputation::from_snapshot(snapshot, work);
    assert_eq!(
        restored.result().unwrap(),
        CircuitProof {
            circuit: "transfer".to_string(),
            bytes: vec![7, 7, 9],
        }
    );
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // A pending snapshot omits the result field entirely.
    let pending = DeferredComputation::<CircuitProof>::new(
        ComputationConfig::default(),
        |_ctx: AttemptContext| async move { anyhow::bail!("not needed") },
    );
    let json = pending.to_json().unwrap();
    assert!(!json.contains("\"result\""));
    let snapshot = ComputationSnapshot::<CircuitProof>::from_json(&json).unwrap();
    assert_eq!(snapshot.result, None);
}
