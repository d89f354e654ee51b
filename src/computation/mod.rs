//! Deferred Computations
//!
//! A deferred computation wraps one expensive, cancellable unit of work (typically proof
//! generation) behind an explicit state machine:
//!
//! ```text
//! pending ──resolve──▶ generating ──▶ resolved | cancelled | failed
//!    ▲                                         │
//!    └──────────────────reset──────────────────┘
//! ```
//!
//! Execution is driven by a spawned task so any number of concurrent `resolve` callers
//! share a single execution and a dropped caller never strands the others. Retries happen
//! inside `generating`; each attempt receives a fresh [`CancelSignal`].

pub mod events;
pub mod signal;
pub mod snapshot;
pub mod types;

pub use events::{ComputationEvent, EventKind, Listener, ListenerId};
pub use signal::{AttemptContext, CancelSignal};
pub use snapshot::ComputationSnapshot;
pub use types::{
    ComputationConfig, ComputationStatus, Priority, TimeoutPolicy, TriggerEvent, TriggerPolicy,
};

use crate::error::{share_cause, ComputeError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use events::ListenerSet;
use futures::FutureExt;
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// The expensive work behind a deferred computation.
///
/// Implementations must honor `ctx.signal()`: abort promptly once it fires. Any
/// `Fn(AttemptContext) -> impl Future<Output = anyhow::Result<T>>` closure qualifies.
#[async_trait]
pub trait UnitOfWork<T>: Send + Sync {
    async fn run(&self, ctx: AttemptContext) -> anyhow::Result<T>;
}

#[async_trait]
impl<T, F, Fut> UnitOfWork<T> for F
where
    F: Fn(AttemptContext) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    T: Send + 'static,
{
    async fn run(&self, ctx: AttemptContext) -> anyhow::Result<T> {
        (self)(ctx).await
    }
}

/// Shared handle to a unit of work
pub type SharedWork<T> = Arc<dyn UnitOfWork<T>>;

fn next_computation_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    format!("computation-{}", COUNTER.fetch_add(1, Ordering::Relaxed))
}

type Outcome<T> = Result<T, ComputeError>;

struct ExecState<T> {
    status: ComputationStatus,
    /// Attempts made by the current (or last) execution
    attempts: u32,
    result: Option<T>,
    error: Option<ComputeError>,
    resolved_at: Option<DateTime<Utc>>,
    /// Fired only by explicit cancellation; spans the whole execution
    run_signal: CancelSignal,
    /// Handed to the unit of work; replaced on every attempt
    attempt_signal: CancelSignal,
    /// Bumped on every start and reset so stale drivers cannot commit
    epoch: u64,
    waiters: Vec<oneshot::Sender<Outcome<T>>>,
}

impl<T> ExecState<T> {
    fn pending() -> Self {
        Self {
            status: ComputationStatus::Pending,
            attempts: 0,
            result: None,
            error: None,
            resolved_at: None,
            run_signal: CancelSignal::new(),
            attempt_signal: CancelSignal::new(),
            epoch: 0,
            waiters: Vec::new(),
        }
    }

    /// Fire both signals and hand back the waiters so they can be woken outside the lock.
    fn abort(&mut self) -> Vec<oneshot::Sender<Outcome<T>>> {
        self.run_signal.cancel();
        self.attempt_signal.cancel();
        std::mem::take(&mut self.waiters)
    }
}

struct Inner<T> {
    id: Arc<str>,
    config: ComputationConfig,
    work: SharedWork<T>,
    created_at: DateTime<Utc>,
    state: Mutex<ExecState<T>>,
    listeners: Arc<ListenerSet>,
}

enum AttemptOutcome<T> {
    Completed(T),
    Cancelled,
    TimedOut,
    Failed(anyhow::Error),
}

/// Cheap-clone handle to a lazily executed, cancellable, retryable computation.
///
/// Clones share identity: resolving or cancelling through any clone affects all of them.
pub struct DeferredComputation<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for DeferredComputation<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for DeferredComputation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredComputation")
            .field("id", &self.inner.id)
            .field("status", &self.inner.state.lock().status)
            .field("config", &self.inner.config)
            .finish()
    }
}

impl<T> DeferredComputation<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a computation with a generated id.
    ///
    /// With `TriggerPolicy::Immediate` execution begins on the current tokio runtime.
    pub fn new<W>(config: ComputationConfig, work: W) -> Self
    where
        W: UnitOfWork<T> + 'static,
    {
        Self::from_shared(next_computation_id(), config, Arc::new(work))
    }

    /// Create a computation with a caller-assigned id.
    pub fn with_id<W>(id: impl Into<String>, config: ComputationConfig, work: W) -> Self
    where
        W: UnitOfWork<T> + 'static,
    {
        Self::from_shared(id, config, Arc::new(work))
    }

    /// Create a computation over an already shared unit of work.
    pub fn from_shared(id: impl Into<String>, config: ComputationConfig, work: SharedWork<T>) -> Self {
        let computation = Self::assemble(id.into(), config, work, Utc::now(), ExecState::pending());
        if computation.inner.config.trigger == TriggerPolicy::Immediate {
            computation.start_detached("immediate");
        }
        computation
    }

    fn assemble(
        id: String,
        config: ComputationConfig,
        work: SharedWork<T>,
        created_at: DateTime<Utc>,
        state: ExecState<T>,
    ) -> Self {
        if let Err(reason) = config.validate() {
            warn!(computation_id = %id, reason = %reason, "Invalid computation config");
        }
        Self {
            inner: Arc::new(Inner {
                id: Arc::from(id),
                config,
                work,
                created_at,
                state: Mutex::new(state),
                listeners: Arc::new(ListenerSet::default()),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn config(&self) -> &ComputationConfig {
        &self.inner.config
    }

    pub fn priority(&self) -> Priority {
        self.inner.config.priority
    }

    pub fn status(&self) -> ComputationStatus {
        self.inner.state.lock().status
    }

    /// Attempts made by the current or most recent execution
    pub fn attempts(&self) -> u32 {
        self.inner.state.lock().attempts
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.inner.created_at
    }

    pub fn resolved_at(&self) -> Option<DateTime<Utc>> {
        self.inner.state.lock().resolved_at
    }

    /// Cached result, or `NotResolved` while the computation has not resolved.
    pub fn result(&self) -> Result<T, ComputeError> {
        self.inner
            .state
            .lock()
            .result
            .clone()
            .ok_or(ComputeError::NotResolved)
    }

    /// Cached terminal error of a failed computation
    pub fn error(&self) -> Option<ComputeError> {
        self.inner.state.lock().error.clone()
    }

    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&ComputationEvent) + Send + Sync + 'static,
    {
        self.inner.listeners.add(Arc::new(listener))
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.listeners.remove(id)
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.len()
    }

    /// Resolve the computation, running the unit of work if needed.
    ///
    /// Resolved computations return the cached result; concurrent callers share one
    /// execution; cancelled and failed computations return their terminal error until
    /// `reset` is called.
    pub async fn resolve(&self) -> Result<T, ComputeError> {
        let receiver = {
            let mut state = self.inner.state.lock();
            match state.status {
                ComputationStatus::Resolved => {
                    return state.result.clone().ok_or(ComputeError::NotResolved);
                }
                ComputationStatus::Cancelled => return Err(ComputeError::Cancelled),
                ComputationStatus::Failed => {
                    return Err(state.error.clone().unwrap_or(ComputeError::NotResolved));
                }
                ComputationStatus::Generating => {
                    let (tx, rx) = oneshot::channel();
                    state.waiters.push(tx);
                    rx
                }
                ComputationStatus::Pending => {
                    let (tx, rx) = oneshot::channel();
                    state.waiters.push(tx);
                    self.start_locked(&mut state);
                    rx
                }
            }
        };

        // A dropped sender means the execution was torn down by `reset`.
        receiver.await.unwrap_or(Err(ComputeError::Cancelled))
    }

    /// Cancel the computation. Returns false if it already resolved or was cancelled.
    pub fn cancel(&self) -> bool {
        let waiters = {
            let mut state = self.inner.state.lock();
            match state.status {
                ComputationStatus::Resolved | ComputationStatus::Cancelled => return false,
                _ => {}
            }
            state.status = ComputationStatus::Cancelled;
            state.result = None;
            state.error = None;
            state.abort()
        };

        for tx in waiters {
            let _ = tx.send(Err(ComputeError::Cancelled));
        }
        debug!(computation_id = %self.inner.id, "Computation cancelled");
        self.inner
            .listeners
            .emit(&ComputationEvent::now(EventKind::Cancel));
        true
    }

    /// Return to `pending`, cancelling any in-flight execution first.
    pub fn reset(&self) {
        let (waiters, was_generating) = {
            let mut state = self.inner.state.lock();
            let was_generating = state.status == ComputationStatus::Generating;
            let waiters = state.abort();
            let epoch = state.epoch + 1;
            *state = ExecState::pending();
            state.epoch = epoch;
            (waiters, was_generating)
        };

        for tx in waiters {
            let _ = tx.send(Err(ComputeError::Cancelled));
        }
        if was_generating {
            self.inner
                .listeners
                .emit(&ComputationEvent::now(EventKind::Cancel));
        }
        debug!(computation_id = %self.inner.id, "Computation reset to pending");
    }

    /// Tell the computation a downstream operation touched it.
    ///
    /// Starts execution in the background when the trigger policy matches and the
    /// computation is still pending.
    pub fn notify(&self, event: TriggerEvent) {
        if self.inner.config.trigger.fires_on(event) {
            self.start_detached(match event {
                TriggerEvent::Verify => "on-verify",
                TriggerEvent::Serialize => "on-serialize",
            });
        }
    }

    /// Start execution without waiting for it, if still pending.
    fn start_detached(&self, reason: &'static str) {
        if tokio::runtime::Handle::try_current().is_err() {
            warn!(
                computation_id = %self.inner.id,
                reason,
                "No async runtime available, trigger ignored"
            );
            return;
        }
        let mut state = self.inner.state.lock();
        if state.status == ComputationStatus::Pending {
            debug!(computation_id = %self.inner.id, reason, "Computation triggered");
            self.start_locked(&mut state);
        }
    }

    fn start_locked(&self, state: &mut ExecState<T>) {
        state.status = ComputationStatus::Generating;
        state.attempts = 0;
        state.epoch += 1;
        state.run_signal = CancelSignal::new();

        let epoch = state.epoch;
        let run_signal = state.run_signal.clone();
        let this = self.clone();
        tokio::spawn(async move { this.drive(epoch, run_signal).await });
    }

    async fn drive(self, epoch: u64, run_signal: CancelSignal) {
        let config = &self.inner.config;
        debug!(
            computation_id = %self.inner.id,
            timeout_ms = config.timeout_ms,
            max_retries = config.max_retries,
            "Computation started"
        );
        self.inner
            .listeners
            .emit(&ComputationEvent::now(EventKind::Start).with_attempt(1));

        let mut attempt: u32 = 1;
        let outcome = loop {
            let attempt_signal = CancelSignal::new();
            if !self.begin_attempt(epoch, attempt, &attempt_signal) {
                return;
            }
            let ctx = AttemptContext::new(
                Arc::clone(&self.inner.id),
                attempt,
                attempt_signal.clone(),
                Arc::clone(&self.inner.listeners),
            );

            let failure = match self.run_attempt(ctx, &run_signal, &attempt_signal).await {
                AttemptOutcome::Completed(value) => break Ok(value),
                AttemptOutcome::Cancelled => break Err(ComputeError::Cancelled),
                AttemptOutcome::TimedOut => {
                    let timeout = ComputeError::Timeout {
                        timeout_ms: config.timeout_ms,
                    };
                    warn!(
                        computation_id = %self.inner.id,
                        attempt,
                        timeout_ms = config.timeout_ms,
                        policy = ?config.timeout_policy,
                        "Computation attempt timed out"
                    );
                    if config.timeout_policy == TimeoutPolicy::Terminal {
                        break Err(timeout);
                    }
                    timeout
                }
                AttemptOutcome::Failed(cause) => ComputeError::Failed {
                    attempts: attempt,
                    cause: share_cause(cause),
                },
            };

            if attempt > config.max_retries {
                break Err(failure);
            }

            warn!(
                computation_id = %self.inner.id,
                attempt,
                max_retries = config.max_retries,
                retry_delay_ms = config.retry_delay_ms,
                error = %failure,
                "Computation attempt failed, retrying"
            );
            self.inner.listeners.emit(
                &ComputationEvent::now(EventKind::Retry)
                    .with_attempt(attempt)
                    .with_error(&failure),
            );

            tokio::select! {
                _ = run_signal.cancelled() => break Err(ComputeError::Cancelled),
                _ = sleep(config.retry_delay()) => {}
            }
            attempt += 1;
        };

        self.finish(epoch, attempt, outcome);
    }

    /// Install the attempt's signal; false once the execution was cancelled or reset.
    fn begin_attempt(&self, epoch: u64, attempt: u32, signal: &CancelSignal) -> bool {
        let mut state = self.inner.state.lock();
        if state.epoch != epoch || state.status != ComputationStatus::Generating {
            return false;
        }
        state.attempts = attempt;
        state.attempt_signal = signal.clone();
        true
    }

    async fn run_attempt(
        &self,
        ctx: AttemptContext,
        run_signal: &CancelSignal,
        attempt_signal: &CancelSignal,
    ) -> AttemptOutcome<T> {
        let work = Arc::clone(&self.inner.work);
        let timeout = self.inner.config.timeout();

        tokio::select! {
            biased;
            _ = run_signal.cancelled() => AttemptOutcome::Cancelled,
            _ = expire(timeout) => {
                attempt_signal.cancel();
                AttemptOutcome::TimedOut
            }
            result = AssertUnwindSafe(work.run(ctx)).catch_unwind() => match result {
                Ok(Ok(value)) => AttemptOutcome::Completed(value),
                Ok(Err(_)) if run_signal.is_cancelled() => AttemptOutcome::Cancelled,
                Ok(Err(err)) => AttemptOutcome::Failed(err),
                Err(_) => AttemptOutcome::Failed(anyhow::anyhow!("unit of work panicked")),
            },
        }
    }

    fn finish(&self, epoch: u64, attempts: u32, outcome: Outcome<T>) {
        let (waiters, event) = {
            let mut state = self.inner.state.lock();
            if state.epoch != epoch || state.status != ComputationStatus::Generating {
                // Cancelled or reset while running; waiters were already woken.
                return;
            }
            state.attempts = attempts;
            let event = match &outcome {
                Ok(value) => {
                    state.status = ComputationStatus::Resolved;
                    state.result = Some(value.clone());
                    state.error = None;
                    state.resolved_at = Some(Utc::now());
                    ComputationEvent::now(EventKind::Complete).with_attempt(attempts)
                }
                Err(ComputeError::Cancelled) => {
                    state.status = ComputationStatus::Cancelled;
                    ComputationEvent::now(EventKind::Cancel)
                }
                Err(err) => {
                    state.status = ComputationStatus::Failed;
                    state.result = None;
                    state.error = Some(err.clone());
                    ComputationEvent::now(EventKind::Error)
                        .with_attempt(attempts)
                        .with_error(err)
                }
            };
            (std::mem::take(&mut state.waiters), event)
        };

        match &outcome {
            Ok(_) => info!(
                computation_id = %self.inner.id,
                attempts,
                "Computation resolved"
            ),
            Err(ComputeError::Cancelled) => debug!(
                computation_id = %self.inner.id,
                attempts,
                "Computation cancelled during execution"
            ),
            Err(err) => error!(
                computation_id = %self.inner.id,
                attempts,
                error = %err,
                "Computation failed permanently"
            ),
        }

        for tx in waiters {
            let _ = tx.send(outcome.clone());
        }
        self.inner.listeners.emit(&event);
    }
}

/// Completes after `timeout`, or never when unbounded.
async fn expire(timeout: Option<Duration>) {
    match timeout {
        Some(duration) => sleep(duration).await,
        None => std::future::pending::<()>().await,
    }
}
