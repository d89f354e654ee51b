//! Cooperative cancellation handed to units of work.

use crate::computation::events::{ComputationEvent, EventKind, ListenerSet};
use std::sync::Arc;
use tokio::sync::watch;

/// Cancellation flag scoped to one attempt.
///
/// Units of work must check `is_cancelled` or await `cancelled` and abort
/// promptly. The driver also drops the attempt future once the signal fires,
/// so work that ignores the signal stops at its next suspension point.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Fire the signal. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Completes once the signal has fired.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so the wait cannot observe a closed channel.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything a unit of work receives for one attempt
#[derive(Clone)]
pub struct AttemptContext {
    computation_id: Arc<str>,
    attempt: u32,
    signal: CancelSignal,
    listeners: Arc<ListenerSet>,
}

impl AttemptContext {
    pub(crate) fn new(
        computation_id: Arc<str>,
        attempt: u32,
        signal: CancelSignal,
        listeners: Arc<ListenerSet>,
    ) -> Self {
        Self {
            computation_id,
            attempt,
            signal,
            listeners,
        }
    }

    /// Detached context for running work outside a computation (tests, tools).
    pub fn detached(signal: CancelSignal) -> Self {
        Self::new(Arc::from("detached"), 1, signal, Arc::new(ListenerSet::default()))
    }

    pub fn computation_id(&self) -> &str {
        &self.computation_id
    }

    /// One-based attempt number
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn signal(&self) -> &CancelSignal {
        &self.signal
    }

    pub fn is_cancelled(&self) -> bool {
        self.signal.is_cancelled()
    }

    /// Report fractional progress (clamped to `0.0..=1.0`) to listeners.
    pub fn report_progress(&self, fraction: f64) {
        let mut event = ComputationEvent::now(EventKind::Progress);
        event.progress = Some(fraction.clamp(0.0, 1.0));
        event.attempt = Some(self.attempt);
        self.listeners.emit(&event);
    }
}
