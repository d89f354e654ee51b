//! Computation Scheduler
//!
//! Priority queue plus a bounded set of in-flight computations. Items are serviced in
//! descending priority, oldest first within a priority, and at most `max_concurrent`
//! computations execute their unit of work at once. Item failures never stop the
//! scheduler; they are absorbed into the cumulative counters.

mod item;

pub use item::ItemId;

use crate::computation::{ComputationStatus, DeferredComputation, Priority};
use crate::error::{ComputeError, SchedulerError};
use futures::future::{BoxFuture, FutureExt};
use item::QueueItem;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

/// Type-erased view of a computation the scheduler can drive.
///
/// Lets one scheduler service computations with different result types.
pub trait Schedulable: Send + Sync {
    fn id(&self) -> &str;
    fn priority(&self) -> Priority;
    fn status(&self) -> ComputationStatus;
    fn cancel(&self) -> bool;
    /// Resolve to completion, discarding the value.
    fn drive(&self) -> BoxFuture<'static, Result<(), ComputeError>>;
}

impl<T> Schedulable for DeferredComputation<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn id(&self) -> &str {
        DeferredComputation::id(self)
    }

    fn priority(&self) -> Priority {
        DeferredComputation::priority(self)
    }

    fn status(&self) -> ComputationStatus {
        DeferredComputation::status(self)
    }

    fn cancel(&self) -> bool {
        DeferredComputation::cancel(self)
    }

    fn drive(&self) -> BoxFuture<'static, Result<(), ComputeError>> {
        let computation = self.clone();
        async move { computation.resolve().await.map(|_| ()) }.boxed()
    }
}

/// Configuration for the scheduler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Maximum computations executing at once
    pub max_concurrent: usize,
    /// Maximum queued (not yet executing) items, 0 = unbounded
    pub max_queue_size: usize,
    /// Advance the queue on every enqueue and completion
    pub auto_process: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 2,
            max_queue_size: 1000,
            auto_process: true,
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_concurrent == 0 {
            return Err("max_concurrent must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Scheduler statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStats {
    /// Items waiting in the queue
    pub queued: usize,
    /// Items currently executing
    pub processing: usize,
    /// Items resolved since creation
    pub completed: usize,
    /// Items failed since creation
    pub failed: usize,
    /// Items cancelled since creation
    pub cancelled: usize,
}

#[derive(Debug, Default)]
struct Counters {
    completed: usize,
    failed: usize,
    cancelled: usize,
}

struct SchedulerInner {
    config: SchedulerConfig,
    /// Pending items (priority queue using BinaryHeap). Lock before `in_flight`.
    queue: Mutex<BinaryHeap<QueueItem>>,
    in_flight: Mutex<HashMap<ItemId, Arc<dyn Schedulable>>>,
    counters: RwLock<Counters>,
    sequence: AtomicU64,
    /// Woken whenever an item leaves the queue or the in-flight set
    changed: Notify,
}

/// Priority scheduler for deferred computations. Clones share the same queue.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        if let Err(reason) = config.validate() {
            warn!(reason = %reason, "Invalid scheduler config, clamping max_concurrent to 1");
        }
        let config = SchedulerConfig {
            max_concurrent: config.max_concurrent.max(1),
            ..config
        };
        Self {
            inner: Arc::new(SchedulerInner {
                config,
                queue: Mutex::new(BinaryHeap::new()),
                in_flight: Mutex::new(HashMap::new()),
                counters: RwLock::new(Counters::default()),
                sequence: AtomicU64::new(0),
                changed: Notify::new(),
            }),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Enqueue a computation at `priority`, or at its configured priority.
    pub fn enqueue<C>(&self, computation: C, priority: Option<Priority>) -> Result<ItemId, SchedulerError>
    where
        C: Schedulable + 'static,
    {
        self.enqueue_shared(Arc::new(computation), priority)
    }

    pub fn enqueue_shared(
        &self,
        computation: Arc<dyn Schedulable>,
        priority: Option<Priority>,
    ) -> Result<ItemId, SchedulerError> {
        let (item_id, queue_size) = {
            let mut queue = self.inner.queue.lock();
            let item_id = self.push_locked(&mut queue, computation, priority)?;
            (item_id, queue.len())
        };

        if self.inner.config.auto_process {
            self.schedule_advance(queue_size);
        }
        Ok(item_id)
    }

    /// Enqueue several computations under one queue lock.
    ///
    /// Nothing from the batch starts before every item is queued, so the batch is
    /// serviced in priority order on any runtime flavor. Items past capacity are
    /// rejected individually with `QueueFull`.
    pub fn enqueue_batch<I>(&self, items: I) -> Vec<Result<ItemId, SchedulerError>>
    where
        I: IntoIterator<Item = (Arc<dyn Schedulable>, Option<Priority>)>,
    {
        let (results, queue_size) = {
            let mut queue = self.inner.queue.lock();
            let results: Vec<_> = items
                .into_iter()
                .map(|(computation, priority)| self.push_locked(&mut queue, computation, priority))
                .collect();
            (results, queue.len())
        };

        if self.inner.config.auto_process && results.iter().any(Result::is_ok) {
            self.schedule_advance(queue_size);
        }
        results
    }

    fn push_locked(
        &self,
        queue: &mut BinaryHeap<QueueItem>,
        computation: Arc<dyn Schedulable>,
        priority: Option<Priority>,
    ) -> Result<ItemId, SchedulerError> {
        let priority = priority.unwrap_or_else(|| computation.priority());

        // Check queue size limit
        let capacity = self.inner.config.max_queue_size;
        if capacity > 0 && queue.len() >= capacity {
            warn!(
                computation_id = %computation.id(),
                queue_size = queue.len(),
                max_size = capacity,
                "Scheduler queue is full, rejecting computation"
            );
            return Err(SchedulerError::QueueFull { capacity });
        }

        let item = QueueItem {
            id: ItemId::next(),
            priority,
            sequence: self.inner.sequence.fetch_add(1, Ordering::Relaxed),
            enqueued_at: Instant::now(),
            computation,
        };
        let item_id = item.id;
        debug!(
            item_id = %item_id,
            computation_id = %item.computation.id(),
            priority = ?priority,
            queue_size = queue.len() + 1,
            "Enqueued computation"
        );
        queue.push(item);
        Ok(item_id)
    }

    /// Remove a queued item, or cancel it if it is already executing.
    pub fn dequeue(&self, item_id: ItemId) -> bool {
        let removed = {
            let mut queue = self.inner.queue.lock();
            let mut removed = None;
            queue.retain(|item| {
                if item.id == item_id {
                    removed = Some(Arc::clone(&item.computation));
                    false
                } else {
                    true
                }
            });
            removed
        };

        if let Some(computation) = removed {
            // Already settled through another handle: removed, not cancelled.
            if computation.cancel() {
                self.inner.counters.write().cancelled += 1;
            }
            self.inner.changed.notify_waiters();
            debug!(item_id = %item_id, "Dequeued queued computation");
            return true;
        }

        let executing = self.inner.in_flight.lock().get(&item_id).cloned();
        match executing {
            Some(computation) => {
                // Counted as cancelled when its resolve returns.
                computation.cancel();
                debug!(item_id = %item_id, "Cancelled executing computation");
                true
            }
            None => false,
        }
    }

    /// Drive the queue until both the queue and the in-flight set are empty.
    ///
    /// Needed when `auto_process` is disabled; harmless otherwise.
    pub async fn process(&self) {
        loop {
            let notified = self.inner.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            self.inner.advance();
            if self.inner.is_idle() {
                return;
            }
            notified.await;
        }
    }

    /// Wait (without pumping) until the scheduler is idle. Returns false on timeout.
    pub async fn wait_idle(&self, timeout: Option<Duration>) -> bool {
        let wait = async {
            loop {
                let notified = self.inner.changed.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                if self.inner.is_idle() {
                    return;
                }
                notified.await;
            }
        };

        match timeout {
            Some(timeout) => tokio::time::timeout(timeout, wait).await.is_ok(),
            None => {
                wait.await;
                true
            }
        }
    }

    /// Cancel every queued and executing item. Returns the number cancelled.
    pub fn cancel_all(&self) -> usize {
        let (queued, executing) = {
            let mut queue = self.inner.queue.lock();
            let mut in_flight = self.inner.in_flight.lock();
            let queued = std::mem::take(&mut *queue).into_vec();
            let executing: Vec<Arc<dyn Schedulable>> =
                in_flight.drain().map(|(_, computation)| computation).collect();
            (queued, executing)
        };

        let count = queued.len() + executing.len();
        for item in &queued {
            item.computation.cancel();
        }
        for computation in &executing {
            computation.cancel();
        }

        self.inner.counters.write().cancelled += count;
        self.inner.changed.notify_waiters();
        info!(
            queued = queued.len(),
            executing = executing.len(),
            "Cancelled all scheduled computations"
        );
        count
    }

    /// Get scheduler statistics
    pub fn stats(&self) -> SchedulerStats {
        let queued = self.inner.queue.lock().len();
        let processing = self.inner.in_flight.lock().len();
        let counters = self.inner.counters.read();
        SchedulerStats {
            queued,
            processing,
            completed: counters.completed,
            failed: counters.failed,
            cancelled: counters.cancelled,
        }
    }

    /// Number of queued (not yet executing) items
    pub fn len(&self) -> usize {
        self.inner.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.queue.lock().is_empty()
    }

    /// Advance on the runtime rather than inline. A free slot is claimed by whichever
    /// item is highest when the spawned advance runs; use `enqueue_batch` to order a
    /// group of items before any of them starts.
    fn schedule_advance(&self, queue_size: usize) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let inner = Arc::clone(&self.inner);
                handle.spawn(async move { inner.advance() });
            }
            Err(_) => warn!(
                queue_size,
                "No async runtime available, computation stays queued until process()"
            ),
        }
    }
}

impl SchedulerInner {
    fn is_idle(&self) -> bool {
        let queue = self.queue.lock();
        let in_flight = self.in_flight.lock();
        queue.is_empty() && in_flight.is_empty()
    }

    /// Start queued items while concurrency slots are free.
    fn advance(self: &Arc<Self>) {
        loop {
            let item = {
                let mut queue = self.queue.lock();
                let mut in_flight = self.in_flight.lock();
                if in_flight.len() >= self.config.max_concurrent {
                    return;
                }
                let Some(item) = queue.pop() else {
                    return;
                };
                in_flight.insert(item.id, Arc::clone(&item.computation));
                item
            };

            debug!(
                item_id = %item.id,
                computation_id = %item.computation.id(),
                priority = ?item.priority,
                waited_ms = item.enqueued_at.elapsed().as_millis() as u64,
                "Starting scheduled computation"
            );
            let inner = Arc::clone(self);
            tokio::spawn(async move { inner.run_item(item).await });
        }
    }

    async fn run_item(self: Arc<Self>, item: QueueItem) {
        let start = Instant::now();
        let outcome = item.computation.drive().await;

        // Items swept by cancel_all were already counted.
        if self.in_flight.lock().remove(&item.id).is_some() {
            let mut counters = self.counters.write();
            match &outcome {
                Ok(()) => counters.completed += 1,
                Err(_) if item.computation.status() == ComputationStatus::Cancelled => {
                    counters.cancelled += 1
                }
                Err(_) => counters.failed += 1,
            }
        }

        match &outcome {
            Ok(()) => debug!(
                item_id = %item.id,
                computation_id = %item.computation.id(),
                duration_ms = start.elapsed().as_millis() as u64,
                "Scheduled computation completed"
            ),
            Err(err) => debug!(
                item_id = %item.id,
                computation_id = %item.computation.id(),
                duration_ms = start.elapsed().as_millis() as u64,
                error = %err,
                "Scheduled computation did not resolve"
            ),
        }

        self.changed.notify_waiters();
        if self.config.auto_process {
            self.advance();
        }
    }
}
