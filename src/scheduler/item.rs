//! Queue entries and their service order.

use crate::computation::Priority;
use crate::scheduler::Schedulable;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// Identifier of an enqueued item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemId(u64);

impl ItemId {
    /// Generate the next item ID
    pub fn next() -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        ItemId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "item-{}", self.0)
    }
}

/// One computation waiting in the scheduler queue
pub(crate) struct QueueItem {
    pub id: ItemId,
    pub priority: Priority,
    /// Enqueue order within this scheduler
    pub sequence: u64,
    pub enqueued_at: Instant,
    pub computation: Arc<dyn Schedulable>,
}

impl PartialEq for QueueItem {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for QueueItem {}

impl Ord for QueueItem {
    /// Order by priority (higher first), then by enqueue order (older first).
    /// BinaryHeap is a max-heap, so the item to service next must compare Greater.
    fn cmp(&self, other: &Self) -> Ordering {
        match self.priority.cmp(&other.priority) {
            Ordering::Equal => self.sequence.cmp(&other.sequence).reverse(),
            ordering => ordering,
        }
    }
}

impl PartialOrd for QueueItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
