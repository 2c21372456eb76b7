//! Min-heap of pending receipt batches keyed by ready-at timestamp.
//!
//! Mutated only from the collection tick and from `collect_receipts` /
//! recovery. The `Mutex` is the "external implementations must guard
//! with a mutex" requirement for a shared-nothing, single-process core.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use tokio::sync::Mutex;

use crate::types::ReceiptsBatch;

#[derive(Debug)]
struct Entry(ReceiptsBatch);

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.0.timeout == other.0.timeout
    }
}
impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so BinaryHeap (a max-heap) behaves as a min-heap on timeout.
        other.0.timeout.cmp(&self.0.timeout)
    }
}

/// A min-heap of [`ReceiptsBatch`] ordered by `timeout`.
#[derive(Default)]
pub struct DelayQueue {
    heap: Mutex<BinaryHeap<Entry>>,
}

impl DelayQueue {
    pub fn new() -> Self {
        Self { heap: Mutex::new(BinaryHeap::new()) }
    }

    pub async fn push(&self, batch: ReceiptsBatch) {
        self.heap.lock().await.push(Entry(batch));
    }

    /// Pop every batch with `timeout <= now`, in heap (timeout-ascending) order.
    pub async fn drain_ready(&self, now: i64) -> Vec<ReceiptsBatch> {
        let mut heap = self.heap.lock().await;
        let mut ready = Vec::new();
        while let Some(top) = heap.peek() {
            if top.0.timeout > now {
                break;
            }
            ready.push(heap.pop().unwrap().0);
        }
        ready
    }

    pub async fn len(&self) -> usize {
        self.heap.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
