//! On startup, reconstructs in-memory pending batches from closed
//! summaries and their undeleted receipts.

use std::collections::HashMap;

use anyhow::Result;
use tracing::{info, warn};

use crate::collector::COLLECTION_DELAY_MS;
use crate::queue::DelayQueue;
use crate::store::Store;
use crate::types::{AllocationId, ReceiptsBatch};

/// Seed the delay queue from durable state: every closed allocation with
/// undeleted receipts gets one batch, timed out relative to its `closed_at`.
pub async fn queue_pending_receipts_from_database(store: &Store, queue: &DelayQueue) -> Result<()> {
    let summaries = store.load_closed_summaries().await?;

    let mut pending: HashMap<AllocationId, i64> = HashMap::new();
    for summary in &summaries {
        if let Some(closed_at) = summary.closed_at {
            pending.insert(summary.allocation, closed_at.timestamp_millis() + COLLECTION_DELAY_MS);
        }
    }

    if pending.is_empty() {
        info!("no closed allocations to recover");
        return Ok(());
    }

    let allocations: Vec<AllocationId> = pending.keys().copied().collect();
    let receipts = store.load_receipts_for_allocations(&allocations).await?;

    let mut by_allocation: HashMap<AllocationId, Vec<_>> = HashMap::new();
    for receipt in receipts {
        match pending.get(&receipt.allocation) {
            Some(_) => by_allocation.entry(receipt.allocation).or_default().push(receipt),
            None => {
                // A receipt referencing a summary we didn't just load indicates
                // corrupted state: the transactional invariant in store.rs
                // guarantees every receipt's allocation has a summary.
                debug_assert!(false, "receipt references an untracked allocation");
                warn!(allocation = %receipt.allocation, "recovery found receipt with no matching closed summary");
            }
        }
    }

    let mut seeded = 0usize;
    for (allocation, timeout) in pending {
        if let Some(receipts) = by_allocation.remove(&allocation) {
            if !receipts.is_empty() {
                queue.push(ReceiptsBatch::new(receipts, timeout)).await;
                seeded += 1;
            }
        }
    }

    info!(seeded, "recovery seeded delay queue from durable state");
    Ok(())
}
