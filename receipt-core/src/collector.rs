//! Polls the delay queue, drives the collect-or-chunked-collect state
//! machine against the gateway, and persists results atomically.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, instrument, warn};

use crate::codec::{encode_partial_voucher_batch, encode_receipt_batch, PartialVoucherEntry, ReceiptIdRange};
use crate::error::CoreError;
use crate::gateway::GatewayClient;
use crate::metrics::Metrics;
use crate::queue::DelayQueue;
use crate::store::Store;
use crate::types::{AllocationId, AllocationReceipt, ReceiptsBatch, Signature};

/// Receipts above this count take the chunked partial-voucher path.
pub const SINGLE_SHOT_MAX_RECEIPTS: usize = 25_000;
/// Chunk size used for each `/partial-voucher` call on the chunked path.
pub const PARTIAL_VOUCHER_CHUNK_SIZE: usize = 25_000;
/// How long after `collectReceipts` a batch becomes eligible for gateway exchange.
pub const COLLECTION_DELAY_MS: i64 = 20 * 60 * 1000;

pub struct ReceiptCollector {
    store: Store,
    gateway: GatewayClient,
    queue: Arc<DelayQueue>,
    metrics: Arc<Metrics>,
}

impl ReceiptCollector {
    pub fn new(store: Store, gateway: GatewayClient, queue: Arc<DelayQueue>, metrics: Arc<Metrics>) -> Self {
        Self { store, gateway, queue, metrics }
    }

    /// Upsert an `AllocationSummary` for every id in one transaction. Errors
    /// are logged and absorbed: the caller may retry (idempotent).
    pub async fn remember_allocations(&self, action_id: &str, allocations: &[AllocationId]) -> bool {
        match self.store.ensure_summaries(allocations).await {
            Ok(()) => true,
            Err(source) => {
                let err = CoreError::RememberAllocationsFailed(source);
                error!(action_id, error = %err, "remember_allocations failed");
                false
            }
        }
    }

    /// Set `closed_at = now` on the summary and load its receipts. If none
    /// exist, returns `false` without touching the delay queue. Errors
    /// propagate: this method is invoked by the close-allocation workflow,
    /// which treats failure as fatal for that action.
    #[instrument(skip(self), fields(%allocation))]
    pub async fn collect_receipts(&self, action_id: &str, allocation: AllocationId) -> Result<bool, CoreError> {
        let now = Utc::now();
        let receipts = self
            .store
            .close_allocation_and_load_receipts(allocation, now)
            .await
            .map_err(|source| CoreError::QueueReceiptsFailed { allocation, source })?;

        if receipts.is_empty() {
            debug!(action_id, "no receipts to collect for closed allocation");
            return Ok(false);
        }

        let timeout = now.timestamp_millis() + COLLECTION_DELAY_MS;
        let batch = ReceiptsBatch::new(receipts, timeout);
        self.queue.push(batch).await;
        self.metrics.receipts_to_collect.with_label_values(&[&allocation.to_string()]).inc();
        Ok(true)
    }

    /// Drain every batch whose timeout has elapsed and run the exchange
    /// state machine for each, in heap order. Called on the 10s tick.
    pub async fn run_tick(&self, now: i64) {
        let ready = self.queue.drain_ready(now).await;
        for batch in ready {
            self.process_batch(batch).await;
        }
    }

    #[instrument(skip(self, batch), fields(allocation = %batch.allocation(), n = batch.receipts.len()))]
    async fn process_batch(&self, batch: ReceiptsBatch) {
        let allocation = batch.allocation();
        let timer = self.metrics.receipts_exchange_duration.with_label_values(&[&allocation.to_string()]);
        let started = std::time::Instant::now();

        match self.exchange(&batch).await {
            Ok((receipt_ids, voucher)) => {
                timer.observe(started.elapsed().as_secs_f64());
                let collected_fees = match self.store.persist_exchange_result(&receipt_ids, &voucher).await {
                    Ok(total) => total,
                    Err(source) => {
                        let err = CoreError::CollectExchangeFailed { allocation, source };
                        error!(error = %err, "persisting exchange result failed");
                        self.metrics.receipts_failed.inc();
                        return;
                    }
                };
                self.metrics.vouchers.inc();
                // `collected_fees` is the allocation's post-commit cumulative total,
                // not just this exchange's amount — the gauge tracks a running sum.
                self.metrics
                    .voucher_collected_fees
                    .with_label_values(&[&allocation.to_string()])
                    .set(bigint_to_f64(&collected_fees));
                self.metrics.receipts_to_collect.with_label_values(&[&allocation.to_string()]).set(0.0);
                info!(amount = %voucher.amount, %collected_fees, "voucher persisted");
            }
            Err(source) => {
                timer.observe(started.elapsed().as_secs_f64());
                let err = CoreError::CollectExchangeFailed { allocation, source };
                error!(error = %err, "gateway exchange failed, receipts remain in database");
                self.metrics.receipts_failed.inc();
            }
        }
    }

    /// `encoding -> exchanging` half of the state machine: produces the
    /// final voucher and the list of receipt ids it covers.
    async fn exchange(
        &self,
        batch: &ReceiptsBatch,
    ) -> anyhow::Result<(Vec<crate::types::ReceiptId>, crate::types::Voucher)> {
        let allocation = batch.allocation();
        let ids: Vec<_> = batch.receipts.iter().map(|r| r.id).collect();

        if batch.receipts.len() <= SINGLE_SHOT_MAX_RECEIPTS {
            let body = encode_receipt_batch(allocation, &batch.receipts)?;
            // `AllocationId`'s Deserialize already runs every address through
            // the lowercase-0x normalizer, so the gateway returning a
            // differently-cased address still round-trips to the same key.
            let voucher = self.gateway.collect_receipts(body).await?;
            return Ok((ids, voucher));
        }

        warn!(n = batch.receipts.len(), "receipt batch exceeds single-shot limit, chunking");
        let alloc_label = allocation.to_string();
        let mut partials = Vec::new();
        for chunk in batch.receipts.chunks(PARTIAL_VOUCHER_CHUNK_SIZE) {
            let body = encode_receipt_batch(allocation, chunk)?;
            let pv = self.gateway.partial_voucher(body).await?;
            partials.push(to_partial_voucher_entry(&pv)?);
            self.metrics.vouchers_to_exchange.with_label_values(&[&alloc_label]).set(partials.len() as f64);
        }

        let body = encode_partial_voucher_batch(allocation, &partials)?;
        let voucher = self.gateway.voucher(body).await?;
        self.metrics.vouchers_to_exchange.with_label_values(&[&alloc_label]).set(0.0);
        Ok((ids, voucher))
    }
}

fn to_partial_voucher_entry(
    pv: &crate::types::PartialVoucher,
) -> anyhow::Result<PartialVoucherEntry> {
    let signature = Signature::from_hex(&pv.signature, 32)?;
    let min = hex_to_32(&pv.receipt_id_min)?;
    let max = hex_to_32(&pv.receipt_id_max)?;
    Ok(PartialVoucherEntry {
        fees: pv.fees.clone(),
        signature: <[u8; 32]>::try_from(signature.as_bytes()).expect("validated 32 bytes"),
        range: ReceiptIdRange { min, max },
    })
}

fn hex_to_32(s: &str) -> anyhow::Result<[u8; 32]> {
    let sig = Signature::from_hex(s, 32)?;
    Ok(<[u8; 32]>::try_from(sig.as_bytes()).expect("validated 32 bytes"))
}

fn bigint_to_f64(v: &num_bigint::BigUint) -> f64 {
    v.to_string().parse().unwrap_or(f64::INFINITY)
}
