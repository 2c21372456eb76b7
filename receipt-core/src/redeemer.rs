//! Polls the vouchers table, partitions by threshold, submits batched
//! on-chain redemption, and updates summaries.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use num_bigint::BigUint;
use tracing::{debug, error, info, instrument};

use crate::chain::{AllocationExchange, RedeemOutcome, RedemptionEntry, TransactionManager};
use crate::error::CoreError;
use crate::metrics::Metrics;
use crate::store::Store;
use crate::types::Voucher;

/// How many concurrent `allocationsRedeemed` pre-checks to have in flight.
const REDEEMED_CHECK_CONCURRENCY: usize = 8;

pub struct RedeemerConfig {
    pub redemption_threshold: BigUint,
    pub batch_threshold: BigUint,
    pub max_batch_size: i64,
}

pub struct VoucherRedeemer {
    store: Store,
    chain: Arc<dyn AllocationExchange>,
    tx_manager: Arc<dyn TransactionManager>,
    metrics: Arc<Metrics>,
    config: RedeemerConfig,
}

impl VoucherRedeemer {
    pub fn new(
        store: Store,
        chain: Arc<dyn AllocationExchange>,
        tx_manager: Arc<dyn TransactionManager>,
        metrics: Arc<Metrics>,
        config: RedeemerConfig,
    ) -> Self {
        Self { store, chain, tx_manager, metrics, config }
    }

    /// One 30s tick: load candidates, partition by threshold, submit if
    /// the batch clears the economic threshold.
    #[instrument(skip(self))]
    pub async fn run_tick(&self) {
        let candidates = match self.store.load_top_vouchers(self.config.max_batch_size).await {
            Ok(v) => v,
            Err(source) => {
                error!(error = %source, "failed to load vouchers for redemption");
                return;
            }
        };

        // Query the pre-check concurrently: each call is an independent chain
        // read, and `buffered` keeps the value-descending order from the load
        // intact for the partition pass below.
        let checks: Vec<_> = stream::iter(candidates.into_iter().map(|voucher| {
            let chain = self.chain.clone();
            async move {
                let redeemed = chain.allocations_redeemed(voucher.allocation).await;
                (voucher, redeemed)
            }
        }))
        .buffered(REDEEMED_CHECK_CONCURRENCY)
        .collect()
        .await;

        let mut eligible = Vec::new();
        let mut below_threshold = Vec::new();

        for (voucher, redeemed) in checks {
            match redeemed {
                Ok(true) => {
                    if let Err(source) = self.store.delete_voucher(voucher.allocation).await {
                        error!(allocation = %voucher.allocation, error = %source, "failed to delete stale voucher");
                    } else {
                        debug!(allocation = %voucher.allocation, "dropped stale already-redeemed voucher");
                    }
                }
                Ok(false) => {
                    if voucher.amount < self.config.redemption_threshold {
                        below_threshold.push(voucher);
                    } else {
                        eligible.push(voucher);
                    }
                }
                Err(source) => {
                    error!(allocation = %voucher.allocation, error = %source, "allocationsRedeemed query failed");
                }
            }
        }

        if !below_threshold.is_empty() {
            debug!(n = below_threshold.len(), "vouchers below redemption threshold, holding");
        }

        if eligible.is_empty() {
            return;
        }

        // `eligible` preserves the value-descending order of the query.
        let take = eligible.len().min(self.config.max_batch_size as usize);
        let batch: Vec<Voucher> = eligible.into_iter().take(take).collect();
        let total: BigUint = batch.iter().fold(BigUint::from(0u32), |acc, v| acc + &v.amount);

        if total <= self.config.batch_threshold {
            info!(%total, "redemption batch below economic threshold, skipping submission");
            return;
        }

        self.metrics.vouchers_redeem.set(batch.len() as f64);
        self.submit(batch).await;
    }

    async fn submit(&self, batch: Vec<Voucher>) {
        let entries: Vec<RedemptionEntry> = batch.iter().map(RedemptionEntry::from).collect();
        let timer_started = std::time::Instant::now();

        let outcome = self.tx_manager.redeem_many(&entries).await;
        self.metrics.vouchers_redeem_duration.observe(timer_started.elapsed().as_secs_f64());

        match outcome {
            Ok(RedeemOutcome::Receipt { tx_hash }) => {
                info!(tx_hash, n = batch.len(), "redemption batch mined");
                self.metrics.voucher_exchanges_ok.inc();
                if let Err(source) = self.store.record_redemption(&batch).await {
                    error!(error = %source, "failed to record redemption bookkeeping");
                }
            }
            Ok(RedeemOutcome::Paused) => {
                let err = CoreError::VoucherRedeemInvalid { sentinel: "paused" };
                error!(error = %err, "redeemMany rejected");
                self.metrics.voucher_exchanges_invalid.inc();
            }
            Ok(RedeemOutcome::Unauthorized) => {
                let err = CoreError::VoucherRedeemInvalid { sentinel: "unauthorized" };
                error!(error = %err, "redeemMany rejected");
                self.metrics.voucher_exchanges_invalid.inc();
            }
            Err(source) => {
                let err = CoreError::VoucherRedeemFailed { batch_size: batch.len(), source };
                error!(error = %err, "redeemMany threw");
                self.metrics.voucher_redeems_failed.inc();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_total_is_sum_of_amounts() {
        let a = Voucher { allocation: crate::types::AllocationId([1u8; 20]), amount: BigUint::from(400u32), signature: String::new() };
        let b = Voucher { allocation: crate::types::AllocationId([2u8; 20]), amount: BigUint::from(300u32), signature: String::new() };
        let total: BigUint = [&a, &b].iter().fold(BigUint::from(0u32), |acc, v| acc + &v.amount);
        assert_eq!(total, BigUint::from(700u32));
    }
}
