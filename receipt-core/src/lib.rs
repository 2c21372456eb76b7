//! Receipt-collection and voucher-redemption core for an indexer agent
//! operating in a decentralized query-fee protocol.
//!
//! See [`collector`] for the closed-allocation -> gateway-exchange ->
//! durable-voucher pipeline, and [`redeemer`] for economic-threshold
//! batching and on-chain redemption.

pub mod chain;
pub mod codec;
pub mod collector;
pub mod config;
pub mod error;
pub mod gateway;
pub mod metrics;
pub mod queue;
pub mod recovery;
pub mod redeemer;
pub mod types;

use std::sync::Arc;

use anyhow::Result;
use num_bigint::BigUint;
use url::Url;

use crate::collector::ReceiptCollector;
use crate::config::Config;
use crate::gateway::GatewayClient;
use crate::metrics::Metrics;
use crate::queue::DelayQueue;
use crate::redeemer::{RedeemerConfig, VoucherRedeemer};
use crate::store::Store;

pub mod store;

/// Wires the collector and redeemer together and owns the two
/// cooperative ticks described in the design: a 10s collection tick and
/// a 30s redemption tick, each executing one handler at a time.
pub struct Core {
    collector: Arc<ReceiptCollector>,
    redeemer: Arc<VoucherRedeemer>,
    collection_interval: std::time::Duration,
    redemption_interval: std::time::Duration,
}

impl Core {
    pub async fn new(
        config: &Config,
        chain: Arc<dyn chain::AllocationExchange>,
        tx_manager: Arc<dyn chain::TransactionManager>,
    ) -> Result<Self> {
        let store = Store::connect(&config.database_url).await?;
        store.migrate().await?;

        let registry = prometheus::Registry::new();
        let metrics = Arc::new(Metrics::register(&registry)?);

        let gateway_base: Url = config.gateway_endpoint.parse()?;
        let gateway = GatewayClient::new(gateway_base)?;
        let queue = Arc::new(DelayQueue::new());

        recovery::queue_pending_receipts_from_database(&store, &queue).await?;

        let collector = Arc::new(ReceiptCollector::new(store.clone(), gateway, queue, metrics.clone()));

        let redeemer_config = RedeemerConfig {
            redemption_threshold: parse_amount_or_zero(&config.voucher_redemption_threshold),
            batch_threshold: parse_amount_or_zero(&config.voucher_redemption_batch_threshold),
            max_batch_size: config.voucher_redemption_max_batch_size,
        };
        let redeemer = Arc::new(VoucherRedeemer::new(store, chain, tx_manager, metrics, redeemer_config));

        Ok(Self {
            collector,
            redeemer,
            collection_interval: std::time::Duration::from_secs(config.collection_interval_secs),
            redemption_interval: std::time::Duration::from_secs(config.redemption_interval_secs),
        })
    }

    pub fn collector(&self) -> Arc<ReceiptCollector> {
        self.collector.clone()
    }

    /// Spawn the two cooperative ticks. Each loop executes one handler at a
    /// time; the two may interleave at suspension points but share no
    /// mutable in-memory state.
    pub fn spawn_ticks(&self) -> (tokio::task::JoinHandle<()>, tokio::task::JoinHandle<()>) {
        let collector = self.collector.clone();
        let collection_interval = self.collection_interval;
        let collection_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(collection_interval);
            loop {
                ticker.tick().await;
                let now = chrono::Utc::now().timestamp_millis();
                collector.run_tick(now).await;
            }
        });

        let redeemer = self.redeemer.clone();
        let redemption_interval = self.redemption_interval;
        let redemption_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(redemption_interval);
            loop {
                ticker.tick().await;
                redeemer.run_tick().await;
            }
        });

        (collection_task, redemption_task)
    }
}

fn parse_amount_or_zero(s: &str) -> BigUint {
    s.parse().unwrap_or_else(|_| BigUint::from(0u32))
}
