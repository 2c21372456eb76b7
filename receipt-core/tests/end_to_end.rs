//! End-to-end scenarios from the design: small single-shot collection,
//! chunked collection, below-threshold redemption, the batch-threshold
//! gate, a stale voucher, and a paused exchange.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use num_bigint::BigUint;
use receipt_core::chain::{AllocationExchange, RedeemOutcome, RedemptionEntry, TransactionManager};
use receipt_core::collector::ReceiptCollector;
use receipt_core::gateway::GatewayClient;
use receipt_core::metrics::Metrics;
use receipt_core::queue::DelayQueue;
use receipt_core::redeemer::{RedeemerConfig, VoucherRedeemer};
use receipt_core::store::Store;
use receipt_core::types::{AllocationId, AllocationReceipt, ReceiptId, Signature};
use serde_json::json;
use sqlx::PgPool;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn alloc(b: u8) -> AllocationId {
    let mut bytes = [0u8; 20];
    bytes[19] = b;
    AllocationId(bytes)
}

fn receipt(allocation: AllocationId, idx: u32, fees: u64) -> AllocationReceipt {
    let mut id_bytes = [0u8; 15];
    id_bytes[11..15].copy_from_slice(&idx.to_be_bytes());
    AllocationReceipt {
        id: ReceiptId(id_bytes),
        allocation,
        fees: BigUint::from(fees),
        signature: Signature(vec![9u8; 64]),
    }
}

async fn insert_receipt(pool: &PgPool, r: &AllocationReceipt) {
    sqlx::query(
        "INSERT INTO allocation_receipts (id, allocation, fees, signature) VALUES ($1, $2, $3, $4)",
    )
    .bind(r.id.to_string())
    .bind(r.allocation.to_string())
    .bind(r.fees.to_string())
    .bind(r.signature.to_string())
    .execute(pool)
    .await
    .unwrap();
}

async fn insert_receipts(pool: &PgPool, receipts: &[AllocationReceipt]) {
    let ids: Vec<String> = receipts.iter().map(|r| r.id.to_string()).collect();
    let allocations: Vec<String> = receipts.iter().map(|r| r.allocation.to_string()).collect();
    let fees: Vec<String> = receipts.iter().map(|r| r.fees.to_string()).collect();
    let signatures: Vec<String> = receipts.iter().map(|r| r.signature.to_string()).collect();
    sqlx::query(
        "INSERT INTO allocation_receipts (id, allocation, fees, signature)
         SELECT * FROM UNNEST($1::text[], $2::text[], $3::text[], $4::text[])",
    )
    .bind(&ids)
    .bind(&allocations)
    .bind(&fees)
    .bind(&signatures)
    .execute(pool)
    .await
    .unwrap();
}

fn store_from_pool(pool: PgPool) -> Store {
    // Store::connect opens its own pool; tests reuse the sqlx::test pool
    // directly through this crate-visible constructor to share one schema.
    Store::from_pool(pool)
}

struct FakeChain {
    redeemed: Mutex<std::collections::HashSet<AllocationId>>,
}

#[async_trait]
impl AllocationExchange for FakeChain {
    async fn allocations_redeemed(&self, allocation: AllocationId) -> anyhow::Result<bool> {
        Ok(self.redeemed.lock().unwrap().contains(&allocation))
    }
}

struct RecordingTxManager {
    outcome: Mutex<RedeemOutcome>,
    calls: Mutex<Vec<Vec<RedemptionEntry>>>,
}

#[async_trait]
impl TransactionManager for RecordingTxManager {
    async fn redeem_many(&self, batch: &[RedemptionEntry]) -> anyhow::Result<RedeemOutcome> {
        self.calls.lock().unwrap().push(batch.to_vec());
        Ok(self.outcome.lock().unwrap().clone())
    }
}

#[sqlx::test(migrations = "./migrations")]
async fn scenario_small_single_shot_collection(pool: PgPool) {
    let allocation = alloc(0xA);
    let r1 = receipt(allocation, 1, 10);
    let r2 = receipt(allocation, 2, 20);
    let r3 = receipt(allocation, 3, 30);
    for r in [&r1, &r2, &r3] {
        insert_receipt(&pool, r).await;
    }

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/collect-receipts"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "allocation": allocation.to_string(),
            "amount": "60",
            "signature": "0xdeadbeef",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let store = store_from_pool(pool.clone());
    store.ensure_summaries(&[allocation]).await.unwrap();

    let gateway = GatewayClient::new(server.uri().parse().unwrap()).unwrap();
    let queue = Arc::new(DelayQueue::new());
    let registry = prometheus::Registry::new();
    let metrics = Arc::new(Metrics::register(&registry).unwrap());
    let collector = ReceiptCollector::new(store.clone(), gateway, queue.clone(), metrics);

    let ok = collector.collect_receipts("action-1", allocation).await.unwrap();
    assert!(ok);
    assert_eq!(queue.len().await, 1);

    let far_future = i64::MAX;
    collector.run_tick(far_future).await;

    let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM allocation_receipts WHERE allocation = $1")
        .bind(allocation.to_string())
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(remaining, 0);

    let amount: String = sqlx::query_scalar("SELECT amount FROM vouchers WHERE allocation = $1")
        .bind(allocation.to_string())
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(amount, "60");

    let collected: String =
        sqlx::query_scalar("SELECT collected_fees FROM allocation_summaries WHERE allocation = $1")
            .bind(allocation.to_string())
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(collected, "60");
}

#[sqlx::test(migrations = "./migrations")]
async fn scenario_chunked_collection_issues_exactly_three_calls(pool: PgPool) {
    let allocation = alloc(0xC);
    let receipts: Vec<AllocationReceipt> =
        (1..=25_001u32).map(|idx| receipt(allocation, idx, 1)).collect();
    insert_receipts(&pool, &receipts).await;

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/partial-voucher"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "allocation": allocation.to_string(),
            "fees": "1",
            "signature": format!("0x{}", "11".repeat(32)),
            "receipt_id_min": format!("0x{}", "00".repeat(32)),
            "receipt_id_max": format!("0x{}", "ff".repeat(32)),
        })))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/voucher"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "allocation": allocation.to_string(),
            "amount": "25001",
            "signature": "0xdeadbeef",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let store = store_from_pool(pool.clone());
    store.ensure_summaries(&[allocation]).await.unwrap();

    let gateway = GatewayClient::new(server.uri().parse().unwrap()).unwrap();
    let queue = Arc::new(DelayQueue::new());
    let registry = prometheus::Registry::new();
    let metrics = Arc::new(Metrics::register(&registry).unwrap());
    let collector = ReceiptCollector::new(store.clone(), gateway, queue.clone(), metrics);

    let ok = collector.collect_receipts("action-chunked", allocation).await.unwrap();
    assert!(ok);

    collector.run_tick(i64::MAX).await;

    // wiremock's `.expect(n)` asserts the exact call count on `server` drop;
    // here we additionally check the persisted outcome of those three calls.
    let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM allocation_receipts WHERE allocation = $1")
        .bind(allocation.to_string())
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(remaining, 0);

    let amount: String = sqlx::query_scalar("SELECT amount FROM vouchers WHERE allocation = $1")
        .bind(allocation.to_string())
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(amount, "25001");
}

#[sqlx::test(migrations = "./migrations")]
async fn scenario_collect_receipts_on_empty_allocation_returns_false(pool: PgPool) {
    let allocation = alloc(0xB);
    let server = MockServer::start().await;
    let store = store_from_pool(pool.clone());
    let gateway = GatewayClient::new(server.uri().parse().unwrap()).unwrap();
    let queue = Arc::new(DelayQueue::new());
    let registry = prometheus::Registry::new();
    let metrics = Arc::new(Metrics::register(&registry).unwrap());
    let collector = ReceiptCollector::new(store.clone(), gateway, queue.clone(), metrics);

    let ok = collector.collect_receipts("action-2", allocation).await.unwrap();
    assert!(!ok);
    assert!(queue.is_empty().await);

    let closed_at: Option<chrono::DateTime<chrono::Utc>> =
        sqlx::query_scalar("SELECT closed_at FROM allocation_summaries WHERE allocation = $1")
            .bind(allocation.to_string())
            .fetch_one(&pool)
            .await
            .unwrap();
    assert!(closed_at.is_some());
}

#[sqlx::test]
async fn scenario_below_threshold_never_submits(pool: PgPool) {
    let a = alloc(1);
    let b = alloc(2);
    sqlx::query("INSERT INTO vouchers (allocation, amount, signature) VALUES ($1, '10', 'x'), ($2, '20', 'y')")
        .bind(a.to_string())
        .bind(b.to_string())
        .execute(&pool)
        .await
        .unwrap();

    let store = store_from_pool(pool.clone());
    let chain = Arc::new(FakeChain { redeemed: Mutex::new(Default::default()) });
    let tx_manager = Arc::new(RecordingTxManager {
        outcome: Mutex::new(RedeemOutcome::Receipt { tx_hash: "0x1".into() }),
        calls: Mutex::new(Vec::new()),
    });
    let registry = prometheus::Registry::new();
    let metrics = Arc::new(Metrics::register(&registry).unwrap());
    let redeemer = VoucherRedeemer::new(
        store,
        chain,
        tx_manager.clone(),
        metrics,
        RedeemerConfig {
            redemption_threshold: BigUint::from(100u32),
            batch_threshold: BigUint::from(0u32),
            max_batch_size: 10,
        },
    );

    redeemer.run_tick().await;

    assert!(tx_manager.calls.lock().unwrap().is_empty());
    let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vouchers").fetch_one(&pool).await.unwrap();
    assert_eq!(remaining, 2);
}

#[sqlx::test]
async fn scenario_batch_threshold_gate(pool: PgPool) {
    let a = alloc(1);
    let b = alloc(2);
    sqlx::query("INSERT INTO vouchers (allocation, amount, signature) VALUES ($1, '400', 'x'), ($2, '300', 'y')")
        .bind(a.to_string())
        .bind(b.to_string())
        .execute(&pool)
        .await
        .unwrap();

    let store = store_from_pool(pool.clone());
    let chain = Arc::new(FakeChain { redeemed: Mutex::new(Default::default()) });
    let tx_manager = Arc::new(RecordingTxManager {
        outcome: Mutex::new(RedeemOutcome::Receipt { tx_hash: "0x1".into() }),
        calls: Mutex::new(Vec::new()),
    });
    let registry = prometheus::Registry::new();
    let metrics = Arc::new(Metrics::register(&registry).unwrap());
    let redeemer = VoucherRedeemer::new(
        store,
        chain,
        tx_manager.clone(),
        metrics,
        RedeemerConfig {
            redemption_threshold: BigUint::from(1u32),
            batch_threshold: BigUint::from(1000u32),
            max_batch_size: 10,
        },
    );

    // total 700 <= 1000: no submission
    redeemer.run_tick().await;
    assert!(tx_manager.calls.lock().unwrap().is_empty());

    let c = alloc(3);
    sqlx::query("INSERT INTO vouchers (allocation, amount, signature) VALUES ($1, '500', 'z')")
        .bind(c.to_string())
        .execute(&pool)
        .await
        .unwrap();

    // total 1200 > 1000: submits
    redeemer.run_tick().await;
    assert_eq!(tx_manager.calls.lock().unwrap().len(), 1);
}

#[sqlx::test]
async fn scenario_stale_voucher_is_dropped_without_submission(pool: PgPool) {
    let allocation = alloc(0xA);
    sqlx::query("INSERT INTO vouchers (allocation, amount, signature) VALUES ($1, '5000', 'x')")
        .bind(allocation.to_string())
        .execute(&pool)
        .await
        .unwrap();

    let store = store_from_pool(pool.clone());
    let mut redeemed = std::collections::HashSet::new();
    redeemed.insert(allocation);
    let chain = Arc::new(FakeChain { redeemed: Mutex::new(redeemed) });
    let tx_manager = Arc::new(RecordingTxManager {
        outcome: Mutex::new(RedeemOutcome::Receipt { tx_hash: "0x1".into() }),
        calls: Mutex::new(Vec::new()),
    });
    let registry = prometheus::Registry::new();
    let metrics = Arc::new(Metrics::register(&registry).unwrap());
    let redeemer = VoucherRedeemer::new(
        store,
        chain,
        tx_manager.clone(),
        metrics,
        RedeemerConfig {
            redemption_threshold: BigUint::from(1u32),
            batch_threshold: BigUint::from(0u32),
            max_batch_size: 10,
        },
    );

    redeemer.run_tick().await;

    assert!(tx_manager.calls.lock().unwrap().is_empty());
    let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vouchers").fetch_one(&pool).await.unwrap();
    assert_eq!(remaining, 0);
}

#[sqlx::test]
async fn scenario_paused_exchange_keeps_vouchers(pool: PgPool) {
    let allocation = alloc(0xA);
    sqlx::query("INSERT INTO vouchers (allocation, amount, signature) VALUES ($1, '5000', 'x')")
        .bind(allocation.to_string())
        .execute(&pool)
        .await
        .unwrap();
    sqlx::query(
        "INSERT INTO allocation_summaries (allocation, closed_at, collected_fees, withdrawn_fees) VALUES ($1, NULL, '0', '0')",
    )
    .bind(allocation.to_string())
    .execute(&pool)
    .await
    .unwrap();

    let store = store_from_pool(pool.clone());
    let chain = Arc::new(FakeChain { redeemed: Mutex::new(Default::default()) });
    let tx_manager = Arc::new(RecordingTxManager {
        outcome: Mutex::new(RedeemOutcome::Paused),
        calls: Mutex::new(Vec::new()),
    });
    let registry = prometheus::Registry::new();
    let metrics = Arc::new(Metrics::register(&registry).unwrap());
    let redeemer = VoucherRedeemer::new(
        store,
        chain,
        tx_manager.clone(),
        metrics.clone(),
        RedeemerConfig {
            redemption_threshold: BigUint::from(1u32),
            batch_threshold: BigUint::from(0u32),
            max_batch_size: 10,
        },
    );

    redeemer.run_tick().await;

    assert_eq!(tx_manager.calls.lock().unwrap().len(), 1);
    assert_eq!(metrics.voucher_exchanges_invalid.get(), 1.0);
    let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vouchers").fetch_one(&pool).await.unwrap();
    assert_eq!(remaining, 1);
    let withdrawn: String =
        sqlx::query_scalar("SELECT withdrawn_fees FROM allocation_summaries WHERE allocation = $1")
            .bind(allocation.to_string())
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(withdrawn, "0");
}
