//! External collaborators referenced only by interface: the
//! transaction manager and the allocation exchange contract.

use async_trait::async_trait;
use num_bigint::BigUint;

use crate::types::{AllocationId, Voucher};

/// One entry of an on-chain `redeemMany` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedemptionEntry {
    pub allocation_id: AllocationId,
    pub amount: BigUint,
    pub signature: String,
}

impl From<&Voucher> for RedemptionEntry {
    fn from(voucher: &Voucher) -> Self {
        Self {
            allocation_id: voucher.allocation,
            amount: voucher.amount.clone(),
            signature: voucher.signature.clone(),
        }
    }
}

/// Outcome of submitting a redemption batch through the transaction manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedeemOutcome {
    /// The batch was mined; `tx_hash` identifies the on-chain receipt.
    Receipt { tx_hash: String },
    /// The contract is paused; retry next cycle.
    Paused,
    /// The sender is not authorized to redeem; retry next cycle.
    Unauthorized,
}

/// Given a gas estimator and a sender, executes an on-chain call and
/// returns a receipt or a sentinel. Modeled after an `alloy`-style
/// estimate-then-send transaction manager; concrete wiring (key
/// management, RPC client) is out of scope.
#[async_trait]
pub trait TransactionManager: Send + Sync {
    async fn redeem_many(&self, batch: &[RedemptionEntry]) -> anyhow::Result<RedeemOutcome>;
}

/// The allocation exchange contract, queried read-only before submission.
#[async_trait]
pub trait AllocationExchange: Send + Sync {
    async fn allocations_redeemed(&self, allocation: AllocationId) -> anyhow::Result<bool>;
}
