//! Domain error taxonomy (stable codes referenced in logs and metrics).

use crate::types::AllocationId;
use thiserror::Error;

/// Codec-level failures: a field didn't fit its slot, or an input was malformed.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("value for {field} needs {needed} bytes but its slot is {slot} bytes")]
    FieldTooLarge { field: &'static str, needed: usize, slot: usize },
    #[error("input too short: expected at least {expected} bytes, got {got}")]
    InputTooShort { expected: usize, got: usize },
    #[error(transparent)]
    Hex(#[from] crate::types::HexError),
}

/// Gateway HTTP failures: any non-2xx response or transport error.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway request to {endpoint} failed: {source}")]
    Request { endpoint: &'static str, #[source] source: reqwest::Error },
    #[error("gateway returned non-success status {status} from {endpoint}")]
    Status { endpoint: &'static str, status: reqwest::StatusCode },
    #[error("failed to decode gateway response from {endpoint}: {source}")]
    Decode { endpoint: &'static str, #[source] source: reqwest::Error },
    #[error("failed to parse gateway JSON response from {endpoint}: {source}")]
    Json { endpoint: &'static str, #[source] source: serde_json::Error },
}

/// Stable, loggable error codes for the receipt/voucher pipeline.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("remember_allocations failed")]
    RememberAllocationsFailed(#[source] anyhow::Error),

    #[error("queue_receipts failed for allocation {allocation}")]
    QueueReceiptsFailed {
        allocation: AllocationId,
        #[source]
        source: anyhow::Error,
    },

    #[error("gateway exchange failed for allocation {allocation}")]
    CollectExchangeFailed {
        allocation: AllocationId,
        #[source]
        source: anyhow::Error,
    },

    #[error("on-chain redemption failed for batch of {batch_size} vouchers")]
    VoucherRedeemFailed {
        batch_size: usize,
        #[source]
        source: anyhow::Error,
    },

    #[error("on-chain redemption returned invalid sentinel: {sentinel}")]
    VoucherRedeemInvalid { sentinel: &'static str },
}
