//! Core domain types: allocation ids, receipts, summaries, vouchers.
//!
//! Big integers (`fees`, `amount`, `collectedFees`, `withdrawnFees`) are
//! represented as [`BigUint`] internally and as decimal strings at the
//! persistence and JSON boundary.

use std::fmt;
use std::str::FromStr;

use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HexError {
    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),
    #[error("expected {expected} bytes, got {got}")]
    WrongLength { expected: usize, got: usize },
}

fn strip_0x(s: &str) -> &str {
    s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s)
}

fn decode_fixed<const N: usize>(s: &str) -> Result<[u8; N], HexError> {
    let bytes = hex::decode(strip_0x(s))?;
    if bytes.len() != N {
        return Err(HexError::WrongLength { expected: N, got: bytes.len() });
    }
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes);
    Ok(out)
}

/// A 20-byte allocation address, canonicalized lowercase hex with a `0x` prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AllocationId(pub [u8; 20]);

impl AllocationId {
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl FromStr for AllocationId {
    type Err = HexError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(decode_fixed::<20>(s)?))
    }
}

impl fmt::Display for AllocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl Serialize for AllocationId {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for AllocationId {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A 15-byte receipt identifier, ordered ascending to fix canonical encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReceiptId(pub [u8; 15]);

impl ReceiptId {
    pub fn as_bytes(&self) -> &[u8; 15] {
        &self.0
    }
}

impl FromStr for ReceiptId {
    type Err = HexError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(decode_fixed::<15>(s)?))
    }
}

impl fmt::Display for ReceiptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

/// A signature of arbitrary expected length, carried as raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature(pub Vec<u8>);

impl Signature {
    pub fn from_hex(s: &str, expected_len: usize) -> Result<Self, HexError> {
        let bytes = hex::decode(strip_0x(s))?;
        if bytes.len() != expected_len {
            return Err(HexError::WrongLength { expected: expected_len, got: bytes.len() });
        }
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(&self.0))
    }
}

/// Parse a decimal-string big integer as used at the persistence/JSON boundary.
pub fn parse_amount(s: &str) -> Result<BigUint, num_bigint::ParseBigIntError> {
    s.parse()
}

/// A receipt accumulated off-chain for a query served under an allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationReceipt {
    pub id: ReceiptId,
    pub allocation: AllocationId,
    pub fees: BigUint,
    pub signature: Signature,
}

/// Per-allocation bookkeeping: lifecycle timestamps and cumulative fee totals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationSummary {
    pub allocation: AllocationId,
    pub closed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub collected_fees: BigUint,
    pub withdrawn_fees: BigUint,
}

impl AllocationSummary {
    pub fn new(allocation: AllocationId) -> Self {
        Self {
            allocation,
            closed_at: None,
            collected_fees: BigUint::from(0u32),
            withdrawn_fees: BigUint::from(0u32),
        }
    }
}

/// A gateway-signed aggregate claim, redeemable on-chain for the sum of its receipts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voucher {
    pub allocation: AllocationId,
    #[serde(with = "amount_serde")]
    pub amount: BigUint,
    pub signature: String,
}

/// An interim aggregate over a contiguous range of receipt ids. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialVoucher {
    pub allocation: AllocationId,
    #[serde(with = "amount_serde")]
    pub fees: BigUint,
    pub signature: String,
    pub receipt_id_min: String,
    pub receipt_id_max: String,
}

/// An in-memory batch of same-allocation receipts awaiting gateway exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptsBatch {
    pub receipts: Vec<AllocationReceipt>,
    /// Epoch milliseconds at which this batch becomes eligible for collection.
    pub timeout: i64,
}

impl ReceiptsBatch {
    /// Panics in debug builds on an empty batch: callers must never construct one.
    pub fn new(receipts: Vec<AllocationReceipt>, timeout: i64) -> Self {
        debug_assert!(!receipts.is_empty(), "ReceiptsBatch must not be empty");
        Self { receipts, timeout }
    }

    pub fn allocation(&self) -> AllocationId {
        self.receipts[0].allocation
    }
}

mod amount_serde {
    use num_bigint::BigUint;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &BigUint, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&v.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<BigUint, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
