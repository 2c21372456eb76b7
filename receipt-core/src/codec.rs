//! Deterministic byte-level encoding for the gateway exchange.
//!
//! Receipt batch layout: `20 + 112 * n` bytes — 20-byte allocation id,
//! then per receipt: 33-byte zero-padded big-endian fee, 15-byte id,
//! 64-byte signature.
//!
//! Partial-voucher batch layout: `20 + 128 * n` bytes — 20-byte
//! allocation id, then per entry: 33-byte fee, 32-byte signature,
//! 32-byte receipt_id_min, 32-byte receipt_id_max.

use num_bigint::BigUint;
use num_traits::Zero;

use crate::error::CodecError;
use crate::types::{AllocationId, AllocationReceipt};

pub const FEE_SLOT: usize = 33;
pub const RECEIPT_ID_SLOT: usize = 15;
pub const SIGNATURE_SLOT: usize = 64;
pub const RECEIPT_ENTRY_LEN: usize = FEE_SLOT + RECEIPT_ID_SLOT + SIGNATURE_SLOT;

pub const PV_SIGNATURE_SLOT: usize = 32;
pub const PV_RANGE_SLOT: usize = 32;
pub const PARTIAL_VOUCHER_ENTRY_LEN: usize = FEE_SLOT + PV_SIGNATURE_SLOT + PV_RANGE_SLOT * 2;

/// A contiguous range of receipt ids, as carried by a partial voucher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiptIdRange {
    pub min: [u8; PV_RANGE_SLOT],
    pub max: [u8; PV_RANGE_SLOT],
}

/// One entry of a partial-voucher batch, prior to being wrapped in JSON.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialVoucherEntry {
    pub fees: BigUint,
    pub signature: [u8; PV_SIGNATURE_SLOT],
    pub range: ReceiptIdRange,
}

fn write_padded(
    out: &mut Vec<u8>,
    field: &'static str,
    value: &BigUint,
    slot: usize,
) -> Result<(), CodecError> {
    let natural = if value.is_zero() { Vec::new() } else { value.to_bytes_be() };
    if natural.len() > slot {
        return Err(CodecError::FieldTooLarge { field, needed: natural.len(), slot });
    }
    out.extend(std::iter::repeat(0u8).take(slot - natural.len()));
    out.extend_from_slice(&natural);
    Ok(())
}

/// Encode a batch of receipts sharing one allocation. The caller must supply
/// receipts already ordered by `id` ascending — that order fixes the encoding.
pub fn encode_receipt_batch(
    allocation: AllocationId,
    receipts: &[AllocationReceipt],
) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::with_capacity(20 + RECEIPT_ENTRY_LEN * receipts.len());
    out.extend_from_slice(allocation.as_bytes());
    for receipt in receipts {
        write_padded(&mut out, "fees", &receipt.fees, FEE_SLOT)?;
        out.extend_from_slice(receipt.id.as_bytes());
        let sig = receipt.signature.as_bytes();
        if sig.len() != SIGNATURE_SLOT {
            return Err(CodecError::FieldTooLarge {
                field: "signature",
                needed: sig.len(),
                slot: SIGNATURE_SLOT,
            });
        }
        out.extend_from_slice(sig);
    }
    Ok(out)
}

/// Encode a batch of partial vouchers sharing one allocation.
pub fn encode_partial_voucher_batch(
    allocation: AllocationId,
    entries: &[PartialVoucherEntry],
) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::with_capacity(20 + PARTIAL_VOUCHER_ENTRY_LEN * entries.len());
    out.extend_from_slice(allocation.as_bytes());
    for entry in entries {
        write_padded(&mut out, "fees", &entry.fees, FEE_SLOT)?;
        out.extend_from_slice(&entry.signature);
        out.extend_from_slice(&entry.range.min);
        out.extend_from_slice(&entry.range.max);
    }
    Ok(out)
}

/// Parsed form of one receipt-batch entry, used only to verify round-trips in tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedReceiptEntry {
    pub fees: BigUint,
    pub id: [u8; RECEIPT_ID_SLOT],
    pub signature: [u8; SIGNATURE_SLOT],
}

/// Decode a receipt batch back into its allocation id and entries.
pub fn decode_receipt_batch(
    bytes: &[u8],
) -> Result<(AllocationId, Vec<DecodedReceiptEntry>), CodecError> {
    if bytes.len() < 20 {
        return Err(CodecError::InputTooShort { expected: 20, got: bytes.len() });
    }
    let (head, rest) = bytes.split_at(20);
    let mut allocation = [0u8; 20];
    allocation.copy_from_slice(head);

    if rest.len() % RECEIPT_ENTRY_LEN != 0 {
        return Err(CodecError::InputTooShort {
            expected: rest.len() + (RECEIPT_ENTRY_LEN - rest.len() % RECEIPT_ENTRY_LEN),
            got: rest.len(),
        });
    }

    let mut entries = Vec::with_capacity(rest.len() / RECEIPT_ENTRY_LEN);
    for chunk in rest.chunks_exact(RECEIPT_ENTRY_LEN) {
        let fees = BigUint::from_bytes_be(&chunk[0..FEE_SLOT]);
        let mut id = [0u8; RECEIPT_ID_SLOT];
        id.copy_from_slice(&chunk[FEE_SLOT..FEE_SLOT + RECEIPT_ID_SLOT]);
        let mut signature = [0u8; SIGNATURE_SLOT];
        signature.copy_from_slice(&chunk[FEE_SLOT + RECEIPT_ID_SLOT..]);
        entries.push(DecodedReceiptEntry { fees, id, signature });
    }
    Ok((AllocationId(allocation), entries))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ReceiptId, Signature};

    fn alloc(b: u8) -> AllocationId {
        let mut bytes = [0u8; 20];
        bytes[19] = b;
        AllocationId(bytes)
    }

    fn receipt(id: u8, fees: u64, allocation: AllocationId) -> AllocationReceipt {
        let mut id_bytes = [0u8; 15];
        id_bytes[14] = id;
        AllocationReceipt {
            id: ReceiptId(id_bytes),
            allocation,
            fees: BigUint::from(fees),
            signature: Signature(vec![7u8; 64]),
        }
    }

    #[test]
    fn encoded_length_matches_formula() {
        let allocation = alloc(0xA);
        let receipts = vec![
            receipt(1, 10, allocation),
            receipt(2, 20, allocation),
            receipt(3, 30, allocation),
        ];
        let bytes = encode_receipt_batch(allocation, &receipts).unwrap();
        assert_eq!(bytes.len(), 20 + RECEIPT_ENTRY_LEN * receipts.len());
        assert_eq!(&bytes[0..20], allocation.as_bytes());
    }

    #[test]
    fn round_trips_field_values() {
        let allocation = alloc(0xB);
        let receipts = vec![receipt(1, 12345, allocation), receipt(2, 0, allocation)];
        let bytes = encode_receipt_batch(allocation, &receipts).unwrap();
        let (decoded_alloc, entries) = decode_receipt_batch(&bytes).unwrap();
        assert_eq!(decoded_alloc, allocation);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].fees, BigUint::from(12345u32));
        assert_eq!(entries[0].id, *receipts[0].id.as_bytes());
        assert_eq!(entries[1].fees, BigUint::from(0u32));
    }

    #[test]
    fn max_value_encodes_without_padding() {
        // 2^264 - 1 fits exactly in 33 bytes with no leading zero byte.
        let max = (BigUint::from(1u32) << 264) - BigUint::from(1u32);
        let allocation = alloc(1);
        let receipts = vec![receipt(1, 0, allocation)];
        let mut r = receipts;
        r[0].fees = max.clone();
        let bytes = encode_receipt_batch(allocation, &r).unwrap();
        let fee_slice = &bytes[20..20 + FEE_SLOT];
        assert_eq!(fee_slice[0], 0xFF);
        let (_, entries) = decode_receipt_batch(&bytes).unwrap();
        assert_eq!(entries[0].fees, max);
    }

    #[test]
    fn overflowing_value_is_rejected() {
        let too_big = BigUint::from(1u32) << 264; // 2^264, needs 34 bytes
        let allocation = alloc(1);
        let mut r = vec![receipt(1, 0, allocation)];
        r[0].fees = too_big;
        let err = encode_receipt_batch(allocation, &r).unwrap_err();
        assert!(matches!(err, CodecError::FieldTooLarge { field: "fees", .. }));
    }

    #[test]
    fn partial_voucher_batch_length_matches_formula() {
        let allocation = alloc(2);
        let entries = vec![
            PartialVoucherEntry {
                fees: BigUint::from(100u32),
                signature: [1u8; PV_SIGNATURE_SLOT],
                range: ReceiptIdRange { min: [0u8; 32], max: [9u8; 32] },
            },
            PartialVoucherEntry {
                fees: BigUint::from(200u32),
                signature: [2u8; PV_SIGNATURE_SLOT],
                range: ReceiptIdRange { min: [1u8; 32], max: [8u8; 32] },
            },
        ];
        let bytes = encode_partial_voucher_batch(allocation, &entries).unwrap();
        assert_eq!(bytes.len(), 20 + PARTIAL_VOUCHER_ENTRY_LEN * entries.len());
    }
}
