//! Packing of owner signatures into the single blob `execTransaction` takes.
//!
//! Layout: one 65-byte static entry per signer in strictly ascending signer
//! order, then the dynamic region. A contract signature's static entry is
//! `signer (32) || offset (32) || 0x00`, where `offset` is the byte position
//! of its `length (32) || payload` entry counted from the start of the blob.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};

use alloy_primitives::{Address, Bytes, B256, U256};

use crate::abi::{address_word, uint_word};
use crate::error::SafeError;
use crate::signature::{recover, SafeSignature, SIGNATURE_LENGTH};

/// Deduplicates signatures by signer and returns them sorted ascending by
/// signer address.
///
/// An identical resubmission is dropped. A second, different signature from
/// the same signer is a [`SafeError::State`].
pub fn sort_signatures(
    signatures: impl IntoIterator<Item = SafeSignature>,
) -> Result<Vec<SafeSignature>, SafeError> {
    let mut by_signer: BTreeMap<Address, SafeSignature> = BTreeMap::new();

    for signature in signatures {
        match by_signer.entry(signature.signer()) {
            Entry::Vacant(slot) => {
                slot.insert(signature);
            }
            Entry::Occupied(existing) => {
                if *existing.get() != signature {
                    return Err(SafeError::State(format!(
                        "conflicting signatures from {}",
                        signature.signer()
                    )));
                }
            }
        }
    }

    let mut sorted: Vec<SafeSignature> = by_signer.into_values().collect();
    sorted.sort_by_key(|s| s.signer());
    Ok(sorted)
}

/// Builds the aggregated signature blob for a set of owner signatures.
///
/// Output length is `65 * N` plus `32 + payload length` for every contract
/// signature. Input order does not affect the output.
pub fn aggregate_signatures(
    signatures: impl IntoIterator<Item = SafeSignature>,
) -> Result<Bytes, SafeError> {
    let sorted = sort_signatures(signatures)?;

    let static_len = sorted.len() * SIGNATURE_LENGTH;
    let mut static_part = Vec::with_capacity(static_len);
    let mut dynamic_part = Vec::new();

    for signature in &sorted {
        if signature.is_contract_signature() {
            let offset = static_len + dynamic_part.len();
            static_part.extend_from_slice(&address_word(&signature.signer()));
            static_part.extend_from_slice(&uint_word(U256::from(offset)));
            static_part.push(0);

            dynamic_part.extend_from_slice(&uint_word(U256::from(signature.data().len())));
            dynamic_part.extend_from_slice(signature.data());
        } else {
            static_part.extend_from_slice(signature.data());
        }
    }

    static_part.extend_from_slice(&dynamic_part);
    Ok(static_part.into())
}

/// Walks an aggregated blob the way the account contract does and returns
/// the first `threshold` signers in blob order.
///
/// Each signer must be an owner and strictly greater than the previous one.
/// Contract signature entries must point at a length-prefixed payload inside
/// the blob; the payload itself is not verified here. Pre-validated entries
/// are taken at face value.
pub fn check_signatures(
    digest: &B256,
    signatures: &[u8],
    owners: &BTreeSet<Address>,
    threshold: usize,
) -> Result<Vec<Address>, SafeError> {
    if threshold == 0 {
        return Err(SafeError::Validation("threshold must be at least 1".into()));
    }
    if signatures.len() < threshold * SIGNATURE_LENGTH {
        return Err(SafeError::Signature(format!(
            "blob holds fewer than {threshold} signatures"
        )));
    }

    let mut signers = Vec::with_capacity(threshold);
    let mut last = Address::ZERO;

    for chunk in signatures.chunks(SIGNATURE_LENGTH).take(threshold) {
        let v = chunk[64];
        let signer = match v {
            0 => {
                let signer = Address::from_slice(&chunk[12..32]);
                check_dynamic_entry(signatures, threshold, &chunk[32..64])?;
                signer
            }
            1 => Address::from_slice(&chunk[12..32]),
            _ => recover(digest, chunk)?,
        };

        if signer <= last {
            return Err(SafeError::Signature(format!(
                "signer {signer} is out of order or duplicated"
            )));
        }
        if !owners.contains(&signer) {
            return Err(SafeError::Signature(format!("{signer} is not an owner")));
        }

        last = signer;
        signers.push(signer);
    }

    Ok(signers)
}

fn check_dynamic_entry(blob: &[u8], threshold: usize, offset_word: &[u8]) -> Result<(), SafeError> {
    let offset = U256::from_be_slice(offset_word);
    let static_len = U256::from(threshold * SIGNATURE_LENGTH);
    if offset < static_len {
        return Err(SafeError::Signature(
            "contract signature offset points into the static part".into(),
        ));
    }

    let start: usize = offset
        .try_into()
        .map_err(|_| SafeError::Signature("contract signature offset too large".into()))?;
    let len_end = start
        .checked_add(32)
        .filter(|end| *end <= blob.len())
        .ok_or_else(|| SafeError::Signature("contract signature length out of bounds".into()))?;

    let payload_len: usize = U256::from_be_slice(&blob[start..len_end])
        .try_into()
        .map_err(|_| SafeError::Signature("contract signature length too large".into()))?;
    if len_end.checked_add(payload_len).map_or(true, |end| end > blob.len()) {
        return Err(SafeError::Signature(
            "contract signature payload out of bounds".into(),
        ));
    }

    Ok(())
}
