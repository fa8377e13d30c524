//! Owner signatures over a transaction digest.
//!
//! A 65-byte signature is `r (32) || s (32) || v (1)`. The verifying contract
//! reads `v` as a type tag:
//!
//! | v       | meaning                                                  |
//! |---------|----------------------------------------------------------|
//! | 0       | contract signature, `s` is an offset into the dynamic part |
//! | 1       | pre-validated, `r` holds the owner address               |
//! | 27, 28  | ECDSA over the raw digest                                |
//! | 31, 32  | ECDSA over the EIP-191 prefixed digest (`eth_sign`)      |

use alloy_primitives::{Address, Bytes, B256};
use k256::ecdsa::signature::hazmat::PrehashSigner;
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::abi::address_word;
use crate::address::{address_from_private_key, address_from_verifying_key};
use crate::error::SafeError;
use crate::hashing::eth_message_hash;

/// Length of every static signature entry.
pub const SIGNATURE_LENGTH: usize = 65;

/// Offset added to `v` to mark an `eth_sign` style signature.
const ETH_SIGN_V_OFFSET: u8 = 4;

/// How the verifying contract must check a signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignatureKind {
    /// ECDSA over the raw digest (v = 27/28).
    Ecdsa,
    /// ECDSA over the prefixed digest (v = 31/32).
    EthSign,
    /// The executing caller is the owner (v = 1).
    PreValidated,
    /// Checked on-chain by the contract at the signer address (v = 0).
    Contract,
}

/// One owner's approval of a digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafeSignature {
    signer: Address,
    data: Bytes,
    kind: SignatureKind,
}

impl SafeSignature {
    /// Rebuilds a signature from stored parts, checking the layout its kind
    /// requires. Contract payloads are opaque and accepted as is.
    pub fn decode(
        signer: Address,
        kind: SignatureKind,
        data: impl Into<Bytes>,
    ) -> Result<Self, SafeError> {
        let data = data.into();
        if kind == SignatureKind::Contract {
            return Ok(Self { signer, data, kind });
        }

        if data.len() != SIGNATURE_LENGTH {
            return Err(SafeError::Signature(format!(
                "signature must be {SIGNATURE_LENGTH} bytes, got {}",
                data.len()
            )));
        }

        let v = data[64];
        let layout_ok = match kind {
            SignatureKind::Ecdsa => v == 27 || v == 28,
            SignatureKind::EthSign => v == 31 || v == 32,
            SignatureKind::PreValidated => {
                v == 1 && data[..32] == address_word(&signer) && data[32..64] == [0u8; 32]
            }
            SignatureKind::Contract => true,
        };
        if !layout_ok {
            return Err(SafeError::Signature(format!(
                "payload does not match {kind:?} layout (v = {v})"
            )));
        }

        Ok(Self { signer, data, kind })
    }

    pub fn signer(&self) -> Address {
        self.signer
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn kind(&self) -> SignatureKind {
        self.kind
    }

    pub fn is_contract_signature(&self) -> bool {
        self.kind == SignatureKind::Contract
    }
}

/// Signs a raw 32-byte digest. Returns `r || s || v` with v = 27 or 28.
///
/// The key is copied into a local buffer that is zeroized before returning.
pub fn sign_digest(digest: &B256, private_key: &[u8; 32]) -> Result<[u8; 65], SafeError> {
    sign_hash(digest, private_key)
}

/// Signs a digest the way an `eth_sign` backend does: over the EIP-191
/// prefixed hash. Returns `r || s || v` with v = 27 or 28, as such backends
/// report it.
pub fn sign_digest_eth_message(
    digest: &B256,
    private_key: &[u8; 32],
) -> Result<[u8; 65], SafeError> {
    sign_hash(&eth_message_hash(digest), private_key)
}

fn sign_hash(hash: &B256, private_key: &[u8; 32]) -> Result<[u8; 65], SafeError> {
    let mut key_bytes = *private_key;
    let signing_key = SigningKey::from_bytes((&key_bytes).into())
        .map_err(|e| SafeError::Validation(format!("invalid private key: {e}")));
    key_bytes.zeroize();

    let (signature, recovery_id): (Signature, RecoveryId) = signing_key?
        .sign_prehash(hash.as_slice())
        .map_err(|e| SafeError::Signature(e.to_string()))?;

    let mut out = [0u8; 65];
    out[..32].copy_from_slice(&signature.r().to_bytes());
    out[32..64].copy_from_slice(&signature.s().to_bytes());
    out[64] = recovery_id.is_y_odd() as u8 + 27;
    Ok(out)
}

/// Normalizes a 65-byte signature from any signing backend into the
/// encoding the verifying contract expects for `signer`.
///
/// `v` of 0/1 is lifted to 27/28. If the signature recovers to `signer`
/// against the raw digest it is kept as [`SignatureKind::Ecdsa`]. Otherwise the
/// backend must have signed the EIP-191 prefixed digest: if that recovers to
/// `signer`, `v` is raised by 4 and the result is [`SignatureKind::EthSign`].
/// Anything else is a signer mismatch.
pub fn adjust_v(
    digest: &B256,
    signature: &[u8],
    signer: Address,
) -> Result<SafeSignature, SafeError> {
    let mut bytes = to_fixed(signature)?;

    match bytes[64] {
        0 | 1 => bytes[64] += 27,
        27 | 28 => {}
        31 | 32 => {
            let recovered = recover_prehash(&eth_message_hash(digest), &bytes, bytes[64] - 31)?;
            return if recovered == signer {
                SafeSignature::decode(signer, SignatureKind::EthSign, bytes.to_vec())
            } else {
                Err(mismatch(signer, recovered))
            };
        }
        v => {
            return Err(SafeError::Signature(format!(
                "unsupported recovery byte {v}"
            )))
        }
    }

    let recovery = bytes[64] - 27;
    let recovered = recover_prehash(digest, &bytes, recovery)?;
    if recovered == signer {
        return SafeSignature::decode(signer, SignatureKind::Ecdsa, bytes.to_vec());
    }

    let recovered_prefixed = recover_prehash(&eth_message_hash(digest), &bytes, recovery)?;
    if recovered_prefixed == signer {
        bytes[64] += ETH_SIGN_V_OFFSET;
        return SafeSignature::decode(signer, SignatureKind::EthSign, bytes.to_vec());
    }

    Err(mismatch(signer, recovered))
}

/// Signs a digest with a raw key and returns the verifier-ready signature.
pub fn sign(digest: &B256, private_key: &[u8; 32]) -> Result<SafeSignature, SafeError> {
    let signer = address_from_private_key(private_key)?;
    let raw = sign_digest(digest, private_key)?;
    adjust_v(digest, &raw, signer)
}

/// Recovers the signer of a 65-byte ECDSA signature over `digest`.
///
/// `v` of 27/28 (or 0/1) recovers against the raw digest. `v` of 31/32
/// recovers against the EIP-191 prefixed digest, matching the contract.
pub fn recover(digest: &B256, signature: &[u8]) -> Result<Address, SafeError> {
    let bytes = to_fixed(signature)?;
    let v = bytes[64];

    if v > 30 {
        let recovery = v - 27 - ETH_SIGN_V_OFFSET;
        return recover_prehash(&eth_message_hash(digest), &bytes, recovery);
    }

    let recovery = if v >= 27 { v - 27 } else { v };
    recover_prehash(digest, &bytes, recovery)
}

/// Builds the pre-validated signature for an owner that is itself the
/// executing caller: 12 zero bytes, the owner, 32 zero bytes, then `0x01`.
pub fn pre_validated_signature(owner: Address) -> SafeSignature {
    let mut data = [0u8; 65];
    data[12..32].copy_from_slice(owner.as_slice());
    data[64] = 1;
    SafeSignature {
        signer: owner,
        data: Bytes::copy_from_slice(&data),
        kind: SignatureKind::PreValidated,
    }
}

/// Wraps an opaque payload that the contract at `contract` verifies on-chain.
pub fn contract_signature(contract: Address, payload: impl Into<Bytes>) -> SafeSignature {
    SafeSignature {
        signer: contract,
        data: payload.into(),
        kind: SignatureKind::Contract,
    }
}

/// Checks that a signature really belongs to its tagged signer.
///
/// Contract signatures are verified on-chain and pass unchecked here.
pub fn verify_owner_signature(digest: &B256, signature: &SafeSignature) -> Result<(), SafeError> {
    match signature.kind() {
        SignatureKind::Ecdsa | SignatureKind::EthSign => {
            let recovered = recover(digest, signature.data())?;
            if recovered == signature.signer() {
                Ok(())
            } else {
                Err(mismatch(signature.signer(), recovered))
            }
        }
        // Layout (owner embedded in r) is enforced at construction.
        SignatureKind::PreValidated | SignatureKind::Contract => Ok(()),
    }
}

fn to_fixed(signature: &[u8]) -> Result<[u8; 65], SafeError> {
    signature.try_into().map_err(|_| {
        SafeError::Signature(format!(
            "signature must be {SIGNATURE_LENGTH} bytes, got {}",
            signature.len()
        ))
    })
}

fn recover_prehash(hash: &B256, signature: &[u8; 65], recovery: u8) -> Result<Address, SafeError> {
    let sig = Signature::from_slice(&signature[..64])
        .map_err(|e| SafeError::Signature(format!("invalid signature: {e}")))?;
    let recid = RecoveryId::from_byte(recovery)
        .ok_or_else(|| SafeError::Signature(format!("invalid recovery id {recovery}")))?;

    // ecrecover accepts high-S; recover through its low-S twin, whose point
    // has the opposite y parity.
    let (sig, recid) = match sig.normalize_s() {
        Some(low) => (low, RecoveryId::new(!recid.is_y_odd(), recid.is_x_reduced())),
        None => (sig, recid),
    };

    let key = VerifyingKey::recover_from_prehash(hash.as_slice(), &sig, recid)
        .map_err(|e| SafeError::Signature(format!("recovery failed: {e}")))?;
    Ok(address_from_verifying_key(&key))
}

fn mismatch(expected: Address, recovered: Address) -> SafeError {
    SafeError::Signature(format!(
        "signature recovers to {recovered}, expected {expected}"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashing::keccak256;

    fn key(n: u8) -> [u8; 32] {
        let mut key = [0u8; 32];
        key[31] = n;
        key
    }

    fn digest() -> B256 {
        keccak256(b"multisig transaction")
    }

    #[test]
    fn sign_produces_27_or_28() {
        let sig = sign(&digest(), &key(1)).unwrap();
        assert_eq!(sig.data().len(), 65);
        assert!(sig.data()[64] == 27 || sig.data()[64] == 28);
        assert_eq!(sig.kind(), SignatureKind::Ecdsa);
        assert_eq!(sig.signer(), address_from_private_key(&key(1)).unwrap());
    }

    #[test]
    fn sign_is_deterministic() {
        let a = sign(&digest(), &key(7)).unwrap();
        let b = sign(&digest(), &key(7)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn recover_after_sign_unprefixed() {
        for n in 1..=5 {
            let sig = sign(&digest(), &key(n)).unwrap();
            let recovered = recover(&digest(), sig.data()).unwrap();
            assert_eq!(recovered, address_from_private_key(&key(n)).unwrap());
        }
    }

    #[test]
    fn eth_sign_backend_gets_v_plus_four() {
        let signer = address_from_private_key(&key(3)).unwrap();
        let raw = sign_digest_eth_message(&digest(), &key(3)).unwrap();
        assert!(raw[64] == 27 || raw[64] == 28);

        let adjusted = adjust_v(&digest(), &raw, signer).unwrap();
        assert_eq!(adjusted.kind(), SignatureKind::EthSign);
        assert_eq!(adjusted.data()[64], raw[64] + 4);
        assert_eq!(&adjusted.data()[..64], &raw[..64]);
    }

    #[test]
    fn recover_after_sign_prefixed() {
        let signer = address_from_private_key(&key(4)).unwrap();
        let raw = sign_digest_eth_message(&digest(), &key(4)).unwrap();
        let adjusted = adjust_v(&digest(), &raw, signer).unwrap();

        assert_eq!(recover(&digest(), adjusted.data()).unwrap(), signer);
        verify_owner_signature(&digest(), &adjusted).unwrap();
    }

    #[test]
    fn adjust_v_lifts_zero_one_recovery_byte() {
        let signer = address_from_private_key(&key(2)).unwrap();
        let mut raw = sign_digest(&digest(), &key(2)).unwrap();
        let expected_v = raw[64];
        raw[64] -= 27;

        let adjusted = adjust_v(&digest(), &raw, signer).unwrap();
        assert_eq!(adjusted.data()[64], expected_v);
        assert_eq!(adjusted.kind(), SignatureKind::Ecdsa);
    }

    #[test]
    fn adjust_v_accepts_already_adjusted_eth_sign() {
        let signer = address_from_private_key(&key(2)).unwrap();
        let raw = sign_digest_eth_message(&digest(), &key(2)).unwrap();
        let once = adjust_v(&digest(), &raw, signer).unwrap();
        let twice = adjust_v(&digest(), once.data(), signer).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn adjust_v_rejects_wrong_signer() {
        let other = address_from_private_key(&key(9)).unwrap();
        let raw = sign_digest(&digest(), &key(1)).unwrap();
        let result = adjust_v(&digest(), &raw, other);
        assert!(matches!(result, Err(SafeError::Signature(_))));
    }

    #[test]
    fn recover_rejects_wrong_length() {
        assert!(matches!(
            recover(&digest(), &[0u8; 64]),
            Err(SafeError::Signature(_))
        ));
        assert!(recover(&digest(), &[0u8; 66]).is_err());
    }

    #[test]
    fn recover_rejects_zero_signature() {
        let mut sig = [0u8; 65];
        sig[64] = 27;
        assert!(recover(&digest(), &sig).is_err());
    }

    #[test]
    fn different_digest_recovers_different_address() {
        let sig = sign(&digest(), &key(1)).unwrap();
        let other = keccak256(b"another transaction");
        let recovered = recover(&other, sig.data()).unwrap_or(Address::ZERO);
        assert_ne!(recovered, sig.signer());
    }

    #[test]
    fn pre_validated_layout() {
        let owner = Address::repeat_byte(0xab);
        let sig = pre_validated_signature(owner);

        assert_eq!(sig.data().len(), 65);
        assert_eq!(&sig.data()[..12], &[0u8; 12]);
        assert_eq!(&sig.data()[12..32], owner.as_slice());
        assert_eq!(&sig.data()[32..64], &[0u8; 32]);
        assert_eq!(sig.data()[64], 0x01);
        assert!(!sig.is_contract_signature());
    }

    #[test]
    fn contract_signature_is_flagged() {
        let sig = contract_signature(Address::repeat_byte(0x01), vec![1u8, 2, 3]);
        assert!(sig.is_contract_signature());
        assert_eq!(&sig.data()[..], &[1u8, 2, 3]);
    }

    #[test]
    fn decode_checks_layout() {
        let owner = Address::repeat_byte(0xab);
        let pre = pre_validated_signature(owner);
        assert_eq!(
            SafeSignature::decode(owner, SignatureKind::PreValidated, pre.data().clone()).unwrap(),
            pre
        );
        assert!(SafeSignature::decode(
            Address::repeat_byte(0xcd),
            SignatureKind::PreValidated,
            pre.data().clone()
        )
        .is_err());

        let ecdsa = sign(&digest(), &key(1)).unwrap();
        assert!(SafeSignature::decode(ecdsa.signer(), SignatureKind::EthSign, ecdsa.data().clone()).is_err());
        assert!(SafeSignature::decode(ecdsa.signer(), SignatureKind::Ecdsa, vec![0u8; 10]).is_err());
    }

    #[test]
    fn verify_owner_signature_catches_relabelled_signer() {
        let ecdsa = sign(&digest(), &key(1)).unwrap();
        let forged =
            SafeSignature::decode(Address::repeat_byte(0x11), SignatureKind::Ecdsa, ecdsa.data().clone())
                .unwrap();
        assert!(verify_owner_signature(&digest(), &forged).is_err());
    }

    /// Mirrors `s` into the upper half of the curve order and flips `v`.
    fn high_s(signature: &[u8]) -> Vec<u8> {
        use alloy_primitives::U256;

        let order = U256::from_str_radix(
            "fffffffffffffffffffffffffffffffebaaedce6af48a03bbfd25e8cd0364141",
            16,
        )
        .unwrap();
        let s = U256::from_be_slice(&signature[32..64]);
        let mut out = signature.to_vec();
        out[32..64].copy_from_slice(&(order - s).to_be_bytes::<32>());
        out[64] = if signature[64] % 2 == 1 { signature[64] + 1 } else { signature[64] - 1 };
        out
    }

    #[test]
    fn high_s_signatures_recover_like_ecrecover() {
        let signer = address_from_private_key(&key(6)).unwrap();
        let low = sign(&digest(), &key(6)).unwrap();
        let high = high_s(low.data());
        assert_ne!(&high[32..64], &low.data()[32..64]);

        assert_eq!(recover(&digest(), &high).unwrap(), signer);

        let adjusted = adjust_v(&digest(), &high, signer).unwrap();
        assert_eq!(adjusted.kind(), SignatureKind::Ecdsa);
        assert_eq!(&adjusted.data()[..], &high[..]);
        verify_owner_signature(&digest(), &adjusted).unwrap();

        let raw = sign_digest_eth_message(&digest(), &key(6)).unwrap();
        let prefixed = adjust_v(&digest(), &high_s(&raw), signer).unwrap();
        assert_eq!(prefixed.kind(), SignatureKind::EthSign);
        assert_eq!(recover(&digest(), prefixed.data()).unwrap(), signer);
    }

    #[test]
    fn random_keys_round_trip() {
        use rand::RngCore;

        let mut rng = rand::thread_rng();
        for _ in 0..8 {
            let mut secret = [0u8; 32];
            rng.fill_bytes(&mut secret);
            let Ok(signer) = address_from_private_key(&secret) else {
                continue;
            };
            let sig = sign(&digest(), &secret).unwrap();
            assert_eq!(recover(&digest(), sig.data()).unwrap(), signer);

            let raw = sign_digest_eth_message(&digest(), &secret).unwrap();
            let adjusted = adjust_v(&digest(), &raw, signer).unwrap();
            assert_eq!(recover(&digest(), adjusted.data()).unwrap(), signer);
        }
    }
}
