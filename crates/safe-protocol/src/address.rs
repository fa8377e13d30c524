use alloy_primitives::Address;
use k256::ecdsa::{SigningKey, VerifyingKey};
use sha3::{Digest, Keccak256};
use zeroize::Zeroize;

use crate::error::SafeError;

/// Derives the Ethereum address controlled by a secp256k1 verifying key.
///
/// The derivation takes the Keccak-256 hash of the 64-byte public key (without
/// the 0x04 prefix) and uses the last 20 bytes as the address.
pub fn address_from_verifying_key(key: &VerifyingKey) -> Address {
    let uncompressed = key.to_encoded_point(false);
    let hash = Keccak256::digest(&uncompressed.as_bytes()[1..]);
    Address::from_slice(&hash[12..])
}

/// Derives the Ethereum address of a raw 32-byte secp256k1 private key.
///
/// The key is copied into a local buffer that is zeroized before returning.
pub fn address_from_private_key(private_key: &[u8; 32]) -> Result<Address, SafeError> {
    let mut key_bytes = *private_key;
    let signing_key = SigningKey::from_bytes((&key_bytes).into())
        .map_err(|e| SafeError::Validation(format!("invalid private key: {e}")));
    key_bytes.zeroize();

    Ok(address_from_verifying_key(signing_key?.verifying_key()))
}

/// Parses a `0x`-prefixed 40-hex-character address.
///
/// All-lowercase and all-uppercase input is accepted as is. Mixed case must
/// carry a valid EIP-55 checksum.
pub fn parse_address(address: &str) -> Result<Address, SafeError> {
    let hex_part = strip_hex_prefix(address)?;

    if hex_part.len() != 40 {
        return Err(SafeError::Validation(format!(
            "expected 40 hex characters, got {}",
            hex_part.len()
        )));
    }

    if !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(SafeError::Validation(
            "address contains non-hex characters".into(),
        ));
    }

    let is_all_lower = hex_part.chars().all(|c| !c.is_ascii_uppercase());
    let is_all_upper = hex_part.chars().all(|c| !c.is_ascii_lowercase());

    if !is_all_lower && !is_all_upper {
        let checksummed = checksum_address(&format!("0x{}", hex_part.to_lowercase()))?;
        if checksummed[2..] != *hex_part {
            return Err(SafeError::Validation(format!(
                "invalid EIP-55 checksum for {address}"
            )));
        }
    }

    let bytes = hex::decode(hex_part)
        .map_err(|e| SafeError::Validation(format!("invalid hex: {e}")))?;
    Ok(Address::from_slice(&bytes))
}

/// Applies EIP-55 mixed-case checksum encoding to an Ethereum address string.
pub fn checksum_address(address: &str) -> Result<String, SafeError> {
    let hex_part = strip_hex_prefix(address)?.to_lowercase();

    if hex_part.len() != 40 {
        return Err(SafeError::Validation(format!(
            "expected 40 hex characters, got {}",
            hex_part.len()
        )));
    }

    if !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(SafeError::Validation(
            "address contains non-hex characters".into(),
        ));
    }

    Ok(apply_checksum(&hex_part))
}

/// Formats an address with its EIP-55 checksum.
pub fn to_checksum(address: &Address) -> String {
    apply_checksum(&hex::encode(address.as_slice()))
}

/// EIP-55: uppercase each letter whose nibble in keccak(lowercase hex) is >= 8.
fn apply_checksum(lower_hex: &str) -> String {
    let hash = Keccak256::digest(lower_hex.as_bytes());

    let mut checksummed = String::with_capacity(42);
    checksummed.push_str("0x");

    for (i, c) in lower_hex.chars().enumerate() {
        let byte = hash[i / 2];
        let nibble = if i % 2 == 0 { byte >> 4 } else { byte & 0x0f };
        if c.is_ascii_alphabetic() && nibble >= 8 {
            checksummed.push(c.to_ascii_uppercase());
        } else {
            checksummed.push(c);
        }
    }

    checksummed
}

fn strip_hex_prefix(value: &str) -> Result<&str, SafeError> {
    value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .ok_or_else(|| SafeError::Validation("hex value must start with 0x".into()))
}
