//! Minimal ABI encoding for the calls the multisig protocol itself makes.
//!
//! This covers the account's `setup(...)` initializer and `execTransaction(...)`
//! call data: static words, dynamic `bytes` and `address[]`. It is not a
//! general ABI encoder.

use alloy_primitives::{Address, U256};
use sha3::{Digest, Keccak256};

use crate::error::SafeError;

/// A single ABI-encoded parameter.
#[derive(Debug, Clone)]
pub enum AbiParam {
    /// A 20-byte address, left-padded to 32 bytes.
    Address(Address),
    /// A 256-bit unsigned integer as a big-endian 32-byte word.
    Uint256(U256),
    /// Dynamic `bytes`: length word followed by right-padded data in the tail.
    Bytes(Vec<u8>),
    /// Dynamic `address[]`: length word followed by one word per element.
    AddressArray(Vec<Address>),
}

impl AbiParam {
    fn is_dynamic(&self) -> bool {
        matches!(self, AbiParam::Bytes(_) | AbiParam::AddressArray(_))
    }
}

/// Computes the 4-byte selector of a canonical function signature such as
/// `transfer(address,uint256)`.
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = Keccak256::digest(signature.as_bytes());
    let mut out = [0u8; 4];
    out.copy_from_slice(&hash[..4]);
    out
}

/// Encodes a function call as `selector || encode(params)`.
pub fn encode_function_call(selector: [u8; 4], params: &[AbiParam]) -> Vec<u8> {
    let encoded = encode_params(params);
    let mut data = Vec::with_capacity(4 + encoded.len());
    data.extend_from_slice(&selector);
    data.extend_from_slice(&encoded);
    data
}

/// Encodes a parameter tuple using head/tail layout.
///
/// Static parameters are written in place. Each dynamic parameter writes the
/// byte offset of its tail entry (relative to the start of the tuple) into the
/// head.
pub fn encode_params(params: &[AbiParam]) -> Vec<u8> {
    let head_len = params.len() * 32;
    let mut head = Vec::with_capacity(head_len);
    let mut tail = Vec::new();

    for param in params {
        if param.is_dynamic() {
            head.extend_from_slice(&uint_word(U256::from(head_len + tail.len())));
            encode_tail(param, &mut tail);
        } else {
            head.extend_from_slice(&encode_word(param));
        }
    }

    head.extend_from_slice(&tail);
    head
}

/// Left-pads an address to a 32-byte ABI word.
pub fn address_word(address: &Address) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(address.as_slice());
    word
}

/// Encodes an integer as a 32-byte big-endian ABI word.
pub fn uint_word(value: U256) -> [u8; 32] {
    value.to_be_bytes::<32>()
}

fn encode_word(param: &AbiParam) -> [u8; 32] {
    match param {
        AbiParam::Address(addr) => address_word(addr),
        AbiParam::Uint256(value) => uint_word(*value),
        // Dynamic parameters never reach the head as a value word.
        AbiParam::Bytes(_) | AbiParam::AddressArray(_) => [0u8; 32],
    }
}

fn encode_tail(param: &AbiParam, tail: &mut Vec<u8>) {
    match param {
        AbiParam::Bytes(bytes) => {
            tail.extend_from_slice(&uint_word(U256::from(bytes.len())));
            tail.extend_from_slice(bytes);
            let padding = (32 - bytes.len() % 32) % 32;
            tail.extend(std::iter::repeat(0u8).take(padding));
        }
        AbiParam::AddressArray(addresses) => {
            tail.extend_from_slice(&uint_word(U256::from(addresses.len())));
            for addr in addresses {
                tail.extend_from_slice(&address_word(addr));
            }
        }
        AbiParam::Address(_) | AbiParam::Uint256(_) => {}
    }
}

/// Parses a non-negative 256-bit integer from decimal or `0x`-prefixed hex.
pub fn parse_uint256(value: &str) -> Result<U256, SafeError> {
    let trimmed = value.trim();
    let (digits, radix) = match trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        Some(hex_digits) => (hex_digits, 16),
        None => (trimmed, 10),
    };

    if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix as u32)) {
        return Err(SafeError::Validation(format!(
            "invalid unsigned integer: {value:?}"
        )));
    }

    U256::from_str_radix(digits, radix)
        .map_err(|e| SafeError::Validation(format!("integer does not fit in 256 bits: {e}")))
}

/// Parses `0x`-prefixed hex into raw bytes. `"0x"` is the empty byte string.
pub fn parse_hex_bytes(value: &str) -> Result<Vec<u8>, SafeError> {
    let digits = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .ok_or_else(|| SafeError::Validation("hex value must start with 0x".into()))?;

    hex::decode(digits).map_err(|e| SafeError::Validation(format!("invalid hex: {e}")))
}
