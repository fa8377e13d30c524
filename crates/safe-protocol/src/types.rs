use std::collections::BTreeSet;

use alloy_primitives::{Address, Bytes, U256};
use serde::{Deserialize, Serialize};

use crate::abi::{self, AbiParam};
use crate::address::{parse_address, to_checksum};
use crate::error::SafeError;

/// Canonical signature of the account's execution entry point.
pub const EXEC_TRANSACTION_SIGNATURE: &str =
    "execTransaction(address,uint256,bytes,uint8,uint256,uint256,uint256,address,address,bytes)";

/// How the account invokes the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Operation {
    Call,
    /// Runs the target's code in the account's own storage context.
    DelegateCall,
}

impl Operation {
    pub fn as_u8(self) -> u8 {
        match self {
            Operation::Call => 0,
            Operation::DelegateCall => 1,
        }
    }
}

impl TryFrom<u8> for Operation {
    type Error = SafeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Operation::Call),
            1 => Ok(Operation::DelegateCall),
            other => Err(SafeError::Validation(format!("unknown operation: {other}"))),
        }
    }
}

impl From<Operation> for u8 {
    fn from(op: Operation) -> u8 {
        op.as_u8()
    }
}

/// A multisig transaction awaiting owner approval.
///
/// Fields are read-only once built. Changing any field means building a new
/// request, which yields a new digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRequest {
    to: Address,
    value: U256,
    data: Bytes,
    operation: Operation,
    safe_tx_gas: U256,
    base_gas: U256,
    gas_price: U256,
    gas_token: Address,
    refund_receiver: Address,
    nonce: U256,
}

impl TransactionRequest {
    /// Builds a request with no gas refund (all gas fields zero).
    pub fn new(
        to: Address,
        value: U256,
        data: impl Into<Bytes>,
        operation: Operation,
        nonce: U256,
    ) -> Self {
        Self {
            to,
            value,
            data: data.into(),
            operation,
            safe_tx_gas: U256::ZERO,
            base_gas: U256::ZERO,
            gas_price: U256::ZERO,
            gas_token: Address::ZERO,
            refund_receiver: Address::ZERO,
            nonce,
        }
    }

    /// Returns a copy with the given refund parameters.
    pub fn with_gas(
        &self,
        safe_tx_gas: U256,
        base_gas: U256,
        gas_price: U256,
        gas_token: Address,
        refund_receiver: Address,
    ) -> Self {
        Self {
            safe_tx_gas,
            base_gas,
            gas_price,
            gas_token,
            refund_receiver,
            ..self.clone()
        }
    }

    /// Returns a copy with a different nonce.
    pub fn with_nonce(&self, nonce: U256) -> Self {
        Self {
            nonce,
            ..self.clone()
        }
    }

    /// Validates untyped input field by field.
    pub fn parse(raw: &RawTransactionRequest) -> Result<Self, SafeError> {
        Ok(Self {
            to: parse_address(&raw.to)?,
            value: abi::parse_uint256(&raw.value)?,
            data: abi::parse_hex_bytes(&raw.data)?.into(),
            operation: Operation::try_from(raw.operation)?,
            safe_tx_gas: abi::parse_uint256(&raw.safe_tx_gas)?,
            base_gas: abi::parse_uint256(&raw.base_gas)?,
            gas_price: abi::parse_uint256(&raw.gas_price)?,
            gas_token: parse_address(&raw.gas_token)?,
            refund_receiver: parse_address(&raw.refund_receiver)?,
            nonce: abi::parse_uint256(&raw.nonce)?,
        })
    }

    pub fn to(&self) -> Address {
        self.to
    }

    pub fn value(&self) -> U256 {
        self.value
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn safe_tx_gas(&self) -> U256 {
        self.safe_tx_gas
    }

    pub fn base_gas(&self) -> U256 {
        self.base_gas
    }

    pub fn gas_price(&self) -> U256 {
        self.gas_price
    }

    pub fn gas_token(&self) -> Address {
        self.gas_token
    }

    pub fn refund_receiver(&self) -> Address {
        self.refund_receiver
    }

    pub fn nonce(&self) -> U256 {
        self.nonce
    }

    /// Encodes the `execTransaction` call that submits this request together
    /// with an aggregated signature blob.
    pub fn exec_transaction_calldata(&self, signatures: &[u8]) -> Bytes {
        let params = [
            AbiParam::Address(self.to),
            AbiParam::Uint256(self.value),
            AbiParam::Bytes(self.data.to_vec()),
            AbiParam::Uint256(U256::from(self.operation.as_u8())),
            AbiParam::Uint256(self.safe_tx_gas),
            AbiParam::Uint256(self.base_gas),
            AbiParam::Uint256(self.gas_price),
            AbiParam::Address(self.gas_token),
            AbiParam::Address(self.refund_receiver),
            AbiParam::Bytes(signatures.to_vec()),
        ];
        abi::encode_function_call(abi::selector(EXEC_TRANSACTION_SIGNATURE), &params).into()
    }
}

/// Untyped transaction fields as they arrive from callers or a relay.
///
/// Numbers are decimal or `0x` hex strings, addresses are `0x` hex, `data` is
/// `0x` hex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTransactionRequest {
    pub to: String,
    pub value: String,
    pub data: String,
    pub operation: u8,
    pub safe_tx_gas: String,
    pub base_gas: String,
    pub gas_price: String,
    pub gas_token: String,
    pub refund_receiver: String,
    pub nonce: String,
}

impl Default for RawTransactionRequest {
    fn default() -> Self {
        let zero_address = format!("0x{}", "0".repeat(40));
        Self {
            to: zero_address.clone(),
            value: "0".into(),
            data: "0x".into(),
            operation: 0,
            safe_tx_gas: "0".into(),
            base_gas: "0".into(),
            gas_price: "0".into(),
            gas_token: zero_address.clone(),
            refund_receiver: zero_address,
            nonce: "0".into(),
        }
    }
}

impl From<&TransactionRequest> for RawTransactionRequest {
    fn from(request: &TransactionRequest) -> Self {
        Self {
            to: to_checksum(&request.to),
            value: request.value.to_string(),
            data: format!("0x{}", hex::encode(&request.data)),
            operation: request.operation.as_u8(),
            safe_tx_gas: request.safe_tx_gas.to_string(),
            base_gas: request.base_gas.to_string(),
            gas_price: request.gas_price.to_string(),
            gas_token: to_checksum(&request.gas_token),
            refund_receiver: to_checksum(&request.refund_receiver),
            nonce: request.nonce.to_string(),
        }
    }
}

/// On-chain configuration of a multisig account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountState {
    owners: BTreeSet<Address>,
    threshold: usize,
    nonce: U256,
}

impl AccountState {
    /// Builds an account state, rejecting a threshold outside `1..=owners`.
    pub fn new(
        owners: impl IntoIterator<Item = Address>,
        threshold: usize,
        nonce: U256,
    ) -> Result<Self, SafeError> {
        let owners: BTreeSet<Address> = owners.into_iter().collect();
        if threshold == 0 || threshold > owners.len() {
            return Err(SafeError::Validation(format!(
                "threshold {threshold} out of range for {} owners",
                owners.len()
            )));
        }
        Ok(Self {
            owners,
            threshold,
            nonce,
        })
    }

    pub fn owners(&self) -> &BTreeSet<Address> {
        &self.owners
    }

    pub fn is_owner(&self, address: &Address) -> bool {
        self.owners.contains(address)
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn nonce(&self) -> U256 {
        self.nonce
    }
}
