//! Wire records exchanged with the signature relay.
//!
//! Every field the relay may omit is an `Option`; numeric fields stay strings
//! until [`TransactionRequest::parse`] validates them.
//!
//! [`TransactionRequest::parse`]: safe_protocol::TransactionRequest::parse

use alloy_primitives::{Address, Bytes, B256};
use safe_protocol::types::RawTransactionRequest;
use safe_protocol::{SafeError, SafeSignature, SignatureKind};
use serde::{Deserialize, Serialize};

/// A transaction as the relay stores it, keyed by its digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingTransaction {
    pub safe: Address,
    pub chain_id: u64,
    pub safe_tx_hash: B256,
    #[serde(flatten)]
    pub transaction: RawTransactionRequest,
    pub confirmations_required: usize,
    #[serde(default)]
    pub confirmations: Vec<RelayConfirmation>,
    pub proposer: Option<Address>,
    pub submission_date: Option<String>,
    pub modified: Option<String>,
    pub execution_date: Option<String>,
    pub transaction_hash: Option<B256>,
    pub executor: Option<Address>,
    #[serde(default)]
    pub is_executed: bool,
    pub is_successful: Option<bool>,
}

/// One owner signature held by the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayConfirmation {
    pub owner: Address,
    pub signature: Bytes,
    pub signature_type: SignatureKind,
    pub submission_date: Option<String>,
}

impl RelayConfirmation {
    pub fn from_signature(signature: &SafeSignature) -> Self {
        Self {
            owner: signature.signer(),
            signature: signature.data().clone(),
            signature_type: signature.kind(),
            submission_date: None,
        }
    }

    /// Checks the stored payload against its declared type.
    pub fn to_signature(&self) -> Result<SafeSignature, SafeError> {
        SafeSignature::decode(self.owner, self.signature_type, self.signature.clone())
    }
}

/// Body of a new-transaction submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Proposal {
    pub safe: Address,
    pub chain_id: u64,
    pub safe_tx_hash: B256,
    #[serde(flatten)]
    pub transaction: RawTransactionRequest,
    pub confirmations_required: usize,
    pub proposer: Option<Address>,
    pub proposer_signature: Option<RelayConfirmation>,
}

impl Proposal {
    /// The record a relay holds right after accepting this proposal.
    pub fn into_pending(self) -> PendingTransaction {
        PendingTransaction {
            safe: self.safe,
            chain_id: self.chain_id,
            safe_tx_hash: self.safe_tx_hash,
            transaction: self.transaction,
            confirmations_required: self.confirmations_required,
            confirmations: self.proposer_signature.into_iter().collect(),
            proposer: self.proposer,
            submission_date: None,
            modified: None,
            execution_date: None,
            transaction_hash: None,
            executor: None,
            is_executed: false,
            is_successful: None,
        }
    }
}
