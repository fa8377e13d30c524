//! Interfaces to the relay, the chain and key management.

use alloy_primitives::{Address, Bytes, B256};
use async_trait::async_trait;
use safe_protocol::address::address_from_private_key;
use safe_protocol::signature::{sign_digest, sign_digest_eth_message};
use safe_protocol::{AccountState, SafeError, SafeSignature, TransactionRequest};
use zeroize::Zeroizing;

use crate::error::CollaboratorError;
use crate::relay::{PendingTransaction, Proposal};

/// Shared store of proposed transactions and owner signatures.
#[async_trait]
pub trait Relay: Send + Sync {
    /// Returns `None` when the relay has never seen `safe_tx_hash`.
    async fn fetch_pending(
        &self,
        safe_tx_hash: B256,
    ) -> Result<Option<PendingTransaction>, CollaboratorError>;

    async fn propose(&self, proposal: &Proposal) -> Result<(), CollaboratorError>;

    async fn publish_signature(
        &self,
        safe_tx_hash: B256,
        signature: &SafeSignature,
    ) -> Result<(), CollaboratorError>;
}

/// Outcome of submitting `execTransaction`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionReceipt {
    Executed { transaction_hash: B256 },
    Reverted { reason: String },
}

/// Reads account state from and submits executions to the chain.
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn account_state(&self, account: Address) -> Result<AccountState, CollaboratorError>;

    /// Submits the request with the aggregated signature blob. Gas and the
    /// submitter's own nonce are the client's concern.
    async fn execute(
        &self,
        account: Address,
        request: &TransactionRequest,
        signatures: Bytes,
    ) -> Result<ExecutionReceipt, CollaboratorError>;
}

/// Produces raw 65-byte signatures for one owner.
///
/// The output may follow either the raw-digest or the `eth_sign` convention;
/// the tracker normalizes it.
#[async_trait]
pub trait KeySigner: Send + Sync {
    fn address(&self) -> Address;

    async fn sign_digest(&self, digest: B256) -> Result<[u8; 65], CollaboratorError>;
}

/// Which hash a [`LocalKeySigner`] signs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SigningMode {
    #[default]
    RawDigest,
    /// EIP-191 prefixed, as wallets implementing `eth_sign` do.
    EthMessage,
}

/// In-process signer over a raw secp256k1 key.
pub struct LocalKeySigner {
    key: Zeroizing<[u8; 32]>,
    address: Address,
    mode: SigningMode,
}

impl LocalKeySigner {
    pub fn new(private_key: [u8; 32], mode: SigningMode) -> Result<Self, SafeError> {
        let key = Zeroizing::new(private_key);
        let address = address_from_private_key(&key)?;
        Ok(Self { key, address, mode })
    }

    pub fn mode(&self) -> SigningMode {
        self.mode
    }
}

impl std::fmt::Debug for LocalKeySigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalKeySigner")
            .field("address", &self.address)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl KeySigner for LocalKeySigner {
    fn address(&self) -> Address {
        self.address
    }

    async fn sign_digest(&self, digest: B256) -> Result<[u8; 65], CollaboratorError> {
        let signed = match self.mode {
            SigningMode::RawDigest => sign_digest(&digest, &self.key),
            SigningMode::EthMessage => sign_digest_eth_message(&digest, &self.key),
        };
        signed.map_err(|e| CollaboratorError::Rejected(e.to_string()))
    }
}
