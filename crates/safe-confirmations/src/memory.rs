//! In-process relay and chain, for tests and local simulation.
//!
//! The chain checks aggregated signatures the way the account contract does,
//! so a blob it accepts is one the contract would accept.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use alloy_primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use safe_protocol::aggregate::check_signatures;
use safe_protocol::hashing::{compute_transaction_hash, keccak256};
use safe_protocol::{AccountState, SafeSignature, TransactionRequest};

use crate::collaborators::{ChainClient, ExecutionReceipt, Relay};
use crate::error::{CollaboratorError, Step};
use crate::relay::{PendingTransaction, Proposal, RelayConfirmation};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Queued one-shot failures keyed by the step they hit.
#[derive(Debug, Default)]
struct Faults(Mutex<HashMap<Step, CollaboratorError>>);

impl Faults {
    fn inject(&self, step: Step, error: CollaboratorError) {
        lock(&self.0).insert(step, error);
    }

    fn take(&self, step: Step) -> Result<(), CollaboratorError> {
        match lock(&self.0).remove(&step) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Default)]
struct RelayInner {
    records: Mutex<HashMap<B256, PendingTransaction>>,
    faults: Faults,
}

/// A relay holding records in a map. Clones share the same store.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRelay {
    inner: Arc<RelayInner>,
}

impl InMemoryRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next call at `step` fail with `error`.
    pub fn fail_next(&self, step: Step, error: CollaboratorError) {
        self.inner.faults.inject(step, error);
    }

    /// Snapshot of a stored record.
    pub fn record(&self, safe_tx_hash: &B256) -> Option<PendingTransaction> {
        lock(&self.inner.records).get(safe_tx_hash).cloned()
    }

    /// Stores a record as is, replacing any existing one.
    pub fn insert(&self, pending: PendingTransaction) {
        lock(&self.inner.records).insert(pending.safe_tx_hash, pending);
    }

    /// Marks a record executed, as an indexer following the chain would.
    pub fn mark_executed(&self, safe_tx_hash: &B256, transaction_hash: B256, executor: Address) {
        if let Some(record) = lock(&self.inner.records).get_mut(safe_tx_hash) {
            record.is_executed = true;
            record.is_successful = Some(true);
            record.transaction_hash = Some(transaction_hash);
            record.executor = Some(executor);
        }
    }
}

#[async_trait]
impl Relay for InMemoryRelay {
    async fn fetch_pending(
        &self,
        safe_tx_hash: B256,
    ) -> Result<Option<PendingTransaction>, CollaboratorError> {
        self.inner.faults.take(Step::FetchStatus)?;
        Ok(self.record(&safe_tx_hash))
    }

    async fn propose(&self, proposal: &Proposal) -> Result<(), CollaboratorError> {
        self.inner.faults.take(Step::Propose)?;
        let mut records = lock(&self.inner.records);

        match records.get_mut(&proposal.safe_tx_hash) {
            Some(existing) => {
                if let Some(confirmation) = &proposal.proposer_signature {
                    if !existing.confirmations.iter().any(|c| c.owner == confirmation.owner) {
                        existing.confirmations.push(confirmation.clone());
                    }
                }
            }
            None => {
                records.insert(proposal.safe_tx_hash, proposal.clone().into_pending());
            }
        }
        Ok(())
    }

    async fn publish_signature(
        &self,
        safe_tx_hash: B256,
        signature: &SafeSignature,
    ) -> Result<(), CollaboratorError> {
        self.inner.faults.take(Step::PublishSignature)?;
        let mut records = lock(&self.inner.records);

        let record = records.get_mut(&safe_tx_hash).ok_or_else(|| {
            CollaboratorError::Rejected(format!("unknown transaction {safe_tx_hash}"))
        })?;
        if record.is_executed {
            return Err(CollaboratorError::Rejected("transaction already executed".into()));
        }

        let confirmation = RelayConfirmation::from_signature(signature);
        match record.confirmations.iter().find(|c| c.owner == confirmation.owner) {
            Some(existing) if existing.signature == confirmation.signature => Ok(()),
            Some(_) => Err(CollaboratorError::Rejected(format!(
                "{} already confirmed",
                confirmation.owner
            ))),
            None => {
                record.confirmations.push(confirmation);
                Ok(())
            }
        }
    }
}

#[derive(Debug, Default)]
struct ChainInner {
    accounts: Mutex<HashMap<Address, AccountState>>,
    submissions: Mutex<Vec<B256>>,
    faults: Faults,
}

/// A chain holding account states in a map. Clones share the same state.
#[derive(Debug, Clone)]
pub struct InMemoryChain {
    chain_id: u64,
    inner: Arc<ChainInner>,
    indexer: Option<InMemoryRelay>,
}

impl InMemoryChain {
    pub fn new(chain_id: u64) -> Self {
        Self {
            chain_id,
            inner: Arc::default(),
            indexer: None,
        }
    }

    /// Reports successful executions to `relay`.
    pub fn with_indexer(mut self, relay: InMemoryRelay) -> Self {
        self.indexer = Some(relay);
        self
    }

    pub fn set_account(&self, account: Address, state: AccountState) {
        lock(&self.inner.accounts).insert(account, state);
    }

    /// Consumes the account's current nonce without executing anything, as a
    /// competing submission would.
    pub fn advance_nonce(&self, account: &Address) {
        let mut accounts = lock(&self.inner.accounts);
        if let Some(state) = accounts.get_mut(account) {
            *state = bumped(state);
        }
    }

    pub fn fail_next(&self, step: Step, error: CollaboratorError) {
        self.inner.faults.inject(step, error);
    }

    /// Chain transaction hashes of every successful execution, in order.
    pub fn submissions(&self) -> Vec<B256> {
        lock(&self.inner.submissions).clone()
    }
}

fn bumped(state: &AccountState) -> AccountState {
    AccountState::new(
        state.owners().iter().copied(),
        state.threshold(),
        state.nonce() + U256::from(1u8),
    )
    .unwrap_or_else(|_| state.clone())
}

#[async_trait]
impl ChainClient for InMemoryChain {
    async fn account_state(&self, account: Address) -> Result<AccountState, CollaboratorError> {
        self.inner.faults.take(Step::ReadAccount)?;
        lock(&self.inner.accounts)
            .get(&account)
            .cloned()
            .ok_or_else(|| CollaboratorError::Rejected(format!("no account at {account}")))
    }

    async fn execute(
        &self,
        account: Address,
        request: &TransactionRequest,
        signatures: Bytes,
    ) -> Result<ExecutionReceipt, CollaboratorError> {
        self.inner.faults.take(Step::Execute)?;

        let (safe_tx_hash, transaction_hash) = {
            let mut accounts = lock(&self.inner.accounts);
            let state = accounts
                .get_mut(&account)
                .ok_or_else(|| CollaboratorError::Rejected(format!("no account at {account}")))?;

            // The contract hashes with its own nonce.
            let on_chain = request.with_nonce(state.nonce());
            let safe_tx_hash = compute_transaction_hash(account, self.chain_id, &on_chain);
            if let Err(e) =
                check_signatures(&safe_tx_hash, &signatures, state.owners(), state.threshold())
            {
                return Ok(ExecutionReceipt::Reverted {
                    reason: format!("GS026: {e}"),
                });
            }

            let calldata = on_chain.exec_transaction_calldata(&signatures);
            let mut preimage = calldata.to_vec();
            preimage.extend_from_slice(&state.nonce().to_be_bytes::<32>());
            *state = bumped(state);
            (safe_tx_hash, keccak256(preimage))
        };

        lock(&self.inner.submissions).push(transaction_hash);
        if let Some(relay) = &self.indexer {
            relay.mark_executed(&safe_tx_hash, transaction_hash, account);
        }

        Ok(ExecutionReceipt::Executed { transaction_hash })
    }
}
