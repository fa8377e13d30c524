//! Signature collection for one proposed transaction.

use std::collections::BTreeMap;

use alloy_primitives::{Address, Bytes, B256};
use safe_protocol::aggregate::aggregate_signatures;
use safe_protocol::hashing::compute_transaction_hash;
use safe_protocol::signature::verify_owner_signature;
use safe_protocol::{AccountState, SafeError, SafeSignature, TransactionRequest};
use serde::Serialize;

use crate::relay::PendingTransaction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No signatures yet.
    Proposed,
    Collecting,
    ThresholdMet,
    Executed,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Executed | SessionState::Failed)
    }
}

/// Result of offering a signature to a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Added,
    AlreadySigned,
}

/// How an execution attempt ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionResult {
    Executed { transaction_hash: B256 },
    /// Another submitter consumed the nonce first.
    AlreadyExecuted { transaction_hash: Option<B256> },
    Failed { reason: String },
}

impl ExecutionResult {
    /// The state a session ends in after this result.
    pub fn final_state(&self) -> SessionState {
        match self {
            ExecutionResult::Executed { .. } | ExecutionResult::AlreadyExecuted { .. } => {
                SessionState::Executed
            }
            ExecutionResult::Failed { .. } => SessionState::Failed,
        }
    }
}

/// Signatures gathered so far for one digest.
#[derive(Debug, Clone)]
pub struct ConfirmationSession {
    account: Address,
    chain_id: u64,
    safe_tx_hash: B256,
    request: TransactionRequest,
    threshold: usize,
    signatures: BTreeMap<Address, SafeSignature>,
    state: SessionState,
    execution: Option<ExecutionResult>,
}

impl ConfirmationSession {
    pub fn new(
        account: Address,
        chain_id: u64,
        request: TransactionRequest,
        threshold: usize,
    ) -> Result<Self, SafeError> {
        if threshold == 0 {
            return Err(SafeError::Validation("threshold must be at least 1".into()));
        }
        let safe_tx_hash = compute_transaction_hash(account, chain_id, &request);
        Ok(Self {
            account,
            chain_id,
            safe_tx_hash,
            request,
            threshold,
            signatures: BTreeMap::new(),
            state: SessionState::Proposed,
            execution: None,
        })
    }

    /// Rebuilds a session from the relay's record.
    ///
    /// The record must hash to its own key. Threshold and owners come from
    /// `account`, not from the relay. Confirmations from non-owners or that
    /// fail verification are skipped.
    pub fn from_pending(
        pending: &PendingTransaction,
        account: &AccountState,
    ) -> Result<Self, SafeError> {
        let request = TransactionRequest::parse(&pending.transaction)?;
        let mut session = Self::new(pending.safe, pending.chain_id, request, account.threshold())?;

        if session.safe_tx_hash != pending.safe_tx_hash {
            return Err(SafeError::Validation(format!(
                "relay record {} hashes to {}",
                pending.safe_tx_hash, session.safe_tx_hash
            )));
        }

        for confirmation in &pending.confirmations {
            if !account.is_owner(&confirmation.owner) {
                tracing::warn!(
                    "skipping confirmation from non-owner {} on {}",
                    confirmation.owner,
                    pending.safe_tx_hash
                );
                continue;
            }
            let verified = confirmation.to_signature().and_then(|signature| {
                verify_owner_signature(&session.safe_tx_hash, &signature)?;
                Ok(signature)
            });
            match verified {
                Ok(signature) => {
                    session.signatures.entry(signature.signer()).or_insert(signature);
                }
                Err(e) => tracing::warn!(
                    "skipping invalid confirmation from {}: {}",
                    confirmation.owner,
                    e
                ),
            }
        }
        session.refresh_state();

        if pending.is_executed {
            let execution = if pending.is_successful == Some(false) {
                ExecutionResult::Failed {
                    reason: "execution failed on-chain".into(),
                }
            } else {
                ExecutionResult::AlreadyExecuted {
                    transaction_hash: pending.transaction_hash,
                }
            };
            session.record_execution(execution);
        }

        Ok(session)
    }

    /// Classifies a signature without recording it.
    pub fn check_signature(&self, signature: &SafeSignature) -> Result<AddOutcome, SafeError> {
        if self.state.is_terminal() {
            return Err(SafeError::State(format!(
                "transaction {} already executed",
                self.safe_tx_hash
            )));
        }
        match self.signatures.get(&signature.signer()) {
            Some(existing) if existing == signature => Ok(AddOutcome::AlreadySigned),
            Some(_) => Err(SafeError::State(format!(
                "{} already signed with a different signature",
                signature.signer()
            ))),
            None => Ok(AddOutcome::Added),
        }
    }

    /// Records a signature. Callers are expected to have verified it.
    pub fn add_signature(&mut self, signature: SafeSignature) -> Result<AddOutcome, SafeError> {
        let outcome = self.check_signature(&signature)?;
        if outcome == AddOutcome::Added {
            self.signatures.insert(signature.signer(), signature);
            self.refresh_state();
        }
        Ok(outcome)
    }

    /// Moves the session to its terminal state.
    pub fn record_execution(&mut self, result: ExecutionResult) {
        self.state = result.final_state();
        self.execution = Some(result);
    }

    /// Signature blob for `execTransaction`, signers ascending.
    pub fn aggregated_signatures(&self) -> Result<Bytes, SafeError> {
        aggregate_signatures(self.signatures.values().cloned())
    }

    fn refresh_state(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        self.state = match self.signatures.len() {
            0 => SessionState::Proposed,
            n if n < self.threshold => SessionState::Collecting,
            _ => SessionState::ThresholdMet,
        };
    }

    pub fn account(&self) -> Address {
        self.account
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn safe_tx_hash(&self) -> B256 {
        self.safe_tx_hash
    }

    pub fn request(&self) -> &TransactionRequest {
        &self.request
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn execution(&self) -> Option<&ExecutionResult> {
        self.execution.as_ref()
    }

    pub fn signature_count(&self) -> usize {
        self.signatures.len()
    }

    pub fn has_signed(&self, owner: &Address) -> bool {
        self.signatures.contains_key(owner)
    }

    pub fn signers(&self) -> impl Iterator<Item = &Address> {
        self.signatures.keys()
    }
}
