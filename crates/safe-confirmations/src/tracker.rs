//! Coordinates signature collection and execution through the relay and the
//! chain.
//!
//! The tracker keeps no session cache. Every call rehydrates the session from
//! the relay and the account state from the chain before acting, so several
//! owners can run their own trackers against the same relay.

use alloy_primitives::{Address, B256};
use safe_protocol::signature::{adjust_v, verify_owner_signature};
use safe_protocol::types::RawTransactionRequest;
use safe_protocol::{AccountState, SafeSignature, TransactionRequest};
use serde::Serialize;

use crate::collaborators::{ChainClient, ExecutionReceipt, KeySigner, Relay};
use crate::config::TrackerConfig;
use crate::error::{Step, TrackerError};
use crate::relay::{Proposal, RelayConfirmation};
use crate::session::{AddOutcome, ConfirmationSession, ExecutionResult, SessionState};

/// What a `confirm` call did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfirmationOutcome {
    pub already_signed: bool,
    pub signature_submitted: bool,
    pub current_signatures: usize,
    pub required_signatures: usize,
    pub threshold_met: bool,
    pub executed: bool,
    pub execution_result: Option<ExecutionResult>,
}

pub struct ConfirmationTracker<R, C> {
    relay: R,
    chain: C,
    config: TrackerConfig,
}

impl<R: Relay, C: ChainClient> ConfirmationTracker<R, C> {
    pub fn new(relay: R, chain: C, config: TrackerConfig) -> Self {
        Self {
            relay,
            chain,
            config,
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Publishes a new transaction for `account` and returns its session.
    ///
    /// The request nonce may be queued ahead of the account nonce but never
    /// behind it. A proposer signature, if given, is checked and published
    /// with the proposal.
    pub async fn propose(
        &self,
        account: Address,
        request: TransactionRequest,
        proposer_signature: Option<SafeSignature>,
    ) -> Result<ConfirmationSession, TrackerError> {
        let state = self.account_state(account).await?;
        if request.nonce() < state.nonce() {
            return Err(TrackerError::Validation(format!(
                "nonce {} already used; account is at {}",
                request.nonce(),
                state.nonce()
            )));
        }

        let mut session =
            ConfirmationSession::new(account, self.config.chain_id, request, state.threshold())?;
        if let Some(signature) = &proposer_signature {
            check_owner_signature(&session, &state, signature)?;
        }

        let proposal = Proposal {
            safe: account,
            chain_id: self.config.chain_id,
            safe_tx_hash: session.safe_tx_hash(),
            transaction: RawTransactionRequest::from(session.request()),
            confirmations_required: state.threshold(),
            proposer: proposer_signature.as_ref().map(|s| s.signer()),
            proposer_signature: proposer_signature.as_ref().map(RelayConfirmation::from_signature),
        };
        self.relay
            .propose(&proposal)
            .await
            .map_err(TrackerError::at(Step::Propose))?;

        if let Some(signature) = proposer_signature {
            session.add_signature(signature)?;
        }

        tracing::info!(
            "proposed {} for {} (nonce {}, {} of {} signatures)",
            session.safe_tx_hash(),
            account,
            session.request().nonce(),
            session.signature_count(),
            session.threshold()
        );
        Ok(session)
    }

    /// Current view of a proposed transaction.
    pub async fn session(&self, safe_tx_hash: B256) -> Result<ConfirmationSession, TrackerError> {
        Ok(self.load(safe_tx_hash).await?.0)
    }

    /// Records `signer`'s signature and, with `auto_execute`, executes as
    /// soon as the threshold is met.
    ///
    /// Resubmitting an identical signature is a no-op reported through
    /// `already_signed`. The signature is published before the session
    /// counts it. A transaction queued behind the account nonce is left
    /// unexecuted even when the threshold is met.
    pub async fn confirm(
        &self,
        safe_tx_hash: B256,
        signer: Address,
        signature: SafeSignature,
        auto_execute: bool,
    ) -> Result<ConfirmationOutcome, TrackerError> {
        if signature.signer() != signer {
            return Err(TrackerError::Signature(format!(
                "signature is tagged for {}, expected {}",
                signature.signer(),
                signer
            )));
        }

        let (mut session, state) = self.load(safe_tx_hash).await?;
        check_owner_signature(&session, &state, &signature)?;

        let already_signed = match session.check_signature(&signature)? {
            AddOutcome::AlreadySigned => {
                tracing::debug!("{} already signed {}", signer, safe_tx_hash);
                true
            }
            AddOutcome::Added => {
                self.relay
                    .publish_signature(safe_tx_hash, &signature)
                    .await
                    .map_err(TrackerError::at(Step::PublishSignature))?;
                session.add_signature(signature)?;
                tracing::info!(
                    "recorded signature from {} on {} ({} of {})",
                    signer,
                    safe_tx_hash,
                    session.signature_count(),
                    session.threshold()
                );
                false
            }
        };

        let threshold_met = session.state() == SessionState::ThresholdMet;
        if threshold_met {
            tracing::info!("threshold reached for {}", safe_tx_hash);
        }

        let queued = state.nonce() < session.request().nonce();
        if threshold_met && auto_execute && queued {
            tracing::info!(
                "{} is queued at nonce {} behind account nonce {}; not executing yet",
                safe_tx_hash,
                session.request().nonce(),
                state.nonce()
            );
        }

        let execution_result = if threshold_met && auto_execute && !queued {
            Some(self.execute_session(&mut session, &state).await?)
        } else {
            None
        };

        Ok(ConfirmationOutcome {
            already_signed,
            signature_submitted: !already_signed,
            current_signatures: session.signature_count(),
            required_signatures: session.threshold(),
            threshold_met: session.signature_count() >= session.threshold(),
            executed: matches!(
                execution_result,
                Some(ExecutionResult::Executed { .. } | ExecutionResult::AlreadyExecuted { .. })
            ),
            execution_result,
        })
    }

    /// [`confirm`](Self::confirm) with the configured `auto_execute`.
    pub async fn confirm_with_defaults(
        &self,
        safe_tx_hash: B256,
        signer: Address,
        signature: SafeSignature,
    ) -> Result<ConfirmationOutcome, TrackerError> {
        self.confirm(safe_tx_hash, signer, signature, self.config.auto_execute)
            .await
    }

    /// Asks `signer` for a signature, normalizes it and confirms with it.
    pub async fn sign_and_confirm<K: KeySigner + ?Sized>(
        &self,
        safe_tx_hash: B256,
        signer: &K,
        auto_execute: bool,
    ) -> Result<ConfirmationOutcome, TrackerError> {
        let owner = signer.address();
        let raw = signer
            .sign_digest(safe_tx_hash)
            .await
            .map_err(TrackerError::at(Step::Sign))?;
        let signature = adjust_v(&safe_tx_hash, &raw, owner)?;
        self.confirm(safe_tx_hash, owner, signature, auto_execute)
            .await
    }

    /// Submits the transaction once the threshold is met.
    ///
    /// Executing an already executed transaction returns its recorded result.
    pub async fn execute(&self, safe_tx_hash: B256) -> Result<ExecutionResult, TrackerError> {
        let (mut session, state) = self.load(safe_tx_hash).await?;
        self.execute_session(&mut session, &state).await
    }

    async fn load(
        &self,
        safe_tx_hash: B256,
    ) -> Result<(ConfirmationSession, AccountState), TrackerError> {
        let pending = self
            .relay
            .fetch_pending(safe_tx_hash)
            .await
            .map_err(TrackerError::at(Step::FetchStatus))?
            .ok_or_else(|| {
                TrackerError::Validation(format!("unknown transaction {safe_tx_hash}"))
            })?;

        if pending.chain_id != self.config.chain_id {
            return Err(TrackerError::Validation(format!(
                "transaction {} belongs to chain {}, tracker runs on {}",
                safe_tx_hash, pending.chain_id, self.config.chain_id
            )));
        }

        let state = self.account_state(pending.safe).await?;
        let session = ConfirmationSession::from_pending(&pending, &state)?;
        Ok((session, state))
    }

    async fn account_state(&self, account: Address) -> Result<AccountState, TrackerError> {
        self.chain
            .account_state(account)
            .await
            .map_err(TrackerError::at(Step::ReadAccount))
    }

    async fn execute_session(
        &self,
        session: &mut ConfirmationSession,
        state: &AccountState,
    ) -> Result<ExecutionResult, TrackerError> {
        let safe_tx_hash = session.safe_tx_hash();
        match (session.state(), session.execution()) {
            (SessionState::ThresholdMet, _) => {}
            (_, Some(ExecutionResult::Failed { reason })) => {
                return Err(TrackerError::State(format!(
                    "transaction {safe_tx_hash} failed: {reason}"
                )));
            }
            (_, Some(result)) => return Ok(result.clone()),
            _ => {
                return Err(TrackerError::State(format!(
                    "threshold not met: {} of {} signatures",
                    session.signature_count(),
                    session.threshold()
                )));
            }
        }

        let nonce = session.request().nonce();
        if state.nonce() > nonce {
            tracing::info!(
                "nonce {} of {} already consumed; treating as executed",
                nonce,
                safe_tx_hash
            );
            let result = ExecutionResult::AlreadyExecuted {
                transaction_hash: None,
            };
            session.record_execution(result.clone());
            return Ok(result);
        }
        if state.nonce() < nonce {
            return Err(TrackerError::State(format!(
                "nonce {} is queued behind account nonce {}",
                nonce,
                state.nonce()
            )));
        }

        let signatures = session.aggregated_signatures()?;
        tracing::info!(
            "submitting {} with {} signatures",
            safe_tx_hash,
            session.signature_count()
        );
        let receipt = self
            .chain
            .execute(session.account(), session.request(), signatures)
            .await
            .map_err(TrackerError::at(Step::Execute))?;

        let result = match receipt {
            ExecutionReceipt::Executed { transaction_hash } => {
                tracing::info!("executed {} in {}", safe_tx_hash, transaction_hash);
                ExecutionResult::Executed { transaction_hash }
            }
            ExecutionReceipt::Reverted { reason } => self.classify_revert(session, reason).await?,
        };

        session.record_execution(result.clone());
        Ok(result)
    }

    /// A revert after another submitter consumed the nonce is a lost race,
    /// not a failure.
    async fn classify_revert(
        &self,
        session: &ConfirmationSession,
        reason: String,
    ) -> Result<ExecutionResult, TrackerError> {
        let state = self.account_state(session.account()).await?;
        if state.nonce() <= session.request().nonce() {
            tracing::warn!("execution of {} reverted: {}", session.safe_tx_hash(), reason);
            return Ok(ExecutionResult::Failed { reason });
        }

        tracing::warn!(
            "lost execution race for {}; nonce already consumed",
            session.safe_tx_hash()
        );
        let transaction_hash = match self.relay.fetch_pending(session.safe_tx_hash()).await {
            Ok(Some(pending)) => pending.transaction_hash,
            Ok(None) => None,
            Err(e) => {
                tracing::debug!("could not look up winning execution: {}", e);
                None
            }
        };
        Ok(ExecutionResult::AlreadyExecuted { transaction_hash })
    }
}

fn check_owner_signature(
    session: &ConfirmationSession,
    state: &AccountState,
    signature: &SafeSignature,
) -> Result<(), TrackerError> {
    if !state.is_owner(&signature.signer()) {
        return Err(TrackerError::Signature(format!(
            "{} is not an owner of {}",
            signature.signer(),
            session.account()
        )));
    }
    verify_owner_signature(&session.safe_tx_hash(), signature)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::error::CollaboratorError;
    use crate::memory::{InMemoryChain, InMemoryRelay};
    use alloy_primitives::{Bytes, U256};
    use async_trait::async_trait;
    use safe_protocol::address::address_from_private_key;
    use safe_protocol::signature::pre_validated_signature;
    use safe_protocol::{sign, Operation};

    const CHAIN_ID: u64 = 11155111;

    fn key(n: u8) -> [u8; 32] {
        let mut key = [0u8; 32];
        key[31] = n;
        key
    }

    fn owner(n: u8) -> Address {
        address_from_private_key(&key(n)).unwrap()
    }

    fn account() -> Address {
        Address::repeat_byte(0x5a)
    }

    fn request(nonce: u64) -> TransactionRequest {
        TransactionRequest::new(
            Address::repeat_byte(0x77),
            U256::from(10u64),
            Bytes::new(),
            Operation::Call,
            U256::from(nonce),
        )
    }

    fn owners_state(nonce: u64) -> AccountState {
        AccountState::new((1..=3).map(owner), 2, U256::from(nonce)).unwrap()
    }

    fn tracker() -> (
        ConfirmationTracker<InMemoryRelay, InMemoryChain>,
        InMemoryRelay,
        InMemoryChain,
    ) {
        let relay = InMemoryRelay::new();
        let chain = InMemoryChain::new(CHAIN_ID).with_indexer(relay.clone());
        chain.set_account(account(), owners_state(0));
        let config = TrackerConfig::new(CHAIN_ID).unwrap();
        (
            ConfirmationTracker::new(relay.clone(), chain.clone(), config),
            relay,
            chain,
        )
    }

    #[tokio::test]
    async fn propose_publishes_record() {
        let (tracker, relay, _) = tracker();
        let session = tracker.propose(account(), request(0), None).await.unwrap();

        assert_eq!(session.state(), SessionState::Proposed);
        let record = relay.record(&session.safe_tx_hash()).unwrap();
        assert_eq!(record.confirmations_required, 2);
        assert!(record.confirmations.is_empty());
    }

    #[tokio::test]
    async fn propose_rejects_used_nonce() {
        let (tracker, _, chain) = tracker();
        chain.set_account(account(), owners_state(3));
        let result = tracker.propose(account(), request(2), None).await;
        assert!(matches!(result, Err(TrackerError::Validation(_))));
    }

    #[tokio::test]
    async fn propose_with_proposer_signature() {
        let (tracker, relay, _) = tracker();
        let digest = ConfirmationSession::new(account(), CHAIN_ID, request(0), 2)
            .unwrap()
            .safe_tx_hash();
        let sig = sign(&digest, &key(1)).unwrap();

        let session = tracker.propose(account(), request(0), Some(sig)).await.unwrap();
        assert_eq!(session.state(), SessionState::Collecting);
        assert_eq!(relay.record(&digest).unwrap().proposer, Some(owner(1)));
    }

    #[tokio::test]
    async fn confirm_is_idempotent() {
        let (tracker, relay, _) = tracker();
        let digest = tracker.propose(account(), request(0), None).await.unwrap().safe_tx_hash();
        let sig = sign(&digest, &key(1)).unwrap();

        let first = tracker.confirm(digest, owner(1), sig.clone(), false).await.unwrap();
        assert!(first.signature_submitted);
        assert!(!first.already_signed);
        assert_eq!(first.current_signatures, 1);

        let second = tracker.confirm(digest, owner(1), sig, false).await.unwrap();
        assert!(second.already_signed);
        assert!(!second.signature_submitted);
        assert_eq!(second.current_signatures, 1);
        assert_eq!(relay.record(&digest).unwrap().confirmations.len(), 1);
    }

    #[tokio::test]
    async fn conflicting_signature_is_state_error() {
        let (tracker, _, _) = tracker();
        let digest = tracker.propose(account(), request(0), None).await.unwrap().safe_tx_hash();
        tracker
            .confirm(digest, owner(1), sign(&digest, &key(1)).unwrap(), false)
            .await
            .unwrap();

        let other = pre_validated_signature(owner(1));
        let result = tracker.confirm(digest, owner(1), other, false).await;
        assert!(matches!(result, Err(TrackerError::State(_))));
    }

    #[tokio::test]
    async fn non_owner_and_mismatched_signer_are_rejected() {
        let (tracker, _, _) = tracker();
        let digest = tracker.propose(account(), request(0), None).await.unwrap().safe_tx_hash();

        let outsider = sign(&digest, &key(8)).unwrap();
        let result = tracker.confirm(digest, owner(8), outsider, false).await;
        assert!(matches!(result, Err(TrackerError::Signature(_))));

        let sig = sign(&digest, &key(1)).unwrap();
        let result = tracker.confirm(digest, owner(2), sig, false).await;
        assert!(matches!(result, Err(TrackerError::Signature(_))));
    }

    #[tokio::test]
    async fn threshold_without_auto_execute_does_not_execute() {
        let (tracker, _, chain) = tracker();
        let digest = tracker.propose(account(), request(0), None).await.unwrap().safe_tx_hash();
        for n in [1, 2] {
            tracker
                .confirm(digest, owner(n), sign(&digest, &key(n)).unwrap(), false)
                .await
                .unwrap();
        }

        let session = tracker.session(digest).await.unwrap();
        assert_eq!(session.state(), SessionState::ThresholdMet);
        assert!(chain.submissions().is_empty());
    }

    #[tokio::test]
    async fn auto_execute_fires_at_threshold() {
        let (tracker, _, chain) = tracker();
        let digest = tracker.propose(account(), request(0), None).await.unwrap().safe_tx_hash();

        let first = tracker
            .confirm(digest, owner(3), sign(&digest, &key(3)).unwrap(), true)
            .await
            .unwrap();
        assert!(!first.threshold_met);
        assert_eq!(first.execution_result, None);

        let second = tracker
            .confirm(digest, owner(1), sign(&digest, &key(1)).unwrap(), true)
            .await
            .unwrap();
        assert!(second.threshold_met);
        assert!(second.executed);
        assert!(matches!(
            second.execution_result,
            Some(ExecutionResult::Executed { .. })
        ));
        assert_eq!(chain.submissions().len(), 1);

        let session = tracker.session(digest).await.unwrap();
        assert_eq!(session.state(), SessionState::Executed);
    }

    #[tokio::test]
    async fn execute_below_threshold_is_state_error() {
        let (tracker, _, _) = tracker();
        let digest = tracker.propose(account(), request(0), None).await.unwrap().safe_tx_hash();
        let result = tracker.execute(digest).await;
        assert!(matches!(result, Err(TrackerError::State(_))));
    }

    #[tokio::test]
    async fn queued_nonce_cannot_execute_yet() {
        let (tracker, _, _) = tracker();
        let digest = tracker.propose(account(), request(1), None).await.unwrap().safe_tx_hash();
        for n in [1, 2] {
            tracker
                .confirm(digest, owner(n), sign(&digest, &key(n)).unwrap(), false)
                .await
                .unwrap();
        }
        assert!(matches!(
            tracker.execute(digest).await,
            Err(TrackerError::State(_))
        ));
    }

    #[tokio::test]
    async fn collaborator_failure_is_tagged_and_leaves_state_unchanged() {
        let (tracker, relay, _) = tracker();
        let digest = tracker.propose(account(), request(0), None).await.unwrap().safe_tx_hash();
        let sig = sign(&digest, &key(1)).unwrap();

        relay.fail_next(Step::PublishSignature, CollaboratorError::Timeout);
        let err = tracker.confirm(digest, owner(1), sig.clone(), false).await.unwrap_err();
        assert_eq!(err.step(), Some(Step::PublishSignature));
        assert!(err.is_retryable());
        assert!(relay.record(&digest).unwrap().confirmations.is_empty());

        let retried = tracker.confirm(digest, owner(1), sig, false).await.unwrap();
        assert!(retried.signature_submitted);
    }

    #[tokio::test]
    async fn unknown_digest_is_validation_error() {
        let (tracker, _, _) = tracker();
        let result = tracker.session(B256::repeat_byte(0x01)).await;
        assert!(matches!(result, Err(TrackerError::Validation(_))));
    }

    /// Reports a stale nonce on the first read, then reverts the submission
    /// as if another owner got there first.
    struct LosingChain {
        reads: AtomicUsize,
    }

    #[async_trait]
    impl ChainClient for LosingChain {
        async fn account_state(
            &self,
            _account: Address,
        ) -> Result<AccountState, CollaboratorError> {
            let read = self.reads.fetch_add(1, Ordering::SeqCst);
            Ok(owners_state(if read == 0 { 0 } else { 1 }))
        }

        async fn execute(
            &self,
            _account: Address,
            _request: &TransactionRequest,
            _signatures: Bytes,
        ) -> Result<ExecutionReceipt, CollaboratorError> {
            Ok(ExecutionReceipt::Reverted {
                reason: "GS026".into(),
            })
        }
    }

    #[tokio::test]
    async fn revert_after_nonce_moved_is_already_executed() {
        let relay = InMemoryRelay::new();
        let seed = InMemoryChain::new(CHAIN_ID);
        seed.set_account(account(), owners_state(0));
        let config = TrackerConfig::new(CHAIN_ID).unwrap();

        let setup = ConfirmationTracker::new(relay.clone(), seed, config.clone());
        let digest = setup.propose(account(), request(0), None).await.unwrap().safe_tx_hash();
        for n in [1, 2] {
            setup
                .confirm(digest, owner(n), sign(&digest, &key(n)).unwrap(), false)
                .await
                .unwrap();
        }

        let losing = ConfirmationTracker::new(
            relay,
            LosingChain {
                reads: AtomicUsize::new(0),
            },
            config,
        );
        let result = losing.execute(digest).await.unwrap();
        assert_eq!(
            result,
            ExecutionResult::AlreadyExecuted {
                transaction_hash: None
            }
        );
    }
}
