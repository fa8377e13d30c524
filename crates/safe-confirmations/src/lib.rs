//! Owner confirmation tracking for multisig accounts.
//!
//! A [`ConfirmationTracker`] proposes transactions to a signature [`Relay`],
//! records owner signatures as they arrive and submits the transaction through
//! a [`ChainClient`] once the account threshold is met.

pub mod collaborators;
pub mod config;
pub mod error;
pub mod memory;
pub mod relay;
pub mod session;
pub mod tracker;

pub use collaborators::{
    ChainClient, ExecutionReceipt, KeySigner, LocalKeySigner, Relay, SigningMode,
};
pub use config::TrackerConfig;
pub use error::{CollaboratorError, Step, TrackerError};
pub use relay::{PendingTransaction, Proposal, RelayConfirmation};
pub use session::{AddOutcome, ConfirmationSession, ExecutionResult, SessionState};
pub use tracker::{ConfirmationOutcome, ConfirmationTracker};
