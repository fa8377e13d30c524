//! Protocol core for M-of-N multisig smart accounts.
//!
//! This crate provides:
//! - The EIP-712 transaction digest the account contract verifies
//! - Owner signature creation, `v`-byte normalization and recovery
//! - Aggregation of owner signatures into the `execTransaction` blob
//! - CREATE2 address prediction for proxy-factory and clone-factory accounts
//! - Minimal ABI encoding and address utilities backing the above
//!
//! Everything here is a pure function of its inputs.

pub mod abi;
pub mod address;
pub mod aggregate;
pub mod chains;
pub mod error;
pub mod hashing;
pub mod predict;
pub mod signature;
pub mod types;

pub use aggregate::aggregate_signatures;
pub use error::SafeError;
pub use hashing::compute_transaction_hash;
pub use predict::{predict_clone_address, predict_safe_address};
pub use signature::{recover, sign, SafeSignature, SignatureKind};
pub use types::{AccountState, Operation, TransactionRequest};
