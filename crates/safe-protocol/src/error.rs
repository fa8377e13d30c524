use thiserror::Error;

/// Multisig protocol errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SafeError {
    /// Malformed address, hex or numeric input, or an out-of-range threshold.
    #[error("validation error: {0}")]
    Validation(String),

    /// Wrong signature length, failed recovery, or a signer mismatch.
    #[error("signature error: {0}")]
    Signature(String),

    /// A conflicting duplicate signature or a mutation of a finished session.
    #[error("state error: {0}")]
    State(String),
}
