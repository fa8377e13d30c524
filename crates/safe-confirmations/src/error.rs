use std::fmt;

use safe_protocol::SafeError;
use thiserror::Error;

/// External call a tracker operation was making when a collaborator failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    Propose,
    FetchStatus,
    ReadAccount,
    PublishSignature,
    Sign,
    Execute,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::Propose => "propose",
            Step::FetchStatus => "fetch status",
            Step::ReadAccount => "read account",
            Step::PublishSignature => "publish signature",
            Step::Sign => "sign",
            Step::Execute => "execute",
        };
        f.write_str(name)
    }
}

/// Failure reported by a relay, chain or key-management collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollaboratorError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("request rejected: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrackerError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("signature error: {0}")]
    Signature(String),

    #[error("state error: {0}")]
    State(String),

    #[error("{step} failed: {source}")]
    External {
        step: Step,
        #[source]
        source: CollaboratorError,
    },
}

impl TrackerError {
    /// Builds an error-mapping closure for a collaborator call at `step`.
    pub(crate) fn at(step: Step) -> impl FnOnce(CollaboratorError) -> Self {
        move |source| TrackerError::External { step, source }
    }

    /// Only collaborator failures are worth retrying; the tracker has not
    /// changed anything when it returns one.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TrackerError::External { .. })
    }

    /// The external step that failed, if any.
    pub fn step(&self) -> Option<Step> {
        match self {
            TrackerError::External { step, .. } => Some(*step),
            _ => None,
        }
    }
}

impl From<SafeError> for TrackerError {
    fn from(e: SafeError) -> Self {
        match e {
            SafeError::Validation(msg) => TrackerError::Validation(msg),
            SafeError::Signature(msg) => TrackerError::Signature(msg),
            SafeError::State(msg) => TrackerError::State(msg),
        }
    }
}
