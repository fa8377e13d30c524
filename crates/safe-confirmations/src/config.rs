use safe_protocol::chains::{get_chain, EvmChain};
use serde::{Deserialize, Serialize};

use crate::error::TrackerError;

/// Settings a [`ConfirmationTracker`](crate::ConfirmationTracker) runs with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TrackerConfig {
    pub chain_id: u64,
    /// Used by `confirm_with_defaults`.
    #[serde(default)]
    pub auto_execute: bool,
}

impl TrackerConfig {
    /// Any non-zero chain id is accepted; local and private networks need
    /// not be in the known chain table.
    pub fn new(chain_id: u64) -> Result<Self, TrackerError> {
        let config = Self {
            chain_id,
            auto_execute: false,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_auto_execute(mut self, auto_execute: bool) -> Self {
        self.auto_execute = auto_execute;
        self
    }

    /// Parses and validates a JSON config document.
    pub fn from_json(json: &str) -> Result<Self, TrackerError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| TrackerError::Validation(format!("invalid tracker config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// The known chain definition, if this is one of the listed networks.
    pub fn chain(&self) -> Option<&'static EvmChain> {
        get_chain(self.chain_id)
    }

    fn validate(&self) -> Result<(), TrackerError> {
        if self.chain_id == 0 {
            return Err(TrackerError::Validation("chain id must be non-zero".into()));
        }
        if self.chain().is_none() {
            tracing::debug!("chain id {} is not in the known chain table", self.chain_id);
        }
        Ok(())
    }
}
