//! Consensus driver configuration.

use crate::error::ConsensusError;
use quorumchain_data_chain::error::MAX_SLOTS_PER_BLOCK;
use serde::{Deserialize, Serialize};

/// Consensus driver configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    /// Worker slots a block is assembled from.
    pub slots_per_block: u32,
    /// Sub-blocks built on a parent we have not committed yet, kept for
    /// replay once we do.
    pub max_early_contenders: usize,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            slots_per_block: 4,
            max_early_contenders: 64,
        }
    }
}

impl ConsensusConfig {
    /// Create a config for `slots_per_block` slots.
    pub fn new(slots_per_block: u32) -> Self {
        Self {
            slots_per_block,
            ..Default::default()
        }
    }

    /// Set the early contender buffer size.
    pub fn with_max_early_contenders(mut self, max: usize) -> Self {
        self.max_early_contenders = max;
        self
    }

    /// Reject out-of-range settings.
    pub fn validate(&self) -> Result<(), ConsensusError> {
        if self.slots_per_block == 0 || self.slots_per_block > MAX_SLOTS_PER_BLOCK {
            return Err(ConsensusError::InvalidConfig(format!(
                "slots_per_block must be in 1..={MAX_SLOTS_PER_BLOCK}, got {}",
                self.slots_per_block
            )));
        }
        Ok(())
    }
}
