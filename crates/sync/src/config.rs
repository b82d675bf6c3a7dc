//! Catchup configuration

use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Catchup timing and pipelining
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatchupConfig {
    /// How long a round waits for index-reply quorum before retrying
    pub index_reply_timeout_ms: u64,
    /// Watchdog tick period
    pub timeout_check_interval_ms: u64,
    /// How long a block request may stay unanswered before it is re-issued
    pub block_request_timeout_ms: u64,
    /// Ceiling for the backed-off index timeout
    pub max_index_reply_timeout_ms: u64,
    /// Factor applied to the index timeout after each failed round
    pub backoff_multiplier: f64,
    /// Maximum outstanding block requests
    pub max_in_flight: usize,
}

impl Default for CatchupConfig {
    fn default() -> Self {
        Self {
            index_reply_timeout_ms: 5_000,
            timeout_check_interval_ms: 500,
            block_request_timeout_ms: 3_000,
            max_index_reply_timeout_ms: 60_000,
            backoff_multiplier: 2.0,
            max_in_flight: 8,
        }
    }
}

impl CatchupConfig {
    /// Initial index reply timeout
    pub fn index_reply_timeout(&self) -> Duration {
        Duration::from_millis(self.index_reply_timeout_ms)
    }

    /// Watchdog tick period
    pub fn timeout_check_interval(&self) -> Duration {
        Duration::from_millis(self.timeout_check_interval_ms)
    }

    /// Block request timeout
    pub fn block_request_timeout(&self) -> Duration {
        Duration::from_millis(self.block_request_timeout_ms)
    }

    /// Backoff ceiling
    pub fn max_index_reply_timeout(&self) -> Duration {
        Duration::from_millis(self.max_index_reply_timeout_ms)
    }

    /// Next index timeout after a failed round: `current * multiplier`,
    /// capped at the ceiling
    pub fn next_index_timeout(&self, current: Duration) -> Duration {
        current
            .mul_f64(self.backoff_multiplier)
            .min(self.max_index_reply_timeout())
    }

    /// Reject settings the coordinator cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.timeout_check_interval_ms == 0 {
            return Err(SyncError::Config(
                "timeout_check_interval_ms must be positive".to_string(),
            ));
        }
        if self.index_reply_timeout_ms == 0 || self.block_request_timeout_ms == 0 {
            return Err(SyncError::Config("catchup timeouts must be positive".to_string()));
        }
        if self.max_index_reply_timeout_ms < self.index_reply_timeout_ms {
            return Err(SyncError::Config(
                "max_index_reply_timeout_ms is below index_reply_timeout_ms".to_string(),
            ));
        }
        if !(self.backoff_multiplier >= 1.0 && self.backoff_multiplier.is_finite()) {
            return Err(SyncError::Config(
                "backoff_multiplier must be a finite value >= 1.0".to_string(),
            ));
        }
        if self.max_in_flight == 0 {
            return Err(SyncError::Config("max_in_flight must be at least 1".to_string()));
        }
        Ok(())
    }
}
