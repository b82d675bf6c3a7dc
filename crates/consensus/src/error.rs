//! Consensus layer error types

use quorumchain_storage::StorageError;
use quorumchain_sync::SyncError;
use thiserror::Error;

/// Maximum encoded size of a peer message (64 MiB).
/// Bounds bincode decoding so a peer cannot force unbounded allocation.
pub const MAX_MESSAGE_SIZE: u64 = 64 * 1024 * 1024;

/// Errors from consensus configuration and the peer wire format.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConsensusError {
    /// Invalid configuration provided.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A peer message could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),

    /// Encoded message exceeds the size limit.
    #[error("message of {size} bytes exceeds maximum of {}", MAX_MESSAGE_SIZE)]
    MessageTooLarge {
        /// Size of the rejected input
        size: usize,
    },
}

/// Errors that stop the consensus driver.
///
/// Everything recoverable (invalid sub-blocks, stale or mismatched
/// notifications) is handled inside the driver and never surfaces here.
#[derive(Debug, Error)]
pub enum DriverError {
    /// Committing an agreed block failed; local state may have diverged.
    #[error("failed to commit block {block_num}: {source}")]
    StorageCommit {
        /// Block being committed
        block_num: u64,
        /// Underlying storage failure
        #[source]
        source: StorageError,
    },

    /// Storage read failed outside a commit.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Catchup failed.
    #[error("catchup error: {0}")]
    Catchup(#[from] SyncError),

    /// Invalid driver configuration.
    #[error(transparent)]
    Config(#[from] ConsensusError),
}

impl DriverError {
    /// Check if the node must stop.
    pub fn is_fatal(&self) -> bool {
        match self {
            DriverError::StorageCommit { .. }
            | DriverError::Storage(_)
            | DriverError::Config(_) => true,
            DriverError::Catchup(e) => e.is_fatal(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_commit_is_fatal() {
        let err = DriverError::StorageCommit {
            block_num: 7,
            source: StorageError::Database("disk full".to_string()),
        };
        assert!(err.is_fatal());
        assert_eq!(err.to_string(), "failed to commit block 7: database error: disk full");
    }

    #[test]
    fn test_catchup_peer_errors_are_not_fatal() {
        let err = DriverError::from(SyncError::invalid_block("peer", 3, "bad hash"));
        assert!(!err.is_fatal());

        let err = DriverError::from(SyncError::Storage(StorageError::BlockNotFound(3)));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_message_too_large_display() {
        let err = ConsensusError::MessageTooLarge { size: 100 };
        assert!(err.to_string().contains("100 bytes"));
    }
}
