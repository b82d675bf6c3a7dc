//! Catchup error types

use quorumchain_storage::StorageError;
use quorumchain_types::{Hash, NodeId};
use thiserror::Error;

/// Result type alias for sync operations
pub type Result<T> = std::result::Result<T, SyncError>;

/// Catchup error categories
#[derive(Debug, Error)]
pub enum SyncError {
    // === Peer Errors ===
    /// Message from a node that is not a masternode
    #[error("unknown peer {0}")]
    UnknownPeer(NodeId),

    /// Block data does not match the index entry or the local chain
    #[error("invalid block {block_num} from peer {peer}: {reason}")]
    InvalidBlock {
        /// Peer that served the block
        peer: String,
        /// Block number
        block_num: u64,
        /// Reason for rejection
        reason: String,
    },

    /// Malformed request or response
    #[error("malformed message from peer {peer}: {reason}")]
    MalformedMessage {
        /// Peer that sent the message
        peer: String,
        /// Reason for considering it malformed
        reason: String,
    },

    // === State Errors ===
    /// Block hash disagrees with the hash agreed in the index
    #[error("block {block_num} hash mismatch: index has {expected}, got {actual}")]
    HashMismatch {
        /// Block number
        block_num: u64,
        /// Hash in the index entry
        expected: Hash,
        /// Hash received
        actual: Hash,
    },

    // === Storage Errors ===
    /// Storage failed while applying a block; fatal
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    // === Configuration Errors ===
    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl SyncError {
    /// Create an invalid block error
    pub fn invalid_block(
        peer: impl Into<String>,
        block_num: u64,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidBlock {
            peer: peer.into(),
            block_num,
            reason: reason.into(),
        }
    }

    /// Create a malformed message error
    pub fn malformed(peer: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedMessage {
            peer: peer.into(),
            reason: reason.into(),
        }
    }

    /// Check if this error indicates peer misbehavior
    pub fn is_peer_misbehavior(&self) -> bool {
        matches!(
            self,
            Self::InvalidBlock { .. } | Self::MalformedMessage { .. } | Self::HashMismatch { .. }
        )
    }

    /// Check if this error must stop the node
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::Config(_))
    }

    /// Check if this error is retriable with a different peer
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::InvalidBlock { .. } | Self::HashMismatch { .. } | Self::MalformedMessage { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_block_constructor() {
        let err = SyncError::invalid_block("peer1", 7, "bad parent");
        match &err {
            SyncError::InvalidBlock {
                peer,
                block_num,
                reason,
            } => {
                assert_eq!(peer, "peer1");
                assert_eq!(*block_num, 7);
                assert_eq!(reason, "bad parent");
            }
            _ => panic!("expected InvalidBlock variant"),
        }
        assert!(err.to_string().contains("block 7"));
    }

    #[test]
    fn test_storage_is_fatal() {
        let err = SyncError::from(StorageError::BlockNotFound(3));
        assert!(err.is_fatal());
        assert!(!err.is_peer_misbehavior());
        assert!(!err.is_retriable());
    }

    #[test]
    fn test_misbehavior_classification() {
        assert!(SyncError::malformed("p", "r").is_peer_misbehavior());
        assert!(SyncError::HashMismatch {
            block_num: 1,
            expected: Hash::ZERO,
            actual: Hash::compute(b"x"),
        }
        .is_peer_misbehavior());
        assert!(!SyncError::UnknownPeer(NodeId::from_bytes([0; 32])).is_peer_misbehavior());
        assert!(!SyncError::Config("bad".to_string()).is_retriable());
    }
}
