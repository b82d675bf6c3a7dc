//! DCL error types

use quorumchain_crypto::CryptoError;
use quorumchain_types::{Hash, NodeId};
use thiserror::Error;

// ============================================================================
// Security Constants - Bounds for deserialization to prevent OOM attacks
// ============================================================================

/// Maximum number of transactions allowed in a single sub-block.
pub const MAX_TRANSACTIONS_PER_SUB_BLOCK: usize = 100_000;

/// Maximum size of a single transaction payload in bytes (10 MB).
pub const MAX_TRANSACTION_SIZE: usize = 10 * 1024 * 1024;

/// Maximum number of worker slots per block.
pub const MAX_SLOTS_PER_BLOCK: u32 = 256;

// ============================================================================
// Error Types
// ============================================================================

/// Sub-block validation and assembly errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DclError {
    /// Contender signature did not verify
    #[error("invalid sub-block signature from {signer}: {source}")]
    InvalidSignature {
        /// Claimed signer
        signer: NodeId,
        /// Underlying verification failure
        source: CryptoError,
    },

    /// Signer is not a delegate
    #[error("sub-block signer {signer} is not a delegate")]
    UnknownSigner {
        /// Claimed signer
        signer: NodeId,
    },

    /// Slot index outside `0..slots_per_block`
    #[error("slot index {slot} out of range (slots per block: {slots_per_block})")]
    SlotOutOfRange {
        /// Slot received
        slot: u32,
        /// Configured slot count
        slots_per_block: u32,
    },

    /// Merkle leaves do not hash the carried transactions
    #[error("merkle leaves do not match transactions in slot {slot}")]
    LeafMismatch {
        /// Offending slot
        slot: u32,
    },

    /// Merkle root over leaves differs from the claimed result hash
    #[error("merkle root mismatch in slot {slot}: claimed {claimed}, computed {computed}")]
    ResultHashMismatch {
        /// Offending slot
        slot: u32,
        /// Result hash in the contender
        claimed: Hash,
        /// Root actually computed
        computed: Hash,
    },

    /// Empty contender whose result hash is not its input hash
    #[error("empty sub-block in slot {slot} must carry result_hash == input_hash")]
    EmptyResultMismatch {
        /// Offending slot
        slot: u32,
    },

    /// Contender built on a different parent block
    #[error("sub-block in slot {slot} built on {actual}, expected {expected}")]
    WrongParent {
        /// Offending slot
        slot: u32,
        /// Local current block hash
        expected: Hash,
        /// Parent the contender names
        actual: Hash,
    },

    /// Too many transactions in one contender
    #[error("sub-block carries {count} transactions (max {max})")]
    TooManyTransactions {
        /// Transactions received
        count: usize,
        /// Allowed maximum
        max: usize,
    },

    /// Block hash requested before every slot is filled
    #[error("incomplete block: {filled} of {required} slots filled")]
    IncompleteBlock {
        /// Slots filled so far
        filled: usize,
        /// Slots needed
        required: usize,
    },

    /// Worker command channel closed
    #[error("channel send error: {0}")]
    ChannelSend(String),
}

impl DclError {
    /// Check if this error indicates Byzantine behavior by the sender
    pub fn is_byzantine(&self) -> bool {
        matches!(
            self,
            DclError::InvalidSignature { .. }
                | DclError::UnknownSigner { .. }
                | DclError::LeafMismatch { .. }
                | DclError::ResultHashMismatch { .. }
                | DclError::EmptyResultMismatch { .. }
        )
    }

    /// Check if this error is recoverable (retrying later may succeed)
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            DclError::IncompleteBlock { .. } | DclError::WrongParent { .. }
        )
    }
}
