//! Storage error types

use quorumchain_types::Hash;
use thiserror::Error;

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// Block not found by number
    #[error("block not found: {0}")]
    BlockNotFound(u64),

    /// Block does not extend the stored tip
    #[error("non-sequential block: expected {expected}, got {actual}")]
    NonSequential {
        /// Next block number the store accepts
        expected: u64,
        /// Block number offered
        actual: u64,
    },

    /// Block's parent is not the stored tip
    #[error("parent mismatch at block {block_num}: tip is {tip}, block names {parent}")]
    ParentMismatch {
        /// Offered block number
        block_num: u64,
        /// Stored tip hash
        tip: Hash,
        /// Parent the block names
        parent: Hash,
    },

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Backend error
    #[error("database error: {0}")]
    Database(String),
}

/// Result type for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;
