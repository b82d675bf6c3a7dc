//! Cryptographic error types

use thiserror::Error;

/// Errors from signing, verification and Merkle construction
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Invalid secret key bytes
    #[error("invalid secret key bytes")]
    InvalidSecretKey,

    /// Invalid public key bytes
    #[error("invalid public key bytes")]
    InvalidPublicKey,

    /// Signature had the wrong length or encoding
    #[error("invalid signature bytes: expected {expected} bytes, got {actual}")]
    InvalidSignature {
        /// Required length
        expected: usize,
        /// Length received
        actual: usize,
    },

    /// Signature did not verify
    #[error("signature verification failed")]
    VerificationFailed,

    /// A Merkle tree needs at least one leaf
    #[error("cannot build a merkle tree with no leaves")]
    EmptyMerkleTree,

    /// Hex decoding of a key failed
    #[error("invalid hex key: {0}")]
    InvalidHex(String),
}
