//! SHA3-256 hash type for quorumchain
//!
//! Every content address in the system (Merkle nodes, sub-block results,
//! block hashes) is a [`Hash`]. Multi-part hashes are plain big-endian byte
//! concatenation with no separator.

use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};
use std::fmt;
use thiserror::Error;

/// Length of a hash in bytes
pub const HASH_SIZE: usize = 32;

/// Errors from parsing hashes
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HashError {
    /// Input was not valid hex
    #[error("invalid hex: {0}")]
    InvalidHex(String),

    /// Decoded input had the wrong length
    #[error("invalid hash length: expected {HASH_SIZE}, got {0}")]
    InvalidLength(usize),
}

/// SHA3-256 hash (32 bytes)
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Hash(#[serde(with = "crate::hex_array")] pub [u8; HASH_SIZE]);

impl Hash {
    /// Zero hash constant
    pub const ZERO: Self = Self([0u8; HASH_SIZE]);

    /// Compute SHA3-256 hash of data
    pub fn compute(data: &[u8]) -> Self {
        Self::compute_parts(&[data])
    }

    /// Hash the concatenation of `parts` without materializing it
    pub fn compute_parts(parts: &[&[u8]]) -> Self {
        let mut hasher = Sha3_256::new();
        for part in parts {
            hasher.update(part);
        }
        let result = hasher.finalize();
        let mut bytes = [0u8; HASH_SIZE];
        bytes.copy_from_slice(&result);
        Self(bytes)
    }

    /// `H(left || right)`, the Merkle internal-node rule
    pub fn combine(left: &Hash, right: &Hash) -> Self {
        Self::compute_parts(&[left.as_slice(), right.as_slice()])
    }

    /// Create from raw bytes
    pub fn from_bytes(bytes: [u8; HASH_SIZE]) -> Self {
        Self(bytes)
    }

    /// Parse from a 64-character hex string
    pub fn from_hex(s: &str) -> Result<Self, HashError> {
        let bytes = hex::decode(s).map_err(|e| HashError::InvalidHex(e.to_string()))?;
        let arr: [u8; HASH_SIZE] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| HashError::InvalidLength(bytes.len()))?;
        Ok(Self(arr))
    }

    /// Get raw bytes
    pub fn as_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }

    /// Convert to byte slice
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    /// True for the all-zero hash (genesis parent)
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; HASH_SIZE]
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", hex::encode(&self.0[..8]))
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl From<[u8; HASH_SIZE]> for Hash {
    fn from(bytes: [u8; HASH_SIZE]) -> Self {
        Self(bytes)
    }
}
