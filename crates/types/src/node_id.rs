//! Node identities.
//!
//! A node is identified by its 32-byte Ed25519 verification key. The roster
//! lists node ids, signatures carry the signer's id, and the catchup
//! protocol uses ids to address replies.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::hash::HashError;

/// Length of a node id in bytes
pub const NODE_ID_SIZE: usize = 32;

/// Public identity of a masternode or delegate
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(#[serde(with = "crate::hex_array")] pub [u8; NODE_ID_SIZE]);

impl NodeId {
    /// Create from raw public-key bytes
    pub const fn from_bytes(bytes: [u8; NODE_ID_SIZE]) -> Self {
        Self(bytes)
    }

    /// Raw bytes
    pub fn as_bytes(&self) -> &[u8; NODE_ID_SIZE] {
        &self.0
    }

    /// Parse from hex (config files)
    pub fn from_hex(s: &str) -> Result<Self, HashError> {
        let bytes = hex::decode(s).map_err(|e| HashError::InvalidHex(e.to_string()))?;
        let arr: [u8; NODE_ID_SIZE] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| HashError::InvalidLength(bytes.len()))?;
        Ok(Self(arr))
    }

    /// Short prefix used in log fields
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", hex::encode(&self.0[..8]))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl From<[u8; NODE_ID_SIZE]> for NodeId {
    fn from(bytes: [u8; NODE_ID_SIZE]) -> Self {
        Self(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_and_parse() {
        let id = NodeId::from_bytes([7u8; NODE_ID_SIZE]);
        let parsed = NodeId::from_hex(&id.to_string()).unwrap();
        assert_eq!(parsed, id);
        assert_eq!(id.short(), "07070707");
    }

    #[test]
    fn test_debug_is_truncated() {
        let id = NodeId::from_bytes([0xab; NODE_ID_SIZE]);
        assert_eq!(format!("{:?}", id), "NodeId(abababababababab)");
    }

    #[test]
    fn test_json_roundtrip() {
        let id = NodeId::from_bytes([1u8; NODE_ID_SIZE]);
        let json = serde_json::to_string(&id).unwrap();
        let back: NodeId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
