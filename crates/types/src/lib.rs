//! Core types for the quorumchain node stack.
//!
//! This crate provides the fundamental data structures shared by every other
//! crate: content hashes, node identities, the masternode/delegate roster and
//! the block, sub-block and notification wire types.

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

pub mod block;
pub mod hash;
pub mod node_id;
pub mod roster;

pub use block::{
    BlockData, BlockIndexEntry, BlockNotification, NotificationKind, StateWrite, SubBlock,
    TransactionData,
};
pub use hash::{Hash, HashError, HASH_SIZE};
pub use node_id::{NodeId, NODE_ID_SIZE};
pub use roster::{Roster, RosterError};

/// Serde helper for fixed-size byte arrays.
///
/// Human-readable formats (JSON config, logs) get a hex string; binary
/// formats get the raw bytes as a fixed-width tuple.
pub(crate) mod hex_array {
    use serde::de::{self, SeqAccess, Visitor};
    use serde::ser::SerializeTuple;
    use serde::{Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S, const N: usize>(bytes: &[u8; N], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if serializer.is_human_readable() {
            serializer.serialize_str(&hex::encode(bytes))
        } else {
            let mut tup = serializer.serialize_tuple(N)?;
            for b in bytes {
                tup.serialize_element(b)?;
            }
            tup.end()
        }
    }

    pub fn deserialize<'de, D, const N: usize>(deserializer: D) -> Result<[u8; N], D::Error>
    where
        D: Deserializer<'de>,
    {
        if deserializer.is_human_readable() {
            let s: String = serde::Deserialize::deserialize(deserializer)?;
            let bytes = hex::decode(&s).map_err(de::Error::custom)?;
            bytes
                .as_slice()
                .try_into()
                .map_err(|_| de::Error::invalid_length(bytes.len(), &"a fixed-size hex string"))
        } else {
            struct ArrayVisitor<const N: usize>;

            impl<'de, const N: usize> Visitor<'de> for ArrayVisitor<N> {
                type Value = [u8; N];

                fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    write!(f, "{N} bytes")
                }

                fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<[u8; N], A::Error> {
                    let mut out = [0u8; N];
                    for (i, slot) in out.iter_mut().enumerate() {
                        *slot = seq
                            .next_element()?
                            .ok_or_else(|| de::Error::invalid_length(i, &self))?;
                    }
                    Ok(out)
                }
            }

            deserializer.deserialize_tuple(N, ArrayVisitor::<N>)
        }
    }
}
