//! Catchup request/reply protocol messages
//!
//! A lagging node broadcasts a [`CatchupMessage::BlockIndexRequest`] naming
//! its current block. Each masternode answers with the index of every block
//! it holds above that one, newest first. The lagging node then fetches
//! blocks one number at a time with [`CatchupMessage::BlockDataRequest`].

use quorumchain_types::{BlockData, BlockIndexEntry, Hash, NodeId};
use serde::{Deserialize, Serialize};

/// Maximum index entries in one reply
pub const MAX_INDEX_ENTRIES_PER_REPLY: usize = 4096;

/// Catchup protocol messages
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CatchupMessage {
    /// Ask peers for every block above `block_hash`
    BlockIndexRequest {
        /// Requester's current block hash
        block_hash: Hash,
        /// Requesting node
        sender: NodeId,
    },

    /// Index of blocks above the requested one, newest first
    BlockIndexReply {
        /// Entries, descending block number
        indices: Vec<BlockIndexEntry>,
    },

    /// Ask an owner for one block
    BlockDataRequest {
        /// Block number wanted
        block_num: u64,
    },

    /// A full block
    BlockDataReply(BlockData),
}

impl CatchupMessage {
    /// Short name for logs and metrics labels
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BlockIndexRequest { .. } => "index_request",
            Self::BlockIndexReply { .. } => "index_reply",
            Self::BlockDataRequest { .. } => "data_request",
            Self::BlockDataReply(_) => "data_reply",
        }
    }
}
