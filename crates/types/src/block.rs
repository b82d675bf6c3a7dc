//! Block, sub-block and notification types.
//!
//! A block is the ordered set of `slots_per_block` sub-blocks produced by
//! delegates in one round, chained to its parent by `previous_hash`. Block
//! numbers start at 1; block 0 is the implicit genesis with the zero hash.

use crate::{Hash, NodeId};
use serde::{Deserialize, Serialize};

/// A single key write produced by executing a transaction.
///
/// `value == None` deletes the key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateWrite {
    /// Key in the state store
    pub key: Vec<u8>,
    /// New value, or `None` for delete
    pub value: Option<Vec<u8>>,
}

impl StateWrite {
    /// Write `value` under `key`
    pub fn set(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: Some(value.into()),
        }
    }

    /// Delete `key`
    pub fn delete(key: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: None,
        }
    }
}

/// An executed transaction as carried inside a sub-block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionData {
    /// Raw transaction payload as submitted
    pub payload: Vec<u8>,
    /// Execution status code (0 = success)
    pub status: u8,
    /// State delta produced by execution
    pub state_writes: Vec<StateWrite>,
}

impl TransactionData {
    /// Create a new transaction record
    pub fn new(payload: Vec<u8>, status: u8, state_writes: Vec<StateWrite>) -> Self {
        Self {
            payload,
            status,
            state_writes,
        }
    }

    /// Canonical serialization, the preimage of the transaction's Merkle leaf.
    ///
    /// Format: `len(payload) u32 BE || payload || status || count u32 BE ||
    /// { len(key) || key || tag (0 = delete, 1 = set) || [len(value) || value] }*`
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.payload.len() + 16);
        put_bytes(&mut buf, &self.payload);
        buf.push(self.status);
        buf.extend_from_slice(&(self.state_writes.len() as u32).to_be_bytes());
        for write in &self.state_writes {
            put_bytes(&mut buf, &write.key);
            match &write.value {
                Some(value) => {
                    buf.push(1);
                    put_bytes(&mut buf, value);
                }
                None => buf.push(0),
            }
        }
        buf
    }

    /// Merkle leaf hash of this transaction
    pub fn hash(&self) -> Hash {
        Hash::compute(&self.to_bytes())
    }

    /// True if execution succeeded
    pub fn is_success(&self) -> bool {
        self.status == 0
    }
}

fn put_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    buf.extend_from_slice(bytes);
}

/// Finalized sub-block as stored inside a committed block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubBlock {
    /// Worker slot this sub-block filled
    pub slot_index: u32,
    /// Hash of the raw transaction batch
    pub input_hash: Hash,
    /// Merkle root over the executed transactions (the contender's result hash)
    pub merkle_root: Hash,
    /// Delegate that produced and signed it
    pub signer: NodeId,
    /// Signature over the contender's signing bytes
    pub signature: Vec<u8>,
    /// Executed transactions, in Merkle leaf order
    pub transactions: Vec<TransactionData>,
}

/// Which outcome a block notification reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NotificationKind {
    /// The sender assembled a full block with this hash
    New,
    /// The sender's round failed; no block at this number
    Failed,
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::New => write!(f, "new"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// A masternode's report of what it believes the next block is.
///
/// `sub_block_slot_numbers` and `input_hashes` are grouped per producing
/// delegate, groups ordered by their lowest slot; both are parallel arrays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockNotification {
    /// Block number being reported
    pub block_num: u64,
    /// Block hash (for `Failed`, the hash of the failed round)
    pub block_hash: Hash,
    /// Masternodes that hold the block
    pub block_owners: Vec<NodeId>,
    /// Slot numbers per group
    pub sub_block_slot_numbers: Vec<Vec<u32>>,
    /// Input hashes per group, parallel to `sub_block_slot_numbers`
    pub input_hashes: Vec<Vec<Hash>>,
    /// Outcome reported
    pub kind: NotificationKind,
}

impl BlockNotification {
    /// Report a successfully assembled block
    pub fn new_block(
        block_num: u64,
        block_hash: Hash,
        block_owners: Vec<NodeId>,
        sub_block_slot_numbers: Vec<Vec<u32>>,
        input_hashes: Vec<Vec<Hash>>,
    ) -> Self {
        Self {
            block_num,
            block_hash,
            block_owners,
            sub_block_slot_numbers,
            input_hashes,
            kind: NotificationKind::New,
        }
    }

    /// Report a failed round.
    ///
    /// The notification hash is `H(previous_hash || input hashes...)` so
    /// distinct failed rounds at the same number never share a key.
    pub fn failed(
        block_num: u64,
        previous_hash: &Hash,
        block_owners: Vec<NodeId>,
        sub_block_slot_numbers: Vec<Vec<u32>>,
        input_hashes: Vec<Vec<Hash>>,
    ) -> Self {
        let block_hash = Self::failed_hash(previous_hash, &input_hashes);
        Self {
            block_num,
            block_hash,
            block_owners,
            sub_block_slot_numbers,
            input_hashes,
            kind: NotificationKind::Failed,
        }
    }

    /// Key hash of a failed round
    pub fn failed_hash(previous_hash: &Hash, input_hashes: &[Vec<Hash>]) -> Hash {
        let mut parts: Vec<&[u8]> = vec![previous_hash.as_slice()];
        parts.extend(input_hashes.iter().flatten().map(Hash::as_slice));
        Hash::compute_parts(&parts)
    }

    /// All input hashes in group order, flattened
    pub fn flat_input_hashes(&self) -> Vec<Hash> {
        self.input_hashes.iter().flatten().copied().collect()
    }

    /// True for a `New` notification
    pub fn is_new(&self) -> bool {
        self.kind == NotificationKind::New
    }
}

/// Lightweight pointer to a block, exchanged during catchup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockIndexEntry {
    /// Block number
    pub block_num: u64,
    /// Block hash
    pub block_hash: Hash,
    /// Masternodes that can serve the block data
    pub block_owners: Vec<NodeId>,
}

/// A committed block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockData {
    /// Block number (genesis is 0)
    pub block_num: u64,
    /// `H(previous_hash || merkle_root[0] || ... || merkle_root[n-1])`
    pub block_hash: Hash,
    /// Hash of the parent block
    pub previous_hash: Hash,
    /// Masternodes that hold this block
    pub block_owners: Vec<NodeId>,
    /// Sub-blocks in ascending slot order
    pub sub_blocks: Vec<SubBlock>,
}

impl BlockData {
    /// Assemble a block and derive its hash from its sub-blocks.
    ///
    /// `sub_blocks` are sorted by slot.
    pub fn new(
        block_num: u64,
        previous_hash: Hash,
        block_owners: Vec<NodeId>,
        mut sub_blocks: Vec<SubBlock>,
    ) -> Self {
        sub_blocks.sort_by_key(|sb| sb.slot_index);
        let block_hash = Self::compute_hash(&previous_hash, &sub_blocks);
        Self {
            block_num,
            block_hash,
            previous_hash,
            block_owners,
            sub_blocks,
        }
    }

    /// The implicit genesis block
    pub fn genesis() -> Self {
        Self {
            block_num: 0,
            block_hash: Hash::ZERO,
            previous_hash: Hash::ZERO,
            block_owners: Vec::new(),
            sub_blocks: Vec::new(),
        }
    }

    /// Block hash over `previous_hash` and the sub-block roots, in the
    /// order given.
    pub fn compute_hash(previous_hash: &Hash, sub_blocks: &[SubBlock]) -> Hash {
        let mut parts: Vec<&[u8]> = Vec::with_capacity(sub_blocks.len() + 1);
        parts.push(previous_hash.as_slice());
        parts.extend(sub_blocks.iter().map(|sb| sb.merkle_root.as_slice()));
        Hash::compute_parts(&parts)
    }

    /// True if `block_hash` matches the sub-block contents and slots ascend
    pub fn verify_hash(&self) -> bool {
        let ascending = self
            .sub_blocks
            .windows(2)
            .all(|w| w[0].slot_index < w[1].slot_index);
        ascending && Self::compute_hash(&self.previous_hash, &self.sub_blocks) == self.block_hash
    }

    /// Index entry pointing at this block
    pub fn index_entry(&self) -> BlockIndexEntry {
        BlockIndexEntry {
            block_num: self.block_num,
            block_hash: self.block_hash,
            block_owners: self.block_owners.clone(),
        }
    }

    /// Iterate all transactions in slot then leaf order
    pub fn transactions(&self) -> impl Iterator<Item = &TransactionData> {
        self.sub_blocks.iter().flat_map(|sb| sb.transactions.iter())
    }

    /// Number of transactions across all sub-blocks
    pub fn tx_count(&self) -> usize {
        self.sub_blocks.iter().map(|sb| sb.transactions.len()).sum()
    }
}
