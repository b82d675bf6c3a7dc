//! Sub-block assembly for masternodes
//!
//! Collects exactly one contender per worker slot and derives the block hash
//! once every slot is filled. Aggregation always walks slots in ascending
//! order, so the hash does not depend on arrival order.

use crate::error::DclError;
use crate::sub_block::SubBlockContender;
use quorumchain_types::{Hash, NodeId, SubBlock, TransactionData};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Result of inserting a contender
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// Slot was empty
    Inserted,
    /// Slot already held a contender, which was overwritten
    Replaced,
}

/// Sub-block assembler - one slot per worker
#[derive(Debug)]
pub struct SubBlockAssembler {
    slots_per_block: u32,
    slots: BTreeMap<u32, SubBlockContender>,
}

impl SubBlockAssembler {
    /// Create an assembler for `slots_per_block` worker slots
    pub fn new(slots_per_block: u32) -> Self {
        Self {
            slots_per_block,
            slots: BTreeMap::new(),
        }
    }

    /// Configured slot count
    pub fn slots_per_block(&self) -> u32 {
        self.slots_per_block
    }

    /// Store a contender at its slot.
    ///
    /// A second contender for a filled slot overwrites the first (last write
    /// wins) and is reported as [`AddOutcome::Replaced`].
    pub fn add_sub_block(&mut self, contender: SubBlockContender) -> Result<AddOutcome, DclError> {
        let slot = contender.slot_index;
        if slot >= self.slots_per_block {
            return Err(DclError::SlotOutOfRange {
                slot,
                slots_per_block: self.slots_per_block,
            });
        }

        match self.slots.insert(slot, contender) {
            Some(previous) => {
                warn!(
                    slot,
                    previous_signer = %previous.signature.signer,
                    previous_result = %previous.result_hash,
                    "Overwriting already-filled sub-block slot"
                );
                Ok(AddOutcome::Replaced)
            }
            None => {
                debug!(
                    slot,
                    filled = self.slots.len(),
                    required = self.slots_per_block,
                    "Sub-block slot filled"
                );
                Ok(AddOutcome::Inserted)
            }
        }
    }

    /// Number of filled slots
    pub fn filled(&self) -> usize {
        self.slots.len()
    }

    /// Transactions across all filled slots
    pub fn tx_count(&self) -> usize {
        self.slots.values().map(|c| c.transactions.len()).sum()
    }

    /// True iff every slot holds a contender
    pub fn is_quorum(&self) -> bool {
        self.slots.len() == self.slots_per_block as usize
    }

    /// `H(prev_hash || result_hash[0] || ... || result_hash[n-1])`.
    ///
    /// # Errors
    ///
    /// Returns [`DclError::IncompleteBlock`] unless [`is_quorum`](Self::is_quorum).
    pub fn compute_block_hash(&self, prev_hash: &Hash) -> Result<Hash, DclError> {
        if !self.is_quorum() {
            return Err(DclError::IncompleteBlock {
                filled: self.slots.len(),
                required: self.slots_per_block as usize,
            });
        }

        let mut parts: Vec<&[u8]> = Vec::with_capacity(self.slots.len() + 1);
        parts.push(prev_hash.as_slice());
        parts.extend(self.slots.values().map(|c| c.result_hash.as_slice()));
        Ok(Hash::compute_parts(&parts))
    }

    /// Clear every slot
    pub fn reset(&mut self) {
        self.slots.clear();
    }

    /// Input hashes in ascending slot order
    pub fn input_hashes(&self) -> Vec<Hash> {
        self.slots.values().map(|c| c.input_hash).collect()
    }

    /// Filled slot numbers in ascending order
    pub fn slot_numbers(&self) -> Vec<u32> {
        self.slots.keys().copied().collect()
    }

    /// Slots and input hashes grouped by signing delegate.
    ///
    /// Groups are ordered by their lowest slot. Returns the parallel arrays
    /// carried in a block notification.
    pub fn grouped_by_signer(&self) -> (Vec<Vec<u32>>, Vec<Vec<Hash>>) {
        let mut order: Vec<NodeId> = Vec::new();
        let mut groups: BTreeMap<NodeId, (Vec<u32>, Vec<Hash>)> = BTreeMap::new();
        for (slot, contender) in &self.slots {
            let signer = contender.signature.signer;
            let entry = groups.entry(signer).or_insert_with(|| {
                order.push(signer);
                (Vec::new(), Vec::new())
            });
            entry.0.push(*slot);
            entry.1.push(contender.input_hash);
        }

        order
            .iter()
            .filter_map(|signer| groups.remove(signer))
            .unzip()
    }

    /// Finalized sub-blocks in ascending slot order
    pub fn sub_blocks(&self) -> Vec<SubBlock> {
        self.slots.values().map(SubBlockContender::to_sub_block).collect()
    }

    /// Contender currently held for `slot`
    pub fn get(&self, slot: u32) -> Option<&SubBlockContender> {
        self.slots.get(&slot)
    }

    /// Look up a transaction by Merkle leaf hash across all slots
    pub fn transaction_for_hash(&self, hash: &Hash) -> Option<&TransactionData> {
        self.slots
            .values()
            .find_map(|c| c.transaction_for_hash(hash))
    }
}
