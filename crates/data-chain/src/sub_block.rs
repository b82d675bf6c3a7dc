//! Sub-block contenders produced by delegate workers
//!
//! A contender is one worker slot's executed transaction batch, signed by
//! the delegate that produced it. Masternodes collect one contender per slot
//! in the [`SubBlockAssembler`](crate::SubBlockAssembler).

use crate::error::{DclError, MAX_TRANSACTIONS_PER_SUB_BLOCK};
use quorumchain_crypto::{MerkleTree, NodeSignature, SignatureVerifier, Signer};
use quorumchain_types::{BlockData, Hash, Roster, SubBlock, TransactionData};
use serde::{Deserialize, Serialize};

/// A signed, executed batch for one worker slot
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubBlockContender {
    /// Worker slot (0-based, below `slots_per_block`)
    pub slot_index: u32,
    /// Hash of the raw input batch
    pub input_hash: Hash,
    /// Merkle root over `merkle_leaves`, or `input_hash` when empty
    pub result_hash: Hash,
    /// Leaf hashes, one per transaction
    pub merkle_leaves: Vec<Hash>,
    /// Executed transactions in leaf order
    pub transactions: Vec<TransactionData>,
    /// Delegate signature over [`signing_bytes`](Self::signing_bytes)
    pub signature: NodeSignature,
    /// Block this batch was executed on top of
    pub previous_block_hash: Hash,
}

impl SubBlockContender {
    /// Build and sign a contender from executed transactions
    pub fn new(
        slot_index: u32,
        input_hash: Hash,
        transactions: Vec<TransactionData>,
        previous_block_hash: Hash,
        signer: &dyn Signer,
    ) -> Self {
        let merkle_leaves: Vec<Hash> = transactions.iter().map(TransactionData::hash).collect();
        let result_hash = match MerkleTree::from_leaf_hashes(merkle_leaves.clone()) {
            Ok(tree) => tree.root(),
            Err(_) => input_hash,
        };

        let mut contender = Self {
            slot_index,
            input_hash,
            result_hash,
            merkle_leaves,
            transactions,
            signature: NodeSignature {
                signer: signer.node_id(),
                bytes: Vec::new(),
            },
            previous_block_hash,
        };
        contender.signature = signer.sign(&contender.signing_bytes());
        contender
    }

    /// Canonical bytes for signing
    ///
    /// Order: slot (4, BE) || input_hash (32) || result_hash (32) ||
    /// previous_block_hash (32) || leaf count (4, BE) || leaves (32 each)
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(104 + 32 * self.merkle_leaves.len());
        buf.extend_from_slice(&self.slot_index.to_be_bytes());
        buf.extend_from_slice(self.input_hash.as_bytes());
        buf.extend_from_slice(self.result_hash.as_bytes());
        buf.extend_from_slice(self.previous_block_hash.as_bytes());
        buf.extend_from_slice(&(self.merkle_leaves.len() as u32).to_be_bytes());
        for leaf in &self.merkle_leaves {
            buf.extend_from_slice(leaf.as_bytes());
        }
        buf
    }

    /// Check if this contender carries no transactions
    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    /// Validate signer, signature and Merkle commitment.
    ///
    /// Parent and slot-range checks belong to the caller, which knows the
    /// current block and slot count.
    pub fn validate(
        &self,
        verifier: &dyn SignatureVerifier,
        roster: &Roster,
    ) -> Result<(), DclError> {
        let signer = self.signature.signer;
        if !roster.is_delegate(&signer) {
            return Err(DclError::UnknownSigner { signer });
        }

        if self.transactions.len() > MAX_TRANSACTIONS_PER_SUB_BLOCK {
            return Err(DclError::TooManyTransactions {
                count: self.transactions.len(),
                max: MAX_TRANSACTIONS_PER_SUB_BLOCK,
            });
        }

        verifier
            .verify(&self.signing_bytes(), &self.signature)
            .map_err(|source| DclError::InvalidSignature { signer, source })?;

        let leaves_match = self.merkle_leaves.len() == self.transactions.len()
            && self
                .transactions
                .iter()
                .zip(&self.merkle_leaves)
                .all(|(tx, leaf)| tx.hash() == *leaf);
        if !leaves_match {
            return Err(DclError::LeafMismatch {
                slot: self.slot_index,
            });
        }

        match MerkleTree::from_leaf_hashes(self.merkle_leaves.clone()) {
            Ok(tree) if tree.root() != self.result_hash => Err(DclError::ResultHashMismatch {
                slot: self.slot_index,
                claimed: self.result_hash,
                computed: tree.root(),
            }),
            Ok(_) => Ok(()),
            Err(_) if self.result_hash != self.input_hash => Err(DclError::EmptyResultMismatch {
                slot: self.slot_index,
            }),
            Err(_) => Ok(()),
        }
    }

    /// Merkle tree over the canonical transaction bytes, `None` when empty
    pub fn merkle_tree(&self) -> Option<MerkleTree> {
        let raw: Vec<Vec<u8>> = self.transactions.iter().map(TransactionData::to_bytes).collect();
        MerkleTree::build(&raw).ok()
    }

    /// Transaction behind a leaf hash
    pub fn transaction_for_hash(&self, hash: &Hash) -> Option<&TransactionData> {
        self.merkle_leaves
            .iter()
            .position(|leaf| leaf == hash)
            .and_then(|idx| self.transactions.get(idx))
    }

    /// Rebuild the signed contender behind a stored sub-block.
    ///
    /// Leaves are recomputed from the stored transactions, so
    /// [`validate`](Self::validate) on the result checks the transactions
    /// against the signed Merkle root.
    pub fn from_sub_block(sub_block: &SubBlock, previous_block_hash: Hash) -> Self {
        Self {
            slot_index: sub_block.slot_index,
            input_hash: sub_block.input_hash,
            result_hash: sub_block.merkle_root,
            merkle_leaves: sub_block.transactions.iter().map(TransactionData::hash).collect(),
            transactions: sub_block.transactions.clone(),
            signature: NodeSignature {
                signer: sub_block.signer,
                bytes: sub_block.signature.clone(),
            },
            previous_block_hash,
        }
    }

    /// Storable form for inclusion in a committed block
    pub fn to_sub_block(&self) -> SubBlock {
        SubBlock {
            slot_index: self.slot_index,
            input_hash: self.input_hash,
            merkle_root: self.result_hash,
            signer: self.signature.signer,
            signature: self.signature.bytes.clone(),
            transactions: self.transactions.clone(),
        }
    }
}

/// Check every sub-block of a block received from a peer: delegate
/// signer, signature, and transactions against the signed Merkle root.
pub fn verify_block_sub_blocks(
    block: &BlockData,
    verifier: &dyn SignatureVerifier,
    roster: &Roster,
) -> Result<(), DclError> {
    for sub_block in &block.sub_blocks {
        SubBlockContender::from_sub_block(sub_block, block.previous_hash)
            .validate(verifier, roster)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use quorumchain_crypto::{Ed25519KeyPair, Ed25519Signer, Ed25519Verifier};
    use quorumchain_types::{NodeId, StateWrite};

    fn setup() -> (Ed25519Signer, Roster) {
        let signer = Ed25519Signer::new(Ed25519KeyPair::generate(&mut rand::thread_rng()));
        let roster = Roster::new(
            vec![NodeId::from_bytes([1; 32])],
            vec![signer.node_id()],
            1,
        )
        .unwrap();
        (signer, roster)
    }

    fn txs(n: u8) -> Vec<TransactionData> {
        (0..n)
            .map(|i| TransactionData::new(vec![i], 0, vec![StateWrite::set(vec![i], vec![i, i])]))
            .collect()
    }

    #[test]
    fn test_new_contender_validates() {
        let (signer, roster) = setup();
        let c = SubBlockContender::new(0, Hash::compute(b"in"), txs(3), Hash::ZERO, &signer);
        assert_eq!(c.merkle_leaves.len(), 3);
        assert_eq!(c.merkle_tree().unwrap().root(), c.result_hash);
        assert!(c.validate(&Ed25519Verifier, &roster).is_ok());
    }

    #[test]
    fn test_empty_contender_result_is_input() {
        let (signer, roster) = setup();
        let input = Hash::compute(b"empty batch");
        let c = SubBlockContender::new(1, input, vec![], Hash::ZERO, &signer);
        assert!(c.is_empty());
        assert_eq!(c.result_hash, input);
        assert!(c.merkle_tree().is_none());
        assert!(c.validate(&Ed25519Verifier, &roster).is_ok());
    }

    #[test]
    fn test_unknown_signer_rejected() {
        let (_, roster) = setup();
        let stranger = Ed25519Signer::new(Ed25519KeyPair::generate(&mut rand::thread_rng()));
        let c = SubBlockContender::new(0, Hash::ZERO, txs(1), Hash::ZERO, &stranger);
        let err = c.validate(&Ed25519Verifier, &roster).unwrap_err();
        assert!(matches!(err, DclError::UnknownSigner { .. }));
        assert!(err.is_byzantine());
    }

    #[test]
    fn test_tampered_result_hash_rejected() {
        let (signer, roster) = setup();
        let mut c = SubBlockContender::new(0, Hash::ZERO, txs(2), Hash::ZERO, &signer);
        c.result_hash = Hash::compute(b"forged");
        // signature covers result_hash, so verification fails first
        assert!(matches!(
            c.validate(&Ed25519Verifier, &roster),
            Err(DclError::InvalidSignature { .. })
        ));
    }

    #[test]
    fn test_swapped_transaction_rejected() {
        let (signer, roster) = setup();
        let mut c = SubBlockContender::new(0, Hash::ZERO, txs(2), Hash::ZERO, &signer);
        c.transactions[1].status = 1;
        assert_eq!(
            c.validate(&Ed25519Verifier, &roster),
            Err(DclError::LeafMismatch { slot: 0 })
        );
    }

    #[test]
    fn test_transaction_lookup_by_leaf() {
        let (signer, _) = setup();
        let c = SubBlockContender::new(0, Hash::ZERO, txs(3), Hash::ZERO, &signer);
        let leaf = c.merkle_leaves[2];
        assert_eq!(c.transaction_for_hash(&leaf), Some(&c.transactions[2]));
        assert_eq!(c.transaction_for_hash(&Hash::ZERO), None);

        let tree = c.merkle_tree().unwrap();
        assert_eq!(tree.data_for_hash(&leaf), Some(c.transactions[2].to_bytes().as_slice()));
    }

    #[test]
    fn test_to_sub_block() {
        let (signer, _) = setup();
        let c = SubBlockContender::new(4, Hash::compute(b"i"), txs(1), Hash::ZERO, &signer);
        let sb = c.to_sub_block();
        assert_eq!(sb.slot_index, 4);
        assert_eq!(sb.merkle_root, c.result_hash);
        assert_eq!(sb.signer, signer.node_id());
    }

    #[test]
    fn test_stored_sub_block_verifies_again() {
        let (signer, roster) = setup();
        let parent = Hash::compute(b"parent");
        let c = SubBlockContender::new(0, Hash::compute(b"i"), txs(2), parent, &signer);
        assert_eq!(SubBlockContender::from_sub_block(&c.to_sub_block(), parent), c);

        let empty = SubBlockContender::new(1, Hash::compute(b"e"), vec![], parent, &signer);
        let sub_blocks = vec![c.to_sub_block(), empty.to_sub_block()];
        let block = BlockData::new(1, parent, vec![], sub_blocks);
        assert!(verify_block_sub_blocks(&block, &Ed25519Verifier, &roster).is_ok());
    }

    #[test]
    fn test_block_with_rewritten_state_rejected() {
        let (signer, roster) = setup();
        let c = SubBlockContender::new(0, Hash::compute(b"i"), txs(2), Hash::ZERO, &signer);
        let mut block = BlockData::new(1, Hash::ZERO, vec![], vec![c.to_sub_block()]);
        block.sub_blocks[0].transactions[0].state_writes =
            vec![StateWrite::set(b"x".to_vec(), b"y".to_vec())];
        // the block hash only covers the root, so it still matches
        assert!(block.verify_hash());
        assert!(verify_block_sub_blocks(&block, &Ed25519Verifier, &roster).is_err());
    }

    #[test]
    fn test_block_from_unknown_delegate_rejected() {
        let (_, roster) = setup();
        let stranger = Ed25519Signer::new(Ed25519KeyPair::generate(&mut rand::thread_rng()));
        let c = SubBlockContender::new(0, Hash::ZERO, txs(1), Hash::ZERO, &stranger);
        let block = BlockData::new(1, Hash::ZERO, vec![], vec![c.to_sub_block()]);
        assert!(matches!(
            verify_block_sub_blocks(&block, &Ed25519Verifier, &roster),
            Err(DclError::UnknownSigner { .. })
        ));
    }
}
