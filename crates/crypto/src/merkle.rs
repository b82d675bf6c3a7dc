//! Merkle trees over ordered leaf sequences.
//!
//! The tree is stored as a flat array of `2n - 1` hashes in heap layout:
//! the root is `nodes[0]`, the children of `i` are `2i + 1` and `2i + 2`,
//! and the `n` leaf hashes occupy the tail `nodes[n - 1..]`. Leaf counts
//! that are not a power of two need no padding; branches simply end at
//! different depths.
//!
//! Leaves are `H(raw_leaf)` and internal nodes are `H(left || right)`, both
//! SHA3-256.

use crate::error::CryptoError;
use quorumchain_types::Hash;

/// An immutable Merkle tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleTree {
    nodes: Vec<Hash>,
    /// Raw leaves, present only when built from raw data
    raw_leaves: Vec<Vec<u8>>,
}

impl MerkleTree {
    /// Build a tree over raw leaves.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::EmptyMerkleTree`] if `leaves` is empty.
    pub fn build<L: AsRef<[u8]>>(leaves: &[L]) -> Result<Self, CryptoError> {
        let hashes: Vec<Hash> = leaves.iter().map(|l| Hash::compute(l.as_ref())).collect();
        let mut tree = Self::from_leaf_hashes(hashes)?;
        tree.raw_leaves = leaves.iter().map(|l| l.as_ref().to_vec()).collect();
        Ok(tree)
    }

    /// Build a tree whose leaves are already hashed.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::EmptyMerkleTree`] if `hashes` is empty.
    pub fn from_leaf_hashes(hashes: Vec<Hash>) -> Result<Self, CryptoError> {
        let n = hashes.len();
        if n == 0 {
            return Err(CryptoError::EmptyMerkleTree);
        }

        let mut nodes = vec![Hash::ZERO; 2 * n - 1];
        nodes[n - 1..].copy_from_slice(&hashes);
        for i in (0..n - 1).rev() {
            nodes[i] = Hash::combine(&nodes[2 * i + 1], &nodes[2 * i + 2]);
        }

        Ok(Self {
            nodes,
            raw_leaves: Vec::new(),
        })
    }

    /// Root hash
    pub fn root(&self) -> Hash {
        self.nodes[0]
    }

    /// Number of leaves
    pub fn leaf_count(&self) -> usize {
        (self.nodes.len() + 1) / 2
    }

    /// Leaf hashes in input order
    pub fn leaves(&self) -> &[Hash] {
        &self.nodes[self.leaf_count() - 1..]
    }

    /// All node hashes in heap order
    pub fn nodes(&self) -> &[Hash] {
        &self.nodes
    }

    /// Raw payload behind a leaf hash.
    ///
    /// `None` when `hash` is not a leaf, or the tree was built from hashes.
    pub fn data_for_hash(&self, hash: &Hash) -> Option<&[u8]> {
        let idx = self.leaves().iter().position(|leaf| leaf == hash)?;
        self.raw_leaves.get(idx).map(Vec::as_slice)
    }
}

/// Rebuild a tree over `leaves` and compare against `claimed_root`.
///
/// Never fails: empty input simply does not verify.
pub fn verify_tree<L: AsRef<[u8]>>(leaves: &[L], claimed_root: &Hash) -> bool {
    MerkleTree::build(leaves)
        .map(|tree| tree.root() == *claimed_root)
        .unwrap_or(false)
}

/// [`verify_tree`] for already-hashed leaves
pub fn verify_tree_from_hashes(hashes: &[Hash], claimed_root: &Hash) -> bool {
    MerkleTree::from_leaf_hashes(hashes.to_vec())
        .map(|tree| tree.root() == *claimed_root)
        .unwrap_or(false)
}

/// Free-function form of [`MerkleTree::data_for_hash`]
pub fn data_for_hash<'a>(tree: &'a MerkleTree, hash: &Hash) -> Option<&'a [u8]> {
    tree.data_for_hash(hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_tree_rejected() {
        let leaves: Vec<Vec<u8>> = vec![];
        assert_eq!(MerkleTree::build(&leaves), Err(CryptoError::EmptyMerkleTree));
        assert!(!verify_tree(&leaves, &Hash::ZERO));
    }

    #[test]
    fn test_single_leaf_root_is_leaf_hash() {
        let tree = MerkleTree::build(&[b"only"]).unwrap();
        assert_eq!(tree.root(), Hash::compute(b"only"));
        assert_eq!(tree.nodes().len(), 1);
        assert_eq!(tree.leaf_count(), 1);
    }

    #[test]
    fn test_heap_layout_three_leaves() {
        let tree = MerkleTree::build(&[b"a", b"b", b"c"]).unwrap();
        let (a, b, c) = (Hash::compute(b"a"), Hash::compute(b"b"), Hash::compute(b"c"));

        // nodes: [root, n1, a, b, c]; n1 = H(a||b), root = H(n1||c)
        assert_eq!(tree.nodes().len(), 5);
        assert_eq!(tree.leaves(), &[a, b, c]);
        let n1 = Hash::combine(&a, &b);
        assert_eq!(tree.nodes()[1], n1);
        assert_eq!(tree.root(), Hash::combine(&n1, &c));
    }

    #[test]
    fn test_internal_node_invariant() {
        let leaves: Vec<Vec<u8>> = (0u8..7).map(|i| vec![i; 3]).collect();
        let tree = MerkleTree::build(&leaves).unwrap();
        let nodes = tree.nodes();
        for i in 0..tree.leaf_count() - 1 {
            assert_eq!(nodes[i], Hash::combine(&nodes[2 * i + 1], &nodes[2 * i + 2]));
        }
    }

    #[test]
    fn test_from_hashes_matches_build() {
        let leaves = [b"x".to_vec(), b"y".to_vec(), b"z".to_vec(), b"w".to_vec()];
        let built = MerkleTree::build(&leaves).unwrap();
        let hashed = MerkleTree::from_leaf_hashes(built.leaves().to_vec()).unwrap();
        assert_eq!(built.root(), hashed.root());
        assert!(verify_tree_from_hashes(built.leaves(), &built.root()));
    }

    #[test]
    fn test_data_for_hash() {
        let tree = MerkleTree::build(&[b"tx1", b"tx2"]).unwrap();
        assert_eq!(
            data_for_hash(&tree, &Hash::compute(b"tx2")),
            Some(b"tx2".as_slice())
        );
        // the root is not a leaf
        assert_eq!(tree.data_for_hash(&tree.root()), None);
        assert_eq!(tree.data_for_hash(&Hash::compute(b"missing")), None);
    }

    #[test]
    fn test_data_for_hash_without_raw_leaves() {
        let tree = MerkleTree::from_leaf_hashes(vec![Hash::compute(b"tx")]).unwrap();
        assert_eq!(tree.data_for_hash(&Hash::compute(b"tx")), None);
    }

    #[test]
    fn test_leaf_order_matters() {
        let ab = MerkleTree::build(&[b"a", b"b"]).unwrap();
        let ba = MerkleTree::build(&[b"b", b"a"]).unwrap();
        assert_ne!(ab.root(), ba.root());
    }
}
