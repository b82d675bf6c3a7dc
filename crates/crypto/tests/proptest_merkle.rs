//! Property-based tests for the Merkle engine
//!
//! Uses proptest to check round-trip and tamper detection across many
//! randomly generated leaf sequences.

use proptest::prelude::*;
use quorumchain_crypto::merkle::{verify_tree, MerkleTree};
use quorumchain_types::Hash;

fn leaves_strategy() -> impl Strategy<Value = Vec<Vec<u8>>> {
    prop::collection::vec(prop::collection::vec(any::<u8>(), 1..64), 1..40)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    /// Property: a tree always verifies against its own root
    #[test]
    fn prop_build_then_verify(leaves in leaves_strategy()) {
        let tree = MerkleTree::build(&leaves).unwrap();
        prop_assert!(verify_tree(&leaves, &tree.root()));
        prop_assert_eq!(tree.nodes().len(), 2 * leaves.len() - 1);
    }

    /// Property: flipping any single byte of any leaf changes the root
    #[test]
    fn prop_single_byte_mutation_fails(
        leaves in leaves_strategy(),
        leaf_pick in any::<prop::sample::Index>(),
        byte_pick in any::<prop::sample::Index>(),
        flip in 1u8..=255,
    ) {
        let root = MerkleTree::build(&leaves).unwrap().root();

        let mut mutated = leaves.clone();
        let leaf = leaf_pick.index(mutated.len());
        let byte = byte_pick.index(mutated[leaf].len());
        mutated[leaf][byte] ^= flip;

        prop_assert!(!verify_tree(&mutated, &root));
    }

    /// Property: every raw leaf is recoverable from its hash
    #[test]
    fn prop_data_for_hash_recovers_leaves(leaves in leaves_strategy()) {
        let tree = MerkleTree::build(&leaves).unwrap();
        for leaf in &leaves {
            let found = tree.data_for_hash(&Hash::compute(leaf));
            prop_assert_eq!(found, Some(leaf.as_slice()));
        }
    }
}
