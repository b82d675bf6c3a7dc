//! Integration tests for delegate-built sub-blocks flowing into the assembler
//!
//! Delegates build and sign contenders independently; a masternode validates
//! and assembles them. The block hash must not depend on arrival order.

use proptest::prelude::*;
use quorumchain_crypto::{Ed25519KeyPair, Ed25519SecretKey, Ed25519Signer, Ed25519Verifier, Signer};
use quorumchain_data_chain::{
    KeyValueExecutor, SubBlockAssembler, SubBlockBuilder, SubBlockContender,
};
use quorumchain_types::{BlockData, Hash, NodeId, Roster};
use std::sync::Arc;

const SLOTS: u32 = 4;

fn delegate(seed: u8) -> Arc<Ed25519Signer> {
    Arc::new(Ed25519Signer::new(Ed25519KeyPair::from_secret_key(
        Ed25519SecretKey::from_seed(&[seed; 32]),
    )))
}

fn build_round(prev: Hash) -> (Roster, Vec<SubBlockContender>) {
    let signers: Vec<_> = (0..SLOTS as u8).map(|i| delegate(i + 1)).collect();
    let roster = Roster::new(
        vec![NodeId::from_bytes([0xaa; 32])],
        signers.iter().map(|s| s.node_id()).collect(),
        1,
    )
    .unwrap();

    let contenders = signers
        .iter()
        .enumerate()
        .map(|(slot, signer)| {
            let mut builder =
                SubBlockBuilder::new(slot as u32, 16, signer.clone(), Arc::new(KeyValueExecutor));
            for i in 0..slot {
                builder.add_transaction(format!("key{slot}_{i}=v{i}").into_bytes());
            }
            builder.build(prev)
        })
        .collect();
    (roster, contenders)
}

#[test]
fn test_validated_contenders_assemble_into_block() {
    let prev = Hash::compute(b"genesis-child");
    let (roster, contenders) = build_round(prev);

    let mut asm = SubBlockAssembler::new(SLOTS);
    for c in &contenders {
        c.validate(&Ed25519Verifier, &roster).unwrap();
        asm.add_sub_block(c.clone()).unwrap();
    }
    assert!(asm.is_quorum());

    // slot 0 had no transactions
    assert_eq!(asm.get(0).unwrap().result_hash, asm.get(0).unwrap().input_hash);

    let hash = asm.compute_block_hash(&prev).unwrap();
    let block = BlockData::new(1, prev, vec![], asm.sub_blocks());
    assert_eq!(block.block_hash, hash);
    assert!(block.verify_hash());
    assert_eq!(block.tx_count(), 6);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Property: any permutation of arrivals yields the same block hash
    #[test]
    fn prop_block_hash_independent_of_arrival(
        order in Just((0..SLOTS as usize).collect::<Vec<_>>()).prop_shuffle()
    ) {
        let prev = Hash::compute(b"prev");
        let (_, contenders) = build_round(prev);

        let mut in_order = SubBlockAssembler::new(SLOTS);
        for c in &contenders {
            in_order.add_sub_block(c.clone()).unwrap();
        }

        let mut shuffled = SubBlockAssembler::new(SLOTS);
        for idx in &order {
            shuffled.add_sub_block(contenders[*idx].clone()).unwrap();
        }

        prop_assert_eq!(
            in_order.compute_block_hash(&prev).unwrap(),
            shuffled.compute_block_hash(&prev).unwrap()
        );
    }
}
