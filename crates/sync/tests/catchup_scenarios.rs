//! End-to-end catchup: one lagging node against serving peers, with all
//! traffic pumped through channel networks.

use quorumchain_crypto::{
    Ed25519KeyPair, Ed25519SecretKey, Ed25519Signer, Ed25519Verifier, Signer,
};
use quorumchain_data_chain::SubBlockContender;
use quorumchain_storage::{BlockStore, InMemoryStore};
use quorumchain_sync::{
    CatchupConfig, CatchupCoordinator, CatchupMessage, CatchupServer, ChannelCatchupNetwork,
    CatchupTick, OutgoingCatchupMessage, MAX_INDEX_ENTRIES_PER_REPLY,
};
use quorumchain_types::{BlockData, Hash, NodeId, Roster, StateWrite, TransactionData};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn id(i: u8) -> NodeId {
    NodeId::from_bytes([i; 32])
}

/// Delegate signing worker slot `slot`
fn delegate(slot: u32) -> Ed25519Signer {
    let secret = Ed25519SecretKey::from_seed(&[20 + slot as u8; 32]);
    Ed25519Signer::new(Ed25519KeyPair::from_secret_key(secret))
}

fn roster(masternodes: u8, slots: u32) -> Arc<Roster> {
    let masternodes = (1..=masternodes).map(id).collect();
    let delegates = (0..slots).map(|slot| delegate(slot).node_id()).collect();
    Arc::new(Roster::new(masternodes, delegates, 2).unwrap())
}

fn build_chain(len: u64, slots: u32) -> Vec<BlockData> {
    let signers: Vec<Ed25519Signer> = (0..slots).map(delegate).collect();
    let mut prev = Hash::ZERO;
    let mut out = Vec::new();
    for n in 1..=len {
        let sub_blocks = signers
            .iter()
            .enumerate()
            .map(|(slot, signer)| {
                let key = format!("b{n}s{slot}").into_bytes();
                let tx = TransactionData::new(key.clone(), 0, vec![StateWrite::set(key, vec![1])]);
                let mut seed = n.to_be_bytes().to_vec();
                seed.push(slot as u8);
                let input_hash = Hash::compute(&seed);
                SubBlockContender::new(slot as u32, input_hash, vec![tx], prev, signer)
                    .to_sub_block()
            })
            .collect();
        let block = BlockData::new(n, prev, vec![id(2), id(3), id(4)], sub_blocks);
        prev = block.block_hash;
        out.push(block);
    }
    out
}

/// Lagging node 1 with its outgoing queue and (undriven) tick channel
struct Lagging {
    coordinator: CatchupCoordinator,
    outgoing: mpsc::Receiver<OutgoingCatchupMessage>,
    _ticks: mpsc::Receiver<CatchupTick>,
}

fn lagging(roster: Arc<Roster>, config: CatchupConfig, store: Arc<InMemoryStore>) -> Lagging {
    let (network, outgoing) = ChannelCatchupNetwork::new();
    let (ticks_tx, ticks) = mpsc::channel(16);
    let coordinator = CatchupCoordinator::new(
        id(1),
        roster,
        config,
        Arc::new(Ed25519Verifier),
        store.clone(),
        store,
        Arc::new(network),
        ticks_tx,
        CancellationToken::new(),
    )
    .unwrap();
    Lagging {
        coordinator,
        outgoing,
        _ticks: ticks,
    }
}

struct Peer {
    id: NodeId,
    server: CatchupServer,
    outgoing: mpsc::Receiver<OutgoingCatchupMessage>,
}

async fn serving_peer(node: NodeId, chain: &[BlockData]) -> Peer {
    let store = Arc::new(InMemoryStore::new());
    for block in chain {
        store.put_block(block.clone()).await.unwrap();
    }
    let (network, outgoing) = ChannelCatchupNetwork::new();
    Peer {
        id: node,
        server: CatchupServer::new(node, store, Arc::new(network)),
        outgoing,
    }
}

/// Deliver everything queued until no one has anything left to say
async fn pump(
    coordinator: &mut CatchupCoordinator,
    coordinator_out: &mut mpsc::Receiver<OutgoingCatchupMessage>,
    peers: &mut [Peer],
) {
    loop {
        let mut progressed = false;

        while let Ok(out) = coordinator_out.try_recv() {
            progressed = true;
            for peer in peers.iter() {
                if out.target_peer.is_none() || out.target_peer == Some(peer.id) {
                    peer.server.handle(id(1), out.message.clone()).await.unwrap();
                }
            }
        }

        for peer in peers.iter_mut() {
            while let Ok(reply) = peer.outgoing.try_recv() {
                progressed = true;
                assert_eq!(reply.target_peer, Some(id(1)));
                match reply.message {
                    CatchupMessage::BlockIndexReply { indices } => coordinator
                        .recv_block_index_reply(peer.id, indices)
                        .await
                        .unwrap(),
                    CatchupMessage::BlockDataReply(block) => {
                        coordinator.recv_block_data(peer.id, block).await.unwrap()
                    }
                    other => panic!("unexpected reply {other:?}"),
                }
            }
        }

        if !progressed {
            break;
        }
    }
}

#[tokio::test]
async fn test_lagging_node_catches_up_from_peers() {
    let chain = build_chain(12, 2);
    let mut peers = vec![
        serving_peer(id(2), &chain).await,
        serving_peer(id(3), &chain).await,
        serving_peer(id(4), &chain).await,
    ];

    let local_store = Arc::new(InMemoryStore::new());
    // already holds the first three blocks
    for block in &chain[..3] {
        local_store.put_block(block.clone()).await.unwrap();
    }

    let config = CatchupConfig {
        max_in_flight: 4,
        ..Default::default()
    };
    let mut node = lagging(roster(4, 2), config, local_store.clone());
    node.coordinator.run_catchup().await.unwrap();
    pump(&mut node.coordinator, &mut node.outgoing, &mut peers).await;

    assert!(node.coordinator.is_catchup_done());
    assert_eq!(node.coordinator.current_block(), (12, chain[11].block_hash));
    assert_eq!(local_store.block_count(), 12);
    assert_eq!(local_store.latest_block().await.unwrap(), chain[11]);
    // state only from the nine fetched blocks
    assert_eq!(local_store.state_len(), 18);
}

#[tokio::test]
async fn test_peers_behind_the_local_node_report_nothing_to_fetch() {
    let chain = build_chain(3, 1);
    let mut peers = vec![
        serving_peer(id(2), &chain[..1]).await,
        serving_peer(id(3), &chain[..1]).await,
    ];

    let local_store = Arc::new(InMemoryStore::new());
    for block in &chain {
        local_store.put_block(block.clone()).await.unwrap();
    }
    let mut node = lagging(roster(3, 1), CatchupConfig::default(), local_store);
    node.coordinator.run_catchup().await.unwrap();
    pump(&mut node.coordinator, &mut node.outgoing, &mut peers).await;

    // peers do not know our tip and reply empty; quorum of replies is enough
    assert!(node.coordinator.is_catchup_done());
    assert_eq!(node.coordinator.current_block().0, 3);
}

#[tokio::test]
async fn test_lag_beyond_one_index_page_catches_up_fully() {
    let len = MAX_INDEX_ENTRIES_PER_REPLY as u64 + 10;
    let chain = build_chain(len, 1);
    let mut peers = vec![
        serving_peer(id(2), &chain).await,
        serving_peer(id(3), &chain).await,
    ];

    let local_store = Arc::new(InMemoryStore::new());
    let config = CatchupConfig {
        max_in_flight: 64,
        ..Default::default()
    };
    let mut node = lagging(roster(3, 1), config, local_store.clone());
    node.coordinator.run_catchup().await.unwrap();
    let first_round = node.coordinator.attempt();
    pump(&mut node.coordinator, &mut node.outgoing, &mut peers).await;

    assert!(node.coordinator.is_catchup_done());
    assert_eq!(node.coordinator.current_block(), (len, chain[len as usize - 1].block_hash));
    assert_eq!(local_store.block_count(), len as usize);
    // a second index round picked up the blocks past the first page
    assert_eq!(node.coordinator.attempt(), first_round + 1);
}
