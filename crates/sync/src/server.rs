//! Catchup server: answers peers' index and block requests from the local
//! block store

use crate::error::Result;
use crate::metrics::CATCHUP_MESSAGES;
use crate::network::CatchupNetwork;
use crate::protocol::{CatchupMessage, MAX_INDEX_ENTRIES_PER_REPLY};
use quorumchain_storage::BlockStore;
use quorumchain_types::{Hash, NodeId};
use std::sync::Arc;
use tracing::{debug, trace};

/// Serves catchup requests
pub struct CatchupServer {
    local: NodeId,
    blocks: Arc<dyn BlockStore>,
    network: Arc<dyn CatchupNetwork>,
}

impl CatchupServer {
    /// Create a server over the local block store
    pub fn new(
        local: NodeId,
        blocks: Arc<dyn BlockStore>,
        network: Arc<dyn CatchupNetwork>,
    ) -> Self {
        Self {
            local,
            blocks,
            network,
        }
    }

    /// Dispatch a request; replies are ignored
    pub async fn handle(&self, from: NodeId, message: CatchupMessage) -> Result<()> {
        match message {
            CatchupMessage::BlockIndexRequest { block_hash, sender } => {
                if sender != from {
                    debug!(
                        from = %from,
                        claimed = %sender,
                        "Dropping index request with spoofed sender"
                    );
                    CATCHUP_MESSAGES
                        .with_label_values(&["index_request", "rejected"])
                        .inc();
                    return Ok(());
                }
                self.handle_index_request(from, block_hash).await
            }
            CatchupMessage::BlockDataRequest { block_num } => {
                self.handle_data_request(from, block_num).await
            }
            other => {
                trace!(kind = other.kind(), "Catchup server ignoring reply");
                Ok(())
            }
        }
    }

    /// Reply with every block above `block_hash`, newest first.
    ///
    /// An unknown hash gets an empty reply so the requester still counts
    /// this node towards its quorum.
    async fn handle_index_request(&self, from: NodeId, block_hash: Hash) -> Result<()> {
        if from == self.local {
            return Ok(());
        }
        let indices = match self.blocks.number_for_hash(&block_hash).await? {
            Some(block_num) => {
                let mut entries = self
                    .blocks
                    .index_entries_after(block_num, MAX_INDEX_ENTRIES_PER_REPLY)
                    .await?;
                entries.reverse();
                entries
            }
            None => {
                debug!(peer = %from, block_hash = %block_hash, "Index request for unknown block");
                Vec::new()
            }
        };

        debug!(peer = %from, entries = indices.len(), "Serving block index");
        CATCHUP_MESSAGES
            .with_label_values(&["index_request", "served"])
            .inc();
        self.network
            .send_to(from, CatchupMessage::BlockIndexReply { indices })
            .await;
        Ok(())
    }

    async fn handle_data_request(&self, from: NodeId, block_num: u64) -> Result<()> {
        if block_num == 0 {
            return Ok(());
        }
        match self.blocks.get_block_by_number(block_num).await? {
            Some(block) => {
                trace!(peer = %from, block_num, "Serving block data");
                CATCHUP_MESSAGES
                    .with_label_values(&["data_request", "served"])
                    .inc();
                self.network
                    .send_to(from, CatchupMessage::BlockDataReply(block))
                    .await;
            }
            None => {
                debug!(peer = %from, block_num, "Block data request for missing block");
                CATCHUP_MESSAGES
                    .with_label_values(&["data_request", "rejected"])
                    .inc();
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::ChannelCatchupNetwork;
    use quorumchain_storage::InMemoryStore;
    use quorumchain_types::{BlockData, SubBlock};

    fn id(i: u8) -> NodeId {
        NodeId::from_bytes([i; 32])
    }

    async fn store_with(len: u64) -> (Arc<InMemoryStore>, Vec<BlockData>) {
        let store = Arc::new(InMemoryStore::new());
        let mut prev = Hash::ZERO;
        let mut blocks = Vec::new();
        for n in 1..=len {
            let sub_block = SubBlock {
                slot_index: 0,
                input_hash: Hash::compute(&n.to_be_bytes()),
                merkle_root: Hash::compute(&n.to_le_bytes()),
                signer: id(10),
                signature: vec![],
                transactions: vec![],
            };
            let block = BlockData::new(n, prev, vec![id(1)], vec![sub_block]);
            prev = block.block_hash;
            store.put_block(block.clone()).await.unwrap();
            blocks.push(block);
        }
        (store, blocks)
    }

    #[tokio::test]
    async fn test_index_reply_is_newest_first() {
        let (store, blocks) = store_with(4).await;
        let (network, mut rx) = ChannelCatchupNetwork::new();
        let server = CatchupServer::new(id(1), store, Arc::new(network));

        server
            .handle(
                id(2),
                CatchupMessage::BlockIndexRequest {
                    block_hash: blocks[1].block_hash,
                    sender: id(2),
                },
            )
            .await
            .unwrap();

        let reply = rx.recv().await.unwrap();
        assert_eq!(reply.target_peer, Some(id(2)));
        let CatchupMessage::BlockIndexReply { indices } = reply.message else {
            panic!("expected index reply");
        };
        let nums: Vec<u64> = indices.iter().map(|e| e.block_num).collect();
        assert_eq!(nums, vec![4, 3]);
    }

    #[tokio::test]
    async fn test_genesis_request_returns_whole_chain() {
        let (store, _) = store_with(3).await;
        let (network, mut rx) = ChannelCatchupNetwork::new();
        let server = CatchupServer::new(id(1), store, Arc::new(network));

        server
            .handle(
                id(2),
                CatchupMessage::BlockIndexRequest {
                    block_hash: Hash::ZERO,
                    sender: id(2),
                },
            )
            .await
            .unwrap();
        let CatchupMessage::BlockIndexReply { indices } = rx.recv().await.unwrap().message else {
            panic!("expected index reply");
        };
        assert_eq!(indices.len(), 3);
        assert_eq!(indices[0].block_num, 3);
    }

    #[tokio::test]
    async fn test_unknown_hash_gets_empty_reply() {
        let (store, _) = store_with(2).await;
        let (network, mut rx) = ChannelCatchupNetwork::new();
        let server = CatchupServer::new(id(1), store, Arc::new(network));

        server
            .handle(
                id(2),
                CatchupMessage::BlockIndexRequest {
                    block_hash: Hash::compute(b"fork"),
                    sender: id(2),
                },
            )
            .await
            .unwrap();
        assert_eq!(
            rx.recv().await.unwrap().message,
            CatchupMessage::BlockIndexReply { indices: vec![] }
        );
    }

    #[tokio::test]
    async fn test_spoofed_sender_dropped() {
        let (store, _) = store_with(1).await;
        let (network, mut rx) = ChannelCatchupNetwork::new();
        let server = CatchupServer::new(id(1), store, Arc::new(network));

        server
            .handle(
                id(2),
                CatchupMessage::BlockIndexRequest {
                    block_hash: Hash::ZERO,
                    sender: id(3),
                },
            )
            .await
            .unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_data_request() {
        let (store, blocks) = store_with(2).await;
        let (network, mut rx) = ChannelCatchupNetwork::new();
        let server = CatchupServer::new(id(1), store, Arc::new(network));

        server
            .handle(id(3), CatchupMessage::BlockDataRequest { block_num: 2 })
            .await
            .unwrap();
        let reply = rx.recv().await.unwrap();
        assert_eq!(reply.target_peer, Some(id(3)));
        assert_eq!(reply.message, CatchupMessage::BlockDataReply(blocks[1].clone()));

        server
            .handle(id(3), CatchupMessage::BlockDataRequest { block_num: 9 })
            .await
            .unwrap();
        assert!(rx.try_recv().is_err());
    }
}
