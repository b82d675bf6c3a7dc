//! In-process peer transport
//!
//! Nodes running in one process exchange encoded [`PeerMessage`] frames
//! through a [`LocalHub`]. Each node registers an inbox and sends through a
//! [`HubNetwork`]. Point-to-point sends wait for inbox space; broadcasts are
//! best effort and drop frames for peers whose inbox is full.

use async_trait::async_trait;
use parking_lot::RwLock;
use quorumchain_consensus::{NodeNetwork, PeerMessage, PEER_CHANNEL_CAPACITY};
use quorumchain_metrics::consensus::CONSENSUS_DROPPED_MESSAGES;
use quorumchain_types::NodeId;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// Encoded frame with its sender
pub type Frame = (NodeId, Vec<u8>);

/// Router between in-process nodes
#[derive(Default)]
pub struct LocalHub {
    inboxes: RwLock<HashMap<NodeId, mpsc::Sender<Frame>>>,
    /// Nodes whose traffic is dropped in both directions
    partitioned: RwLock<HashSet<NodeId>>,
}

impl LocalHub {
    /// Create an empty hub
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register `node` and return its inbox. Re-registering replaces the
    /// previous inbox.
    pub fn register(&self, node: NodeId) -> mpsc::Receiver<Frame> {
        let (tx, rx) = mpsc::channel(PEER_CHANNEL_CAPACITY);
        self.inboxes.write().insert(node, tx);
        rx
    }

    /// Sending half for `node`
    pub fn network_for(self: &Arc<Self>, node: NodeId) -> HubNetwork {
        HubNetwork {
            local: node,
            hub: Arc::clone(self),
        }
    }

    /// Drop all traffic to and from `node`
    pub fn partition(&self, node: NodeId) {
        self.partitioned.write().insert(node);
    }

    /// Restore traffic for `node`
    pub fn heal(&self, node: NodeId) {
        self.partitioned.write().remove(&node);
    }

    /// Registered nodes
    pub fn nodes(&self) -> Vec<NodeId> {
        self.inboxes.read().keys().copied().collect()
    }

    fn route(&self, from: NodeId, to: NodeId) -> Option<mpsc::Sender<Frame>> {
        {
            let partitioned = self.partitioned.read();
            if partitioned.contains(&from) || partitioned.contains(&to) {
                return None;
            }
        }
        self.inboxes.read().get(&to).cloned()
    }

    fn routes_from(&self, from: NodeId) -> Vec<(NodeId, mpsc::Sender<Frame>)> {
        let partitioned = self.partitioned.read();
        if partitioned.contains(&from) {
            return Vec::new();
        }
        self.inboxes
            .read()
            .iter()
            .filter(|(id, _)| **id != from && !partitioned.contains(*id))
            .map(|(id, tx)| (*id, tx.clone()))
            .collect()
    }
}

/// [`NodeNetwork`] over a [`LocalHub`]
#[derive(Clone)]
pub struct HubNetwork {
    local: NodeId,
    hub: Arc<LocalHub>,
}

impl HubNetwork {
    fn encode(&self, message: &PeerMessage) -> Option<Vec<u8>> {
        match message.encode() {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!(kind = message.kind(), error = %e, "Failed to encode peer message");
                None
            }
        }
    }
}

#[async_trait]
impl NodeNetwork for HubNetwork {
    async fn broadcast(&self, message: PeerMessage) {
        let Some(bytes) = self.encode(&message) else {
            return;
        };
        for (peer, tx) in self.hub.routes_from(self.local) {
            if tx.try_send((self.local, bytes.clone())).is_err() {
                debug!(peer = %peer, kind = message.kind(), "Dropping broadcast to busy peer");
                CONSENSUS_DROPPED_MESSAGES
                    .with_label_values(&["backpressure"])
                    .inc();
            }
        }
    }

    async fn send_to(&self, peer: NodeId, message: PeerMessage) {
        let Some(tx) = self.hub.route(self.local, peer) else {
            trace!(peer = %peer, kind = message.kind(), "No route to peer");
            return;
        };
        let Some(bytes) = self.encode(&message) else {
            return;
        };
        if tx.send((self.local, bytes)).await.is_err() {
            debug!(peer = %peer, "Peer inbox closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quorumchain_sync::CatchupMessage;

    fn id(i: u8) -> NodeId {
        NodeId::from_bytes([i; 32])
    }

    fn request() -> PeerMessage {
        PeerMessage::Catchup(CatchupMessage::BlockDataRequest { block_num: 1 })
    }

    #[tokio::test]
    async fn test_broadcast_skips_sender() {
        let hub = LocalHub::new();
        let mut a = hub.register(id(1));
        let mut b = hub.register(id(2));
        let mut c = hub.register(id(3));

        hub.network_for(id(1)).broadcast(request()).await;

        assert!(a.try_recv().is_err());
        for inbox in [&mut b, &mut c] {
            let (from, bytes) = inbox.try_recv().unwrap();
            assert_eq!(from, id(1));
            assert_eq!(PeerMessage::decode(&bytes).unwrap(), request());
        }
    }

    #[tokio::test]
    async fn test_partition_drops_both_directions() {
        let hub = LocalHub::new();
        let mut a = hub.register(id(1));
        let mut b = hub.register(id(2));

        hub.partition(id(2));
        hub.network_for(id(1)).send_to(id(2), request()).await;
        hub.network_for(id(2)).broadcast(request()).await;
        assert!(a.try_recv().is_err());
        assert!(b.try_recv().is_err());

        hub.heal(id(2));
        hub.network_for(id(1)).send_to(id(2), request()).await;
        assert_eq!(b.try_recv().unwrap().0, id(1));
    }
}
