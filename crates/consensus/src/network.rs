//! Node network interface
//!
//! [`NodeNetwork`] is the transport seam: reliable point-to-point sends and
//! best-effort broadcast to the other masternodes. [`ChannelNodeNetwork`]
//! queues outgoing messages on an mpsc channel for an in-process transport.
//! [`CatchupOverNode`] lets the catchup coordinator share the same transport.

use crate::messages::PeerMessage;
use async_trait::async_trait;
use quorumchain_sync::{CatchupMessage, CatchupNetwork};
use quorumchain_types::NodeId;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;

/// Channel capacity for outgoing peer messages
pub const PEER_CHANNEL_CAPACITY: usize = 1024;

/// Outbound side of the peer transport
#[async_trait]
pub trait NodeNetwork: Send + Sync {
    /// Send to every peer except ourselves
    async fn broadcast(&self, message: PeerMessage);

    /// Send to one peer
    async fn send_to(&self, peer: NodeId, message: PeerMessage);
}

/// Message with target peer for outgoing messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingPeerMessage {
    /// Target peer (None for broadcast)
    pub target_peer: Option<NodeId>,
    /// The message to send
    pub message: PeerMessage,
}

/// [`NodeNetwork`] that queues outgoing messages on a channel
#[derive(Clone)]
pub struct ChannelNodeNetwork {
    outgoing_tx: mpsc::Sender<OutgoingPeerMessage>,
}

impl ChannelNodeNetwork {
    /// Create the adapter and the receiving end for the transport
    pub fn new() -> (Self, mpsc::Receiver<OutgoingPeerMessage>) {
        let (outgoing_tx, outgoing_rx) = mpsc::channel(PEER_CHANNEL_CAPACITY);
        (Self { outgoing_tx }, outgoing_rx)
    }
}

#[async_trait]
impl NodeNetwork for ChannelNodeNetwork {
    async fn broadcast(&self, message: PeerMessage) {
        let outgoing = OutgoingPeerMessage {
            target_peer: None,
            message,
        };
        if self.outgoing_tx.send(outgoing).await.is_err() {
            warn!("Failed to broadcast peer message - channel closed");
        }
    }

    async fn send_to(&self, peer: NodeId, message: PeerMessage) {
        let outgoing = OutgoingPeerMessage {
            target_peer: Some(peer),
            message,
        };
        if self.outgoing_tx.send(outgoing).await.is_err() {
            warn!("Failed to send peer message - channel closed");
        }
    }
}

/// Catchup traffic carried as [`PeerMessage::Catchup`]
pub struct CatchupOverNode {
    inner: Arc<dyn NodeNetwork>,
}

impl CatchupOverNode {
    /// Wrap the node transport
    pub fn new(inner: Arc<dyn NodeNetwork>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl CatchupNetwork for CatchupOverNode {
    async fn broadcast(&self, message: CatchupMessage) {
        self.inner.broadcast(PeerMessage::Catchup(message)).await;
    }

    async fn send_to(&self, peer: NodeId, message: CatchupMessage) {
        self.inner.send_to(peer, PeerMessage::Catchup(message)).await;
    }
}
