//! Network interface for catchup
//!
//! The coordinator and server talk to peers through [`CatchupNetwork`]. The
//! node wires in an implementation over its peer transport;
//! [`ChannelCatchupNetwork`] forwards onto an mpsc channel for tests and
//! for transports that pump messages from a queue.

use crate::protocol::CatchupMessage;
use async_trait::async_trait;
use quorumchain_types::NodeId;
use tokio::sync::mpsc;
use tracing::warn;

/// Channel capacity for catchup messages
pub const CATCHUP_CHANNEL_CAPACITY: usize = 256;

/// Outbound side of the catchup protocol
#[async_trait]
pub trait CatchupNetwork: Send + Sync {
    /// Best-effort send to every masternode except ourselves
    async fn broadcast(&self, message: CatchupMessage);

    /// Send to one peer
    async fn send_to(&self, peer: NodeId, message: CatchupMessage);
}

/// Message with target peer for outgoing messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingCatchupMessage {
    /// Target peer (None for broadcast)
    pub target_peer: Option<NodeId>,
    /// The catchup message to send
    pub message: CatchupMessage,
}

/// [`CatchupNetwork`] that queues outgoing messages on a channel
#[derive(Clone)]
pub struct ChannelCatchupNetwork {
    outgoing_tx: mpsc::Sender<OutgoingCatchupMessage>,
}

impl ChannelCatchupNetwork {
    /// Create the adapter and the receiving end for the transport
    pub fn new() -> (Self, mpsc::Receiver<OutgoingCatchupMessage>) {
        let (outgoing_tx, outgoing_rx) = mpsc::channel(CATCHUP_CHANNEL_CAPACITY);
        (Self { outgoing_tx }, outgoing_rx)
    }
}

#[async_trait]
impl CatchupNetwork for ChannelCatchupNetwork {
    async fn broadcast(&self, message: CatchupMessage) {
        let outgoing = OutgoingCatchupMessage {
            target_peer: None,
            message,
        };
        if self.outgoing_tx.send(outgoing).await.is_err() {
            warn!("Failed to broadcast catchup message - channel closed");
        }
    }

    async fn send_to(&self, peer: NodeId, message: CatchupMessage) {
        let outgoing = OutgoingCatchupMessage {
            target_peer: Some(peer),
            message,
        };
        if self.outgoing_tx.send(outgoing).await.is_err() {
            warn!("Failed to send catchup message - channel closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_and_broadcast_are_queued() {
        let (net, mut rx) = ChannelCatchupNetwork::new();
        let peer = NodeId::from_bytes([5; 32]);

        net.send_to(peer, CatchupMessage::BlockDataRequest { block_num: 3 })
            .await;
        net.broadcast(CatchupMessage::BlockIndexReply { indices: vec![] })
            .await;

        let first = rx.recv().await.unwrap();
        assert_eq!(first.target_peer, Some(peer));
        assert_eq!(first.message.kind(), "data_request");

        let second = rx.recv().await.unwrap();
        assert_eq!(second.target_peer, None);
    }

    #[tokio::test]
    async fn test_closed_channel_does_not_panic() {
        let (net, rx) = ChannelCatchupNetwork::new();
        drop(rx);
        net.broadcast(CatchupMessage::BlockDataRequest { block_num: 1 })
            .await;
    }
}
