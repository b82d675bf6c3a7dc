//! Peer wire envelope
//!
//! Everything masternodes exchange travels as one [`PeerMessage`]. Decoding
//! is bounded by [`MAX_MESSAGE_SIZE`].

use crate::error::{ConsensusError, MAX_MESSAGE_SIZE};
use bincode::Options;
use quorumchain_data_chain::SubBlockContender;
use quorumchain_sync::CatchupMessage;
use quorumchain_types::BlockNotification;
use serde::{Deserialize, Serialize};

/// A message between nodes
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerMessage {
    /// A delegate's signed sub-block for the running round
    SubBlockContender(SubBlockContender),
    /// A masternode's report of the next block
    BlockNotification(BlockNotification),
    /// Catchup request or reply
    Catchup(CatchupMessage),
}

impl PeerMessage {
    /// Short name for logs and metrics labels
    pub fn kind(&self) -> &'static str {
        match self {
            PeerMessage::SubBlockContender(_) => "sub_block",
            PeerMessage::BlockNotification(_) => "notification",
            PeerMessage::Catchup(msg) => msg.kind(),
        }
    }

    /// Encode for the wire
    pub fn encode(&self) -> Result<Vec<u8>, ConsensusError> {
        bincode_options()
            .serialize(self)
            .map_err(|e| ConsensusError::Codec(e.to_string()))
    }

    /// Decode from the wire, rejecting oversized input
    pub fn decode(bytes: &[u8]) -> Result<Self, ConsensusError> {
        if bytes.len() as u64 > MAX_MESSAGE_SIZE {
            return Err(ConsensusError::MessageTooLarge { size: bytes.len() });
        }
        bincode_options()
            .deserialize(bytes)
            .map_err(|e| ConsensusError::Codec(e.to_string()))
    }
}

/// Create bincode options with size limits for safe deserialization.
fn bincode_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_limit(MAX_MESSAGE_SIZE)
        .with_fixint_encoding()
        .allow_trailing_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use quorumchain_crypto::{Ed25519KeyPair, Ed25519Signer};
    use quorumchain_types::{Hash, NodeId, StateWrite, TransactionData};

    #[test]
    fn test_contender_survives_the_wire() {
        let signer = Ed25519Signer::new(Ed25519KeyPair::generate(&mut rand::thread_rng()));
        let write = StateWrite::set(b"a".to_vec(), b"1".to_vec());
        let tx = TransactionData::new(b"a=1".to_vec(), 0, vec![write]);
        let contender =
            SubBlockContender::new(2, Hash::compute(b"in"), vec![tx], Hash::ZERO, &signer);
        let msg = PeerMessage::SubBlockContender(contender);

        let decoded = PeerMessage::decode(&msg.encode().unwrap()).unwrap();
        assert_eq!(decoded, msg);
        assert_eq!(decoded.kind(), "sub_block");
    }

    #[test]
    fn test_catchup_kind_passes_through() {
        let msg = PeerMessage::Catchup(CatchupMessage::BlockIndexRequest {
            block_hash: Hash::ZERO,
            sender: NodeId::from_bytes([1; 32]),
        });
        assert_eq!(msg.kind(), "index_request");
    }

    #[test]
    fn test_truncated_input_rejected() {
        let msg = PeerMessage::Catchup(CatchupMessage::BlockDataRequest { block_num: 9 });
        let bytes = msg.encode().unwrap();
        assert!(matches!(
            PeerMessage::decode(&bytes[..bytes.len() - 1]),
            Err(ConsensusError::Codec(_))
        ));
    }

    #[test]
    fn test_huge_length_prefix_rejected() {
        // variant 2 (Catchup), variant 1 (BlockIndexReply), then a length
        // prefix claiming u64::MAX entries
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&2u32.to_le_bytes());
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&u64::MAX.to_le_bytes());
        assert!(PeerMessage::decode(&bytes).is_err());
    }
}
