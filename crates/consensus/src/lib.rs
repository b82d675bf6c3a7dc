//! Masternode block consensus.
//!
//! Masternodes collect one signed sub-block per worker slot, announce the
//! block they assembled, and commit once a quorum of masternodes announced
//! the same block. A node that finds the cluster ahead of it switches to
//! catchup and resumes production when it has caught up.
//!
//! # Key Types
//!
//! - [`ConsensusDriver`]: per-node round state machine
//! - [`BlockNotificationTracker`]: quorum counting over block notifications
//! - [`PeerMessage`]: wire envelope for everything masternodes exchange
//! - [`NodeNetwork`]: outbound transport seam

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

pub mod config;
pub mod driver;
pub mod error;
pub mod messages;
pub mod network;
pub mod notification_tracker;

pub use config::ConsensusConfig;
pub use driver::{ConsensusDriver, DriverContext};
pub use error::{ConsensusError, DriverError, MAX_MESSAGE_SIZE};
pub use messages::PeerMessage;
pub use network::{
    CatchupOverNode, ChannelNodeNetwork, NodeNetwork, OutgoingPeerMessage, PEER_CHANNEL_CAPACITY,
};
pub use notification_tracker::{BlockNotificationTracker, DecidedBlock, RecordKey};
