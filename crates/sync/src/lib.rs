//! Block catchup for quorumchain
//!
//! Brings a masternode that is behind (or just started) up to the chain its
//! peers agree on: index discovery by quorum, then ordered block fetch and
//! apply. Also serves the same protocol to other lagging nodes.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod catchup;
pub mod config;
pub mod error;
pub mod metrics;
pub mod network;
pub mod protocol;
pub mod server;
pub mod watchdog;

pub use catchup::{CatchupCoordinator, CatchupPhase};
pub use config::CatchupConfig;
pub use error::{Result, SyncError};
pub use network::{
    CatchupNetwork, ChannelCatchupNetwork, OutgoingCatchupMessage, CATCHUP_CHANNEL_CAPACITY,
};
pub use protocol::{CatchupMessage, MAX_INDEX_ENTRIES_PER_REPLY};
pub use server::CatchupServer;
pub use watchdog::{spawn_watchdog, CatchupTick, WatchdogHandle};
