//! Control messages between masternode consensus and the worker pool
//!
//! The worker pool itself (transaction execution) is external; this module
//! only defines the channel vocabulary.

use quorumchain_types::Hash;
use serde::{Deserialize, Serialize};

/// Commands from consensus to the worker pool
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerCommand {
    /// The previous round is settled; produce the next sub-block
    MakeNextSubBlock,

    /// Drop in-flight work and resume from the agreed input hashes
    DiscardAndRealign {
        /// Input hashes the quorum agreed on, in group order
        input_hashes: Vec<Hash>,
    },
}
