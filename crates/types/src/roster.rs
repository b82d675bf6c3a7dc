//! Membership roster.
//!
//! The roster is the authoritative list of masternodes and delegates and the
//! source of every quorum threshold in the system. It is fixed for the life
//! of a node process.

use crate::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

/// Errors from building a roster
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RosterError {
    /// No masternodes listed
    #[error("roster has no masternodes")]
    NoMasternodes,

    /// No delegates listed
    #[error("roster has no delegates")]
    NoDelegates,

    /// The same id appears twice in one role
    #[error("duplicate node id in roster: {0}")]
    DuplicateNode(NodeId),

    /// quorum_min of zero can never be satisfied meaningfully
    #[error("quorum_min must be at least 1")]
    ZeroQuorumMin,
}

/// Masternodes, delegates and the minimum catchup quorum
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roster {
    masternodes: Vec<NodeId>,
    delegates: Vec<NodeId>,
    quorum_min: usize,
}

impl Roster {
    /// Create a roster.
    ///
    /// # Errors
    ///
    /// Returns an error if either role is empty, if an id is listed twice
    /// within a role, or if `quorum_min` is zero.
    pub fn new(
        masternodes: Vec<NodeId>,
        delegates: Vec<NodeId>,
        quorum_min: usize,
    ) -> Result<Self, RosterError> {
        if masternodes.is_empty() {
            return Err(RosterError::NoMasternodes);
        }
        if delegates.is_empty() {
            return Err(RosterError::NoDelegates);
        }
        if quorum_min == 0 {
            return Err(RosterError::ZeroQuorumMin);
        }
        for list in [&masternodes, &delegates] {
            let mut seen = HashSet::with_capacity(list.len());
            for id in list {
                if !seen.insert(id) {
                    return Err(RosterError::DuplicateNode(*id));
                }
            }
        }

        Ok(Self {
            masternodes,
            delegates,
            quorum_min,
        })
    }

    /// Masternode ids in roster order
    pub fn masternodes(&self) -> &[NodeId] {
        &self.masternodes
    }

    /// Delegate ids in roster order
    pub fn delegates(&self) -> &[NodeId] {
        &self.delegates
    }

    /// Configured minimum quorum
    pub fn quorum_min(&self) -> usize {
        self.quorum_min
    }

    /// Number of masternodes
    pub fn cluster_size(&self) -> usize {
        self.masternodes.len()
    }

    /// Check if `id` is a masternode
    pub fn is_masternode(&self, id: &NodeId) -> bool {
        self.masternodes.contains(id)
    }

    /// Check if `id` is a delegate
    pub fn is_delegate(&self, id: &NodeId) -> bool {
        self.delegates.contains(id)
    }

    /// Senders required for a `New` notification to reach quorum: a simple
    /// majority of masternodes.
    pub fn new_block_quorum(&self) -> usize {
        self.cluster_size() / 2 + 1
    }

    /// Senders required for a `Failed` notification to reach quorum.
    ///
    /// `new + failed > n`, so the two kinds can never both reach quorum in
    /// the same round.
    pub fn failed_block_quorum(&self) -> usize {
        self.cluster_size() - self.new_block_quorum() + 1
    }

    /// Distinct index replies a catchup round needs.
    ///
    /// Capped by the number of masternodes other than `local`, since a node
    /// never answers its own index request. Never below 1.
    pub fn catchup_quorum(&self, local: &NodeId) -> usize {
        let peers = self.masternodes.iter().filter(|id| *id != local).count();
        self.quorum_min.min(peers).max(1)
    }
}
