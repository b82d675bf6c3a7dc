//! quorumchain node
//!
//! Runs one masternode: the consensus driver, the delegate workers for the
//! slots this node produces, and the catchup server, all under a
//! [`NodeSupervisor`]. Peers are reached through a [`NodeNetwork`]
//! implementation; [`LocalHub`] connects nodes inside one process.
//!
//! [`NodeNetwork`]: quorumchain_consensus::NodeNetwork

pub mod config;
pub mod hub;
pub mod node;
pub mod supervisor;

pub use config::{
    generate_local_configs, NodeConfig, DEFAULT_BATCH_INTERVAL_MS, DEFAULT_CONFIG_FILE,
    DEFAULT_HOME_DIR, DEFAULT_MAX_TXS_PER_SUB_BLOCK, DEFAULT_METRICS_PORT, QUORUMD_HOME_ENV,
};
pub use hub::{Frame, HubNetwork, LocalHub};
pub use node::{Node, NodeHandle};
pub use supervisor::{NodeSupervisor, ShutdownError, SupervisedResult};
