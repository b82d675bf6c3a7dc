//! Node configuration
//!
//! A node is configured by one JSON file holding its Ed25519 secret, the
//! cluster roster and the consensus and catchup settings. Keys are stored
//! in plaintext hex; keystore management is out of scope.

use anyhow::Context;
use quorumchain_consensus::ConsensusConfig;
use quorumchain_crypto::{Ed25519KeyPair, Ed25519SecretKey};
use quorumchain_sync::CatchupConfig;
use quorumchain_types::{NodeId, Roster};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable for home directory override.
///
/// ```bash
/// export QUORUMD_HOME=/var/lib/quorumd
/// quorumd start
/// ```
pub const QUORUMD_HOME_ENV: &str = "QUORUMD_HOME";

/// Default home directory name (relative to the user's home directory).
pub const DEFAULT_HOME_DIR: &str = ".quorumd";

/// Config file location relative to the home directory.
pub const DEFAULT_CONFIG_FILE: &str = "config/node.json";

/// Default metrics port
pub const DEFAULT_METRICS_PORT: u16 = 9100;

/// Default pause before a delegate seals a partial batch (ms)
pub const DEFAULT_BATCH_INTERVAL_MS: u64 = 200;

/// Default maximum transactions per sub-block
pub const DEFAULT_MAX_TXS_PER_SUB_BLOCK: usize = 256;

fn default_batch_interval_ms() -> u64 {
    DEFAULT_BATCH_INTERVAL_MS
}

fn default_max_txs_per_sub_block() -> usize {
    DEFAULT_MAX_TXS_PER_SUB_BLOCK
}

/// Node configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Ed25519 secret key (hex encoded); the node id is its public key
    pub secret_key_hex: String,

    /// Masternodes, in roster order
    pub masternodes: Vec<NodeId>,

    /// Delegates, in roster order. Slot `s` is produced by
    /// `delegates[s % delegates.len()]`.
    pub delegates: Vec<NodeId>,

    /// Minimum index replies a catchup round waits for
    pub quorum_min: usize,

    /// Round settings
    #[serde(default)]
    pub consensus: ConsensusConfig,

    /// Catchup timeouts and window
    #[serde(default)]
    pub catchup: CatchupConfig,

    /// How long a delegate waits for transactions before sealing (ms)
    #[serde(default = "default_batch_interval_ms")]
    pub batch_interval_ms: u64,

    /// Maximum transactions per sub-block
    #[serde(default = "default_max_txs_per_sub_block")]
    pub max_txs_per_sub_block: usize,

    /// Prometheus listen address; metrics are off when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics_addr: Option<SocketAddr>,

    /// Home directory (e.g., ~/.quorumd)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home_dir: Option<PathBuf>,
}

impl NodeConfig {
    /// Config for a fresh single-node cluster with a new key.
    ///
    /// The node is the only masternode and the only delegate.
    pub fn single_node() -> Self {
        let mut configs = generate_local_configs(1);
        configs.swap_remove(0)
    }

    /// Ed25519 key pair from `secret_key_hex`
    pub fn keypair(&self) -> anyhow::Result<Ed25519KeyPair> {
        let secret = Ed25519SecretKey::from_hex(&self.secret_key_hex)
            .context("invalid secret_key_hex")?;
        Ok(Ed25519KeyPair::from_secret_key(secret))
    }

    /// This node's id
    pub fn node_id(&self) -> anyhow::Result<NodeId> {
        Ok(self.keypair()?.node_id())
    }

    /// Build the cluster roster
    pub fn roster(&self) -> anyhow::Result<Roster> {
        Roster::new(
            self.masternodes.clone(),
            self.delegates.clone(),
            self.quorum_min,
        )
        .context("invalid roster")
    }

    /// Delegate batch interval
    pub fn batch_interval(&self) -> Duration {
        Duration::from_millis(self.batch_interval_ms)
    }

    /// Slots this node produces sub-blocks for
    pub fn local_slots(&self) -> anyhow::Result<Vec<u32>> {
        let local = self.node_id()?;
        if self.delegates.is_empty() {
            return Ok(Vec::new());
        }
        Ok((0..self.consensus.slots_per_block)
            .filter(|slot| self.delegates[*slot as usize % self.delegates.len()] == local)
            .collect())
    }

    /// Check the config can run a node
    pub fn validate(&self) -> anyhow::Result<()> {
        let local = self.node_id()?;
        let roster = self.roster()?;
        if !roster.is_masternode(&local) {
            anyhow::bail!("node {} is not in the masternode list", local);
        }
        self.consensus.validate()?;
        self.catchup.validate()?;
        if self.max_txs_per_sub_block == 0 {
            anyhow::bail!("max_txs_per_sub_block must be positive");
        }
        Ok(())
    }

    /// Save config to file
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }

    /// Load config from file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: Self = serde_json::from_str(&json)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(config)
    }
}

/// Generate configs for an `n`-masternode local cluster.
///
/// Every masternode is also a delegate, and there is one slot per node.
pub fn generate_local_configs(n: usize) -> Vec<NodeConfig> {
    let keys: Vec<Ed25519KeyPair> = (0..n)
        .map(|_| Ed25519KeyPair::generate(&mut rand::thread_rng()))
        .collect();
    let ids: Vec<NodeId> = keys.iter().map(Ed25519KeyPair::node_id).collect();
    let quorum_min = (n / 2 + 1).min(n.saturating_sub(1)).max(1);

    keys.iter()
        .map(|key| NodeConfig {
            secret_key_hex: key.secret_key.to_hex(),
            masternodes: ids.clone(),
            delegates: ids.clone(),
            quorum_min,
            consensus: ConsensusConfig::new(n.max(1) as u32),
            catchup: CatchupConfig::default(),
            batch_interval_ms: DEFAULT_BATCH_INTERVAL_MS,
            max_txs_per_sub_block: DEFAULT_MAX_TXS_PER_SUB_BLOCK,
            metrics_addr: None,
            home_dir: None,
        })
        .collect()
}
