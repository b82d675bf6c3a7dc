//! Node runner: ties the consensus driver, delegate workers and transport
//! together.
//!
//! # Tasks
//!
//! - `event-loop` (critical): owns the [`ConsensusDriver`] and handles one
//!   event at a time. A fatal driver error stops the node.
//! - `worker-fanout`: copies driver commands to every local delegate.
//! - `delegate`: one per slot this node produces, see [`run_delegate`].
//! - `metrics`: Prometheus endpoint, when configured.

use crate::config::NodeConfig;
use crate::hub::{Frame, LocalHub};
use crate::supervisor::NodeSupervisor;
use anyhow::{Context, Result};
use quorumchain_consensus::{ConsensusDriver, DriverContext, NodeNetwork, PeerMessage};
use quorumchain_crypto::{Ed25519Signer, Ed25519Verifier, Signer};
use quorumchain_data_chain::{
    run_delegate, KeyValueExecutor, SubBlockBuilder, SubBlockContender, WorkerCommand,
};
use quorumchain_metrics::consensus::CONSENSUS_DROPPED_MESSAGES;
use quorumchain_storage::{BlockStore, InMemoryStore, StateStore};
use quorumchain_sync::CatchupTick;
use quorumchain_types::{Hash, NodeId, Roster};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Capacity of the driver-to-worker command channel
const WORKER_COMMAND_CAPACITY: usize = 64;
/// Capacity of each delegate's transaction queue
const TRANSACTION_CAPACITY: usize = 10_000;
/// Capacity of the catchup tick channel
const TICK_CAPACITY: usize = 16;

/// A configured masternode, ready to spawn
pub struct Node {
    config: NodeConfig,
    signer: Arc<Ed25519Signer>,
    local: NodeId,
    roster: Arc<Roster>,
    blocks: Arc<dyn BlockStore>,
    state: Arc<dyn StateStore>,
}

/// Client side of a running node
#[derive(Clone)]
pub struct NodeHandle {
    id: NodeId,
    transactions: Vec<mpsc::Sender<Vec<u8>>>,
    next_delegate: Arc<AtomicUsize>,
    status: watch::Receiver<(u64, Hash)>,
}

impl NodeHandle {
    /// This node's id
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Queue a transaction payload on one of this node's delegate slots
    pub async fn submit_transaction(&self, payload: Vec<u8>) -> Result<()> {
        if self.transactions.is_empty() {
            anyhow::bail!("node {} produces no sub-block slots", self.id.short());
        }
        let index = self.next_delegate.fetch_add(1, Ordering::Relaxed) % self.transactions.len();
        self.transactions[index]
            .send(payload)
            .await
            .context("delegate worker stopped")
    }

    /// Latest committed block, as (number, hash)
    pub fn current_block(&self) -> (u64, Hash) {
        *self.status.borrow()
    }

    /// Wait until the node has committed at least `block_num`
    pub async fn wait_for_block(&mut self, block_num: u64) -> Result<(u64, Hash)> {
        let status = self
            .status
            .wait_for(|(num, _)| *num >= block_num)
            .await
            .context("node stopped")?;
        Ok(*status)
    }
}

impl Node {
    /// Create a node with in-memory storage
    pub fn new(config: NodeConfig) -> Result<Self> {
        let store = Arc::new(InMemoryStore::new());
        Self::with_stores(config, store.clone(), store)
    }

    /// Create a node over the given stores
    pub fn with_stores(
        config: NodeConfig,
        blocks: Arc<dyn BlockStore>,
        state: Arc<dyn StateStore>,
    ) -> Result<Self> {
        config.validate()?;
        let signer = Arc::new(Ed25519Signer::new(config.keypair()?));
        let local = signer.node_id();
        let roster = Arc::new(config.roster()?);
        Ok(Self {
            config,
            signer,
            local,
            roster,
            blocks,
            state,
        })
    }

    /// This node's id
    pub fn id(&self) -> NodeId {
        self.local
    }

    /// Run a single node until Ctrl+C or a fatal error
    pub async fn run(self) -> Result<()> {
        let hub = LocalHub::new();
        let inbox = hub.register(self.local);
        let network = Arc::new(hub.network_for(self.local));
        let supervisor = NodeSupervisor::new();

        if let Some(addr) = self.config.metrics_addr {
            quorumchain_metrics::init();
            supervisor.spawn_cancellable("metrics", move |token| async move {
                quorumchain_metrics::start_metrics_server(addr, token)
                    .await
                    .context("metrics server failed")
            });
        }

        self.spawn(network, inbox, &supervisor)?;

        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("Received Ctrl+C"),
            _ = supervisor.cancelled() => {}
        }
        let failed = supervisor.has_failed();
        supervisor.shutdown().await?;
        if failed {
            anyhow::bail!("node stopped after a critical task failed");
        }
        Ok(())
    }

    /// Spawn the node's tasks under `supervisor`.
    ///
    /// `inbox` receives encoded frames from peers; `network` sends to them.
    pub fn spawn(
        self,
        network: Arc<dyn NodeNetwork>,
        inbox: mpsc::Receiver<Frame>,
        supervisor: &NodeSupervisor,
    ) -> Result<NodeHandle> {
        let slots = self.config.local_slots()?;
        info!(
            node = %self.local,
            masternodes = self.roster.masternodes().len(),
            delegates = self.roster.delegates().len(),
            slots = ?slots,
            "Starting node"
        );

        let (worker_tx, worker_rx) = mpsc::channel(WORKER_COMMAND_CAPACITY);
        let (tick_tx, tick_rx) = mpsc::channel(TICK_CAPACITY);
        let (contender_tx, contender_rx) = mpsc::channel(WORKER_COMMAND_CAPACITY);
        let (status_tx, status_rx) = watch::channel((0, Hash::ZERO));

        let driver = ConsensusDriver::new(DriverContext {
            local: self.local,
            roster: self.roster.clone(),
            config: self.config.consensus.clone(),
            catchup: self.config.catchup.clone(),
            verifier: Arc::new(Ed25519Verifier),
            blocks: self.blocks.clone(),
            state: self.state.clone(),
            network,
            worker_commands: worker_tx,
            catchup_ticks: tick_tx,
            shutdown: supervisor.cancellation_token(),
        })?;

        let mut delegate_commands = Vec::with_capacity(slots.len());
        let mut transactions = Vec::with_capacity(slots.len());
        for slot in slots {
            let (cmd_tx, cmd_rx) = mpsc::channel(WORKER_COMMAND_CAPACITY);
            let (tx_tx, tx_rx) = mpsc::channel(TRANSACTION_CAPACITY);
            let builder = SubBlockBuilder::new(
                slot,
                self.config.max_txs_per_sub_block,
                self.signer.clone(),
                Arc::new(KeyValueExecutor),
            );
            let contenders = contender_tx.clone();
            let interval = self.config.batch_interval();
            supervisor.spawn_cancellable("delegate", move |token| async move {
                run_delegate(builder, cmd_rx, tx_rx, contenders, interval, token).await;
                Ok(())
            });
            delegate_commands.push(cmd_tx);
            transactions.push(tx_tx);
        }
        drop(contender_tx);

        supervisor.spawn_cancellable("worker-fanout", move |token| {
            fan_out_commands(worker_rx, delegate_commands, token)
        });

        let events = NodeEvents {
            inbox,
            ticks: tick_rx,
            contenders: contender_rx,
        };
        supervisor.spawn_critical("event-loop", move |token| {
            run_event_loop(driver, events, status_tx, token)
        });

        Ok(NodeHandle {
            id: self.local,
            transactions,
            next_delegate: Arc::new(AtomicUsize::new(0)),
            status: status_rx,
        })
    }
}

/// Inputs of the event loop
struct NodeEvents {
    inbox: mpsc::Receiver<Frame>,
    ticks: mpsc::Receiver<CatchupTick>,
    contenders: mpsc::Receiver<SubBlockContender>,
}

async fn run_event_loop(
    mut driver: ConsensusDriver,
    mut events: NodeEvents,
    status: watch::Sender<(u64, Hash)>,
    cancel: CancellationToken,
) -> Result<()> {
    driver.start().await?;
    status.send_replace(driver.current_block());

    loop {
        let result = tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                info!("Received shutdown signal, exiting event loop");
                return Ok(());
            }

            Some(tick) = events.ticks.recv() => driver.handle_catchup_tick(tick).await,

            Some((from, bytes)) = events.inbox.recv() => match PeerMessage::decode(&bytes) {
                Ok(message) => driver.handle_peer_message(from, message).await,
                Err(e) => {
                    debug!(peer = %from, error = %e, "Dropping undecodable frame");
                    CONSENSUS_DROPPED_MESSAGES.with_label_values(&["codec"]).inc();
                    continue;
                }
            },

            Some(contender) = events.contenders.recv() => {
                driver.handle_local_contender(contender).await
            }

            else => {
                warn!("All event sources closed");
                return Ok(());
            }
        };

        if let Err(e) = result {
            if e.is_fatal() {
                error!(error = %e, "Fatal consensus error");
                return Err(e.into());
            }
            warn!(error = %e, "Consensus event failed");
        }
        status.send_if_modified(|current| {
            let latest = driver.current_block();
            let changed = *current != latest;
            *current = latest;
            changed
        });
    }
}

/// Copy each driver command to every local delegate
async fn fan_out_commands(
    mut commands: mpsc::Receiver<(WorkerCommand, Hash)>,
    delegates: Vec<mpsc::Sender<(WorkerCommand, Hash)>>,
    cancel: CancellationToken,
) -> Result<()> {
    loop {
        let command = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            command = commands.recv() => command,
        };
        let Some(command) = command else {
            return Ok(());
        };
        for delegate in &delegates {
            if delegate.send(command.clone()).await.is_err() {
                warn!("Delegate command channel closed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_single_node_commits_submitted_transactions() {
        let mut config = NodeConfig::single_node();
        config.batch_interval_ms = 10;
        let store = Arc::new(InMemoryStore::new());
        let node = Node::with_stores(config, store.clone(), store.clone()).unwrap();

        let hub = LocalHub::new();
        let inbox = hub.register(node.id());
        let network = Arc::new(hub.network_for(node.id()));
        let supervisor = NodeSupervisor::new();
        let mut handle = node.spawn(network, inbox, &supervisor).unwrap();

        handle.submit_transaction(b"greeting=hello".to_vec()).await.unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            if store.get(b"greeting").unwrap().is_some() {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "transaction never committed");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(store.get(b"greeting").unwrap(), Some(b"hello".to_vec()));
        let (num, _) = handle.wait_for_block(1).await.unwrap();
        assert!(num >= 1);

        supervisor.shutdown().await.unwrap();
        assert!(!supervisor.has_failed());
    }

    #[test]
    fn test_handle_without_slots_rejects_transactions() {
        let (_tx, status) = watch::channel((0, Hash::ZERO));
        let handle = NodeHandle {
            id: NodeId::from_bytes([1; 32]),
            transactions: Vec::new(),
            next_delegate: Arc::new(AtomicUsize::new(0)),
            status,
        };
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        assert!(rt.block_on(handle.submit_transaction(b"a=1".to_vec())).is_err());
    }
}
