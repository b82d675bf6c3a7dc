//! Consensus driver.
//!
//! Owns the round state of one masternode: the sub-block assembler, the
//! notification tracker and the catchup coordinator. The node event loop
//! feeds it one event at a time; nothing here is shared across tasks.
//!
//! A round goes:
//!
//! 1. Delegates send signed sub-blocks built on our current block.
//! 2. Once every slot is filled we broadcast our block notification.
//! 3. When a notification outcome reaches quorum we compare it with our
//!    own assembly: commit on agreement, realign the workers otherwise, and
//!    start catchup if the quorum is already past our next block.

use crate::config::ConsensusConfig;
use crate::error::DriverError;
use crate::messages::PeerMessage;
use crate::network::{CatchupOverNode, NodeNetwork};
use crate::notification_tracker::{BlockNotificationTracker, DecidedBlock};
use quorumchain_crypto::SignatureVerifier;
use quorumchain_data_chain::{AddOutcome, SubBlockAssembler, SubBlockContender, WorkerCommand};
use quorumchain_metrics::consensus::{
    CONSENSUS_BLOCKS_COMMITTED, CONSENSUS_BLOCK_NUM, CONSENSUS_DROPPED_MESSAGES,
    CONSENSUS_FAILED_ROUNDS, CONSENSUS_NOTIFICATIONS_RECEIVED, CONSENSUS_QUORUM_REACHED,
    CONSENSUS_REALIGNMENTS,
};
use quorumchain_metrics::dcl::{
    DCL_SLOTS_FILLED, DCL_SLOT_OVERWRITES, DCL_SUB_BLOCKS_ACCEPTED, DCL_SUB_BLOCKS_REJECTED,
};
use quorumchain_storage::{commit_block, BlockStore, CommitPath, StateStore};
use quorumchain_sync::{
    CatchupConfig, CatchupCoordinator, CatchupMessage, CatchupServer, CatchupTick,
};
use quorumchain_types::{BlockData, BlockNotification, Hash, NodeId, NotificationKind, Roster};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Result type for driver operations
pub type Result<T> = std::result::Result<T, DriverError>;

/// Everything the driver needs from the node
pub struct DriverContext {
    /// This node
    pub local: NodeId,
    /// Cluster roster
    pub roster: Arc<Roster>,
    /// Round settings
    pub config: ConsensusConfig,
    /// Catchup settings
    pub catchup: CatchupConfig,
    /// Verifies delegate signatures
    pub verifier: Arc<dyn SignatureVerifier>,
    /// Committed chain
    pub blocks: Arc<dyn BlockStore>,
    /// Committed state
    pub state: Arc<dyn StateStore>,
    /// Peer transport
    pub network: Arc<dyn NodeNetwork>,
    /// Commands to the local worker pool, with the parent hash to build on
    pub worker_commands: mpsc::Sender<(WorkerCommand, Hash)>,
    /// Catchup watchdog ticks back into the event loop
    pub catchup_ticks: mpsc::Sender<CatchupTick>,
    /// Node shutdown token
    pub shutdown: CancellationToken,
}

/// Per-masternode consensus state machine
pub struct ConsensusDriver {
    local: NodeId,
    roster: Arc<Roster>,
    config: ConsensusConfig,
    verifier: Arc<dyn SignatureVerifier>,
    blocks: Arc<dyn BlockStore>,
    state: Arc<dyn StateStore>,
    network: Arc<dyn NodeNetwork>,
    worker_commands: mpsc::Sender<(WorkerCommand, Hash)>,

    assembler: SubBlockAssembler,
    tracker: BlockNotificationTracker,
    catchup: CatchupCoordinator,
    server: CatchupServer,

    current_block_num: u64,
    current_block_hash: Hash,
    /// Whether we already broadcast our notification this round
    notified: bool,
    catching_up: bool,
    /// Sub-blocks built on a parent we have not reached yet
    early_contenders: VecDeque<SubBlockContender>,
    /// Early sub-blocks whose parent we just reached
    replay: VecDeque<SubBlockContender>,
}

impl ConsensusDriver {
    /// Create a driver. Call [`start`](Self::start) before feeding events.
    pub fn new(ctx: DriverContext) -> Result<Self> {
        ctx.config.validate()?;

        let catchup_network = Arc::new(CatchupOverNode::new(ctx.network.clone()));
        let catchup = CatchupCoordinator::new(
            ctx.local,
            ctx.roster.clone(),
            ctx.catchup,
            ctx.verifier.clone(),
            ctx.blocks.clone(),
            ctx.state.clone(),
            catchup_network.clone(),
            ctx.catchup_ticks,
            ctx.shutdown,
        )?;
        let server = CatchupServer::new(ctx.local, ctx.blocks.clone(), catchup_network);

        Ok(Self {
            local: ctx.local,
            tracker: BlockNotificationTracker::new(&ctx.roster),
            assembler: SubBlockAssembler::new(ctx.config.slots_per_block),
            roster: ctx.roster,
            config: ctx.config,
            verifier: ctx.verifier,
            blocks: ctx.blocks,
            state: ctx.state,
            network: ctx.network,
            worker_commands: ctx.worker_commands,
            catchup,
            server,
            current_block_num: 0,
            current_block_hash: Hash::ZERO,
            notified: false,
            catching_up: false,
            early_contenders: VecDeque::new(),
            replay: VecDeque::new(),
        })
    }

    // === Accessors ===

    /// Latest committed block, as (number, hash)
    pub fn current_block(&self) -> (u64, Hash) {
        (self.current_block_num, self.current_block_hash)
    }

    /// True while catchup is running
    pub fn is_catching_up(&self) -> bool {
        self.catching_up
    }

    /// Round assembler
    pub fn assembler(&self) -> &SubBlockAssembler {
        &self.assembler
    }

    /// Notification tracker
    pub fn tracker(&self) -> &BlockNotificationTracker {
        &self.tracker
    }

    /// Catchup coordinator
    pub fn catchup(&self) -> &CatchupCoordinator {
        &self.catchup
    }

    // === Entry points ===

    /// Load the stored tip and catch up with the cluster.
    ///
    /// Production starts when catchup completes.
    pub async fn start(&mut self) -> Result<()> {
        let tip = self.blocks.latest_block().await?;
        self.current_block_num = tip.block_num;
        self.current_block_hash = tip.block_hash;
        CONSENSUS_BLOCK_NUM.set(tip.block_num as f64);
        info!(
            node = %self.local,
            block_num = tip.block_num,
            block_hash = %tip.block_hash,
            "Consensus driver starting"
        );
        self.begin_catchup().await?;
        self.drain_replay().await
    }

    /// Handle one message from a peer
    pub async fn handle_peer_message(&mut self, from: NodeId, message: PeerMessage) -> Result<()> {
        trace!(from = %from, kind = message.kind(), "Peer message");
        match message {
            PeerMessage::SubBlockContender(contender) => self.on_contender(contender).await?,
            PeerMessage::BlockNotification(notification) => {
                self.on_notification(from, notification).await?
            }
            PeerMessage::Catchup(msg) => self.on_catchup_message(from, msg).await?,
        }
        self.drain_replay().await
    }

    /// Handle a sub-block produced by the local worker pool
    pub async fn handle_local_contender(&mut self, contender: SubBlockContender) -> Result<()> {
        self.network
            .broadcast(PeerMessage::SubBlockContender(contender.clone()))
            .await;
        self.on_contender(contender).await?;
        self.drain_replay().await
    }

    /// Handle a catchup watchdog tick
    pub async fn handle_catchup_tick(&mut self, tick: CatchupTick) -> Result<()> {
        self.catchup.handle_tick(tick).await?;
        self.check_catchup_done().await?;
        self.drain_replay().await
    }

    // === Sub-blocks ===

    async fn on_contender(&mut self, contender: SubBlockContender) -> Result<()> {
        let slot = contender.slot_index;
        let signer = contender.signature.signer;

        if contender.previous_block_hash != self.current_block_hash || self.catching_up {
            return self.park_contender(contender).await;
        }

        if let Err(e) = contender.validate(self.verifier.as_ref(), &self.roster) {
            warn!(slot, signer = %signer, error = %e, "Rejecting sub-block");
            DCL_SUB_BLOCKS_REJECTED.with_label_values(&["invalid"]).inc();
            return Ok(());
        }

        match self.assembler.add_sub_block(contender) {
            Ok(AddOutcome::Inserted) => DCL_SUB_BLOCKS_ACCEPTED.inc(),
            Ok(AddOutcome::Replaced) => {
                DCL_SUB_BLOCKS_ACCEPTED.inc();
                DCL_SLOT_OVERWRITES.inc();
            }
            Err(e) => {
                warn!(slot, signer = %signer, error = %e, "Rejecting sub-block");
                DCL_SUB_BLOCKS_REJECTED.with_label_values(&["slot_range"]).inc();
                return Ok(());
            }
        }
        DCL_SLOTS_FILLED.set(self.assembler.filled() as f64);

        if self.assembler.is_quorum() && !self.notified {
            self.notify_assembled().await?;
        }
        Ok(())
    }

    /// Keep a sub-block built on a parent we have not committed yet;
    /// drop it if its parent is already behind us.
    async fn park_contender(&mut self, contender: SubBlockContender) -> Result<()> {
        let parent = contender.previous_block_hash;
        let known = self.blocks.number_for_hash(&parent).await?;
        if matches!(known, Some(num) if num <= self.current_block_num) {
            trace!(slot = contender.slot_index, parent = %parent, "Dropping stale sub-block");
            CONSENSUS_DROPPED_MESSAGES.with_label_values(&["stale"]).inc();
            return Ok(());
        }
        if self.config.max_early_contenders == 0 {
            CONSENSUS_DROPPED_MESSAGES.with_label_values(&["early"]).inc();
            return Ok(());
        }
        if self.early_contenders.len() >= self.config.max_early_contenders {
            self.early_contenders.pop_front();
            CONSENSUS_DROPPED_MESSAGES.with_label_values(&["early"]).inc();
        }
        debug!(
            slot = contender.slot_index,
            parent = %parent,
            "Holding sub-block for a later parent"
        );
        self.early_contenders.push_back(contender);
        Ok(())
    }

    /// Queue held sub-blocks that build on the new current block
    fn release_early_contenders(&mut self) {
        let current = self.current_block_hash;
        let (ready, later): (VecDeque<_>, VecDeque<_>) = self
            .early_contenders
            .drain(..)
            .partition(|c| c.previous_block_hash == current);
        self.early_contenders = later;
        self.replay.extend(ready);
    }

    async fn drain_replay(&mut self) -> Result<()> {
        while let Some(contender) = self.replay.pop_front() {
            self.on_contender(contender).await?;
        }
        Ok(())
    }

    // === Notifications ===

    /// Broadcast our view of the assembled round and count it ourselves.
    ///
    /// A round whose sub-blocks carry no transactions is reported as failed.
    async fn notify_assembled(&mut self) -> Result<()> {
        if !self.roster.is_masternode(&self.local) {
            return Ok(());
        }
        let block_num = self.current_block_num + 1;
        let (slots, inputs) = self.assembler.grouped_by_signer();

        let notification = if self.assembler.tx_count() == 0 {
            BlockNotification::failed(
                block_num,
                &self.current_block_hash,
                vec![self.local],
                slots,
                inputs,
            )
        } else {
            let block_hash = match self.assembler.compute_block_hash(&self.current_block_hash) {
                Ok(hash) => hash,
                Err(e) => {
                    error!(error = %e, "Assembled round has no block hash");
                    return Ok(());
                }
            };
            BlockNotification::new_block(block_num, block_hash, vec![self.local], slots, inputs)
        };

        self.notified = true;
        debug!(
            block_num,
            block_hash = %notification.block_hash,
            kind = %notification.kind,
            "Broadcasting block notification"
        );
        self.network
            .broadcast(PeerMessage::BlockNotification(notification.clone()))
            .await;
        self.tracker.add_notification(&notification, self.local);
        // the quorum may have been reached before our own assembly was complete
        if self.tracker.decided(block_num).is_some() {
            self.on_quorum(block_num).await?;
        }
        Ok(())
    }

    async fn on_notification(
        &mut self,
        from: NodeId,
        notification: BlockNotification,
    ) -> Result<()> {
        let kind_label = notification.kind.to_string();
        CONSENSUS_NOTIFICATIONS_RECEIVED
            .with_label_values(&[&kind_label])
            .inc();
        if self.tracker.add_notification(&notification, from) {
            self.on_quorum(notification.block_num).await?;
        }
        Ok(())
    }

    async fn on_quorum(&mut self, block_num: u64) -> Result<()> {
        let Some(decided) = self.tracker.decided(block_num).cloned() else {
            return Ok(());
        };
        let kind = decided.notification.kind;
        CONSENSUS_QUORUM_REACHED
            .with_label_values(&[&kind.to_string()])
            .inc();

        if self.catching_up {
            if kind == NotificationKind::New {
                let mut notification = decided.notification;
                notification.block_owners = decided.senders;
                self.catchup.recv_new_block_notification(&notification).await?;
                self.check_catchup_done().await?;
            }
            return Ok(());
        }

        let next = self.current_block_num + 1;
        if block_num < next {
            trace!(block_num, current = self.current_block_num, "Quorum for a committed block");
            return Ok(());
        }
        if block_num > next {
            warn!(
                block_num,
                current = self.current_block_num,
                "Quorum is ahead of us, catching up"
            );
            self.realign(&decided, "behind").await;
            return self.begin_catchup().await;
        }

        match kind {
            NotificationKind::Failed => {
                info!(block_num, "Round failed, rebuilding the sub-blocks");
                CONSENSUS_FAILED_ROUNDS.inc();
                self.tracker.release(block_num);
                self.reset_round();
                // nothing was committed, so every in-flight batch goes back
                self.send_worker(WorkerCommand::DiscardAndRealign {
                    input_hashes: Vec::new(),
                })
                .await;
                Ok(())
            }
            NotificationKind::New => {
                let local_hash = self
                    .assembler
                    .compute_block_hash(&self.current_block_hash)
                    .ok();
                if local_hash == Some(decided.notification.block_hash) {
                    self.commit(decided).await
                } else {
                    warn!(
                        block_num,
                        agreed = %decided.notification.block_hash,
                        local = ?local_hash,
                        "Local assembly disagrees with quorum"
                    );
                    self.realign(&decided, "mismatch").await;
                    Ok(())
                }
            }
        }
    }

    async fn commit(&mut self, decided: DecidedBlock) -> Result<()> {
        let block = BlockData::new(
            decided.notification.block_num,
            self.current_block_hash,
            decided.senders,
            self.assembler.sub_blocks(),
        );
        let block_num = block.block_num;
        let block_hash = block.block_hash;
        let tx_count = block.tx_count();

        commit_block(
            self.blocks.as_ref(),
            self.state.as_ref(),
            block,
            CommitPath::Consensus,
        )
        .await
        .map_err(|source| DriverError::StorageCommit { block_num, source })?;

        self.current_block_num = block_num;
        self.current_block_hash = block_hash;
        CONSENSUS_BLOCK_NUM.set(block_num as f64);
        CONSENSUS_BLOCKS_COMMITTED.inc();
        info!(block_num, block_hash = %block_hash, tx_count, "Committed block");

        self.reset_round();
        self.tracker.reset(block_num + 1);
        self.send_worker(WorkerCommand::MakeNextSubBlock).await;
        self.release_early_contenders();
        Ok(())
    }

    async fn realign(&mut self, decided: &DecidedBlock, reason: &'static str) {
        CONSENSUS_REALIGNMENTS.with_label_values(&[reason]).inc();
        let input_hashes = decided.notification.flat_input_hashes();
        self.reset_round();
        self.send_worker(WorkerCommand::DiscardAndRealign { input_hashes })
            .await;
    }

    fn reset_round(&mut self) {
        self.assembler.reset();
        self.notified = false;
        DCL_SLOTS_FILLED.set(0.0);
    }

    async fn send_worker(&self, command: WorkerCommand) {
        if self
            .worker_commands
            .send((command, self.current_block_hash))
            .await
            .is_err()
        {
            warn!("Worker command channel closed");
        }
    }

    // === Catchup ===

    async fn begin_catchup(&mut self) -> Result<()> {
        self.catching_up = true;
        self.catchup.run_catchup().await?;
        self.check_catchup_done().await
    }

    async fn on_catchup_message(&mut self, from: NodeId, message: CatchupMessage) -> Result<()> {
        match message {
            CatchupMessage::BlockIndexRequest { .. } | CatchupMessage::BlockDataRequest { .. } => {
                if let Err(e) = self.server.handle(from, message).await {
                    warn!(peer = %from, error = %e, "Failed to serve catchup request");
                }
                return Ok(());
            }
            CatchupMessage::BlockIndexReply { indices } => {
                self.catchup.recv_block_index_reply(from, indices).await?
            }
            CatchupMessage::BlockDataReply(block) => {
                self.catchup.recv_block_data(from, block).await?
            }
        }
        self.check_catchup_done().await
    }

    /// Adopt the caught-up chain and resume production.
    ///
    /// If the cluster already decided a block beyond the next one, another
    /// catchup round starts instead.
    async fn check_catchup_done(&mut self) -> Result<()> {
        if !self.catching_up || !self.catchup.is_catchup_done() {
            return Ok(());
        }
        let (block_num, block_hash) = self.catchup.current_block();
        if matches!(self.tracker.highest_decided(), Some(decided) if decided > block_num + 1) {
            debug!(block_num, "Cluster moved on during catchup, running another round");
            self.current_block_num = block_num;
            self.current_block_hash = block_hash;
            return Ok(self.catchup.run_catchup().await?);
        }
        self.catching_up = false;
        self.current_block_num = block_num;
        self.current_block_hash = block_hash;
        CONSENSUS_BLOCK_NUM.set(block_num as f64);
        info!(block_num, block_hash = %block_hash, "Caught up, resuming production");

        self.reset_round();
        self.tracker.reset(block_num + 1);
        self.send_worker(WorkerCommand::MakeNextSubBlock).await;
        self.release_early_contenders();
        Ok(())
    }
}
