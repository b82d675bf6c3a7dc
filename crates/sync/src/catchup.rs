//! Catchup coordinator
//!
//! A node that learns it is behind (or is starting up) runs a catchup round:
//!
//! 1. Reload the local tip and broadcast a block index request naming it.
//! 2. Merge index replies into an ordered delta of blocks to fetch. Replies
//!    only ever extend the delta contiguously from the current target.
//! 3. Fetch block data from each entry's owners, keeping up to
//!    `max_in_flight` requests outstanding. Blocks may arrive in any order;
//!    they are stashed and applied strictly in sequence.
//! 4. The round is done once the applied block equals the target and
//!    enough masternodes have answered the index request. If a reply was
//!    cut at [`MAX_INDEX_ENTRIES_PER_REPLY`], another round starts from the
//!    new tip instead.
//!
//! The coordinator is owned by the node's event loop and is never shared.
//! Timeouts are driven by [`CatchupTick`]s from a watchdog task, so all
//! state mutation stays on one task.

use crate::config::CatchupConfig;
use crate::error::{Result, SyncError};
use crate::metrics::{
    CATCHUP_BLOCKS_APPLIED, CATCHUP_CURRENT_BLOCK, CATCHUP_MESSAGES, CATCHUP_PHASE,
    CATCHUP_REQUEST_RETRIES, CATCHUP_ROUNDS, CATCHUP_TARGET_BLOCK,
};
use crate::network::CatchupNetwork;
use crate::protocol::{CatchupMessage, MAX_INDEX_ENTRIES_PER_REPLY};
use crate::watchdog::{spawn_watchdog, CatchupTick, WatchdogHandle};
use quorumchain_crypto::SignatureVerifier;
use quorumchain_data_chain::verify_block_sub_blocks;
use quorumchain_storage::{commit_block, BlockStore, CommitPath, StateStore};
use quorumchain_types::{
    BlockData, BlockIndexEntry, BlockNotification, Hash, NodeId, NotificationKind, Roster,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Where a catchup round stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatchupPhase {
    /// No round has run yet
    Idle,
    /// Index request sent, fewer than quorum replies so far
    AwaitingIndexQuorum,
    /// Index quorum reached, fetching and applying blocks
    FetchingBlocks,
    /// Applied up to the agreed target
    CaughtUp,
}

impl CatchupPhase {
    fn as_metric(self) -> f64 {
        match self {
            CatchupPhase::Idle => 0.0,
            CatchupPhase::AwaitingIndexQuorum => 1.0,
            CatchupPhase::FetchingBlocks => 2.0,
            CatchupPhase::CaughtUp => 3.0,
        }
    }
}

/// What started a round, for the rounds metric
#[derive(Debug, Clone, Copy)]
enum RoundTrigger {
    Start,
    Timeout,
    /// Previous round ended on a truncated index page
    Continue,
}

impl RoundTrigger {
    fn label(self) -> &'static str {
        match self {
            RoundTrigger::Start => "start",
            RoundTrigger::Timeout => "timeout",
            RoundTrigger::Continue => "continue",
        }
    }
}

/// Outstanding block data request
#[derive(Debug, Clone, Copy)]
struct InFlightRequest {
    owner: NodeId,
    sent_at: Instant,
}

/// Drives catchup rounds against the local block and state stores
pub struct CatchupCoordinator {
    local: NodeId,
    roster: Arc<Roster>,
    config: CatchupConfig,
    verifier: Arc<dyn SignatureVerifier>,
    blocks: Arc<dyn BlockStore>,
    state: Arc<dyn StateStore>,
    network: Arc<dyn CatchupNetwork>,
    ticks: mpsc::Sender<CatchupTick>,
    shutdown: CancellationToken,

    phase: CatchupPhase,
    current_block_num: u64,
    current_block_hash: Hash,
    /// Highest block number learned from index replies
    target_block_num: u64,
    /// Next block number to apply
    awaited_block_num: u64,
    index_reply_senders: HashSet<NodeId>,
    /// Some reply this round was a full page; peers may hold more
    index_truncated: bool,
    /// Blocks still to apply, keyed by number, contiguous from current + 1
    ordered_delta: BTreeMap<u64, BlockIndexEntry>,
    stashed_blocks: BTreeMap<u64, (NodeId, BlockData)>,
    in_flight: BTreeMap<u64, InFlightRequest>,
    /// Owner rotation cursor per block number
    owner_cursor: HashMap<u64, usize>,
    quorum_threshold: usize,
    is_caught_up: bool,
    attempt: u64,
    round_started: Instant,
    index_timeout: Duration,
    watchdog: Option<WatchdogHandle>,
}

impl CatchupCoordinator {
    /// Create an idle coordinator.
    ///
    /// `verifier` checks delegate signatures on fetched blocks. `ticks` is
    /// the event loop's tick channel; each round arms a watchdog that feeds
    /// it. `shutdown` is the node's root token.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        local: NodeId,
        roster: Arc<Roster>,
        config: CatchupConfig,
        verifier: Arc<dyn SignatureVerifier>,
        blocks: Arc<dyn BlockStore>,
        state: Arc<dyn StateStore>,
        network: Arc<dyn CatchupNetwork>,
        ticks: mpsc::Sender<CatchupTick>,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        config.validate()?;
        let quorum_threshold = roster.catchup_quorum(&local);
        let index_timeout = config.index_reply_timeout();

        Ok(Self {
            local,
            roster,
            config,
            verifier,
            blocks,
            state,
            network,
            ticks,
            shutdown,
            phase: CatchupPhase::Idle,
            current_block_num: 0,
            current_block_hash: Hash::ZERO,
            target_block_num: 0,
            awaited_block_num: 1,
            index_reply_senders: HashSet::new(),
            index_truncated: false,
            ordered_delta: BTreeMap::new(),
            stashed_blocks: BTreeMap::new(),
            in_flight: BTreeMap::new(),
            owner_cursor: HashMap::new(),
            quorum_threshold,
            is_caught_up: false,
            attempt: 0,
            round_started: Instant::now(),
            index_timeout,
            watchdog: None,
        })
    }

    // === Accessors ===

    /// Current phase
    pub fn phase(&self) -> CatchupPhase {
        self.phase
    }

    /// Latest block applied, as (number, hash)
    pub fn current_block(&self) -> (u64, Hash) {
        (self.current_block_num, self.current_block_hash)
    }

    /// Highest block number learned so far
    pub fn target_block_num(&self) -> u64 {
        self.target_block_num
    }

    /// Next block number to apply
    pub fn awaited_block_num(&self) -> u64 {
        self.awaited_block_num
    }

    /// Round counter; bumped on every (re)start
    pub fn attempt(&self) -> u64 {
        self.attempt
    }

    /// Distinct index replies a round needs
    pub fn quorum_threshold(&self) -> usize {
        self.quorum_threshold
    }

    /// Index reply timeout for the running round
    pub fn index_timeout(&self) -> Duration {
        self.index_timeout
    }

    /// Masternodes that answered the running round
    pub fn index_reply_count(&self) -> usize {
        self.index_reply_senders.len()
    }

    /// Outstanding block requests
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// True while a round is running
    pub fn is_active(&self) -> bool {
        matches!(
            self.phase,
            CatchupPhase::AwaitingIndexQuorum | CatchupPhase::FetchingBlocks
        )
    }

    // === Round control ===

    /// Start a catchup round from the stored tip.
    ///
    /// Resets the index timeout backoff. Any running round is abandoned;
    /// blocks it already applied stay applied.
    pub async fn run_catchup(&mut self) -> Result<()> {
        self.index_timeout = self.config.index_reply_timeout();
        self.start_round(RoundTrigger::Start).await
    }

    async fn start_round(&mut self, trigger: RoundTrigger) -> Result<()> {
        let tip = self.blocks.latest_block().await?;
        self.current_block_num = tip.block_num;
        self.current_block_hash = tip.block_hash;
        self.target_block_num = tip.block_num;
        self.awaited_block_num = tip.block_num + 1;

        self.index_reply_senders.clear();
        self.index_truncated = false;
        self.ordered_delta.clear();
        self.stashed_blocks.clear();
        self.in_flight.clear();
        self.owner_cursor.clear();
        self.is_caught_up = false;

        self.attempt += 1;
        self.round_started = Instant::now();
        // superseded watchdog is cancelled on drop
        self.watchdog = None;

        CATCHUP_ROUNDS.with_label_values(&[trigger.label()]).inc();
        CATCHUP_CURRENT_BLOCK.set(self.current_block_num as f64);
        CATCHUP_TARGET_BLOCK.set(self.target_block_num as f64);

        if self.peer_count() == 0 {
            info!(
                block_num = self.current_block_num,
                "No catchup peers, treating local chain as current"
            );
            self.latch_caught_up();
            return Ok(());
        }

        info!(
            attempt = self.attempt,
            trigger = trigger.label(),
            block_num = self.current_block_num,
            block_hash = %self.current_block_hash,
            quorum = self.quorum_threshold,
            timeout_ms = self.index_timeout.as_millis() as u64,
            "Starting catchup round"
        );

        self.network
            .broadcast(CatchupMessage::BlockIndexRequest {
                block_hash: self.current_block_hash,
                sender: self.local,
            })
            .await;

        self.watchdog = Some(spawn_watchdog(
            self.attempt,
            self.config.timeout_check_interval(),
            self.ticks.clone(),
            &self.shutdown,
        ));
        self.set_phase(CatchupPhase::AwaitingIndexQuorum);
        Ok(())
    }

    /// Check completion, latching the result.
    ///
    /// Done means the applied block has reached the target *and* a quorum
    /// of masternodes has answered. Either alone is not enough: an early
    /// reply may report a stale tip.
    pub fn is_catchup_done(&mut self) -> bool {
        if self.is_caught_up {
            return true;
        }
        if !self.is_active() {
            return false;
        }
        if self.target_block_num == self.current_block_num
            && self.has_index_quorum()
            && !self.index_truncated
        {
            info!(
                block_num = self.current_block_num,
                block_hash = %self.current_block_hash,
                replies = self.index_reply_senders.len(),
                "Catchup complete"
            );
            self.latch_caught_up();
        }
        self.is_caught_up
    }

    fn latch_caught_up(&mut self) {
        self.is_caught_up = true;
        self.watchdog = None;
        self.in_flight.clear();
        self.owner_cursor.clear();
        self.set_phase(CatchupPhase::CaughtUp);
    }

    fn set_phase(&mut self, phase: CatchupPhase) {
        if self.phase != phase {
            debug!(from = ?self.phase, to = ?phase, "Catchup phase change");
        }
        self.phase = phase;
        CATCHUP_PHASE.set(phase.as_metric());
    }

    fn has_index_quorum(&self) -> bool {
        self.index_reply_senders.len() >= self.quorum_threshold
    }

    fn peer_count(&self) -> usize {
        self.roster
            .masternodes()
            .iter()
            .filter(|id| **id != self.local)
            .count()
    }

    // === Incoming messages ===

    /// Merge a block index reply.
    ///
    /// `indices` arrive newest first. Only entries that extend the delta
    /// contiguously from the target are taken; anything after a gap is
    /// ignored. Each masternode is counted once per round.
    pub async fn recv_block_index_reply(
        &mut self,
        sender: NodeId,
        indices: Vec<BlockIndexEntry>,
    ) -> Result<()> {
        if sender == self.local || !self.roster.is_masternode(&sender) {
            debug!(peer = %sender, "Ignoring index reply from non-masternode");
            CATCHUP_MESSAGES
                .with_label_values(&["index_reply", "rejected"])
                .inc();
            return Ok(());
        }
        if !self.is_active() {
            trace!(peer = %sender, "Ignoring index reply outside a catchup round");
            CATCHUP_MESSAGES
                .with_label_values(&["index_reply", "stale"])
                .inc();
            return Ok(());
        }
        if !self.index_reply_senders.insert(sender) {
            debug!(peer = %sender, "Ignoring duplicate index reply");
            CATCHUP_MESSAGES
                .with_label_values(&["index_reply", "stale"])
                .inc();
            return Ok(());
        }

        let full_page = indices.len() >= MAX_INDEX_ENTRIES_PER_REPLY;
        let mut extended = 0usize;
        for entry in indices.into_iter().rev() {
            if entry.block_num <= self.target_block_num {
                continue;
            }
            if entry.block_num != self.target_block_num + 1 {
                warn!(
                    peer = %sender,
                    expected = self.target_block_num + 1,
                    got = entry.block_num,
                    "Gap in block index reply, ignoring the rest"
                );
                break;
            }
            self.target_block_num = entry.block_num;
            self.ordered_delta.insert(entry.block_num, entry);
            extended += 1;
        }
        // a full page that moved the target may have more behind it
        if full_page && extended > 0 {
            self.index_truncated = true;
        }

        CATCHUP_MESSAGES
            .with_label_values(&["index_reply", "accepted"])
            .inc();
        CATCHUP_TARGET_BLOCK.set(self.target_block_num as f64);
        debug!(
            peer = %sender,
            extended,
            target = self.target_block_num,
            replies = self.index_reply_senders.len(),
            "Index reply merged"
        );

        if self.has_index_quorum() && self.phase == CatchupPhase::AwaitingIndexQuorum {
            self.set_phase(CatchupPhase::FetchingBlocks);
        }

        if self.in_flight.is_empty() {
            self.process_next_delta().await?;
        }
        Ok(())
    }

    /// Accept block data from a peer.
    ///
    /// Blocks at or below the current block are stale and dropped, as are
    /// blocks beyond the known target. Everything else is stashed and
    /// applied once its predecessor is in.
    pub async fn recv_block_data(&mut self, sender: NodeId, block: BlockData) -> Result<()> {
        if !self.is_active() {
            trace!(
                peer = %sender,
                block_num = block.block_num,
                "Ignoring block outside a catchup round"
            );
            CATCHUP_MESSAGES
                .with_label_values(&["data_reply", "stale"])
                .inc();
            return Ok(());
        }

        let block_num = block.block_num;
        if block_num <= self.current_block_num {
            trace!(
                peer = %sender,
                block_num,
                current = self.current_block_num,
                "Dropping stale block"
            );
            CATCHUP_MESSAGES
                .with_label_values(&["data_reply", "stale"])
                .inc();
            return Ok(());
        }
        if block_num > self.target_block_num {
            debug!(
                peer = %sender,
                block_num,
                target = self.target_block_num,
                "Dropping block beyond target"
            );
            CATCHUP_MESSAGES
                .with_label_values(&["data_reply", "rejected"])
                .inc();
            return Ok(());
        }
        if self.stashed_blocks.contains_key(&block_num) {
            trace!(peer = %sender, block_num, "Block already stashed");
            CATCHUP_MESSAGES
                .with_label_values(&["data_reply", "stale"])
                .inc();
            return Ok(());
        }

        self.stashed_blocks.insert(block_num, (sender, block));
        CATCHUP_MESSAGES
            .with_label_values(&["data_reply", "stashed"])
            .inc();

        if block_num == self.current_block_num + 1 {
            self.process_next_delta().await?;
        }
        Ok(())
    }

    /// Feed a live block notification into a running round.
    ///
    /// While catching up, consensus keeps producing blocks. A `New`
    /// notification for `target + 1` extends the delta so the round ends on
    /// the live tip. Returns true if the delta was extended.
    pub async fn recv_new_block_notification(
        &mut self,
        notification: &BlockNotification,
    ) -> Result<bool> {
        if !self.is_active() || notification.kind != NotificationKind::New {
            return Ok(false);
        }
        if notification.block_num != self.target_block_num + 1 {
            trace!(
                block_num = notification.block_num,
                target = self.target_block_num,
                "Notification does not extend catchup target"
            );
            return Ok(false);
        }

        self.target_block_num = notification.block_num;
        self.ordered_delta.insert(
            notification.block_num,
            BlockIndexEntry {
                block_num: notification.block_num,
                block_hash: notification.block_hash,
                block_owners: notification.block_owners.clone(),
            },
        );
        CATCHUP_TARGET_BLOCK.set(self.target_block_num as f64);
        debug!(target = self.target_block_num, "Catchup target extended by notification");

        if self.in_flight.is_empty() {
            self.process_next_delta().await?;
        }
        Ok(true)
    }

    /// Handle a watchdog tick.
    ///
    /// Ticks from a superseded round are ignored. If index quorum has not
    /// been reached within the (backed-off) timeout the round restarts;
    /// block requests that went unanswered are re-issued to the next owner.
    pub async fn handle_tick(&mut self, tick: CatchupTick) -> Result<()> {
        if tick.attempt != self.attempt || !self.is_active() {
            trace!(tick = tick.attempt, attempt = self.attempt, "Ignoring stale catchup tick");
            return Ok(());
        }

        let now = Instant::now();
        if self.index_reply_senders.len() < self.quorum_threshold
            && now.duration_since(self.round_started) >= self.index_timeout
        {
            let next = self.config.next_index_timeout(self.index_timeout);
            warn!(
                attempt = self.attempt,
                replies = self.index_reply_senders.len(),
                quorum = self.quorum_threshold,
                next_timeout_ms = next.as_millis() as u64,
                "Catchup index quorum timed out, retrying"
            );
            self.index_timeout = next;
            return self.start_round(RoundTrigger::Timeout).await;
        }

        let request_timeout = self.config.block_request_timeout();
        let expired: Vec<u64> = self
            .in_flight
            .iter()
            .filter(|(_, req)| now.duration_since(req.sent_at) >= request_timeout)
            .map(|(num, _)| *num)
            .collect();
        for block_num in expired {
            if let Some(req) = self.in_flight.remove(&block_num) {
                debug!(block_num, owner = %req.owner, "Block request timed out, trying next owner");
            }
            self.rotate_owner(block_num);
            CATCHUP_REQUEST_RETRIES.inc();
            self.request_block(block_num).await;
        }

        if self.in_flight.is_empty() && self.current_block_num < self.target_block_num {
            self.process_next_delta().await?;
        }
        Ok(())
    }

    // === Delta processing ===

    /// Apply every stashed block that extends the chain, then top up
    /// outstanding block requests.
    ///
    /// Storage errors are fatal and returned; invalid blocks are dropped
    /// and re-requested from another owner.
    async fn process_next_delta(&mut self) -> Result<()> {
        while let Some((sender, block)) =
            self.stashed_blocks.remove(&(self.current_block_num + 1))
        {
            let block_num = block.block_num;
            match self.check_block(&sender, &block) {
                Ok(()) => self.apply_block(block).await?,
                Err(e) => {
                    warn!(peer = %sender, block_num, error = %e, "Rejecting catchup block");
                    CATCHUP_MESSAGES
                        .with_label_values(&["data_reply", "rejected"])
                        .inc();
                    self.in_flight.remove(&block_num);
                    self.rotate_owner(block_num);
                    break;
                }
            }
        }
        self.awaited_block_num = self.current_block_num + 1;

        if self.current_block_num >= self.target_block_num {
            self.in_flight.clear();
            if self.index_truncated && self.has_index_quorum() {
                info!(
                    block_num = self.current_block_num,
                    "Reached the end of a truncated block index, requesting more"
                );
                return self.start_round(RoundTrigger::Continue).await;
            }
            return Ok(());
        }

        let window = self.config.max_in_flight.saturating_sub(self.in_flight.len());
        let wanted: Vec<u64> = self
            .ordered_delta
            .range(self.current_block_num + 1..)
            .map(|(num, _)| *num)
            .filter(|num| {
                !self.in_flight.contains_key(num) && !self.stashed_blocks.contains_key(num)
            })
            .take(window)
            .collect();
        for block_num in wanted {
            self.request_block(block_num).await;
        }
        Ok(())
    }

    fn check_block(&self, sender: &NodeId, block: &BlockData) -> Result<()> {
        let entry = self.ordered_delta.get(&block.block_num).ok_or_else(|| {
            SyncError::invalid_block(sender.to_string(), block.block_num, "not in agreed index")
        })?;
        if block.block_hash != entry.block_hash {
            return Err(SyncError::HashMismatch {
                block_num: block.block_num,
                expected: entry.block_hash,
                actual: block.block_hash,
            });
        }
        if !block.verify_hash() {
            return Err(SyncError::invalid_block(
                sender.to_string(),
                block.block_num,
                "block hash does not match contents",
            ));
        }
        if block.previous_hash != self.current_block_hash {
            return Err(SyncError::invalid_block(
                sender.to_string(),
                block.block_num,
                "does not extend the current block",
            ));
        }
        verify_block_sub_blocks(block, self.verifier.as_ref(), &self.roster).map_err(|e| {
            SyncError::invalid_block(sender.to_string(), block.block_num, e.to_string())
        })
    }

    async fn apply_block(&mut self, block: BlockData) -> Result<()> {
        let block_num = block.block_num;
        let block_hash = block.block_hash;

        commit_block(
            self.blocks.as_ref(),
            self.state.as_ref(),
            block,
            CommitPath::Catchup,
        )
        .await?;

        self.current_block_num = block_num;
        self.current_block_hash = block_hash;
        self.ordered_delta.remove(&block_num);
        self.in_flight.remove(&block_num);
        self.owner_cursor.remove(&block_num);

        CATCHUP_BLOCKS_APPLIED.inc();
        CATCHUP_CURRENT_BLOCK.set(block_num as f64);
        info!(
            block_num,
            block_hash = %block_hash,
            target = self.target_block_num,
            "Applied catchup block"
        );
        Ok(())
    }

    fn rotate_owner(&mut self, block_num: u64) {
        *self.owner_cursor.entry(block_num).or_insert(0) += 1;
    }

    /// Candidate owners for a block: its listed owners, or every other
    /// masternode if none of them is reachable
    fn owners_for(&self, entry: &BlockIndexEntry) -> Vec<NodeId> {
        let listed: Vec<NodeId> = entry
            .block_owners
            .iter()
            .filter(|id| **id != self.local && self.roster.is_masternode(id))
            .copied()
            .collect();
        if !listed.is_empty() {
            return listed;
        }
        self.roster
            .masternodes()
            .iter()
            .filter(|id| **id != self.local)
            .copied()
            .collect()
    }

    async fn request_block(&mut self, block_num: u64) {
        let Some(entry) = self.ordered_delta.get(&block_num) else {
            return;
        };
        let owners = self.owners_for(entry);
        if owners.is_empty() {
            return;
        }
        let cursor = self.owner_cursor.get(&block_num).copied().unwrap_or(0);
        let owner = owners[cursor % owners.len()];

        self.in_flight.insert(
            block_num,
            InFlightRequest {
                owner,
                sent_at: Instant::now(),
            },
        );
        trace!(block_num, owner = %owner, "Requesting catchup block");
        self.network
            .send_to(owner, CatchupMessage::BlockDataRequest { block_num })
            .await;
    }
}
