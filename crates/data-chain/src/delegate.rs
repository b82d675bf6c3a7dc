//! Delegate-side sub-block production
//!
//! A delegate owns one worker slot. It queues submitted transactions,
//! executes a batch when consensus asks for the next sub-block, and signs
//! the result as a [`SubBlockContender`]. Execution goes through the
//! [`Executor`] trait; [`KeyValueExecutor`] is the built-in
//! `key=value` interpreter used for local runs and tests.

use crate::messages::WorkerCommand;
use crate::sub_block::SubBlockContender;
use quorumchain_crypto::Signer;
use quorumchain_metrics::dcl::{DCL_SUB_BLOCKS_BUILT, DCL_SUB_BLOCK_TX_COUNT};
use quorumchain_types::{Hash, StateWrite, TransactionData};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Status code for a transaction the executor rejected
pub const STATUS_REJECTED: u8 = 1;

/// Executes one transaction payload into its state delta
pub trait Executor: Send + Sync {
    /// Execute `payload`; failures are reported through `status`
    fn execute(&self, payload: &[u8]) -> TransactionData;
}

/// Interprets `key=value` payloads as a set and `key=` as a delete
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyValueExecutor;

impl Executor for KeyValueExecutor {
    fn execute(&self, payload: &[u8]) -> TransactionData {
        let Some(split) = payload.iter().position(|b| *b == b'=') else {
            return TransactionData::new(payload.to_vec(), STATUS_REJECTED, Vec::new());
        };
        let (key, value) = (&payload[..split], &payload[split + 1..]);
        if key.is_empty() {
            return TransactionData::new(payload.to_vec(), STATUS_REJECTED, Vec::new());
        }

        let write = if value.is_empty() {
            StateWrite::delete(key)
        } else {
            StateWrite::set(key, value)
        };
        TransactionData::new(payload.to_vec(), 0, vec![write])
    }
}

/// Batches pending payloads for one slot and builds signed contenders
pub struct SubBlockBuilder {
    slot_index: u32,
    max_txs: usize,
    pending: VecDeque<Vec<u8>>,
    /// Last batch handed to consensus, kept until the round settles
    in_flight: Option<(Hash, Vec<Vec<u8>>)>,
    signer: Arc<dyn Signer>,
    executor: Arc<dyn Executor>,
}

impl SubBlockBuilder {
    /// Create a builder for `slot_index`
    pub fn new(
        slot_index: u32,
        max_txs: usize,
        signer: Arc<dyn Signer>,
        executor: Arc<dyn Executor>,
    ) -> Self {
        Self {
            slot_index,
            max_txs: max_txs.max(1),
            pending: VecDeque::new(),
            in_flight: None,
            signer,
            executor,
        }
    }

    /// Queue a transaction payload
    pub fn add_transaction(&mut self, payload: Vec<u8>) {
        self.pending.push_back(payload);
    }

    /// Queued payloads not yet in a batch
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Input hash of a batch: `H(previous_hash || slot || (len || payload)*)`.
    ///
    /// Mixing in the parent and slot keeps empty batches distinct per round.
    pub fn input_hash(previous_block_hash: &Hash, slot_index: u32, payloads: &[Vec<u8>]) -> Hash {
        let slot = slot_index.to_be_bytes();
        let lens: Vec<[u8; 4]> = payloads
            .iter()
            .map(|p| (p.len() as u32).to_be_bytes())
            .collect();
        let mut parts: Vec<&[u8]> = vec![previous_block_hash.as_slice(), slot.as_slice()];
        for (len, payload) in lens.iter().zip(payloads) {
            parts.push(len.as_slice());
            parts.push(payload.as_slice());
        }
        Hash::compute_parts(&parts)
    }

    /// Take the next batch, execute it and sign the contender.
    ///
    /// A batch still in flight from an unsettled round is requeued first.
    pub fn build(&mut self, previous_block_hash: Hash) -> SubBlockContender {
        if let Some((_, payloads)) = self.in_flight.take() {
            for payload in payloads.into_iter().rev() {
                self.pending.push_front(payload);
            }
        }

        let take = self.pending.len().min(self.max_txs);
        let payloads: Vec<Vec<u8>> = self.pending.drain(..take).collect();
        let input_hash = Self::input_hash(&previous_block_hash, self.slot_index, &payloads);
        let transactions = payloads
            .iter()
            .map(|p| self.executor.execute(p))
            .collect();

        let contender = SubBlockContender::new(
            self.slot_index,
            input_hash,
            transactions,
            previous_block_hash,
            self.signer.as_ref(),
        );
        self.in_flight = Some((input_hash, payloads));
        contender
    }

    /// The round containing the in-flight batch was committed
    pub fn settle(&mut self) {
        self.in_flight = None;
    }

    /// Realign to the quorum's agreed inputs.
    ///
    /// If the agreed inputs include this slot's in-flight batch it is
    /// considered consumed; otherwise its payloads go back to the queue.
    pub fn realign(&mut self, agreed_inputs: &[Hash]) {
        if let Some((input_hash, payloads)) = self.in_flight.take() {
            if agreed_inputs.contains(&input_hash) {
                return;
            }
            debug!(
                slot = self.slot_index,
                requeued = payloads.len(),
                "Requeueing batch not in agreed inputs"
            );
            for payload in payloads.into_iter().rev() {
                self.pending.push_front(payload);
            }
        }
    }
}

/// Drive a [`SubBlockBuilder`] from consensus commands.
///
/// Each command arrives with the block hash the next sub-block builds on.
/// The build itself waits up to `batch_interval` for transactions to
/// accumulate, or happens at once when a full batch is already queued.
/// Runs until cancelled or the command channel closes.
pub async fn run_delegate(
    mut builder: SubBlockBuilder,
    mut commands: mpsc::Receiver<(WorkerCommand, Hash)>,
    mut transactions: mpsc::Receiver<Vec<u8>>,
    contenders: mpsc::Sender<SubBlockContender>,
    batch_interval: Duration,
    cancel: CancellationToken,
) {
    info!(slot = builder.slot_index, "Delegate worker started");
    // parent hash and deadline of the next build
    let mut scheduled: Option<(Hash, Instant)> = None;

    loop {
        let deadline = scheduled.map(|(_, at)| at);
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            cmd = commands.recv() => {
                let Some((cmd, parent)) = cmd else { break };
                match cmd {
                    WorkerCommand::MakeNextSubBlock => builder.settle(),
                    WorkerCommand::DiscardAndRealign { input_hashes } => {
                        builder.realign(&input_hashes)
                    }
                }
                let at = if builder.pending_count() >= builder.max_txs {
                    Instant::now()
                } else {
                    Instant::now() + batch_interval
                };
                scheduled = Some((parent, at));
            }

            _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                let Some((parent, _)) = scheduled.take() else { continue };
                let contender = builder.build(parent);
                let slot = contender.slot_index.to_string();
                DCL_SUB_BLOCKS_BUILT.with_label_values(&[&slot]).inc();
                DCL_SUB_BLOCK_TX_COUNT
                    .with_label_values(&[&slot])
                    .observe(contender.transactions.len() as f64);
                debug!(
                    slot = contender.slot_index,
                    txs = contender.transactions.len(),
                    result = %contender.result_hash,
                    "Built sub-block"
                );
                if contenders.send(contender).await.is_err() {
                    warn!("Contender channel closed");
                    break;
                }
            }

            Some(payload) = transactions.recv() => {
                builder.add_transaction(payload);
                if builder.pending_count() >= builder.max_txs {
                    if let Some((_, at)) = scheduled.as_mut() {
                        *at = Instant::now();
                    }
                }
            }
        }
    }
    info!(slot = builder.slot_index, "Delegate worker stopped");
}
