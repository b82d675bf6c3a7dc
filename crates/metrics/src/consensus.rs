//! Consensus formation metrics (notifications, quorum, commits).

use once_cell::sync::Lazy;
use prometheus::{Counter, CounterVec, Gauge, Registry};

// Chain progress
pub static CONSENSUS_BLOCK_NUM: Lazy<Gauge> = Lazy::new(|| {
    Gauge::new("quorumchain_consensus_block_num", "Latest committed block number")
        .expect("metric can be created")
});

pub static CONSENSUS_BLOCKS_COMMITTED: Lazy<Counter> = Lazy::new(|| {
    Counter::new(
        "quorumchain_consensus_blocks_committed_total",
        "Blocks committed through quorum",
    )
    .expect("metric can be created")
});

pub static CONSENSUS_FAILED_ROUNDS: Lazy<Counter> = Lazy::new(|| {
    Counter::new(
        "quorumchain_consensus_failed_rounds_total",
        "Rounds that reached a Failed quorum",
    )
    .expect("metric can be created")
});

// Notifications
pub static CONSENSUS_NOTIFICATIONS_RECEIVED: Lazy<CounterVec> = Lazy::new(|| {
    CounterVec::new(
        prometheus::opts!(
            "quorumchain_consensus_notifications_received_total",
            "Block notifications received"
        ),
        &["kind"], // "new", "failed"
    )
    .expect("metric can be created")
});

pub static CONSENSUS_QUORUM_REACHED: Lazy<CounterVec> = Lazy::new(|| {
    CounterVec::new(
        prometheus::opts!(
            "quorumchain_consensus_quorum_reached_total",
            "Notification quorums reached"
        ),
        &["kind"],
    )
    .expect("metric can be created")
});

pub static CONSENSUS_REALIGNMENTS: Lazy<CounterVec> = Lazy::new(|| {
    CounterVec::new(
        prometheus::opts!(
            "quorumchain_consensus_realignments_total",
            "Discard-and-realign commands issued"
        ),
        &["reason"], // "mismatch", "behind"
    )
    .expect("metric can be created")
});

pub static CONSENSUS_DROPPED_MESSAGES: Lazy<CounterVec> = Lazy::new(|| {
    CounterVec::new(
        prometheus::opts!(
            "quorumchain_consensus_dropped_messages_total",
            "Inbound peer messages dropped"
        ),
        &["reason"], // "decode", "invalid", "stale"
    )
    .expect("metric can be created")
});

/// Register all consensus metrics with the given registry.
pub fn register_metrics(registry: &Registry) {
    registry
        .register(Box::new(CONSENSUS_BLOCK_NUM.clone()))
        .ok();
    registry
        .register(Box::new(CONSENSUS_BLOCKS_COMMITTED.clone()))
        .ok();
    registry
        .register(Box::new(CONSENSUS_FAILED_ROUNDS.clone()))
        .ok();
    registry
        .register(Box::new(CONSENSUS_NOTIFICATIONS_RECEIVED.clone()))
        .ok();
    registry
        .register(Box::new(CONSENSUS_QUORUM_REACHED.clone()))
        .ok();
    registry
        .register(Box::new(CONSENSUS_REALIGNMENTS.clone()))
        .ok();
    registry
        .register(Box::new(CONSENSUS_DROPPED_MESSAGES.clone()))
        .ok();
}
