//! Catchup metrics

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge, register_int_counter, CounterVec, Gauge, IntCounter,
};

/// Current catchup phase (0=Idle, 1=AwaitingIndexQuorum, 2=FetchingBlocks, 3=CaughtUp)
pub static CATCHUP_PHASE: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "catchup_phase",
        "Current catchup phase (0=Idle, 1=AwaitingIndexQuorum, 2=FetchingBlocks, 3=CaughtUp)"
    )
    .expect("Failed to register catchup_phase metric")
});

/// Target block number learned from index replies
pub static CATCHUP_TARGET_BLOCK: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!("catchup_target_block", "Target block number for catchup")
        .expect("Failed to register catchup_target_block metric")
});

/// Latest block applied by catchup
pub static CATCHUP_CURRENT_BLOCK: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!("catchup_current_block", "Current block number during catchup")
        .expect("Failed to register catchup_current_block metric")
});

/// Blocks applied through catchup
pub static CATCHUP_BLOCKS_APPLIED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!("catchup_blocks_applied_total", "Blocks applied through catchup")
        .expect("Failed to register catchup_blocks_applied metric")
});

/// Catchup rounds started (initial and retries)
pub static CATCHUP_ROUNDS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "catchup_rounds_total",
        "Catchup rounds started by trigger",
        &["trigger"] // "start", "timeout"
    )
    .expect("Failed to register catchup_rounds metric")
});

/// Catchup messages by type and outcome
pub static CATCHUP_MESSAGES: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "catchup_messages_total",
        "Catchup messages handled by type and outcome",
        &["type", "outcome"] // outcome: "accepted", "stale", "stashed", "rejected", "served"
    )
    .expect("Failed to register catchup_messages metric")
});

/// Block requests re-issued after timing out
pub static CATCHUP_REQUEST_RETRIES: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "catchup_request_retries_total",
        "Block data requests re-issued to another owner"
    )
    .expect("Failed to register catchup_request_retries metric")
});
