//! Sub-block layer metrics.

use once_cell::sync::Lazy;
use prometheus::{Counter, CounterVec, Gauge, HistogramVec, Registry};

// Delegate Metrics
pub static DCL_SUB_BLOCKS_BUILT: Lazy<CounterVec> = Lazy::new(|| {
    CounterVec::new(
        prometheus::opts!(
            "quorumchain_dcl_sub_blocks_built_total",
            "Sub-blocks built by this delegate"
        ),
        &["slot"],
    )
    .expect("metric can be created")
});

pub static DCL_SUB_BLOCK_TX_COUNT: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        prometheus::histogram_opts!(
            "quorumchain_dcl_sub_block_tx_count",
            "Transactions per sub-block",
            vec![0.0, 1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 1000.0]
        ),
        &["slot"],
    )
    .expect("metric can be created")
});

// Assembler Metrics
pub static DCL_SUB_BLOCKS_ACCEPTED: Lazy<Counter> = Lazy::new(|| {
    Counter::new(
        "quorumchain_dcl_sub_blocks_accepted_total",
        "Sub-block contenders accepted into a slot",
    )
    .expect("metric can be created")
});

pub static DCL_SUB_BLOCKS_REJECTED: Lazy<CounterVec> = Lazy::new(|| {
    CounterVec::new(
        prometheus::opts!(
            "quorumchain_dcl_sub_blocks_rejected_total",
            "Sub-block contenders rejected by validation"
        ),
        &["reason"],
    )
    .expect("metric can be created")
});

pub static DCL_SLOT_OVERWRITES: Lazy<Counter> = Lazy::new(|| {
    Counter::new(
        "quorumchain_dcl_slot_overwrites_total",
        "Contenders that replaced an already-filled slot",
    )
    .expect("metric can be created")
});

pub static DCL_SLOTS_FILLED: Lazy<Gauge> = Lazy::new(|| {
    Gauge::new(
        "quorumchain_dcl_slots_filled",
        "Slots currently filled in the assembler",
    )
    .expect("metric can be created")
});

/// Register all sub-block metrics with the given registry.
pub fn register_metrics(registry: &Registry) {
    registry
        .register(Box::new(DCL_SUB_BLOCKS_BUILT.clone()))
        .ok();
    registry
        .register(Box::new(DCL_SUB_BLOCK_TX_COUNT.clone()))
        .ok();
    registry
        .register(Box::new(DCL_SUB_BLOCKS_ACCEPTED.clone()))
        .ok();
    registry
        .register(Box::new(DCL_SUB_BLOCKS_REJECTED.clone()))
        .ok();
    registry
        .register(Box::new(DCL_SLOT_OVERWRITES.clone()))
        .ok();
    registry.register(Box::new(DCL_SLOTS_FILLED.clone())).ok();
}
