//! Storage collaborator metrics.

use once_cell::sync::Lazy;
use prometheus::{Counter, HistogramVec, Registry};

pub static STORAGE_COMMIT_LATENCY: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        prometheus::histogram_opts!(
            "quorumchain_storage_commit_seconds",
            "Block commit duration (block + state delta)",
            vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5]
        ),
        &["path"], // "consensus", "catchup"
    )
    .expect("metric can be created")
});

pub static STORAGE_STATE_WRITES: Lazy<Counter> = Lazy::new(|| {
    Counter::new(
        "quorumchain_storage_state_writes_total",
        "State writes applied from committed transactions",
    )
    .expect("metric can be created")
});

pub static STORAGE_COMMIT_FAILURES: Lazy<Counter> = Lazy::new(|| {
    Counter::new(
        "quorumchain_storage_commit_failures_total",
        "Failed block commits",
    )
    .expect("metric can be created")
});

/// Register all storage metrics with the given registry.
pub fn register_metrics(registry: &Registry) {
    registry
        .register(Box::new(STORAGE_COMMIT_LATENCY.clone()))
        .ok();
    registry
        .register(Box::new(STORAGE_STATE_WRITES.clone()))
        .ok();
    registry
        .register(Box::new(STORAGE_COMMIT_FAILURES.clone()))
        .ok();
}
