//! quorumchain Prometheus metrics infrastructure.
//!
//! This crate provides centralized metric definitions for the consensus,
//! sub-block and storage layers. Catchup metrics live with the sync crate.

pub mod consensus;
pub mod dcl;
pub mod server;
pub mod storage;

pub use server::{spawn_metrics_server, start_metrics_server};

use once_cell::sync::Lazy;
use prometheus::Registry;

/// Global Prometheus registry for all quorumchain metrics.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();

    consensus::register_metrics(&registry);
    dcl::register_metrics(&registry);
    storage::register_metrics(&registry);

    registry
});

/// Initialize all metrics. Call once at startup.
pub fn init() {
    Lazy::force(&REGISTRY);
    tracing::info!("quorumchain metrics initialized");
}

/// Encode this registry plus the default registry in text exposition format.
pub fn gather_text() -> Result<String, prometheus::Error> {
    use prometheus::Encoder;

    let mut families = REGISTRY.gather();
    families.extend(prometheus::gather());

    let mut buffer = Vec::new();
    prometheus::TextEncoder::new().encode(&families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}
