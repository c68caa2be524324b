//! Prometheus metrics for dispatch outcomes, worker ticks, and the ledger.
//!
//! Exposed on `/metrics` by whatever binary wires up the coordinator.

use lazy_static::lazy_static;
use prometheus::{
    Encoder, IntCounterVec, IntGauge, TextEncoder, opts, register_int_counter_vec,
    register_int_gauge,
};

lazy_static! {
    /// Entries a dispatcher claimed into a worker's pending list, by
    /// outcome (`claimed`, `no_workers`, `dropped_wrong_group`).
    pub static ref DISPATCH_OUTCOMES_TOTAL: IntCounterVec = register_int_counter_vec!(
        opts!("streamipc_dispatch_outcomes_total", "Outcomes of dispatcher ticks"),
        &["outcome"]
    )
    .expect("metric can be created");

    /// Entries a worker finalized, by classification
    /// (`request`, `response`, `stale`, `invalid`).
    pub static ref WORKER_ENTRIES_TOTAL: IntCounterVec = register_int_counter_vec!(
        opts!("streamipc_worker_entries_total", "Entries processed by workers, by classification"),
        &["classification"]
    )
    .expect("metric can be created");

    /// Requests that completed via `send_to_group`, by resolution
    /// (`fulfilled`, `rejected`, `timeout`).
    pub static ref REQUESTS_COMPLETED_TOTAL: IntCounterVec = register_int_counter_vec!(
        opts!("streamipc_requests_completed_total", "send_to_group completions by resolution"),
        &["resolution"]
    )
    .expect("metric can be created");

    /// Current number of outstanding (unresolved) ledger rows.
    pub static ref LEDGER_SIZE: IntGauge = register_int_gauge!(
        "streamipc_ledger_size",
        "Number of ledger rows awaiting a reply"
    )
    .expect("metric can be created");
}

/// Render all registered metrics in Prometheus text exposition format.
pub fn render_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}
