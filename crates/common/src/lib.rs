//! Shared ambient infrastructure used by every `streamipc` crate and binary.
//!
//! This crate provides:
//! - Structured logging setup (`tracing` + `tracing-subscriber`)
//!
//! It deliberately stays thin: domain logic (entries, the ledger, workers,
//! dispatchers) lives in `streamipc-core`.

pub mod logging;

pub use logging::{init_tracing, init_tracing_json};
