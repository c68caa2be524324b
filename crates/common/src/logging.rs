//! Logging and tracing setup.
//!
//! Provides structured logging configuration using `tracing`, mirroring the
//! compact-vs-JSON split every service binary in this workspace chooses
//! between at startup.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing for local/interactive use: compact, human-readable,
/// with file/line and thread id annotations.
///
/// Reads `RUST_LOG` (e.g. `RUST_LOG=streamipc_core=debug`), defaulting to
/// `info` when unset or unparsable.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_thread_ids(true)
                .with_file(true)
                .compact(),
        )
        .init();
}

/// Initialize tracing with JSON output, for production deployments that
/// ship logs to an aggregator.
pub fn init_tracing_json() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_target(true)
                .with_level(true)
                .with_current_span(true),
        )
        .init();
}
