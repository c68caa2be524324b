//! Error types for `streamipc-core`.

use thiserror::Error;

/// Errors raised by the stream coordinator and its collaborators.
///
/// Only programmer-precondition failures surface here. Protocol-level
/// outcomes (rejection, handler error, timeout) never raise; they are
/// folded into [`crate::response::Response::Rejected`] instead.
#[derive(Debug, Error)]
pub enum Error {
    /// A required callback was missing, the dispatcher pool found no
    /// available workers at listen time, or `connect` was called twice.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// An operation was attempted on a coordinator that is not connected,
    /// or the underlying Redis connection failed.
    #[error("connection error: {0}")]
    Connection(String),

    /// An entry carried a status outside the valid set.
    #[error("invalid entry status: {0}")]
    InvalidStatus(String),

    /// Redis returned a transport-level error (not one of the benign,
    /// suppressed command errors).
    #[error("redis error: {0}")]
    Redis(#[from] deadpool_redis::redis::RedisError),

    /// Checking out a pooled connection failed.
    #[error("pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),
}

/// Result type alias used throughout `streamipc-core`.
pub type Result<T> = std::result::Result<T, Error>;
