//! Configuration management for `streamipc`.
//!
//! Loads and validates configuration from environment variables (with
//! `.env` support), following the "struct of sections, each with its own
//! loader" pattern used across this workspace's service crates.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;

/// Top-level configuration for a stream coordinator.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub redis: RedisConfig,
    pub ledger: LedgerConfig,
    pub consumer: ConsumerConfig,
    pub dispatcher: DispatcherConfig,
    pub observability: ObservabilityConfig,
}

/// Redis connection and pooling configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    /// Connection URL, e.g. `redis://127.0.0.1:6379`.
    pub url: String,

    /// Connections reserved for `send_to_group` callers.
    pub pool_size: usize,

    /// Hard ceiling on the pool, separate from `pool_size` so operators can
    /// allow bursts without changing the steady-state budget.
    pub max_pool_size: usize,
}

/// Correlation ledger timing.
#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    /// How long `send_to_group` waits for a reply before timing out.
    pub entry_timeout_ms: u64,

    /// How often the background sweeper scans for expired rows.
    pub cleanup_interval_ms: u64,
}

/// Worker pool sizing and tick rate.
#[derive(Debug, Clone, Deserialize)]
pub struct ConsumerConfig {
    pub pool_size: usize,
    pub execution_interval_ms: u64,
}

/// Dispatcher pool sizing, tick rate, and reclaim threshold.
#[derive(Debug, Clone, Deserialize)]
pub struct DispatcherConfig {
    pub pool_size: usize,
    pub execution_interval_ms: u64,

    /// Minimum idle time before an unacknowledged entry is autoclaimed from
    /// whichever consumer last held it.
    pub min_idle_ms: u64,
}

/// Observability surface for the demo binary.
#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    pub rust_log: String,
    pub metrics_port: u16,
    pub health_port: u16,
}

impl Config {
    /// Load configuration from environment variables, falling back to
    /// `.env` in the working directory if present.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Config {
            redis: Self::load_redis()?,
            ledger: Self::load_ledger()?,
            consumer: Self::load_consumer()?,
            dispatcher: Self::load_dispatcher()?,
            observability: Self::load_observability()?,
        })
    }

    fn load_redis() -> Result<RedisConfig> {
        Ok(RedisConfig {
            url: env::var("REDIS_URL").context("REDIS_URL must be set")?,
            pool_size: env::var("POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
            max_pool_size: env::var("MAX_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(32),
        })
    }

    fn load_ledger() -> Result<LedgerConfig> {
        Ok(LedgerConfig {
            entry_timeout_ms: env::var("LEDGER_ENTRY_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5_000),
            cleanup_interval_ms: env::var("LEDGER_CLEANUP_INTERVAL_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1_000),
        })
    }

    fn load_consumer() -> Result<ConsumerConfig> {
        Ok(ConsumerConfig {
            pool_size: env::var("CONSUMER_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
            execution_interval_ms: env::var("CONSUMER_EXECUTION_INTERVAL_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1),
        })
    }

    fn load_dispatcher() -> Result<DispatcherConfig> {
        let pool_size = env::var("DISPATCHER_POOL_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(3);

        if pool_size == 0 {
            anyhow::bail!("DISPATCHER_POOL_SIZE must be at least 1");
        }

        Ok(DispatcherConfig {
            pool_size,
            execution_interval_ms: env::var("DISPATCHER_EXECUTION_INTERVAL_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1),
            min_idle_ms: env::var("DISPATCHER_MIN_IDLE_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10_000),
        })
    }

    fn load_observability() -> Result<ObservabilityConfig> {
        Ok(ObservabilityConfig {
            rust_log: env::var("RUST_LOG").unwrap_or_else(|_| "info,streamipc=debug".to_string()),
            metrics_port: env::var("METRICS_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(9090),
            health_port: env::var("HEALTH_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(8080),
        })
    }

    /// Total connections the Redis pool must support: one budget for
    /// `send_to_group` callers, plus two connections per worker and two per
    /// dispatcher (one for the blocking read, one for ack/claim/admin).
    pub fn pool_capacity(&self) -> usize {
        self.redis.pool_size
            + 2 * self.consumer.pool_size
            + 2 * self.dispatcher.pool_size
    }
}
