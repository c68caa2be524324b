//! Single concurrency-safe surface over every stream operation the core
//! needs, backed by a bounded `deadpool-redis` connection pool.

use std::collections::HashMap;
use std::time::Duration;

use deadpool_redis::redis::AsyncCommands;
use deadpool_redis::redis::streams::{
    StreamAutoClaimOptions, StreamAutoClaimReply, StreamReadOptions, StreamReadReply,
};
use deadpool_redis::redis::{RedisResult, Value};
use deadpool_redis::{Config, Pool, PoolConfig, Runtime, Timeouts};
use tracing::{debug, trace, warn};

use crate::entry::Entry;
use crate::error::{Error, Result};

/// A point-in-time snapshot of one consumer, as reported by
/// `XINFO CONSUMERS`. Drives the dispatcher's load-balancing choice.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsumerInfo {
    pub pending: u64,
    pub idle_ms: u64,
    pub inactive_ms: i64,
}

/// Thin wrapper over a bounded Redis connection pool exposing only the
/// stream primitives the coordinator, workers, and dispatchers use.
pub struct RedisFacade {
    pool: Pool,
}

impl RedisFacade {
    /// Build a pool sized for `capacity` concurrent checkouts (see
    /// `streamipc_config::Config::pool_capacity`).
    pub fn connect(redis_url: &str, capacity: usize, max_capacity: usize) -> Result<Self> {
        let mut cfg = Config::from_url(redis_url);
        cfg.pool = Some(PoolConfig {
            max_size: max_capacity.max(capacity).max(1),
            timeouts: Timeouts {
                wait: Some(Duration::from_secs(5)),
                create: Some(Duration::from_secs(5)),
                recycle: Some(Duration::from_secs(5)),
            },
            ..Default::default()
        });

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| Error::Connection(e.to_string()))?;

        Ok(RedisFacade { pool })
    }

    async fn conn(&self) -> Result<deadpool_redis::Connection> {
        Ok(self.pool.get().await?)
    }

    /// `XGROUP CREATE stream group $ MKSTREAM`. Suppresses `BUSYGROUP`.
    pub async fn create_group(&self, stream: &str, group: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        let result: RedisResult<String> = conn.xgroup_create_mkstream(stream, group, "$").await;
        suppress_benign(result, "BUSYGROUP")
    }

    /// `XGROUP DESTROY`. Suppresses "no such key" errors.
    pub async fn destroy_group(&self, stream: &str, group: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        let result: RedisResult<i64> = conn.xgroup_destroy(stream, group).await;
        suppress_benign(result, "NOGROUP")
    }

    pub async fn delete_stream(&self, stream: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        let _: i64 = conn.del(stream).await?;
        Ok(())
    }

    /// `XGROUP CREATECONSUMER`.
    pub async fn create_consumer(&self, stream: &str, group: &str, consumer: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        let _: i64 = conn.xgroup_createconsumer(stream, group, consumer).await?;
        Ok(())
    }

    /// `XGROUP DELCONSUMER`. Suppresses "unknown consumer" errors.
    pub async fn delete_consumer(&self, stream: &str, group: &str, consumer: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        let result: RedisResult<i64> = conn.xgroup_delconsumer(stream, group, consumer).await;
        suppress_benign(result, "NOGROUP")
    }

    /// Publish an entry; returns the same entry with `redis_id` populated
    /// from the server-assigned id.
    pub async fn add_to_stream(&self, stream: &str, entry: Entry) -> Result<Entry> {
        let mut conn = self.conn().await?;
        let fields = entry.to_fields();
        let redis_id: String = conn.xadd(stream, "*", &fields).await?;
        Ok(entry.with_redis_id(redis_id))
    }

    /// Read at most one entry for `consumer` using cursor `">"` (unread).
    pub async fn next_unread_entry(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        block_ms: Option<u64>,
    ) -> Result<Option<Entry>> {
        self.read_one(stream, group, consumer, ">", block_ms).await
    }

    /// Read at most one entry for `consumer` using cursor `"0"` — this
    /// consumer's own pending list. Failsafe for entries a dispatcher
    /// claimed for itself but never handed off.
    pub async fn next_pending_entry(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
    ) -> Result<Option<Entry>> {
        self.read_one(stream, group, consumer, "0", None).await
    }

    async fn read_one(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        cursor: &str,
        block_ms: Option<u64>,
    ) -> Result<Option<Entry>> {
        let mut conn = self.conn().await?;
        let mut opts = StreamReadOptions::default().group(group, consumer).count(1);
        if let Some(ms) = block_ms {
            opts = opts.block(ms as usize);
        }

        let reply: StreamReadReply = conn.xread_options(&[stream], &[cursor], &opts).await?;

        for key in reply.keys {
            for stream_id in key.ids {
                trace!(id = %stream_id.id, "read stream entry");
                return Ok(Some(Entry::from_fields(&stream_id.id, &stream_id.map)?));
            }
        }
        Ok(None)
    }

    /// Autoclaim one entry idle longer than `min_idle` into `consumer`.
    /// Failsafe for entries whose original holder crashed.
    pub async fn next_reclaimed_entry(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
    ) -> Result<Option<Entry>> {
        let mut conn = self.conn().await?;
        let opts = StreamAutoClaimOptions::default().count(1);

        let reply: StreamAutoClaimReply = conn
            .xautoclaim_options(
                stream,
                group,
                consumer,
                min_idle.as_millis() as u64,
                "0-0",
                opts,
            )
            .await?;

        match reply.claimed.into_iter().next() {
            Some(stream_id) => Ok(Some(Entry::from_fields(&stream_id.id, &stream_id.map)?)),
            None => Ok(None),
        }
    }

    /// Move `entry` into `consumer`'s pending list with minimum idle zero.
    pub async fn claim_entry(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        entry: &Entry,
    ) -> Result<()> {
        let redis_id = entry
            .redis_id()
            .ok_or_else(|| Error::Connection("entry has no redis_id to claim".into()))?;
        let mut conn = self.conn().await?;
        let _: Vec<deadpool_redis::redis::streams::StreamId> = conn
            .xclaim(stream, group, consumer, 0, &[redis_id])
            .await?;
        Ok(())
    }

    /// Acknowledge and remove `entry` from the group's pending list.
    /// Suppresses "not found" errors — acking twice is a no-op.
    pub async fn acknowledge_entry(&self, stream: &str, group: &str, entry: &Entry) -> Result<()> {
        let Some(redis_id) = entry.redis_id() else {
            return Ok(());
        };
        let mut conn = self.conn().await?;
        let _: i64 = conn.xack(stream, group, &[redis_id]).await?;
        Ok(())
    }

    /// Delete `entry` from the stream entirely. Idempotent.
    pub async fn delete_entry(&self, stream: &str, entry: &Entry) -> Result<()> {
        let Some(redis_id) = entry.redis_id() else {
            return Ok(());
        };
        let mut conn = self.conn().await?;
        let _: i64 = conn.xdel(stream, &[redis_id]).await?;
        Ok(())
    }

    /// `XINFO CONSUMERS` snapshot, keyed by consumer name. Parsed
    /// manually: no typed struct for this reply is reliably stable across
    /// the Redis versions this crate targets.
    pub async fn consumer_info(
        &self,
        stream: &str,
        group: &str,
    ) -> Result<HashMap<String, ConsumerInfo>> {
        let mut conn = self.conn().await?;
        let raw: Value = deadpool_redis::redis::cmd("XINFO")
            .arg("CONSUMERS")
            .arg(stream)
            .arg(group)
            .query_async(&mut conn)
            .await?;

        let mut result = HashMap::new();
        let Value::Array(consumers) = raw else {
            return Ok(result);
        };

        for consumer in consumers {
            let Value::Array(fields) = consumer else {
                continue;
            };

            let mut name = None;
            let mut info = ConsumerInfo::default();

            for chunk in fields.chunks(2) {
                let [key, value] = chunk else { continue };
                let Some(key) = value_as_string(key) else {
                    continue;
                };
                match key.as_str() {
                    "name" => name = value_as_string(value),
                    "pending" => info.pending = value_as_i64(value).unwrap_or(0).max(0) as u64,
                    "idle" => info.idle_ms = value_as_i64(value).unwrap_or(0).max(0) as u64,
                    "inactive" => info.inactive_ms = value_as_i64(value).unwrap_or(-1),
                    _ => {}
                }
            }

            if let Some(name) = name {
                result.insert(name, info);
            }
        }

        Ok(result)
    }

    /// Key under which an instance's listening workers register
    /// themselves.
    pub fn availability_key(stream: &str, group: &str, instance: &str) -> String {
        format!("{stream}:{group}:{instance}:consumers")
    }

    /// Names currently in the availability list for `key`.
    pub async fn available_consumer_names(&self, key: &str) -> Result<Vec<String>> {
        let mut conn = self.conn().await?;
        Ok(conn.lrange(key, 0, -1).await?)
    }

    /// Add `consumer` to the availability list if not already present,
    /// and refresh its expiry.
    pub async fn make_consumer_available(&self, key: &str, consumer: &str) -> Result<()> {
        if self.consumer_available(key, consumer).await? {
            let mut conn = self.conn().await?;
            let _: i64 = conn.expire(key, AVAILABILITY_TTL_SECS).await?;
            return Ok(());
        }

        let mut conn = self.conn().await?;
        let _: i64 = conn.rpush(key, consumer).await?;
        let _: i64 = conn.expire(key, AVAILABILITY_TTL_SECS).await?;
        debug!(%consumer, %key, "marked consumer available");
        Ok(())
    }

    /// Remove `consumer` from the availability list.
    pub async fn make_consumer_unavailable(&self, key: &str, consumer: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        let _: i64 = conn.lrem(key, 0, consumer).await?;
        Ok(())
    }

    pub async fn consumer_available(&self, key: &str, consumer: &str) -> Result<bool> {
        Ok(self
            .available_consumer_names(key)
            .await?
            .iter()
            .any(|c| c == consumer))
    }

    /// `XGROUP DELCONSUMER` for every registered consumer with zero pending
    /// entries whose idle time exceeds `min_idle`. An admin operation for
    /// clearing out consumer registrations a crashed worker/dispatcher left
    /// behind, the same way a crashed process's availability-list entry is
    /// left to the TTL in [`Self::make_consumer_available`] — but the
    /// consumer group itself has no TTL, so it is cleared explicitly here
    /// rather than left to expire. Returns the names actually pruned.
    pub async fn prune_consumers(
        &self,
        stream: &str,
        group: &str,
        min_idle: Duration,
    ) -> Result<Vec<String>> {
        let min_idle_ms = min_idle.as_millis() as u64;
        let snapshot = self.consumer_info(stream, group).await?;

        let mut pruned = Vec::new();
        for (name, info) in snapshot {
            if info.pending == 0 && info.idle_ms >= min_idle_ms {
                self.delete_consumer(stream, group, &name).await?;
                debug!(%name, %stream, %group, "pruned idle consumer registration");
                pruned.push(name);
            }
        }
        Ok(pruned)
    }

    /// `XLEN`: number of entries currently in the stream.
    pub async fn stream_len(&self, stream: &str) -> Result<u64> {
        let mut conn = self.conn().await?;
        let len: u64 = conn.xlen(stream).await?;
        Ok(len)
    }

    /// `XPENDING stream group` summary form: total pending entry count
    /// across every consumer registered in the group.
    pub async fn pending_count(&self, stream: &str, group: &str) -> Result<u64> {
        let mut conn = self.conn().await?;
        let raw: Value = deadpool_redis::redis::cmd("XPENDING")
            .arg(stream)
            .arg(group)
            .query_async(&mut conn)
            .await?;

        let Value::Array(fields) = raw else {
            return Ok(0);
        };
        Ok(fields.first().and_then(value_as_i64).unwrap_or(0).max(0) as u64)
    }
}

/// Redis lists an instance's available consumers under expire after a day
/// of inactivity, so a crashed process's registration eventually clears.
const AVAILABILITY_TTL_SECS: i64 = 60 * 60 * 24;

fn suppress_benign<T: Default>(result: RedisResult<T>, marker: &str) -> Result<()> {
    match result {
        Ok(_) => Ok(()),
        Err(e) if e.to_string().contains(marker) => {
            warn!(error = %e, "suppressed benign redis command error");
            Ok(())
        }
        Err(e) => Err(Error::Redis(e)),
    }
}

fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::BulkString(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        Value::SimpleString(s) => Some(s.clone()),
        Value::Int(i) => Some(i.to_string()),
        _ => None,
    }
}

fn value_as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Int(i) => Some(*i),
        Value::BulkString(bytes) => std::str::from_utf8(bytes).ok()?.parse().ok(),
        Value::SimpleString(s) => s.parse().ok(),
        _ => None,
    }
}
