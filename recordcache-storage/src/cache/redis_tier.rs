//! Redis-backed cache tier.
//!
//! Shared across processes. Uses a [`ConnectionManager`] so a dropped
//! connection is re-established transparently; every command is bounded by
//! the configured command timeout.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use recordcache_core::{CacheError, CacheTierConfig, RecordError, RecordResult};
use redis::aio::ConnectionManager;
use redis::{Client, RedisError};

use super::key::KeySpace;
use super::traits::{CacheResult, CacheStats, CacheTier};

/// [`CacheTier`] backed by a Redis server.
///
/// Keeps the configured namespace as a [`KeySpace`] so repositories built
/// over it write under the same prefix.
#[derive(Clone)]
pub struct RedisCacheTier {
    conn: ConnectionManager,
    command_timeout: Duration,
    keys: KeySpace,
}

impl RedisCacheTier {
    /// Connect to the server named by `config.url`.
    ///
    /// # Errors
    /// Returns a config error for invalid settings and
    /// [`CacheError::Unavailable`] if the server cannot be reached within the
    /// command timeout.
    pub async fn connect(config: &CacheTierConfig) -> RecordResult<Self> {
        config.validate()?;
        tracing::info!(url = %config.url, "Connecting to Redis cache tier");

        let client = Client::open(config.url.as_str()).map_err(|e| {
            RecordError::Cache(CacheError::Unavailable {
                reason: format!("invalid redis url: {}", e),
            })
        })?;

        let conn = tokio::time::timeout(config.command_timeout, client.get_connection_manager())
            .await
            .map_err(|_| {
                RecordError::Cache(CacheError::Unavailable {
                    reason: format!(
                        "no connection to {} within {:?}",
                        config.url, config.command_timeout
                    ),
                })
            })?
            .map_err(|e| {
                RecordError::Cache(CacheError::Unavailable {
                    reason: format!("failed to connect to {}: {}", config.url, e),
                })
            })?;

        tracing::info!(url = %config.url, namespace = %config.namespace, "Redis cache tier connected");
        Ok(Self {
            conn,
            command_timeout: config.command_timeout,
            keys: KeySpace::from_config(config),
        })
    }

    /// Key space derived from the namespace this tier was configured with.
    pub fn key_space(&self) -> &KeySpace {
        &self.keys
    }

    /// Round-trip a PING.
    pub async fn ping(&self) -> CacheResult<()> {
        let mut conn = self.conn.clone();
        let pong: String = self
            .bounded("ping", "-", redis::cmd("PING").query_async(&mut conn))
            .await?;
        if pong != "PONG" {
            return Err(CacheError::Unavailable {
                reason: format!("unexpected PING reply: {}", pong),
            });
        }
        Ok(())
    }

    async fn bounded<T>(
        &self,
        operation: &str,
        key: &str,
        fut: impl Future<Output = Result<T, RedisError>>,
    ) -> CacheResult<T> {
        match tokio::time::timeout(self.command_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                tracing::warn!(operation, key, error = %e, "Redis command failed");
                Err(CacheError::Command {
                    operation: operation.to_string(),
                    key: key.to_string(),
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                tracing::warn!(operation, key, timeout = ?self.command_timeout, "Redis command timed out");
                Err(CacheError::Timeout {
                    operation: operation.to_string(),
                    after: self.command_timeout,
                })
            }
        }
    }
}

/// Describe a key list for logs without printing every key.
fn key_summary(keys: &[String]) -> String {
    match keys {
        [] => "-".to_string(),
        [only] => only.clone(),
        [first, ..] => format!("{} (+{} more)", first, keys.len() - 1),
    }
}

/// Pull a numeric field out of an `INFO` reply.
fn info_field(info: &str, field: &str) -> Option<u64> {
    info.lines().find_map(|line| {
        let (name, value) = line.trim().split_once(':')?;
        if name == field {
            value.trim().parse().ok()
        } else {
            None
        }
    })
}

/// Redis expiries are whole milliseconds; a zero PX is rejected by the server.
fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl CacheTier for RedisCacheTier {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        self.bounded("get", key, redis::cmd("GET").arg(key).query_async(&mut conn))
            .await
    }

    async fn multi_get(&self, keys: &[String]) -> CacheResult<HashMap<String, Vec<u8>>> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }
        let mut conn = self.conn.clone();
        let values: Vec<Option<Vec<u8>>> = self
            .bounded(
                "multi_get",
                &key_summary(keys),
                redis::cmd("MGET").arg(keys).query_async(&mut conn),
            )
            .await?;

        Ok(keys
            .iter()
            .zip(values)
            .filter_map(|(key, value)| value.map(|v| (key.clone(), v)))
            .collect())
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> CacheResult<()> {
        let mut conn = self.conn.clone();
        self.bounded(
            "set",
            key,
            redis::cmd("SET")
                .arg(key)
                .arg(value)
                .arg("PX")
                .arg(ttl_millis(ttl))
                .query_async::<()>(&mut conn),
        )
        .await
    }

    async fn multi_set(&self, entries: Vec<(String, Vec<u8>)>, ttl: Duration) -> CacheResult<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let millis = ttl_millis(ttl);
        let keys: Vec<String> = entries.iter().map(|(key, _)| key.clone()).collect();

        let mut pipe = redis::pipe();
        pipe.atomic();
        for (key, value) in entries {
            pipe.cmd("SET").arg(key).arg(value).arg("PX").arg(millis).ignore();
        }

        let mut conn = self.conn.clone();
        self.bounded(
            "multi_set",
            &key_summary(&keys),
            pipe.query_async::<()>(&mut conn),
        )
        .await
    }

    async fn del(&self, key: &str) -> CacheResult<()> {
        let mut conn = self.conn.clone();
        self.bounded("del", key, redis::cmd("DEL").arg(key).query_async::<()>(&mut conn))
            .await
    }

    /// Server-wide counters. `entry_count` covers the whole database, not
    /// only this namespace.
    async fn stats(&self) -> CacheResult<CacheStats> {
        let mut conn = self.conn.clone();
        let entry_count: u64 = self
            .bounded("stats", "-", redis::cmd("DBSIZE").query_async(&mut conn))
            .await?;
        let info: String = self
            .bounded("stats", "-", redis::cmd("INFO").arg("stats").query_async(&mut conn))
            .await?;

        Ok(CacheStats {
            hits: info_field(&info, "keyspace_hits").unwrap_or(0),
            misses: info_field(&info, "keyspace_misses").unwrap_or(0),
            entry_count,
            expirations: info_field(&info, "expired_keys").unwrap_or(0),
        })
    }
}
