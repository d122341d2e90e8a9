//! Cache tier traits and cacheable entity marker.
//!
//! This module defines the traits that must be implemented by cache tiers
//! and entities that can be cached.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use recordcache_core::{CacheError, Record, RecordId};
use serde::{de::DeserializeOwned, Serialize};

/// Result type for raw cache tier operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Marker trait for types that can be cached.
///
/// # Implementation Requirements
///
/// - `KEY_PREFIX` names the key family, e.g. `record:info`; keys are
///   `<KEY_PREFIX>:<id>`
/// - `entity_id()` returns the store-assigned id; `0` means unpersisted and
///   such values are never written to the cache
pub trait CacheableEntity: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Key family for this entity type.
    const KEY_PREFIX: &'static str;

    /// Get the unique identifier for this entity.
    fn entity_id(&self) -> RecordId;
}

impl CacheableEntity for Record {
    const KEY_PREFIX: &'static str = "record:info";

    fn entity_id(&self) -> RecordId {
        self.id
    }
}

/// Cache tier trait for pluggable key-value backends.
///
/// Implementations must be thread-safe and support concurrent access. Every
/// write replaces the whole value for its key; there are no partial writes.
///
/// `multi_get` returns only the keys that are present. A missing key is
/// simply absent from the map, never an error.
#[async_trait]
pub trait CacheTier: Send + Sync {
    /// Get the raw value stored under `key`.
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>>;

    /// Get several keys in one round trip.
    async fn multi_get(&self, keys: &[String]) -> CacheResult<HashMap<String, Vec<u8>>>;

    /// Store `value` under `key` for `ttl`.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> CacheResult<()>;

    /// Store several entries with a shared TTL in one round trip.
    async fn multi_set(&self, entries: Vec<(String, Vec<u8>)>, ttl: Duration) -> CacheResult<()>;

    /// Delete `key`. Deleting a missing key is not an error.
    async fn del(&self, key: &str) -> CacheResult<()>;

    /// Get tier statistics.
    async fn stats(&self) -> CacheResult<CacheStats>;
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Number of entries currently in cache.
    pub entry_count: u64,
    /// Number of entries dropped because their TTL elapsed.
    pub expirations: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use recordcache_core::NewRecord;

    #[test]
    fn test_cache_stats_hit_rate() {
        let stats = CacheStats {
            hits: 80,
            misses: 20,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.8).abs() < 0.001);

        let empty_stats = CacheStats::default();
        assert!((empty_stats.hit_rate() - 0.0).abs() < 0.001);
    }

    #[test]
    fn test_record_is_cacheable() {
        let record = Record::from_new(12, &NewRecord::new("amy", "a@x.com"), Utc::now());
        assert_eq!(Record::KEY_PREFIX, "record:info");
        assert_eq!(record.entity_id(), 12);
    }
}
