//! In-process cache tier.
//!
//! A concurrent map with per-entry deadlines. Expired entries are dropped
//! lazily on read and in bulk by [`InMemoryCacheTier::purge_expired`].
//! Deadlines use the tokio clock so tests can pause and advance time.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;

use super::traits::{CacheResult, CacheStats, CacheTier};

#[derive(Debug, Clone)]
struct StoredEntry {
    value: Vec<u8>,
    expires_at: Instant,
}

impl StoredEntry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// In-memory [`CacheTier`] for tests and single-process deployments.
#[derive(Debug, Default)]
pub struct InMemoryCacheTier {
    entries: DashMap<String, StoredEntry>,
    hits: AtomicU64,
    misses: AtomicU64,
    expirations: AtomicU64,
}

impl InMemoryCacheTier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, including ones that expired but were not
    /// yet purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether a live entry exists for `key`. Does not touch hit counters.
    pub fn contains_key(&self, key: &str) -> bool {
        let now = Instant::now();
        self.entries
            .get(key)
            .map(|entry| entry.is_live(now))
            .unwrap_or(false)
    }

    /// Remaining time to live for `key`, if a live entry exists.
    pub fn ttl_of(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.expires_at - now)
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_live(now));
        let removed = before.saturating_sub(self.entries.len());
        self.expirations.fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    /// Remove everything.
    pub fn clear(&self) {
        self.entries.clear();
    }

    fn read(&self, key: &str, now: Instant) -> Option<Vec<u8>> {
        let live = match self.entries.get(key) {
            Some(entry) if entry.is_live(now) => Some(entry.value.clone()),
            Some(_) => None,
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        match live {
            Some(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            None => {
                // The read guard is released above; remove only if still expired.
                if self
                    .entries
                    .remove_if(key, |_, entry| !entry.is_live(now))
                    .is_some()
                {
                    self.expirations.fetch_add(1, Ordering::Relaxed);
                }
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    fn write(&self, key: String, value: Vec<u8>, ttl: Duration) {
        let expires_at = Instant::now() + ttl;
        self.entries.insert(key, StoredEntry { value, expires_at });
    }
}

#[async_trait]
impl CacheTier for InMemoryCacheTier {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        Ok(self.read(key, Instant::now()))
    }

    async fn multi_get(&self, keys: &[String]) -> CacheResult<HashMap<String, Vec<u8>>> {
        let now = Instant::now();
        let mut found = HashMap::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = self.read(key, now) {
                found.insert(key.clone(), value);
            }
        }
        Ok(found)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> CacheResult<()> {
        self.write(key.to_string(), value, ttl);
        Ok(())
    }

    async fn multi_set(&self, entries: Vec<(String, Vec<u8>)>, ttl: Duration) -> CacheResult<()> {
        for (key, value) in entries {
            self.write(key, value, ttl);
        }
        Ok(())
    }

    async fn del(&self, key: &str) -> CacheResult<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn stats(&self) -> CacheResult<CacheStats> {
        Ok(CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entry_count: self.entries.len() as u64,
            expirations: self.expirations.load(Ordering::Relaxed),
        })
    }
}
