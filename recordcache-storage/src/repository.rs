//! Cache-Aside Record Repository
//!
//! [`RecordRepository`] is the only entry point the service layer uses. Reads
//! consult the cache tier first and fall back to the record store; writes go
//! to the store and then delete the cached entry.
//!
//! The cache is an optimisation, never a dependency: every cache failure is
//! logged and the operation continues as if the cache were empty.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use recordcache_core::{
    NewRecord, Record, RecordError, RecordId, RecordPatch, RecordResult, RepositoryConfig,
    StorageError,
};

use crate::cache::{CacheLookup, CacheResult, CacheTier, EntityCache, KeySpace, RedisCacheTier};
use crate::context::RequestContext;
use crate::gate::{DedupGate, GateStats};
use crate::store::RecordStore;

// ============================================================================
// STATISTICS
// ============================================================================

#[derive(Debug, Default)]
struct Counters {
    cache_hits: AtomicU64,
    negative_hits: AtomicU64,
    cache_misses: AtomicU64,
    cache_errors: AtomicU64,
    store_queries: AtomicU64,
    batch_store_queries: AtomicU64,
}

/// Snapshot of repository activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepositoryStats {
    /// Lookups answered with a cached record.
    pub cache_hits: u64,
    /// Lookups answered by a negative marker.
    pub negative_hits: u64,
    /// Lookups that found nothing cached.
    pub cache_misses: u64,
    /// Cache operations that failed or timed out and were degraded.
    pub cache_errors: u64,
    /// Single-record store queries (reads and writes).
    pub store_queries: u64,
    /// Batched store reads.
    pub batch_store_queries: u64,
    pub gate: GateStats,
}

// ============================================================================
// REPOSITORY
// ============================================================================

/// Cache-aside access to records.
///
/// Generic over the record store and the cache tier so either can be
/// replaced by a fake in tests.
///
/// # Consistency
///
/// Writes delete the cached entry after the store commits. A read that
/// fetched from the store before the write committed may still populate the
/// cache with the old record after that delete, and the stale copy is then
/// served until its positive TTL elapses. Callers needing read-your-writes
/// must tolerate this window or read from the store directly.
///
/// Concurrent single-record misses for one id are collapsed into a single
/// store query per process through a [`DedupGate`]. Batch reads bypass the
/// gate.
pub struct RecordRepository<S, C> {
    store: Arc<S>,
    cache: EntityCache<Record, C>,
    gate: Arc<DedupGate<RecordId, Option<Record>>>,
    config: RepositoryConfig,
    counters: Arc<Counters>,
}

impl<S, C> Clone for RecordRepository<S, C> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            cache: self.cache.clone(),
            gate: Arc::clone(&self.gate),
            config: self.config.clone(),
            counters: Arc::clone(&self.counters),
        }
    }
}

impl<S, C> RecordRepository<S, C>
where
    S: RecordStore,
    C: CacheTier,
{
    /// Create a repository with un-namespaced keys.
    pub fn new(store: Arc<S>, cache: Arc<C>, config: RepositoryConfig) -> RecordResult<Self> {
        Self::with_key_space(store, cache, KeySpace::default(), config)
    }

    /// Create a repository whose cache keys live under `keys`.
    pub fn with_key_space(
        store: Arc<S>,
        cache: Arc<C>,
        keys: KeySpace,
        config: RepositoryConfig,
    ) -> RecordResult<Self> {
        config.validate()?;
        Ok(Self {
            store,
            cache: EntityCache::new(cache, keys),
            gate: Arc::new(DedupGate::new()),
            config,
            counters: Arc::new(Counters::default()),
        })
    }

    /// The backing record store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// The typed cache, including its key space and tier.
    pub fn cache(&self) -> &EntityCache<Record, C> {
        &self.cache
    }

    /// TTLs and timeouts this repository was built with.
    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    // ========================================================================
    // READS
    // ========================================================================

    /// Get a record by id.
    ///
    /// Returns `Ok(None)` when the record does not exist. Absence confirmed
    /// by the store is remembered for the negative TTL.
    pub async fn get_record(&self, ctx: &RequestContext, id: RecordId) -> RecordResult<Option<Record>> {
        ctx.check()?;
        let key = self.cache.key(id);

        if let Some(lookup) = self.cache_read(ctx, "get", &key, self.cache.get(id)).await? {
            match lookup {
                CacheLookup::Hit(record) => {
                    self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(id, key = %key, "Cache hit");
                    return Ok(Some(record));
                }
                CacheLookup::Negative => {
                    self.counters.negative_hits.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(id, key = %key, "Negative cache hit");
                    return Ok(None);
                }
                CacheLookup::Absent => {}
            }
        }

        self.counters.cache_misses.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(id, key = %key, "Cache miss");
        self.gate
            .run_once(ctx, id, || self.load_record(ctx, id, key.as_str()))
            .await
    }

    /// Fetch from the store and populate the cache with the outcome.
    ///
    /// Only the store query is raced against `ctx`. Once the store has
    /// answered, the populate runs to completion under the cache timeout and
    /// the answer is returned even if `ctx` ended meanwhile.
    async fn load_record(&self, ctx: &RequestContext, id: RecordId, key: &str) -> RecordResult<Option<Record>> {
        self.counters.store_queries.fetch_add(1, Ordering::Relaxed);
        let found = self
            .store_call(ctx, "get_by_id", self.store.get_by_id(id))
            .await?;

        match &found {
            Some(record) => {
                self.cache_write("set", key, self.cache.set(record, self.config.positive_ttl))
                    .await
            }
            None => {
                self.cache_write(
                    "set_negative",
                    key,
                    self.cache.set_negative(id, self.config.negative_ttl),
                )
                .await
            }
        }
        Ok(found)
    }

    /// Get every existing record among `ids`.
    ///
    /// Ids that do not exist are omitted; duplicates produce one record.
    /// Results follow the first occurrence of each id in `ids`. Issues at
    /// most one cache read, one store query and one cache write.
    pub async fn batch_get_records(&self, ctx: &RequestContext, ids: &[RecordId]) -> RecordResult<Vec<Record>> {
        ctx.check()?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut seen = HashSet::with_capacity(ids.len());
        let unique: Vec<RecordId> = ids.iter().copied().filter(|id| seen.insert(*id)).collect();
        let batch_key = format!("{} (+{} ids)", self.cache.key(unique[0]), unique.len() - 1);

        let mut cached = self
            .cache_read(ctx, "multi_get", &batch_key, self.cache.multi_get(&unique))
            .await?
            .unwrap_or_default();

        let mut found: HashMap<RecordId, Record> = HashMap::with_capacity(unique.len());
        let mut missed = Vec::new();
        for id in &unique {
            match cached.remove(id) {
                Some(CacheLookup::Hit(record)) => {
                    self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
                    found.insert(*id, record);
                }
                Some(CacheLookup::Negative) => {
                    self.counters.negative_hits.fetch_add(1, Ordering::Relaxed);
                }
                Some(CacheLookup::Absent) | None => {
                    self.counters.cache_misses.fetch_add(1, Ordering::Relaxed);
                    missed.push(*id);
                }
            }
        }
        tracing::debug!(
            requested = unique.len(),
            hits = found.len(),
            missed = missed.len(),
            "Batch cache lookup"
        );

        if !missed.is_empty() {
            self.counters.batch_store_queries.fetch_add(1, Ordering::Relaxed);
            let fetched = self
                .store_call(ctx, "batch_get", self.store.batch_get(&missed))
                .await?;

            self.cache_write(
                "multi_set",
                &batch_key,
                self.cache.multi_set(&fetched, self.config.positive_ttl),
            )
            .await;
            for record in fetched {
                found.insert(record.id, record);
            }
        }

        Ok(unique.iter().filter_map(|id| found.remove(id)).collect())
    }

    /// Look up a record by username. Not cached.
    pub async fn get_record_by_username(
        &self,
        ctx: &RequestContext,
        username: &str,
    ) -> RecordResult<Option<Record>> {
        self.counters.store_queries.fetch_add(1, Ordering::Relaxed);
        self.store_call(ctx, "get_by_username", self.store.get_by_username(username))
            .await
    }

    /// Look up a record by email. Not cached.
    pub async fn get_record_by_email(&self, ctx: &RequestContext, email: &str) -> RecordResult<Option<Record>> {
        self.counters.store_queries.fetch_add(1, Ordering::Relaxed);
        self.store_call(ctx, "get_by_email", self.store.get_by_email(email))
            .await
    }

    /// Look up a record by phone number. Not cached.
    pub async fn get_record_by_phone(&self, ctx: &RequestContext, phone: &str) -> RecordResult<Option<Record>> {
        self.counters.store_queries.fetch_add(1, Ordering::Relaxed);
        self.store_call(ctx, "get_by_phone", self.store.get_by_phone(phone))
            .await
    }

    // ========================================================================
    // WRITES
    // ========================================================================

    /// Insert a record and return its id.
    ///
    /// The new record is not cached; the first read populates it. Any
    /// negative marker left for the new id is removed.
    pub async fn create_record(&self, ctx: &RequestContext, data: &NewRecord) -> RecordResult<RecordId> {
        self.counters.store_queries.fetch_add(1, Ordering::Relaxed);
        let id = self
            .store_call(ctx, "insert", self.store.insert(data))
            .await?;

        let key = self.cache.key(id);
        self.cache_write("del", &key, self.cache.del(id)).await;
        tracing::debug!(id, "Created record");
        Ok(id)
    }

    /// Apply `patch` to record `id`, then delete its cache entry.
    ///
    /// # Errors
    /// [`RecordError::NotFound`] if the record does not exist. Store errors,
    /// including `DuplicateKey`, are returned unchanged.
    pub async fn update_record(&self, ctx: &RequestContext, id: RecordId, patch: &RecordPatch) -> RecordResult<()> {
        if self.get_record(ctx, id).await?.is_none() {
            return Err(RecordError::NotFound { id });
        }
        if patch.is_empty() {
            return Ok(());
        }

        self.counters.store_queries.fetch_add(1, Ordering::Relaxed);
        let result = self
            .store_call(ctx, "update", self.store.update(id, patch))
            .await;

        // The write may have committed even if the call failed.
        let key = self.cache.key(id);
        self.cache_write("del", &key, self.cache.del(id)).await;

        match result {
            Err(RecordError::Storage(StorageError::NotFound { .. })) => Err(RecordError::NotFound { id }),
            other => other,
        }
    }

    /// Drop whatever is cached for `id`.
    pub async fn invalidate(&self, ctx: &RequestContext, id: RecordId) -> RecordResult<()> {
        let key = self.cache.key(id);
        self.cache_read(ctx, "del", &key, self.cache.del(id)).await?;
        Ok(())
    }

    /// Snapshot of hit, miss, error and gate counters since construction.
    pub fn stats(&self) -> RepositoryStats {
        RepositoryStats {
            cache_hits: self.counters.cache_hits.load(Ordering::Relaxed),
            negative_hits: self.counters.negative_hits.load(Ordering::Relaxed),
            cache_misses: self.counters.cache_misses.load(Ordering::Relaxed),
            cache_errors: self.counters.cache_errors.load(Ordering::Relaxed),
            store_queries: self.counters.store_queries.load(Ordering::Relaxed),
            batch_store_queries: self.counters.batch_store_queries.load(Ordering::Relaxed),
            gate: self.gate.stats(),
        }
    }

    // ========================================================================
    // TIER CALLS
    // ========================================================================

    /// Cache call raced against the caller's context and bounded by the
    /// cache timeout. A failed or timed-out call yields `Ok(None)`; only
    /// cancellation of `ctx` is an error.
    async fn cache_read<T>(
        &self,
        ctx: &RequestContext,
        operation: &'static str,
        key: &str,
        fut: impl Future<Output = CacheResult<T>>,
    ) -> RecordResult<Option<T>> {
        let bounded = tokio::time::timeout(self.config.cache_timeout, fut);
        Ok(self.degrade(operation, key, ctx.run(bounded).await?))
    }

    /// Best-effort cache write bounded by the cache timeout only. Runs to
    /// completion even if the caller's context has ended, so a committed
    /// write is never left with a stale entry because of a late cancel.
    async fn cache_write(&self, operation: &'static str, key: &str, fut: impl Future<Output = CacheResult<()>>) {
        let outcome = tokio::time::timeout(self.config.cache_timeout, fut).await;
        self.degrade(operation, key, outcome);
    }

    fn degrade<T>(
        &self,
        operation: &'static str,
        key: &str,
        outcome: Result<CacheResult<T>, tokio::time::error::Elapsed>,
    ) -> Option<T> {
        match outcome {
            Ok(Ok(value)) => Some(value),
            Ok(Err(e)) => {
                self.counters.cache_errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(operation, key, error = %e, "Cache operation failed, continuing without cache");
                None
            }
            Err(_) => {
                self.counters.cache_errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    operation,
                    key,
                    timeout = ?self.config.cache_timeout,
                    "Cache operation timed out, continuing without cache"
                );
                None
            }
        }
    }

    /// Store call raced against the caller's context and bounded by the
    /// store timeout.
    async fn store_call<T>(
        &self,
        ctx: &RequestContext,
        operation: &'static str,
        fut: impl Future<Output = RecordResult<T>>,
    ) -> RecordResult<T> {
        let bounded = tokio::time::timeout(self.config.store_timeout, fut);
        let result = match ctx.run(bounded).await? {
            Ok(result) => result,
            Err(_) => Err(RecordError::Storage(StorageError::Timeout {
                operation: operation.to_string(),
                after: self.config.store_timeout,
            })),
        };

        if let Err(e) = &result {
            if !e.is_duplicate_key() && !e.is_not_found() {
                tracing::error!(operation, error = %e, "Record store call failed");
            }
        }
        result
    }
}

impl<S: RecordStore> RecordRepository<S, RedisCacheTier> {
    /// Create a repository over a Redis tier, keyed under the namespace the
    /// tier was configured with.
    pub fn with_redis(store: Arc<S>, tier: Arc<RedisCacheTier>, config: RepositoryConfig) -> RecordResult<Self> {
        let keys = tier.key_space().clone();
        Self::with_key_space(store, tier, keys, config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCacheTier;
    use crate::store::InMemoryRecordStore;
    use std::time::Duration;

    type Repo = RecordRepository<InMemoryRecordStore, InMemoryCacheTier>;

    fn repo() -> Repo {
        RecordRepository::new(
            Arc::new(InMemoryRecordStore::new()),
            Arc::new(InMemoryCacheTier::new()),
            RepositoryConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = RepositoryConfig::default().with_positive_ttl(Duration::ZERO);
        let result = RecordRepository::new(
            Arc::new(InMemoryRecordStore::new()),
            Arc::new(InMemoryCacheTier::new()),
            config,
        );
        assert!(matches!(result, Err(RecordError::Config(_))));
    }

    #[tokio::test]
    async fn test_hit_after_miss() {
        let repo = repo();
        let ctx = RequestContext::new();
        let id = repo
            .create_record(&ctx, &NewRecord::new("amy", "a@x.com"))
            .await
            .unwrap();

        let first = repo.get_record(&ctx, id).await.unwrap();
        let second = repo.get_record(&ctx, id).await.unwrap();
        assert_eq!(first, second);

        let stats = repo.stats();
        assert_eq!(stats.cache_misses, 1);
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.gate.leaders, 1);
    }

    #[tokio::test]
    async fn test_missing_record_is_negatively_cached() {
        let repo = repo();
        let ctx = RequestContext::new();
        assert_eq!(repo.get_record(&ctx, 77).await.unwrap(), None);
        assert_eq!(repo.get_record(&ctx, 77).await.unwrap(), None);

        let stats = repo.stats();
        assert_eq!(stats.negative_hits, 1);
        assert_eq!(stats.store_queries, 1);
        assert!(repo.cache().get(77).await.unwrap().is_negative());
    }

    #[tokio::test]
    async fn test_create_clears_negative_marker_for_new_id() {
        let repo = repo();
        let ctx = RequestContext::new();
        assert_eq!(repo.get_record(&ctx, 1).await.unwrap(), None);

        let id = repo
            .create_record(&ctx, &NewRecord::new("amy", "a@x.com"))
            .await
            .unwrap();
        assert_eq!(id, 1);
        assert_eq!(repo.get_record(&ctx, 1).await.unwrap().unwrap().username, "amy");
    }

    #[tokio::test]
    async fn test_update_invalidates_instead_of_writing() {
        let repo = repo();
        let ctx = RequestContext::new();
        let id = repo
            .create_record(&ctx, &NewRecord::new("amy", "a@x.com"))
            .await
            .unwrap();
        repo.get_record(&ctx, id).await.unwrap();

        repo.update_record(&ctx, id, &RecordPatch::new().email("amy@new.com"))
            .await
            .unwrap();
        assert!(repo.cache().get(id).await.unwrap().is_absent());
        assert_eq!(
            repo.get_record(&ctx, id).await.unwrap().unwrap().email,
            "amy@new.com"
        );
    }

    #[tokio::test]
    async fn test_update_missing_record() {
        let repo = repo();
        let ctx = RequestContext::new();
        let err = repo
            .update_record(&ctx, 5, &RecordPatch::new().username("x"))
            .await
            .unwrap_err();
        assert_eq!(err, RecordError::NotFound { id: 5 });
    }

    #[tokio::test]
    async fn test_empty_patch_is_noop() {
        let repo = repo();
        let ctx = RequestContext::new();
        let id = repo
            .create_record(&ctx, &NewRecord::new("amy", "a@x.com"))
            .await
            .unwrap();
        let before = repo.get_record(&ctx, id).await.unwrap();

        repo.update_record(&ctx, id, &RecordPatch::new()).await.unwrap();
        assert_eq!(repo.get_record(&ctx, id).await.unwrap(), before);
        assert!(repo.cache().get(id).await.unwrap().is_hit());
    }

    #[tokio::test]
    async fn test_batch_preserves_first_occurrence_order() {
        let repo = repo();
        let ctx = RequestContext::new();
        for name in ["a", "b", "c"] {
            repo.create_record(&ctx, &NewRecord::new(name, format!("{name}@x.com")))
                .await
                .unwrap();
        }
        repo.get_record(&ctx, 2).await.unwrap();

        let records = repo.batch_get_records(&ctx, &[3, 2, 9, 3, 1]).await.unwrap();
        let ids: Vec<RecordId> = records.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![3, 2, 1]);
        assert_eq!(repo.stats().batch_store_queries, 1);
    }

    #[tokio::test]
    async fn test_empty_batch_touches_nothing() {
        let repo = repo();
        let records = repo.batch_get_records(&RequestContext::new(), &[]).await.unwrap();
        assert!(records.is_empty());
        assert_eq!(repo.stats(), RepositoryStats::default());
    }

    #[tokio::test]
    async fn test_cancelled_context() {
        let repo = repo();
        let ctx = RequestContext::new();
        ctx.cancel();
        assert_eq!(repo.get_record(&ctx, 1).await, Err(RecordError::Cancelled));
        assert_eq!(
            repo.batch_get_records(&ctx, &[1]).await,
            Err(RecordError::Cancelled)
        );
        assert_eq!(
            repo.create_record(&ctx, &NewRecord::new("amy", "a@x.com")).await,
            Err(RecordError::Cancelled)
        );
        assert!(repo.store().is_empty());
    }

    #[tokio::test]
    async fn test_invalidate_drops_entry() {
        let repo = repo();
        let ctx = RequestContext::new();
        let id = repo
            .create_record(&ctx, &NewRecord::new("amy", "a@x.com"))
            .await
            .unwrap();
        repo.get_record(&ctx, id).await.unwrap();
        assert!(repo.cache().get(id).await.unwrap().is_hit());

        repo.invalidate(&ctx, id).await.unwrap();
        assert!(repo.cache().get(id).await.unwrap().is_absent());
    }
}
