//! recordcache Test Utilities
//!
//! Shared test infrastructure for the recordcache workspace:
//! - Instrumented fakes for the record store and the cache tier
//! - Proptest generators for records and patches
//! - Fixtures for common repository setups
//! - Assertions for the error taxonomy
//! - Test logging setup

pub use recordcache_core::{
    CacheError, NewRecord, Record, RecordError, RecordId, RecordPatch, RecordResult,
    RecordStatus, RepositoryConfig, StorageError, Timestamp,
};
pub use recordcache_storage::{
    CacheStats, CacheTier, InMemoryCacheTier, InMemoryRecordStore, RecordRepository,
    RecordStore, RequestContext,
};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

// ============================================================================
// LOGGING
// ============================================================================

/// Install a test-friendly tracing subscriber honouring `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_test_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

// ============================================================================
// FAKE RECORD STORE
// ============================================================================

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// [`InMemoryRecordStore`] wrapper that counts calls and can be made slow or
/// failing.
#[derive(Debug, Default)]
pub struct CountingRecordStore {
    inner: InMemoryRecordStore,
    get_by_id_calls: AtomicUsize,
    batch_calls: AtomicUsize,
    insert_calls: AtomicUsize,
    update_calls: AtomicUsize,
    lookup_calls: AtomicUsize,
    latency_ms: AtomicU64,
    failing: AtomicBool,
    last_batch: Mutex<Vec<RecordId>>,
}

impl CountingRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inner(&self) -> &InMemoryRecordStore {
        &self.inner
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms.store(millis(latency), Ordering::SeqCst);
    }

    /// Make every call fail with a connection error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn get_by_id_calls(&self) -> usize {
        self.get_by_id_calls.load(Ordering::SeqCst)
    }

    pub fn batch_calls(&self) -> usize {
        self.batch_calls.load(Ordering::SeqCst)
    }

    pub fn insert_calls(&self) -> usize {
        self.insert_calls.load(Ordering::SeqCst)
    }

    pub fn update_calls(&self) -> usize {
        self.update_calls.load(Ordering::SeqCst)
    }

    /// Calls to the username / email / phone lookups.
    pub fn lookup_calls(&self) -> usize {
        self.lookup_calls.load(Ordering::SeqCst)
    }

    /// Read calls of any kind.
    pub fn read_calls(&self) -> usize {
        self.get_by_id_calls() + self.batch_calls() + self.lookup_calls()
    }

    /// Ids passed to the most recent `batch_get`.
    pub fn last_batch(&self) -> Vec<RecordId> {
        self.last_batch
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn reset_counts(&self) {
        for counter in [
            &self.get_by_id_calls,
            &self.batch_calls,
            &self.insert_calls,
            &self.update_calls,
            &self.lookup_calls,
        ] {
            counter.store(0, Ordering::SeqCst);
        }
    }

    async fn enter(&self, counter: &AtomicUsize) -> RecordResult<()> {
        counter.fetch_add(1, Ordering::SeqCst);
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(StorageError::Connection {
                reason: "injected store failure".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for CountingRecordStore {
    async fn get_by_id(&self, id: RecordId) -> RecordResult<Option<Record>> {
        self.enter(&self.get_by_id_calls).await?;
        self.inner.get_by_id(id).await
    }

    async fn get_by_username(&self, username: &str) -> RecordResult<Option<Record>> {
        self.enter(&self.lookup_calls).await?;
        self.inner.get_by_username(username).await
    }

    async fn get_by_email(&self, email: &str) -> RecordResult<Option<Record>> {
        self.enter(&self.lookup_calls).await?;
        self.inner.get_by_email(email).await
    }

    async fn get_by_phone(&self, phone: &str) -> RecordResult<Option<Record>> {
        self.enter(&self.lookup_calls).await?;
        self.inner.get_by_phone(phone).await
    }

    async fn batch_get(&self, ids: &[RecordId]) -> RecordResult<Vec<Record>> {
        *self.last_batch.lock().unwrap_or_else(PoisonError::into_inner) = ids.to_vec();
        self.enter(&self.batch_calls).await?;
        self.inner.batch_get(ids).await
    }

    async fn insert(&self, data: &NewRecord) -> RecordResult<RecordId> {
        self.enter(&self.insert_calls).await?;
        self.inner.insert(data).await
    }

    async fn update(&self, id: RecordId, patch: &RecordPatch) -> RecordResult<()> {
        self.enter(&self.update_calls).await?;
        self.inner.update(id, patch).await
    }
}

// ============================================================================
// FAKE CACHE TIER
// ============================================================================

/// [`InMemoryCacheTier`] wrapper with injectable failures and latency.
#[derive(Debug, Default)]
pub struct FaultyCacheTier {
    inner: InMemoryCacheTier,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    delay_ms: AtomicU64,
    read_calls: AtomicUsize,
    write_calls: AtomicUsize,
}

impl FaultyCacheTier {
    pub fn new() -> Self {
        Self::default()
    }

    /// A tier on which every operation fails.
    pub fn failing() -> Self {
        let tier = Self::new();
        tier.set_fail_reads(true);
        tier.set_fail_writes(true);
        tier
    }

    pub fn inner(&self) -> &InMemoryCacheTier {
        &self.inner
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Delay every operation by `delay` before answering.
    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms.store(millis(delay), Ordering::SeqCst);
    }

    pub fn read_calls(&self) -> usize {
        self.read_calls.load(Ordering::SeqCst)
    }

    pub fn write_calls(&self) -> usize {
        self.write_calls.load(Ordering::SeqCst)
    }

    async fn enter(&self, operation: &str, write: bool) -> Result<(), CacheError> {
        let (counter, failing) = if write {
            (&self.write_calls, &self.fail_writes)
        } else {
            (&self.read_calls, &self.fail_reads)
        };
        counter.fetch_add(1, Ordering::SeqCst);

        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if failing.load(Ordering::SeqCst) {
            return Err(CacheError::Unavailable {
                reason: format!("injected {} failure", operation),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl CacheTier for FaultyCacheTier {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        self.enter("get", false).await?;
        self.inner.get(key).await
    }

    async fn multi_get(&self, keys: &[String]) -> Result<HashMap<String, Vec<u8>>, CacheError> {
        self.enter("multi_get", false).await?;
        self.inner.multi_get(keys).await
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        self.enter("set", true).await?;
        self.inner.set(key, value, ttl).await
    }

    async fn multi_set(&self, entries: Vec<(String, Vec<u8>)>, ttl: Duration) -> Result<(), CacheError> {
        self.enter("multi_set", true).await?;
        self.inner.multi_set(entries, ttl).await
    }

    async fn del(&self, key: &str) -> Result<(), CacheError> {
        self.enter("del", true).await?;
        self.inner.del(key).await
    }

    async fn stats(&self) -> Result<CacheStats, CacheError> {
        self.enter("stats", false).await?;
        self.inner.stats().await
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for records and patches.

    use super::*;
    use chrono::Utc;
    use proptest::prelude::*;

    /// Generate a positive record id.
    pub fn arb_record_id() -> impl Strategy<Value = RecordId> {
        1i64..10_000
    }

    pub fn arb_username() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9_]{2,15}"
    }

    pub fn arb_email() -> impl Strategy<Value = String> {
        ("[a-z][a-z0-9.]{0,11}", "[a-z]{2,8}").prop_map(|(local, domain)| format!("{}@{}.com", local, domain))
    }

    /// Generate a phone number, sometimes empty.
    pub fn arb_phone() -> impl Strategy<Value = String> {
        prop_oneof![Just(String::new()), "[0-9]{3}-[0-9]{4}"]
    }

    pub fn arb_status() -> impl Strategy<Value = RecordStatus> {
        prop_oneof![
            Just(RecordStatus::Normal),
            Just(RecordStatus::Disabled),
            Just(RecordStatus::Deleted),
        ]
    }

    /// Generate a Timestamp between 2020 and 2030.
    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        (1577836800i64..1893456000i64).prop_map(|secs| {
            chrono::DateTime::from_timestamp(secs, 0).unwrap_or_else(Utc::now)
        })
    }

    pub fn arb_new_record() -> impl Strategy<Value = NewRecord> {
        (
            arb_username(),
            arb_email(),
            arb_phone(),
            "[a-f0-9]{0,32}",
            arb_status(),
        )
            .prop_map(|(username, email, phone, password_hash, status)| NewRecord {
                username,
                email,
                phone,
                password_hash,
                status,
            })
    }

    /// Generate a persisted record.
    pub fn arb_record() -> impl Strategy<Value = Record> {
        (arb_record_id(), arb_new_record(), arb_timestamp())
            .prop_map(|(id, data, now)| Record::from_new(id, &data, now))
    }

    /// Generate a patch touching any subset of fields.
    pub fn arb_record_patch() -> impl Strategy<Value = RecordPatch> {
        (
            prop::option::of(arb_username()),
            prop::option::of(arb_email()),
            prop::option::of(arb_phone()),
            prop::option::of("[a-f0-9]{8,32}"),
            prop::option::of(arb_status()),
        )
            .prop_map(|(username, email, phone, password_hash, status)| RecordPatch {
                username,
                email,
                phone,
                password_hash,
                status,
            })
    }

    /// Generate a list of record ids that may contain duplicates.
    pub fn arb_id_batch(max_id: RecordId, max_len: usize) -> impl Strategy<Value = Vec<RecordId>> {
        prop::collection::vec(1..=max_id, 0..=max_len)
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built fixtures for common repository setups.

    use super::*;
    use std::sync::Arc;

    /// The canonical first record.
    pub fn amy() -> NewRecord {
        NewRecord::new("amy", "a@x.com")
    }

    /// A distinct, valid insert payload for index `n`.
    pub fn numbered_record(n: usize) -> NewRecord {
        NewRecord::new(format!("user{}", n), format!("user{}@x.com", n))
            .with_phone(format!("555-{:04}", n))
    }

    /// Short timeouts so degraded paths finish quickly in tests.
    pub fn fast_config() -> RepositoryConfig {
        RepositoryConfig::default()
            .with_cache_timeout(Duration::from_millis(50))
            .with_store_timeout(Duration::from_secs(2))
    }

    pub type CountingRepository = RecordRepository<CountingRecordStore, InMemoryCacheTier>;
    pub type FaultyRepository = RecordRepository<CountingRecordStore, FaultyCacheTier>;

    /// Repository over a counting store and a healthy in-memory cache.
    pub fn counting_repository(config: RepositoryConfig) -> RecordResult<CountingRepository> {
        RecordRepository::new(
            Arc::new(CountingRecordStore::new()),
            Arc::new(InMemoryCacheTier::new()),
            config,
        )
    }

    /// Repository over a counting store and a fault-injectable cache.
    pub fn faulty_repository(tier: FaultyCacheTier) -> RecordResult<FaultyRepository> {
        RecordRepository::new(Arc::new(CountingRecordStore::new()), Arc::new(tier), fast_config())
    }

    /// Insert `count` numbered records directly into `store`, bypassing any
    /// cache, and return their ids.
    pub async fn seed(store: &CountingRecordStore, count: usize) -> RecordResult<Vec<RecordId>> {
        let mut ids = Vec::with_capacity(count);
        for n in 0..count {
            ids.push(store.inner().insert(&numbered_record(n)).await?);
        }
        Ok(ids)
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for recordcache error variants.

    use super::*;

    /// Assert that a create or update failed on the given unique field.
    #[track_caller]
    pub fn assert_duplicate_key<T: std::fmt::Debug>(result: &RecordResult<T>, field: &str) {
        match result {
            Err(RecordError::Storage(StorageError::DuplicateKey { field: f, .. })) => {
                assert_eq!(f, field, "Wrong field in DuplicateKey error");
            }
            other => panic!("Expected DuplicateKey on {}, got: {:?}", field, other),
        }
    }

    /// Assert that a result is a repository-level NotFound for `id`.
    #[track_caller]
    pub fn assert_not_found<T: std::fmt::Debug>(result: &RecordResult<T>, id: RecordId) {
        match result {
            Err(RecordError::NotFound { id: actual }) => {
                assert_eq!(*actual, id, "Wrong id in NotFound error");
            }
            other => panic!("Expected NotFound for {}, got: {:?}", id, other),
        }
    }

    /// Assert that a result is a store failure other than NotFound/DuplicateKey.
    #[track_caller]
    pub fn assert_store_failure<T: std::fmt::Debug>(result: &RecordResult<T>) {
        match result {
            Err(RecordError::Storage(e))
                if !matches!(e, StorageError::NotFound { .. } | StorageError::DuplicateKey { .. }) => {}
            other => panic!("Expected store failure, got: {:?}", other),
        }
    }

    /// Assert that two records agree on every client-supplied field.
    #[track_caller]
    pub fn assert_matches_new(record: &Record, data: &NewRecord) {
        assert_eq!(record.username, data.username);
        assert_eq!(record.email, data.email);
        assert_eq!(record.phone, data.phone);
        assert_eq!(record.password_hash, data.password_hash);
        assert_eq!(record.status, data.status);
    }
}

// ============================================================================
// TESTS
// ============================================================================
