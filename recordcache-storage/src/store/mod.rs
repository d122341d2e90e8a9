//! Record store trait and implementations.
//!
//! The store is the source of truth. "No such row" is reported as `Ok(None)`
//! (or an omitted id for batches) and never as an error.

use async_trait::async_trait;
use recordcache_core::{NewRecord, Record, RecordId, RecordPatch, RecordResult};

pub mod memory;
pub mod postgres;

pub use memory::InMemoryRecordStore;
pub use postgres::PgRecordStore;

/// Async access to the authoritative record store.
///
/// Implementations must be safe to call concurrently from many tasks and
/// must enforce uniqueness of `username`, `email` and non-empty `phone`,
/// reporting a collision as `StorageError::DuplicateKey`.
#[async_trait]
pub trait RecordStore: Send + Sync {
    // ========================================================================
    // READS
    // ========================================================================

    /// Get a record by id.
    async fn get_by_id(&self, id: RecordId) -> RecordResult<Option<Record>>;

    /// Get a record by its unique username.
    async fn get_by_username(&self, username: &str) -> RecordResult<Option<Record>>;

    /// Get a record by its unique email.
    async fn get_by_email(&self, email: &str) -> RecordResult<Option<Record>>;

    /// Get a record by its unique phone number.
    async fn get_by_phone(&self, phone: &str) -> RecordResult<Option<Record>>;

    /// Get every record whose id is in `ids`, in any order.
    ///
    /// Ids with no row are omitted. Duplicated ids yield one record.
    async fn batch_get(&self, ids: &[RecordId]) -> RecordResult<Vec<Record>>;

    // ========================================================================
    // WRITES
    // ========================================================================

    /// Insert a record and return its assigned id.
    async fn insert(&self, data: &NewRecord) -> RecordResult<RecordId>;

    /// Apply `patch` to record `id`.
    ///
    /// Returns `StorageError::NotFound` if the record does not exist.
    async fn update(&self, id: RecordId, patch: &RecordPatch) -> RecordResult<()>;
}
