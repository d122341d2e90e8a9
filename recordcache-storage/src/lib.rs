//! recordcache Storage - Cache-Aside Access Layer
//!
//! Everything between the service layer and the two backing tiers:
//!
//! - [`cache`]: the byte-level [`CacheTier`] capability, its in-memory and
//!   Redis implementations, and the typed [`EntityCache`] with negative
//!   markers.
//! - [`store`]: the [`RecordStore`] capability with in-memory and PostgreSQL
//!   implementations.
//! - [`gate`]: the [`DedupGate`] collapsing concurrent fetches of one key.
//! - [`repository`]: the [`RecordRepository`] running the cache-aside protocol.
//!
//! Every repository operation takes a [`RequestContext`] so callers can
//! cancel or bound the whole call.

pub mod cache;
pub mod context;
pub mod gate;
pub mod repository;
pub mod store;

pub use cache::{
    CacheLookup, CacheStats, CacheTier, CacheableEntity, EntityCache, InMemoryCacheTier, KeySpace,
    RedisCacheTier,
};
pub use context::RequestContext;
pub use gate::{DedupGate, GateStats};
pub use repository::{RecordRepository, RepositoryStats};
pub use store::{InMemoryRecordStore, PgRecordStore, RecordStore};
