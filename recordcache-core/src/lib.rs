//! recordcache Core - Entity Types
//!
//! Pure data structures shared by every recordcache crate: the record model,
//! its insert and patch payloads, the error taxonomy and configuration.
//! This crate contains no I/O.

use chrono::{DateTime, Utc};

pub mod config;
pub mod error;
pub mod record;

pub use config::{CacheTierConfig, RepositoryConfig, StoreConfig};
pub use error::{CacheError, ConfigError, RecordError, RecordResult, StorageError};
pub use record::{NewRecord, Record, RecordPatch, RecordStatus};

// ============================================================================
// IDENTITY TYPES
// ============================================================================

/// Record identifier assigned by the record store.
///
/// `0` (see [`UNPERSISTED_ID`]) marks a record that has not been persisted yet.
pub type RecordId = i64;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Identifier carried by a record that has not been persisted yet.
pub const UNPERSISTED_ID: RecordId = 0;
