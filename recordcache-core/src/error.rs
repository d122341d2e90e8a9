//! Error types for recordcache operations
//!
//! Every enum here is `Clone`: a single store result is fanned out to every
//! caller waiting on the same in-flight fetch.

use std::time::Duration;
use thiserror::Error;

use crate::RecordId;

/// Record store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Record not found: {id}")]
    NotFound { id: RecordId },

    #[error("Duplicate value for unique field {field}: {value}")]
    DuplicateKey { field: String, value: String },

    #[error("Query {operation} failed: {reason}")]
    QueryFailed { operation: String, reason: String },

    #[error("Store connection failed: {reason}")]
    Connection { reason: String },

    #[error("Store operation {operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    #[error("Invalid row: {reason}")]
    InvalidRow { reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Cache tier errors.
///
/// These never escape the repository; they are logged and the operation
/// degrades to the record store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache tier unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Cache {operation} failed for {key}: {reason}")]
    Command {
        operation: String,
        key: String,
        reason: String,
    },

    #[error("Malformed cache entry {key}: {reason}")]
    Codec { key: String, reason: String },

    #[error("Cache {operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all recordcache errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Record {id} does not exist")]
    NotFound { id: RecordId },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Request deadline exceeded")]
    DeadlineExceeded,

    #[error("In-flight fetch for {key} was abandoned before completing")]
    FetchAbandoned { key: String },
}

impl RecordError {
    /// True for "no such record", whether reported by the repository or the store.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. } | Self::Storage(StorageError::NotFound { .. })
        )
    }

    /// True when a create or update collided with a unique attribute.
    pub fn is_duplicate_key(&self) -> bool {
        matches!(self, Self::Storage(StorageError::DuplicateKey { .. }))
    }

    /// True when the caller's context ended the operation.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled | Self::DeadlineExceeded)
    }
}

/// Result type alias for recordcache operations.
pub type RecordResult<T> = Result<T, RecordError>;

// =============================================================================
// TESTS
// =============================================================================
