//! Value encoding for cached entities.
//!
//! Entities are stored as JSON. The negative marker is the single byte `*`,
//! which is never a valid JSON document, so the two cannot be confused.

use recordcache_core::CacheError;
use serde::{de::DeserializeOwned, Serialize};

use super::lookup::CacheLookup;

/// Stored in place of a value to mean "confirmed absent".
pub const NEGATIVE_SENTINEL: &[u8] = b"*";

/// Encode an entity for storage under `key`.
pub fn encode<T: Serialize>(key: &str, value: &T) -> Result<Vec<u8>, CacheError> {
    serde_json::to_vec(value).map_err(|e| CacheError::Codec {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

/// Decode a stored value. The sentinel decodes to [`CacheLookup::Negative`].
pub fn decode<T: DeserializeOwned>(key: &str, bytes: &[u8]) -> Result<CacheLookup<T>, CacheError> {
    if bytes == NEGATIVE_SENTINEL {
        return Ok(CacheLookup::Negative);
    }
    serde_json::from_slice(bytes)
        .map(CacheLookup::Hit)
        .map_err(|e| CacheError::Codec {
            key: key.to_string(),
            reason: e.to_string(),
        })
}
