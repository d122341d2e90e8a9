//! Cache key derivation.
//!
//! Keys are a deterministic function of entity type and id:
//! `record:info:<id>`, optionally prefixed by a namespace
//! (`<ns>:record:info:<id>`) so several deployments can share one tier.

use recordcache_core::{CacheTierConfig, RecordId};

use super::traits::CacheableEntity;

/// Key derivation scoped to an optional namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct KeySpace {
    namespace: String,
}

impl KeySpace {
    /// Create a key space. An empty namespace yields bare `record:info:<id>` keys.
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    /// Key space named by the tier configuration's namespace.
    pub fn from_config(config: &CacheTierConfig) -> Self {
        Self::new(config.namespace.clone())
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Build the cache key for an entity id.
    pub fn key<T: CacheableEntity>(&self, id: RecordId) -> String {
        if self.namespace.is_empty() {
            format!("{}:{}", T::KEY_PREFIX, id)
        } else {
            format!("{}:{}:{}", self.namespace, T::KEY_PREFIX, id)
        }
    }
}
