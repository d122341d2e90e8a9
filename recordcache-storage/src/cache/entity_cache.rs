//! Typed entity cache over any [`CacheTier`].

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use recordcache_core::{RecordId, UNPERSISTED_ID};

use super::codec::{self, NEGATIVE_SENTINEL};
use super::key::KeySpace;
use super::lookup::CacheLookup;
use super::traits::{CacheResult, CacheTier, CacheableEntity};

/// Typed view of a cache tier for one entity family.
///
/// Handles key derivation, JSON encoding and the negative marker. All
/// errors are returned as [`recordcache_core::CacheError`]; deciding what a
/// failure means is left to the caller.
pub struct EntityCache<T, C> {
    tier: Arc<C>,
    keys: KeySpace,
    _entity: PhantomData<fn() -> T>,
}

impl<T, C> Clone for EntityCache<T, C> {
    fn clone(&self) -> Self {
        Self {
            tier: Arc::clone(&self.tier),
            keys: self.keys.clone(),
            _entity: PhantomData,
        }
    }
}

impl<T, C> EntityCache<T, C>
where
    T: CacheableEntity,
    C: CacheTier,
{
    /// Wrap `tier`, deriving keys through `keys`.
    pub fn new(tier: Arc<C>, keys: KeySpace) -> Self {
        Self {
            tier,
            keys,
            _entity: PhantomData,
        }
    }

    /// Cache key for `id`.
    pub fn key(&self, id: RecordId) -> String {
        self.keys.key::<T>(id)
    }

    /// The key space entries are written under.
    pub fn key_space(&self) -> &KeySpace {
        &self.keys
    }

    /// The underlying tier.
    pub fn tier(&self) -> &Arc<C> {
        &self.tier
    }

    /// Look up one entity.
    pub async fn get(&self, id: RecordId) -> CacheResult<CacheLookup<T>> {
        let key = self.key(id);
        match self.tier.get(&key).await? {
            Some(bytes) => codec::decode(&key, &bytes),
            None => Ok(CacheLookup::Absent),
        }
    }

    /// Look up several entities in one round trip.
    ///
    /// Every requested id appears in the result. A malformed entry is logged
    /// and reported as [`CacheLookup::Absent`] so the caller refetches it.
    pub async fn multi_get(&self, ids: &[RecordId]) -> CacheResult<HashMap<RecordId, CacheLookup<T>>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let keys: Vec<String> = ids.iter().map(|id| self.key(*id)).collect();
        let mut found = self.tier.multi_get(&keys).await?;

        let mut out = HashMap::with_capacity(ids.len());
        for (id, key) in ids.iter().zip(keys) {
            let lookup = match found.remove(&key) {
                Some(bytes) => match codec::decode(&key, &bytes) {
                    Ok(lookup) => lookup,
                    Err(e) => {
                        tracing::warn!(operation = "multi_get", key = %key, error = %e, "Dropping malformed cache entry");
                        CacheLookup::Absent
                    }
                },
                None => CacheLookup::Absent,
            };
            out.insert(*id, lookup);
        }
        Ok(out)
    }

    /// Store an entity. Unpersisted entities (id `0`) are skipped.
    pub async fn set(&self, value: &T, ttl: Duration) -> CacheResult<()> {
        let id = value.entity_id();
        if id == UNPERSISTED_ID {
            return Ok(());
        }
        let key = self.key(id);
        let bytes = codec::encode(&key, value)?;
        self.tier.set(&key, bytes, ttl).await
    }

    /// Store several entities with one shared TTL.
    ///
    /// Unpersisted entities are skipped. An empty batch is a no-op.
    pub async fn multi_set(&self, values: &[T], ttl: Duration) -> CacheResult<()> {
        let mut entries = Vec::with_capacity(values.len());
        for value in values {
            let id = value.entity_id();
            if id == UNPERSISTED_ID {
                continue;
            }
            let key = self.key(id);
            let bytes = codec::encode(&key, value)?;
            entries.push((key, bytes));
        }
        if entries.is_empty() {
            return Ok(());
        }
        self.tier.multi_set(entries, ttl).await
    }

    /// Record that `id` does not exist.
    pub async fn set_negative(&self, id: RecordId, ttl: Duration) -> CacheResult<()> {
        self.tier.set(&self.key(id), NEGATIVE_SENTINEL.to_vec(), ttl).await
    }

    /// Remove whatever is cached for `id`, positive or negative.
    pub async fn del(&self, id: RecordId) -> CacheResult<()> {
        self.tier.del(&self.key(id)).await
    }
}
