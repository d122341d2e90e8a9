//! In-memory record store.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::Utc;
use recordcache_core::{
    NewRecord, Record, RecordId, RecordPatch, RecordResult, StorageError,
};

use super::RecordStore;

#[derive(Debug)]
struct StoreInner {
    records: BTreeMap<RecordId, Record>,
    next_id: RecordId,
}

impl Default for StoreInner {
    fn default() -> Self {
        Self {
            records: BTreeMap::new(),
            next_id: 1,
        }
    }
}

impl StoreInner {
    /// Find the first unique field of `candidate` already taken by a record
    /// other than `except`.
    fn find_conflict(
        &self,
        username: &str,
        email: &str,
        phone: &str,
        except: Option<RecordId>,
    ) -> Option<StorageError> {
        let others = self
            .records
            .values()
            .filter(|record| Some(record.id) != except);
        for record in others {
            if record.username == username {
                return Some(duplicate("username", username));
            }
            if record.email == email {
                return Some(duplicate("email", email));
            }
            if !phone.is_empty() && record.phone == phone {
                return Some(duplicate("phone", phone));
            }
        }
        None
    }

    fn find_by(&self, matches: impl Fn(&Record) -> bool) -> Option<Record> {
        self.records.values().find(|record| matches(record)).cloned()
    }
}

fn duplicate(field: &str, value: &str) -> StorageError {
    StorageError::DuplicateKey {
        field: field.to_string(),
        value: value.to_string(),
    }
}

/// Process-local [`RecordStore`] with the same uniqueness rules as the
/// PostgreSQL schema. Ids are assigned sequentially from 1.
#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    inner: RwLock<StoreInner>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.read().map(|inner| inner.records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove all records. Id assignment continues where it left off.
    pub fn clear(&self) -> RecordResult<()> {
        self.write()?.records.clear();
        Ok(())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, StoreInner>, StorageError> {
        self.inner.read().map_err(|_| StorageError::LockPoisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, StoreInner>, StorageError> {
        self.inner.write().map_err(|_| StorageError::LockPoisoned)
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn get_by_id(&self, id: RecordId) -> RecordResult<Option<Record>> {
        Ok(self.read()?.records.get(&id).cloned())
    }

    async fn get_by_username(&self, username: &str) -> RecordResult<Option<Record>> {
        Ok(self.read()?.find_by(|record| record.username == username))
    }

    async fn get_by_email(&self, email: &str) -> RecordResult<Option<Record>> {
        Ok(self.read()?.find_by(|record| record.email == email))
    }

    async fn get_by_phone(&self, phone: &str) -> RecordResult<Option<Record>> {
        if phone.is_empty() {
            return Ok(None);
        }
        Ok(self.read()?.find_by(|record| record.phone == phone))
    }

    async fn batch_get(&self, ids: &[RecordId]) -> RecordResult<Vec<Record>> {
        let wanted: BTreeSet<RecordId> = ids.iter().copied().collect();
        let inner = self.read()?;
        Ok(wanted
            .into_iter()
            .filter_map(|id| inner.records.get(&id).cloned())
            .collect())
    }

    async fn insert(&self, data: &NewRecord) -> RecordResult<RecordId> {
        let mut inner = self.write()?;
        if let Some(conflict) = inner.find_conflict(&data.username, &data.email, &data.phone, None) {
            return Err(conflict.into());
        }

        let id = inner.next_id;
        inner.next_id += 1;
        inner.records.insert(id, Record::from_new(id, data, Utc::now()));
        Ok(id)
    }

    async fn update(&self, id: RecordId, patch: &RecordPatch) -> RecordResult<()> {
        let mut inner = self.write()?;
        let mut updated = inner
            .records
            .get(&id)
            .cloned()
            .ok_or(StorageError::NotFound { id })?;
        patch.apply_to(&mut updated);

        if let Some(conflict) =
            inner.find_conflict(&updated.username, &updated.email, &updated.phone, Some(id))
        {
            return Err(conflict.into());
        }
        inner.records.insert(id, updated);
        Ok(())
    }
}
