//! Record model, insert payload and partial-update payload.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::{RecordId, Timestamp, UNPERSISTED_ID};

// ============================================================================
// ENUMS
// ============================================================================

/// Account status of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RecordStatus {
    /// Active record (default for new records)
    #[default]
    Normal,
    /// Record exists but has been administratively disabled
    Disabled,
    /// Soft-deleted record
    Deleted,
}

impl RecordStatus {
    /// Integer code used by the record store.
    pub fn as_i16(self) -> i16 {
        match self {
            Self::Normal => 1,
            Self::Disabled => 2,
            Self::Deleted => 3,
        }
    }

    /// Parse the integer code used by the record store.
    pub fn from_i16(code: i16) -> Option<Self> {
        match code {
            1 => Some(Self::Normal),
            2 => Some(Self::Disabled),
            3 => Some(Self::Deleted),
            _ => None,
        }
    }
}

// ============================================================================
// RECORD
// ============================================================================

/// Canonical record held by the record store.
///
/// `username` and `email` are unique across all records; `phone` is unique
/// when non-empty. Uniqueness is enforced by the store, never by the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    pub username: String,
    pub email: String,
    pub phone: String,
    pub password_hash: String,
    pub status: RecordStatus,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Record {
    /// Build a persisted record from an insert payload and a store-assigned id.
    pub fn from_new(id: RecordId, data: &NewRecord, now: Timestamp) -> Self {
        Self {
            id,
            username: data.username.clone(),
            email: data.email.clone(),
            phone: data.phone.clone(),
            password_hash: data.password_hash.clone(),
            status: data.status,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the record carries a store-assigned id.
    pub fn is_persisted(&self) -> bool {
        self.id != UNPERSISTED_ID
    }
}

/// Insert payload. The store assigns `id`, `created_at` and `updated_at`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NewRecord {
    pub username: String,
    pub email: String,
    pub phone: String,
    pub password_hash: String,
    pub status: RecordStatus,
}

impl NewRecord {
    /// Create an insert payload with the two mandatory unique attributes.
    pub fn new(username: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            email: email.into(),
            ..Default::default()
        }
    }

    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = phone.into();
        self
    }

    pub fn with_password_hash(mut self, hash: impl Into<String>) -> Self {
        self.password_hash = hash.into();
        self
    }

    pub fn with_status(mut self, status: RecordStatus) -> Self {
        self.status = status;
        self
    }
}

// ============================================================================
// PATCH
// ============================================================================

/// Partial update payload. `None` fields are left unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RecordPatch {
    pub username: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub password_hash: Option<String>,
    pub status: Option<RecordStatus>,
}

impl RecordPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }

    pub fn password_hash(mut self, hash: impl Into<String>) -> Self {
        self.password_hash = Some(hash.into());
        self
    }

    pub fn status(mut self, status: RecordStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// True when the patch would not change any field.
    pub fn is_empty(&self) -> bool {
        self.username.is_none()
            && self.email.is_none()
            && self.phone.is_none()
            && self.password_hash.is_none()
            && self.status.is_none()
    }

    /// Apply the patch to a record in place and bump `updated_at`.
    ///
    /// An empty patch leaves the record untouched, timestamps included.
    pub fn apply_to(&self, record: &mut Record) {
        if self.is_empty() {
            return;
        }
        if let Some(username) = &self.username {
            record.username = username.clone();
        }
        if let Some(email) = &self.email {
            record.email = email.clone();
        }
        if let Some(phone) = &self.phone {
            record.phone = phone.clone();
        }
        if let Some(hash) = &self.password_hash {
            record.password_hash = hash.clone();
        }
        if let Some(status) = self.status {
            record.status = status;
        }
        record.updated_at = Utc::now();
    }
}

// =============================================================================
// TESTS
// =============================================================================
