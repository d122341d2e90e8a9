//! PostgreSQL record store.
//!
//! Uses a deadpool-postgres connection pool and parameterised SQL. Unique
//! constraint violations are mapped to `StorageError::DuplicateKey` using the
//! constraint names created by [`PgRecordStore::ensure_schema`].

use async_trait::async_trait;
use deadpool_postgres::{
    Config, ManagerConfig, Object, Pool, PoolConfig, PoolError, RecyclingMethod, Runtime,
};
use recordcache_core::{
    NewRecord, Record, RecordError, RecordId, RecordPatch, RecordResult, RecordStatus,
    StorageError, StoreConfig,
};
use tokio_postgres::error::SqlState;
use tokio_postgres::types::ToSql;
use tokio_postgres::{NoTls, Row};

use super::RecordStore;

const RECORD_COLUMNS: &str =
    "id, username, email, phone, password_hash, status, created_at, updated_at";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS records (
    id            BIGSERIAL PRIMARY KEY,
    username      TEXT NOT NULL,
    email         TEXT NOT NULL,
    phone         TEXT NOT NULL DEFAULT '',
    password_hash TEXT NOT NULL DEFAULT '',
    status        SMALLINT NOT NULL DEFAULT 1,
    created_at    TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at    TIMESTAMPTZ NOT NULL DEFAULT now(),
    CONSTRAINT records_username_key UNIQUE (username),
    CONSTRAINT records_email_key UNIQUE (email)
);
CREATE UNIQUE INDEX IF NOT EXISTS records_phone_key ON records (phone) WHERE phone <> '';
";

// ============================================================================
// CONNECTION POOL
// ============================================================================

/// Build a connection pool from `config`. No connection is opened until the
/// pool is first used.
pub fn create_pool(config: &StoreConfig) -> RecordResult<Pool> {
    config.validate()?;

    let mut cfg = Config::new();
    cfg.host = Some(config.host.clone());
    cfg.port = Some(config.port);
    cfg.dbname = Some(config.dbname.clone());
    cfg.user = Some(config.user.clone());
    cfg.password = Some(config.password.clone());

    cfg.manager = Some(ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    });

    let mut pool_cfg = PoolConfig::new(config.max_size);
    pool_cfg.timeouts.wait = Some(config.timeout);
    pool_cfg.timeouts.create = Some(config.timeout);
    cfg.pool = Some(pool_cfg);

    cfg.create_pool(Some(Runtime::Tokio1), NoTls).map_err(|e| {
        RecordError::Storage(StorageError::Connection {
            reason: format!("failed to create pool: {}", e),
        })
    })
}

// ============================================================================
// ERROR MAPPING
// ============================================================================

/// Unique field guarded by a constraint created in [`SCHEMA`].
fn unique_field(constraint: &str) -> Option<&'static str> {
    match constraint {
        "records_username_key" => Some("username"),
        "records_email_key" => Some("email"),
        "records_phone_key" => Some("phone"),
        _ => None,
    }
}

fn pool_error(err: PoolError) -> RecordError {
    tracing::error!(error = %err, "Connection pool error");
    let reason = match err {
        PoolError::Timeout(_) => "connection pool exhausted".to_string(),
        PoolError::Closed => "connection pool is closed".to_string(),
        other => format!("failed to acquire connection: {}", other),
    };
    RecordError::Storage(StorageError::Connection { reason })
}

fn query_error(operation: &str, err: tokio_postgres::Error) -> RecordError {
    tracing::error!(operation, error = %err, "Database error");
    RecordError::Storage(StorageError::QueryFailed {
        operation: operation.to_string(),
        reason: err.to_string(),
    })
}

/// Map a write error, recognising unique violations. `value_of` returns the
/// offending value for a field name.
fn write_error(
    operation: &str,
    err: tokio_postgres::Error,
    value_of: impl Fn(&str) -> String,
) -> RecordError {
    if err.code() == Some(&SqlState::UNIQUE_VIOLATION) {
        let field = err
            .as_db_error()
            .and_then(|db| db.constraint())
            .and_then(unique_field);
        if let Some(field) = field {
            return RecordError::Storage(StorageError::DuplicateKey {
                field: field.to_string(),
                value: value_of(field),
            });
        }
    }
    query_error(operation, err)
}

fn record_from_row(row: &Row) -> RecordResult<Record> {
    let invalid = |e: tokio_postgres::Error| {
        RecordError::Storage(StorageError::InvalidRow {
            reason: e.to_string(),
        })
    };
    let code: i16 = row.try_get("status").map_err(invalid)?;
    let status = RecordStatus::from_i16(code).ok_or_else(|| {
        RecordError::Storage(StorageError::InvalidRow {
            reason: format!("unknown status code {}", code),
        })
    })?;

    Ok(Record {
        id: row.try_get("id").map_err(invalid)?,
        username: row.try_get("username").map_err(invalid)?,
        email: row.try_get("email").map_err(invalid)?,
        phone: row.try_get("phone").map_err(invalid)?,
        password_hash: row.try_get("password_hash").map_err(invalid)?,
        status,
        created_at: row.try_get("created_at").map_err(invalid)?,
        updated_at: row.try_get("updated_at").map_err(invalid)?,
    })
}

/// `UPDATE` statement assigning `columns` in order as `$1..$n`, with the id
/// bound last.
fn build_update_sql(columns: &[&str]) -> String {
    let assignments: Vec<String> = columns
        .iter()
        .enumerate()
        .map(|(i, column)| format!("{} = ${}", column, i + 1))
        .collect();
    format!(
        "UPDATE records SET {}, updated_at = now() WHERE id = ${}",
        assignments.join(", "),
        columns.len() + 1
    )
}

// ============================================================================
// STORE
// ============================================================================

/// [`RecordStore`] backed by PostgreSQL.
#[derive(Clone)]
pub struct PgRecordStore {
    pool: Pool,
}

impl PgRecordStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Create a store with a fresh pool built from `config`.
    pub fn from_config(config: &StoreConfig) -> RecordResult<Self> {
        Ok(Self::new(create_pool(config)?))
    }

    /// Current pool size, for observability.
    pub fn pool_size(&self) -> usize {
        self.pool.status().size
    }

    /// Create the `records` table and its unique indexes if missing.
    pub async fn ensure_schema(&self) -> RecordResult<()> {
        let conn = self.conn().await?;
        conn.batch_execute(SCHEMA)
            .await
            .map_err(|e| query_error("ensure_schema", e))?;
        tracing::info!("Record schema ready");
        Ok(())
    }

    async fn conn(&self) -> RecordResult<Object> {
        self.pool.get().await.map_err(pool_error)
    }

    async fn get_one(
        &self,
        operation: &str,
        column: &str,
        value: &(dyn ToSql + Sync),
    ) -> RecordResult<Option<Record>> {
        let conn = self.conn().await?;
        let sql = format!("SELECT {} FROM records WHERE {} = $1", RECORD_COLUMNS, column);
        let row = conn
            .query_opt(sql.as_str(), &[value])
            .await
            .map_err(|e| query_error(operation, e))?;
        row.as_ref().map(record_from_row).transpose()
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn get_by_id(&self, id: RecordId) -> RecordResult<Option<Record>> {
        self.get_one("get_by_id", "id", &id).await
    }

    async fn get_by_username(&self, username: &str) -> RecordResult<Option<Record>> {
        self.get_one("get_by_username", "username", &username).await
    }

    async fn get_by_email(&self, email: &str) -> RecordResult<Option<Record>> {
        self.get_one("get_by_email", "email", &email).await
    }

    async fn get_by_phone(&self, phone: &str) -> RecordResult<Option<Record>> {
        if phone.is_empty() {
            return Ok(None);
        }
        self.get_one("get_by_phone", "phone", &phone).await
    }

    async fn batch_get(&self, ids: &[RecordId]) -> RecordResult<Vec<Record>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn().await?;
        let sql = format!("SELECT {} FROM records WHERE id = ANY($1)", RECORD_COLUMNS);
        let rows = conn
            .query(sql.as_str(), &[&ids])
            .await
            .map_err(|e| query_error("batch_get", e))?;
        rows.iter().map(record_from_row).collect()
    }

    async fn insert(&self, data: &NewRecord) -> RecordResult<RecordId> {
        let conn = self.conn().await?;
        let status = data.status.as_i16();
        let row = conn
            .query_one(
                "INSERT INTO records (username, email, phone, password_hash, status) \
                 VALUES ($1, $2, $3, $4, $5) RETURNING id",
                &[
                    &data.username,
                    &data.email,
                    &data.phone,
                    &data.password_hash,
                    &status,
                ],
            )
            .await
            .map_err(|e| {
                write_error("insert", e, |field| match field {
                    "username" => data.username.clone(),
                    "email" => data.email.clone(),
                    _ => data.phone.clone(),
                })
            })?;

        let id: RecordId = row.try_get(0).map_err(|e| {
            RecordError::Storage(StorageError::InvalidRow {
                reason: e.to_string(),
            })
        })?;
        tracing::debug!(id, "Inserted record");
        Ok(id)
    }

    async fn update(&self, id: RecordId, patch: &RecordPatch) -> RecordResult<()> {
        let status = patch.status.map(RecordStatus::as_i16);
        let mut columns: Vec<&str> = Vec::new();
        let mut params: Vec<&(dyn ToSql + Sync)> = Vec::new();
        if let Some(username) = &patch.username {
            columns.push("username");
            params.push(username);
        }
        if let Some(email) = &patch.email {
            columns.push("email");
            params.push(email);
        }
        if let Some(phone) = &patch.phone {
            columns.push("phone");
            params.push(phone);
        }
        if let Some(password_hash) = &patch.password_hash {
            columns.push("password_hash");
            params.push(password_hash);
        }
        if let Some(status) = &status {
            columns.push("status");
            params.push(status);
        }

        if columns.is_empty() {
            return match self.get_by_id(id).await? {
                Some(_) => Ok(()),
                None => Err(StorageError::NotFound { id }.into()),
            };
        }
        params.push(&id);

        let conn = self.conn().await?;
        let sql = build_update_sql(&columns);
        let affected = conn
            .execute(sql.as_str(), &params)
            .await
            .map_err(|e| {
                write_error("update", e, |field| {
                    let value = match field {
                        "username" => patch.username.as_ref(),
                        "email" => patch.email.as_ref(),
                        _ => patch.phone.as_ref(),
                    };
                    value.cloned().unwrap_or_default()
                })
            })?;

        if affected == 0 {
            return Err(StorageError::NotFound { id }.into());
        }
        Ok(())
    }
}
