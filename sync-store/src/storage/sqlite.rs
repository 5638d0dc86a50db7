//! SQLite cache backend.

use super::{ensure_kind, CacheScope, CacheStore};
use crate::error::StorageError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{Sqlite, Transaction};
use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;
use sync_types::{CacheRecord, EntityKind, Fields, UserId};

/// SQLite-based cache storage.
///
/// Uses WAL mode for concurrent reads/writes. One table per entity kind,
/// payloads stored as JSON text.
#[derive(Clone)]
pub struct SqliteCache {
    pool: SqlitePool,
}

impl SqliteCache {
    /// Open (or create) the cache database at `path`.
    pub async fn open(path: &Path) -> Result<Self, StorageError> {
        if path.as_os_str().is_empty() || path.is_dir() {
            return Err(StorageError::InvalidPath {
                path: path.to_path_buf(),
            });
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(StorageError::db)?;

        let cache = Self { pool };
        cache.run_migrations().await?;
        tracing::debug!(path = %path.display(), "opened cache database");
        Ok(cache)
    }

    /// Create an in-memory SQLite cache (for testing).
    pub async fn in_memory() -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(":memory:").map_err(StorageError::db)?;

        // The database lives and dies with its single connection.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(StorageError::db)?;

        let cache = Self { pool };
        cache.run_migrations().await?;
        Ok(cache)
    }

    /// Check whether [`CacheStore::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }

    /// Run database migrations.
    async fn run_migrations(&self) -> Result<(), StorageError> {
        for kind in EntityKind::ALL {
            let table = kind.table();
            sqlx::query(&format!(
                r#"
                CREATE TABLE IF NOT EXISTS {table} (
                    id TEXT PRIMARY KEY,
                    owner_id TEXT NOT NULL,
                    parent_id TEXT,
                    payload TEXT NOT NULL,
                    last_updated INTEGER NOT NULL
                )
                "#
            ))
            .execute(&self.pool)
            .await
            .map_err(StorageError::db)?;

            sqlx::query(&format!(
                "CREATE INDEX IF NOT EXISTS idx_{table}_parent ON {table}(parent_id)"
            ))
            .execute(&self.pool)
            .await
            .map_err(StorageError::db)?;
        }
        Ok(())
    }

    async fn upsert_in(
        tx: &mut Transaction<'_, Sqlite>,
        kind: EntityKind,
        record: &CacheRecord,
    ) -> Result<(), StorageError> {
        let payload = serde_json::to_string(&record.fields)?;

        sqlx::query(&format!(
            r#"
            INSERT INTO {} (id, owner_id, parent_id, payload, last_updated)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(id) DO UPDATE SET
                owner_id = excluded.owner_id,
                parent_id = excluded.parent_id,
                payload = excluded.payload,
                last_updated = excluded.last_updated
            "#,
            kind.table()
        ))
        .bind(&record.id)
        .bind(record.owner_id.as_str())
        .bind(record.parent_id.as_deref())
        .bind(payload)
        .bind(record.last_updated.timestamp_millis())
        .execute(&mut **tx)
        .await
        .map_err(StorageError::db)?;

        Ok(())
    }

    async fn fetch_rows(
        &self,
        kind: EntityKind,
        parent_id: Option<&str>,
    ) -> Result<Vec<CacheRecord>, StorageError> {
        let rows = match parent_id {
            Some(parent_id) => {
                sqlx::query_as::<_, RecordRow>(&format!(
                    "SELECT id, owner_id, parent_id, payload, last_updated FROM {} \
                     WHERE parent_id = ?1 ORDER BY id ASC",
                    kind.table()
                ))
                .bind(parent_id)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query_as::<_, RecordRow>(&format!(
                    "SELECT id, owner_id, parent_id, payload, last_updated FROM {} ORDER BY id ASC",
                    kind.table()
                ))
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(StorageError::db)?;

        rows.into_iter().map(|row| row.into_record(kind)).collect()
    }
}

#[async_trait]
impl CacheStore for SqliteCache {
    async fn get_all(&self, kind: EntityKind) -> Result<Vec<CacheRecord>, StorageError> {
        self.fetch_rows(kind, None).await
    }

    async fn get_by_parent(
        &self,
        kind: EntityKind,
        parent_id: &str,
    ) -> Result<Vec<CacheRecord>, StorageError> {
        self.fetch_rows(kind, Some(parent_id)).await
    }

    async fn get_by_id(
        &self,
        kind: EntityKind,
        id: &str,
    ) -> Result<Option<CacheRecord>, StorageError> {
        let row = sqlx::query_as::<_, RecordRow>(&format!(
            "SELECT id, owner_id, parent_id, payload, last_updated FROM {} WHERE id = ?1",
            kind.table()
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StorageError::db)?;

        row.map(|r| r.into_record(kind)).transpose()
    }

    async fn upsert_batch(
        &self,
        kind: EntityKind,
        records: &[CacheRecord],
    ) -> Result<(), StorageError> {
        ensure_kind(kind, records)?;
        if records.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.map_err(StorageError::db)?;
        for record in records {
            Self::upsert_in(&mut tx, kind, record).await?;
        }
        tx.commit().await.map_err(StorageError::db)?;
        Ok(())
    }

    async fn replace_scope(
        &self,
        scope: &CacheScope,
        records: &[CacheRecord],
    ) -> Result<u64, StorageError> {
        let kind = scope.kind();
        ensure_kind(kind, records)?;
        let table = kind.table();

        let mut tx = self.pool.begin().await.map_err(StorageError::db)?;
        for record in records {
            Self::upsert_in(&mut tx, kind, record).await?;
        }

        let existing: Vec<String> = match scope {
            CacheScope::All(_) => {
                sqlx::query_scalar::<_, String>(&format!("SELECT id FROM {table}"))
                    .fetch_all(&mut *tx)
                    .await
            }
            CacheScope::Parent {
                owner_id,
                parent_id,
                ..
            } => {
                sqlx::query_scalar::<_, String>(&format!(
                    "SELECT id FROM {table} WHERE parent_id = ?1 AND owner_id = ?2"
                ))
                .bind(parent_id)
                .bind(owner_id.as_str())
                .fetch_all(&mut *tx)
                .await
            }
        }
        .map_err(StorageError::db)?;

        let keep: HashSet<&str> = records.iter().map(|r| r.id.as_str()).collect();
        let mut removed = 0;
        for id in existing.iter().filter(|id| !keep.contains(id.as_str())) {
            let result = sqlx::query(&format!("DELETE FROM {table} WHERE id = ?1"))
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(StorageError::db)?;
            removed += result.rows_affected();
        }

        tx.commit().await.map_err(StorageError::db)?;
        Ok(removed)
    }

    async fn delete_all(&self, kind: EntityKind) -> Result<u64, StorageError> {
        let result = sqlx::query(&format!("DELETE FROM {}", kind.table()))
            .execute(&self.pool)
            .await
            .map_err(StorageError::db)?;
        Ok(result.rows_affected())
    }

    async fn count(&self, kind: EntityKind) -> Result<u64, StorageError> {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", kind.table()))
            .fetch_one(&self.pool)
            .await
            .map_err(StorageError::db)?;
        Ok(count as u64)
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

/// Internal row type for SQLite queries.
#[derive(sqlx::FromRow)]
struct RecordRow {
    id: String,
    owner_id: String,
    parent_id: Option<String>,
    payload: String,
    last_updated: i64,
}

impl RecordRow {
    fn into_record(self, kind: EntityKind) -> Result<CacheRecord, StorageError> {
        let fields: Fields =
            serde_json::from_str(&self.payload).map_err(|e| StorageError::Corrupt {
                id: self.id.clone(),
                reason: e.to_string(),
            })?;
        let last_updated =
            DateTime::<Utc>::from_timestamp_millis(self.last_updated).ok_or_else(|| {
                StorageError::Corrupt {
                    id: self.id.clone(),
                    reason: format!("timestamp {} out of range", self.last_updated),
                }
            })?;

        Ok(CacheRecord {
            id: self.id,
            kind,
            owner_id: UserId::new(self.owner_id),
            parent_id: self.parent_id,
            fields,
            last_updated,
        })
    }
}
