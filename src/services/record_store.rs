//! src/services/record_store.rs
//!
//! File Record Store: durable mapping from internal id and public share id
//! to file metadata. `SqliteFileStore` keeps records in SQLite with a unique
//! index on `share_id` and an index on `expires_at` for the reclamation scan.

use crate::models::file_record::{FileRecord, NewFileRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

const MIGRATION_SQL: &str = include_str!("../../migrations/0001_init.sql");

const SELECT_COLUMNS: &str = "SELECT id, share_id, filename, original_name, mime_type, size, \
     object_path, expires_at, created_at FROM files";

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("share id `{0}` already exists")]
    DuplicateShareId(String),
    #[error("object path `{0}` is already claimed by another record")]
    ObjectPathClaimed(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type RecordResult<T> = Result<T, RecordError>;

/// Persistence contract for file records.
///
/// Records are never updated, so only creation and deletion race; `delete`
/// is idempotent which makes those races harmless.
#[async_trait]
pub trait FileRecordStore: Send + Sync {
    async fn get(&self, id: Uuid) -> RecordResult<Option<FileRecord>>;

    /// Indexed point lookup by public share id.
    async fn get_by_share_id(&self, share_id: &str) -> RecordResult<Option<FileRecord>>;

    async fn get_by_object_path(&self, object_path: &str) -> RecordResult<Option<FileRecord>>;

    /// Assign a new id and persist. Fails with `DuplicateShareId` or
    /// `ObjectPathClaimed` rather than overwriting an existing record.
    async fn create(&self, new: NewFileRecord) -> RecordResult<FileRecord>;

    /// Delete by id. Deleting a missing id is not an error.
    async fn delete(&self, id: Uuid) -> RecordResult<()>;

    /// All records with `expires_at <= now`.
    async fn list_expired(&self, now: DateTime<Utc>) -> RecordResult<Vec<FileRecord>>;

    async fn health_check(&self) -> RecordResult<()>;
}

/// SQLite-backed record store.
#[derive(Clone)]
pub struct SqliteFileStore {
    /// Shared SQLite connection pool.
    pub db: Arc<SqlitePool>,
}

impl SqliteFileStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Apply the embedded schema. Every statement is idempotent.
    pub async fn migrate(&self) -> RecordResult<()> {
        let statements = MIGRATION_SQL
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        tracing::info!("Running {} migration statements...", statements.len());

        for stmt in statements {
            tracing::debug!("Executing migration SQL: {}", stmt);
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl FileRecordStore for SqliteFileStore {
    async fn get(&self, id: Uuid) -> RecordResult<Option<FileRecord>> {
        let record = sqlx::query_as::<_, FileRecord>(&format!("{SELECT_COLUMNS} WHERE id = ?"))
            .bind(id)
            .fetch_optional(&*self.db)
            .await?;
        Ok(record)
    }

    async fn get_by_share_id(&self, share_id: &str) -> RecordResult<Option<FileRecord>> {
        let record =
            sqlx::query_as::<_, FileRecord>(&format!("{SELECT_COLUMNS} WHERE share_id = ?"))
                .bind(share_id)
                .fetch_optional(&*self.db)
                .await?;
        Ok(record)
    }

    async fn get_by_object_path(&self, object_path: &str) -> RecordResult<Option<FileRecord>> {
        let record = sqlx::query_as::<_, FileRecord>(&format!(
            "{SELECT_COLUMNS} WHERE object_path = ? LIMIT 1"
        ))
        .bind(object_path)
        .fetch_optional(&*self.db)
        .await?;
        Ok(record)
    }

    async fn create(&self, new: NewFileRecord) -> RecordResult<FileRecord> {
        let result = sqlx::query_as::<_, FileRecord>(
            r#"
            INSERT INTO files (
                id, share_id, filename, original_name, mime_type, size,
                object_path, expires_at, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id, share_id, filename, original_name, mime_type, size,
                      object_path, expires_at, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&new.share_id)
        .bind(&new.filename)
        .bind(&new.original_name)
        .bind(&new.mime_type)
        .bind(new.size)
        .bind(&new.object_path)
        .bind(new.expires_at)
        .bind(new.created_at)
        .fetch_one(&*self.db)
        .await;

        match result {
            Ok(record) => Ok(record),
            Err(err) if violates_unique(&err, "share_id") => {
                Err(RecordError::DuplicateShareId(new.share_id))
            }
            Err(err) if violates_unique(&err, "object_path") => {
                Err(RecordError::ObjectPathClaimed(new.object_path))
            }
            Err(err) => Err(RecordError::Sqlx(err)),
        }
    }

    async fn delete(&self, id: Uuid) -> RecordResult<()> {
        sqlx::query("DELETE FROM files WHERE id = ?")
            .bind(id)
            .execute(&*self.db)
            .await?;
        Ok(())
    }

    async fn list_expired(&self, now: DateTime<Utc>) -> RecordResult<Vec<FileRecord>> {
        let records = sqlx::query_as::<_, FileRecord>(&format!(
            "{SELECT_COLUMNS} WHERE expires_at <= ? ORDER BY expires_at ASC"
        ))
        .bind(now)
        .fetch_all(&*self.db)
        .await?;
        Ok(records)
    }

    async fn health_check(&self) -> RecordResult<()> {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await?;
        Ok(())
    }
}

/// True if `err` is a unique violation on `files.<column>`.
///
/// SQLite names the offending columns in the message
/// (`UNIQUE constraint failed: files.share_id`), not the index.
fn violates_unique(err: &sqlx::Error, column: &str) -> bool {
    let sqlx::Error::Database(db_err) = err else {
        return false;
    };
    db_err.is_unique_violation()
        && db_err
            .message()
            .split([':', ','])
            .any(|part| part.trim() == format!("files.{column}"))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::file_record::Expiration;
    use chrono::Duration;
    use sqlx::sqlite::SqlitePoolOptions;

    /// Fresh single-connection in-memory database with the schema applied.
    pub(crate) async fn memory_store() -> SqliteFileStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let store = SqliteFileStore::new(Arc::new(pool));
        store.migrate().await.unwrap();
        store
    }

    fn new_record(share_id: &str, expiration: Expiration, now: DateTime<Utc>) -> NewFileRecord {
        NewFileRecord::new(
            share_id.into(),
            "report.pdf".into(),
            "Q3 report.pdf".into(),
            "application/pdf".into(),
            1024,
            format!("/objects/uploads/{}", Uuid::new_v4()),
            expiration,
            now,
        )
    }

    #[tokio::test]
    async fn create_and_lookup() {
        let store = memory_store().await;
        let now = Utc::now();
        let created = store
            .create(new_record("share-a", Expiration::OneHour, now))
            .await
            .unwrap();

        assert_eq!(created.share_id, "share-a");
        assert_eq!(created.created_at, now);
        assert_eq!(created.expires_at - created.created_at, Duration::hours(1));

        let by_id = store.get(created.id).await.unwrap().unwrap();
        assert_eq!(by_id, created);
        let by_share = store.get_by_share_id("share-a").await.unwrap().unwrap();
        assert_eq!(by_share, created);
        let by_path = store.get_by_object_path(&created.object_path).await.unwrap();
        assert_eq!(by_path.map(|r| r.id), Some(created.id));

        assert!(store.get_by_share_id("missing").await.unwrap().is_none());
        assert!(store.get(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_share_id_does_not_overwrite() {
        let store = memory_store().await;
        let now = Utc::now();
        let first = store
            .create(new_record("dup", Expiration::OneDay, now))
            .await
            .unwrap();

        let err = store
            .create(new_record("dup", Expiration::OneWeek, now))
            .await
            .unwrap_err();
        assert!(matches!(err, RecordError::DuplicateShareId(ref id) if id == "dup"));

        let kept = store.get_by_share_id("dup").await.unwrap().unwrap();
        assert_eq!(kept.id, first.id);
    }

    #[tokio::test]
    async fn object_path_can_only_be_claimed_once() {
        let store = memory_store().await;
        let now = Utc::now();
        let first = store
            .create(new_record("first", Expiration::OneHour, now))
            .await
            .unwrap();

        let mut second = new_record("second", Expiration::OneWeek, now);
        second.object_path = first.object_path.clone();
        let err = store.create(second).await.unwrap_err();
        assert!(matches!(err, RecordError::ObjectPathClaimed(ref p) if *p == first.object_path));

        assert!(store.get_by_share_id("second").await.unwrap().is_none());
        let owner = store.get_by_object_path(&first.object_path).await.unwrap().unwrap();
        assert_eq!(owner.id, first.id);
    }

    #[tokio::test]
    async fn primary_key_collision_is_not_a_share_id_collision() {
        let store = memory_store().await;
        let id = Uuid::new_v4();
        let insert = |share_id: &'static str| {
            sqlx::query(
                "INSERT INTO files (id, share_id, filename, original_name, mime_type, size, \
                 object_path, expires_at, created_at) \
                 VALUES (?, ?, 'a', 'a', 'text/plain', 1, ?, '2030-01-02', '2030-01-01')",
            )
            .bind(id)
            .bind(share_id)
            .bind(format!("/objects/uploads/{}", Uuid::new_v4()))
        };
        insert("pk-a").execute(&*store.db).await.unwrap();
        let err = insert("pk-b").execute(&*store.db).await.unwrap_err();

        assert!(!violates_unique(&err, "share_id"));
        assert!(!violates_unique(&err, "object_path"));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = memory_store().await;
        let rec = store
            .create(new_record("gone", Expiration::OneHour, Utc::now()))
            .await
            .unwrap();

        store.delete(rec.id).await.unwrap();
        store.delete(rec.id).await.unwrap();
        store.delete(Uuid::new_v4()).await.unwrap();
        assert!(store.get(rec.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_expired_uses_inclusive_cutoff() {
        let store = memory_store().await;
        let t0 = Utc::now();
        let hour = store
            .create(new_record("hour", Expiration::OneHour, t0))
            .await
            .unwrap();
        store
            .create(new_record("day", Expiration::OneDay, t0))
            .await
            .unwrap();

        assert!(store.list_expired(t0).await.unwrap().is_empty());

        let at_expiry = store.list_expired(hour.expires_at).await.unwrap();
        assert_eq!(at_expiry.len(), 1);
        assert_eq!(at_expiry[0].share_id, "hour");

        let later = store.list_expired(t0 + Duration::days(2)).await.unwrap();
        assert_eq!(later.len(), 2);
    }

    #[tokio::test]
    async fn health_check_runs_query() {
        let store = memory_store().await;
        assert!(store.health_check().await.is_ok());
    }
}
