//! src/services/record_store.rs
//!
//! Declarative record store: JSON documents keyed by `(kind, namespace, name)`
//! with optimistic concurrency on `resource_version`, finalizer-gated deletion,
//! and owner-reference cascade delete. Backed by SQLite.

use crate::models::meta::{ObjectKey, ObjectMeta, Resource};
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use sqlx::{FromRow, SqliteConnection, SqlitePool};
use std::{marker::PhantomData, sync::Arc};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} `{key}` not found")]
    NotFound { kind: String, key: ObjectKey },
    #[error("{kind} `{key}` already exists")]
    AlreadyExists { kind: String, key: ObjectKey },
    #[error("{kind} `{key}` was modified concurrently (expected version {expected})")]
    Conflict {
        kind: String,
        key: ObjectKey,
        expected: u64,
    },
    #[error("{kind} `{key}` carries no resource version")]
    MissingResourceVersion { kind: String, key: ObjectKey },
    #[error("malformed record: {0}")]
    Serde(#[from] serde_json::Error),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }

    fn not_found(kind: &str, key: &ObjectKey) -> Self {
        StoreError::NotFound {
            kind: kind.to_string(),
            key: key.clone(),
        }
    }

    fn conflict(kind: &str, key: &ObjectKey, expected: u64) -> Self {
        StoreError::Conflict {
            kind: kind.to_string(),
            key: key.clone(),
            expected,
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Result of a delete request.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DeleteOutcome {
    /// The record and its dependents are gone.
    Deleted,
    /// The deletion marker is set; finalizers still hold the record.
    Pending { finalizers: Vec<String> },
}

/// Untyped record storage. Records are whole documents with a `metadata`
/// field shaped like [`ObjectMeta`].
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get(&self, kind: &str, key: &ObjectKey) -> StoreResult<Option<Value>>;

    async fn list(&self, kind: &str, namespace: &str) -> StoreResult<Vec<Value>>;

    /// Assigns `uid`, `creationTimestamp` and the first resource version.
    async fn create(&self, kind: &str, record: Value) -> StoreResult<Value>;

    /// Fails with `Conflict` unless the record's resource version matches the
    /// stored one. A record that is being deleted and has no finalizers left
    /// is erased instead of written.
    async fn update(&self, kind: &str, record: Value) -> StoreResult<Value>;

    /// Erases the record if no finalizers remain, otherwise sets the deletion
    /// marker and leaves erasure to the final finalizer removal.
    async fn delete(&self, kind: &str, key: &ObjectKey) -> StoreResult<DeleteOutcome>;

    async fn ping(&self) -> StoreResult<()>;
}

/// Typed view over a [`RecordStore`] for one resource kind.
pub struct Api<R> {
    store: Arc<dyn RecordStore>,
    kind: PhantomData<fn() -> R>,
}

impl<R> Clone for Api<R> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            kind: PhantomData,
        }
    }
}

impl<R: Resource> Api<R> {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            store,
            kind: PhantomData,
        }
    }

    pub async fn get_opt(&self, key: &ObjectKey) -> StoreResult<Option<R>> {
        match self.store.get(R::KIND, key).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub async fn get(&self, key: &ObjectKey) -> StoreResult<R> {
        self.get_opt(key)
            .await?
            .ok_or_else(|| StoreError::not_found(R::KIND, key))
    }

    pub async fn list(&self, namespace: &str) -> StoreResult<Vec<R>> {
        self.store
            .list(R::KIND, namespace)
            .await?
            .into_iter()
            .map(|value| serde_json::from_value(value).map_err(StoreError::from))
            .collect()
    }

    pub async fn create(&self, record: &R) -> StoreResult<R> {
        let stored = self
            .store
            .create(R::KIND, serde_json::to_value(record)?)
            .await?;
        Ok(serde_json::from_value(stored)?)
    }

    /// Write `record` back, returning the stored copy with its new version.
    pub async fn replace(&self, record: &R) -> StoreResult<R> {
        let stored = self
            .store
            .update(R::KIND, serde_json::to_value(record)?)
            .await?;
        Ok(serde_json::from_value(stored)?)
    }

    pub async fn delete(&self, key: &ObjectKey) -> StoreResult<DeleteOutcome> {
        self.store.delete(R::KIND, key).await
    }
}

#[derive(FromRow, Debug)]
struct RecordRow {
    uid: Uuid,
    resource_version: i64,
    document: String,
}

/// Record store persisted in the `records` table.
#[derive(Clone)]
pub struct SqliteRecordStore {
    db: Arc<SqlitePool>,
}

impl SqliteRecordStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }
}

async fn fetch_row(
    conn: &mut SqliteConnection,
    kind: &str,
    key: &ObjectKey,
) -> StoreResult<Option<RecordRow>> {
    let row = sqlx::query_as::<_, RecordRow>(
        "SELECT uid, resource_version, document
         FROM records WHERE kind = ? AND namespace = ? AND name = ?",
    )
    .bind(kind)
    .bind(&key.namespace)
    .bind(&key.name)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row)
}

/// Write `record` over the row at `expected`, bumping its version.
async fn write_row(
    conn: &mut SqliteConnection,
    kind: &str,
    key: &ObjectKey,
    expected: u64,
    meta: &ObjectMeta,
    record: &Value,
) -> StoreResult<()> {
    let result = sqlx::query(
        "UPDATE records SET resource_version = ?, owner_uid = ?, document = ?
         WHERE kind = ? AND namespace = ? AND name = ? AND resource_version = ?",
    )
    .bind((expected + 1) as i64)
    .bind(meta.controller_owner().map(|owner| owner.uid))
    .bind(serde_json::to_string(record)?)
    .bind(kind)
    .bind(&key.namespace)
    .bind(&key.name)
    .bind(expected as i64)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(StoreError::conflict(kind, key, expected));
    }
    Ok(())
}

/// Mark or erase one record without following ownership.
///
/// Returns the uid of the erased record, if it was erased.
async fn delete_one(
    conn: &mut SqliteConnection,
    kind: &str,
    key: &ObjectKey,
) -> StoreResult<(DeleteOutcome, Option<Uuid>)> {
    let row = fetch_row(conn, kind, key)
        .await?
        .ok_or_else(|| StoreError::not_found(kind, key))?;
    let mut record: Value = serde_json::from_str(&row.document)?;
    let mut meta = meta_of(&record)?;
    let version = row.resource_version as u64;

    if meta.finalizers.is_empty() {
        erase_row(conn, kind, key, version).await?;
        return Ok((DeleteOutcome::Deleted, Some(row.uid)));
    }

    if meta.deletion_timestamp.is_none() {
        meta.deletion_timestamp = Some(Utc::now());
        meta.resource_version = Some(version + 1);
        set_meta(&mut record, &meta)?;
        write_row(conn, kind, key, version, &meta, &record).await?;
        debug!(kind, %key, "deletion requested, waiting on finalizers");
    }

    Ok((
        DeleteOutcome::Pending {
            finalizers: meta.finalizers,
        },
        None,
    ))
}

async fn erase_row(
    conn: &mut SqliteConnection,
    kind: &str,
    key: &ObjectKey,
    expected: u64,
) -> StoreResult<()> {
    let result = sqlx::query(
        "DELETE FROM records
         WHERE kind = ? AND namespace = ? AND name = ? AND resource_version = ?",
    )
    .bind(kind)
    .bind(&key.namespace)
    .bind(&key.name)
    .bind(expected as i64)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(StoreError::conflict(kind, key, expected));
    }
    debug!(kind, %key, "record erased");
    Ok(())
}

/// Delete every record transitively owned by `owner`.
async fn cascade(conn: &mut SqliteConnection, owner: Uuid) -> StoreResult<()> {
    let mut owners = vec![owner];
    while let Some(owner) = owners.pop() {
        let dependents = sqlx::query_as::<_, (String, String, String)>(
            "SELECT kind, namespace, name FROM records WHERE owner_uid = ?",
        )
        .bind(owner)
        .fetch_all(&mut *conn)
        .await?;

        for (kind, namespace, name) in dependents {
            let key = ObjectKey::new(namespace, name);
            match delete_one(conn, &kind, &key).await {
                Ok((_, Some(erased))) => owners.push(erased),
                Ok((_, None)) => {}
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(err),
            }
        }
    }
    Ok(())
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn get(&self, kind: &str, key: &ObjectKey) -> StoreResult<Option<Value>> {
        let mut conn = self.db.acquire().await?;
        match fetch_row(&mut conn, kind, key).await? {
            Some(row) => Ok(Some(serde_json::from_str(&row.document)?)),
            None => Ok(None),
        }
    }

    async fn list(&self, kind: &str, namespace: &str) -> StoreResult<Vec<Value>> {
        let documents = sqlx::query_scalar::<_, String>(
            "SELECT document FROM records WHERE kind = ? AND namespace = ? ORDER BY name ASC",
        )
        .bind(kind)
        .bind(namespace)
        .fetch_all(&*self.db)
        .await?;

        documents
            .iter()
            .map(|doc| serde_json::from_str(doc).map_err(StoreError::from))
            .collect()
    }

    async fn create(&self, kind: &str, mut record: Value) -> StoreResult<Value> {
        let mut meta = meta_of(&record)?;
        let key = meta.key();
        let uid = Uuid::new_v4();
        meta.uid = Some(uid);
        meta.resource_version = Some(1);
        meta.creation_timestamp = Some(Utc::now());
        meta.deletion_timestamp = None;
        set_meta(&mut record, &meta)?;

        match sqlx::query(
            "INSERT INTO records (kind, namespace, name, uid, resource_version, owner_uid, document)
             VALUES (?, ?, ?, ?, 1, ?, ?)",
        )
        .bind(kind)
        .bind(&key.namespace)
        .bind(&key.name)
        .bind(uid)
        .bind(meta.controller_owner().map(|owner| owner.uid))
        .bind(serde_json::to_string(&record)?)
        .execute(&*self.db)
        .await
        {
            Ok(_) => {
                debug!(kind, %key, "record created");
                Ok(record)
            }
            Err(err) if is_unique_violation(&err) => Err(StoreError::AlreadyExists {
                kind: kind.to_string(),
                key,
            }),
            Err(err) => Err(StoreError::Sqlx(err)),
        }
    }

    async fn update(&self, kind: &str, mut record: Value) -> StoreResult<Value> {
        let mut meta = meta_of(&record)?;
        let key = meta.key();
        let expected = meta
            .resource_version
            .ok_or_else(|| StoreError::MissingResourceVersion {
                kind: kind.to_string(),
                key: key.clone(),
            })?;

        let mut tx = self.db.begin().await?;
        let row = fetch_row(&mut tx, kind, &key)
            .await?
            .ok_or_else(|| StoreError::not_found(kind, &key))?;
        if row.resource_version as u64 != expected {
            return Err(StoreError::conflict(kind, &key, expected));
        }

        // identity and the deletion marker are owned by the store
        let current = meta_of(&serde_json::from_str(&row.document)?)?;
        meta.uid = current.uid;
        meta.creation_timestamp = current.creation_timestamp;
        meta.deletion_timestamp = current.deletion_timestamp;
        meta.resource_version = Some(expected + 1);
        set_meta(&mut record, &meta)?;

        if meta.is_deleting() && meta.finalizers.is_empty() {
            // owner and dependents go together or not at all
            erase_row(&mut tx, kind, &key, expected).await?;
            cascade(&mut tx, row.uid).await?;
        } else {
            write_row(&mut tx, kind, &key, expected, &meta, &record).await?;
        }
        tx.commit().await?;
        Ok(record)
    }

    async fn delete(&self, kind: &str, key: &ObjectKey) -> StoreResult<DeleteOutcome> {
        let mut tx = self.db.begin().await?;
        let (outcome, erased) = delete_one(&mut tx, kind, key).await?;
        if let Some(uid) = erased {
            cascade(&mut tx, uid).await?;
        }
        tx.commit().await?;
        Ok(outcome)
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await?;
        Ok(())
    }
}

fn meta_of(record: &Value) -> StoreResult<ObjectMeta> {
    let meta = record.get("metadata").cloned().unwrap_or(Value::Null);
    Ok(serde_json::from_value(meta)?)
}

fn set_meta(record: &mut Value, meta: &ObjectMeta) -> StoreResult<()> {
    if let Value::Object(fields) = record {
        fields.insert("metadata".to_string(), serde_json::to_value(meta)?);
    }
    Ok(())
}

/// Return true if SQLx error indicates a unique constraint violation.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}
