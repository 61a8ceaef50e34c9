// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Embedded user database backed by redb (pure Rust, ACID).
//!
//! ## Table Layout
//!
//! - `users`: user id → serialized LocalUser (JSON bytes)
//! - `users_by_external_id`: external id → user id
//! - `users_by_email`: normalized email → user id
//!
//! Every write opens one redb write transaction that checks the indexes and
//! updates all three tables, so uniqueness holds across tasks and a failed
//! write leaves nothing behind. redb calls are blocking and run on the tokio
//! blocking pool.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use redb::{Database, ReadTransaction, ReadableDatabase, ReadableTable, TableDefinition};
use tracing::debug;
use uuid::Uuid;

use super::user_store::{StoreError, StoreResult, UniqueField, UserStore};
use crate::models::{normalize_email, LocalUser};

// =============================================================================
// Table Definitions
// =============================================================================

const USERS: TableDefinition<&str, &[u8]> = TableDefinition::new("users");

const EXTERNAL_ID_INDEX: TableDefinition<i64, &str> = TableDefinition::new("users_by_external_id");

const EMAIL_INDEX: TableDefinition<&str, &str> = TableDefinition::new("users_by_email");

// =============================================================================
// Error Type
// =============================================================================

#[derive(Debug, thiserror::Error)]
enum UserDbError {
    #[error("failed to create database directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("redb database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("duplicate {0}")]
    Duplicate(UniqueField),

    #[error("user not found")]
    Missing,

    #[error("user {0} already exists")]
    Exists(String),
}

impl From<UserDbError> for StoreError {
    fn from(e: UserDbError) -> Self {
        match e {
            UserDbError::Duplicate(field) => StoreError::DuplicateKey(field),
            UserDbError::Missing => StoreError::NotFound,
            UserDbError::Storage(redb::StorageError::Io(io)) => {
                StoreError::Unavailable(format!("redb I/O error: {io}"))
            }
            other => StoreError::Backend(other.to_string()),
        }
    }
}

type DbResult<T> = Result<T, UserDbError>;

// =============================================================================
// RedbUserStore
// =============================================================================

pub struct RedbUserStore {
    db: Arc<Database>,
}

impl RedbUserStore {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path) -> StoreResult<Self> {
        Self::open_inner(path).map_err(StoreError::from)
    }

    fn open_inner(path: &Path) -> DbResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path)?;

        // Pre-create tables so read transactions never hit a missing table.
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(USERS)?;
            let _ = write_txn.open_table(EXTERNAL_ID_INDEX)?;
            let _ = write_txn.open_table(EMAIL_INDEX)?;
        }
        write_txn.commit()?;

        debug!(path = %path.display(), "opened user database");
        Ok(Self { db: Arc::new(db) })
    }

    async fn run<T, F>(&self, op: F) -> StoreResult<T>
    where
        F: FnOnce(&Database) -> DbResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || op(&db))
            .await
            .map_err(|e| StoreError::Backend(format!("store task failed: {e}")))?
            .map_err(StoreError::from)
    }
}

fn load_user(read_txn: &ReadTransaction, id: &str) -> DbResult<Option<LocalUser>> {
    let table = read_txn.open_table(USERS)?;
    match table.get(id)? {
        Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
        None => Ok(None),
    }
}

fn write_user(db: &Database, user: &LocalUser, is_create: bool) -> DbResult<()> {
    let id = user.id.to_string();
    let email_key = user.email_key();
    let json = serde_json::to_vec(user)?;

    let write_txn = db.begin_write()?;
    {
        let mut users = write_txn.open_table(USERS)?;
        let mut by_external_id = write_txn.open_table(EXTERNAL_ID_INDEX)?;
        let mut by_email = write_txn.open_table(EMAIL_INDEX)?;

        let previous: Option<LocalUser> = match users.get(id.as_str())? {
            Some(value) => Some(serde_json::from_slice(value.value())?),
            None => None,
        };
        match (&previous, is_create) {
            (Some(_), true) => return Err(UserDbError::Exists(id)),
            (None, false) => return Err(UserDbError::Missing),
            _ => {}
        }

        let email_owner = by_email.get(email_key.as_str())?.map(|v| v.value().to_string());
        if email_owner.is_some_and(|owner| owner != id) {
            return Err(UserDbError::Duplicate(UniqueField::Email));
        }
        if let Some(external_id) = user.external_id {
            let owner = by_external_id.get(external_id)?.map(|v| v.value().to_string());
            if owner.is_some_and(|owner| owner != id) {
                return Err(UserDbError::Duplicate(UniqueField::ExternalId));
            }
        }

        if let Some(previous) = &previous {
            let previous_key = previous.email_key();
            if previous_key != email_key {
                by_email.remove(previous_key.as_str())?;
            }
            if let Some(old) = previous.external_id {
                if user.external_id != Some(old) {
                    by_external_id.remove(old)?;
                }
            }
        }

        users.insert(id.as_str(), json.as_slice())?;
        by_email.insert(email_key.as_str(), id.as_str())?;
        if let Some(external_id) = user.external_id {
            by_external_id.insert(external_id, id.as_str())?;
        }
    }
    write_txn.commit()?;
    Ok(())
}

#[async_trait]
impl UserStore for RedbUserStore {
    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<LocalUser>> {
        self.run(move |db| {
            let read_txn = db.begin_read()?;
            load_user(&read_txn, &id.to_string())
        })
        .await
    }

    // Index and row are read from one snapshot so a concurrent relink can't
    // hand back a row that no longer matches the key.
    async fn find_by_external_id(&self, external_id: i64) -> StoreResult<Option<LocalUser>> {
        self.run(move |db| {
            let read_txn = db.begin_read()?;
            let id = {
                let index = read_txn.open_table(EXTERNAL_ID_INDEX)?;
                index.get(external_id)?.map(|v| v.value().to_string())
            };
            match id {
                Some(id) => load_user(&read_txn, &id),
                None => Ok(None),
            }
        })
        .await
    }

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<LocalUser>> {
        let key = normalize_email(email);
        self.run(move |db| {
            let read_txn = db.begin_read()?;
            let id = {
                let index = read_txn.open_table(EMAIL_INDEX)?;
                index.get(key.as_str())?.map(|v| v.value().to_string())
            };
            match id {
                Some(id) => load_user(&read_txn, &id),
                None => Ok(None),
            }
        })
        .await
    }

    async fn create(&self, user: &LocalUser) -> StoreResult<()> {
        let user = user.clone();
        self.run(move |db| write_user(db, &user, true)).await
    }

    async fn update(&self, user: &LocalUser) -> StoreResult<()> {
        let user = user.clone();
        self.run(move |db| write_user(db, &user, false)).await
    }

    async fn health_check(&self) -> StoreResult<()> {
        self.run(|db| {
            let read_txn = db.begin_read()?;
            let _ = read_txn.open_table(USERS)?;
            Ok(())
        })
        .await
    }

    async fn count(&self) -> StoreResult<usize> {
        self.run(|db| {
            let read_txn = db.begin_read()?;
            let table = read_txn.open_table(USERS)?;
            Ok(table.iter()?.count())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::{identity, unlinked_user};
    use tempfile::tempdir;

    fn open_store() -> (tempfile::TempDir, RedbUserStore) {
        let dir = tempdir().unwrap();
        let store = RedbUserStore::open(&dir.path().join("users.redb")).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn create_then_find() {
        let (_dir, store) = open_store();
        let user = LocalUser::from_identity(&identity(42, "A@x.com", "a"), true);
        store.create(&user).await.unwrap();

        let by_ext = store.find_by_external_id(42).await.unwrap().unwrap();
        assert_eq!(by_ext, user);
        let by_email = store.find_by_email("a@x.com").await.unwrap().unwrap();
        assert_eq!(by_email.id, user.id);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn uniqueness_is_enforced() {
        let (_dir, store) = open_store();
        store
            .create(&LocalUser::from_identity(&identity(42, "a@x.com", "a"), true))
            .await
            .unwrap();

        let same_email = LocalUser::from_identity(&identity(43, "a@x.com", "b"), true);
        assert!(matches!(
            store.create(&same_email).await.unwrap_err(),
            StoreError::DuplicateKey(UniqueField::Email)
        ));

        let same_external = LocalUser::from_identity(&identity(42, "b@x.com", "b"), true);
        assert!(matches!(
            store.create(&same_external).await.unwrap_err(),
            StoreError::DuplicateKey(UniqueField::ExternalId)
        ));
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn update_links_external_id() {
        let (_dir, store) = open_store();
        let mut user = unlinked_user("a@x.com");
        store.create(&user).await.unwrap();
        assert!(store.find_by_external_id(42).await.unwrap().is_none());

        user.external_id = Some(42);
        user.username = "a2".to_string();
        store.update(&user).await.unwrap();

        let found = store.find_by_external_id(42).await.unwrap().unwrap();
        assert_eq!(found.id, user.id);
        assert_eq!(found.username, "a2");
    }

    #[tokio::test]
    async fn update_missing_row_is_not_found() {
        let (_dir, store) = open_store();
        let err = store.update(&unlinked_user("a@x.com")).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }

    #[tokio::test]
    async fn data_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("users.redb");
        let user = LocalUser::from_identity(&identity(42, "a@x.com", "a"), true);
        {
            let store = RedbUserStore::open(&path).unwrap();
            store.create(&user).await.unwrap();
        }

        let store = RedbUserStore::open(&path).unwrap();
        assert_eq!(store.find_by_email("a@x.com").await.unwrap().unwrap().id, user.id);
        store.health_check().await.unwrap();
    }

    #[tokio::test]
    async fn lookups_follow_email_change() {
        let (_dir, store) = open_store();
        let mut user = LocalUser::from_identity(&identity(42, "old@x.com", "a"), true);
        store.create(&user).await.unwrap();

        user.email = "new@x.com".to_string();
        store.update(&user).await.unwrap();

        assert!(store.find_by_email("old@x.com").await.unwrap().is_none());
        let by_email = store.find_by_email("NEW@x.com").await.unwrap().unwrap();
        assert_eq!(by_email.email, "new@x.com");
        let by_ext = store.find_by_external_id(42).await.unwrap().unwrap();
        assert_eq!(by_ext.email, "new@x.com");
        assert_eq!(store.find_by_id(user.id).await.unwrap().unwrap(), by_ext);
        assert!(store.find_by_id(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[test]
    fn unusable_directory_is_reported() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"not a directory").unwrap();

        let err = match RedbUserStore::open(&blocker.join("nested").join("users.redb")) {
            Ok(_) => panic!("opened a database under a regular file"),
            Err(e) => e,
        };
        assert!(err.to_string().contains("failed to create database directory"), "{err}");
    }
}
