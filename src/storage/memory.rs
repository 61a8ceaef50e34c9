// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! In-memory user store.
//!
//! Used when no `DATA_DIR` is configured and by tests. Uniqueness checks and
//! the write happen under one write lock, so each call is atomic.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::user_store::{StoreError, StoreResult, UniqueField, UserStore};
use crate::models::{normalize_email, LocalUser};

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, LocalUser>,
    by_external_id: HashMap<i64, Uuid>,
    by_email: HashMap<String, Uuid>,
}

impl Tables {
    /// Reject `user` if its unique keys belong to a row other than itself.
    fn check_unique(&self, user: &LocalUser, email_key: &str) -> StoreResult<()> {
        if let Some(owner) = self.by_email.get(email_key) {
            if *owner != user.id {
                return Err(StoreError::DuplicateKey(UniqueField::Email));
            }
        }
        if let Some(external_id) = user.external_id {
            if let Some(owner) = self.by_external_id.get(&external_id) {
                if *owner != user.id {
                    return Err(StoreError::DuplicateKey(UniqueField::ExternalId));
                }
            }
        }
        Ok(())
    }

    fn index(&mut self, user: &LocalUser, email_key: String) {
        self.by_email.insert(email_key, user.id);
        if let Some(external_id) = user.external_id {
            self.by_external_id.insert(external_id, user.id);
        }
        self.users.insert(user.id, user.clone());
    }
}

#[derive(Default)]
pub struct InMemoryUserStore {
    tables: RwLock<Tables>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored user.
    pub async fn all(&self) -> Vec<LocalUser> {
        self.tables.read().await.users.values().cloned().collect()
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<LocalUser>> {
        Ok(self.tables.read().await.users.get(&id).cloned())
    }

    async fn find_by_external_id(&self, external_id: i64) -> StoreResult<Option<LocalUser>> {
        let tables = self.tables.read().await;
        Ok(tables
            .by_external_id
            .get(&external_id)
            .and_then(|id| tables.users.get(id))
            .cloned())
    }

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<LocalUser>> {
        let tables = self.tables.read().await;
        Ok(tables
            .by_email
            .get(&normalize_email(email))
            .and_then(|id| tables.users.get(id))
            .cloned())
    }

    async fn create(&self, user: &LocalUser) -> StoreResult<()> {
        let email_key = user.email_key();
        let mut tables = self.tables.write().await;
        if tables.users.contains_key(&user.id) {
            return Err(StoreError::Backend(format!("user {} already exists", user.id)));
        }
        tables.check_unique(user, &email_key)?;
        tables.index(user, email_key);
        Ok(())
    }

    async fn update(&self, user: &LocalUser) -> StoreResult<()> {
        let email_key = user.email_key();
        let mut tables = self.tables.write().await;
        let previous = tables.users.get(&user.id).cloned().ok_or(StoreError::NotFound)?;
        tables.check_unique(user, &email_key)?;

        let previous_key = previous.email_key();
        if previous_key != email_key {
            tables.by_email.remove(&previous_key);
        }
        if let Some(old) = previous.external_id {
            if user.external_id != Some(old) {
                tables.by_external_id.remove(&old);
            }
        }
        tables.index(user, email_key);
        Ok(())
    }

    async fn count(&self) -> StoreResult<usize> {
        Ok(self.tables.read().await.users.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::{identity, unlinked_user};

    #[tokio::test]
    async fn create_then_find_by_both_keys() {
        let store = InMemoryUserStore::new();
        let user = LocalUser::from_identity(&identity(42, "A@x.com", "a"), true);
        store.create(&user).await.unwrap();

        assert_eq!(store.find_by_external_id(42).await.unwrap().unwrap().id, user.id);
        assert_eq!(store.find_by_email("a@X.com").await.unwrap().unwrap().id, user.id);
        assert!(store.find_by_external_id(7).await.unwrap().is_none());
        assert_eq!(store.find_by_id(user.id).await.unwrap().unwrap(), user);
        assert!(store.find_by_id(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected() {
        let store = InMemoryUserStore::new();
        store.create(&unlinked_user("a@x.com")).await.unwrap();

        let err = store.create(&unlinked_user(" A@x.com")).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey(UniqueField::Email)));
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn duplicate_external_id_is_rejected() {
        let store = InMemoryUserStore::new();
        store
            .create(&LocalUser::from_identity(&identity(42, "a@x.com", "a"), true))
            .await
            .unwrap();

        let err = store
            .create(&LocalUser::from_identity(&identity(42, "b@x.com", "b"), true))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey(UniqueField::ExternalId)));
    }

    #[tokio::test]
    async fn update_reindexes_changed_keys() {
        let store = InMemoryUserStore::new();
        let mut user = unlinked_user("a@x.com");
        store.create(&user).await.unwrap();

        user.external_id = Some(9);
        user.email = "new@x.com".to_string();
        store.update(&user).await.unwrap();

        assert!(store.find_by_email("a@x.com").await.unwrap().is_none());
        assert_eq!(store.find_by_email("new@x.com").await.unwrap().unwrap().id, user.id);
        assert_eq!(store.find_by_external_id(9).await.unwrap().unwrap().id, user.id);
    }

    #[tokio::test]
    async fn update_missing_row_is_not_found() {
        let store = InMemoryUserStore::new();
        let err = store.update(&unlinked_user("a@x.com")).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }

    #[tokio::test]
    async fn update_into_taken_email_is_rejected() {
        let store = InMemoryUserStore::new();
        store.create(&unlinked_user("a@x.com")).await.unwrap();
        let mut other = unlinked_user("b@x.com");
        store.create(&other).await.unwrap();

        other.email = "a@x.com".to_string();
        let err = store.update(&other).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey(UniqueField::Email)));
        assert_eq!(store.find_by_email("b@x.com").await.unwrap().unwrap().id, other.id);
    }
}
