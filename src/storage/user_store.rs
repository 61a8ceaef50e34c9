// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Local user persistence contract.
//!
//! Implementations must enforce uniqueness of the normalized email and of a
//! non-null external id atomically within one call. A write either commits
//! completely or leaves no trace.

use async_trait::async_trait;
use uuid::Uuid;

use crate::models::LocalUser;
use crate::retry::Retryable;

/// Unique field that rejected a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniqueField {
    Email,
    ExternalId,
}

impl std::fmt::Display for UniqueField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UniqueField::Email => write!(f, "email"),
            UniqueField::ExternalId => write!(f, "external_id"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Another row already holds this unique value.
    #[error("duplicate {0}")]
    DuplicateKey(UniqueField),

    /// The row to update does not exist.
    #[error("user not found")]
    NotFound,

    /// Transient backend failure; the call may succeed if repeated.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store error: {0}")]
    Backend(String),
}

impl Retryable for StoreError {
    fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Local user repository.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<LocalUser>>;

    async fn find_by_external_id(&self, external_id: i64) -> StoreResult<Option<LocalUser>>;

    /// Look up by email; implementations compare normalized forms.
    async fn find_by_email(&self, email: &str) -> StoreResult<Option<LocalUser>>;

    /// Insert a new user. Fails with [`StoreError::DuplicateKey`] when the
    /// email or external id is already taken.
    async fn create(&self, user: &LocalUser) -> StoreResult<()>;

    /// Replace an existing user by id. Fails with [`StoreError::NotFound`]
    /// when the row is gone and [`StoreError::DuplicateKey`] when the new
    /// email or external id collides with another row.
    async fn update(&self, user: &LocalUser) -> StoreResult<()>;

    /// Lightweight liveness check used by the readiness check.
    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn count(&self) -> StoreResult<usize>;
}
