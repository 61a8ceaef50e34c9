// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Identity Data Models
//!
//! Types that flow through a single login:
//!
//! - [`ExternalIdentity`]: attributes asserted by the identity provider
//! - [`LocalUser`]: the local user record owned by a [`UserStore`](crate::storage::UserStore)
//! - [`UserView`]: public projection of a `LocalUser` returned to callers
//! - [`SessionCredential`]: access/refresh pair minted for a user
//!
//! ## Email Normalization
//!
//! Emails are compared on their normalized form (see [`normalize_email`]).
//! Stores index by that form so `Alice@Example.com` and `alice@example.com`
//! resolve to the same record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;
use utoipa::ToSchema;
use uuid::Uuid;

// =============================================================================
// External Identity
// =============================================================================

/// Verified identity attributes for one external token.
///
/// Built from the provider response and never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExternalIdentity {
    /// Stable numeric id assigned by the provider.
    pub external_id: i64,
    pub email: String,
    pub display_name: String,
    pub username: String,
    /// Role label as asserted by the provider.
    pub role: String,
    pub position_id: Option<i64>,
    /// Credential delegated by the provider (e.g. an access token for a
    /// linked service). Never logged.
    pub linked_credential: Option<String>,
    /// Whether the provider considers the account active.
    pub is_active: bool,
    pub provider_created_at: Option<DateTime<Utc>>,
    pub provider_updated_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Local User
// =============================================================================

/// Local user aggregate.
///
/// ## Invariants
///
/// - At most one `LocalUser` holds a given non-null `external_id`
/// - At most one `LocalUser` holds a given (normalized) `email`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LocalUser {
    pub id: Uuid,
    pub email: String,
    pub display_name: String,
    pub is_verified: bool,
    pub is_active: bool,
    pub external_id: Option<i64>,
    pub username: String,
    pub role: String,
    pub position_id: Option<i64>,
    pub linked_credential: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LocalUser {
    /// Build a fresh record from a provider identity.
    pub fn from_identity(identity: &ExternalIdentity, verified: bool) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            email: identity.email.clone(),
            display_name: identity.display_name.clone(),
            is_verified: verified,
            is_active: identity.is_active,
            external_id: Some(identity.external_id),
            username: identity.username.clone(),
            role: identity.role.clone(),
            position_id: identity.position_id,
            linked_credential: identity.linked_credential.clone(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Overwrite the provider-owned attributes with fresher values.
    ///
    /// Email and verification state are not touched here.
    pub fn apply_identity(&mut self, identity: &ExternalIdentity) {
        self.display_name = identity.display_name.clone();
        self.username = identity.username.clone();
        self.role = identity.role.clone();
        self.position_id = identity.position_id;
        self.linked_credential = identity.linked_credential.clone();
        self.is_active = identity.is_active;
        self.updated_at = Utc::now();
    }

    /// Normalized email used as the uniqueness key.
    pub fn email_key(&self) -> String {
        normalize_email(&self.email)
    }
}

/// Public projection of a [`LocalUser`].
///
/// Omits the linked credential.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct UserView {
    /// Local user id.
    pub id: Uuid,
    pub email: String,
    pub display_name: String,
    pub is_active: bool,
    pub is_verified: bool,
    /// Identity provider id (if linked).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<i64>,
    pub username: String,
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&LocalUser> for UserView {
    fn from(user: &LocalUser) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            display_name: user.display_name.clone(),
            is_active: user.is_active,
            is_verified: user.is_verified,
            external_id: user.external_id,
            username: user.username.clone(),
            role: user.role.clone(),
            position_id: user.position_id,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

// =============================================================================
// Session Credential
// =============================================================================

/// Access/refresh token pair for one local user.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct SessionCredential {
    pub access_token: String,
    pub refresh_token: String,
    /// Token type, e.g. `bearer`.
    pub token_type: String,
    /// Access token lifetime in whole seconds.
    pub expires_in: u64,
}

/// Successful login result: the user and their fresh credential.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LoginResponse {
    pub user: UserView,
    pub tokens: SessionCredential,
}

/// Request body for the login endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LoginRequest {
    /// Bearer token issued by the identity provider.
    pub token: String,
}

// =============================================================================
// Helpers
// =============================================================================

/// Normalize an email for comparison: NFKC, trimmed, lowercased.
pub fn normalize_email(email: &str) -> String {
    email.trim().nfkc().collect::<String>().to_lowercase()
}
