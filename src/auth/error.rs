// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Login and session errors.
//!
//! [`LoginError`] is the only error type callers of
//! [`AuthOrchestrator::login`](super::AuthOrchestrator::login) ever see. Lower
//! layers (provider, store, issuer) are converted into it at the component
//! boundaries; their raw errors stay in the logs.
//!
//! [`SessionError`] rejects requests that present an issued access token.

/// Transport-neutral class of a login failure.
///
/// The HTTP adapter maps each class to one status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Unauthenticated,
    NotFound,
    Conflict,
    Forbidden,
    UpstreamUnavailable,
    StorageUnavailable,
    Internal,
}

/// Login failure taxonomy.
///
/// Variant payloads hold diagnostic detail for logs; use
/// [`LoginError::public_message`] for anything returned to a client.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum LoginError {
    /// The provider rejected the token (or it was empty).
    #[error("invalid token")]
    InvalidToken,

    /// The provider could not be reached or misbehaved.
    #[error("identity provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// No local user and auto-creation is disabled, or the provider has no
    /// user for the token.
    #[error("user not found")]
    UserNotFound,

    /// The identity collides with a local account that cannot be linked.
    #[error("account conflict: {0}")]
    AccountConflict(String),

    #[error("account disabled")]
    AccountDisabled,

    /// The user store failed, timed out, or kept losing races.
    #[error("persistence error: {0}")]
    PersistenceError(String),

    /// A collaborator broke its contract (e.g. the credential issuer).
    #[error("integration error: {0}")]
    Integration(String),
}

impl LoginError {
    /// Stable snake_case code for clients.
    pub fn error_code(&self) -> &'static str {
        match self {
            LoginError::InvalidToken => "invalid_token",
            LoginError::ProviderUnavailable(_) => "provider_unavailable",
            LoginError::UserNotFound => "user_not_found",
            LoginError::AccountConflict(_) => "account_conflict",
            LoginError::AccountDisabled => "account_disabled",
            LoginError::PersistenceError(_) => "persistence_error",
            LoginError::Integration(_) => "integration_error",
        }
    }

    pub fn status_class(&self) -> StatusClass {
        match self {
            LoginError::InvalidToken => StatusClass::Unauthenticated,
            LoginError::UserNotFound => StatusClass::NotFound,
            LoginError::AccountConflict(_) => StatusClass::Conflict,
            LoginError::AccountDisabled => StatusClass::Forbidden,
            LoginError::ProviderUnavailable(_) => StatusClass::UpstreamUnavailable,
            LoginError::PersistenceError(_) => StatusClass::StorageUnavailable,
            LoginError::Integration(_) => StatusClass::Internal,
        }
    }

    /// Client-safe message without internal detail.
    pub fn public_message(&self) -> &'static str {
        match self {
            LoginError::InvalidToken => "The identity token is invalid or expired",
            LoginError::ProviderUnavailable(_) => "The identity provider is unavailable",
            LoginError::UserNotFound => "No user exists for this identity",
            LoginError::AccountConflict(_) => {
                "This identity conflicts with an existing account"
            }
            LoginError::AccountDisabled => "This account is disabled",
            LoginError::PersistenceError(_) => "User storage is temporarily unavailable",
            LoginError::Integration(_) => "Internal authentication error",
        }
    }
}

/// Why an authenticated request was refused.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("Authorization header is required")]
    MissingAuthHeader,

    #[error("Invalid authorization header format (expected 'Bearer <token>')")]
    InvalidAuthHeader,

    #[error("Session token is invalid")]
    InvalidToken,

    #[error("Session token has expired")]
    TokenExpired,

    /// A refresh token was presented where an access token is required.
    #[error("An access token is required")]
    NotAccessToken,

    /// The token is valid but its user no longer exists.
    #[error("User not found")]
    UnknownUser,

    #[error("Inactive user")]
    InactiveUser,

    #[error("Email not verified")]
    Unverified,

    /// The user has no external identity attached.
    #[error("External identity authentication required")]
    NotLinked,

    #[error("user store unavailable: {0}")]
    Unavailable(String),
}

impl SessionError {
    pub fn error_code(&self) -> &'static str {
        match self {
            SessionError::MissingAuthHeader => "missing_auth_header",
            SessionError::InvalidAuthHeader => "invalid_auth_header",
            SessionError::InvalidToken => "invalid_session_token",
            SessionError::TokenExpired => "token_expired",
            SessionError::NotAccessToken => "not_access_token",
            SessionError::UnknownUser => "unknown_user",
            SessionError::InactiveUser => "inactive_user",
            SessionError::Unverified => "email_not_verified",
            SessionError::NotLinked => "external_identity_required",
            SessionError::Unavailable(_) => "persistence_error",
        }
    }

    pub fn status_class(&self) -> StatusClass {
        match self {
            SessionError::Unverified | SessionError::NotLinked => StatusClass::Forbidden,
            SessionError::Unavailable(_) => StatusClass::StorageUnavailable,
            _ => StatusClass::Unauthenticated,
        }
    }

    /// Client-safe message; store detail stays in the logs.
    pub fn public_message(&self) -> String {
        match self {
            SessionError::Unavailable(_) => "User storage is temporarily unavailable".to_string(),
            other => other.to_string(),
        }
    }
}
