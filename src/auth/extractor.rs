// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Axum extractors for requests carrying a session access token.
//!
//! ```rust,ignore
//! async fn my_handler(AuthUser(user): AuthUser) -> impl IntoResponse {
//!     // user is the active LocalUser behind the token
//! }
//! ```
//!
//! [`AuthUser`] validates `Authorization: Bearer <access token>`, loads the
//! user it names and refuses inactive accounts. [`VerifiedUser`] and
//! [`LinkedUser`] add one more requirement each on top of that.

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use tracing::{debug, warn};
use uuid::Uuid;

use super::error::SessionError;
use crate::error::ApiError;
use crate::models::LocalUser;
use crate::state::AppState;

/// Active user behind a valid access token.
pub struct AuthUser(pub LocalUser);

/// [`AuthUser`] whose email is verified.
pub struct VerifiedUser(pub LocalUser);

/// [`AuthUser`] linked to an external identity.
pub struct LinkedUser(pub LocalUser);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        authenticate(parts, state).await.map(AuthUser).map_err(reject)
    }
}

impl FromRequestParts<AppState> for VerifiedUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let AuthUser(user) = AuthUser::from_request_parts(parts, state).await?;
        if !user.is_verified {
            return Err(reject(SessionError::Unverified));
        }
        Ok(VerifiedUser(user))
    }
}

impl FromRequestParts<AppState> for LinkedUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let AuthUser(user) = AuthUser::from_request_parts(parts, state).await?;
        if user.external_id.is_none() {
            return Err(reject(SessionError::NotLinked));
        }
        Ok(LinkedUser(user))
    }
}

async fn authenticate(parts: &Parts, state: &AppState) -> Result<LocalUser, SessionError> {
    let auth_header = parts
        .headers
        .get(AUTHORIZATION)
        .ok_or(SessionError::MissingAuthHeader)?
        .to_str()
        .map_err(|_| SessionError::InvalidAuthHeader)?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or(SessionError::InvalidAuthHeader)?;

    let claims = state.sessions.verify_access(token)?;
    let user_id = Uuid::parse_str(&claims.sub).map_err(|_| SessionError::InvalidToken)?;

    let user = state
        .store
        .find_by_id(user_id)
        .await
        .map_err(|e| SessionError::Unavailable(e.to_string()))?
        .ok_or(SessionError::UnknownUser)?;

    if !user.is_active {
        return Err(SessionError::InactiveUser);
    }
    Ok(user)
}

fn reject(err: SessionError) -> ApiError {
    match &err {
        SessionError::Unavailable(detail) => warn!(error = %detail, "session user lookup failed"),
        other => debug!(error_code = other.error_code(), "session rejected"),
    }
    err.into()
}
