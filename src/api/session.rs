// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Endpoints for holders of a session access token.

use axum::Json;

use crate::{
    auth::{AuthUser, LinkedUser, VerifiedUser},
    error::ErrorBody,
    models::UserView,
};

/// Get the user behind the presented access token.
#[utoipa::path(
    get,
    path = "/v1/auth/me",
    tag = "Auth",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Current user", body = UserView),
        (status = 401, description = "Missing, invalid or expired token, or inactive user", body = ErrorBody),
        (status = 503, description = "User storage unavailable", body = ErrorBody)
    )
)]
pub async fn current_user(AuthUser(user): AuthUser) -> Json<UserView> {
    Json(UserView::from(&user))
}

/// Same as `/v1/auth/me`, but only for users with a verified email.
#[utoipa::path(
    get,
    path = "/v1/auth/me/verified",
    tag = "Auth",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Current verified user", body = UserView),
        (status = 401, description = "Missing, invalid or expired token, or inactive user", body = ErrorBody),
        (status = 403, description = "Email not verified", body = ErrorBody)
    )
)]
pub async fn current_verified_user(VerifiedUser(user): VerifiedUser) -> Json<UserView> {
    Json(UserView::from(&user))
}

/// Same as `/v1/auth/me`, but only for users linked to an external identity.
#[utoipa::path(
    get,
    path = "/v1/auth/external/me",
    tag = "Auth",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Current linked user", body = UserView),
        (status = 401, description = "Missing, invalid or expired token, or inactive user", body = ErrorBody),
        (status = 403, description = "No external identity linked", body = ErrorBody)
    )
)]
pub async fn current_linked_user(LinkedUser(user): LinkedUser) -> Json<UserView> {
    Json(UserView::from(&user))
}
