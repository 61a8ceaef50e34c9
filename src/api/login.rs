// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};

use crate::{
    error::{ApiError, ErrorBody},
    models::{LoginRequest, LoginResponse},
    state::AppState,
};

/// Exchange an identity provider token for a local session.
#[utoipa::path(
    post,
    path = "/v1/auth/external/login",
    tag = "Auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login succeeded", body = LoginResponse),
        (status = 400, description = "Malformed request body", body = ErrorBody),
        (status = 401, description = "Token rejected by the provider", body = ErrorBody),
        (status = 403, description = "Account disabled", body = ErrorBody),
        (status = 404, description = "No user for this identity", body = ErrorBody),
        (status = 409, description = "Identity conflicts with an existing account", body = ErrorBody),
        (status = 502, description = "Identity provider unavailable", body = ErrorBody),
        (status = 503, description = "User storage unavailable", body = ErrorBody)
    )
)]
pub async fn external_login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<LoginResponse>, ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let response = state.orchestrator.login(&request.token).await?;
    Ok(Json(response))
}
