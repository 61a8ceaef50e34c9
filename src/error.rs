// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use utoipa::ToSchema;

use crate::auth::{LoginError, SessionError, StatusClass};

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub error_code: &'static str,
}

/// JSON error body returned by every endpoint.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    pub error: String,
    pub error_code: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>, error_code: &'static str) -> Self {
        Self {
            status,
            message: message.into(),
            error_code,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message, "bad_request")
    }
}

fn status_for(class: StatusClass) -> StatusCode {
    match class {
        StatusClass::Unauthenticated => StatusCode::UNAUTHORIZED,
        StatusClass::NotFound => StatusCode::NOT_FOUND,
        StatusClass::Conflict => StatusCode::CONFLICT,
        StatusClass::Forbidden => StatusCode::FORBIDDEN,
        StatusClass::UpstreamUnavailable => StatusCode::BAD_GATEWAY,
        StatusClass::StorageUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        StatusClass::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<LoginError> for ApiError {
    fn from(e: LoginError) -> Self {
        Self::new(status_for(e.status_class()), e.public_message(), e.error_code())
    }
}

impl From<SessionError> for ApiError {
    fn from(e: SessionError) -> Self {
        Self::new(status_for(e.status_class()), e.public_message(), e.error_code())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.message,
            error_code: self.error_code.to_string(),
        });
        (self.status, body).into_response()
    }
}
