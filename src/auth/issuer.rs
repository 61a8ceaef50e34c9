// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Local session credential issuance.
//!
//! The login flow only depends on [`CredentialIssuer`]. The bundled
//! [`JwtCredentialIssuer`] signs an HS256 access/refresh pair and, as a
//! [`SessionVerifier`], checks access tokens presented back to the service.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::SessionError;
use crate::config::SessionConfig;
use crate::models::SessionCredential;

pub const TOKEN_TYPE_BEARER: &str = "bearer";

/// Clock skew tolerance (60 seconds).
const CLOCK_SKEW_LEEWAY: u64 = 60;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum IssueError {
    #[error("failed to sign session token: {0}")]
    Signing(String),

    #[error("issuer returned an invalid credential: {0}")]
    InvalidCredential(String),
}

/// Mints session credentials for a local user.
#[async_trait]
pub trait CredentialIssuer: Send + Sync {
    async fn issue(&self, user_id: Uuid, email: &str) -> Result<SessionCredential, IssueError>;
}

/// Checks session tokens presented on authenticated requests.
pub trait SessionVerifier: Send + Sync {
    /// Validate an access token and return its claims.
    fn verify_access(&self, token: &str) -> Result<SessionClaims, SessionError>;
}

/// Check the parts of a credential the login flow relies on.
pub fn validate_credential(credential: &SessionCredential) -> Result<(), IssueError> {
    if credential.token_type.trim().is_empty() {
        return Err(IssueError::InvalidCredential("token type is empty".to_string()));
    }
    if credential.access_token.is_empty() || credential.refresh_token.is_empty() {
        return Err(IssueError::InvalidCredential("token is empty".to_string()));
    }
    Ok(())
}

/// Which half of the pair a token is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// Claims carried by both session tokens.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionClaims {
    /// Local user id
    pub sub: String,
    pub email: String,
    pub typ: TokenKind,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
}

pub struct JwtCredentialIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl JwtCredentialIssuer {
    pub fn new(secret: &[u8], access_ttl: Duration, refresh_ttl: Duration) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            access_ttl,
            refresh_ttl,
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(
            config.signing_secret.as_bytes(),
            config.access_ttl,
            config.refresh_ttl,
        )
    }

    fn sign(&self, user_id: Uuid, email: &str, typ: TokenKind, ttl: Duration) -> Result<String, IssueError> {
        let iat = Utc::now().timestamp();
        let exp = i64::try_from(ttl.as_secs())
            .ok()
            .and_then(|secs| iat.checked_add(secs))
            .ok_or_else(|| IssueError::Signing(format!("{typ:?} token lifetime out of range")))?;
        let claims = SessionClaims {
            sub: user_id.to_string(),
            email: email.to_string(),
            typ,
            iat,
            exp,
            jti: Uuid::new_v4().to_string(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| IssueError::Signing(e.to_string()))
    }

    /// Verify a token minted by this issuer and return its claims.
    pub fn verify(&self, token: &str) -> Result<SessionClaims, jsonwebtoken::errors::Error> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = CLOCK_SKEW_LEEWAY;
        decode::<SessionClaims>(token, &self.decoding_key, &validation).map(|data| data.claims)
    }
}

impl SessionVerifier for JwtCredentialIssuer {
    fn verify_access(&self, token: &str) -> Result<SessionClaims, SessionError> {
        let claims = self.verify(token).map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => SessionError::TokenExpired,
            _ => SessionError::InvalidToken,
        })?;
        if claims.typ != TokenKind::Access {
            return Err(SessionError::NotAccessToken);
        }
        Ok(claims)
    }
}

#[async_trait]
impl CredentialIssuer for JwtCredentialIssuer {
    async fn issue(&self, user_id: Uuid, email: &str) -> Result<SessionCredential, IssueError> {
        let access_token = self.sign(user_id, email, TokenKind::Access, self.access_ttl)?;
        let refresh_token = self.sign(user_id, email, TokenKind::Refresh, self.refresh_ttl)?;

        Ok(SessionCredential {
            access_token,
            refresh_token,
            token_type: TOKEN_TYPE_BEARER.to_string(),
            expires_in: self.access_ttl.as_secs(),
        })
    }
}
