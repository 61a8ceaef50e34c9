// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! External identity provider client.
//!
//! One call to [`IdentityProvider::fetch_identity`] is one HTTP exchange with
//! the provider. Retries, deadlines and caching live in
//! [`IdentityGateway`](crate::auth::IdentityGateway); this layer only
//! classifies each failure so the gateway knows whether to try again.
//!
//! ## Wire Format
//!
//! `GET {base_url}{auth_endpoint}` with `Authorization: Bearer <token>`,
//! answered by a JSON user object:
//!
//! ```json
//! {
//!   "id": 42, "email": "a@x.com", "full_name": "A", "username": "a",
//!   "role": "member", "position_id": 3, "is_active": true,
//!   "github_token": "gho_...", "created_at": "...", "updated_at": "..."
//! }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use crate::config::ProviderConfig;
use crate::models::ExternalIdentity;
use crate::retry::Retryable;

/// Failure of a single provider exchange.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The provider refused the token (malformed, expired or revoked).
    #[error("provider rejected the token (HTTP {0})")]
    Rejected(u16),

    /// The token is valid but the provider has no user behind it.
    #[error("provider has no user for this token")]
    UnknownSubject,

    #[error("provider request timed out")]
    Timeout,

    /// Connection refused/reset or the body stream broke.
    #[error("provider transport error: {0}")]
    Transport(String),

    #[error("provider returned HTTP {0}")]
    Status(u16),

    #[error("provider response was invalid: {0}")]
    InvalidResponse(String),

    #[error("provider client misconfigured: {0}")]
    Configuration(String),
}

impl Retryable for ProviderError {
    fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Timeout | ProviderError::Transport(_) => true,
            ProviderError::Status(status) => {
                *status >= 500
                    || *status == StatusCode::REQUEST_TIMEOUT.as_u16()
                    || *status == StatusCode::TOO_MANY_REQUESTS.as_u16()
            }
            ProviderError::Rejected(_)
            | ProviderError::UnknownSubject
            | ProviderError::InvalidResponse(_)
            | ProviderError::Configuration(_) => false,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ProviderError::Timeout
        } else if e.is_decode() {
            ProviderError::InvalidResponse(e.to_string())
        } else if e.is_builder() {
            ProviderError::Configuration(e.to_string())
        } else {
            ProviderError::Transport(e.to_string())
        }
    }
}

/// Source of verified identities.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Exchange `token` for the identity the provider currently asserts.
    async fn fetch_identity(&self, token: &str) -> Result<ExternalIdentity, ProviderError>;
}

/// User object returned by the provider.
#[derive(Debug, Deserialize)]
struct ProviderUserInfo {
    id: i64,
    email: String,
    #[serde(rename = "full_name")]
    display_name: String,
    username: String,
    role: String,
    #[serde(default)]
    position_id: Option<i64>,
    #[serde(default = "default_active")]
    is_active: bool,
    #[serde(default, alias = "github_token")]
    linked_credential: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    updated_at: Option<String>,
}

fn default_active() -> bool {
    true
}

impl TryFrom<ProviderUserInfo> for ExternalIdentity {
    type Error = ProviderError;

    fn try_from(info: ProviderUserInfo) -> Result<Self, Self::Error> {
        if info.email.trim().is_empty() {
            return Err(ProviderError::InvalidResponse(
                "user object has an empty email".to_string(),
            ));
        }

        Ok(ExternalIdentity {
            external_id: info.id,
            email: info.email.trim().to_string(),
            display_name: info.display_name,
            username: info.username,
            role: info.role,
            position_id: info.position_id,
            linked_credential: info.linked_credential.filter(|t| !t.is_empty()),
            is_active: info.is_active,
            provider_created_at: info.created_at.as_deref().and_then(parse_timestamp),
            provider_updated_at: info.updated_at.as_deref().and_then(parse_timestamp),
        })
    }
}

/// Parse an RFC 3339 timestamp, accepting naive timestamps as UTC.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|naive| naive.and_utc())
        })
}

/// reqwest-backed provider client.
#[derive(Debug, Clone)]
pub struct HttpIdentityProvider {
    identity_url: Url,
    http: Client,
}

impl HttpIdentityProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let identity_url = config
            .identity_url()
            .map_err(|e| ProviderError::Configuration(format!("invalid identity URL: {e}")))?;

        let http = Client::builder()
            .timeout(config.timeout)
            .pool_max_idle_per_host(config.pool_max_idle)
            .pool_idle_timeout(config.pool_idle_timeout)
            .build()
            .map_err(|e| ProviderError::Configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { identity_url, http })
    }

    pub fn identity_url(&self) -> &Url {
        &self.identity_url
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    async fn fetch_identity(&self, token: &str) -> Result<ExternalIdentity, ProviderError> {
        debug!(url = %self.identity_url, "requesting identity from provider");

        let response = self
            .http
            .get(self.identity_url.clone())
            .bearer_auth(token)
            .header("Accept", "application/json")
            .send()
            .await?;

        let status = response.status();
        match status {
            s if s.is_success() => {}
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                warn!(status = status.as_u16(), "provider rejected token");
                return Err(ProviderError::Rejected(status.as_u16()));
            }
            StatusCode::NOT_FOUND => {
                warn!("provider has no user for token");
                return Err(ProviderError::UnknownSubject);
            }
            _ => {
                let body = response.text().await.unwrap_or_default();
                warn!(
                    status = status.as_u16(),
                    body = %truncate(&body, 200),
                    "provider returned unexpected status"
                );
                return Err(ProviderError::Status(status.as_u16()));
            }
        }

        let info: ProviderUserInfo = response.json().await?;
        let identity = ExternalIdentity::try_from(info)?;

        debug!(external_id = identity.external_id, "provider asserted identity");
        Ok(identity)
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
