// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Configuration is read from the environment once at startup and handed to
//! the components that need it. Nothing re-reads it per request.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `EXTERNAL_ID_BASE_URL` | Identity provider base URL | Required |
//! | `EXTERNAL_ID_AUTH_ENDPOINT` | Identity endpoint path | `/api/v1/auth/me` |
//! | `EXTERNAL_ID_TIMEOUT_SECS` | Provider timeout (per request and overall) | `30` |
//! | `EXTERNAL_ID_MAX_RETRIES` | Provider attempts | `3` |
//! | `EXTERNAL_ID_RETRY_DELAY_MS` | Provider backoff base | `1000` |
//! | `EXTERNAL_ID_POOL_SIZE` | Idle provider connections kept per host | `10` |
//! | `EXTERNAL_ID_KEEPALIVE_SECS` | Idle provider connection lifetime | `30` |
//! | `EXTERNAL_ID_AUTO_CREATE_USERS` | Create users on first login | `true` |
//! | `EXTERNAL_ID_AUTO_VERIFY_USERS` | Mark provider users verified | `true` |
//! | `EXTERNAL_ID_LINK_EXISTING_USERS` | Link existing users by email | `true` |
//! | `EXTERNAL_ID_CACHE_USER_INFO` | Cache provider identities | `false` |
//! | `EXTERNAL_ID_CACHE_TTL_SECS` | Identity cache TTL | `300` |
//! | `EXTERNAL_ID_CACHE_CAPACITY` | Identity cache entries | `1024` |
//! | `EXTERNAL_ID_DEBUG_LOGGING` | Debug logging for this service | `false` |
//! | `LOGIN_TIMEOUT_SECS` | Overall deadline for one login | `45` |
//! | `STORE_MAX_RETRIES` | User store attempts | `2` |
//! | `STORE_RETRY_DELAY_MS` | User store backoff base | `500` |
//! | `SESSION_SIGNING_SECRET` | HS256 secret for session tokens (>= 32 bytes) | Required |
//! | `ACCESS_TOKEN_TTL_SECS` | Access token lifetime | `1800` |
//! | `REFRESH_TOKEN_TTL_SECS` | Refresh token lifetime | `604800` |
//! | `DATA_DIR` | Directory for the user database (unset: in-memory) | unset |
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port | `8080` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |

use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::retry::RetryPolicy;

pub const BASE_URL_ENV: &str = "EXTERNAL_ID_BASE_URL";
pub const AUTH_ENDPOINT_ENV: &str = "EXTERNAL_ID_AUTH_ENDPOINT";
pub const TIMEOUT_ENV: &str = "EXTERNAL_ID_TIMEOUT_SECS";
pub const MAX_RETRIES_ENV: &str = "EXTERNAL_ID_MAX_RETRIES";
pub const RETRY_DELAY_ENV: &str = "EXTERNAL_ID_RETRY_DELAY_MS";
pub const POOL_SIZE_ENV: &str = "EXTERNAL_ID_POOL_SIZE";
pub const KEEPALIVE_ENV: &str = "EXTERNAL_ID_KEEPALIVE_SECS";
pub const AUTO_CREATE_ENV: &str = "EXTERNAL_ID_AUTO_CREATE_USERS";
pub const AUTO_VERIFY_ENV: &str = "EXTERNAL_ID_AUTO_VERIFY_USERS";
pub const LINK_EXISTING_ENV: &str = "EXTERNAL_ID_LINK_EXISTING_USERS";
pub const CACHE_ENABLED_ENV: &str = "EXTERNAL_ID_CACHE_USER_INFO";
pub const CACHE_TTL_ENV: &str = "EXTERNAL_ID_CACHE_TTL_SECS";
pub const CACHE_CAPACITY_ENV: &str = "EXTERNAL_ID_CACHE_CAPACITY";
pub const DEBUG_LOGGING_ENV: &str = "EXTERNAL_ID_DEBUG_LOGGING";
pub const LOGIN_TIMEOUT_ENV: &str = "LOGIN_TIMEOUT_SECS";
pub const STORE_MAX_RETRIES_ENV: &str = "STORE_MAX_RETRIES";
pub const STORE_RETRY_DELAY_ENV: &str = "STORE_RETRY_DELAY_MS";
pub const SIGNING_SECRET_ENV: &str = "SESSION_SIGNING_SECRET";
pub const ACCESS_TTL_ENV: &str = "ACCESS_TOKEN_TTL_SECS";
pub const REFRESH_TTL_ENV: &str = "REFRESH_TOKEN_TTL_SECS";

/// Environment variable name for the user database directory.
///
/// When unset the service keeps users in memory (lost on restart).
pub const DATA_DIR_ENV: &str = "DATA_DIR";
pub const HOST_ENV: &str = "HOST";
pub const PORT_ENV: &str = "PORT";
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

const DEFAULT_AUTH_ENDPOINT: &str = "/api/v1/auth/me";
const DEFAULT_PROVIDER_TIMEOUT_SECS: u64 = 30;
const DEFAULT_PROVIDER_MAX_RETRIES: u32 = 3;
const DEFAULT_PROVIDER_RETRY_DELAY_MS: u64 = 1000;
const DEFAULT_POOL_SIZE: usize = 10;
const DEFAULT_KEEPALIVE_SECS: u64 = 30;
const DEFAULT_CACHE_TTL_SECS: u64 = 300;
const DEFAULT_CACHE_CAPACITY: usize = 1024;
const DEFAULT_LOGIN_TIMEOUT_SECS: u64 = 45;
const DEFAULT_STORE_MAX_RETRIES: u32 = 2;
const DEFAULT_STORE_RETRY_DELAY_MS: u64 = 500;
const DEFAULT_ACCESS_TTL_SECS: u64 = 30 * 60;
const DEFAULT_REFRESH_TTL_SECS: u64 = 7 * 24 * 60 * 60;
const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8080;

/// Minimum length of the session signing secret.
pub const MIN_SIGNING_SECRET_LEN: usize = 32;

/// Upper bound for the provider timeout and the login deadline.
pub const MAX_TIMEOUT_SECS: u64 = 60 * 60;

/// Upper bound for session token lifetimes.
pub const MAX_TOKEN_TTL_SECS: u64 = 365 * 24 * 60 * 60;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("required configuration missing: {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

// =============================================================================
// Sections
// =============================================================================

/// How to reach the identity provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderConfig {
    pub base_url: Url,
    pub auth_endpoint: String,
    /// Bounds each HTTP request and the gateway's overall retry loop.
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
    /// Idle connections kept open per provider host.
    pub pool_max_idle: usize,
    /// How long an idle provider connection stays in the pool.
    pub pool_idle_timeout: Duration,
}

impl ProviderConfig {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            auth_endpoint: DEFAULT_AUTH_ENDPOINT.to_string(),
            timeout: Duration::from_secs(DEFAULT_PROVIDER_TIMEOUT_SECS),
            max_retries: DEFAULT_PROVIDER_MAX_RETRIES,
            retry_delay: Duration::from_millis(DEFAULT_PROVIDER_RETRY_DELAY_MS),
            pool_max_idle: DEFAULT_POOL_SIZE,
            pool_idle_timeout: Duration::from_secs(DEFAULT_KEEPALIVE_SECS),
        }
    }

    /// Full identity endpoint URL (`base_url` joined with `auth_endpoint`).
    pub fn identity_url(&self) -> Result<Url, url::ParseError> {
        self.base_url.join(&self.auth_endpoint)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, self.retry_delay)
    }
}

/// Local user reconciliation flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcilePolicy {
    pub auto_create_users: bool,
    pub auto_verify_users: bool,
    pub link_existing_users: bool,
}

impl Default for ReconcilePolicy {
    fn default() -> Self {
        Self {
            auto_create_users: true,
            auto_verify_users: true,
            link_existing_users: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl: Duration,
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
            capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

impl CacheConfig {
    /// TTL actually applied; zero when caching is off.
    pub fn effective_ttl(&self) -> Duration {
        if self.enabled {
            self.ttl
        } else {
            Duration::ZERO
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub signing_secret: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
}

// Keep the secret out of debug output.
impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("signing_secret", &"<redacted>")
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub log_format: LogFormat,
    pub data_dir: Option<PathBuf>,
}

/// Complete service configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub provider: ProviderConfig,
    pub reconcile: ReconcilePolicy,
    pub cache: CacheConfig,
    pub session: SessionConfig,
    pub server: ServerConfig,
    pub login_timeout: Duration,
    pub store_retry: RetryPolicy,
    pub debug_logging: bool,
}

impl AppConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load using `lookup` to resolve variable names.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };

        let base_url = env.required(BASE_URL_ENV)?;
        let base_url = Url::parse(&base_url).map_err(|e| ConfigError::Invalid {
            name: BASE_URL_ENV,
            reason: e.to_string(),
        })?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(ConfigError::Invalid {
                name: BASE_URL_ENV,
                reason: format!("unsupported scheme {}", base_url.scheme()),
            });
        }

        let provider = ProviderConfig {
            base_url,
            auth_endpoint: env.or_default(AUTH_ENDPOINT_ENV, DEFAULT_AUTH_ENDPOINT),
            timeout: env.secs_within(TIMEOUT_ENV, DEFAULT_PROVIDER_TIMEOUT_SECS, MAX_TIMEOUT_SECS)?,
            max_retries: env.parse_or(MAX_RETRIES_ENV, DEFAULT_PROVIDER_MAX_RETRIES)?,
            retry_delay: Duration::from_millis(
                env.parse_or(RETRY_DELAY_ENV, DEFAULT_PROVIDER_RETRY_DELAY_MS)?,
            ),
            pool_max_idle: env.parse_or(POOL_SIZE_ENV, DEFAULT_POOL_SIZE)?,
            pool_idle_timeout: Duration::from_secs(
                env.parse_or(KEEPALIVE_ENV, DEFAULT_KEEPALIVE_SECS)?,
            ),
        };

        let defaults = ReconcilePolicy::default();
        let reconcile = ReconcilePolicy {
            auto_create_users: env.flag_or(AUTO_CREATE_ENV, defaults.auto_create_users)?,
            auto_verify_users: env.flag_or(AUTO_VERIFY_ENV, defaults.auto_verify_users)?,
            link_existing_users: env.flag_or(LINK_EXISTING_ENV, defaults.link_existing_users)?,
        };

        let cache = CacheConfig {
            enabled: env.flag_or(CACHE_ENABLED_ENV, false)?,
            ttl: Duration::from_secs(env.parse_or(CACHE_TTL_ENV, DEFAULT_CACHE_TTL_SECS)?),
            capacity: env.parse_or(CACHE_CAPACITY_ENV, DEFAULT_CACHE_CAPACITY)?,
        };

        let signing_secret = env.required(SIGNING_SECRET_ENV)?;
        if signing_secret.len() < MIN_SIGNING_SECRET_LEN {
            return Err(ConfigError::Invalid {
                name: SIGNING_SECRET_ENV,
                reason: format!("must be at least {MIN_SIGNING_SECRET_LEN} bytes"),
            });
        }
        let session = SessionConfig {
            signing_secret,
            access_ttl: env.secs_within(ACCESS_TTL_ENV, DEFAULT_ACCESS_TTL_SECS, MAX_TOKEN_TTL_SECS)?,
            refresh_ttl: env.secs_within(
                REFRESH_TTL_ENV,
                DEFAULT_REFRESH_TTL_SECS,
                MAX_TOKEN_TTL_SECS,
            )?,
        };

        let log_format = match env.optional(LOG_FORMAT_ENV).as_deref() {
            None => LogFormat::default(),
            Some(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
            Some(v) if v.eq_ignore_ascii_case("pretty") => LogFormat::Pretty,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: LOG_FORMAT_ENV,
                    reason: format!("expected json or pretty, got {other}"),
                })
            }
        };
        let server = ServerConfig {
            host: env.or_default(HOST_ENV, DEFAULT_HOST),
            port: env.parse_or(PORT_ENV, DEFAULT_PORT)?,
            log_format,
            data_dir: env.optional(DATA_DIR_ENV).map(PathBuf::from),
        };

        Ok(Self {
            provider,
            reconcile,
            cache,
            session,
            server,
            login_timeout: env.secs_within(
                LOGIN_TIMEOUT_ENV,
                DEFAULT_LOGIN_TIMEOUT_SECS,
                MAX_TIMEOUT_SECS,
            )?,
            store_retry: RetryPolicy::new(
                env.parse_or(STORE_MAX_RETRIES_ENV, DEFAULT_STORE_MAX_RETRIES)?,
                Duration::from_millis(env.parse_or(STORE_RETRY_DELAY_ENV, DEFAULT_STORE_RETRY_DELAY_MS)?),
            ),
            debug_logging: env.flag_or(DEBUG_LOGGING_ENV, false)?,
        })
    }
}

// =============================================================================
// Lookup helpers
// =============================================================================

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn optional(&self, name: &str) -> Option<String> {
        (self.lookup)(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, name: &'static str) -> Result<String, ConfigError> {
        self.optional(name).ok_or(ConfigError::Missing(name))
    }

    fn or_default(&self, name: &str, default: &str) -> String {
        self.optional(name).unwrap_or_else(|| default.to_string())
    }

    fn parse_or<T>(&self, name: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match self.optional(name) {
            None => Ok(default),
            Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
                name,
                reason: e.to_string(),
            }),
        }
    }

    /// Whole seconds in `1..=max`.
    fn secs_within(&self, name: &'static str, default: u64, max: u64) -> Result<Duration, ConfigError> {
        let secs: u64 = self.parse_or(name, default)?;
        if secs == 0 || secs > max {
            return Err(ConfigError::Invalid {
                name,
                reason: format!("must be between 1 and {max} seconds, got {secs}"),
            });
        }
        Ok(Duration::from_secs(secs))
    }

    fn flag_or(&self, name: &'static str, default: bool) -> Result<bool, ConfigError> {
        match self.optional(name) {
            None => Ok(default),
            Some(raw) => parse_flag(&raw).ok_or_else(|| ConfigError::Invalid {
                name,
                reason: format!("expected a boolean, got {raw}"),
            }),
        }
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
