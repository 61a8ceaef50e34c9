// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! LRU cache for verified provider identities.
//!
//! Entries are keyed by a digest of the bearer token so raw tokens never sit
//! in memory longer than the request that carried them. The cache is an
//! optimisation only: a miss always falls through to the provider.

use std::fmt;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64ct::{Base64UrlUnpadded, Encoding};
use lru::LruCache;
use sha2::{Digest, Sha256};
use tokio::time::Instant;

use crate::clock::{Clock, TokioClock};
use crate::config::CacheConfig;
use crate::models::ExternalIdentity;

/// SHA-256 of a bearer token, URL-safe base64 without padding.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct TokenDigest(String);

impl TokenDigest {
    pub fn of(token: &str) -> Self {
        let hash = Sha256::digest(token.as_bytes());
        Self(Base64UrlUnpadded::encode_string(&hash))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for TokenDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // First 8 chars are enough to correlate log lines.
        write!(f, "TokenDigest({}..)", &self.0[..self.0.len().min(8)])
    }
}

struct CacheEntry {
    identity: ExternalIdentity,
    inserted_at: Instant,
    ttl: Duration,
}

/// In-process identity cache with per-entry TTL.
pub struct IdentityCache {
    cache: Option<Mutex<LruCache<TokenDigest, CacheEntry>>>,
    clock: Arc<dyn Clock>,
}

impl IdentityCache {
    /// Create an enabled cache holding at most `capacity` identities.
    pub fn new(capacity: usize, clock: Arc<dyn Clock>) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Some(Mutex::new(LruCache::new(capacity))),
            clock,
        }
    }

    /// A cache where every lookup misses and every insert is dropped.
    pub fn disabled() -> Self {
        Self {
            cache: None,
            clock: Arc::new(TokioClock),
        }
    }

    pub fn from_config(config: &CacheConfig, clock: Arc<dyn Clock>) -> Self {
        if config.effective_ttl().is_zero() {
            Self::disabled()
        } else {
            Self::new(config.capacity, clock)
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.cache.is_some()
    }

    /// Cached identity for `digest`, if present and not expired.
    pub fn get(&self, digest: &TokenDigest) -> Option<ExternalIdentity> {
        let mut cache = self.cache.as_ref()?.lock().ok()?;
        let now = self.clock.now();
        if let Some(entry) = cache.get(digest) {
            if now.saturating_duration_since(entry.inserted_at) < entry.ttl {
                return Some(entry.identity.clone());
            }
            cache.pop(digest);
        }
        None
    }

    /// Store `identity` under `digest` for `ttl`. A zero TTL is a no-op.
    pub fn put(&self, digest: TokenDigest, identity: ExternalIdentity, ttl: Duration) {
        if ttl.is_zero() {
            return;
        }
        let Some(cache) = self.cache.as_ref() else {
            return;
        };
        if let Ok(mut cache) = cache.lock() {
            cache.put(
                digest,
                CacheEntry {
                    identity,
                    inserted_at: self.clock.now(),
                    ttl,
                },
            );
        }
    }

    pub fn invalidate(&self, digest: &TokenDigest) {
        if let Some(Ok(mut cache)) = self.cache.as_ref().map(|c| c.lock()) {
            cache.pop(digest);
        }
    }

    pub fn len(&self) -> usize {
        self.cache
            .as_ref()
            .and_then(|c| c.lock().ok().map(|c| c.len()))
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
