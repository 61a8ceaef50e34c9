// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Token → identity resolution.
//!
//! The gateway wraps an [`IdentityProvider`] with the identity cache, the
//! retry policy and the provider timeout. The provider timeout bounds the
//! whole resolution (all attempts and backoff), and the caller's deadline
//! can cut it shorter.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::clock::{deadline_after, Clock};
use crate::config::{CacheConfig, ProviderConfig};
use crate::models::ExternalIdentity;
use crate::providers::{IdentityProvider, ProviderError};
use crate::retry::{with_retry, RetryError, RetryPolicy};
use crate::storage::{IdentityCache, TokenDigest};

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("token rejected")]
    InvalidToken,

    #[error("provider has no user for this token")]
    UserNotFound,

    #[error("{0}")]
    Unavailable(String),
}

impl From<RetryError<ProviderError>> for ResolveError {
    fn from(e: RetryError<ProviderError>) -> Self {
        match e {
            RetryError::Permanent(ProviderError::Rejected(_)) => ResolveError::InvalidToken,
            RetryError::Permanent(ProviderError::UnknownSubject) => ResolveError::UserNotFound,
            other => ResolveError::Unavailable(other.to_string()),
        }
    }
}

pub struct IdentityGateway {
    provider: Arc<dyn IdentityProvider>,
    cache: Arc<IdentityCache>,
    cache_ttl: Duration,
    retry: RetryPolicy,
    timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl IdentityGateway {
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        cache: Arc<IdentityCache>,
        cache_ttl: Duration,
        retry: RetryPolicy,
        timeout: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            provider,
            cache,
            cache_ttl,
            retry,
            timeout,
            clock,
        }
    }

    pub fn from_config(
        provider: Arc<dyn IdentityProvider>,
        provider_config: &ProviderConfig,
        cache_config: &CacheConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let cache = Arc::new(IdentityCache::from_config(cache_config, Arc::clone(&clock)));
        Self::new(
            provider,
            cache,
            cache_config.effective_ttl(),
            provider_config.retry_policy(),
            provider_config.timeout,
            clock,
        )
    }

    pub fn cache(&self) -> &IdentityCache {
        &self.cache
    }

    /// Drop the cached identity for `token`, if any.
    pub fn forget(&self, token: &str) {
        self.cache.invalidate(&TokenDigest::of(token.trim()));
    }

    /// Exchange `token` for a verified identity, finishing by `deadline`.
    pub async fn resolve(
        &self,
        token: &str,
        deadline: Instant,
    ) -> Result<ExternalIdentity, ResolveError> {
        let token = token.trim();
        if token.is_empty() {
            debug!("empty token, skipping provider");
            return Err(ResolveError::InvalidToken);
        }

        let digest = TokenDigest::of(token);
        if let Some(identity) = self.cache.get(&digest) {
            debug!(external_id = identity.external_id, "identity cache hit");
            return Ok(identity);
        }

        let budget = deadline.min(deadline_after(self.clock.as_ref(), self.timeout));
        let identity = with_retry(&self.retry, self.clock.as_ref(), budget, "identity_fetch", |_| {
            self.provider.fetch_identity(token)
        })
        .await
        .map_err(|e| {
            let attempts = e.attempts();
            let err = ResolveError::from(e);
            warn!(attempts, error = %err, "identity resolution failed");
            err
        })?;

        info!(external_id = identity.external_id, "identity verified by provider");
        self.cache.put(digest, identity.clone(), self.cache_ttl);
        Ok(identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TokioClock;
    use crate::models::fixtures::identity;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Provider that replays scripted outcomes, then repeats the last one.
    struct ScriptedProvider {
        script: Mutex<VecDeque<Result<ExternalIdentity, ProviderError>>>,
        last: Mutex<Option<Result<ExternalIdentity, ProviderError>>>,
        delay: Duration,
        calls: AtomicU32,
    }

    impl ScriptedProvider {
        fn new(script: Vec<Result<ExternalIdentity, ProviderError>>) -> Arc<Self> {
            Self::with_delay(script, Duration::ZERO)
        }

        fn with_delay(
            script: Vec<Result<ExternalIdentity, ProviderError>>,
            delay: Duration,
        ) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                last: Mutex::new(None),
                delay,
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    fn clone_outcome(
        outcome: &Result<ExternalIdentity, ProviderError>,
    ) -> Result<ExternalIdentity, ProviderError> {
        match outcome {
            Ok(identity) => Ok(identity.clone()),
            Err(ProviderError::Rejected(s)) => Err(ProviderError::Rejected(*s)),
            Err(ProviderError::UnknownSubject) => Err(ProviderError::UnknownSubject),
            Err(ProviderError::Timeout) => Err(ProviderError::Timeout),
            Err(ProviderError::Status(s)) => Err(ProviderError::Status(*s)),
            Err(e) => Err(ProviderError::InvalidResponse(e.to_string())),
        }
    }

    #[async_trait]
    impl IdentityProvider for ScriptedProvider {
        async fn fetch_identity(&self, _token: &str) -> Result<ExternalIdentity, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let next = self.script.lock().unwrap().pop_front();
            let outcome = match next {
                Some(outcome) => outcome,
                None => clone_outcome(self.last.lock().unwrap().as_ref().unwrap()),
            };
            *self.last.lock().unwrap() = Some(clone_outcome(&outcome));
            outcome
        }
    }

    fn gateway(provider: Arc<ScriptedProvider>, cache: IdentityCache, timeout: Duration) -> IdentityGateway {
        IdentityGateway::new(
            provider,
            Arc::new(cache),
            Duration::from_secs(300),
            RetryPolicy::new(3, Duration::from_millis(100)).with_jitter(0.0),
            timeout,
            Arc::new(TokioClock),
        )
    }

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(3600)
    }

    #[tokio::test(start_paused = true)]
    async fn empty_token_never_reaches_provider() {
        let provider = ScriptedProvider::new(vec![Ok(identity(42, "a@x.com", "a"))]);
        let gw = gateway(provider.clone(), IdentityCache::disabled(), Duration::from_secs(30));

        assert_eq!(gw.resolve("   ", far_deadline()).await, Err(ResolveError::InvalidToken));
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_token_is_not_retried() {
        let provider = ScriptedProvider::new(vec![Err(ProviderError::Rejected(401))]);
        let gw = gateway(provider.clone(), IdentityCache::disabled(), Duration::from_secs(30));

        assert_eq!(gw.resolve("t", far_deadline()).await, Err(ResolveError::InvalidToken));
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_subject_maps_to_user_not_found() {
        let provider = ScriptedProvider::new(vec![Err(ProviderError::UnknownSubject)]);
        let gw = gateway(provider.clone(), IdentityCache::disabled(), Duration::from_secs(30));

        assert_eq!(gw.resolve("t", far_deadline()).await, Err(ResolveError::UserNotFound));
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried() {
        let provider = ScriptedProvider::new(vec![
            Err(ProviderError::Status(503)),
            Err(ProviderError::Timeout),
            Ok(identity(42, "a@x.com", "a")),
        ]);
        let gw = gateway(provider.clone(), IdentityCache::disabled(), Duration::from_secs(30));

        let resolved = gw.resolve("t", far_deadline()).await.unwrap();
        assert_eq!(resolved.external_id, 42);
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_are_unavailable() {
        let provider = ScriptedProvider::new(vec![Err(ProviderError::Status(502))]);
        let gw = gateway(provider.clone(), IdentityCache::disabled(), Duration::from_secs(30));

        let err = gw.resolve("t", far_deadline()).await.unwrap_err();
        assert!(matches!(err, ResolveError::Unavailable(_)));
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn undecodable_body_is_unavailable_without_retry() {
        let provider =
            ScriptedProvider::new(vec![Err(ProviderError::InvalidResponse("bad".into()))]);
        let gw = gateway(provider.clone(), IdentityCache::disabled(), Duration::from_secs(30));

        let err = gw.resolve("t", far_deadline()).await.unwrap_err();
        assert!(matches!(err, ResolveError::Unavailable(_)));
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_provider_is_bounded_by_timeout() {
        let provider = ScriptedProvider::with_delay(
            vec![Ok(identity(42, "a@x.com", "a"))],
            Duration::from_secs(600),
        );
        let gw = gateway(provider.clone(), IdentityCache::disabled(), Duration::from_secs(2));

        let start = Instant::now();
        let err = gw.resolve("t", far_deadline()).await.unwrap_err();

        assert!(matches!(err, ResolveError::Unavailable(_)));
        assert!(start.elapsed() <= Duration::from_millis(2005));
    }

    #[tokio::test(start_paused = true)]
    async fn caller_deadline_is_tighter_than_timeout() {
        let provider = ScriptedProvider::with_delay(
            vec![Ok(identity(42, "a@x.com", "a"))],
            Duration::from_secs(600),
        );
        let gw = gateway(provider, IdentityCache::disabled(), Duration::from_secs(30));

        let start = Instant::now();
        let err = gw.resolve("t", start + Duration::from_secs(1)).await.unwrap_err();

        assert!(matches!(err, ResolveError::Unavailable(_)));
        assert!(start.elapsed() <= Duration::from_millis(1005));
    }

    #[tokio::test(start_paused = true)]
    async fn cache_hit_skips_provider() {
        let provider = ScriptedProvider::new(vec![Ok(identity(42, "a@x.com", "a"))]);
        let cache = IdentityCache::new(16, Arc::new(TokioClock));
        let gw = gateway(provider.clone(), cache, Duration::from_secs(30));

        gw.resolve("t", far_deadline()).await.unwrap();
        let second = gw.resolve("t", far_deadline()).await.unwrap();

        assert_eq!(second.external_id, 42);
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_cache_always_calls_provider() {
        let provider = ScriptedProvider::new(vec![Ok(identity(42, "a@x.com", "a"))]);
        let gw = gateway(provider.clone(), IdentityCache::disabled(), Duration::from_secs(30));

        gw.resolve("t", far_deadline()).await.unwrap();
        gw.resolve("t", far_deadline()).await.unwrap();
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_are_not_cached() {
        let provider = ScriptedProvider::new(vec![
            Err(ProviderError::Rejected(401)),
            Ok(identity(42, "a@x.com", "a")),
        ]);
        let cache = IdentityCache::new(16, Arc::new(TokioClock));
        let gw = gateway(provider.clone(), cache, Duration::from_secs(30));

        assert!(gw.resolve("t", far_deadline()).await.is_err());
        assert!(gw.cache().is_empty());
        assert!(gw.resolve("t", far_deadline()).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn forget_drops_cached_identity() {
        let provider = ScriptedProvider::new(vec![Ok(identity(42, "a@x.com", "a"))]);
        let cache = IdentityCache::new(16, Arc::new(TokioClock));
        let gw = gateway(provider.clone(), cache, Duration::from_secs(30));

        gw.resolve(" t ", far_deadline()).await.unwrap();
        gw.forget("t");
        assert!(gw.cache().is_empty());

        gw.resolve("t", far_deadline()).await.unwrap();
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn huge_timeout_does_not_overflow() {
        let provider = ScriptedProvider::new(vec![Ok(identity(42, "a@x.com", "a"))]);
        let gw = gateway(provider, IdentityCache::disabled(), Duration::MAX);

        assert_eq!(gw.resolve("t", far_deadline()).await.unwrap().external_id, 42);
    }
}
