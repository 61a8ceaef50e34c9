// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Provider identity → local user reconciliation.
//!
//! ## Decision Policy
//!
//! Evaluated in order for every verified identity:
//!
//! 1. A user already holds the external id: refresh the provider-owned
//!    attributes and persist.
//! 2. A user holds the email: link it (attach the external id, optionally
//!    mark verified) when linking is enabled, otherwise `AccountConflict`.
//! 3. No match: create a new user when auto-creation is enabled, otherwise
//!    `UserNotFound`.
//!
//! ## Single Writer
//!
//! Reconciliations of one external id are serialised in-process by a keyed
//! lock. Across processes the store's uniqueness constraint decides: a write
//! rejected with `DuplicateKey` triggers one fresh pass of the policy, which
//! then finds the winning row and updates it.
//!
//! Each pass issues exactly one write, and store writes are atomic per call,
//! so a failure never leaves a half-updated record behind.

use std::future::Future;
use std::sync::Arc;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::locks::KeyedLocks;
use crate::clock::{remaining, Clock};
use crate::config::ReconcilePolicy;
use crate::models::{ExternalIdentity, LocalUser};
use crate::retry::{with_retry, RetryError, RetryPolicy};
use crate::storage::{StoreError, UniqueField, UserStore};

/// Passes attempted before a repeated uniqueness race becomes an error.
const MAX_PASSES: u32 = 2;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ReconcileError {
    #[error("no local user and auto-creation is disabled")]
    UserNotFound,

    #[error("{0}")]
    AccountConflict(String),

    #[error("{0}")]
    Persistence(String),
}

/// What a successful reconciliation did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileAction {
    Created,
    Linked,
    Updated,
}

impl ReconcileAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileAction::Created => "created",
            ReconcileAction::Linked => "linked",
            ReconcileAction::Updated => "updated",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Reconciled {
    pub user: LocalUser,
    pub action: ReconcileAction,
}

/// Outcome of one failed pass.
enum PassError {
    /// A write lost a uniqueness race; the pass may be repeated.
    Duplicate(UniqueField),
    Fatal(ReconcileError),
}

impl From<ReconcileError> for PassError {
    fn from(e: ReconcileError) -> Self {
        PassError::Fatal(e)
    }
}

impl From<RetryError<StoreError>> for PassError {
    fn from(e: RetryError<StoreError>) -> Self {
        match e {
            RetryError::Permanent(StoreError::DuplicateKey(field)) => PassError::Duplicate(field),
            RetryError::Permanent(StoreError::NotFound) => PassError::Fatal(
                ReconcileError::Persistence("user row disappeared during update".to_string()),
            ),
            other => PassError::Fatal(ReconcileError::Persistence(other.to_string())),
        }
    }
}

pub struct IdentityReconciler {
    store: Arc<dyn UserStore>,
    policy: ReconcilePolicy,
    store_retry: RetryPolicy,
    clock: Arc<dyn Clock>,
    locks: KeyedLocks,
}

impl IdentityReconciler {
    pub fn new(
        store: Arc<dyn UserStore>,
        policy: ReconcilePolicy,
        store_retry: RetryPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            policy,
            store_retry,
            clock,
            locks: KeyedLocks::new(),
        }
    }

    /// Bring the local user for `identity` in line with the provider,
    /// finishing by `deadline`.
    pub async fn reconcile(
        &self,
        identity: &ExternalIdentity,
        deadline: Instant,
    ) -> Result<Reconciled, ReconcileError> {
        let external_id = identity.external_id;

        let budget = remaining(self.clock.as_ref(), deadline);
        let _guard = tokio::select! {
            guard = self.locks.lock(external_id) => guard,
            _ = self.clock.sleep(budget) => {
                warn!(external_id, "deadline elapsed waiting for reconciliation lock");
                return Err(ReconcileError::Persistence(
                    "timed out waiting for a concurrent login".to_string(),
                ));
            }
        };

        let mut pass = 1;
        loop {
            match self.reconcile_once(identity, deadline).await {
                Ok(reconciled) => {
                    info!(
                        external_id,
                        user_id = %reconciled.user.id,
                        action = reconciled.action.as_str(),
                        "local user reconciled"
                    );
                    return Ok(reconciled);
                }
                Err(PassError::Duplicate(field)) if pass < MAX_PASSES => {
                    warn!(
                        external_id,
                        field = %field,
                        "lost uniqueness race, retrying as lookup-and-update"
                    );
                    pass += 1;
                }
                Err(PassError::Duplicate(field)) => {
                    warn!(external_id, field = %field, "uniqueness race persisted after retry");
                    return Err(ReconcileError::Persistence(format!(
                        "concurrent writes kept colliding on {field}"
                    )));
                }
                Err(PassError::Fatal(err)) => {
                    warn!(external_id, error = %err, "reconciliation failed");
                    return Err(err);
                }
            }
        }
    }

    async fn reconcile_once(
        &self,
        identity: &ExternalIdentity,
        deadline: Instant,
    ) -> Result<Reconciled, PassError> {
        let external_id = identity.external_id;

        let by_external_id = self
            .store_call("find_by_external_id", deadline, || {
                self.store.find_by_external_id(external_id)
            })
            .await?;
        let by_email = self
            .store_call("find_by_email", deadline, || self.store.find_by_email(&identity.email))
            .await?;

        if let Some(mut user) = by_external_id {
            if let Some(other) = by_email.filter(|other| other.id != user.id) {
                warn!(
                    external_id,
                    user_id = %user.id,
                    other_user_id = %other.id,
                    "external id and email resolve to different users"
                );
                return Err(ReconcileError::AccountConflict(
                    "email belongs to a different local account".to_string(),
                )
                .into());
            }

            user.apply_identity(identity);
            self.store_call("update", deadline, || self.store.update(&user)).await?;
            return Ok(Reconciled {
                user,
                action: ReconcileAction::Updated,
            });
        }

        if let Some(mut user) = by_email {
            if !self.policy.link_existing_users {
                debug!(external_id, user_id = %user.id, "linking disabled, refusing email match");
                return Err(ReconcileError::AccountConflict(
                    "email belongs to an unlinked local account".to_string(),
                )
                .into());
            }
            if let Some(linked) = user.external_id {
                warn!(
                    external_id,
                    user_id = %user.id,
                    linked_external_id = linked,
                    "email owner is linked to another external id"
                );
                return Err(ReconcileError::AccountConflict(
                    "email belongs to an account linked to another identity".to_string(),
                )
                .into());
            }

            user.external_id = Some(external_id);
            user.apply_identity(identity);
            if self.policy.auto_verify_users {
                user.is_verified = true;
            }
            self.store_call("update", deadline, || self.store.update(&user)).await?;
            return Ok(Reconciled {
                user,
                action: ReconcileAction::Linked,
            });
        }

        if !self.policy.auto_create_users {
            debug!(external_id, "no local user and auto-creation disabled");
            return Err(ReconcileError::UserNotFound.into());
        }

        let user = LocalUser::from_identity(identity, self.policy.auto_verify_users);
        self.store_call("create", deadline, || self.store.create(&user)).await?;
        Ok(Reconciled {
            user,
            action: ReconcileAction::Created,
        })
    }

    async fn store_call<T, F, Fut>(
        &self,
        operation: &str,
        deadline: Instant,
        mut call: F,
    ) -> Result<T, PassError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        with_retry(&self.store_retry, self.clock.as_ref(), deadline, operation, |_| call())
            .await
            .map_err(PassError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TokioClock;
    use crate::models::fixtures::{identity, unlinked_user};
    use crate::storage::{InMemoryUserStore, StoreResult};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use uuid::Uuid;

    fn reconciler(store: Arc<dyn UserStore>, policy: ReconcilePolicy) -> IdentityReconciler {
        IdentityReconciler::new(
            store,
            policy,
            RetryPolicy::new(2, Duration::from_millis(10)).with_jitter(0.0),
            Arc::new(TokioClock),
        )
    }

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(3600)
    }

    #[tokio::test]
    async fn first_login_creates_then_updates() {
        let store = Arc::new(InMemoryUserStore::new());
        let rec = reconciler(store.clone(), ReconcilePolicy::default());

        let created = rec.reconcile(&identity(42, "a@x.com", "a"), far_deadline()).await.unwrap();
        assert_eq!(created.action, ReconcileAction::Created);
        assert_eq!(created.user.external_id, Some(42));
        assert!(created.user.is_verified);

        let updated = rec.reconcile(&identity(42, "a@x.com", "a2"), far_deadline()).await.unwrap();
        assert_eq!(updated.action, ReconcileAction::Updated);
        assert_eq!(updated.user.id, created.user.id);
        assert_eq!(store.find_by_external_id(42).await.unwrap().unwrap().username, "a2");
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn email_match_is_linked_and_verified() {
        let store = Arc::new(InMemoryUserStore::new());
        let existing = unlinked_user("A@x.com");
        store.create(&existing).await.unwrap();
        let rec = reconciler(store.clone(), ReconcilePolicy::default());

        let linked = rec.reconcile(&identity(42, "a@x.com", "a"), far_deadline()).await.unwrap();

        assert_eq!(linked.action, ReconcileAction::Linked);
        assert_eq!(linked.user.id, existing.id);
        assert!(linked.user.is_verified);
        assert_eq!(store.find_by_external_id(42).await.unwrap().unwrap().id, existing.id);
    }

    #[tokio::test]
    async fn linking_without_auto_verify_keeps_flag() {
        let store = Arc::new(InMemoryUserStore::new());
        store.create(&unlinked_user("a@x.com")).await.unwrap();
        let policy = ReconcilePolicy {
            auto_verify_users: false,
            ..ReconcilePolicy::default()
        };
        let rec = reconciler(store, policy);

        let linked = rec.reconcile(&identity(42, "a@x.com", "a"), far_deadline()).await.unwrap();
        assert!(!linked.user.is_verified);
    }

    #[tokio::test]
    async fn linking_disabled_is_conflict_without_mutation() {
        let store = Arc::new(InMemoryUserStore::new());
        let existing = unlinked_user("a@x.com");
        store.create(&existing).await.unwrap();
        let policy = ReconcilePolicy {
            link_existing_users: false,
            ..ReconcilePolicy::default()
        };
        let rec = reconciler(store.clone(), policy);

        let err = rec.reconcile(&identity(42, "a@x.com", "a"), far_deadline()).await.unwrap_err();

        assert!(matches!(err, ReconcileError::AccountConflict(_)));
        assert_eq!(store.all().await, vec![existing]);
    }

    #[tokio::test]
    async fn email_owner_linked_elsewhere_is_conflict() {
        let store = Arc::new(InMemoryUserStore::new());
        store
            .create(&LocalUser::from_identity(&identity(7, "a@x.com", "seven"), true))
            .await
            .unwrap();
        let rec = reconciler(store, ReconcilePolicy::default());

        let err = rec.reconcile(&identity(42, "a@x.com", "a"), far_deadline()).await.unwrap_err();
        assert!(matches!(err, ReconcileError::AccountConflict(_)));
    }

    #[tokio::test]
    async fn external_id_and_email_on_different_rows_is_conflict() {
        let store = Arc::new(InMemoryUserStore::new());
        store
            .create(&LocalUser::from_identity(&identity(42, "old@x.com", "a"), true))
            .await
            .unwrap();
        store.create(&unlinked_user("new@x.com")).await.unwrap();
        let rec = reconciler(store, ReconcilePolicy::default());

        let err = rec
            .reconcile(&identity(42, "new@x.com", "a"), far_deadline())
            .await
            .unwrap_err();
        assert!(matches!(err, ReconcileError::AccountConflict(_)));
    }

    #[tokio::test]
    async fn auto_create_disabled_is_user_not_found() {
        let store = Arc::new(InMemoryUserStore::new());
        let policy = ReconcilePolicy {
            auto_create_users: false,
            ..ReconcilePolicy::default()
        };
        let rec = reconciler(store.clone(), policy);

        let err = rec.reconcile(&identity(42, "a@x.com", "a"), far_deadline()).await.unwrap_err();
        assert_eq!(err, ReconcileError::UserNotFound);
        assert_eq!(store.count().await.unwrap(), 0);
    }

    /// Store whose first `create` loses a race to a row written "elsewhere".
    struct RacingStore {
        inner: InMemoryUserStore,
        races: AtomicU32,
        creates: AtomicU32,
    }

    impl RacingStore {
        fn new(races: u32) -> Self {
            Self {
                inner: InMemoryUserStore::new(),
                races: AtomicU32::new(races),
                creates: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl UserStore for RacingStore {
        async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<LocalUser>> {
            self.inner.find_by_id(id).await
        }

        async fn find_by_external_id(&self, external_id: i64) -> StoreResult<Option<LocalUser>> {
            self.inner.find_by_external_id(external_id).await
        }

        async fn find_by_email(&self, email: &str) -> StoreResult<Option<LocalUser>> {
            self.inner.find_by_email(email).await
        }

        async fn create(&self, user: &LocalUser) -> StoreResult<()> {
            self.creates.fetch_add(1, Ordering::SeqCst);
            if self.races.load(Ordering::SeqCst) > 0 {
                self.races.fetch_sub(1, Ordering::SeqCst);
                let mut winner = user.clone();
                winner.id = Uuid::new_v4();
                self.inner.create(&winner).await?;
                return Err(StoreError::DuplicateKey(UniqueField::ExternalId));
            }
            self.inner.create(user).await
        }

        async fn update(&self, user: &LocalUser) -> StoreResult<()> {
            self.inner.update(user).await
        }

        async fn count(&self) -> StoreResult<usize> {
            self.inner.count().await
        }
    }

    #[tokio::test]
    async fn duplicate_key_on_create_becomes_update() {
        let store = Arc::new(RacingStore::new(1));
        let rec = reconciler(store.clone(), ReconcilePolicy::default());

        let result = rec.reconcile(&identity(42, "a@x.com", "a"), far_deadline()).await.unwrap();

        let winner = store.find_by_external_id(42).await.unwrap().unwrap();
        assert_eq!(result.action, ReconcileAction::Updated);
        assert_eq!(result.user.id, winner.id);
        assert_eq!(store.count().await.unwrap(), 1);
        assert_eq!(store.creates.load(Ordering::SeqCst), 1);
    }

    /// Store that always reports a duplicate but never shows the winner.
    struct PhantomDuplicateStore;

    #[async_trait]
    impl UserStore for PhantomDuplicateStore {
        async fn find_by_id(&self, _: Uuid) -> StoreResult<Option<LocalUser>> {
            Ok(None)
        }

        async fn find_by_external_id(&self, _: i64) -> StoreResult<Option<LocalUser>> {
            Ok(None)
        }

        async fn find_by_email(&self, _: &str) -> StoreResult<Option<LocalUser>> {
            Ok(None)
        }

        async fn create(&self, _: &LocalUser) -> StoreResult<()> {
            Err(StoreError::DuplicateKey(UniqueField::ExternalId))
        }

        async fn update(&self, _: &LocalUser) -> StoreResult<()> {
            Err(StoreError::NotFound)
        }

        async fn count(&self) -> StoreResult<usize> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn second_duplicate_is_persistence_error() {
        let rec = reconciler(Arc::new(PhantomDuplicateStore), ReconcilePolicy::default());
        let err = rec.reconcile(&identity(42, "a@x.com", "a"), far_deadline()).await.unwrap_err();
        assert!(matches!(err, ReconcileError::Persistence(_)));
    }

    /// Store that fails with a transient error a fixed number of times.
    struct FlakyStore {
        inner: InMemoryUserStore,
        failures: AtomicU32,
    }

    #[async_trait]
    impl UserStore for FlakyStore {
        async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<LocalUser>> {
            self.inner.find_by_id(id).await
        }

        async fn find_by_external_id(&self, external_id: i64) -> StoreResult<Option<LocalUser>> {
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(StoreError::Unavailable("connection reset".to_string()));
            }
            self.inner.find_by_external_id(external_id).await
        }

        async fn find_by_email(&self, email: &str) -> StoreResult<Option<LocalUser>> {
            self.inner.find_by_email(email).await
        }

        async fn create(&self, user: &LocalUser) -> StoreResult<()> {
            self.inner.create(user).await
        }

        async fn update(&self, user: &LocalUser) -> StoreResult<()> {
            self.inner.update(user).await
        }

        async fn count(&self) -> StoreResult<usize> {
            self.inner.count().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn transient_store_error_is_retried() {
        let store = Arc::new(FlakyStore {
            inner: InMemoryUserStore::new(),
            failures: AtomicU32::new(1),
        });
        let rec = reconciler(store.clone(), ReconcilePolicy::default());

        rec.reconcile(&identity(42, "a@x.com", "a"), far_deadline()).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_store_retries_are_persistence_error() {
        let store = Arc::new(FlakyStore {
            inner: InMemoryUserStore::new(),
            failures: AtomicU32::new(10),
        });
        let rec = reconciler(store.clone(), ReconcilePolicy::default());

        let err = rec.reconcile(&identity(42, "a@x.com", "a"), far_deadline()).await.unwrap_err();
        assert!(matches!(err, ReconcileError::Persistence(_)));
        assert_eq!(store.count().await.unwrap(), 0);
    }

    /// Store whose lookups never return.
    struct HangingStore;

    #[async_trait]
    impl UserStore for HangingStore {
        async fn find_by_id(&self, _: Uuid) -> StoreResult<Option<LocalUser>> {
            std::future::pending().await
        }

        async fn find_by_external_id(&self, _: i64) -> StoreResult<Option<LocalUser>> {
            std::future::pending().await
        }

        async fn find_by_email(&self, _: &str) -> StoreResult<Option<LocalUser>> {
            std::future::pending().await
        }

        async fn create(&self, _: &LocalUser) -> StoreResult<()> {
            std::future::pending().await
        }

        async fn update(&self, _: &LocalUser) -> StoreResult<()> {
            std::future::pending().await
        }

        async fn count(&self) -> StoreResult<usize> {
            Ok(0)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_store_is_cut_at_deadline() {
        let rec = reconciler(Arc::new(HangingStore), ReconcilePolicy::default());
        let start = Instant::now();

        let err = rec
            .reconcile(&identity(42, "a@x.com", "a"), start + Duration::from_secs(3))
            .await
            .unwrap_err();

        assert!(matches!(err, ReconcileError::Persistence(_)));
        assert!(start.elapsed() <= Duration::from_secs(3) + Duration::from_millis(5));
    }

    #[tokio::test(start_paused = true)]
    async fn lock_wait_is_bounded_by_deadline() {
        let store = Arc::new(InMemoryUserStore::new());
        let rec = reconciler(store.clone(), ReconcilePolicy::default());
        let _in_flight = rec.locks.lock(42).await;
        let start = Instant::now();

        let err = rec
            .reconcile(&identity(42, "a@x.com", "a"), start + Duration::from_secs(2))
            .await
            .unwrap_err();

        assert!(matches!(err, ReconcileError::Persistence(_)));
        assert!(start.elapsed() >= Duration::from_secs(2));
        assert!(start.elapsed() <= Duration::from_secs(2) + Duration::from_millis(5));
        assert_eq!(store.count().await.unwrap(), 0);

        // Other identities are not held up by the busy key.
        rec.reconcile(&identity(43, "b@x.com", "b"), far_deadline()).await.unwrap();
    }

    #[tokio::test]
    async fn concurrent_reconciles_converge_on_one_row() {
        let store = Arc::new(InMemoryUserStore::new());
        let rec = Arc::new(reconciler(store.clone(), ReconcilePolicy::default()));

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let rec = Arc::clone(&rec);
                tokio::spawn(async move {
                    rec.reconcile(&identity(42, "a@x.com", &format!("u{i}")), far_deadline())
                        .await
                })
            })
            .collect();

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().unwrap().user.id);
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(store.count().await.unwrap(), 1);
    }
}
