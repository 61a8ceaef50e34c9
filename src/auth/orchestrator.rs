// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Login Orchestration
//!
//! [`AuthOrchestrator::login`] turns a provider token into a local user and a
//! session credential:
//!
//! ```text
//! Start → Resolving → Reconciling → Issuing → Done
//! ```
//!
//! Every stage can end the login with a [`LoginError`]. The deadline is
//! fixed at `Start` and shared by all stages. Callers receive either the full
//! `{user, tokens}` response or one error; never a user without tokens.
//!
//! A cached identity that reconciles to `AccountConflict` or `UserNotFound`
//! is evicted, so the next attempt asks the provider again.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::error::LoginError;
use super::gateway::{IdentityGateway, ResolveError};
use super::issuer::{validate_credential, CredentialIssuer, IssueError};
use super::reconciler::{IdentityReconciler, ReconcileError};
use crate::clock::{deadline_after, remaining, Clock};
use crate::config::AppConfig;
use crate::models::{LoginResponse, UserView};
use crate::providers::IdentityProvider;
use crate::storage::UserStore;

/// Non-terminal login stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginStage {
    Resolving,
    Reconciling,
    Issuing,
}

impl fmt::Display for LoginStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoginStage::Resolving => "resolving",
            LoginStage::Reconciling => "reconciling",
            LoginStage::Issuing => "issuing",
        };
        f.write_str(name)
    }
}

impl From<ResolveError> for LoginError {
    fn from(e: ResolveError) -> Self {
        match e {
            ResolveError::InvalidToken => LoginError::InvalidToken,
            ResolveError::UserNotFound => LoginError::UserNotFound,
            ResolveError::Unavailable(detail) => LoginError::ProviderUnavailable(detail),
        }
    }
}

impl From<ReconcileError> for LoginError {
    fn from(e: ReconcileError) -> Self {
        match e {
            ReconcileError::UserNotFound => LoginError::UserNotFound,
            ReconcileError::AccountConflict(detail) => LoginError::AccountConflict(detail),
            ReconcileError::Persistence(detail) => LoginError::PersistenceError(detail),
        }
    }
}

impl From<IssueError> for LoginError {
    fn from(e: IssueError) -> Self {
        LoginError::Integration(e.to_string())
    }
}

pub struct AuthOrchestrator {
    gateway: IdentityGateway,
    reconciler: IdentityReconciler,
    issuer: Arc<dyn CredentialIssuer>,
    login_timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl AuthOrchestrator {
    pub fn new(
        gateway: IdentityGateway,
        reconciler: IdentityReconciler,
        issuer: Arc<dyn CredentialIssuer>,
        login_timeout: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            gateway,
            reconciler,
            issuer,
            login_timeout,
            clock,
        }
    }

    /// Wire the login flow from configuration and its collaborators.
    pub fn from_config(
        config: &AppConfig,
        provider: Arc<dyn IdentityProvider>,
        store: Arc<dyn UserStore>,
        issuer: Arc<dyn CredentialIssuer>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let gateway =
            IdentityGateway::from_config(provider, &config.provider, &config.cache, Arc::clone(&clock));
        let reconciler = IdentityReconciler::new(
            store,
            config.reconcile,
            config.store_retry.clone(),
            Arc::clone(&clock),
        );
        Self::new(gateway, reconciler, issuer, config.login_timeout, clock)
    }

    pub fn gateway(&self) -> &IdentityGateway {
        &self.gateway
    }

    /// Exchange a provider token for a local user and session credential.
    pub async fn login(&self, external_token: &str) -> Result<LoginResponse, LoginError> {
        let deadline = deadline_after(self.clock.as_ref(), self.login_timeout);

        debug!(stage = %LoginStage::Resolving, "login started");
        let identity = self
            .gateway
            .resolve(external_token, deadline)
            .await
            .map_err(|e| fail(LoginStage::Resolving, e.into()))?;

        let external_id = identity.external_id;
        debug!(stage = %LoginStage::Reconciling, external_id, "identity resolved");
        let reconciled = self
            .reconciler
            .reconcile(&identity, deadline)
            .await
            .map_err(|e| {
                if matches!(e, ReconcileError::AccountConflict(_) | ReconcileError::UserNotFound) {
                    self.gateway.forget(external_token);
                }
                fail(LoginStage::Reconciling, e.into())
            })?;
        let user = reconciled.user;

        if !user.is_active {
            return Err(fail(LoginStage::Reconciling, LoginError::AccountDisabled));
        }

        debug!(stage = %LoginStage::Issuing, user_id = %user.id, "user reconciled");
        let budget = remaining(self.clock.as_ref(), deadline);
        let tokens = tokio::select! {
            issued = self.issuer.issue(user.id, &user.email) => {
                issued.map_err(|e| fail(LoginStage::Issuing, e.into()))?
            }
            _ = self.clock.sleep(budget) => {
                return Err(fail(
                    LoginStage::Issuing,
                    LoginError::Integration("credential issuer timed out".to_string()),
                ));
            }
        };
        validate_credential(&tokens).map_err(|e| fail(LoginStage::Issuing, e.into()))?;

        info!(
            external_id,
            user_id = %user.id,
            action = reconciled.action.as_str(),
            "login succeeded"
        );
        Ok(LoginResponse {
            user: UserView::from(&user),
            tokens,
        })
    }
}

fn fail(stage: LoginStage, err: LoginError) -> LoginError {
    warn!(
        stage = %stage,
        error_code = err.error_code(),
        error = %err,
        "login failed"
    );
    err
}
