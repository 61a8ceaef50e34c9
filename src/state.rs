// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;

use crate::auth::{AuthOrchestrator, SessionVerifier};
use crate::storage::UserStore;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<AuthOrchestrator>,
    /// Same store the orchestrator writes to; read by the readiness check
    /// and the session extractors.
    pub store: Arc<dyn UserStore>,
    /// Checks access tokens on authenticated requests.
    pub sessions: Arc<dyn SessionVerifier>,
}

impl AppState {
    pub fn new(
        orchestrator: Arc<AuthOrchestrator>,
        store: Arc<dyn UserStore>,
        sessions: Arc<dyn SessionVerifier>,
    ) -> Self {
        Self {
            orchestrator,
            store,
            sessions,
        }
    }
}
