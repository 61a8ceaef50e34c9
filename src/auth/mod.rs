// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Authentication Module
//!
//! External identity login for the service.
//!
//! ## Login Flow
//!
//! 1. A client obtains a bearer token from the external identity provider
//! 2. The client posts it to `POST /v1/auth/external/login`
//! 3. The service:
//!    - Resolves the token to a verified identity (cache first, then the
//!      provider with bounded retries)
//!    - Reconciles the identity with a local user (update, link or create)
//!    - Issues a local access/refresh token pair
//! 4. Later requests send the access token as `Authorization: Bearer <token>`;
//!    the [`AuthUser`] extractor (and its [`VerifiedUser`] / [`LinkedUser`]
//!    guards) loads the user behind it
//!
//! ## Security
//!
//! - Raw provider tokens are never stored; the cache keys on a SHA-256 digest
//! - Linked provider credentials never leave the service in responses or logs
//! - Inactive accounts never receive a session credential

pub mod error;
pub mod extractor;
pub mod gateway;
pub mod issuer;
pub mod locks;
pub mod orchestrator;
pub mod reconciler;

pub use error::{LoginError, SessionError, StatusClass};
pub use extractor::{AuthUser, LinkedUser, VerifiedUser};
pub use gateway::{IdentityGateway, ResolveError};
pub use issuer::{
    CredentialIssuer, IssueError, JwtCredentialIssuer, SessionClaims, SessionVerifier, TokenKind,
};
pub use orchestrator::{AuthOrchestrator, LoginStage};
pub use reconciler::{IdentityReconciler, ReconcileAction, ReconcileError, Reconciled};
