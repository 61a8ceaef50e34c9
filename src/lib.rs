// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Identity Login - External Identity Authentication Service
//!
//! Exchanges a bearer token minted by an external identity provider for a
//! local user record and a local session credential, as one all-or-nothing
//! login operation.
//!
//! ## Modules
//!
//! - `api` - HTTP API handlers (Axum)
//! - `auth` - Login orchestration: gateway, reconciler, credential issuer
//! - `providers` - Identity provider HTTP client
//! - `storage` - User stores (in-memory, redb) and the identity cache
//! - `retry` / `clock` - Deadline-aware retry with an injected time source

pub mod api;
pub mod auth;
pub mod clock;
pub mod config;
pub mod error;
pub mod models;
pub mod providers;
pub mod retry;
pub mod state;
pub mod storage;
