// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Upstream identity provider integration.

pub mod identity;

pub use identity::{HttpIdentityProvider, IdentityProvider, ProviderError};
