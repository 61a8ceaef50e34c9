// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Storage Module
//!
//! Local user persistence and the identity cache.
//!
//! ## Backends
//!
//! - [`InMemoryUserStore`]: default when `DATA_DIR` is unset
//! - [`RedbUserStore`]: embedded ACID database at `{DATA_DIR}/users.redb`
//!
//! Both implement [`UserStore`] and enforce uniqueness of the normalized
//! email and of the external id inside a single call.

pub mod identity_cache;
pub mod memory;
pub mod user_database;
pub mod user_store;

pub use identity_cache::{IdentityCache, TokenDigest};
pub use memory::InMemoryUserStore;
pub use user_database::RedbUserStore;
pub use user_store::{StoreError, StoreResult, UniqueField, UserStore};

/// File name of the user database inside `DATA_DIR`.
pub const USER_DB_FILE: &str = "users.redb";
