// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Per-key async locks.
//!
//! Entries are held weakly: once the last guard for a key is dropped its
//! mutex is freed, and dead entries are pruned as the table grows.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

const PRUNE_THRESHOLD: usize = 256;

#[derive(Default)]
pub struct KeyedLocks {
    table: Mutex<HashMap<i64, Weak<AsyncMutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`.
    pub async fn lock(&self, key: i64) -> OwnedMutexGuard<()> {
        self.handle(key).lock_owned().await
    }

    fn handle(&self, key: i64) -> Arc<AsyncMutex<()>> {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(existing) = table.get(&key).and_then(Weak::upgrade) {
            return existing;
        }

        if table.len() >= PRUNE_THRESHOLD {
            table.retain(|_, entry| entry.strong_count() > 0);
        }

        let fresh = Arc::new(AsyncMutex::new(()));
        table.insert(key, Arc::downgrade(&fresh));
        fresh
    }

    /// Number of keys with a live lock.
    #[cfg(test)]
    fn active(&self) -> usize {
        let table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        table.values().filter(|entry| entry.strong_count() > 0).count()
    }
}
