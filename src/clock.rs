// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Injected time source.
//!
//! Retry loops, deadlines and the identity cache read time through [`Clock`]
//! so tests can drive elapsed time without real delays.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

/// Monotonic time source with an async sleep.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;

    async fn sleep(&self, duration: Duration);
}

/// Clock backed by `tokio::time`.
///
/// Under `#[tokio::test(start_paused = true)]` it follows tokio's virtual
/// time, which auto-advances while every task is idle.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Furthest a deadline is ever placed in the future.
const MAX_HORIZON: Duration = Duration::from_secs(24 * 60 * 60);

/// Deadline `timeout` from now. Spans past one day are capped so the
/// addition cannot overflow `Instant`.
pub fn deadline_after(clock: &dyn Clock, timeout: Duration) -> Instant {
    let now = clock.now();
    now.checked_add(timeout.min(MAX_HORIZON)).unwrap_or(now)
}

/// Time left until `deadline`, zero if it has passed.
pub fn remaining(clock: &dyn Clock, deadline: Instant) -> Duration {
    deadline.saturating_duration_since(clock.now())
}
