// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Bounded retry with exponential backoff, jitter and a hard deadline.
//!
//! Used by the identity gateway for provider calls and by the reconciler for
//! store calls. Only errors that report themselves as [`Retryable`] are
//! attempted again; everything else is returned on the first failure.
//!
//! The deadline bounds the whole loop: an in-flight attempt is abandoned when
//! it passes, and a backoff sleep that would cross it is not started.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::clock::{remaining, Clock};

const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(10);
const DEFAULT_BACKOFF_FACTOR: f64 = 2.0;
const DEFAULT_JITTER: f64 = 0.2;

/// Retry schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Zero is treated as one.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound for a single delay (before jitter).
    pub max_delay: Duration,
    pub backoff_factor: f64,
    /// Fraction of each delay randomly added or removed; `0.0` disables it.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
            jitter: DEFAULT_JITTER,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            ..Self::default()
        }
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Delay before retry number `retry` (0 = first retry).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponential =
            self.base_delay.as_secs_f64() * self.backoff_factor.powi(retry.min(i32::MAX as u32) as i32);
        let capped = exponential.min(self.max_delay.as_secs_f64());

        let jitter = self.jitter.clamp(0.0, 1.0);
        let factor = if jitter > 0.0 {
            1.0 + jitter * (2.0 * rand::random::<f64>() - 1.0)
        } else {
            1.0
        };

        Duration::from_secs_f64((capped * factor).max(0.0))
    }
}

/// Errors that know whether another attempt could succeed.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// Why a retried operation gave up.
#[derive(Debug)]
pub enum RetryError<E> {
    /// Non-transient failure; no further attempts were made.
    Permanent(E),
    /// Every attempt failed with a transient error.
    Exhausted { attempts: u32, last: E },
    /// The deadline passed before an attempt succeeded.
    DeadlineElapsed { attempts: u32, last: Option<E> },
}

impl<E> RetryError<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Permanent(_) => 1,
            RetryError::Exhausted { attempts, .. } | RetryError::DeadlineElapsed { attempts, .. } => {
                *attempts
            }
        }
    }
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryError::Permanent(e) => write!(f, "{e}"),
            RetryError::Exhausted { attempts, last } => {
                write!(f, "gave up after {attempts} attempts: {last}")
            }
            RetryError::DeadlineElapsed { attempts, last: Some(last) } => {
                write!(f, "deadline elapsed after {attempts} attempts (last error: {last})")
            }
            RetryError::DeadlineElapsed { attempts, last: None } => {
                write!(f, "deadline elapsed after {attempts} attempts")
            }
        }
    }
}

/// Run `attempt` until it succeeds, fails permanently, runs out of attempts,
/// or `deadline` passes.
///
/// `attempt` receives the 1-based attempt number.
pub async fn with_retry<F, Fut, T, E>(
    policy: &RetryPolicy,
    clock: &dyn Clock,
    deadline: Instant,
    operation: &str,
    mut attempt: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempts = 0u32;
    let mut last: Option<E> = None;

    loop {
        let budget = remaining(clock, deadline);
        if budget.is_zero() {
            warn!(operation, attempts, "deadline elapsed before next attempt");
            return Err(RetryError::DeadlineElapsed { attempts, last });
        }

        attempts += 1;
        let outcome = tokio::select! {
            outcome = attempt(attempts) => outcome,
            _ = clock.sleep(budget) => {
                warn!(operation, attempts, "deadline elapsed during attempt");
                return Err(RetryError::DeadlineElapsed { attempts, last });
            }
        };

        match outcome {
            Ok(value) => {
                if attempts > 1 {
                    debug!(operation, attempts, "succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if !err.is_retryable() => {
                debug!(operation, attempts, error = %err, "non-retryable error");
                return Err(RetryError::Permanent(err));
            }
            Err(err) => {
                if attempts >= max_attempts {
                    warn!(operation, attempts, error = %err, "retry attempts exhausted");
                    return Err(RetryError::Exhausted { attempts, last: err });
                }

                let delay = policy.delay_for(attempts - 1);
                if delay >= remaining(clock, deadline) {
                    warn!(
                        operation,
                        attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "backoff would cross deadline, giving up"
                    );
                    return Err(RetryError::DeadlineElapsed {
                        attempts,
                        last: Some(err),
                    });
                }

                warn!(
                    operation,
                    attempts,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient error, retrying"
                );
                last = Some(err);
                clock.sleep(delay).await;
            }
        }
    }
}
