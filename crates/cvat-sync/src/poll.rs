// SPDX-License-Identifier: Apache-2.0
// Copyright © 2025 Au-Zone Technologies. All Rights Reserved.

//! Bounded polling for the two asynchronous steps of an upload.
//!
//! CVAT creates jobs some time after media ingestion finishes, and it may
//! accept only part of an annotation payload in one round. Both situations
//! are handled by re-issuing the same idempotent request until a condition
//! holds. Neither loop is allowed to spin forever: a [`PollPolicy`] bounds
//! the number of attempts and spaces them with exponential backoff, and
//! exhaustion surfaces as [`Error::PollTimeout`].
//!
//! # Configuration
//!
//! - `CVAT_POLL_MAX_ATTEMPTS`: attempts per loop (default: 120)
//! - `CVAT_POLL_INTERVAL_MS`: delay before the second attempt (default: 500)
//!
//! The delay doubles after every attempt and is capped at five seconds.

use crate::Error;
use std::{future::Future, time::Duration};

const DEFAULT_MAX_ATTEMPTS: u32 = 120;
const DEFAULT_INITIAL_DELAY_MS: u64 = 500;
const DEFAULT_MAX_DELAY_MS: u64 = 5_000;

/// Attempt budget and backoff schedule for a polling loop.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PollPolicy {
    /// Maximum number of times the operation is attempted.
    pub max_attempts: u32,
    /// Delay after the first unsuccessful attempt.
    pub initial_delay: Duration,
    /// Upper bound for the delay between attempts.
    pub max_delay: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        PollPolicy {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_delay: Duration::from_millis(DEFAULT_INITIAL_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
        }
    }
}

impl PollPolicy {
    /// Builds the policy from `CVAT_POLL_*` environment variables, falling
    /// back to the defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        let max_attempts = std::env::var("CVAT_POLL_MAX_ATTEMPTS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_MAX_ATTEMPTS);
        let initial_delay = std::env::var("CVAT_POLL_INTERVAL_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_INITIAL_DELAY_MS);

        PollPolicy {
            max_attempts: max_attempts.max(1),
            initial_delay: Duration::from_millis(initial_delay),
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS.max(initial_delay)),
        }
    }

    /// A policy without any delay between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        PollPolicy {
            max_attempts,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay to wait after the given zero-based attempt failed.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX);
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }

    /// Runs `attempt` until it yields `Some`, an error, or the attempt budget
    /// is spent.
    ///
    /// The closure receives the zero-based attempt number. Errors returned by
    /// the closure abort the loop immediately; only `Ok(None)` is retried.
    pub async fn poll<T, F, Fut>(&self, operation: &str, mut attempt: F) -> Result<T, Error>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<Option<T>, Error>>,
    {
        for n in 0..self.max_attempts {
            if let Some(value) = attempt(n).await? {
                if n > 0 {
                    log::debug!("{} completed after {} attempts", operation, n + 1);
                }
                return Ok(value);
            }

            if n + 1 < self.max_attempts {
                let delay = self.delay_for(n);
                log::trace!("{} not ready, retrying in {:?}", operation, delay);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
        }

        Err(Error::PollTimeout {
            operation: operation.to_owned(),
            attempts: self.max_attempts,
        })
    }
}

pub fn log_poll_configuration(policy: &PollPolicy) {
    let timeout = std::env::var("CVAT_TIMEOUT").unwrap_or_else(|_| "30".to_string());
    log::debug!(
        "Poll configuration - max_attempts={}, initial_delay={:?}, max_delay={:?}, timeout={}s",
        policy.max_attempts,
        policy.initial_delay,
        policy.max_delay,
        timeout
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_delay_backoff_is_capped() {
        let policy = PollPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_millis(500));
        assert_eq!(policy.delay_for(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(4000));
        assert_eq!(policy.delay_for(4), Duration::from_millis(5000));
        assert_eq!(policy.delay_for(40), Duration::from_millis(5000));
    }

    #[tokio::test]
    async fn test_poll_returns_first_ready_value() {
        let calls = Cell::new(0u32);
        let policy = PollPolicy::immediate(10);

        let value = policy
            .poll("jobs", |n| {
                calls.set(calls.get() + 1);
                async move { Ok(if n == 2 { Some(n * 10) } else { None }) }
            })
            .await
            .unwrap();

        assert_eq!(value, 20);
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test]
    async fn test_poll_times_out() {
        let policy = PollPolicy::immediate(4);
        let result: Result<(), Error> = policy.poll("jobs", |_| async { Ok(None) }).await;

        match result {
            Err(Error::PollTimeout {
                operation,
                attempts,
            }) => {
                assert_eq!(operation, "jobs");
                assert_eq!(attempts, 4);
            }
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_poll_propagates_errors() {
        let policy = PollPolicy::immediate(4);
        let result: Result<(), Error> = policy
            .poll("jobs", |_| async {
                Err(Error::InvalidResponse("boom".to_string()))
            })
            .await;

        assert!(matches!(result, Err(Error::InvalidResponse(_))));
    }
}
