//! Retry strategies and the shared retry loop.
//!
//! Retry applies only to the remote fetch: conversion failures and local
//! storage errors are never retried. Attempt counters are scoped to one
//! run of the orchestrator; a new `fetch()` call starts from zero.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::{BoxKey, Result, telemetry};

const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_INTERVAL_DELAY: Duration = Duration::from_secs(2);
const BACKOFF_BASE_SECS: u64 = 4;

/// Strategy for retrying a failing remote fetch.
///
/// `max_retries` bounds the total number of fetch invocations: a fetch
/// that always fails is attempted exactly `max_retries` times before the
/// error propagates.
///
/// ```rust
/// # use std::time::Duration;
/// # use databox::RetryStrategy;
/// let strategy = RetryStrategy::interval(5, Duration::from_millis(200));
/// assert_eq!(strategy.delay_after_attempt(1), Some(Duration::from_millis(200)));
/// assert_eq!(strategy.delay_after_attempt(5), None);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryStrategy {
    /// Fixed delay between attempts. Default: 3 attempts, 2 s apart.
    Interval { max_retries: u32, delay: Duration },
    /// Exponential backoff: `4^attempt` seconds after attempt `n`.
    /// Default: 3 attempts.
    Backoff { max_retries: u32 },
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self::Interval {
            max_retries: DEFAULT_MAX_RETRIES,
            delay: DEFAULT_INTERVAL_DELAY,
        }
    }
}

impl RetryStrategy {
    /// Fixed-interval strategy.
    pub fn interval(max_retries: u32, delay: Duration) -> Self {
        Self::Interval { max_retries, delay }
    }

    /// Exponential-backoff strategy with the default attempt bound.
    pub fn backoff() -> Self {
        Self::Backoff {
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Exponential-backoff strategy with a custom attempt bound.
    pub fn backoff_with(max_retries: u32) -> Self {
        Self::Backoff { max_retries }
    }

    /// Total number of fetch invocations this strategy allows.
    pub fn max_retries(&self) -> u32 {
        match *self {
            Self::Interval { max_retries, .. } | Self::Backoff { max_retries } => max_retries,
        }
    }

    /// Delay to wait after a failed attempt (1-indexed), or `None` when
    /// the attempt bound is exhausted and the error should propagate.
    pub fn delay_after_attempt(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_retries() {
            return None;
        }
        match *self {
            Self::Interval { delay, .. } => Some(delay),
            Self::Backoff { .. } => Some(Duration::from_secs(
                BACKOFF_BASE_SECS.saturating_pow(attempt),
            )),
        }
    }
}

/// Execute an async fetch with retry.
///
/// `None` strategy means a single attempt. On each failure short of the
/// bound: emit a retry metric, log, sleep per the strategy, re-invoke.
pub(crate) async fn with_retry<F, Fut, T>(
    strategy: Option<&RetryStrategy>,
    key: &BoxKey,
    f: F,
) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        metrics::counter!(telemetry::FETCHES_TOTAL, "key" => key.as_str().to_owned()).increment(1);
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                let delay = strategy.and_then(|s| s.delay_after_attempt(attempt));
                match delay {
                    Some(delay) => {
                        metrics::counter!(telemetry::RETRIES_TOTAL, "key" => key.as_str().to_owned())
                            .increment(1);
                        warn!(
                            key = %key,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "retrying fetch after error"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => return Err(e),
                }
            }
        }
    }
}
