//! Retry Module
//!
//! Timeout and retry-with-exponential-backoff wrappers for fallible async
//! operations. Only failures whose [`ApiError::is_retryable`] holds are
//! retried; everything else is returned after the first attempt.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::{ApiError, Result};

// == Retry Policy ==
/// Backoff schedule: attempt `n` (1-based) is followed by
/// `min(initial_delay * backoff_factor^(n-1), max_delay)` of sleep.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 10_000,
            backoff_factor: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sleep after the failed `attempt`-th try.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let raw = self.initial_delay_ms as f64 * self.backoff_factor.powi(exponent);
        let capped = if raw.is_finite() {
            raw.min(self.max_delay_ms as f64)
        } else {
            self.max_delay_ms as f64
        };
        Duration::from_millis(capped.max(0.0) as u64)
    }
}

// == Timeout ==
/// Runs `future`, failing with [`ApiError::Timeout`] once `timeout` elapses.
/// On expiry the future is dropped; work it handed off elsewhere may go on.
pub async fn with_timeout<T, E, F>(future: F, timeout: Duration) -> Result<T>
where
    F: Future<Output = std::result::Result<T, E>>,
    E: Into<ApiError>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result.map_err(Into::into),
        Err(_) => Err(ApiError::Timeout(format!(
            "Operation timed out after {}ms",
            timeout.as_millis()
        ))),
    }
}

// == Retry ==
/// Calls `operation` until it succeeds, fails with a non-retryable error or
/// `policy.max_retries` retries are spent. Returns the last failure.
pub async fn with_retry<T, F, Fut>(mut operation: F, policy: &RetryPolicy) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = policy.max_retries.saturating_add(1);
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_retryable() => {
                debug!("Not retrying {} error: {}", e.kind().code(), e);
                return Err(e);
            }
            Err(e) if attempt >= attempts => {
                warn!("Giving up after {} attempts: {}", attempt, e);
                return Err(e);
            }
            Err(e) => {
                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    "Attempt {}/{} failed, retrying in {}ms: {}",
                    attempt,
                    attempts,
                    delay.as_millis(),
                    e
                );
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// [`with_retry`] where every attempt is bounded by `timeout`. A timed-out
/// attempt counts as a retryable failure.
pub async fn with_retry_and_timeout<T, F, Fut>(
    mut operation: F,
    policy: &RetryPolicy,
    timeout: Duration,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    with_retry(|| with_timeout(operation(), timeout), policy).await
}

// == Retry Executor ==
/// A policy plus an optional per-attempt timeout, shared by callers that
/// retry the same way.
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    timeout: Option<Duration>,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub async fn run<T, F, Fut>(&self, operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run_with(operation, &self.policy).await
    }

    /// Like [`run`](Self::run) with a one-off policy.
    pub async fn run_with<T, F, Fut>(&self, operation: F, policy: &RetryPolicy) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        match self.timeout {
            Some(timeout) => with_retry_and_timeout(operation, policy, timeout).await,
            None => with_retry(operation, policy).await,
        }
    }
}
