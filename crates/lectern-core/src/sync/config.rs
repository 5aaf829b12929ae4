//! Runtime configuration for sync passes.

use std::future::Future;
use std::time::Duration;

use super::error::{BackendError, BackendResult};
use crate::models::ConflictStrategy;

/// Default number of differing fields that may be resolved without the user.
pub const DEFAULT_AUTO_RESOLVE_MAX_FIELDS: usize = 2;

/// Configuration for sync operations.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// Strategy used for auto-resolvable conflicts.
    pub strategy: ConflictStrategy,
    /// Conflicts with more differing fields than this wait for the user.
    pub auto_resolve_max_fields: usize,
    /// Timeout applied to every backend request.
    pub request_timeout: Duration,
    /// Push requests in flight per entity type.
    pub push_concurrency: usize,
    /// Retry behavior for retryable backend errors.
    pub retry: RetryPolicy,
}

impl SyncConfig {
    /// Creates a configuration with default settings.
    pub fn new() -> Self {
        Self {
            strategy: ConflictStrategy::default(),
            auto_resolve_max_fields: DEFAULT_AUTO_RESOLVE_MAX_FIELDS,
            request_timeout: Duration::from_secs(30),
            push_concurrency: 4,
            retry: RetryPolicy::default(),
        }
    }

    /// Sets the conflict strategy.
    #[must_use]
    pub const fn with_strategy(mut self, strategy: ConflictStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Sets the auto-resolve threshold.
    #[must_use]
    pub const fn with_auto_resolve_max_fields(mut self, max_fields: usize) -> Self {
        self.auto_resolve_max_fields = max_fields;
        self
    }

    /// Sets the per-request timeout.
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the push concurrency (at least 1).
    #[must_use]
    pub fn with_push_concurrency(mut self, concurrency: usize) -> Self {
        self.push_concurrency = concurrency.max(1);
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub const fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Run one backend request with the configured timeout and retries.
    pub async fn call<T, F, Fut>(&self, mut request: F) -> BackendResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = BackendResult<T>>,
    {
        let mut attempt = 0;
        loop {
            let result = tokio::time::timeout(self.request_timeout, request())
                .await
                .unwrap_or_else(|_| Err(BackendError::Timeout));

            match result {
                Err(error) if error.is_retryable() && attempt + 1 < self.retry.max_attempts => {
                    attempt += 1;
                    let delay = self.retry.delay_for_attempt(attempt);
                    tracing::debug!("Retrying after {error} (attempt {attempt}, {delay:?})");
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Bounded exponential backoff for retryable errors.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for any delay.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
}

impl RetryPolicy {
    /// Creates a policy with the given attempt budget.
    pub const fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
        }
    }

    /// A policy that never retries.
    pub const fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
        }
    }

    /// Sets the initial delay.
    #[must_use]
    pub const fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub const fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Delay before the given attempt (0-indexed, attempt 0 runs immediately).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let delay = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}
