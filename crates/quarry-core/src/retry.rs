//! Classified exponential-backoff retries.
//!
//! Each failure is classified into an [`ErrorCategory`]; that category's
//! [`BackoffPolicy`] decides whether another attempt is made and how long to
//! wait first. Every attempt, successful or not, is recorded in the shared
//! [`MetricsCollector`].
//!
//! Delay before attempt `k + 1` (k is 1-indexed):
//!
//! ```text
//! min(base_delay * multiplier^(k-1), max_delay)     // optionally ±25% jitter
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::classify::ErrorCategory;
use crate::error::AppError;
use crate::metrics::{MetricSample, MetricsCollector};

/// Backoff parameters for one error category.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    /// Randomise each delay by ±25% (still capped at `max_delay`).
    pub jitter: bool,
}

impl BackoffPolicy {
    pub const fn new(max_attempts: u32, base_delay: Duration, multiplier: f64, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            multiplier,
            max_delay,
            jitter: false,
        }
    }

    /// A single attempt, no retries.
    pub const fn no_retry() -> Self {
        Self::new(1, Duration::ZERO, 1.0, Duration::ZERO)
    }

    pub const fn with_jitter(mut self) -> Self {
        self.jitter = true;
        self
    }

    /// Un-jittered delay after failed attempt `attempt` (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs.max(0.0))
    }

    /// Delay actually slept, jitter applied when enabled.
    fn effective_delay(&self, attempt: u32) -> Duration {
        let delay = self.delay_for_attempt(attempt);
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        delay.mul_f64(jitter_factor()).min(self.max_delay)
    }
}

/// Per-category retry table. Immutable once built.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    policies: HashMap<ErrorCategory, BackoffPolicy>,
}

impl Default for RetryPolicy {
    /// Network-ish failures retry three times, remote throttling waits
    /// longer, unclassified failures get one retry, and anything a retry
    /// cannot fix is attempted once.
    fn default() -> Self {
        let transient =
            BackoffPolicy::new(3, Duration::from_millis(500), 2.0, Duration::from_secs(10)).with_jitter();
        let mut policies = HashMap::new();
        policies.insert(ErrorCategory::Timeout, transient);
        policies.insert(ErrorCategory::Connection, transient);
        policies.insert(
            ErrorCategory::RateLimited,
            BackoffPolicy::new(4, Duration::from_secs(2), 2.0, Duration::from_secs(30)).with_jitter(),
        );
        policies.insert(
            ErrorCategory::Unknown,
            BackoffPolicy::new(2, Duration::from_secs(1), 2.0, Duration::from_secs(5)).with_jitter(),
        );
        for category in [
            ErrorCategory::AntiBot,
            ErrorCategory::Parse,
            ErrorCategory::InvalidInput,
            ErrorCategory::Cancelled,
        ] {
            policies.insert(category, BackoffPolicy::no_retry());
        }
        Self { policies }
    }
}

impl RetryPolicy {
    /// Same backoff for every retryable category; non-retryable categories
    /// still get a single attempt.
    pub fn uniform(policy: BackoffPolicy) -> Self {
        let policies = ErrorCategory::ALL
            .into_iter()
            .map(|c| {
                let p = if c.is_retryable() {
                    policy
                } else {
                    BackoffPolicy::no_retry()
                };
                (c, p)
            })
            .collect();
        Self { policies }
    }

    pub fn with_category(mut self, category: ErrorCategory, policy: BackoffPolicy) -> Self {
        self.policies.insert(category, policy);
        self
    }

    pub fn for_category(&self, category: ErrorCategory) -> BackoffPolicy {
        self.policies
            .get(&category)
            .or_else(|| self.policies.get(&ErrorCategory::Unknown))
            .copied()
            .unwrap_or_else(BackoffPolicy::no_retry)
    }
}

/// One failed attempt inside a single `run` call.
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub category: ErrorCategory,
    pub delay_before_next: Option<Duration>,
}

/// Executes fallible operations under a [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryManager {
    policy: Arc<RetryPolicy>,
    metrics: MetricsCollector,
}

impl RetryManager {
    pub fn new(policy: RetryPolicy, metrics: MetricsCollector) -> Self {
        Self {
            policy: Arc::new(policy),
            metrics,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `operation` until it succeeds, fails with a non-retryable
    /// category, spends its category's attempt budget, or the deadline
    /// leaves no room for another backoff.
    ///
    /// The closure receives the 1-indexed attempt number. Non-retryable
    /// failures are returned as-is; exhausted budgets come back as
    /// [`AppError::RetryExhausted`] wrapping the last failure.
    pub async fn run<T, F, Fut>(
        &self,
        operation_kind: &str,
        deadline: Option<Instant>,
        mut operation: F,
    ) -> Result<T, AppError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        let mut history: Vec<AttemptRecord> = Vec::new();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let started = Instant::now();
            let result = match deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, operation(attempt))
                    .await
                    .unwrap_or_else(|_| {
                        Err(AppError::Timeout(format!(
                            "{operation_kind} attempt {attempt} hit the request deadline"
                        )))
                    }),
                None => operation(attempt).await,
            };
            let latency = started.elapsed();

            let error = match result {
                Ok(value) => {
                    self.metrics
                        .record(MetricSample::success(operation_kind, latency));
                    if attempt > 1 {
                        tracing::info!(
                            operation = %operation_kind,
                            attempt,
                            "Succeeded after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(e) => e,
            };

            let category = error.category();
            self.metrics
                .record(MetricSample::failure(operation_kind, latency, category));

            if !category.is_retryable() {
                tracing::debug!(
                    operation = %operation_kind,
                    %category,
                    error = %error,
                    "Non-retryable failure"
                );
                return Err(error);
            }

            let policy = self.policy.for_category(category);
            if attempt >= policy.max_attempts {
                history.push(AttemptRecord {
                    attempt,
                    category,
                    delay_before_next: None,
                });
                tracing::warn!(
                    operation = %operation_kind,
                    attempts = attempt,
                    %category,
                    history = ?history,
                    "Retry budget exhausted"
                );
                return Err(AppError::RetryExhausted {
                    attempts: attempt,
                    last: Box::new(error),
                });
            }

            let delay = policy.effective_delay(attempt);
            if let Some(deadline) = deadline
                && Instant::now() + delay >= deadline
            {
                tracing::warn!(
                    operation = %operation_kind,
                    attempts = attempt,
                    delay_ms = %delay.as_millis(),
                    "Deadline leaves no room for another attempt"
                );
                return Err(AppError::RetryExhausted {
                    attempts: attempt,
                    last: Box::new(AppError::Timeout(format!(
                        "deadline reached before retry of {operation_kind} (last error: {error})"
                    ))),
                });
            }

            history.push(AttemptRecord {
                attempt,
                category,
                delay_before_next: Some(delay),
            });
            tracing::warn!(
                operation = %operation_kind,
                attempt,
                %category,
                delay_ms = %delay.as_millis(),
                error = %error,
                "Attempt failed, backing off"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

// ---------------------------------------------------------------------------
// Jitter without pulling in the `rand` crate: xorshift seeded from the clock.
// ---------------------------------------------------------------------------

/// Uniform-ish factor in [0.75, 1.25).
fn jitter_factor() -> f64 {
    let mut x = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
        | 1;
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    0.75 + (x % 10_000) as f64 / 20_000.0
}
