//! Global sliding-window admission control for outgoing fetches.
//!
//! Every strategy shares one [`RateLimiter`]: it protects outbound capacity
//! as a whole rather than any single host.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use quarry_core::rate_limit::RateLimiter;
//!
//! # async fn run() -> Result<(), quarry_core::AppError> {
//! // At most 30 fetches in any rolling minute.
//! let limiter = RateLimiter::new(30, Duration::from_secs(60))?;
//! limiter.admit().await;
//! # Ok(())
//! # }
//! ```

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::AppError;

/// Point-in-time view of the limiter for monitoring.
#[derive(Debug, Clone, Serialize)]
pub struct RateLimiterStats {
    pub max_per_window: u32,
    pub window_ms: u64,
    /// Admissions currently inside the trailing window.
    pub in_window: usize,
    pub total_admitted: u64,
    /// Admissions that had to wait for a slot.
    pub total_delayed: u64,
    /// Callers turned away because no slot opened before their deadline.
    pub total_rejected: u64,
}

#[derive(Debug, Default)]
struct RateWindow {
    admissions: VecDeque<Instant>,
    total_admitted: u64,
    total_delayed: u64,
    total_rejected: u64,
}

impl RateWindow {
    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(&oldest) = self.admissions.front() {
            if now.duration_since(oldest) >= window {
                self.admissions.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Sliding-window rate limiter.
///
/// Thread-safe: clones share the same window, and the prune-and-check
/// critical section is serialised. The lock is never held across a sleep.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    max_per_window: u32,
    window: Duration,
    state: Arc<Mutex<RateWindow>>,
}

impl RateLimiter {
    /// Create a limiter admitting at most `max_per_window` operations in any
    /// trailing `window`. Zero values are rejected.
    pub fn new(max_per_window: u32, window: Duration) -> Result<Self, AppError> {
        if max_per_window == 0 {
            return Err(AppError::ConfigError(
                "rate limit max_per_window must be at least 1".into(),
            ));
        }
        if window.is_zero() {
            return Err(AppError::ConfigError(
                "rate limit window must be longer than zero".into(),
            ));
        }
        Ok(Self {
            max_per_window,
            window,
            state: Arc::new(Mutex::new(RateWindow::default())),
        })
    }

    pub fn max_per_window(&self) -> u32 {
        self.max_per_window
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Wait for a slot with no deadline. Always succeeds eventually.
    pub async fn admit(&self) {
        let mut delayed = false;
        loop {
            match self.try_admit(delayed).await {
                Ok(()) => return,
                Err(wait) => {
                    delayed = true;
                    tracing::debug!(wait_ms = %wait.as_millis(), "Rate limit reached, waiting");
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    /// Wait for a slot, failing with a timeout if the slot cannot be had
    /// before `deadline`.
    pub async fn admit_until(&self, deadline: Option<Instant>) -> Result<(), AppError> {
        let Some(deadline) = deadline else {
            self.admit().await;
            return Ok(());
        };

        let mut delayed = false;
        loop {
            match self.try_admit(delayed).await {
                Ok(()) => return Ok(()),
                Err(wait) => {
                    if Instant::now() + wait > deadline {
                        self.state.lock().await.total_rejected += 1;
                        return Err(AppError::Timeout(format!(
                            "deadline reached while waiting {}ms for rate limit admission",
                            wait.as_millis()
                        )));
                    }
                    delayed = true;
                    tracing::debug!(wait_ms = %wait.as_millis(), "Rate limit reached, waiting");
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    /// One prune-and-check pass. Returns how long to wait when full.
    async fn try_admit(&self, was_delayed: bool) -> Result<(), Duration> {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        state.prune(now, self.window);

        if state.admissions.len() < self.max_per_window as usize {
            state.admissions.push_back(now);
            state.total_admitted += 1;
            if was_delayed {
                state.total_delayed += 1;
            }
            return Ok(());
        }

        // Non-empty here since max_per_window >= 1.
        let oldest = state.admissions.front().copied().unwrap_or(now);
        let wait = (oldest + self.window).saturating_duration_since(now);
        Err(wait.max(Duration::from_millis(1)))
    }

    pub async fn stats(&self) -> RateLimiterStats {
        let mut state = self.state.lock().await;
        state.prune(Instant::now(), self.window);
        RateLimiterStats {
            max_per_window: self.max_per_window,
            window_ms: self.window.as_millis() as u64,
            in_window: state.admissions.len(),
            total_admitted: state.total_admitted,
            total_delayed: state.total_delayed,
            total_rejected: state.total_rejected,
        }
    }
}
