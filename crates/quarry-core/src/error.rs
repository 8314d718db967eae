use thiserror::Error;

use crate::classify::{self, ErrorCategory};

/// Application-wide error types for Quarry.
///
/// Every variant maps onto exactly one [`ErrorCategory`] through
/// [`AppError::category`], which is what retry, fallback and metrics key on.
#[derive(Error, Debug)]
pub enum AppError {
    /// The remote server answered with a non-success status.
    #[error("HTTP {status}: {message}")]
    HttpError { status: u16, message: String },

    /// Operation exceeded its deadline.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Network/connection error (DNS, refused, reset).
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Remote server signalled throttling.
    #[error("Rate limited by remote server: {0}")]
    RateLimitExceeded(String),

    /// Remote server served a bot-detection or block page.
    #[error("Blocked by anti-bot protection: {0}")]
    AntiBot(String),

    /// Content could not be interpreted.
    #[error("Parse error: {0}")]
    ParseError(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Caller-supplied target or options are malformed.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration value missing or out of range.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Work was never started because its batch was cancelled.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Retry budget spent; wraps the last failure.
    #[error("Gave up after {attempts} attempt(s): {last}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        last: Box<AppError>,
    },

    /// A fetch strategy panicked. Always classified `unknown`.
    #[error("Strategy failed unexpectedly: {0}")]
    StrategyPanic(String),

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

impl AppError {
    /// Taxonomy bucket for this error.
    pub fn category(&self) -> ErrorCategory {
        classify::classify(self)
    }

    /// Returns true if retrying the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }

    /// Strips any `RetryExhausted` wrappers.
    pub fn root(&self) -> &AppError {
        match self {
            AppError::RetryExhausted { last, .. } => last.root(),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(AppError::NetworkError("reset".into()).is_retryable());
        assert!(AppError::Timeout("30s".into()).is_retryable());
        assert!(AppError::RateLimitExceeded("429".into()).is_retryable());
        assert!(
            AppError::HttpError {
                status: 502,
                message: "bad gateway".into(),
            }
            .is_retryable()
        );
        assert!(!AppError::ParseError("bad html".into()).is_retryable());
        assert!(!AppError::InvalidInput("no scheme".into()).is_retryable());
        assert!(!AppError::AntiBot("captcha".into()).is_retryable());
    }

    #[test]
    fn test_strategy_panic_is_unknown_regardless_of_message() {
        for message in ["timeout while parsing", "blocked by captcha", "connection reset"] {
            let err = AppError::StrategyPanic(message.into());
            assert_eq!(err.category(), ErrorCategory::Unknown, "{message}");
        }
    }

    #[test]
    fn test_exhausted_takes_category_of_last_error() {
        let err = AppError::RetryExhausted {
            attempts: 3,
            last: Box::new(AppError::Timeout("slow".into())),
        };
        assert_eq!(err.category(), ErrorCategory::Timeout);
        assert!(matches!(err.root(), AppError::Timeout(_)));
        assert!(err.to_string().contains("3 attempt(s)"));
    }
}
