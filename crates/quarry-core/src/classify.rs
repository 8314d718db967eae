//! Failure taxonomy and the classifier that maps raw errors onto it.
//!
//! Retry budgets, fallback decisions and per-category metrics all key on
//! [`ErrorCategory`]; nothing downstream inspects error strings directly.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Small, closed set of failure kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Timeout,
    Connection,
    RateLimited,
    AntiBot,
    Parse,
    InvalidInput,
    Unknown,
    Cancelled,
}

impl ErrorCategory {
    pub const ALL: [ErrorCategory; 8] = [
        ErrorCategory::Timeout,
        ErrorCategory::Connection,
        ErrorCategory::RateLimited,
        ErrorCategory::AntiBot,
        ErrorCategory::Parse,
        ErrorCategory::InvalidInput,
        ErrorCategory::Unknown,
        ErrorCategory::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::Connection => "connection",
            ErrorCategory::RateLimited => "rate_limited",
            ErrorCategory::AntiBot => "anti_bot",
            ErrorCategory::Parse => "parse",
            ErrorCategory::InvalidInput => "invalid_input",
            ErrorCategory::Unknown => "unknown",
            ErrorCategory::Cancelled => "cancelled",
        }
    }

    /// Worth retrying with the same strategy after a backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCategory::Timeout
                | ErrorCategory::Connection
                | ErrorCategory::RateLimited
                | ErrorCategory::Unknown
        )
    }

    /// A different (heavier) strategy might get past this failure.
    pub fn is_fallback_eligible(&self) -> bool {
        matches!(
            self,
            ErrorCategory::AntiBot | ErrorCategory::Parse | ErrorCategory::Unknown
        )
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ErrorCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ErrorCategory::ALL
            .into_iter()
            .find(|c| c.as_str() == s.to_lowercase())
            .ok_or_else(|| format!("Unknown error category: {s}"))
    }
}

/// Map an [`AppError`] onto its category.
pub fn classify(error: &AppError) -> ErrorCategory {
    match error {
        AppError::HttpError { status, .. } => classify_status(*status),
        AppError::Timeout(_) => ErrorCategory::Timeout,
        AppError::NetworkError(_) => ErrorCategory::Connection,
        AppError::RateLimitExceeded(_) => ErrorCategory::RateLimited,
        AppError::AntiBot(_) => ErrorCategory::AntiBot,
        AppError::ParseError(_) | AppError::SerializationError(_) => ErrorCategory::Parse,
        AppError::InvalidInput(_) | AppError::ConfigError(_) => ErrorCategory::InvalidInput,
        AppError::Cancelled(_) => ErrorCategory::Cancelled,
        AppError::RetryExhausted { last, .. } => classify(last),
        AppError::StrategyPanic(_) => ErrorCategory::Unknown,
        AppError::Generic(msg) => classify_message(msg),
    }
}

/// Map an HTTP status code onto a category.
pub fn classify_status(status: u16) -> ErrorCategory {
    match status {
        408 => ErrorCategory::Timeout,
        429 => ErrorCategory::RateLimited,
        403 => ErrorCategory::AntiBot,
        400..=499 => ErrorCategory::InvalidInput,
        500..=599 => ErrorCategory::Connection,
        _ => ErrorCategory::Unknown,
    }
}

/// Best-effort classification of an untyped error message.
///
/// Used for errors bubbling out of third-party code that only gives us a
/// string. Anything unrecognised is `Unknown`.
pub fn classify_message(message: &str) -> ErrorCategory {
    let msg = message.to_lowercase();
    if msg.contains("timed out") || msg.contains("timeout") || msg.contains("deadline") {
        ErrorCategory::Timeout
    } else if msg.contains("429") || msg.contains("too many requests") || msg.contains("rate limit")
    {
        ErrorCategory::RateLimited
    } else if msg.contains("captcha")
        || msg.contains("cloudflare")
        || msg.contains("access denied")
        || msg.contains("forbidden")
        || msg.contains("403")
        || msg.contains("blocked")
    {
        ErrorCategory::AntiBot
    } else if msg.contains("connect")
        || msg.contains("connection")
        || msg.contains("reset")
        || msg.contains("dns")
        || msg.contains("refused")
    {
        ErrorCategory::Connection
    } else if msg.contains("parse") || msg.contains("malformed") || msg.contains("decode") {
        ErrorCategory::Parse
    } else if msg.contains("invalid url") || msg.contains("unsupported scheme") {
        ErrorCategory::InvalidInput
    } else {
        ErrorCategory::Unknown
    }
}

/// Markers that only appear on challenge interstitials.
const CHALLENGE_MARKERS: &[&str] = &[
    "cf-chl-",
    "just a moment...",
    "attention required! | cloudflare",
    "px-captcha",
    "request unsuccessful. incapsula",
];

/// Markers that normal pages also carry (detection scripts, form captchas).
/// They count only on a page that otherwise looks like a challenge.
const SUSPECT_MARKERS: &[&str] = &[
    "cf-browser-verification",
    "challenge-platform",
    "g-recaptcha",
    "h-captcha",
    "are you a robot",
    "verify you are human",
    "_incapsula_resource",
    "datadome",
];

const CHALLENGE_TITLE_WORDS: &[&str] = &[
    "captcha",
    "access denied",
    "attention required",
    "security check",
    "are you a robot",
    "verify",
    "blocked",
];

/// Below this much visible text a page has no content of its own.
const CHALLENGE_TEXT_CEILING: usize = 400;

/// Heuristic check for bot-challenge interstitials served with a 200.
pub fn looks_like_block_page(body: &str) -> bool {
    // Challenge pages are small; only sniff the head of large documents.
    let head: String = body.chars().take(16 * 1024).collect::<String>().to_lowercase();
    if CHALLENGE_MARKERS.iter().any(|m| head.contains(m)) {
        return true;
    }
    if !SUSPECT_MARKERS.iter().any(|m| head.contains(m)) {
        return false;
    }
    let challenge_title = title_text(&head)
        .is_some_and(|t| CHALLENGE_TITLE_WORDS.iter().any(|w| t.contains(w)));
    challenge_title || visible_text_len(&head) < CHALLENGE_TEXT_CEILING
}

fn title_text(lower_html: &str) -> Option<&str> {
    let open = lower_html.find("<title")?;
    let after = &lower_html[open..];
    let start = after.find('>')? + 1;
    let end = after[start..].find("</title")?;
    Some(after[start..start + end].trim())
}

/// Heuristic check for an empty client-side-rendered shell.
///
/// A document whose body is little more than a mount point and scripts
/// usually needs a JavaScript-capable strategy.
pub fn looks_like_js_shell(body: &str) -> bool {
    let lower = body.to_lowercase();
    let has_mount = ["id=\"root\"", "id=\"app\"", "id=\"__next\"", "ng-app", "data-reactroot"]
        .iter()
        .any(|m| lower.contains(m));
    let needs_js = lower.contains("enable javascript") || lower.contains("requires javascript");
    needs_js || (has_mount && visible_text_len(&lower) < 200)
}

fn visible_text_len(html: &str) -> usize {
    let mut len = 0;
    let mut in_tag = false;
    let mut skipping = false;
    let mut rest = html;
    while let Some(c) = rest.chars().next() {
        if !in_tag && c == '<' {
            in_tag = true;
            if rest.starts_with("<script") || rest.starts_with("<style") {
                skipping = true;
            } else if rest.starts_with("</script") || rest.starts_with("</style") {
                skipping = false;
            }
        } else if in_tag && c == '>' {
            in_tag = false;
        } else if !in_tag && !skipping && !c.is_whitespace() {
            len += 1;
        }
        rest = &rest[c.len_utf8()..];
    }
    len
}
