use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::classify::ErrorCategory;
use crate::error::AppError;
use crate::strategy::{Method, StrategyKind};

/// Caller options that influence what a fetch produces.
///
/// Every field has a default; the cache fingerprint treats default values
/// as if they were omitted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrapeOptions {
    /// Page needs JavaScript to render its content.
    pub render_js: bool,
    /// CSS selector a rendering strategy should wait for.
    pub wait_for: Option<String>,
    /// Collect outbound links alongside the Markdown.
    pub include_links: bool,
    /// Extra request headers.
    pub headers: BTreeMap<String, String>,
    pub user_agent: Option<String>,
    /// Override the default fallback behaviour for the chosen method.
    pub allow_fallback: Option<bool>,
    /// Structured extraction settings passed through to the cleaner
    /// (`css_selector` narrows the document before conversion).
    pub extract_config: Option<serde_json::Value>,
}

impl ScrapeOptions {
    pub fn css_selector(&self) -> Option<&str> {
        self.extract_config
            .as_ref()
            .and_then(|c| c.get("css_selector"))
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
    }
}

/// One tool-facing request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeRequest {
    pub target: String,
    #[serde(default)]
    pub method: Method,
    #[serde(default)]
    pub options: ScrapeOptions,
    /// Overall deadline for the request, including rate-limit waits.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl ScrapeRequest {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            method: Method::Auto,
            options: ScrapeOptions::default(),
            timeout_secs: None,
        }
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn with_options(mut self, options: ScrapeOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }
}

/// Raw success payload returned by a fetch strategy.
#[derive(Debug, Clone)]
pub struct RawContent {
    pub body: String,
    pub final_url: String,
    pub status: u16,
    pub content_type: Option<String>,
}

impl RawContent {
    pub fn html(final_url: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            final_url: final_url.into(),
            status: 200,
            content_type: Some("text/html".to_string()),
        }
    }
}

/// Cleaner output: Markdown plus the metadata pulled from the document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CleanedContent {
    pub markdown: String,
    pub title: Option<String>,
    pub links: Vec<String>,
}

/// Structured result of a successful scrape; this is what gets cached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapeData {
    pub target: String,
    pub final_url: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub title: Option<String>,
    pub markdown: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<String>,
    pub word_count: usize,
    /// SHA-256 of the Markdown, for change detection.
    pub content_hash: String,
    pub strategy: StrategyKind,
    pub fetched_at: DateTime<Utc>,
}

/// Failure half of the outcome envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub category: ErrorCategory,
    pub message: String,
}

impl From<&AppError> for ErrorBody {
    fn from(err: &AppError) -> Self {
        Self {
            category: err.category(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseMetadata {
    pub request_id: Uuid,
    pub target: String,
    pub latency_ms: u64,
    pub strategy_used: Option<StrategyKind>,
    pub cache_hit: bool,
    /// Strategies tried, in order, for this request.
    #[serde(default)]
    pub attempted: Vec<StrategyKind>,
    pub fingerprint: Option<String>,
    /// When this response was produced; a cache hit keeps the original
    /// fetch time in `data.fetched_at`.
    #[serde(default = "Utc::now")]
    pub fetched_at: DateTime<Utc>,
}

impl ResponseMetadata {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            target: target.into(),
            latency_ms: 0,
            strategy_used: None,
            cache_hit: false,
            attempted: Vec::new(),
            fingerprint: None,
            fetched_at: Utc::now(),
        }
    }
}

/// Uniform success/failure envelope returned across every surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapeEnvelope {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<ScrapeData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    pub metadata: ResponseMetadata,
}

impl ScrapeEnvelope {
    pub fn success(data: ScrapeData, metadata: ResponseMetadata) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            metadata,
        }
    }

    pub fn failure(error: &AppError, metadata: ResponseMetadata) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ErrorBody::from(error)),
            metadata,
        }
    }

    pub fn category(&self) -> Option<ErrorCategory> {
        self.error.as_ref().map(|e| e.category)
    }
}

/// Compute a SHA-256 hash of a string, returned as 64-char hex.
pub fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Whitespace-separated word count of Markdown text.
pub fn word_count(markdown: &str) -> usize {
    markdown.split_whitespace().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_hash_consistency() {
        let h1 = compute_hash("hello world");
        let h2 = compute_hash("hello world");
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
    }

    #[test]
    fn test_compute_hash_different_inputs() {
        assert_ne!(compute_hash("hello"), compute_hash("world"));
    }

    #[test]
    fn request_deserializes_with_defaults() {
        let req: ScrapeRequest =
            serde_json::from_str(r#"{"target": "https://example.com"}"#).unwrap();
        assert_eq!(req.method, Method::Auto);
        assert_eq!(req.options, ScrapeOptions::default());
        assert!(req.timeout_secs.is_none());

        let req: ScrapeRequest = serde_json::from_str(
            r#"{"target": "https://example.com", "method": "browser", "options": {"wait_for": "main"}}"#,
        )
        .unwrap();
        assert_eq!(req.method, Method::Explicit(StrategyKind::Browser));
        assert_eq!(req.options.wait_for.as_deref(), Some("main"));
    }

    #[test]
    fn css_selector_reads_extract_config() {
        let opts = ScrapeOptions {
            extract_config: Some(serde_json::json!({"css_selector": "article"})),
            ..Default::default()
        };
        assert_eq!(opts.css_selector(), Some("article"));
        assert_eq!(ScrapeOptions::default().css_selector(), None);
    }

    #[test]
    fn failure_envelope_carries_category() {
        let env = ScrapeEnvelope::failure(
            &AppError::AntiBot("captcha".into()),
            ResponseMetadata::new("https://example.com"),
        );
        assert!(!env.success);
        assert_eq!(env.category(), Some(ErrorCategory::AntiBot));

        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["error"]["category"], "anti_bot");
        assert!(json.get("data").is_none());
        assert!(json["metadata"]["fetched_at"].is_string());
    }

    #[test]
    fn word_count_splits_on_whitespace() {
        assert_eq!(word_count("# Title\n\nsome  words here"), 5);
        assert_eq!(word_count(""), 0);
    }
}
