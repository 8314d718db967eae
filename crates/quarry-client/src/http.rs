use std::time::Duration;

use async_trait::async_trait;
use quarry_core::classify::looks_like_block_page;
use quarry_core::{AppError, FetchStrategy, RawContent, ScrapeOptions, StrategyKind};
use reqwest::header::{CONTENT_TYPE, HeaderMap, USER_AGENT};
use reqwest::{Client, ClientBuilder, StatusCode};
use tokio::time::Instant;

use crate::ssrf::{blocked_cause, build_clients, validate_url};

pub const DEFAULT_USER_AGENT: &str = "Quarry/0.1 (content extraction)";

/// Plain HTTP GET strategy (`simple`).
///
/// By default, SSRF protection is **enabled**: requests to private/reserved
/// IP ranges are blocked. Use [`allow_private_urls`](Self::allow_private_urls)
/// to disable this (e.g., for CLI usage where the user controls the machine).
#[derive(Clone)]
pub struct HttpStrategy {
    core: HttpCore,
}

impl HttpStrategy {
    pub fn new() -> Result<Self, AppError> {
        Self::with_timeout(Duration::from_secs(30))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, AppError> {
        let core = HttpCore::build(timeout, || {
            Client::builder()
                .user_agent(DEFAULT_USER_AGENT)
                .timeout(timeout)
        })?;
        Ok(Self { core })
    }

    /// Disable SSRF protection, allowing requests to private/reserved IPs.
    pub fn allow_private_urls(mut self) -> Self {
        self.core.ssrf_protection = false;
        self
    }
}

#[async_trait]
impl FetchStrategy for HttpStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Simple
    }

    async fn fetch(
        &self,
        target: &str,
        options: &ScrapeOptions,
        deadline: Option<Instant>,
    ) -> Result<RawContent, AppError> {
        self.core.get(target, options, deadline).await
    }
}

/// reqwest clients plus the request/response handling both HTTP strategies
/// share.
///
/// The guarded client re-checks every redirect hop and resolved address;
/// the open one is used once SSRF protection is switched off.
#[derive(Clone)]
pub(crate) struct HttpCore {
    guarded: Client,
    open: Client,
    timeout: Duration,
    pub(crate) ssrf_protection: bool,
}

impl HttpCore {
    pub(crate) fn build(
        timeout: Duration,
        configure: impl Fn() -> ClientBuilder,
    ) -> Result<Self, AppError> {
        let (guarded, open) = build_clients(configure)?;
        Ok(Self {
            guarded,
            open,
            timeout,
            ssrf_protection: true,
        })
    }

    fn client(&self) -> &Client {
        if self.ssrf_protection {
            &self.guarded
        } else {
            &self.open
        }
    }

    pub(crate) async fn get(
        &self,
        url: &str,
        options: &ScrapeOptions,
        deadline: Option<Instant>,
    ) -> Result<RawContent, AppError> {
        if self.ssrf_protection {
            validate_url(url).await?;
        }

        let mut request = self
            .client()
            .get(url)
            .timeout(remaining(self.timeout, deadline)?)
            .headers(request_headers(options)?);
        if let Some(ua) = options.user_agent.as_deref() {
            request = request.header(USER_AGENT, ua);
        }

        let response = request.send().await.map_err(map_reqwest_error)?;
        let status = response.status();
        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await.map_err(map_reqwest_error)?;

        tracing::debug!(
            status = status.as_u16(),
            bytes = body.len(),
            final_url = %final_url,
            "HTTP response"
        );
        into_raw(status, final_url, content_type, body)
    }
}

fn request_headers(options: &ScrapeOptions) -> Result<HeaderMap, AppError> {
    let mut headers = HeaderMap::new();
    for (name, value) in &options.headers {
        let name = reqwest::header::HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| AppError::InvalidInput(format!("bad header name '{name}': {e}")))?;
        let value = reqwest::header::HeaderValue::from_str(value)
            .map_err(|e| AppError::InvalidInput(format!("bad value for header {name}: {e}")))?;
        headers.insert(name, value);
    }
    Ok(headers)
}

/// Time left for one HTTP call: the client timeout, shortened by the
/// request deadline.
pub(crate) fn remaining(timeout: Duration, deadline: Option<Instant>) -> Result<Duration, AppError> {
    let Some(deadline) = deadline else {
        return Ok(timeout);
    };
    let left = deadline.saturating_duration_since(Instant::now());
    if left.is_zero() {
        return Err(AppError::Timeout("request deadline already passed".into()));
    }
    Ok(left.min(timeout))
}

/// Turn a completed response into content or a classified error.
pub(crate) fn into_raw(
    status: StatusCode,
    final_url: String,
    content_type: Option<String>,
    body: String,
) -> Result<RawContent, AppError> {
    let code = status.as_u16();
    if !status.is_success() {
        return Err(match code {
            429 => AppError::RateLimitExceeded(format!("HTTP 429 from {final_url}")),
            403 | 503 if looks_like_block_page(&body) => {
                AppError::AntiBot(format!("HTTP {code} challenge page from {final_url}"))
            }
            406 | 415 => AppError::ParseError(format!(
                "server refused to produce a readable representation (HTTP {code})"
            )),
            _ => AppError::HttpError {
                status: code,
                message: format!(
                    "{} for {final_url}",
                    status.canonical_reason().unwrap_or("Unexpected status")
                ),
            },
        });
    }

    if let Some(ct) = content_type.as_deref()
        && !is_textual(ct)
    {
        return Err(AppError::ParseError(format!(
            "unsupported content type '{ct}' at {final_url}"
        )));
    }

    Ok(RawContent {
        body,
        final_url,
        status: code,
        content_type,
    })
}

fn is_textual(content_type: &str) -> bool {
    let ct = content_type.to_ascii_lowercase();
    ct.starts_with("text/") || ct.contains("html") || ct.contains("xml") || ct.contains("json")
}

pub(crate) fn map_reqwest_error(e: reqwest::Error) -> AppError {
    if let Some(blocked) = blocked_cause(&e) {
        AppError::InvalidInput(blocked.to_string())
    } else if e.is_timeout() {
        AppError::Timeout(e.to_string())
    } else if e.is_builder() {
        AppError::InvalidInput(format!("could not build request: {e}"))
    } else if e.is_redirect() {
        let reason = std::error::Error::source(&e).map_or_else(|| e.to_string(), ToString::to_string);
        AppError::InvalidInput(format!("redirect refused: {reason}"))
    } else if e.is_connect() {
        AppError::NetworkError(format!("Connection failed: {e}"))
    } else if e.is_decode() {
        AppError::ParseError(format!("Failed to decode response body: {e}"))
    } else if e.is_body() || e.is_request() {
        AppError::NetworkError(e.to_string())
    } else {
        AppError::Generic(e.to_string())
    }
}
