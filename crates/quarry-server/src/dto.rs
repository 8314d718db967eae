use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use quarry_core::{
    AppError, BatchOptions, BatchReport, BatchSummary, Method, ResponseMetadata, ScrapeData,
    ScrapeEnvelope, ScrapeOptions, ServiceMetrics,
};

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize, utoipa::ToSchema)]
#[serde(default)]
pub struct ScrapeOptionsDto {
    /// The page needs JavaScript to render
    pub render_js: bool,
    /// CSS selector a rendering strategy should wait for
    pub wait_for: Option<String>,
    /// Include outbound links in the result
    pub include_links: bool,
    /// Extra request headers
    pub headers: BTreeMap<String, String>,
    pub user_agent: Option<String>,
    /// Override the fallback default (on for `auto`, off for explicit methods)
    pub allow_fallback: Option<bool>,
    /// Extraction settings; `css_selector` narrows the document
    #[schema(value_type = Option<Object>)]
    pub extract_config: Option<serde_json::Value>,
}

impl From<ScrapeOptionsDto> for ScrapeOptions {
    fn from(o: ScrapeOptionsDto) -> Self {
        Self {
            render_js: o.render_js,
            wait_for: o.wait_for,
            include_links: o.include_links,
            headers: o.headers,
            user_agent: o.user_agent,
            allow_fallback: o.allow_fallback,
            extract_config: o.extract_config,
        }
    }
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct ScrapeRequest {
    /// Target URL (http or https)
    pub target: String,
    /// "auto" (default) or one of: simple, framework, browser, stealth
    pub method: Option<String>,
    #[serde(default)]
    pub options: ScrapeOptionsDto,
    /// Overall deadline in seconds, including rate-limit waits
    pub timeout_secs: Option<u64>,
}

impl TryFrom<ScrapeRequest> for quarry_core::ScrapeRequest {
    type Error = AppError;

    fn try_from(body: ScrapeRequest) -> Result<Self, Self::Error> {
        Ok(Self {
            target: body.target,
            method: parse_method(body.method.as_deref())?,
            options: body.options.into(),
            timeout_secs: body.timeout_secs,
        })
    }
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct BatchRequest {
    /// Targets, processed concurrently; results keep this order
    pub targets: Vec<String>,
    pub method: Option<String>,
    #[serde(default)]
    pub options: ScrapeOptionsDto,
    /// Per-target deadline in seconds
    pub timeout_secs: Option<u64>,
}

impl BatchRequest {
    pub fn into_parts(self) -> Result<(Vec<String>, BatchOptions), AppError> {
        let options = BatchOptions {
            method: parse_method(self.method.as_deref())?,
            options: self.options.into(),
            timeout_secs: self.timeout_secs,
        };
        Ok((self.targets, options))
    }
}

fn parse_method(raw: Option<&str>) -> Result<Method, AppError> {
    match raw {
        None => Ok(Method::Auto),
        Some(s) => s.parse().map_err(AppError::InvalidInput),
    }
}

// ---------------------------------------------------------------------------
// Scrape responses
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ScrapeDataResponse {
    pub target: String,
    pub final_url: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub title: Option<String>,
    pub markdown: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<String>,
    pub word_count: usize,
    pub content_hash: String,
    pub strategy: String,
    pub fetched_at: DateTime<Utc>,
}

impl From<ScrapeData> for ScrapeDataResponse {
    fn from(d: ScrapeData) -> Self {
        Self {
            target: d.target,
            final_url: d.final_url,
            status: d.status,
            content_type: d.content_type,
            title: d.title,
            markdown: d.markdown,
            links: d.links,
            word_count: d.word_count,
            content_hash: d.content_hash,
            strategy: d.strategy.to_string(),
            fetched_at: d.fetched_at,
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ScrapeErrorResponse {
    /// One of: timeout, connection, rate_limited, anti_bot, parse,
    /// invalid_input, unknown, cancelled
    pub category: String,
    pub message: String,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ScrapeMetadataResponse {
    pub request_id: Uuid,
    pub target: String,
    pub latency_ms: u64,
    pub strategy_used: Option<String>,
    pub cache_hit: bool,
    /// Strategies tried, in order
    pub attempted: Vec<String>,
    pub fingerprint: Option<String>,
    pub fetched_at: DateTime<Utc>,
}

impl From<ResponseMetadata> for ScrapeMetadataResponse {
    fn from(m: ResponseMetadata) -> Self {
        Self {
            request_id: m.request_id,
            target: m.target,
            latency_ms: m.latency_ms,
            strategy_used: m.strategy_used.map(|s| s.to_string()),
            cache_hit: m.cache_hit,
            attempted: m.attempted.iter().map(ToString::to_string).collect(),
            fingerprint: m.fingerprint,
            fetched_at: m.fetched_at,
        }
    }
}

/// Uniform outcome envelope.
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ScrapeResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<ScrapeDataResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ScrapeErrorResponse>,
    pub metadata: ScrapeMetadataResponse,
}

impl From<ScrapeEnvelope> for ScrapeResponse {
    fn from(e: ScrapeEnvelope) -> Self {
        Self {
            success: e.success,
            data: e.data.map(Into::into),
            error: e.error.map(|err| ScrapeErrorResponse {
                category: err.category.to_string(),
                message: err.message,
            }),
            metadata: e.metadata.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Batch responses
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct BatchSummaryResponse {
    pub total: usize,
    pub succeeded: usize,
    /// Includes cancelled targets
    pub failed: usize,
    pub cancelled: usize,
    pub success_rate: f64,
}

impl From<BatchSummary> for BatchSummaryResponse {
    fn from(s: BatchSummary) -> Self {
        Self {
            total: s.total,
            succeeded: s.succeeded,
            failed: s.failed,
            cancelled: s.cancelled,
            success_rate: s.success_rate,
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct BatchResponse {
    pub batch_id: Uuid,
    pub results: Vec<ScrapeResponse>,
    pub summary: BatchSummaryResponse,
    pub elapsed_ms: u64,
}

impl From<BatchReport> for BatchResponse {
    fn from(r: BatchReport) -> Self {
        Self {
            batch_id: r.batch_id,
            results: r.results.into_iter().map(Into::into).collect(),
            summary: r.summary.into(),
            elapsed_ms: r.elapsed_ms,
        }
    }
}

// ---------------------------------------------------------------------------
// Service management
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct MetricsResponse {
    /// Attempt counts, success rate, latency percentiles, errors by category
    #[schema(value_type = Object)]
    pub requests: serde_json::Value,
    /// Size, hits, misses, hit rate, evictions
    #[schema(value_type = Object)]
    pub cache: serde_json::Value,
    /// Window occupancy and admission counters
    #[schema(value_type = Object)]
    pub rate_limiter: serde_json::Value,
    pub strategies: Vec<String>,
}

impl TryFrom<ServiceMetrics> for MetricsResponse {
    type Error = AppError;

    fn try_from(m: ServiceMetrics) -> Result<Self, Self::Error> {
        Ok(Self {
            requests: serde_json::to_value(&m.requests)?,
            cache: serde_json::to_value(&m.cache)?,
            rate_limiter: serde_json::to_value(&m.rate_limiter)?,
            strategies: m.strategies.iter().map(ToString::to_string).collect(),
        })
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ClearCacheResponse {
    pub removed_count: usize,
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub strategies: Vec<String>,
    pub uptime_secs: i64,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}
