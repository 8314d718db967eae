use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;
use url::Url;

use crate::cache::{CacheManager, CacheStats, Fingerprint};
use crate::classify::{ErrorCategory, looks_like_block_page, looks_like_js_shell};
use crate::config::ServiceConfig;
use crate::error::AppError;
use crate::metrics::{MetricSample, MetricsCollector, MetricsSnapshot};
use crate::models::{
    ResponseMetadata, ScrapeData, ScrapeEnvelope, ScrapeOptions, ScrapeRequest, compute_hash,
    word_count,
};
use crate::rate_limit::{RateLimiter, RateLimiterStats};
use crate::retry::{RetryManager, RetryPolicy};
use crate::strategy::{Method, StrategyKind, TargetSignals, plan, select};
use crate::traits::{Cleaner, FetchStrategy};

/// Upper bound on remembered anti-bot blocks.
const BLOCK_MEMORY_CAPACITY: u64 = 10_000;

/// Operation kind under which local admission timeouts are recorded.
pub const RATE_LIMITER_OPERATION: &str = "rate_limiter";

/// Knobs that are not owned by one of the injected components.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Applied when a request carries no `timeout_secs`.
    pub default_timeout: Option<Duration>,
    /// How long an anti-bot block on a target steers auto-selection.
    pub anti_bot_memory: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            default_timeout: Some(Duration::from_secs(60)),
            anti_bot_memory: Duration::from_secs(3600),
        }
    }
}

/// Everything the service-management surface reports.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceMetrics {
    pub requests: MetricsSnapshot,
    pub cache: CacheStats,
    pub rate_limiter: RateLimiterStats,
    pub strategies: Vec<StrategyKind>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ClearCacheResult {
    pub removed_count: usize,
}

/// Runs one request through cache → admission → strategy chain → cache.
///
/// Generic over the cleaner; fetch strategies are registered at runtime so
/// builds without a browser simply have fewer candidates. All state lives
/// in the injected components, which are shared by clone.
pub struct Orchestrator<C: Cleaner> {
    strategies: BTreeMap<StrategyKind, Arc<dyn FetchStrategy>>,
    cleaner: C,
    cache: CacheManager<ScrapeData>,
    limiter: RateLimiter,
    retry: RetryManager,
    metrics: MetricsCollector,
    /// Target URL → most capable strategy recently blocked there.
    blocked: moka::sync::Cache<String, StrategyKind>,
    settings: OrchestratorSettings,
    option_defaults: Value,
}

impl<C: Cleaner> Orchestrator<C> {
    /// Create an orchestrator with no strategies registered yet.
    ///
    /// The retry manager and the orchestrator share one metrics collector.
    pub fn new(
        cleaner: C,
        limiter: RateLimiter,
        cache: CacheManager<ScrapeData>,
        retry_policy: RetryPolicy,
        settings: OrchestratorSettings,
    ) -> Self {
        let metrics = MetricsCollector::new();
        let blocked = moka::sync::Cache::builder()
            .max_capacity(BLOCK_MEMORY_CAPACITY)
            .time_to_live(settings.anti_bot_memory)
            .build();
        Self {
            strategies: BTreeMap::new(),
            cleaner,
            cache,
            limiter,
            retry: RetryManager::new(retry_policy, metrics.clone()),
            metrics,
            blocked,
            settings,
            option_defaults: serde_json::to_value(ScrapeOptions::default()).unwrap_or_default(),
        }
    }

    /// Build every component from `config` with the default retry table.
    pub fn from_config(cleaner: C, config: &ServiceConfig) -> Result<Self, AppError> {
        Ok(Self::new(
            cleaner,
            config.rate_limiter()?,
            config.cache(),
            RetryPolicy::default(),
            OrchestratorSettings {
                default_timeout: Some(config.request_timeout),
                anti_bot_memory: config.anti_bot_memory,
            },
        ))
    }

    /// Register a strategy, replacing any earlier one of the same kind.
    pub fn with_strategy(mut self, strategy: Arc<dyn FetchStrategy>) -> Self {
        self.strategies.insert(strategy.kind(), strategy);
        self
    }

    /// Registered strategies in fallback order.
    pub fn available(&self) -> Vec<StrategyKind> {
        self.strategies.keys().copied().collect()
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    /// Handle one request. Never fails: every outcome is an envelope.
    pub async fn scrape(&self, request: &ScrapeRequest) -> ScrapeEnvelope {
        let started = Instant::now();
        let mut metadata = ResponseMetadata::new(&request.target);

        let outcome = self.execute(request, started, &mut metadata).await;
        metadata.latency_ms = started.elapsed().as_millis() as u64;
        metadata.fetched_at = Utc::now();

        match outcome {
            Ok(data) => {
                tracing::info!(
                    target_url = %request.target,
                    strategy = ?metadata.strategy_used,
                    cache_hit = metadata.cache_hit,
                    latency_ms = metadata.latency_ms,
                    "Scrape succeeded"
                );
                ScrapeEnvelope::success(data, metadata)
            }
            Err(e) => {
                tracing::warn!(
                    target_url = %request.target,
                    category = %e.category(),
                    attempted = ?metadata.attempted,
                    error = %e,
                    "Scrape failed"
                );
                ScrapeEnvelope::failure(&e, metadata)
            }
        }
    }

    async fn execute(
        &self,
        request: &ScrapeRequest,
        started: Instant,
        metadata: &mut ResponseMetadata,
    ) -> Result<ScrapeData, AppError> {
        let url = validate_target(&request.target)?;

        if let Method::Explicit(kind) = request.method
            && !self.strategies.contains_key(&kind)
        {
            return Err(AppError::InvalidInput(format!(
                "strategy '{kind}' is not available in this build"
            )));
        }

        let timeout = match request.timeout_secs {
            Some(0) => {
                return Err(AppError::InvalidInput(
                    "timeout_secs must be at least 1".into(),
                ));
            }
            Some(secs) => Some(Duration::from_secs(secs)),
            None => self.settings.default_timeout,
        };
        let deadline = timeout.and_then(|t| started.checked_add(t));

        // 1. Cache
        let options_value = serde_json::to_value(&request.options)?;
        let fingerprint = Fingerprint::new(
            url.as_str(),
            request.method.as_str(),
            &options_value,
            &self.option_defaults,
        );
        metadata.fingerprint = Some(fingerprint.to_string());

        if let Some(hit) = self.cache.get(&fingerprint) {
            tracing::debug!(fingerprint = %fingerprint.short(), "Cache hit");
            metadata.cache_hit = true;
            metadata.strategy_used = Some(hit.strategy);
            return Ok(hit);
        }

        // 2. Admission
        if let Err(e) = self.limiter.admit_until(deadline).await {
            self.metrics.record(MetricSample::failure(
                RATE_LIMITER_OPERATION,
                started.elapsed(),
                e.category(),
            ));
            return Err(e);
        }

        // 3. Strategy chain
        let signals = TargetSignals::inspect(&url, &request.options, self.blocked.get(url.as_str()));
        let start = select(&signals, request.method);
        let allow_fallback = request
            .options
            .allow_fallback
            .unwrap_or_else(|| request.method.allows_fallback_by_default());
        let candidates = plan(start, &self.available(), allow_fallback);
        if candidates.is_empty() {
            return Err(AppError::ConfigError(
                "no fetch strategies are registered".into(),
            ));
        }
        tracing::debug!(
            target_url = %url,
            ?start,
            ?candidates,
            fingerprint = %fingerprint.short(),
            "Strategy plan"
        );

        let mut last_error = None;
        for (i, kind) in candidates.iter().copied().enumerate() {
            metadata.attempted.push(kind);
            metadata.strategy_used = Some(kind);

            match self.attempt(kind, &url, &request.options, deadline).await {
                Ok(data) => {
                    // 4. Store
                    self.cache.insert(fingerprint, data.clone());
                    return Ok(data);
                }
                Err(e) => {
                    let category = e.category();
                    if category == ErrorCategory::AntiBot {
                        self.remember_block(&url, kind);
                    }

                    let has_next = i + 1 < candidates.len();
                    let time_left = deadline.is_none_or(|d| Instant::now() < d);
                    if !(has_next && category.is_fallback_eligible() && time_left) {
                        return Err(e);
                    }
                    tracing::info!(
                        strategy = %kind,
                        next = %candidates[i + 1],
                        %category,
                        "Falling back to next strategy"
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| AppError::Generic("strategy chain ended without a result".into())))
    }

    /// One strategy under the retry manager.
    async fn attempt(
        &self,
        kind: StrategyKind,
        url: &Url,
        options: &ScrapeOptions,
        deadline: Option<Instant>,
    ) -> Result<ScrapeData, AppError> {
        let strategy = self
            .strategies
            .get(&kind)
            .cloned()
            .ok_or_else(|| AppError::InvalidInput(format!("strategy '{kind}' is not available")))?;

        self.retry
            .run(kind.as_str(), deadline, |attempt| {
                let strategy = Arc::clone(&strategy);
                async move {
                    tracing::debug!(strategy = %kind, attempt, target_url = %url, "Fetching");
                    self.fetch_once(strategy.as_ref(), url, options, deadline).await
                }
            })
            .await
    }

    async fn fetch_once(
        &self,
        strategy: &dyn FetchStrategy,
        url: &Url,
        options: &ScrapeOptions,
        deadline: Option<Instant>,
    ) -> Result<ScrapeData, AppError> {
        let kind = strategy.kind();
        let raw = match AssertUnwindSafe(strategy.fetch(url.as_str(), options, deadline))
            .catch_unwind()
            .await
        {
            Ok(result) => result?,
            Err(payload) => {
                let detail = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "no panic message".to_string());
                tracing::error!(strategy = %kind, %detail, "Strategy panicked");
                return Err(AppError::StrategyPanic(format!("{kind}: {detail}")));
            }
        };

        if looks_like_block_page(&raw.body) {
            return Err(AppError::AntiBot(format!(
                "{kind} received a challenge page from {}",
                raw.final_url
            )));
        }

        let cleaned = self.cleaner.clean(&raw.body, &raw.final_url, options)?;

        if !kind.renders_js() && looks_like_js_shell(&raw.body) {
            return Err(AppError::ParseError(
                "document is a JavaScript shell; a rendering strategy is required".into(),
            ));
        }
        if cleaned.markdown.trim().is_empty() {
            return Err(AppError::ParseError("no extractable content".into()));
        }

        tracing::debug!(
            strategy = %kind,
            html_bytes = raw.body.len(),
            markdown_bytes = cleaned.markdown.len(),
            "Cleaned document"
        );

        Ok(ScrapeData {
            target: url.to_string(),
            final_url: raw.final_url,
            status: raw.status,
            content_type: raw.content_type,
            title: cleaned.title,
            word_count: word_count(&cleaned.markdown),
            content_hash: compute_hash(&cleaned.markdown),
            links: cleaned.links,
            markdown: cleaned.markdown,
            strategy: kind,
            fetched_at: Utc::now(),
        })
    }

    fn remember_block(&self, url: &Url, kind: StrategyKind) {
        let key = url.to_string();
        let worst = self.blocked.get(&key).map_or(kind, |prev| prev.max(kind));
        tracing::info!(target_url = %url, strategy = %worst, "Remembering anti-bot block");
        self.blocked.insert(key, worst);
    }

    pub async fn get_metrics(&self) -> ServiceMetrics {
        ServiceMetrics {
            requests: self.metrics.snapshot(),
            cache: self.cache.stats(),
            rate_limiter: self.limiter.stats().await,
            strategies: self.available(),
        }
    }

    /// Drop every cached result and every remembered block.
    pub fn clear_cache(&self) -> ClearCacheResult {
        let removed_count = self.cache.clear();
        self.blocked.invalidate_all();
        tracing::info!(removed_count, "Cache cleared");
        ClearCacheResult { removed_count }
    }

    pub fn reset_metrics(&self) {
        self.metrics.reset();
    }
}

/// Parse and check a caller-supplied target.
pub fn validate_target(target: &str) -> Result<Url, AppError> {
    let trimmed = target.trim();
    if trimmed.is_empty() {
        return Err(AppError::InvalidInput("target must not be empty".into()));
    }
    let url = Url::parse(trimmed)
        .map_err(|e| AppError::InvalidInput(format!("invalid URL '{trimmed}': {e}")))?;
    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(AppError::InvalidInput(format!(
                "unsupported scheme '{other}' (only http and https)"
            )));
        }
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(AppError::InvalidInput(format!("URL '{trimmed}' has no host")));
    }
    Ok(url)
}
