pub mod batch;
pub mod cache;
pub mod classify;
pub mod config;
pub mod error;
pub mod metrics;
pub mod models;
pub mod orchestrator;
pub mod rate_limit;
pub mod retry;
pub mod strategy;
pub mod traits;

#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use batch::{BatchCoordinator, BatchOptions, BatchReport, BatchSummary};
pub use cache::{CacheManager, CacheStats, Fingerprint};
pub use classify::ErrorCategory;
pub use config::ServiceConfig;
pub use error::AppError;
pub use metrics::{MetricSample, MetricsCollector, MetricsSnapshot};
pub use models::{
    CleanedContent, RawContent, ResponseMetadata, ScrapeData, ScrapeEnvelope, ScrapeOptions,
    ScrapeRequest, compute_hash,
};
pub use orchestrator::{ClearCacheResult, Orchestrator, OrchestratorSettings, ServiceMetrics};
pub use rate_limit::{RateLimiter, RateLimiterStats};
pub use retry::{BackoffPolicy, RetryManager, RetryPolicy};
pub use strategy::{Method, StrategyKind};
pub use traits::{Cleaner, FetchStrategy};
