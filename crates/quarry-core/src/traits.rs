use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::AppError;
use crate::models::{CleanedContent, RawContent, ScrapeOptions};
use crate::strategy::StrategyKind;

/// One pluggable way of fetching a target.
///
/// Expected failures (network errors, timeouts, block pages, bad statuses)
/// must come back as a classified `Err`, never as a panic. The orchestrator
/// still catches panics and maps them to `unknown`.
#[async_trait]
pub trait FetchStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Fetch `target`. Implementations should stop by `deadline` when set;
    /// the caller enforces it as well.
    async fn fetch(
        &self,
        target: &str,
        options: &ScrapeOptions,
        deadline: Option<Instant>,
    ) -> Result<RawContent, AppError>;
}

/// Converts raw HTML into clean Markdown plus document metadata.
pub trait Cleaner: Send + Sync + Clone {
    fn clean(
        &self,
        html: &str,
        base_url: &str,
        options: &ScrapeOptions,
    ) -> Result<CleanedContent, AppError>;
}
