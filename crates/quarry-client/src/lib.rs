pub mod cleaner;
pub mod framework;
pub mod http;
pub mod ssrf;

#[cfg(feature = "browser")]
pub mod browser;

use std::sync::Arc;
use std::time::Duration;

use quarry_core::{AppError, Orchestrator, ServiceConfig};

#[cfg(feature = "browser")]
pub use browser::{BrowserStrategy, StealthStrategy};
pub use cleaner::HtmdCleaner;
pub use framework::FrameworkStrategy;
pub use http::HttpStrategy;

/// How the concrete strategies are built.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Per-call ceiling inside each strategy; the request deadline may cut
    /// it shorter.
    pub fetch_timeout: Duration,
    /// Disable SSRF protection (CLI use on the caller's own machine).
    pub allow_private_urls: bool,
    /// Launch Chromium for the rendering strategies. Ignored without the
    /// `browser` feature.
    pub enable_browser: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(30),
            allow_private_urls: false,
            enable_browser: true,
        }
    }
}

/// Orchestrator wired with every strategy this build can offer.
///
/// A browser that fails to launch is logged and left out; requests naming
/// it explicitly then fail as `invalid_input`.
pub async fn build_orchestrator(
    service: &ServiceConfig,
    client: &ClientConfig,
) -> Result<Orchestrator<HtmdCleaner>, AppError> {
    let mut simple = HttpStrategy::with_timeout(client.fetch_timeout)?;
    let mut framework = FrameworkStrategy::with_timeout(client.fetch_timeout)?;
    if client.allow_private_urls {
        simple = simple.allow_private_urls();
        framework = framework.allow_private_urls();
    }

    let orchestrator = Orchestrator::from_config(HtmdCleaner::new(), service)?
        .with_strategy(Arc::new(simple))
        .with_strategy(Arc::new(framework));

    #[cfg(feature = "browser")]
    let orchestrator = if client.enable_browser {
        with_browsers(orchestrator, client).await
    } else {
        orchestrator
    };

    tracing::info!(strategies = ?orchestrator.available(), "Orchestrator ready");
    Ok(orchestrator)
}

#[cfg(feature = "browser")]
async fn with_browsers(
    mut orchestrator: Orchestrator<HtmdCleaner>,
    client: &ClientConfig,
) -> Orchestrator<HtmdCleaner> {
    match BrowserStrategy::with_timeout(client.fetch_timeout).await {
        Ok(mut browser) => {
            if client.allow_private_urls {
                browser = browser.allow_private_urls();
            }
            orchestrator = orchestrator.with_strategy(Arc::new(browser));
        }
        Err(e) => tracing::warn!(error = %e, "Browser strategy unavailable"),
    }
    match StealthStrategy::with_timeout(client.fetch_timeout).await {
        Ok(mut stealth) => {
            if client.allow_private_urls {
                stealth = stealth.allow_private_urls();
            }
            orchestrator = orchestrator.with_strategy(Arc::new(stealth));
        }
        Err(e) => tracing::warn!(error = %e, "Stealth strategy unavailable"),
    }
    orchestrator
}

#[cfg(test)]
mod tests {
    use quarry_core::{ScrapeRequest, StrategyKind};

    use super::*;
    use crate::http::tests::{response, serve};

    #[tokio::test]
    async fn http_strategies_always_registered() {
        let client = ClientConfig {
            enable_browser: false,
            ..Default::default()
        };
        let orch = build_orchestrator(&ServiceConfig::default(), &client)
            .await
            .unwrap();
        assert_eq!(
            orch.available(),
            vec![StrategyKind::Simple, StrategyKind::Framework]
        );
    }

    #[tokio::test]
    async fn end_to_end_against_local_server() {
        let base = serve(vec![response(
            "200 OK",
            "text/html",
            "<html><head><title>Local Page</title></head><body><h1>Hi</h1><p>Real words here.</p></body></html>",
        )])
        .await;
        let client = ClientConfig {
            allow_private_urls: true,
            enable_browser: false,
            ..Default::default()
        };
        let orch = build_orchestrator(&ServiceConfig::default(), &client)
            .await
            .unwrap();

        let env = orch.scrape(&ScrapeRequest::new(format!("{base}/"))).await;

        assert!(env.success, "{env:?}");
        let data = env.data.unwrap();
        assert_eq!(data.title.as_deref(), Some("Local Page"));
        assert!(data.markdown.contains("Real words here."));
        assert_eq!(data.strategy, StrategyKind::Simple);
    }
}
