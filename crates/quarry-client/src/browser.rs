use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use quarry_core::{AppError, FetchStrategy, RawContent, ScrapeOptions, StrategyKind};
use tokio::time::Instant;

use crate::framework::BROWSER_USER_AGENT;
use crate::ssrf::validate_url;

/// Hides the usual automation giveaways before any page script runs.
const STEALTH_SCRIPT: &str = r#"
Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
Object.defineProperty(navigator, 'languages', { get: () => ['en-US', 'en'] });
Object.defineProperty(navigator, 'plugins', { get: () => [1, 2, 3, 4, 5] });
window.chrome = window.chrome || { runtime: {} };
"#;

const WAIT_FOR_POLL: Duration = Duration::from_millis(250);

/// Headless-browser strategy (`browser`) using Chromium via the Chrome
/// DevTools Protocol.
///
/// Renders JavaScript before returning the HTML, making it suitable for
/// SPAs and lazy-loaded content. A single Chromium process is shared across
/// clones; each fetch opens a new tab, grabs the rendered DOM and closes
/// the tab.
#[derive(Clone)]
pub struct BrowserStrategy {
    session: ChromeSession,
}

impl BrowserStrategy {
    /// Launches a headless Chromium with a **30 s** navigation timeout.
    pub async fn new() -> Result<Self, AppError> {
        Self::with_timeout(Duration::from_secs(30)).await
    }

    pub async fn with_timeout(timeout: Duration) -> Result<Self, AppError> {
        Ok(Self {
            session: ChromeSession::launch(timeout, false).await?,
        })
    }

    pub fn allow_private_urls(mut self) -> Self {
        self.session.ssrf_protection = false;
        self
    }
}

#[async_trait]
impl FetchStrategy for BrowserStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Browser
    }

    async fn fetch(
        &self,
        target: &str,
        options: &ScrapeOptions,
        deadline: Option<Instant>,
    ) -> Result<RawContent, AppError> {
        self.session.render(target, options, deadline).await
    }
}

/// Headless-browser strategy (`stealth`) with automation fingerprints
/// masked: real-looking user agent and window size, `navigator.webdriver`
/// hidden, and Blink's automation feature switched off.
#[derive(Clone)]
pub struct StealthStrategy {
    session: ChromeSession,
}

impl StealthStrategy {
    pub async fn new() -> Result<Self, AppError> {
        Self::with_timeout(Duration::from_secs(45)).await
    }

    pub async fn with_timeout(timeout: Duration) -> Result<Self, AppError> {
        Ok(Self {
            session: ChromeSession::launch(timeout, true).await?,
        })
    }

    pub fn allow_private_urls(mut self) -> Self {
        self.session.ssrf_protection = false;
        self
    }
}

#[async_trait]
impl FetchStrategy for StealthStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Stealth
    }

    async fn fetch(
        &self,
        target: &str,
        options: &ScrapeOptions,
        deadline: Option<Instant>,
    ) -> Result<RawContent, AppError> {
        self.session.render(target, options, deadline).await
    }
}

#[derive(Clone)]
struct ChromeSession {
    browser: Arc<Browser>,
    timeout: Duration,
    stealth: bool,
    ssrf_protection: bool,
}

impl ChromeSession {
    async fn launch(timeout: Duration, stealth: bool) -> Result<Self, AppError> {
        let mut builder = BrowserConfig::builder().no_sandbox().disable_default_args();

        // Snap-packaged Chromium ships a wrapper that rejects standard
        // Chrome flags; prefer the real binary when we can find it.
        if let Some(bin) = find_chrome_binary() {
            tracing::info!("Using Chrome binary: {}", bin.display());
            builder = builder.chrome_executable(bin);
        }

        builder = builder
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--disable-popup-blocking")
            .arg("--disable-translate")
            .arg("--no-first-run");

        if stealth {
            builder = builder
                .arg("--disable-blink-features=AutomationControlled")
                .arg("--window-size=1366,768")
                .arg(format!("--user-agent={BROWSER_USER_AGENT}"));
        }

        let config = builder
            .build()
            .map_err(|e| AppError::ConfigError(format!("Browser config error: {e}")))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| AppError::ConfigError(format!("Failed to launch browser: {e}")))?;

        // The CDP handler must be polled continuously for the connection to work.
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    tracing::warn!("Browser CDP handler error: {event:?}");
                    break;
                }
            }
        });

        Ok(Self {
            browser: Arc::new(browser),
            timeout,
            stealth,
            ssrf_protection: true,
        })
    }

    async fn render(
        &self,
        url: &str,
        options: &ScrapeOptions,
        deadline: Option<Instant>,
    ) -> Result<RawContent, AppError> {
        if self.ssrf_protection {
            validate_url(url).await?;
        }

        let budget = match deadline {
            Some(d) => d.saturating_duration_since(Instant::now()).min(self.timeout),
            None => self.timeout,
        };
        let stop_at = Instant::now() + budget;

        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| AppError::Generic(format!("Failed to open tab: {e}")))?;

        let result = tokio::time::timeout_at(stop_at, self.load(&page, url, options, stop_at)).await;

        // Close the tab to free browser resources.
        let _ = page.close().await;

        match result {
            Ok(inner) => inner,
            Err(_) => Err(AppError::Timeout(format!(
                "browser render of {url} exceeded {}s",
                budget.as_secs()
            ))),
        }
    }

    async fn load(
        &self,
        page: &Page,
        url: &str,
        options: &ScrapeOptions,
        stop_at: Instant,
    ) -> Result<RawContent, AppError> {
        if self.stealth {
            page.evaluate_on_new_document(STEALTH_SCRIPT)
                .await
                .map_err(|e| AppError::Generic(format!("Failed to install stealth script: {e}")))?;
        }

        page.goto(url)
            .await
            .map_err(|e| AppError::NetworkError(format!("Failed to navigate to {url}: {e}")))?;

        let wait_for = options
            .wait_for
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or("body");
        while page.find_element(wait_for).await.is_err() {
            if Instant::now() + WAIT_FOR_POLL >= stop_at {
                return Err(AppError::Timeout(format!(
                    "selector '{wait_for}' never appeared on {url}"
                )));
            }
            tokio::time::sleep(WAIT_FOR_POLL).await;
        }

        let html = page
            .content()
            .await
            .map_err(|e| AppError::Generic(format!("Failed to read page content: {e}")))?;
        let final_url = page.url().await.ok().flatten().unwrap_or_else(|| url.to_string());

        Ok(RawContent {
            body: html,
            final_url,
            status: 200,
            content_type: Some("text/html".to_string()),
        })
    }
}

/// Tries to locate the real Chrome/Chromium binary.
///
/// `CHROME_BIN` wins when it points at an existing file; otherwise the snap
/// payload and well-known system paths are checked. `None` lets
/// `chromiumoxide` do its own lookup.
fn find_chrome_binary() -> Option<PathBuf> {
    const CANDIDATES: &[&str] = &[
        "/snap/chromium/current/usr/lib/chromium-browser/chrome",
        "/var/lib/flatpak/exports/bin/org.chromium.Chromium",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/google-chrome",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
    ];

    if let Ok(p) = std::env::var("CHROME_BIN") {
        let path = PathBuf::from(p);
        if path.exists() {
            return Some(path);
        }
    }

    CANDIDATES.iter().map(PathBuf::from).find(|p| p.exists())
}
