//! Test utilities: mock implementations of the core traits.
//!
//! Handwritten mocks for dependency injection in unit and integration tests.
//! All mocks use `Arc<Mutex<_>>` or atomics for interior mutability, so
//! clones share state and tests can assert on recorded calls.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::AppError;
use crate::models::{CleanedContent, RawContent, ScrapeOptions};
use crate::strategy::StrategyKind;
use crate::traits::{Cleaner, FetchStrategy};

// ---------------------------------------------------------------------------
// MockStrategy
// ---------------------------------------------------------------------------

/// Mock fetch strategy returning queued responses.
#[derive(Clone)]
pub struct MockStrategy {
    kind: StrategyKind,
    /// Queue of responses. Each call pops the first element.
    /// If empty, returns a default HTML document.
    responses: Arc<Mutex<Vec<Result<String, AppError>>>>,
    targets: Arc<Mutex<Vec<String>>>,
    calls: Arc<AtomicU32>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
    delay: Option<Duration>,
    /// Fixed per-target delays, overriding `delay`.
    target_delays: Arc<HashMap<String, Duration>>,
    panic_message: Option<String>,
}

impl MockStrategy {
    pub fn new(kind: StrategyKind, html: &str) -> Self {
        Self::with_responses(kind, vec![Ok(html.to_string())])
    }

    pub fn with_error(kind: StrategyKind, error: AppError) -> Self {
        Self::with_responses(kind, vec![Err(error)])
    }

    pub fn with_responses(kind: StrategyKind, responses: Vec<Result<String, AppError>>) -> Self {
        Self {
            kind,
            responses: Arc::new(Mutex::new(responses)),
            targets: Arc::new(Mutex::new(Vec::new())),
            calls: Arc::new(AtomicU32::new(0)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
            delay: None,
            target_delays: Arc::new(HashMap::new()),
            panic_message: None,
        }
    }

    /// A strategy whose every call panics.
    pub fn panicking(kind: StrategyKind) -> Self {
        Self::panicking_with(kind, &format!("mock strategy {kind} exploded"))
    }

    /// A strategy whose every call panics with `message`.
    pub fn panicking_with(kind: StrategyKind, message: &str) -> Self {
        let mut mock = Self::with_responses(kind, Vec::new());
        mock.panic_message = Some(message.to_string());
        mock
    }

    /// Sleep this long inside every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Sleep a target-specific time inside calls for that target.
    pub fn with_target_delays<'a>(
        mut self,
        delays: impl IntoIterator<Item = (&'a str, Duration)>,
    ) -> Self {
        self.target_delays = Arc::new(
            delays
                .into_iter()
                .map(|(target, delay)| (target.to_string(), delay))
                .collect(),
        );
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Targets passed to `fetch`, in call order.
    pub fn targets(&self) -> Vec<String> {
        self.targets.lock().unwrap().clone()
    }

    /// Highest number of calls observed running at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn into_arc(self) -> Arc<dyn FetchStrategy> {
        Arc::new(self)
    }
}

#[async_trait]
impl FetchStrategy for MockStrategy {
    fn kind(&self) -> StrategyKind {
        self.kind
    }

    async fn fetch(
        &self,
        target: &str,
        _options: &ScrapeOptions,
        _deadline: Option<Instant>,
    ) -> Result<RawContent, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.targets.lock().unwrap().push(target.to_string());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(delay) = self.target_delays.get(target).copied().or(self.delay) {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Some(message) = &self.panic_message {
            panic!("{message}");
        }

        let next = {
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                None
            } else {
                Some(responses.remove(0))
            }
        };
        match next {
            Some(Ok(body)) => Ok(RawContent::html(target, body)),
            Some(Err(e)) => Err(e),
            None => Ok(RawContent::html(
                target,
                "<html><body>default</body></html>",
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// MockCleaner
// ---------------------------------------------------------------------------

/// Mock cleaner that hands the HTML back as its "Markdown".
#[derive(Clone)]
pub struct MockCleaner {
    error: Arc<Mutex<Option<AppError>>>,
}

impl MockCleaner {
    /// Creates a cleaner that returns the input unchanged.
    pub fn passthrough() -> Self {
        Self {
            error: Arc::new(Mutex::new(None)),
        }
    }

    /// Creates a cleaner whose first call returns an error.
    pub fn with_error(error: AppError) -> Self {
        Self {
            error: Arc::new(Mutex::new(Some(error))),
        }
    }
}

impl Cleaner for MockCleaner {
    fn clean(
        &self,
        html: &str,
        _base_url: &str,
        _options: &ScrapeOptions,
    ) -> Result<CleanedContent, AppError> {
        let mut err = self.error.lock().unwrap();
        if let Some(e) = err.take() {
            return Err(e);
        }
        Ok(CleanedContent {
            markdown: html.to_string(),
            title: None,
            links: Vec::new(),
        })
    }
}
