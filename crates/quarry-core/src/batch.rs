use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::classify::ErrorCategory;
use crate::config::ServiceConfig;
use crate::error::AppError;
use crate::models::{ResponseMetadata, ScrapeEnvelope, ScrapeOptions, ScrapeRequest};
use crate::orchestrator::Orchestrator;
use crate::strategy::Method;
use crate::traits::Cleaner;

/// Request settings shared by every target of a batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchOptions {
    pub method: Method,
    pub options: ScrapeOptions,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    /// Includes cancelled targets.
    pub failed: usize,
    pub cancelled: usize,
    pub success_rate: f64,
}

impl BatchSummary {
    pub fn from_results(results: &[ScrapeEnvelope]) -> Self {
        let total = results.len();
        let succeeded = results.iter().filter(|r| r.success).count();
        let cancelled = results
            .iter()
            .filter(|r| r.category() == Some(ErrorCategory::Cancelled))
            .count();
        Self {
            total,
            succeeded,
            failed: total - succeeded,
            cancelled,
            success_rate: if total == 0 {
                0.0
            } else {
                succeeded as f64 / total as f64
            },
        }
    }
}

/// Per-target outcomes in input order, plus totals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub batch_id: Uuid,
    pub results: Vec<ScrapeEnvelope>,
    pub summary: BatchSummary,
    pub elapsed_ms: u64,
}

/// Events emitted while a batch runs, for monitoring/logging.
#[derive(Debug, Clone)]
pub enum BatchEvent<'a> {
    Started {
        batch_id: Uuid,
        total: usize,
        concurrency: usize,
    },
    TargetStarted {
        index: usize,
        target: &'a str,
    },
    TargetFinished {
        index: usize,
        target: &'a str,
        category: Option<ErrorCategory>,
    },
    TargetSkipped {
        index: usize,
        target: &'a str,
    },
    Finished {
        batch_id: Uuid,
        summary: &'a BatchSummary,
    },
}

/// Trait for receiving batch events (decoupled logging).
pub trait BatchReporter: Send + Sync {
    fn report(&self, event: BatchEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingBatchReporter;

impl BatchReporter for TracingBatchReporter {
    fn report(&self, event: BatchEvent<'_>) {
        match event {
            BatchEvent::Started {
                batch_id,
                total,
                concurrency,
            } => {
                tracing::info!(%batch_id, total, concurrency, "Batch started");
            }
            BatchEvent::TargetStarted { index, target } => {
                tracing::debug!(index, target_url = %target, "Batch target started");
            }
            BatchEvent::TargetFinished {
                index,
                target,
                category: None,
            } => {
                tracing::debug!(index, target_url = %target, "Batch target succeeded");
            }
            BatchEvent::TargetFinished {
                index,
                target,
                category: Some(category),
            } => {
                tracing::warn!(index, target_url = %target, %category, "Batch target failed");
            }
            BatchEvent::TargetSkipped { index, target } => {
                tracing::info!(index, target_url = %target, "Batch target cancelled before start");
            }
            BatchEvent::Finished { batch_id, summary } => {
                tracing::info!(
                    %batch_id,
                    total = summary.total,
                    succeeded = summary.succeeded,
                    failed = summary.failed,
                    cancelled = summary.cancelled,
                    "Batch finished"
                );
            }
        }
    }
}

/// Runs many targets through one orchestrator with bounded concurrency.
pub struct BatchCoordinator<C: Cleaner> {
    orchestrator: Arc<Orchestrator<C>>,
    max_concurrency: usize,
    max_targets: usize,
}

impl<C: Cleaner> Clone for BatchCoordinator<C> {
    fn clone(&self) -> Self {
        Self {
            orchestrator: Arc::clone(&self.orchestrator),
            max_concurrency: self.max_concurrency,
            max_targets: self.max_targets,
        }
    }
}

impl<C: Cleaner> BatchCoordinator<C> {
    pub fn new(
        orchestrator: Arc<Orchestrator<C>>,
        max_concurrency: usize,
        max_targets: usize,
    ) -> Result<Self, AppError> {
        if max_concurrency == 0 {
            return Err(AppError::ConfigError(
                "batch concurrency must be at least 1".into(),
            ));
        }
        if max_targets == 0 {
            return Err(AppError::ConfigError(
                "batch max targets must be at least 1".into(),
            ));
        }
        Ok(Self {
            orchestrator,
            max_concurrency,
            max_targets,
        })
    }

    pub fn from_config(
        orchestrator: Arc<Orchestrator<C>>,
        config: &ServiceConfig,
    ) -> Result<Self, AppError> {
        Self::new(orchestrator, config.batch_concurrency, config.batch_max_targets)
    }

    /// Same coordinator with a different concurrency bound.
    pub fn with_max_concurrency(self, max_concurrency: usize) -> Result<Self, AppError> {
        Self::new(self.orchestrator, max_concurrency, self.max_targets)
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator<C>> {
        &self.orchestrator
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    pub fn max_targets(&self) -> usize {
        self.max_targets
    }

    pub async fn run_batch(
        &self,
        targets: &[String],
        options: &BatchOptions,
        cancel: &CancellationToken,
    ) -> Result<BatchReport, AppError> {
        self.run_batch_with_reporter(targets, options, cancel, &TracingBatchReporter)
            .await
    }

    /// Scrape every target, at most `max_concurrency` at a time.
    ///
    /// One target's failure never affects another. Results come back in
    /// input order. Once `cancel` fires no new target is started; targets
    /// already running finish normally and the rest are reported as
    /// `cancelled`.
    pub async fn run_batch_with_reporter<R: BatchReporter>(
        &self,
        targets: &[String],
        options: &BatchOptions,
        cancel: &CancellationToken,
        reporter: &R,
    ) -> Result<BatchReport, AppError> {
        if targets.is_empty() {
            return Err(AppError::InvalidInput(
                "batch must contain at least one target".into(),
            ));
        }
        if targets.len() > self.max_targets {
            return Err(AppError::InvalidInput(format!(
                "batch of {} targets exceeds the limit of {}",
                targets.len(),
                self.max_targets
            )));
        }

        let started = Instant::now();
        let batch_id = Uuid::new_v4();
        reporter.report(BatchEvent::Started {
            batch_id,
            total: targets.len(),
            concurrency: self.max_concurrency,
        });

        let semaphore = Semaphore::new(self.max_concurrency);
        let semaphore = &semaphore;
        let orchestrator = &self.orchestrator;

        let tasks = targets.iter().enumerate().map(|(index, target)| async move {
            let permit = tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                permit = semaphore.acquire() => permit.ok(),
            };
            let Some(_permit) = permit.filter(|_| !cancel.is_cancelled()) else {
                reporter.report(BatchEvent::TargetSkipped { index, target });
                return cancelled_envelope(target);
            };

            reporter.report(BatchEvent::TargetStarted { index, target });
            let request = ScrapeRequest {
                target: target.clone(),
                method: options.method,
                options: options.options.clone(),
                timeout_secs: options.timeout_secs,
            };
            let envelope = orchestrator.scrape(&request).await;
            reporter.report(BatchEvent::TargetFinished {
                index,
                target,
                category: envelope.category(),
            });
            envelope
        });

        let results = join_all(tasks).await;
        let summary = BatchSummary::from_results(&results);
        reporter.report(BatchEvent::Finished {
            batch_id,
            summary: &summary,
        });

        Ok(BatchReport {
            batch_id,
            results,
            summary,
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }
}

fn cancelled_envelope(target: &str) -> ScrapeEnvelope {
    ScrapeEnvelope::failure(
        &AppError::Cancelled("batch cancelled before this target started".into()),
        ResponseMetadata::new(target),
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::cache::CacheManager;
    use crate::orchestrator::OrchestratorSettings;
    use crate::rate_limit::RateLimiter;
    use crate::retry::RetryPolicy;
    use crate::strategy::StrategyKind;
    use crate::testutil::*;

    const PAGE: &str = "<html><body><p>batch content</p></body></html>";

    fn coordinator(strategy: &MockStrategy, concurrency: usize) -> BatchCoordinator<MockCleaner> {
        let orch = Orchestrator::new(
            MockCleaner::passthrough(),
            RateLimiter::new(1000, Duration::from_secs(1)).unwrap(),
            CacheManager::new(Duration::from_secs(60), None),
            RetryPolicy::default(),
            OrchestratorSettings::default(),
        )
        .with_strategy(strategy.clone().into_arc());
        BatchCoordinator::new(Arc::new(orch), concurrency, 50).unwrap()
    }

    fn targets(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("https://example.com/page/{i}")).collect()
    }

    #[derive(Default)]
    struct RecordingReporter {
        skipped: Mutex<Vec<usize>>,
        finished: Mutex<u32>,
    }

    impl BatchReporter for RecordingReporter {
        fn report(&self, event: BatchEvent<'_>) {
            match event {
                BatchEvent::TargetSkipped { index, .. } => self.skipped.lock().unwrap().push(index),
                BatchEvent::Finished { .. } => *self.finished.lock().unwrap() += 1,
                _ => {}
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn results_keep_input_order() {
        let strategy =
            MockStrategy::new(StrategyKind::Simple, PAGE).with_delay(Duration::from_millis(50));
        let batch = coordinator(&strategy, 3);
        let input = targets(7);

        let report = batch
            .run_batch(&input, &BatchOptions::default(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.results.len(), 7);
        for (target, result) in input.iter().zip(&report.results) {
            assert_eq!(&result.metadata.target, target);
            assert!(result.success);
        }
        assert_eq!(report.summary.succeeded, 7);
        assert!((report.summary.success_rate - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_first_target_still_comes_back_first() {
        let strategy = MockStrategy::new(StrategyKind::Simple, PAGE).with_target_delays([
            ("https://example.com/t1", Duration::from_millis(300)),
            ("https://example.com/t2", Duration::from_millis(10)),
            ("https://example.com/t3", Duration::from_millis(100)),
        ]);
        let batch = coordinator(&strategy, 3);
        let input: Vec<String> = ["t1", "t2", "t3"]
            .iter()
            .map(|p| format!("https://example.com/{p}"))
            .collect();

        let report = batch
            .run_batch(&input, &BatchOptions::default(), &CancellationToken::new())
            .await
            .unwrap();

        let order: Vec<&str> = report
            .results
            .iter()
            .map(|r| r.metadata.target.as_str())
            .collect();
        assert_eq!(order, input.iter().map(String::as_str).collect::<Vec<_>>());
        for (target, result) in input.iter().zip(&report.results) {
            assert_eq!(&result.data.as_ref().unwrap().target, target);
        }
        // Completion order was t2, t3, t1.
        let latency: Vec<u64> = report.results.iter().map(|r| r.metadata.latency_ms).collect();
        assert!(latency[1] < latency[2]);
        assert!(latency[2] < latency[0]);
    }

    #[tokio::test(start_paused = true)]
    async fn one_bad_target_does_not_affect_others() {
        let strategy = MockStrategy::new(StrategyKind::Simple, PAGE);
        let batch = coordinator(&strategy, 2);
        let input = vec![
            "https://example.com/a".to_string(),
            "ftp://example.com/b".to_string(),
            "https://example.com/c".to_string(),
        ];

        let report = batch
            .run_batch(&input, &BatchOptions::default(), &CancellationToken::new())
            .await
            .unwrap();

        assert!(report.results[0].success);
        assert_eq!(report.results[1].category(), Some(ErrorCategory::InvalidInput));
        assert!(report.results[2].success);
        assert_eq!(report.summary.total, 3);
        assert_eq!(report.summary.succeeded, 2);
        assert_eq!(report.summary.failed, 1);
        assert_eq!(report.summary.cancelled, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn never_exceeds_concurrency_bound() {
        let strategy =
            MockStrategy::new(StrategyKind::Simple, PAGE).with_delay(Duration::from_millis(100));
        let batch = coordinator(&strategy, 3);

        batch
            .run_batch(&targets(10), &BatchOptions::default(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(strategy.calls(), 10);
        assert_eq!(strategy.max_in_flight(), 3);
    }

    #[tokio::test]
    async fn empty_and_oversized_batches_rejected() {
        let strategy = MockStrategy::new(StrategyKind::Simple, PAGE);
        let batch = coordinator(&strategy, 2);
        let cancel = CancellationToken::new();

        let err = batch
            .run_batch(&[], &BatchOptions::default(), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::InvalidInput);

        let err = batch
            .run_batch(&targets(51), &BatchOptions::default(), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::InvalidInput);
        assert_eq!(strategy.calls(), 0);
    }

    #[tokio::test]
    async fn cancelled_before_start_runs_nothing() {
        let strategy = MockStrategy::new(StrategyKind::Simple, PAGE);
        let batch = coordinator(&strategy, 2);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let reporter = RecordingReporter::default();

        let report = batch
            .run_batch_with_reporter(&targets(4), &BatchOptions::default(), &cancel, &reporter)
            .await
            .unwrap();

        assert_eq!(strategy.calls(), 0);
        assert_eq!(report.summary.cancelled, 4);
        assert_eq!(report.summary.failed, 4);
        assert_eq!(*reporter.skipped.lock().unwrap(), vec![0, 1, 2, 3]);
        assert_eq!(*reporter.finished.lock().unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_lets_in_flight_targets_finish() {
        let strategy =
            MockStrategy::new(StrategyKind::Simple, PAGE).with_delay(Duration::from_secs(1));
        let batch = coordinator(&strategy, 1);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1500)).await;
            trigger.cancel();
        });

        let report = batch
            .run_batch(&targets(4), &BatchOptions::default(), &cancel)
            .await
            .unwrap();

        assert!(report.results[0].success);
        assert!(report.results[1].success);
        assert_eq!(report.results[2].category(), Some(ErrorCategory::Cancelled));
        assert_eq!(report.results[3].category(), Some(ErrorCategory::Cancelled));
        assert_eq!(report.summary.succeeded, 2);
        assert_eq!(report.summary.cancelled, 2);
        assert_eq!(strategy.calls(), 2);
    }

    #[test]
    fn zero_limits_rejected() {
        let strategy = MockStrategy::new(StrategyKind::Simple, PAGE);
        let batch = coordinator(&strategy, 1);
        let orch = Arc::clone(batch.orchestrator());
        assert!(BatchCoordinator::new(Arc::clone(&orch), 0, 10).is_err());
        assert!(BatchCoordinator::new(orch, 1, 0).is_err());
        assert!(batch.with_max_concurrency(0).is_err());
    }
}
