//! In-process aggregation of attempt outcomes and latencies.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::classify::ErrorCategory;

/// Number of recent latencies kept for percentile estimates.
const LATENCY_WINDOW: usize = 1024;

/// One observed unit of work.
#[derive(Debug, Clone)]
pub struct MetricSample {
    /// What ran, typically the strategy name (`"simple"`, `"browser"`, ...).
    pub operation_kind: String,
    pub success: bool,
    pub latency: Duration,
    pub error_category: Option<ErrorCategory>,
    pub timestamp: DateTime<Utc>,
}

impl MetricSample {
    pub fn success(operation_kind: impl Into<String>, latency: Duration) -> Self {
        Self {
            operation_kind: operation_kind.into(),
            success: true,
            latency,
            error_category: None,
            timestamp: Utc::now(),
        }
    }

    pub fn failure(
        operation_kind: impl Into<String>,
        latency: Duration,
        category: ErrorCategory,
    ) -> Self {
        Self {
            operation_kind: operation_kind.into(),
            success: false,
            latency,
            error_category: Some(category),
            timestamp: Utc::now(),
        }
    }
}

/// Per-operation usage counters.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct OperationUsage {
    pub attempts: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub avg_latency_ms: f64,
}

/// Aggregates computed on demand.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub total: u64,
    pub succeeded: u64,
    pub failed: u64,
    /// `succeeded / total`, or 0 when nothing was recorded.
    pub success_rate: f64,
    pub avg_latency_ms: f64,
    pub p50_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub max_latency_ms: f64,
    pub errors_by_category: BTreeMap<ErrorCategory, u64>,
    pub by_operation: BTreeMap<String, OperationUsage>,
    pub collecting_since: DateTime<Utc>,
    pub last_sample_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct OperationTotals {
    attempts: u64,
    succeeded: u64,
    failed: u64,
    latency_total: Duration,
}

#[derive(Debug)]
struct Aggregates {
    total: u64,
    succeeded: u64,
    failed: u64,
    latency_total: Duration,
    latency_max: Duration,
    recent_latencies: VecDeque<Duration>,
    errors_by_category: BTreeMap<ErrorCategory, u64>,
    by_operation: BTreeMap<String, OperationTotals>,
    collecting_since: DateTime<Utc>,
    last_sample_at: Option<DateTime<Utc>>,
}

impl Aggregates {
    fn new() -> Self {
        Self {
            total: 0,
            succeeded: 0,
            failed: 0,
            latency_total: Duration::ZERO,
            latency_max: Duration::ZERO,
            recent_latencies: VecDeque::with_capacity(LATENCY_WINDOW),
            errors_by_category: BTreeMap::new(),
            by_operation: BTreeMap::new(),
            collecting_since: Utc::now(),
            last_sample_at: None,
        }
    }
}

/// Thread-safe metrics sink shared by every component.
///
/// Recording never fails: a poisoned lock is recovered and the sample is
/// still counted.
#[derive(Debug, Clone)]
pub struct MetricsCollector {
    inner: Arc<Mutex<Aggregates>>,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Aggregates::new())),
        }
    }

    fn lock_inner(&self) -> MutexGuard<'_, Aggregates> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned metrics mutex");
            poisoned.into_inner()
        })
    }

    pub fn record(&self, sample: MetricSample) {
        let mut agg = self.lock_inner();

        agg.total += 1;
        if sample.success {
            agg.succeeded += 1;
        } else {
            agg.failed += 1;
            let category = sample.error_category.unwrap_or(ErrorCategory::Unknown);
            *agg.errors_by_category.entry(category).or_insert(0) += 1;
        }

        agg.latency_total += sample.latency;
        agg.latency_max = agg.latency_max.max(sample.latency);
        if agg.recent_latencies.len() == LATENCY_WINDOW {
            agg.recent_latencies.pop_front();
        }
        agg.recent_latencies.push_back(sample.latency);

        let op = agg
            .by_operation
            .entry(sample.operation_kind)
            .or_default();
        op.attempts += 1;
        op.latency_total += sample.latency;
        if sample.success {
            op.succeeded += 1;
        } else {
            op.failed += 1;
        }

        agg.last_sample_at = Some(sample.timestamp);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let agg = self.lock_inner();

        let mut sorted: Vec<Duration> = agg.recent_latencies.iter().copied().collect();
        sorted.sort_unstable();

        MetricsSnapshot {
            total: agg.total,
            succeeded: agg.succeeded,
            failed: agg.failed,
            success_rate: ratio(agg.succeeded, agg.total),
            avg_latency_ms: avg_ms(agg.latency_total, agg.total),
            p50_latency_ms: percentile_ms(&sorted, 0.50),
            p95_latency_ms: percentile_ms(&sorted, 0.95),
            max_latency_ms: as_ms(agg.latency_max),
            errors_by_category: agg.errors_by_category.clone(),
            by_operation: agg
                .by_operation
                .iter()
                .map(|(name, t)| {
                    (
                        name.clone(),
                        OperationUsage {
                            attempts: t.attempts,
                            succeeded: t.succeeded,
                            failed: t.failed,
                            avg_latency_ms: avg_ms(t.latency_total, t.attempts),
                        },
                    )
                })
                .collect(),
            collecting_since: agg.collecting_since,
            last_sample_at: agg.last_sample_at,
        }
    }

    /// Zero every counter.
    pub fn reset(&self) {
        let mut agg = self.lock_inner();
        *agg = Aggregates::new();
        tracing::info!("Metrics reset");
    }
}

fn ratio(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

fn as_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

fn avg_ms(total: Duration, count: u64) -> f64 {
    if count == 0 {
        0.0
    } else {
        as_ms(total) / count as f64
    }
}

/// Nearest-rank percentile over an ascending slice.
fn percentile_ms(sorted: &[Duration], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (q * sorted.len() as f64).ceil() as usize;
    let idx = rank.clamp(1, sorted.len()) - 1;
    as_ms(sorted[idx])
}
