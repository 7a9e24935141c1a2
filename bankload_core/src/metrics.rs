//! Metrics aggregator - thread-safe sample collection with latency tracking

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use hdrhistogram::Histogram;
use parking_lot::{Mutex, RwLock};
use tokio::time::Instant;

use crate::operation::{OperationResult, OperationType};

/// Built-in metric names.
pub mod names {
    pub const HTTP_REQ_DURATION: &str = "http_req_duration";
    pub const HTTP_REQ_FAILED: &str = "http_req_failed";
    pub const HTTP_REQS: &str = "http_reqs";
    pub const CHECKS: &str = "checks";
    pub const ITERATIONS: &str = "iterations";
    pub const OPERATION_DURATION: &str = "operation_duration";
    pub const OPERATION_SUCCESS: &str = "operation_success";

    /// `operation_duration.<type>` or `operation_success.<type>`
    pub fn per_operation(base: &str, operation: super::OperationType) -> String {
        format!("{}.{}", base, operation.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// Distribution of values (durations in milliseconds)
    Trend,
    /// Fraction of non-zero samples
    Rate,
    /// Running sum
    Counter,
}

/// One observation for a named metric.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub metric: Cow<'static, str>,
    pub kind: MetricKind,
    pub value: f64,
}

impl Sample {
    pub fn trend(metric: impl Into<Cow<'static, str>>, value: f64) -> Self {
        Self {
            metric: metric.into(),
            kind: MetricKind::Trend,
            value,
        }
    }

    pub fn rate(metric: impl Into<Cow<'static, str>>, hit: bool) -> Self {
        Self {
            metric: metric.into(),
            kind: MetricKind::Rate,
            value: if hit { 1.0 } else { 0.0 },
        }
    }

    pub fn counter(metric: impl Into<Cow<'static, str>>, value: f64) -> Self {
        Self {
            metric: metric.into(),
            kind: MetricKind::Counter,
            value,
        }
    }

    pub fn duration(metric: impl Into<Cow<'static, str>>, value: Duration) -> Self {
        Self::trend(metric, value.as_nanos() as f64 / 1_000_000.0)
    }
}

/// Where the core sends everything it measures.
pub trait MetricsSink: Send + Sync {
    fn record(&self, sample: Sample);

    /// Fan one operation result out into its metric streams.
    fn record_operation(&self, result: &OperationResult) {
        self.record(Sample::rate(names::CHECKS, result.success));
        self.record(Sample::duration(
            names::per_operation(names::OPERATION_DURATION, result.operation),
            result.latency,
        ));
        self.record(Sample::rate(
            names::per_operation(names::OPERATION_SUCCESS, result.operation),
            result.success,
        ));
    }
}

#[derive(Debug, Clone)]
enum Series {
    Trend(Vec<f64>),
    Rate { hits: u64, total: u64 },
    Counter { sum: f64, samples: u64 },
}

impl Series {
    fn new(kind: MetricKind) -> Self {
        match kind {
            MetricKind::Trend => Series::Trend(Vec::new()),
            MetricKind::Rate => Series::Rate { hits: 0, total: 0 },
            MetricKind::Counter => Series::Counter { sum: 0.0, samples: 0 },
        }
    }

    fn kind(&self) -> MetricKind {
        match self {
            Series::Trend(_) => MetricKind::Trend,
            Series::Rate { .. } => MetricKind::Rate,
            Series::Counter { .. } => MetricKind::Counter,
        }
    }

    fn push(&mut self, value: f64) {
        match self {
            Series::Trend(values) => values.push(value),
            Series::Rate { hits, total } => {
                *total += 1;
                if value != 0.0 {
                    *hits += 1;
                }
            }
            Series::Counter { sum, samples } => {
                *sum += value;
                *samples += 1;
            }
        }
    }
}

/// Append-only, concurrency-safe store of every recorded sample.
///
/// Exact samples back threshold evaluation; an HDR histogram of
/// `http_req_duration` backs the cheap live view.
#[derive(Clone)]
pub struct MetricsAggregator {
    series: Arc<RwLock<BTreeMap<String, Series>>>,
    http_latencies: Arc<Mutex<Histogram<u64>>>,
    start_time: Instant,
}

impl MetricsAggregator {
    pub fn new() -> Self {
        // 3 significant digits, auto-resizing
        let histogram = Histogram::new(3).expect("3 significant figures is a valid precision");

        Self {
            series: Arc::new(RwLock::new(BTreeMap::new())),
            http_latencies: Arc::new(Mutex::new(histogram)),
            start_time: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Sorted, immutable copy of everything recorded so far.
    ///
    /// The lock is held only for the copy; sorting happens after it is
    /// released so recording VUs are not stalled.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let elapsed = self.elapsed();
        let copied: Vec<(String, Series)> = self
            .series
            .read()
            .iter()
            .map(|(name, series)| (name.clone(), series.clone()))
            .collect();
        let metrics = copied
            .into_iter()
            .map(|(name, series)| (name, SeriesSnapshot::from(series)))
            .collect();

        MetricsSnapshot { elapsed, metrics }
    }

    /// Live `http_req_duration` percentiles in milliseconds.
    pub fn http_latency_stats(&self) -> LatencyStats {
        let hist = self.http_latencies.lock();
        LatencyStats {
            min: hist.min(),
            p50: hist.value_at_quantile(0.50),
            p95: hist.value_at_quantile(0.95),
            p99: hist.value_at_quantile(0.99),
            max: hist.max(),
            mean: hist.mean(),
            count: hist.len(),
        }
    }

    /// Current sum of a counter metric, 0 if it was never recorded.
    pub fn counter_total(&self, metric: &str) -> f64 {
        match self.series.read().get(metric) {
            Some(Series::Counter { sum, .. }) => *sum,
            _ => 0.0,
        }
    }

    /// Current `(hits, total)` of a rate metric.
    pub fn rate_counts(&self, metric: &str) -> (u64, u64) {
        match self.series.read().get(metric) {
            Some(Series::Rate { hits, total }) => (*hits, *total),
            _ => (0, 0),
        }
    }
}

impl Default for MetricsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsSink for MetricsAggregator {
    fn record(&self, sample: Sample) {
        if sample.kind == MetricKind::Trend && sample.metric == names::HTTP_REQ_DURATION {
            let millis = sample.value.max(0.0).round() as u64;
            let _ = self.http_latencies.lock().record(millis);
        }

        let mut series = self.series.write();
        let entry = series
            .entry(sample.metric.into_owned())
            .or_insert_with(|| Series::new(sample.kind));
        if entry.kind() != sample.kind {
            tracing::warn!(
                "Dropping {:?} sample for metric already recorded as {:?}",
                sample.kind,
                entry.kind()
            );
            return;
        }
        entry.push(sample.value);
    }
}

#[derive(Debug, Clone)]
pub struct LatencyStats {
    pub min: u64,
    pub p50: u64,
    pub p95: u64,
    pub p99: u64,
    pub max: u64,
    pub mean: f64,
    pub count: u64,
}

/// Point-in-time view of one metric.
#[derive(Debug, Clone, PartialEq)]
pub enum SeriesSnapshot {
    /// Samples sorted ascending
    Trend(Vec<f64>),
    Rate { hits: u64, total: u64 },
    Counter { sum: f64, samples: u64 },
}

impl From<Series> for SeriesSnapshot {
    fn from(series: Series) -> Self {
        match series {
            Series::Trend(values) => SeriesSnapshot::trend(values),
            Series::Rate { hits, total } => SeriesSnapshot::Rate { hits, total },
            Series::Counter { sum, samples } => SeriesSnapshot::Counter { sum, samples },
        }
    }
}

impl SeriesSnapshot {
    pub fn kind(&self) -> MetricKind {
        match self {
            SeriesSnapshot::Trend(_) => MetricKind::Trend,
            SeriesSnapshot::Rate { .. } => MetricKind::Rate,
            SeriesSnapshot::Counter { .. } => MetricKind::Counter,
        }
    }

    /// Build a trend snapshot from unsorted samples.
    pub fn trend(mut values: Vec<f64>) -> Self {
        values.sort_by(|a, b| a.total_cmp(b));
        SeriesSnapshot::Trend(values)
    }
}

/// Everything recorded up to `elapsed` after the aggregator was created.
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    pub elapsed: Duration,
    pub metrics: BTreeMap<String, SeriesSnapshot>,
}

impl MetricsSnapshot {
    pub fn get(&self, metric: &str) -> Option<&SeriesSnapshot> {
        self.metrics.get(metric)
    }

    /// Per-operation `(count, successes)` pairs, for operations that ran.
    pub fn operation_counts(&self) -> Vec<(OperationType, u64, u64)> {
        OperationType::ALL
            .into_iter()
            .filter_map(|operation| {
                let name = names::per_operation(names::OPERATION_SUCCESS, operation);
                match self.metrics.get(&name) {
                    Some(SeriesSnapshot::Rate { hits, total }) if *total > 0 => {
                        Some((operation, *total, *hits))
                    }
                    _ => None,
                }
            })
            .collect()
    }
}

/// Nearest-rank percentile over ascending samples.
///
/// The rank is `ceil(p / 100 * n)`, clamped to `1..=n`, so the result is
/// always one of the recorded samples.
pub fn percentile(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() || !p.is_finite() {
        return None;
    }
    let n = sorted.len();
    let rank = ((p.clamp(0.0, 100.0) / 100.0) * n as f64).ceil() as usize;
    Some(sorted[rank.clamp(1, n) - 1])
}
