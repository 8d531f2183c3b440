// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! In-process metrics for the hub.
//!
//! Two kinds of measurement are kept: monotonically increasing counters
//! (`port.conflict`, `dispatcher.dropped`, ...) and timed operations with a
//! latency histogram (`agent.spawn`, `port.wait`, ...). Both are exposed as
//! part of `GET /status`.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use serde::Serialize;

/// Global metrics instance.
pub static GLOBAL_METRICS: Lazy<Metrics> = Lazy::new(Metrics::new);

/// Central metrics collection.
#[derive(Debug)]
pub struct Metrics {
    counters: RwLock<HashMap<String, u64>>,
    operations: RwLock<HashMap<String, OperationMetrics>>,
    start_time: Instant,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

impl Metrics {
    /// Create a new metrics collector.
    pub fn new() -> Self {
        Self {
            counters: RwLock::new(HashMap::new()),
            operations: RwLock::new(HashMap::new()),
            start_time: Instant::now(),
        }
    }

    /// Bump a named counter by one.
    pub fn increment(&self, name: &str) {
        self.add(name, 1);
    }

    /// Bump a named counter by `amount`.
    pub fn add(&self, name: &str, amount: u64) {
        let mut counters = write(&self.counters);
        *counters.entry(name.to_string()).or_insert(0) += amount;
    }

    /// Current value of a counter (zero if never touched).
    pub fn counter(&self, name: &str) -> u64 {
        read(&self.counters).get(name).copied().unwrap_or(0)
    }

    /// Record a timed operation.
    pub fn record_operation(&self, name: &str, duration: Duration) {
        let mut ops = write(&self.operations);
        ops.entry(name.to_string())
            .or_insert_with(OperationMetrics::new)
            .record(duration);
    }

    /// Get metrics for a specific operation.
    pub fn operation_metrics(&self, name: &str) -> Option<OperationMetrics> {
        read(&self.operations).get(name).cloned()
    }

    /// Get uptime since metrics were initialized.
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Take a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            counters: read(&self.counters)
                .iter()
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
            operations: read(&self.operations)
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            uptime: self.uptime(),
        }
    }

    /// Reset all metrics.
    pub fn reset(&self) {
        write(&self.counters).clear();
        write(&self.operations).clear();
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Timing statistics for one named operation.
#[derive(Debug, Clone)]
pub struct OperationMetrics {
    /// Number of operations.
    pub count: u64,

    /// Total duration.
    pub total_duration: Duration,

    /// Minimum duration.
    pub min_duration: Duration,

    /// Maximum duration.
    pub max_duration: Duration,

    /// Histogram buckets for latency distribution.
    pub histogram: Histogram,
}

impl OperationMetrics {
    /// Create new operation metrics.
    pub fn new() -> Self {
        Self {
            count: 0,
            total_duration: Duration::ZERO,
            min_duration: Duration::MAX,
            max_duration: Duration::ZERO,
            histogram: Histogram::default(),
        }
    }

    /// Record an operation.
    pub fn record(&mut self, duration: Duration) {
        self.count += 1;
        self.total_duration += duration;
        self.min_duration = self.min_duration.min(duration);
        self.max_duration = self.max_duration.max(duration);
        self.histogram.record(duration);
    }

    /// Calculate average duration.
    pub fn avg_duration(&self) -> Duration {
        if self.count == 0 {
            Duration::ZERO
        } else {
            self.total_duration / self.count as u32
        }
    }
}

impl Default for OperationMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixed-bucket latency histogram.
///
/// Spawning an agent takes seconds while a port acquire takes microseconds,
/// so the default buckets span 1ms to 60s.
#[derive(Debug, Clone)]
pub struct Histogram {
    /// Bucket upper bounds in milliseconds.
    buckets: Vec<u64>,
    counts: Vec<u64>,
}

impl Histogram {
    /// Create a histogram with custom bucket boundaries (in milliseconds).
    pub fn with_buckets(buckets: Vec<u64>) -> Self {
        let counts = vec![0; buckets.len() + 1];
        Self { buckets, counts }
    }

    /// Record a duration value.
    pub fn record(&mut self, duration: Duration) {
        let millis = duration.as_millis() as u64;
        let idx = self
            .buckets
            .iter()
            .position(|&b| millis <= b)
            .unwrap_or(self.buckets.len());
        self.counts[idx] += 1;
    }

    /// Get counts for each bucket (the last entry is the overflow bucket).
    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    /// Approximate percentile, reported as the matching bucket's bound.
    pub fn percentile(&self, p: f64) -> Duration {
        let total: u64 = self.counts.iter().sum();
        if total == 0 {
            return Duration::ZERO;
        }

        let target = (total as f64 * p / 100.0).ceil() as u64;
        let mut cumulative = 0u64;
        for (i, &count) in self.counts.iter().enumerate() {
            cumulative += count;
            if cumulative >= target {
                let millis = match self.buckets.get(i) {
                    Some(bound) => *bound,
                    None => self.buckets.last().copied().unwrap_or(0) * 2,
                };
                return Duration::from_millis(millis);
            }
        }
        Duration::ZERO
    }

    /// Median latency.
    pub fn p50(&self) -> Duration {
        self.percentile(50.0)
    }

    /// 99th percentile latency.
    pub fn p99(&self) -> Duration {
        self.percentile(99.0)
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::with_buckets(vec![1, 10, 100, 1_000, 5_000, 15_000, 60_000])
    }
}

/// RAII timer that records its lifetime into [`GLOBAL_METRICS`] on drop.
pub struct OperationTimer {
    name: &'static str,
    start: Instant,
}

impl OperationTimer {
    /// Start timing `name`.
    pub fn start(name: &'static str) -> Self {
        Self {
            name,
            start: Instant::now(),
        }
    }

    /// Elapsed time so far.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for OperationTimer {
    fn drop(&mut self) {
        GLOBAL_METRICS.record_operation(self.name, self.start.elapsed());
    }
}

/// Point-in-time copy of all metrics.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    /// Counter values by name.
    pub counters: BTreeMap<String, u64>,

    /// Operation metrics by name.
    pub operations: BTreeMap<String, OperationMetrics>,

    /// Uptime when snapshot was taken.
    pub uptime: Duration,
}

/// Serializable summary of one operation, used by `/status`.
#[derive(Debug, Clone, Serialize)]
pub struct OperationSummary {
    pub count: u64,
    pub avg_ms: u64,
    pub max_ms: u64,
    pub p99_ms: u64,
}

/// Serializable form of a [`MetricsSnapshot`].
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSummary {
    pub uptime_secs: u64,
    pub counters: BTreeMap<String, u64>,
    pub operations: BTreeMap<String, OperationSummary>,
}

impl MetricsSnapshot {
    /// Convert into the JSON-friendly summary.
    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            uptime_secs: self.uptime.as_secs(),
            counters: self.counters.clone(),
            operations: self
                .operations
                .iter()
                .map(|(name, m)| {
                    (
                        name.clone(),
                        OperationSummary {
                            count: m.count,
                            avg_ms: m.avg_duration().as_millis() as u64,
                            max_ms: m.max_duration.as_millis() as u64,
                            p99_ms: m.histogram.p99().as_millis() as u64,
                        },
                    )
                })
                .collect(),
        }
    }

    /// Format as a human-readable report.
    pub fn format_report(&self) -> String {
        let mut report = String::new();
        report.push_str(&format!("Uptime: {:.2?}\n", self.uptime));

        if !self.counters.is_empty() {
            report.push_str("Counters:\n");
            for (name, value) in &self.counters {
                report.push_str(&format!("  {}: {}\n", name, value));
            }
        }

        if !self.operations.is_empty() {
            report.push_str("Operations:\n");
            for (name, metrics) in &self.operations {
                report.push_str(&format!(
                    "  {}: {} ops, avg {:.2?}, p99 {:.2?}\n",
                    name,
                    metrics.count,
                    metrics.avg_duration(),
                    metrics.histogram.p99()
                ));
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let metrics = Metrics::new();
        metrics.increment("port.conflict");
        metrics.increment("port.conflict");
        metrics.add("dispatcher.dropped", 5);

        assert_eq!(metrics.counter("port.conflict"), 2);
        assert_eq!(metrics.counter("dispatcher.dropped"), 5);
        assert_eq!(metrics.counter("never.touched"), 0);
    }

    #[test]
    fn test_operation_metrics() {
        let mut metrics = OperationMetrics::new();
        metrics.record(Duration::from_millis(10));
        metrics.record(Duration::from_millis(20));
        metrics.record(Duration::from_millis(30));

        assert_eq!(metrics.count, 3);
        assert_eq!(metrics.avg_duration(), Duration::from_millis(20));
        assert_eq!(metrics.max_duration, Duration::from_millis(30));
    }

    #[test]
    fn test_histogram_buckets() {
        let mut hist = Histogram::default();
        hist.record(Duration::from_micros(500)); // <=1ms
        hist.record(Duration::from_millis(50)); // <=100ms
        hist.record(Duration::from_secs(3)); // <=5s
        hist.record(Duration::from_secs(120)); // overflow

        assert_eq!(hist.counts()[0], 1);
        assert_eq!(hist.counts()[2], 1);
        assert_eq!(hist.counts()[4], 1);
        assert_eq!(hist.counts()[7], 1);
    }

    #[test]
    fn test_histogram_percentiles() {
        let mut hist = Histogram::default();
        for _ in 0..100 {
            hist.record(Duration::from_millis(7));
        }
        assert_eq!(hist.p50(), Duration::from_millis(10));
        assert_eq!(hist.p99(), Duration::from_millis(10));
    }

    #[test]
    fn test_timer_records_on_drop() {
        {
            let _timer = OperationTimer::start("test.timer_records_on_drop");
        }
        let metrics = GLOBAL_METRICS
            .operation_metrics("test.timer_records_on_drop")
            .unwrap();
        assert_eq!(metrics.count, 1);
    }

    #[test]
    fn test_snapshot_summary() {
        let metrics = Metrics::new();
        metrics.increment("agent.dead");
        metrics.record_operation("agent.spawn", Duration::from_millis(1500));

        let summary = metrics.snapshot().summary();
        assert_eq!(summary.counters["agent.dead"], 1);
        assert_eq!(summary.operations["agent.spawn"].count, 1);
        assert_eq!(summary.operations["agent.spawn"].avg_ms, 1500);

        let json = serde_json::to_value(&summary).unwrap();
        assert!(json["operations"]["agent.spawn"]["p99_ms"].is_u64());
    }

    #[test]
    fn test_metrics_reset() {
        let metrics = Metrics::new();
        metrics.increment("x");
        metrics.record_operation("y", Duration::from_millis(1));
        metrics.reset();

        assert_eq!(metrics.counter("x"), 0);
        assert!(metrics.operation_metrics("y").is_none());
        assert!(metrics.snapshot().format_report().starts_with("Uptime"));
    }
}
