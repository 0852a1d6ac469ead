//! Metrics & Monitoring
//!
//! RED (Rate, Errors, Duration) metrics for agent operations:
//! request outcomes, synthesis attempts, sandbox executions.
//!
//! The collector is an explicitly constructed instance owned by the
//! process entry point and handed to the components that need it.

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;

/// Histogram summary for a metric series
#[derive(Debug, Clone, Serialize)]
pub struct HistogramSummary {
    pub count: usize,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
    pub p50: f64,
    pub p95: f64,
}

/// Snapshot of all metrics at a point in time
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub counters: HashMap<String, u64>,
    pub histograms: HashMap<String, HistogramSummary>,
    pub gauges: HashMap<String, f64>,
    pub timestamp: String,
}

#[derive(Default)]
struct Inner {
    counters: HashMap<String, u64>,
    histograms: HashMap<String, Vec<f64>>,
    gauges: HashMap<String, f64>,
}

/// Metrics collector for agent operations
#[derive(Default)]
pub struct MetricsCollector {
    inner: Mutex<Inner>,
}

impl MetricsCollector {
    /// Create a new collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment a counter metric
    pub fn increment_counter(&self, name: &str, labels: &[(&str, &str)]) {
        let key = make_key(name, labels);
        *self.inner.lock().counters.entry(key).or_insert(0) += 1;
    }

    /// Record a histogram observation
    pub fn record_histogram(&self, name: &str, value: f64, labels: &[(&str, &str)]) {
        let key = make_key(name, labels);
        self.inner.lock().histograms.entry(key).or_default().push(value);
    }

    /// Set a gauge value
    pub fn set_gauge(&self, name: &str, value: f64, labels: &[(&str, &str)]) {
        let key = make_key(name, labels);
        self.inner.lock().gauges.insert(key, value);
    }

    /// Record one top-level request (RED pattern)
    pub fn record_request(&self, status: &str, duration_ms: f64) {
        self.increment_counter("requests_total", &[("status", status)]);
        self.record_histogram("request_duration_ms", duration_ms, &[("status", status)]);

        if status == "error" {
            self.increment_counter("errors_total", &[]);
        }
    }

    /// Record a synthesis attempt
    pub fn record_synthesis(&self, success: bool, duration_ms: f64) {
        let status = if success { "success" } else { "failure" };
        self.increment_counter("synthesis_total", &[("status", status)]);
        self.record_histogram("synthesis_duration_ms", duration_ms, &[]);
    }

    /// Record a sandbox execution
    pub fn record_execution(&self, capability_id: &str, success: bool, duration_ms: f64) {
        let status = if success { "success" } else { "failure" };
        self.increment_counter(
            "executions_total",
            &[("capability", capability_id), ("status", status)],
        );
        self.record_histogram("execution_duration_ms", duration_ms, &[("capability", capability_id)]);
    }

    /// Snapshot all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        let inner = self.inner.lock();

        let histograms = inner
            .histograms
            .iter()
            .filter_map(|(k, v)| summarize(v).map(|s| (k.clone(), s)))
            .collect();

        MetricsSnapshot {
            counters: inner.counters.clone(),
            histograms,
            gauges: inner.gauges.clone(),
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    /// Reset all metrics
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.counters.clear();
        inner.histograms.clear();
        inner.gauges.clear();
    }
}

fn summarize(values: &[f64]) -> Option<HistogramSummary> {
    if values.is_empty() {
        return None;
    }

    let mut sorted: Vec<f64> = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let count = sorted.len();
    let idx = |q: f64| sorted[((count as f64 * q) as usize).min(count - 1)];

    Some(HistogramSummary {
        count,
        sum: sorted.iter().sum(),
        min: sorted[0],
        max: sorted[count - 1],
        p50: idx(0.5),
        p95: idx(0.95),
    })
}

fn make_key(name: &str, labels: &[(&str, &str)]) -> String {
    if labels.is_empty() {
        return name.to_string();
    }

    let mut sorted: Vec<_> = labels.to_vec();
    sorted.sort();
    let label_str = sorted
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",");
    format!("{}{{{}}}", name, label_str)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_with_labels() {
        let metrics = MetricsCollector::new();
        metrics.record_request("success", 12.0);
        metrics.record_request("success", 40.0);
        metrics.record_request("error", 5.0);

        let snap = metrics.snapshot();
        assert_eq!(snap.counters["requests_total{status=success}"], 2);
        assert_eq!(snap.counters["requests_total{status=error}"], 1);
        assert_eq!(snap.counters["errors_total"], 1);
    }

    #[test]
    fn test_histogram_summary() {
        let metrics = MetricsCollector::new();
        for v in [10.0, 20.0, 30.0, 40.0] {
            metrics.record_histogram("latency_ms", v, &[]);
        }

        let snap = metrics.snapshot();
        let hist = &snap.histograms["latency_ms"];
        assert_eq!(hist.count, 4);
        assert_eq!(hist.min, 10.0);
        assert_eq!(hist.max, 40.0);
        assert_eq!(hist.sum, 100.0);
    }

    #[test]
    fn test_reset() {
        let metrics = MetricsCollector::new();
        metrics.increment_counter("x", &[]);
        metrics.reset();
        assert!(metrics.snapshot().counters.is_empty());
    }
}
