//! Thread-safe metrics registry: counters and histograms keyed by name and
//! label set, rendered in the Prometheus text exposition format.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::{PoisonError, RwLock};

use serde::Serialize;

/// A metric name plus its sorted label pairs.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
struct MetricKey {
    name: String,
    labels: Vec<(String, String)>,
}

impl MetricKey {
    fn new(name: &str, labels: &[(&str, &str)]) -> Self {
        let mut labels: Vec<(String, String)> = labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        labels.sort();
        Self {
            name: name.to_string(),
            labels,
        }
    }

    fn render_labels(&self) -> String {
        if self.labels.is_empty() {
            return String::new();
        }
        let inner = self
            .labels
            .iter()
            .map(|(k, v)| format!("{k}=\"{}\"", v.replace('\\', "\\\\").replace('"', "\\\"")))
            .collect::<Vec<_>>()
            .join(",");
        format!("{{{inner}}}")
    }
}

/// Aggregated observations of one histogram series.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct HistogramSnapshot {
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
}

impl HistogramSnapshot {
    fn observe(&mut self, value: f64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.count += 1;
        self.sum += value;
    }
}

/// The metrics registry.
///
/// Constructed once at bootstrap and shared as `Arc<MetricsRegistry>` with
/// every component that emits metrics.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    counters: RwLock<BTreeMap<MetricKey, u64>>,
    histograms: RwLock<BTreeMap<MetricKey, HistogramSnapshot>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `by` to a counter.
    pub fn increment(&self, name: &str, by: u64, labels: &[(&str, &str)]) {
        let mut counters = self.counters.write().unwrap_or_else(PoisonError::into_inner);
        *counters.entry(MetricKey::new(name, labels)).or_default() += by;
        tracing::trace!(metric = name, by, "counter incremented");
    }

    /// Record one histogram observation.
    pub fn observe(&self, name: &str, value: f64, labels: &[(&str, &str)]) {
        let mut histograms = self.histograms.write().unwrap_or_else(PoisonError::into_inner);
        histograms
            .entry(MetricKey::new(name, labels))
            .or_default()
            .observe(value);
        tracing::trace!(metric = name, value, "histogram observed");
    }

    /// Current value of a counter series (0 if never incremented).
    pub fn counter(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        let counters = self.counters.read().unwrap_or_else(PoisonError::into_inner);
        counters.get(&MetricKey::new(name, labels)).copied().unwrap_or(0)
    }

    /// Sum of a counter over every label set.
    pub fn counter_total(&self, name: &str) -> u64 {
        let counters = self.counters.read().unwrap_or_else(PoisonError::into_inner);
        counters
            .iter()
            .filter(|(k, _)| k.name == name)
            .map(|(_, v)| *v)
            .sum()
    }

    pub fn histogram(&self, name: &str, labels: &[(&str, &str)]) -> Option<HistogramSnapshot> {
        let histograms = self.histograms.read().unwrap_or_else(PoisonError::into_inner);
        histograms.get(&MetricKey::new(name, labels)).copied()
    }

    /// Prometheus text exposition. Histograms are exposed as summaries
    /// (`_sum` and `_count`).
    pub fn render_prometheus(&self) -> String {
        let mut out = String::new();

        let counters = self.counters.read().unwrap_or_else(PoisonError::into_inner);
        let mut last_name: Option<&str> = None;
        for (key, value) in counters.iter() {
            if last_name != Some(key.name.as_str()) {
                let _ = writeln!(out, "# TYPE {} counter", key.name);
                last_name = Some(key.name.as_str());
            }
            let _ = writeln!(out, "{}{} {}", key.name, key.render_labels(), value);
        }
        drop(counters);

        let histograms = self.histograms.read().unwrap_or_else(PoisonError::into_inner);
        let mut last_name: Option<&str> = None;
        for (key, snapshot) in histograms.iter() {
            if last_name != Some(key.name.as_str()) {
                let _ = writeln!(out, "# TYPE {} summary", key.name);
                last_name = Some(key.name.as_str());
            }
            let labels = key.render_labels();
            let _ = writeln!(out, "{}_sum{} {}", key.name, labels, snapshot.sum);
            let _ = writeln!(out, "{}_count{} {}", key.name, labels, snapshot.count);
        }

        out
    }
}
