//! Lightweight in-process metrics.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use parking_lot::Mutex;

/// A monotonically increasing counter.
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    /// Increment by one.
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment by `n`.
    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    /// Current value.
    #[must_use]
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
struct HistogramData {
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
}

/// A histogram tracking count/sum/min/max of observed samples.
#[derive(Debug, Default)]
pub struct Histogram {
    inner: Mutex<HistogramData>,
}

impl Histogram {
    /// Record a sample.
    pub fn observe(&self, sample: f64) {
        let mut data = self.inner.lock();
        if data.count == 0 {
            data.min = sample;
            data.max = sample;
        } else {
            data.min = data.min.min(sample);
            data.max = data.max.max(sample);
        }
        data.count += 1;
        data.sum += sample;
    }

    /// Consistent snapshot of the histogram.
    #[must_use]
    pub fn snapshot(&self) -> HistogramSnapshot {
        let data = self.inner.lock();
        HistogramSnapshot {
            count: data.count,
            sum: data.sum,
            min: if data.count == 0 { 0.0 } else { data.min },
            max: if data.count == 0 { 0.0 } else { data.max },
        }
    }
}

/// Point-in-time view of a histogram.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistogramSnapshot {
    /// Number of samples observed.
    pub count: u64,
    /// Sum of all samples.
    pub sum: f64,
    /// Smallest sample (0.0 when empty).
    pub min: f64,
    /// Largest sample (0.0 when empty).
    pub max: f64,
}

impl HistogramSnapshot {
    /// Mean of observed samples (0.0 when empty).
    #[must_use]
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }
}

/// Registry of named counters and histograms.
///
/// Metrics are created on first use and shared; recording is non-blocking
/// (atomics for counters, a short uncontended lock for histograms).
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    counters: DashMap<String, Arc<Counter>>,
    histograms: DashMap<String, Arc<Histogram>>,
}

impl MetricsRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The counter with the given name, created on first use.
    #[must_use]
    pub fn counter(&self, name: &str) -> Arc<Counter> {
        self.counters
            .entry(name.to_string())
            .or_default()
            .clone()
    }

    /// The histogram with the given name, created on first use.
    #[must_use]
    pub fn histogram(&self, name: &str) -> Arc<Histogram> {
        self.histograms
            .entry(name.to_string())
            .or_default()
            .clone()
    }
}
