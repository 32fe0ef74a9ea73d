use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Snapshot of a [`PerformanceTracker`]. Durations are in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetric {
    pub last_duration_ms: f64,
    pub running_average_duration_ms: f64,
    pub sample_count: u64,
}

/// Cumulative mean of observed durations, updated without keeping history.
///
/// Every measurement point (the scheduler's compute step, each renderer)
/// owns its own tracker; there is no aggregation across owners.
#[derive(Debug, Clone, Default)]
pub struct PerformanceTracker {
    metric: PerformanceMetric,
}

impl PerformanceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, duration: Duration) {
        self.record_ms(duration.as_secs_f64() * 1_000.0);
    }

    pub fn record_ms(&mut self, duration_ms: f64) {
        let metric = &mut self.metric;
        metric.last_duration_ms = duration_ms;
        metric.sample_count += 1;
        let n = metric.sample_count as f64;
        metric.running_average_duration_ms =
            (metric.running_average_duration_ms * (n - 1.0) + duration_ms) / n;
    }

    /// Runs `f`, records how long it took and hands back its result.
    pub fn measure<T>(&mut self, f: impl FnOnce() -> T) -> T {
        let start = Instant::now();
        let value = f();
        self.record(start.elapsed());
        value
    }

    pub fn metric(&self) -> PerformanceMetric {
        self.metric
    }

    pub fn last_duration_ms(&self) -> f64 {
        self.metric.last_duration_ms
    }

    pub fn average_duration_ms(&self) -> f64 {
        self.metric.running_average_duration_ms
    }

    pub fn sample_count(&self) -> u64 {
        self.metric.sample_count
    }

    pub fn reset(&mut self) {
        self.metric = PerformanceMetric::default();
    }
}
