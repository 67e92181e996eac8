//! Metrics for the worker pool.

use std::time::Instant;

use opentelemetry::{
    metrics::{Counter, Histogram},
    KeyValue,
};

#[derive(Clone)]
pub struct DispatcherMetrics {
    /// Jobs handed to an idle worker.
    pub jobs_dispatched: Counter<u64>,

    /// Jobs whose run returned an error or panicked.
    pub jobs_failed: Counter<u64>,

    pub job_duration: Histogram<f64>,
}

impl DispatcherMetrics {
    pub fn new() -> Self {
        let meter = opentelemetry::global::meter("transfer-gateway-worker");

        let jobs_dispatched = meter
            .u64_counter("worker_jobs_dispatched_total")
            .with_description("Total number of jobs handed to a worker")
            .build();

        let jobs_failed = meter
            .u64_counter("worker_jobs_failed_total")
            .with_description("Total number of jobs that failed or panicked")
            .build();

        let job_duration = meter
            .f64_histogram("worker_job_duration_seconds")
            .with_description("Time spent running a single job in seconds")
            .build();

        Self {
            jobs_dispatched,
            jobs_failed,
            job_duration,
        }
    }
}

impl Default for DispatcherMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Records the elapsed time into a histogram when dropped.
pub struct Timer {
    start: Instant,
    histogram: Histogram<f64>,
    labels: Vec<KeyValue>,
}

impl Timer {
    pub fn start(histogram: &Histogram<f64>) -> Self {
        Self::start_with_labels(histogram, &[])
    }

    pub fn start_with_labels(histogram: &Histogram<f64>, labels: &[KeyValue]) -> Self {
        Self {
            start: Instant::now(),
            histogram: histogram.clone(),
            labels: labels.to_vec(),
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        self.histogram.record(duration, &self.labels);
    }
}
