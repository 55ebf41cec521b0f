//! Metrics for artifact ingestion.

use std::time::Instant;

use opentelemetry::{
    metrics::{Counter, Histogram, Meter},
    KeyValue,
};

#[derive(Clone)]
pub struct IngestMetrics {
    /// Ingestion latency in seconds, labelled by outcome.
    pub ingestions: Histogram<f64>,

    /// Failed ingestions, labelled by error kind.
    pub errors: Counter<u64>,

    /// Bytes written by successful ingestions.
    pub bytes: Counter<u64>,
}

impl IngestMetrics {
    pub fn new(meter: &Meter) -> Self {
        let ingestions = meter
            .f64_histogram("artifact_ingest_duration_seconds")
            .with_description("Duration of artifact ingestions in seconds")
            .build();

        let errors = meter
            .u64_counter("artifact_ingest_errors_total")
            .with_description("Total number of failed artifact ingestions")
            .build();

        let bytes = meter
            .u64_counter("artifact_ingest_bytes_total")
            .with_description("Total bytes of ingested artifacts")
            .build();

        Self {
            ingestions,
            errors,
            bytes,
        }
    }
}

/// Records elapsed time into a histogram when dropped.
///
/// The `outcome` label is `"error"` unless [`Timer::succeeded`] was called,
/// so early returns and cancellations are counted as failures.
pub struct Timer {
    start: Instant,
    histogram: Histogram<f64>,
    labels: Vec<KeyValue>,
    succeeded: bool,
}

impl Timer {
    pub fn start(histogram: &Histogram<f64>, labels: &[KeyValue]) -> Self {
        Self {
            start: Instant::now(),
            histogram: histogram.clone(),
            labels: labels.to_vec(),
            succeeded: false,
        }
    }

    pub fn succeeded(&mut self) {
        self.succeeded = true;
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        let outcome = if self.succeeded { "success" } else { "error" };
        self.labels.push(KeyValue::new("outcome", outcome));
        self.histogram
            .record(self.start.elapsed().as_secs_f64(), &self.labels);
    }
}
