//! Metrics registry for consolidation observability
//!
//! Provides OpenTelemetry metrics for:
//! - Actions performed (delete-empty, delete, replace)
//! - Nodes terminated and created by consolidation
//! - Evaluation and replacement-readiness timings
//!
//! Counters are process-wide with one-time lazy initialization and monotonic
//! updates; there is no teardown.

use once_cell::sync::Lazy;
use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::KeyValue;

/// Global meter for consolidation metrics
static METER: Lazy<Meter> = Lazy::new(|| global::meter("defrag"));

/// Counter of consolidation actions performed
///
/// Labels:
/// - `action`: delete-empty, delete, replace
pub static ACTIONS_PERFORMED: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("consolidation_actions_performed_total")
        .with_description("Total number of consolidation actions performed")
        .with_unit("{actions}")
        .build()
});

/// Counter of nodes terminated by consolidation
pub static NODES_TERMINATED: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("consolidation_nodes_terminated_total")
        .with_description("Total number of nodes terminated by consolidation")
        .with_unit("{nodes}")
        .build()
});

/// Counter of replacement nodes created by consolidation
pub static NODES_CREATED: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("consolidation_nodes_created_total")
        .with_description("Total number of replacement nodes created by consolidation")
        .with_unit("{nodes}")
        .build()
});

/// Histogram of consolidation evaluation duration
///
/// Labels:
/// - `method`: the evaluation path (e.g. "replace/delete")
pub static DURATION: Lazy<Histogram<f64>> = Lazy::new(|| {
    METER
        .f64_histogram("consolidation_duration_seconds")
        .with_description("Duration of consolidation evaluation in seconds")
        .with_unit("s")
        .build()
});

/// Histogram of time until a replacement node reports initialized
pub static REPLACEMENT_INITIALIZED: Lazy<Histogram<f64>> = Lazy::new(|| {
    METER
        .f64_histogram("consolidation_replacement_node_initialized_seconds")
        .with_description("Time from launch until a replacement node initializes")
        .with_unit("s")
        .build()
});

/// Record one performed action by label.
pub fn record_action(action: &str) {
    ACTIONS_PERFORMED.add(1, &[KeyValue::new("action", action.to_string())]);
}

/// Times a region of code into a histogram on drop.
pub struct MeasuredRegion {
    histogram: &'static Lazy<Histogram<f64>>,
    labels: Vec<KeyValue>,
    start: std::time::Instant,
}

impl MeasuredRegion {
    /// Start timing against the given histogram.
    pub fn start(histogram: &'static Lazy<Histogram<f64>>, labels: Vec<KeyValue>) -> Self {
        Self {
            histogram,
            labels,
            start: std::time::Instant::now(),
        }
    }
}

impl Drop for MeasuredRegion {
    fn drop(&mut self) {
        self.histogram
            .record(self.start.elapsed().as_secs_f64(), &self.labels);
    }
}

/// Time the evaluation of a candidate through the given method label.
pub fn measure_evaluation(method: &str) -> MeasuredRegion {
    MeasuredRegion::start(&DURATION, vec![KeyValue::new("method", method.to_string())])
}

/// Time a replacement launch until initialization.
pub fn measure_replacement_initialization() -> MeasuredRegion {
    MeasuredRegion::start(&REPLACEMENT_INITIALIZED, Vec::new())
}
