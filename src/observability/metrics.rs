//! OpenTelemetry metrics for the execution core.
//!
//! Key metrics:
//! - crudstream_tasks_total: Counter of finished tasks by kind and outcome
//! - crudstream_task_duration_seconds: Histogram of task run time
//! - crudstream_rows_delivered_total: Counter of rows handed to consumers
//! - crudstream_implicit_rollbacks_total: Counter of safety-net rollbacks

use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::{global, KeyValue};
use opentelemetry_sdk::metrics::{ManualReader, SdkMeterProvider};
use std::sync::OnceLock;

/// Global metrics instance.
static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Crudstream metrics registry.
#[derive(Debug)]
pub struct Metrics {
    /// Finished execution tasks.
    pub tasks_total: Counter<u64>,
    /// Task run time in seconds.
    pub task_duration: Histogram<f64>,
    /// Rows delivered to consumers.
    pub rows_delivered: Counter<u64>,
    /// Transactions rolled back because they were released while open.
    pub implicit_rollbacks: Counter<u64>,
}

impl Metrics {
    fn new(meter: &Meter) -> Self {
        Self {
            tasks_total: meter
                .u64_counter("crudstream_tasks_total")
                .with_description("Finished execution tasks by kind and outcome")
                .with_unit("1")
                .init(),
            task_duration: meter
                .f64_histogram("crudstream_task_duration_seconds")
                .with_description("Execution task run time from start to terminal signal")
                .with_unit("s")
                .init(),
            rows_delivered: meter
                .u64_counter("crudstream_rows_delivered_total")
                .with_description("Rows delivered to consumers")
                .with_unit("1")
                .init(),
            implicit_rollbacks: meter
                .u64_counter("crudstream_implicit_rollbacks_total")
                .with_description("Transactions rolled back on release without a decision")
                .with_unit("1")
                .init(),
        }
    }
}

/// Initialize the metrics system.
///
/// Metrics are recorded into a manual reader and are not exported. This
/// should be called once at startup. Subsequent calls are ignored.
pub fn init_metrics() {
    METRICS.get_or_init(|| {
        let reader = ManualReader::builder().build();
        let provider = SdkMeterProvider::builder().with_reader(reader).build();
        global::set_meter_provider(provider);

        let meter = global::meter("crudstream");
        Metrics::new(&meter)
    });
}

/// Get the global metrics instance, if initialized.
pub fn metrics() -> Option<&'static Metrics> {
    METRICS.get()
}

/// Record a finished execution task.
pub fn record_task(kind: &'static str, outcome: &'static str, seconds: f64) {
    if let Some(m) = METRICS.get() {
        let attrs = [KeyValue::new("kind", kind), KeyValue::new("outcome", outcome)];
        m.tasks_total.add(1, &attrs);
        m.task_duration.record(seconds, &attrs[..1]);
    }
}

/// Record rows delivered by one task.
pub fn record_rows(kind: &'static str, rows: u64) {
    if let Some(m) = METRICS.get() {
        m.rows_delivered.add(rows, &[KeyValue::new("kind", kind)]);
    }
}

/// Record a safety-net rollback.
pub fn record_implicit_rollback() {
    if let Some(m) = METRICS.get() {
        m.implicit_rollbacks.add(1, &[]);
    }
}
