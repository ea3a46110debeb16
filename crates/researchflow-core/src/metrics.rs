use once_cell::sync::OnceCell;
use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::{KeyValue, global};
use tracing::info;

use crate::error::Phase;

struct PipelineMetrics {
    runs: Counter<u64>,
    phase_failures: Counter<u64>,
    phase_duration_ms: Histogram<f64>,
    cancelled_searches: Counter<u64>,
}

static METRICS: OnceCell<PipelineMetrics> = OnceCell::new();

fn handles() -> &'static PipelineMetrics {
    METRICS.get_or_init(|| {
        let meter: Meter = global::meter("researchflow.pipeline");
        PipelineMetrics {
            runs: meter
                .u64_counter("research_runs_total")
                .with_description("Research runs by mode and outcome")
                .init(),
            phase_failures: meter
                .u64_counter("research_phase_failures_total")
                .with_description("Runs that failed, by phase")
                .init(),
            phase_duration_ms: meter
                .f64_histogram("research_phase_duration_ms")
                .with_description("Phase wall-clock time in milliseconds")
                .init(),
            cancelled_searches: meter
                .u64_counter("research_cancelled_searches_total")
                .with_description("In-flight searches aborted because the consumer went away")
                .init(),
        }
    })
}

/// Hint to operators that OTEL metrics export can be configured externally.
pub fn init_metrics_from_env(service_name: &str) {
    if std::env::var("RESEARCHFLOW_OTEL_METRICS_ENDPOINT").is_ok() {
        info!(
            target = "telemetry",
            "RESEARCHFLOW_OTEL_METRICS_ENDPOINT detected for {service_name}. Configure an OTLP meter provider in your deployment to export pipeline metrics."
        );
    }
}

/// Run outcome labels: `completed`, `failed`, `cancelled`.
pub fn record_run(mode: &'static str, outcome: &'static str) {
    handles().runs.add(
        1,
        &[KeyValue::new("mode", mode), KeyValue::new("outcome", outcome)],
    );
}

pub fn record_phase_failure(phase: Phase) {
    handles()
        .phase_failures
        .add(1, &[KeyValue::new("phase", phase.as_str())]);
}

pub fn record_phase_duration(phase: Phase, duration_ms: u64) {
    handles()
        .phase_duration_ms
        .record(duration_ms as f64, &[KeyValue::new("phase", phase.as_str())]);
}

pub fn record_cancelled_searches(count: usize) {
    if count > 0 {
        handles().cancelled_searches.add(count as u64, &[]);
    }
}
