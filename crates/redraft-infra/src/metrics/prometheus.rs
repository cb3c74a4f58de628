//! Prometheus text exposition
//!
//! Renders the tracker snapshot together with the circuit breaker and
//! bulkhead state in the Prometheus text format.

use std::fmt::Display;

use crate::metrics::tracker::MetricsSnapshot;
use crate::resilience::{BulkheadSnapshot, CircuitSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MetricKind {
    Counter,
    Gauge,
}

impl MetricKind {
    fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
        }
    }
}

/// Prometheus text writer bound to a metric name prefix
pub struct PrometheusRenderer {
    prefix: String,
    output: String,
}

impl PrometheusRenderer {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            output: String::new(),
        }
    }

    fn metric(&mut self, name: &str, kind: MetricKind, help: &str, value: impl Display) {
        let full = format!("{}_{}", self.prefix, name);
        self.output
            .push_str(&format!("# HELP {} {}\n", full, help));
        self.output
            .push_str(&format!("# TYPE {} {}\n", full, kind.as_str()));
        self.output.push_str(&format!("{} {}\n", full, value));
    }

    pub fn jobs(mut self, metrics: &MetricsSnapshot) -> Self {
        self.metric(
            "jobs_started_total",
            MetricKind::Counter,
            "Optimization jobs started",
            metrics.jobs_started,
        );
        self.metric(
            "jobs_succeeded_total",
            MetricKind::Counter,
            "Optimization jobs completed successfully",
            metrics.jobs_succeeded,
        );
        self.metric(
            "jobs_failed_total",
            MetricKind::Counter,
            "Optimization jobs that ended in an error",
            metrics.jobs_failed,
        );
        self.metric(
            "jobs_cancelled_total",
            MetricKind::Counter,
            "Optimization jobs abandoned by the caller",
            metrics.jobs_cancelled,
        );
        self.metric(
            "jobs_active",
            MetricKind::Gauge,
            "Optimization jobs currently running",
            metrics.active_jobs,
        );
        self.metric(
            "job_processing_milliseconds_avg",
            MetricKind::Gauge,
            "Rolling mean processing time of successful jobs",
            metrics.average_processing_ms,
        );
        self.metric(
            "chunks_processed_total",
            MetricKind::Counter,
            "Chunks rewritten by successful jobs",
            metrics.chunks_processed,
        );
        self.metric(
            "inference_attempts_total",
            MetricKind::Counter,
            "Inference calls issued",
            metrics.total_attempts,
        );
        self.metric(
            "inference_retryable_failures_total",
            MetricKind::Counter,
            "Inference calls that failed with a retryable error",
            metrics.retryable_failures,
        );
        self.metric(
            "inference_fatal_failures_total",
            MetricKind::Counter,
            "Inference calls that failed with a fatal error",
            metrics.fatal_failures,
        );
        self.metric(
            "process_uptime_seconds",
            MetricKind::Gauge,
            "Process uptime in seconds",
            metrics.uptime_secs,
        );
        self.metric(
            "process_start_time_seconds",
            MetricKind::Gauge,
            "Process start time as Unix timestamp",
            metrics.started_at.timestamp(),
        );
        self
    }

    pub fn circuit(mut self, circuit: &CircuitSnapshot) -> Self {
        self.metric(
            "circuit_breaker_state",
            MetricKind::Gauge,
            "Circuit breaker state (0=closed, 1=half-open, 2=open)",
            circuit.state.as_gauge(),
        );
        self.metric(
            "circuit_breaker_consecutive_failures",
            MetricKind::Gauge,
            "Consecutive failures recorded by the circuit breaker",
            circuit.consecutive_failures,
        );
        self.metric(
            "circuit_breaker_rejected_total",
            MetricKind::Counter,
            "Calls rejected while the circuit was open",
            circuit.rejected_calls,
        );
        self
    }

    pub fn bulkhead(mut self, bulkhead: &BulkheadSnapshot) -> Self {
        self.metric(
            "inference_slots",
            MetricKind::Gauge,
            "Maximum concurrent inference calls",
            bulkhead.max_concurrent,
        );
        self.metric(
            "inference_in_flight",
            MetricKind::Gauge,
            "Inference calls currently in flight",
            bulkhead.in_flight,
        );
        self.metric(
            "inference_queued",
            MetricKind::Gauge,
            "Inference calls waiting for a slot",
            bulkhead.waiting,
        );
        self
    }

    pub fn finish(self) -> String {
        self.output
    }
}

/// Render everything the service exposes in one document
pub fn render_prometheus(
    prefix: &str,
    metrics: &MetricsSnapshot,
    circuit: &CircuitSnapshot,
    bulkhead: &BulkheadSnapshot,
) -> String {
    PrometheusRenderer::new(prefix)
        .jobs(metrics)
        .circuit(circuit)
        .bulkhead(bulkhead)
        .finish()
}
