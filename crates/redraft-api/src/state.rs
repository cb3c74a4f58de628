use std::sync::Arc;
use std::time::Duration;

use redraft_infra::{Bulkhead, CircuitBreaker, HealthMonitor, MetricsTracker};
use redraft_ingestion::{OptimizationPipeline, UploadValidator};

/// Shared state behind every route
#[derive(Clone)]
pub struct AppState {
    pub validator: Arc<UploadValidator>,
    pub pipeline: Arc<OptimizationPipeline>,
    pub health: HealthMonitor,
    /// Upper bound on one optimize job, after which it is cancelled
    pub request_timeout: Duration,
    /// Prefix for Prometheus metric names
    pub metrics_prefix: String,
}

impl AppState {
    pub fn new(
        validator: Arc<UploadValidator>,
        pipeline: Arc<OptimizationPipeline>,
        health: HealthMonitor,
        request_timeout: Duration,
    ) -> Self {
        Self {
            validator,
            pipeline,
            health,
            request_timeout,
            metrics_prefix: "redraft".to_string(),
        }
    }

    pub fn with_metrics_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.metrics_prefix = prefix.into();
        self
    }

    pub fn metrics(&self) -> &MetricsTracker {
        self.pipeline.metrics()
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        self.pipeline.scheduler().invoker().breaker()
    }

    pub fn bulkhead(&self) -> &Bulkhead {
        self.pipeline.scheduler().invoker().bulkhead()
    }
}
