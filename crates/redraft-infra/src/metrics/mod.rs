//! Job metrics and their Prometheus exposition

pub mod prometheus;
pub mod tracker;

pub use prometheus::{render_prometheus, PrometheusRenderer};
pub use tracker::{FailureRecord, JobTracking, MetricsSnapshot, MetricsTracker};
