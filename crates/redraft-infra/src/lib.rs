//! Resilient invocation layer for Redraft.
//!
//! Everything between a list of chunks and a [`redraft_core::JobResult`]:
//! timeout budgets, retry, the circuit breaker, the inference bulkhead, the
//! bounded scheduler, and the health/metrics surface observing them.

pub mod health;
pub mod metrics;
pub mod resilience;
pub mod scheduler;

pub use health::{
    ComponentHealth, HealthMonitor, HealthMonitorConfig, HealthReport, HealthStatus,
};

pub use resilience::{
    Bulkhead, BulkheadConfig, BulkheadError, BulkheadSnapshot, ChunkSuccess, CircuitBreaker,
    CircuitBreakerConfig, CircuitBreakerState, CircuitSnapshot, InvocationError,
    ResilientInvoker, RetryConfig, RetryPolicy, TimeoutPolicy,
};

pub use metrics::{render_prometheus, JobTracking, MetricsSnapshot, MetricsTracker};

pub use scheduler::BoundedScheduler;
