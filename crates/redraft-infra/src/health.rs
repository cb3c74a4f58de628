//! Service health monitor
//!
//! Periodically probes the inference endpoint (liveness, then model
//! availability) and every registered [`HealthCheck`]. The advertised status
//! comes from these probes and the breaker state, never from job metrics.

use chrono::{DateTime, Utc};
use redraft_core::{HealthCheck, InferenceClient};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::resilience::{CircuitBreaker, CircuitBreakerState};

pub const INFERENCE_COMPONENT: &str = "inference";
pub const MODEL_COMPONENT: &str = "model";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unavailable,
}

impl HealthStatus {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, HealthStatus::Unavailable)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub name: String,
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub latency_ms: u64,
}

impl ComponentHealth {
    fn healthy(name: &str, latency: Duration) -> Self {
        Self {
            name: name.to_string(),
            healthy: true,
            message: None,
            latency_ms: latency.as_millis() as u64,
        }
    }

    fn unhealthy(name: &str, message: impl Into<String>, latency: Duration) -> Self {
        Self {
            name: name.to_string(),
            healthy: false,
            message: Some(message.into()),
            latency_ms: latency.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub circuit_state: CircuitBreakerState,
    pub components: Vec<ComponentHealth>,
    pub checked_at: DateTime<Utc>,
}

impl HealthReport {
    pub fn component(&self, name: &str) -> Option<&ComponentHealth> {
        self.components.iter().find(|component| component.name == name)
    }

    /// Status implied by the probed components alone.
    ///
    /// Any failing component other than the model makes the service
    /// unavailable; a missing model only degrades it.
    fn probed_status(&self) -> HealthStatus {
        let mut status = HealthStatus::Healthy;
        for component in self.components.iter().filter(|c| !c.healthy) {
            if component.name == MODEL_COMPONENT {
                status = HealthStatus::Degraded;
            } else {
                return HealthStatus::Unavailable;
            }
        }
        status
    }

    /// Re-derive the status against a circuit state. A circuit that is not
    /// closed degrades an otherwise healthy service.
    fn with_circuit(mut self, circuit_state: CircuitBreakerState) -> Self {
        self.circuit_state = circuit_state;
        self.status = match self.probed_status() {
            HealthStatus::Healthy if circuit_state != CircuitBreakerState::Closed => {
                HealthStatus::Degraded
            }
            other => other,
        };
        self
    }
}

#[derive(Debug, Clone)]
pub struct HealthMonitorConfig {
    pub interval: Duration,
    pub probe_timeout: Duration,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(5),
        }
    }
}

impl From<&redraft_core::HealthConfig> for HealthMonitorConfig {
    fn from(config: &redraft_core::HealthConfig) -> Self {
        Self {
            interval: config.probe_interval(),
            probe_timeout: config.probe_timeout(),
        }
    }
}

#[derive(Clone)]
pub struct HealthMonitor {
    client: Arc<dyn InferenceClient>,
    model: String,
    breaker: CircuitBreaker,
    checks: Vec<Arc<dyn HealthCheck>>,
    config: HealthMonitorConfig,
    latest: Arc<RwLock<Option<HealthReport>>>,
}

impl HealthMonitor {
    pub fn new(
        client: Arc<dyn InferenceClient>,
        model: impl Into<String>,
        breaker: CircuitBreaker,
        config: HealthMonitorConfig,
    ) -> Self {
        Self {
            client,
            model: model.into(),
            breaker,
            checks: Vec::new(),
            config,
            latest: Arc::new(RwLock::new(None)),
        }
    }

    /// Register an extra dependency whose failure makes the service unavailable
    pub fn with_check(mut self, check: Arc<dyn HealthCheck>) -> Self {
        self.checks.push(check);
        self
    }

    async fn timed<T, E, Fut>(&self, fut: Fut) -> (Result<T, String>, Duration)
    where
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let started = Instant::now();
        let result = match tokio::time::timeout(self.config.probe_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(err.to_string()),
            Err(_) => Err(format!(
                "probe timed out after {} ms",
                self.config.probe_timeout.as_millis()
            )),
        };
        (result, started.elapsed())
    }

    /// Probe every component once and store the report
    pub async fn probe_now(&self) -> HealthReport {
        let mut components = Vec::with_capacity(self.checks.len() + 2);

        let (liveness, latency) = self.timed(self.client.liveness()).await;
        let reachable = liveness.is_ok();
        components.push(match liveness {
            Ok(()) => ComponentHealth::healthy(INFERENCE_COMPONENT, latency),
            Err(message) => ComponentHealth::unhealthy(INFERENCE_COMPONENT, message, latency),
        });

        if reachable {
            let (available, latency) = self.timed(self.client.model_available(&self.model)).await;
            components.push(match available {
                Ok(true) => ComponentHealth::healthy(MODEL_COMPONENT, latency),
                Ok(false) => ComponentHealth::unhealthy(
                    MODEL_COMPONENT,
                    format!("model '{}' is not available", self.model),
                    latency,
                ),
                Err(message) => ComponentHealth::unhealthy(MODEL_COMPONENT, message, latency),
            });
        } else {
            components.push(ComponentHealth::unhealthy(
                MODEL_COMPONENT,
                "inference endpoint unreachable",
                Duration::ZERO,
            ));
        }

        for check in &self.checks {
            let (result, latency) = self.timed(check.health_check()).await;
            components.push(match result {
                Ok(()) => ComponentHealth::healthy(check.component_name(), latency),
                Err(message) => ComponentHealth::unhealthy(check.component_name(), message, latency),
            });
        }

        let report = HealthReport {
            status: HealthStatus::Healthy,
            circuit_state: CircuitBreakerState::Closed,
            components,
            checked_at: Utc::now(),
        }
        .with_circuit(self.breaker.state().await);
        let status = report.status;

        let previous = self
            .latest
            .write()
            .await
            .replace(report.clone())
            .map(|previous| previous.status);

        match previous {
            Some(previous) if previous != status => {
                info!(from = ?previous, to = ?status, "Health status changed")
            }
            _ => debug!(status = ?status, "Health probe completed"),
        }
        if status.is_unavailable() {
            warn!(components = ?report.components, "Service unavailable");
        }

        report
    }

    /// Last stored report, if any probe has run
    pub async fn latest(&self) -> Option<HealthReport> {
        self.latest.read().await.clone()
    }

    /// Last stored report, probing first if none exists yet. The status is
    /// re-derived against the live circuit state on every call.
    pub async fn current(&self) -> HealthReport {
        match self.latest().await {
            Some(report) => report.with_circuit(self.breaker.state().await),
            None => self.probe_now().await,
        }
    }

    /// Start the background probe loop until `shutdown` fires
    pub fn start(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        let monitor = self.clone();
        let interval = self.config.interval;

        tokio::spawn(async move {
            loop {
                monitor.probe_now().await;

                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!("Health monitor stopped");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {}
                }
            }
        })
    }
}
