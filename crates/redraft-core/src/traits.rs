//! Boundary traits implemented outside the core crate

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::InferenceError;

/// One generation request against the inference endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InferenceRequest {
    pub model: String,
    pub prompt: String,
}

impl InferenceRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
        }
    }
}

/// The inference endpoint as seen by the pipeline.
///
/// Implementations perform exactly one network exchange per call and supply
/// no retry or timeout of their own; failures must already be classified.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    /// Generate text for a prompt
    async fn generate(&self, request: &InferenceRequest) -> Result<String, InferenceError>;

    /// Lightweight liveness probe
    async fn liveness(&self) -> Result<(), InferenceError>;

    /// Whether the given model is loaded/available on the endpoint
    async fn model_available(&self, model: &str) -> Result<bool, InferenceError>;

    /// Provider name for logging
    fn provider_name(&self) -> &str;
}

/// A dependency the health monitor probes alongside the inference endpoint
#[async_trait]
pub trait HealthCheck: Send + Sync {
    /// Component name used in health reports
    fn component_name(&self) -> &str;

    /// Cheap round trip proving the component can serve requests
    async fn health_check(&self) -> Result<(), String>;
}
