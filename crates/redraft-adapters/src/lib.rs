//! Inference endpoint adapters for Redraft.
//!
//! Each adapter implements [`redraft_core::InferenceClient`] for one backend
//! and owns the mapping from its transport errors to
//! [`redraft_core::InferenceErrorKind`].

pub mod ollama;

pub use ollama::OllamaClient;

use std::sync::Arc;
use thiserror::Error;

use redraft_core::{InferenceClient, InferenceConfig};

#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("Configuration error: {0}")]
    Configuration(String),
}

pub type AdapterResult<T> = Result<T, AdapterError>;

/// Build the inference client described by the configuration
pub fn inference_client(config: &InferenceConfig) -> AdapterResult<Arc<dyn InferenceClient>> {
    Ok(Arc::new(OllamaClient::from_config(config)?))
}
