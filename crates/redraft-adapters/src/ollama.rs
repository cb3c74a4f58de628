//! Ollama inference adapter
//!
//! One HTTP exchange per call against a local Ollama runtime. Every failure
//! is classified into an [`InferenceErrorKind`] here and nowhere else.
//! Timeouts for generation are enforced by the caller, so the HTTP client
//! only carries a connect timeout.

use async_trait::async_trait;
use redraft_core::{InferenceClient, InferenceConfig, InferenceError, InferenceErrorKind, InferenceRequest};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use crate::{AdapterError, AdapterResult};

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    done: bool,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

/// HTTP client for the Ollama API
pub struct OllamaClient {
    base_url: String,
    client: Client,
}

impl OllamaClient {
    pub fn new(base_url: impl Into<String>, connect_timeout: Duration) -> AdapterResult<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(AdapterError::Configuration(format!(
                "inference base_url must be an http(s) URL, got '{}'",
                base_url
            )));
        }

        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| AdapterError::Configuration(e.to_string()))?;

        Ok(Self { base_url, client })
    }

    pub fn from_config(config: &InferenceConfig) -> AdapterResult<Self> {
        let client = Self::new(config.base_url.as_str(), config.connect_timeout())?;
        info!(base_url = %client.base_url, model = %config.model, "Ollama client configured");
        Ok(client)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// Classify a transport-level failure
fn classify_transport(err: reqwest::Error) -> InferenceError {
    if err.is_timeout() {
        InferenceError::timeout(err.to_string())
    } else if err.is_decode() {
        InferenceError::malformed(err.to_string())
    } else {
        // Refused, reset, or dropped mid-exchange.
        InferenceError::connection_refused(err.to_string())
    }
}

/// Classify a non-success HTTP status using the body Ollama sends with it
fn classify_status(status: StatusCode, body: &str) -> InferenceError {
    let message = serde_json::from_str::<ErrorBody>(body)
        .map(|body| body.error)
        .unwrap_or_else(|_| body.trim().to_string());
    let detail = format!("HTTP {}: {}", status.as_u16(), message);

    let lower = message.to_ascii_lowercase();
    if status == StatusCode::NOT_FOUND || (lower.contains("model") && lower.contains("not found")) {
        InferenceError::model_not_found(detail)
    } else if status.is_server_error() {
        InferenceError::new(InferenceErrorKind::ServerUnavailable, detail)
    } else {
        InferenceError::new(InferenceErrorKind::RequestRejected, detail)
    }
}

/// `llama3` matches `llama3:latest`; a tagged name must match exactly
fn model_matches(requested: &str, installed: &str) -> bool {
    if requested.contains(':') {
        requested == installed
    } else {
        installed == requested || installed == format!("{}:latest", requested)
    }
}

#[async_trait]
impl InferenceClient for OllamaClient {
    async fn generate(&self, request: &InferenceRequest) -> Result<String, InferenceError> {
        let url = self.url("/api/generate");
        debug!(
            model = %request.model,
            prompt_chars = request.prompt.chars().count(),
            "Sending generate request to Ollama"
        );

        let response = self
            .client
            .post(&url)
            .json(&GenerateRequest {
                model: &request.model,
                prompt: &request.prompt,
                stream: false,
            })
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        let body = response.text().await.map_err(classify_transport)?;

        if !status.is_success() {
            return Err(classify_status(status, &body));
        }

        let parsed: GenerateResponse = serde_json::from_str(&body)
            .map_err(|e| InferenceError::malformed(format!("invalid generate response: {}", e)))?;

        if let Some(error) = parsed.error {
            return Err(classify_status(StatusCode::INTERNAL_SERVER_ERROR, &error));
        }
        if !parsed.done {
            debug!("Ollama reported an unfinished generation");
        }

        match parsed.response {
            Some(text) if !text.trim().is_empty() => Ok(text),
            _ => Err(InferenceError::malformed("generate response has no text")),
        }
    }

    async fn liveness(&self) -> Result<(), InferenceError> {
        let response = self
            .client
            .get(self.url("/api/version"))
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(classify_status(status, &body))
        }
    }

    async fn model_available(&self, model: &str) -> Result<bool, InferenceError> {
        let response = self
            .client
            .get(self.url("/api/tags"))
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        let body = response.text().await.map_err(classify_transport)?;
        if !status.is_success() {
            return Err(classify_status(status, &body));
        }

        let tags: TagsResponse = serde_json::from_str(&body)
            .map_err(|e| InferenceError::malformed(format!("invalid tags response: {}", e)))?;

        Ok(tags
            .models
            .iter()
            .any(|entry| model_matches(model, &entry.name)))
    }

    fn provider_name(&self) -> &str {
        "ollama"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_matching() {
        assert!(model_matches("llama3", "llama3:latest"));
        assert!(model_matches("llama3", "llama3"));
        assert!(!model_matches("llama3", "llama3:8b"));
        assert!(model_matches("llama3:8b", "llama3:8b"));
        assert!(!model_matches("llama3:8b", "llama3:latest"));
    }

    #[test]
    fn test_status_classification() {
        let not_found = classify_status(
            StatusCode::NOT_FOUND,
            r#"{"error":"model 'llama9' not found, try pulling it first"}"#,
        );
        assert_eq!(not_found.kind, InferenceErrorKind::ModelNotFound);
        assert!(not_found.message.contains("llama9"));

        let unavailable = classify_status(StatusCode::SERVICE_UNAVAILABLE, "overloaded");
        assert_eq!(unavailable.kind, InferenceErrorKind::ServerUnavailable);

        let rejected = classify_status(StatusCode::BAD_REQUEST, r#"{"error":"invalid options"}"#);
        assert_eq!(rejected.kind, InferenceErrorKind::RequestRejected);

        let hidden = classify_status(
            StatusCode::INTERNAL_SERVER_ERROR,
            r#"{"error":"model \"x\" not found"}"#,
        );
        assert_eq!(hidden.kind, InferenceErrorKind::ModelNotFound);
    }

    #[test]
    fn test_rejects_non_http_base_url() {
        let result = OllamaClient::new("localhost:11434", Duration::from_secs(1));
        assert!(matches!(result, Err(AdapterError::Configuration(_))));
    }

    #[test]
    fn test_trailing_slash_is_trimmed() {
        let client = OllamaClient::new("http://localhost:11434/", Duration::from_secs(1)).unwrap();
        assert_eq!(client.url("/api/generate"), "http://localhost:11434/api/generate");
    }
}
