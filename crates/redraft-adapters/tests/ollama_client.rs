//! Ollama adapter against a mocked Ollama HTTP server.
//!
//! Covers the generate round trip, the liveness and model probes, and the
//! classification of each failure mode into an `InferenceErrorKind`.

use std::time::Duration;

use redraft_adapters::OllamaClient;
use redraft_core::{InferenceClient, InferenceErrorKind, InferenceRequest};
use serde_json::json;
use wiremock::{
    matchers::{body_partial_json, method, path},
    Mock, MockServer, ResponseTemplate,
};

fn client(server: &MockServer) -> OllamaClient {
    OllamaClient::new(server.uri(), Duration::from_secs(2)).unwrap()
}

fn request() -> InferenceRequest {
    InferenceRequest::new("llama3", "Rewrite this paragraph.")
}

#[tokio::test]
async fn generate_returns_response_text() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .and(body_partial_json(json!({
            "model": "llama3",
            "prompt": "Rewrite this paragraph.",
            "stream": false
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "llama3",
            "response": "A clearer paragraph.",
            "done": true
        })))
        .expect(1)
        .mount(&server)
        .await;

    let text = client(&server).generate(&request()).await.unwrap();
    assert_eq!(text, "A clearer paragraph.");
}

#[tokio::test]
async fn missing_model_is_model_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(
            ResponseTemplate::new(404)
                .set_body_json(json!({ "error": "model 'llama3' not found" })),
        )
        .mount(&server)
        .await;

    let err = client(&server).generate(&request()).await.unwrap_err();
    assert_eq!(err.kind, InferenceErrorKind::ModelNotFound);
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn server_error_is_retryable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(503).set_body_string("loading model"))
        .mount(&server)
        .await;

    let err = client(&server).generate(&request()).await.unwrap_err();
    assert_eq!(err.kind, InferenceErrorKind::ServerUnavailable);
    assert!(err.is_retryable());
}

#[tokio::test]
async fn bad_request_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(json!({ "error": "invalid option" })),
        )
        .mount(&server)
        .await;

    let err = client(&server).generate(&request()).await.unwrap_err();
    assert_eq!(err.kind, InferenceErrorKind::RequestRejected);
}

#[tokio::test]
async fn unparseable_body_is_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>proxy</html>"))
        .mount(&server)
        .await;

    let err = client(&server).generate(&request()).await.unwrap_err();
    assert_eq!(err.kind, InferenceErrorKind::MalformedResponse);
}

#[tokio::test]
async fn blank_response_is_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "llama3",
            "response": "  ",
            "done": true
        })))
        .mount(&server)
        .await;

    let err = client(&server).generate(&request()).await.unwrap_err();
    assert_eq!(err.kind, InferenceErrorKind::MalformedResponse);
}

#[tokio::test]
async fn closed_port_is_connection_refused() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let client = OllamaClient::new(format!("http://127.0.0.1:{port}"), Duration::from_secs(2)).unwrap();
    let err = client.generate(&request()).await.unwrap_err();

    assert_eq!(err.kind, InferenceErrorKind::ConnectionRefused);
    assert!(err.is_retryable());
}

#[tokio::test]
async fn liveness_uses_version_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/version"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "version": "0.3.12" })))
        .expect(1)
        .mount(&server)
        .await;

    client(&server).liveness().await.unwrap();
}

#[tokio::test]
async fn model_availability_reads_tags() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "models": [
                { "name": "llama3:latest" },
                { "name": "mistral:7b" }
            ]
        })))
        .mount(&server)
        .await;

    let client = client(&server);
    assert!(client.model_available("llama3").await.unwrap());
    assert!(client.model_available("mistral:7b").await.unwrap());
    assert!(!client.model_available("phi3").await.unwrap());
}
