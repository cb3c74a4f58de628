//! Resilient inference invoker
//!
//! Wraps one chunk's inference call with the circuit breaker, the process-wide
//! bulkhead, a per-call time budget and bounded exponential retry. Failures
//! leave as a [`ServiceFailure`]; cancellation leaves as
//! [`InvocationError::Cancelled`] and is never reported to the breaker.

use chrono::{DateTime, Utc};
use redraft_core::{
    AttemptOutcome, InferenceClient, InferenceError, InferenceRequest, InvocationAttempt,
    ServiceFailure, ServiceFailureReason,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::bulkhead::Bulkhead;
use super::circuit_breaker::CircuitBreaker;
use super::retry::RetryPolicy;
use super::timeout::{timeout_result, TimeoutOrError};
use crate::metrics::MetricsTracker;

/// Output of a chunk that eventually succeeded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSuccess {
    pub text: String,
    pub attempts: u32,
}

#[derive(Debug, Error)]
pub enum InvocationError {
    #[error(transparent)]
    Failed(ServiceFailure),

    #[error("Invocation cancelled after {attempts} attempt(s)")]
    Cancelled { attempts: u32 },
}

impl InvocationError {
    pub fn attempts(&self) -> u32 {
        match self {
            InvocationError::Failed(failure) => failure.attempts,
            InvocationError::Cancelled { attempts } => *attempts,
        }
    }
}

pub struct ResilientInvoker {
    client: Arc<dyn InferenceClient>,
    model: String,
    breaker: CircuitBreaker,
    retry: RetryPolicy,
    bulkhead: Bulkhead,
    metrics: MetricsTracker,
    warm: AtomicBool,
}

impl ResilientInvoker {
    pub fn new(
        client: Arc<dyn InferenceClient>,
        model: impl Into<String>,
        breaker: CircuitBreaker,
        retry: RetryPolicy,
        bulkhead: Bulkhead,
        metrics: MetricsTracker,
    ) -> Self {
        Self {
            client,
            model: model.into(),
            breaker,
            retry,
            bulkhead,
            metrics,
            warm: AtomicBool::new(false),
        }
    }

    /// Whether any call has succeeded since the process started
    pub fn is_warm(&self) -> bool {
        self.warm.load(Ordering::Acquire)
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn bulkhead(&self) -> &Bulkhead {
        &self.bulkhead
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn provider_name(&self) -> &str {
        self.client.provider_name()
    }

    fn failure(
        &self,
        reason: ServiceFailureReason,
        message: String,
        chunk_ordinal: usize,
        attempts: u32,
        started: Instant,
    ) -> InvocationError {
        InvocationError::Failed(ServiceFailure {
            reason,
            message,
            chunk_ordinal,
            attempts,
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }

    fn report(
        &self,
        chunk_ordinal: usize,
        attempt: u32,
        outcome: AttemptOutcome,
        started: (DateTime<Utc>, Instant),
    ) {
        self.metrics.record_attempt(&InvocationAttempt {
            chunk_ordinal,
            attempt,
            started_at: started.0,
            outcome,
            elapsed: started.1.elapsed(),
        });
    }

    /// Rewrite one chunk's prompt, retrying retryable failures.
    ///
    /// `budget` bounds each individual attempt, not the whole sequence.
    pub async fn invoke(
        &self,
        chunk_ordinal: usize,
        prompt: &str,
        budget: Duration,
        cancel: &CancellationToken,
    ) -> Result<ChunkSuccess, InvocationError> {
        let started = Instant::now();
        let request = InferenceRequest::new(self.model.as_str(), prompt);
        let mut attempts = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Err(InvocationError::Cancelled { attempts });
            }

            if !self.breaker.allow_request().await {
                return Err(self.failure(
                    ServiceFailureReason::CircuitOpen,
                    "Inference circuit is open".to_string(),
                    chunk_ordinal,
                    attempts,
                    started,
                ));
            }

            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(InvocationError::Cancelled { attempts }),
                permit = self.bulkhead.acquire() => match permit {
                    Ok(permit) => permit,
                    Err(err) => {
                        return Err(self.failure(
                            ServiceFailureReason::QueueFull,
                            err.to_string(),
                            chunk_ordinal,
                            attempts,
                            started,
                        ));
                    }
                },
            };

            // The circuit may have opened while this call sat in the queue.
            if !self.breaker.allow_request().await {
                return Err(self.failure(
                    ServiceFailureReason::CircuitOpen,
                    "Inference circuit is open".to_string(),
                    chunk_ordinal,
                    attempts,
                    started,
                ));
            }

            attempts += 1;
            let attempt_started = (Utc::now(), Instant::now());
            debug!(
                chunk_ordinal = chunk_ordinal,
                attempt = attempts,
                budget_ms = budget.as_millis() as u64,
                "Invoking inference"
            );

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                result = timeout_result(budget, "inference.generate", || self.client.generate(&request)) => Some(result),
            };
            drop(permit);

            let Some(outcome) = outcome else {
                debug!(chunk_ordinal = chunk_ordinal, attempt = attempts, "Inference call cancelled");
                return Err(InvocationError::Cancelled { attempts });
            };

            let result = match outcome {
                Ok(text) => {
                    let trimmed = text.trim();
                    if trimmed.is_empty() {
                        Err(InferenceError::malformed("Inference returned an empty response"))
                    } else {
                        Ok(trimmed.to_string())
                    }
                }
                Err(TimeoutOrError::Timeout(err)) => Err(InferenceError::timeout(err.to_string())),
                Err(TimeoutOrError::Error(err)) => Err(err),
            };

            match result {
                Ok(text) => {
                    self.breaker.record_success().await;
                    if !self.warm.swap(true, Ordering::AcqRel) {
                        info!(model = %self.model, "Inference model is warm");
                    }
                    self.report(chunk_ordinal, attempts, AttemptOutcome::Success, attempt_started);
                    return Ok(ChunkSuccess { text, attempts });
                }
                Err(err) if err.is_retryable() => {
                    self.breaker.record_failure().await;
                    self.report(
                        chunk_ordinal,
                        attempts,
                        AttemptOutcome::RetryableError,
                        attempt_started,
                    );

                    if !self.retry.has_attempts_after(attempts) {
                        warn!(
                            chunk_ordinal = chunk_ordinal,
                            attempts = attempts,
                            error = %err,
                            "Inference retries exhausted"
                        );
                        return Err(self.failure(
                            ServiceFailureReason::ConnectionError { last: err.kind },
                            format!("Inference failed after {} attempt(s): {}", attempts, err),
                            chunk_ordinal,
                            attempts,
                            started,
                        ));
                    }

                    let delay = self.retry.delay_for_attempt(attempts);
                    warn!(
                        chunk_ordinal = chunk_ordinal,
                        attempt = attempts,
                        max_attempts = self.retry.max_attempts(),
                        kind = %err.kind,
                        error = %err,
                        retry_in_ms = delay.as_millis() as u64,
                        "Retryable inference failure"
                    );

                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(InvocationError::Cancelled { attempts }),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(err) => {
                    self.breaker.record_failure().await;
                    self.report(chunk_ordinal, attempts, AttemptOutcome::FatalError, attempt_started);
                    warn!(
                        chunk_ordinal = chunk_ordinal,
                        error = %err,
                        "Fatal inference failure"
                    );
                    return Err(self.failure(
                        ServiceFailureReason::Fatal { kind: err.kind },
                        err.to_string(),
                        chunk_ordinal,
                        attempts,
                        started,
                    ));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::{
        BulkheadConfig, CircuitBreakerConfig, CircuitBreakerState, RetryConfig,
    };
    use async_trait::async_trait;
    use redraft_core::InferenceErrorKind;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicU32;

    /// Replays scripted results, then repeats the fallback forever
    struct ScriptedClient {
        script: parking_lot::Mutex<VecDeque<Result<String, InferenceError>>>,
        fallback: Result<String, InferenceError>,
        delay: Duration,
        calls: AtomicU32,
    }

    impl ScriptedClient {
        fn new(script: Vec<Result<String, InferenceError>>, fallback: Result<String, InferenceError>) -> Self {
            Self {
                script: parking_lot::Mutex::new(script.into()),
                fallback,
                delay: Duration::ZERO,
                calls: AtomicU32::new(0),
            }
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl InferenceClient for ScriptedClient {
        async fn generate(&self, _request: &InferenceRequest) -> Result<String, InferenceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let next = self.script.lock().pop_front();
            next.unwrap_or_else(|| self.fallback.clone())
        }

        async fn liveness(&self) -> Result<(), InferenceError> {
            Ok(())
        }

        async fn model_available(&self, _model: &str) -> Result<bool, InferenceError> {
            Ok(true)
        }

        fn provider_name(&self) -> &str {
            "scripted"
        }
    }

    fn invoker(client: Arc<ScriptedClient>, max_attempts: u32, failure_threshold: u32) -> ResilientInvoker {
        ResilientInvoker::new(
            client,
            "test-model",
            CircuitBreaker::new(
                CircuitBreakerConfig::new("test")
                    .with_failure_threshold(failure_threshold)
                    .with_cooldown(Duration::from_secs(60)),
            ),
            RetryPolicy::new(
                RetryConfig::new(max_attempts).with_base_delay(Duration::from_millis(100)),
            ),
            Bulkhead::new(BulkheadConfig::new("test", 1)),
            MetricsTracker::new(),
        )
    }

    fn refused() -> Result<String, InferenceError> {
        Err(InferenceError::connection_refused("connection refused"))
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_first_attempt_warms_model() {
        let client = Arc::new(ScriptedClient::new(vec![], Ok("  rewritten  ".to_string())));
        let invoker = invoker(client.clone(), 3, 5);
        assert!(!invoker.is_warm());

        let result = invoker
            .invoke(0, "prompt", Duration::from_secs(5), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.text, "rewritten");
        assert_eq!(result.attempts, 1);
        assert!(invoker.is_warm());
        assert_eq!(invoker.metrics.snapshot().successful_attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retryable_errors_are_retried_until_success() {
        let client = Arc::new(ScriptedClient::new(
            vec![refused(), refused()],
            Ok("done".to_string()),
        ));
        let invoker = invoker(client.clone(), 5, 10);

        let result = invoker
            .invoke(3, "prompt", Duration::from_secs(5), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.attempts, 3);
        assert_eq!(client.calls(), 3);
        assert_eq!(invoker.breaker().snapshot().await.consecutive_failures, 0);
        assert_eq!(invoker.metrics.snapshot().retryable_failures, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhaustion_reports_attempts() {
        let client = Arc::new(ScriptedClient::new(vec![], refused()));
        let invoker = invoker(client.clone(), 5, 5);

        let err = invoker
            .invoke(2, "prompt", Duration::from_secs(5), &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            InvocationError::Failed(failure) => {
                assert_eq!(failure.attempts, 5);
                assert_eq!(failure.chunk_ordinal, 2);
                assert_eq!(
                    failure.reason,
                    ServiceFailureReason::ConnectionError {
                        last: InferenceErrorKind::ConnectionRefused
                    }
                );
                // 100 + 200 + 400 + 800 ms of backoff
                assert!(failure.elapsed_ms >= 1500);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(client.calls(), 5);

        let circuit = invoker.breaker().snapshot().await;
        assert_eq!(circuit.consecutive_failures, 5);
        assert_eq!(circuit.state, CircuitBreakerState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_stops_after_one_attempt() {
        let client = Arc::new(ScriptedClient::new(
            vec![Err(InferenceError::model_not_found("model 'x' not found"))],
            Ok("never".to_string()),
        ));
        let invoker = invoker(client.clone(), 5, 5);

        let err = invoker
            .invoke(0, "prompt", Duration::from_secs(5), &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            InvocationError::Failed(failure) => {
                assert_eq!(failure.attempts, 1);
                assert_eq!(
                    failure.reason,
                    ServiceFailureReason::Fatal {
                        kind: InferenceErrorKind::ModelNotFound
                    }
                );
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_response_is_malformed() {
        let client = Arc::new(ScriptedClient::new(vec![], Ok("   \n".to_string())));
        let invoker = invoker(client.clone(), 3, 5);

        let err = invoker
            .invoke(0, "prompt", Duration::from_secs(5), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            InvocationError::Failed(ServiceFailure {
                reason: ServiceFailureReason::Fatal {
                    kind: InferenceErrorKind::MalformedResponse
                },
                attempts: 1,
                ..
            })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_call_times_out_and_is_retryable() {
        let client = Arc::new(
            ScriptedClient::new(vec![], Ok("late".to_string())).with_delay(Duration::from_secs(10)),
        );
        let invoker = invoker(client.clone(), 2, 5);

        let err = invoker
            .invoke(0, "prompt", Duration::from_secs(1), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            InvocationError::Failed(ServiceFailure {
                reason: ServiceFailureReason::ConnectionError {
                    last: InferenceErrorKind::Timeout
                },
                attempts: 2,
                ..
            })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_circuit_fails_without_network() {
        let client = Arc::new(ScriptedClient::new(vec![], Ok("ok".to_string())));
        let invoker = invoker(client.clone(), 3, 5);
        invoker.breaker().force_open().await;

        let err = invoker
            .invoke(0, "prompt", Duration::from_secs(5), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            InvocationError::Failed(ServiceFailure {
                reason: ServiceFailureReason::CircuitOpen,
                attempts: 0,
                ..
            })
        ));
        assert_eq!(client.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_is_not_a_failure() {
        let client = Arc::new(
            ScriptedClient::new(vec![], Ok("late".to_string())).with_delay(Duration::from_secs(30)),
        );
        let invoker = invoker(client.clone(), 3, 1);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let err = invoker
            .invoke(0, "prompt", Duration::from_secs(60), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, InvocationError::Cancelled { attempts: 1 }));
        let circuit = invoker.breaker().snapshot().await;
        assert_eq!(circuit.state, CircuitBreakerState::Closed);
        assert_eq!(circuit.total_failures, 0);
        assert_eq!(invoker.bulkhead().snapshot().in_flight, 0);
    }
}
