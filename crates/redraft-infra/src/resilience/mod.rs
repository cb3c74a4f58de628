//! Resilience patterns around the inference endpoint
//!
//! Circuit breaker, bulkhead, per-call timeout budget and retry policy,
//! composed by [`ResilientInvoker`].

pub mod bulkhead;
pub mod circuit_breaker;
pub mod invoker;
pub mod retry;
pub mod timeout;

pub use bulkhead::{Bulkhead, BulkheadConfig, BulkheadError, BulkheadPermit, BulkheadSnapshot};
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerState, CircuitSnapshot,
};
pub use invoker::{ChunkSuccess, InvocationError, ResilientInvoker};
pub use retry::{RetryConfig, RetryPolicy};
pub use timeout::{timeout_result, TimeoutError, TimeoutOrError, TimeoutPolicy};
