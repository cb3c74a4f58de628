//! Timeout handling
//!
//! [`TimeoutPolicy`] computes the budget for one inference call from the
//! chunk size and whether the model is still cold. It is a pure function of
//! its inputs; enforcing the budget is left to [`timeout_result`].

use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Timeout error
#[derive(Debug, Clone)]
pub struct TimeoutError {
    /// Duration that was exceeded
    pub duration: Duration,
    /// Operation name
    pub operation: String,
}

impl std::fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Operation '{}' timed out after {:?}",
            self.operation, self.duration
        )
    }
}

impl std::error::Error for TimeoutError {}

/// Per-call time budget policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutPolicy {
    /// Budget for calls made before the model has answered once
    pub cold_start: Duration,
    /// Fixed part of a warm budget
    pub base: Duration,
    /// Added per character of chunk text
    pub per_char: Duration,
    /// Ceiling for warm budgets
    pub max: Duration,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            cold_start: Duration::from_secs(300),
            base: Duration::from_secs(30),
            per_char: Duration::from_millis(20),
            max: Duration::from_secs(300),
        }
    }
}

impl TimeoutPolicy {
    pub fn new(cold_start: Duration, base: Duration, per_char: Duration, max: Duration) -> Self {
        Self {
            cold_start,
            base,
            per_char,
            max,
        }
    }

    /// Budget for a chunk of `char_len` characters.
    ///
    /// Cold calls get the flat cold-start budget. Warm calls get
    /// `base + char_len × per_char`, clamped to `max`.
    pub fn budget(&self, char_len: usize, cold: bool) -> Duration {
        if cold {
            return self.cold_start;
        }

        let len = u32::try_from(char_len).unwrap_or(u32::MAX);
        let variable = self.per_char.checked_mul(len).unwrap_or(self.max);
        self.base.saturating_add(variable).min(self.max)
    }

    /// Smallest chunk length whose warm budget hits the ceiling
    #[cfg(test)]
    pub(crate) fn clamp_threshold(&self) -> Option<usize> {
        if self.base >= self.max {
            return Some(0);
        }
        if self.per_char.is_zero() {
            return None;
        }
        let headroom = (self.max - self.base).as_nanos();
        let step = self.per_char.as_nanos();
        usize::try_from(headroom.div_ceil(step)).ok()
    }
}

impl From<&redraft_core::TimeoutConfig> for TimeoutPolicy {
    fn from(config: &redraft_core::TimeoutConfig) -> Self {
        Self::new(
            Duration::from_secs(config.cold_start_secs),
            Duration::from_secs(config.base_secs),
            Duration::from_millis(config.per_char_ms),
            Duration::from_secs(config.max_secs),
        )
    }
}

/// Execute a future with a timeout, returning the result or the error
pub async fn timeout_result<F, Fut, T, E>(
    timeout: Duration,
    operation_name: &str,
    operation: F,
) -> Result<T, TimeoutOrError<E>>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    match tokio::time::timeout(timeout, operation()).await {
        Ok(Ok(result)) => Ok(result),
        Ok(Err(e)) => Err(TimeoutOrError::Error(e)),
        Err(_) => {
            warn!(
                operation = operation_name,
                timeout_ms = timeout.as_millis() as u64,
                "Operation timed out"
            );
            Err(TimeoutOrError::Timeout(TimeoutError {
                duration: timeout,
                operation: operation_name.to_string(),
            }))
        }
    }
}

/// Either a timeout or an operation error
#[derive(Debug)]
pub enum TimeoutOrError<E> {
    /// The operation timed out
    Timeout(TimeoutError),
    /// The operation failed with an error
    Error(E),
}

impl<E: std::fmt::Display> std::fmt::Display for TimeoutOrError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeoutOrError::Timeout(e) => write!(f, "{}", e),
            TimeoutOrError::Error(e) => write!(f, "{}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for TimeoutOrError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TimeoutOrError::Timeout(e) => Some(e),
            TimeoutOrError::Error(e) => Some(e),
        }
    }
}
