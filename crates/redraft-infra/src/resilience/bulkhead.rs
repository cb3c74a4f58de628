//! Bulkhead pattern implementation
//!
//! Caps the number of in-flight calls to the inference endpoint across every
//! job in the process. Callers queue for a slot; a bounded wait turns a full
//! queue into a fast rejection instead of unbounded latency.

use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

/// Bulkhead configuration
#[derive(Debug, Clone)]
pub struct BulkheadConfig {
    /// Name of this bulkhead (for logging)
    pub name: String,
    /// Maximum concurrent executions
    pub max_concurrent: usize,
    /// Maximum wait time for acquiring a permit; `None` waits indefinitely
    pub max_wait: Option<Duration>,
}

impl Default for BulkheadConfig {
    fn default() -> Self {
        Self {
            name: "inference".to_string(),
            max_concurrent: 1,
            max_wait: None,
        }
    }
}

impl BulkheadConfig {
    pub fn new(name: &str, max_concurrent: usize) -> Self {
        Self {
            name: name.to_string(),
            max_concurrent: max_concurrent.max(1),
            ..Default::default()
        }
    }

    pub fn with_max_wait(mut self, wait: Duration) -> Self {
        self.max_wait = Some(wait);
        self
    }
}

impl From<&redraft_core::InferenceConfig> for BulkheadConfig {
    fn from(config: &redraft_core::InferenceConfig) -> Self {
        let bulkhead = Self::new("inference", config.max_concurrent_requests);
        match config.queue_wait() {
            Some(wait) => bulkhead.with_max_wait(wait),
            None => bulkhead,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BulkheadError {
    #[error("No inference slot became free within {waited:?}")]
    QueueFull { waited: Duration },

    #[error("Bulkhead is closed")]
    Closed,
}

/// A slot that must be held while the protected call is in flight
pub struct BulkheadPermit {
    _permit: OwnedSemaphorePermit,
    in_flight: Arc<AtomicUsize>,
    bulkhead_name: Arc<str>,
}

impl Drop for BulkheadPermit {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        debug!(bulkhead = %self.bulkhead_name, "Bulkhead permit released");
    }
}

/// Occupancy figures for health and metrics reporting
#[derive(Debug, Clone, Copy, Serialize)]
pub struct BulkheadSnapshot {
    pub max_concurrent: usize,
    pub in_flight: usize,
    pub waiting: usize,
}

/// Process-wide limiter for concurrent inference calls
#[derive(Clone)]
pub struct Bulkhead {
    name: Arc<str>,
    max_concurrent: usize,
    max_wait: Option<Duration>,
    semaphore: Arc<Semaphore>,
    in_flight: Arc<AtomicUsize>,
    waiting: Arc<AtomicUsize>,
}

struct WaitingGuard<'a>(&'a AtomicUsize);

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Bulkhead {
    pub fn new(config: BulkheadConfig) -> Self {
        let max_concurrent = config.max_concurrent.max(1);
        Self {
            name: Arc::from(config.name.as_str()),
            max_concurrent,
            max_wait: config.max_wait,
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            waiting: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_limit(name: &str, max_concurrent: usize) -> Self {
        Self::new(BulkheadConfig::new(name, max_concurrent))
    }

    fn permit(&self, permit: OwnedSemaphorePermit) -> BulkheadPermit {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        debug!(bulkhead = %self.name, "Bulkhead permit acquired");
        BulkheadPermit {
            _permit: permit,
            in_flight: Arc::clone(&self.in_flight),
            bulkhead_name: Arc::clone(&self.name),
        }
    }

    /// Try to acquire a permit immediately
    pub fn try_acquire(&self) -> Option<BulkheadPermit> {
        self.semaphore
            .clone()
            .try_acquire_owned()
            .ok()
            .map(|permit| self.permit(permit))
    }

    /// Acquire a permit, waiting up to `max_wait` if configured.
    ///
    /// Dropping the returned future leaves the queue without taking a slot.
    pub async fn acquire(&self) -> Result<BulkheadPermit, BulkheadError> {
        self.waiting.fetch_add(1, Ordering::SeqCst);
        let _waiting = WaitingGuard(&self.waiting);

        let acquired = match self.max_wait {
            Some(max_wait) => {
                match tokio::time::timeout(max_wait, self.semaphore.clone().acquire_owned()).await
                {
                    Ok(result) => result,
                    Err(_) => {
                        warn!(
                            bulkhead = %self.name,
                            max_wait_ms = max_wait.as_millis() as u64,
                            "Bulkhead timed out waiting for permit"
                        );
                        return Err(BulkheadError::QueueFull { waited: max_wait });
                    }
                }
            }
            None => self.semaphore.clone().acquire_owned().await,
        };

        match acquired {
            Ok(permit) => Ok(self.permit(permit)),
            Err(_) => {
                warn!(bulkhead = %self.name, "Bulkhead semaphore closed");
                Err(BulkheadError::Closed)
            }
        }
    }

    /// Stop admitting calls; queued and future acquires fail with `Closed`
    pub fn close(&self) {
        self.semaphore.close();
    }

    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn snapshot(&self) -> BulkheadSnapshot {
        BulkheadSnapshot {
            max_concurrent: self.max_concurrent,
            in_flight: self.in_flight.load(Ordering::SeqCst),
            waiting: self.waiting.load(Ordering::SeqCst),
        }
    }
}
