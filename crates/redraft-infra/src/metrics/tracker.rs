//! Job metrics tracker
//!
//! Process-wide job and attempt counters. All updates go through one
//! short-held lock so a snapshot is always internally consistent.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use redraft_core::{AttemptOutcome, ErrorCategory, InvocationAttempt, JobId};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone, Serialize)]
pub struct FailureRecord {
    pub at: DateTime<Utc>,
    pub category: ErrorCategory,
    pub reason: String,
}

#[derive(Debug, Default)]
struct JobCounters {
    jobs_started: u64,
    jobs_succeeded: u64,
    jobs_failed: u64,
    jobs_cancelled: u64,
    active_jobs: u64,
    average_processing_ms: f64,
    chunks_processed: u64,
    total_attempts: u64,
    successful_attempts: u64,
    retryable_failures: u64,
    fatal_failures: u64,
    last_failure: Option<FailureRecord>,
}

/// Point-in-time view of the tracker
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub jobs_started: u64,
    pub jobs_succeeded: u64,
    pub jobs_failed: u64,
    pub jobs_cancelled: u64,
    pub active_jobs: u64,
    /// Rolling mean over successful jobs only
    pub average_processing_ms: f64,
    pub chunks_processed: u64,
    pub total_attempts: u64,
    pub successful_attempts: u64,
    pub retryable_failures: u64,
    pub fatal_failures: u64,
    pub last_failure: Option<FailureRecord>,
    pub uptime_secs: f64,
    pub started_at: DateTime<Utc>,
}

/// Shared metrics tracker, cheap to clone
#[derive(Clone)]
pub struct MetricsTracker {
    counters: Arc<Mutex<JobCounters>>,
    start_time: Instant,
    started_at: DateTime<Utc>,
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self {
            counters: Arc::new(Mutex::new(JobCounters::default())),
            start_time: Instant::now(),
            started_at: Utc::now(),
        }
    }

    /// Count a new job as started and active.
    ///
    /// The returned handle must be finished with `succeed` or `fail`;
    /// dropping it unfinished records the job as cancelled.
    pub fn start_job(&self, job_id: JobId) -> JobTracking {
        {
            let mut counters = self.counters.lock();
            counters.jobs_started += 1;
            counters.active_jobs += 1;
        }
        debug!(job_id = %job_id, "Job started");

        JobTracking {
            tracker: self.clone(),
            job_id,
            finished: false,
        }
    }

    /// Report one invocation attempt
    pub fn record_attempt(&self, attempt: &InvocationAttempt) {
        let mut counters = self.counters.lock();
        counters.total_attempts += 1;
        match attempt.outcome {
            AttemptOutcome::Success => counters.successful_attempts += 1,
            AttemptOutcome::RetryableError => counters.retryable_failures += 1,
            AttemptOutcome::FatalError => counters.fatal_failures += 1,
        }
    }

    fn finish_success(&self, elapsed: Duration, chunks: usize) {
        let mut counters = self.counters.lock();
        counters.active_jobs = counters.active_jobs.saturating_sub(1);
        counters.jobs_succeeded += 1;
        counters.chunks_processed += chunks as u64;

        let n = counters.jobs_succeeded as f64;
        let latest = elapsed.as_secs_f64() * 1000.0;
        counters.average_processing_ms =
            (counters.average_processing_ms * (n - 1.0) + latest) / n;
    }

    fn finish_failure(&self, category: ErrorCategory, reason: &str) {
        let mut counters = self.counters.lock();
        counters.active_jobs = counters.active_jobs.saturating_sub(1);
        counters.jobs_failed += 1;
        counters.last_failure = Some(FailureRecord {
            at: Utc::now(),
            category,
            reason: reason.to_string(),
        });
    }

    fn finish_cancelled(&self) {
        let mut counters = self.counters.lock();
        counters.active_jobs = counters.active_jobs.saturating_sub(1);
        counters.jobs_cancelled += 1;
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let counters = self.counters.lock();
        MetricsSnapshot {
            jobs_started: counters.jobs_started,
            jobs_succeeded: counters.jobs_succeeded,
            jobs_failed: counters.jobs_failed,
            jobs_cancelled: counters.jobs_cancelled,
            active_jobs: counters.active_jobs,
            average_processing_ms: counters.average_processing_ms,
            chunks_processed: counters.chunks_processed,
            total_attempts: counters.total_attempts,
            successful_attempts: counters.successful_attempts,
            retryable_failures: counters.retryable_failures,
            fatal_failures: counters.fatal_failures,
            last_failure: counters.last_failure.clone(),
            uptime_secs: self.start_time.elapsed().as_secs_f64(),
            started_at: self.started_at,
        }
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }
}

impl Default for MetricsTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome handle for one job
pub struct JobTracking {
    tracker: MetricsTracker,
    job_id: JobId,
    finished: bool,
}

impl JobTracking {
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn succeed(mut self, elapsed: Duration, chunks: usize) {
        self.finished = true;
        self.tracker.finish_success(elapsed, chunks);
        debug!(
            job_id = %self.job_id,
            elapsed_ms = elapsed.as_millis() as u64,
            "Job succeeded"
        );
    }

    pub fn fail(mut self, category: ErrorCategory, reason: &str) {
        self.finished = true;
        self.tracker.finish_failure(category, reason);
        debug!(job_id = %self.job_id, reason = reason, "Job failed");
    }

    pub fn cancel(mut self) {
        self.finished = true;
        self.tracker.finish_cancelled();
        debug!(job_id = %self.job_id, "Job cancelled");
    }
}

impl Drop for JobTracking {
    fn drop(&mut self) {
        if !self.finished {
            self.tracker.finish_cancelled();
            debug!(job_id = %self.job_id, "Job dropped before completion");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attempt(outcome: AttemptOutcome) -> InvocationAttempt {
        InvocationAttempt {
            chunk_ordinal: 0,
            attempt: 1,
            started_at: Utc::now(),
            outcome,
            elapsed: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_rolling_average_over_successes() {
        let tracker = MetricsTracker::new();

        tracker
            .start_job(JobId::new())
            .succeed(Duration::from_millis(100), 1);
        tracker
            .start_job(JobId::new())
            .succeed(Duration::from_millis(300), 2);
        tracker
            .start_job(JobId::new())
            .fail(ErrorCategory::TemporarilyUnavailable, "circuit_open");
        tracker
            .start_job(JobId::new())
            .succeed(Duration::from_millis(500), 1);

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.jobs_started, 4);
        assert_eq!(snapshot.jobs_succeeded, 3);
        assert_eq!(snapshot.jobs_failed, 1);
        assert_eq!(snapshot.active_jobs, 0);
        assert_eq!(snapshot.chunks_processed, 4);
        assert!((snapshot.average_processing_ms - 300.0).abs() < 1e-6);
        assert_eq!(snapshot.last_failure.unwrap().reason, "circuit_open");
    }

    #[test]
    fn test_dropped_job_counts_as_cancelled() {
        let tracker = MetricsTracker::new();
        let job = tracker.start_job(JobId::new());
        assert_eq!(tracker.snapshot().active_jobs, 1);

        drop(job);
        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.active_jobs, 0);
        assert_eq!(snapshot.jobs_cancelled, 1);
        assert_eq!(snapshot.jobs_failed, 0);
    }

    #[test]
    fn test_attempt_outcomes_are_counted() {
        let tracker = MetricsTracker::new();
        tracker.record_attempt(&attempt(AttemptOutcome::RetryableError));
        tracker.record_attempt(&attempt(AttemptOutcome::RetryableError));
        tracker.record_attempt(&attempt(AttemptOutcome::Success));
        tracker.record_attempt(&attempt(AttemptOutcome::FatalError));

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.total_attempts, 4);
        assert_eq!(snapshot.retryable_failures, 2);
        assert_eq!(snapshot.successful_attempts, 1);
        assert_eq!(snapshot.fatal_failures, 1);
    }

    #[test]
    fn test_clones_share_counters() {
        let tracker = MetricsTracker::new();
        let other = tracker.clone();
        other.start_job(JobId::new()).cancel();
        assert_eq!(tracker.snapshot().jobs_cancelled, 1);
    }
}
