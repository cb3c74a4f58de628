//! Bounded chunk scheduler
//!
//! Drives every chunk of one job through the [`ResilientInvoker`] with at
//! most `max_concurrency` chunks in flight. Outputs are placed by chunk
//! position, never by completion order. The first failure stops new chunks
//! from starting; chunks already in flight run to their own conclusion.

use futures::stream::{FuturesUnordered, StreamExt};
use redraft_core::{JobResult, JobStatus, ServiceFailure, TextChunk, PROMPT_PLACEHOLDER};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::resilience::{ChunkSuccess, InvocationError, ResilientInvoker, TimeoutPolicy};

enum ChunkRun {
    Done(ChunkSuccess),
    Failed(ServiceFailure),
    Cancelled { attempts: u32 },
    Skipped,
}

pub struct BoundedScheduler {
    invoker: Arc<ResilientInvoker>,
    timeout: TimeoutPolicy,
    max_concurrency: usize,
    prompt_template: String,
}

impl BoundedScheduler {
    pub fn new(
        invoker: Arc<ResilientInvoker>,
        timeout: TimeoutPolicy,
        max_concurrency: usize,
        prompt_template: impl Into<String>,
    ) -> Self {
        Self {
            invoker,
            timeout,
            max_concurrency: max_concurrency.max(1),
            prompt_template: prompt_template.into(),
        }
    }

    pub fn invoker(&self) -> &Arc<ResilientInvoker> {
        &self.invoker
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    fn render_prompt(&self, text: &str) -> String {
        self.prompt_template.replace(PROMPT_PLACEHOLDER, text)
    }

    async fn run_chunk(
        &self,
        position: usize,
        chunk: TextChunk,
        halted: &AtomicBool,
        cancel: &CancellationToken,
    ) -> (usize, usize, ChunkRun) {
        let run = self.invoke_chunk(&chunk, halted, cancel).await;
        (position, chunk.ordinal, run)
    }

    async fn invoke_chunk(
        &self,
        chunk: &TextChunk,
        halted: &AtomicBool,
        cancel: &CancellationToken,
    ) -> ChunkRun {
        if halted.load(Ordering::SeqCst) || cancel.is_cancelled() {
            return ChunkRun::Skipped;
        }

        // Computed at start time so chunks queued behind the first success
        // get a warm budget.
        let budget = self.timeout.budget(chunk.char_len, !self.invoker.is_warm());
        let prompt = self.render_prompt(&chunk.text);

        match self.invoker.invoke(chunk.ordinal, &prompt, budget, cancel).await {
            Ok(success) => ChunkRun::Done(success),
            Err(InvocationError::Failed(failure)) => {
                halted.store(true, Ordering::SeqCst);
                ChunkRun::Failed(failure)
            }
            Err(InvocationError::Cancelled { attempts }) => ChunkRun::Cancelled { attempts },
        }
    }

    /// Run all chunks of a job to a terminal [`JobResult`]
    pub async fn run(&self, chunks: Vec<TextChunk>, cancel: &CancellationToken) -> JobResult {
        let started = Instant::now();
        let total_chunks = chunks.len();
        let halted = AtomicBool::new(false);

        info!(
            total_chunks = total_chunks,
            max_concurrency = self.max_concurrency,
            "Scheduling chunks"
        );

        let mut outputs: Vec<Option<String>> = vec![None; total_chunks];
        let mut total_attempts = 0u32;
        let mut first_failure: Option<ServiceFailure> = None;
        let mut cancelled = false;

        let mut pending = chunks.into_iter().enumerate();
        let mut runs = FuturesUnordered::new();
        for (position, chunk) in pending.by_ref().take(self.max_concurrency) {
            runs.push(self.run_chunk(position, chunk, &halted, cancel));
        }

        while let Some((position, ordinal, run)) = runs.next().await {
            if let Some((next, chunk)) = pending.next() {
                runs.push(self.run_chunk(next, chunk, &halted, cancel));
            }

            match run {
                ChunkRun::Done(success) => {
                    debug!(
                        chunk_ordinal = ordinal,
                        attempts = success.attempts,
                        "Chunk completed"
                    );
                    total_attempts += success.attempts;
                    outputs[position] = Some(success.text);
                }
                ChunkRun::Failed(failure) => {
                    total_attempts += failure.attempts;
                    if first_failure.is_none() {
                        warn!(
                            chunk_ordinal = failure.chunk_ordinal,
                            reason = failure.reason.as_str(),
                            "Chunk failed, halting job"
                        );
                        first_failure = Some(failure);
                    }
                }
                ChunkRun::Cancelled { attempts } => {
                    total_attempts += attempts;
                    cancelled = true;
                }
                ChunkRun::Skipped => {
                    if cancel.is_cancelled() {
                        cancelled = true;
                    }
                }
            }
        }
        drop(runs);

        let chunks_processed = outputs.iter().filter(|output| output.is_some()).count();
        let status = match first_failure {
            Some(failure) => JobStatus::Failed(failure),
            None if cancelled || chunks_processed < total_chunks => JobStatus::Cancelled,
            None => JobStatus::Completed,
        };

        let outputs = if status.is_completed() {
            outputs.into_iter().flatten().collect()
        } else {
            Vec::new()
        };

        JobResult {
            outputs,
            total_attempts,
            chunks_processed,
            total_chunks,
            elapsed: started.elapsed(),
            status,
        }
    }
}
