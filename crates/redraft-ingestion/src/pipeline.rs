//! Document Optimization Pipeline
//!
//! Drives one upload through extraction, chunking and the bounded scheduler,
//! then aggregates the chunk outputs. The upload is released on every exit
//! path and the job outcome is reported to the metrics tracker.

use std::sync::Arc;
use std::time::Instant;

use redraft_core::{
    JobId, JobResult, JobStatus, OptimizeMetadata, OptimizeOutput, PipelineError,
};
use redraft_infra::{BoundedScheduler, MetricsTracker};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

use crate::chunking::TextChunker;
use crate::extractors::ContentExtractor;
use crate::upload::ArtifactGuard;

/// The optimize operation
pub struct OptimizationPipeline {
    extractor: ContentExtractor,
    chunker: TextChunker,
    scheduler: Arc<BoundedScheduler>,
    metrics: MetricsTracker,
}

impl OptimizationPipeline {
    pub fn new(
        extractor: ContentExtractor,
        chunker: TextChunker,
        scheduler: Arc<BoundedScheduler>,
        metrics: MetricsTracker,
    ) -> Self {
        Self {
            extractor,
            chunker,
            scheduler,
            metrics,
        }
    }

    pub fn scheduler(&self) -> &Arc<BoundedScheduler> {
        &self.scheduler
    }

    pub fn metrics(&self) -> &MetricsTracker {
        &self.metrics
    }

    /// Optimize one validated upload.
    ///
    /// Takes ownership of the artifact and releases it before returning,
    /// whatever the outcome. Cancelling `cancel` stops queued and in-flight
    /// chunk calls for this job only.
    pub async fn optimize(
        &self,
        artifact: ArtifactGuard,
        cancel: &CancellationToken,
    ) -> Result<OptimizeOutput, PipelineError> {
        let tracking = self.metrics.start_job(JobId::new());
        let job_id = tracking.job_id();
        let span = tracing::info_span!("optimize", job_id = %job_id);

        async move {
            let started = Instant::now();
            let original_filename = artifact.artifact().original_filename.clone();

            info!(
                filename = %original_filename,
                size_bytes = artifact.artifact().size_bytes,
                "Job started"
            );

            let outcome = self.process(&artifact, cancel).await;
            artifact.release().await;
            let elapsed = started.elapsed();

            match outcome {
                Ok((result, input_chars)) => {
                    tracking.succeed(elapsed, result.chunks_processed);

                    let optimized_text = result.joined_output();
                    let output_chars = optimized_text.chars().count();

                    info!(
                        chunks = result.total_chunks,
                        attempts = result.total_attempts,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Job completed"
                    );

                    Ok(OptimizeOutput {
                        optimized_text,
                        metadata: OptimizeMetadata {
                            job_id,
                            original_filename,
                            attempts: result.total_attempts,
                            processing_time_ms: elapsed.as_millis() as u64,
                            chunks_processed: result.chunks_processed,
                            total_chunks: result.total_chunks,
                            input_chars,
                            output_chars,
                        },
                    })
                }
                Err(err) => {
                    match &err {
                        PipelineError::Cancelled { .. } => tracking.cancel(),
                        other => tracking.fail(other.category(), other.code()),
                    }
                    warn!(
                        code = err.code(),
                        stage = ?err.stage(),
                        elapsed_ms = elapsed.as_millis() as u64,
                        error = %err,
                        "Job did not complete"
                    );
                    Err(err)
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Returns the completed job and the extracted text length in characters
    async fn process(
        &self,
        artifact: &ArtifactGuard,
        cancel: &CancellationToken,
    ) -> Result<(JobResult, usize), PipelineError> {
        let extracted = self.extractor.extract(artifact).await?;
        let chunks = self.chunker.chunk(&extracted.text)?;
        debug!(
            input_chars = extracted.char_count,
            chunks = chunks.len(),
            "Document prepared"
        );

        let result = self.scheduler.run(chunks, cancel).await;

        match &result.status {
            JobStatus::Completed => Ok((result, extracted.char_count)),
            JobStatus::Failed(failure) => Err(PipelineError::ServiceUnavailable(failure.clone())),
            JobStatus::Cancelled => Err(PipelineError::Cancelled {
                attempts: result.total_attempts,
                elapsed_ms: result.elapsed.as_millis() as u64,
            }),
        }
    }
}
