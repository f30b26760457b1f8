//! The OCR worker loop and job outcome handling.

use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::db::OcrJob;
use crate::error::{ExtractionError, ServiceError, ServiceResult, format_error_chain_ref};
use crate::service::OcrService;

/// Start the OCR worker.
///
/// Drains the queue one job at a time, then sleeps until a job is enqueued
/// in this process or the poll interval elapses (jobs enqueued by other
/// processes). Cancelling `shutdown` stops the loop between jobs; a running
/// job is always finished first.
pub fn start_worker(service: Arc<OcrService>, shutdown: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let poll_interval = service.config.ocr.poll_interval();
        info!(poll_interval_secs = poll_interval.as_secs(), "OCR worker started");

        loop {
            match service.drain_queue(&shutdown).await {
                Ok(0) => {}
                Ok(count) => debug!(jobs = count, "OCR queue drained"),
                Err(e) => {
                    error!(error = %format_error_chain_ref(&e), "Failed to claim next OCR job");
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = service.wakeup.notified() => {}
                _ = tokio::time::sleep(poll_interval) => {}
            }
        }

        info!("OCR worker stopped");
    })
}

/// What a successful job produced
#[derive(Debug)]
struct JobSummary {
    chars: usize,
    chunks: usize,
    purged_checkpoints: usize,
}

impl OcrService {
    /// Claim and run jobs until the queue is empty or `shutdown` is cancelled.
    ///
    /// Returns how many jobs were run.
    pub async fn drain_queue(&self, shutdown: &CancellationToken) -> ServiceResult<usize> {
        let mut processed = 0;
        while !shutdown.is_cancelled() {
            let Some(job) = self.db.claim_next_job()? else {
                break;
            };
            self.run_job(job).await;
            processed += 1;
        }
        Ok(processed)
    }

    /// Run one claimed job to an outcome: completed, requeued or failed
    pub(crate) async fn run_job(&self, job: OcrJob) {
        let started = Instant::now();
        info!(
            job_id = %job.id,
            doc_id = %job.document_id,
            job_type = job.job_type.as_str(),
            attempt = job.attempt_count,
            max_attempts = job.max_attempts,
            "Running OCR job"
        );

        match self.process_job(&job).await {
            Ok(summary) => info!(
                job_id = %job.id,
                doc_id = %job.document_id,
                chars = summary.chars,
                chunks = summary.chunks,
                purged_checkpoints = summary.purged_checkpoints,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "OCR job completed"
            ),
            Err(e) => self.handle_job_failure(&job, e),
        }
    }

    async fn process_job(&self, job: &OcrJob) -> ServiceResult<JobSummary> {
        let payload = job.payload().map_err(|e| ExtractionError::Validation {
            message: format!("Malformed job payload: {}", e),
        })?;

        let text = self.extract_job_text(job, &payload).await?;
        let chunks = self.chunker.store_chunks(&job.document_id, &text)?;
        self.db.mark_document_ready(&job.document_id, &text, chunks)?;

        if !self.db.mark_job_completed(&job.id)? {
            warn!(job_id = %job.id, "OCR job was no longer running when it completed");
        }
        let purged_checkpoints = self.db.purge_checkpoints(&job.id)?;

        Ok(JobSummary {
            chars: text.chars().count(),
            chunks,
            purged_checkpoints,
        })
    }

    fn handle_job_failure(&self, job: &OcrJob, err: ServiceError) {
        let message = format_error_chain_ref(&err);

        if !err.is_terminal() && job.attempts_remaining() {
            warn!(
                job_id = %job.id,
                doc_id = %job.document_id,
                attempt = job.attempt_count,
                max_attempts = job.max_attempts,
                error = %message,
                "OCR job failed, requeueing"
            );
            if let Err(e) = self.db.requeue_job(&job.id, &message) {
                error!(
                    job_id = %job.id,
                    error = %format_error_chain_ref(&e),
                    "Failed to requeue OCR job"
                );
            }
            if let Err(e) = self.db.mark_document_processing(&job.document_id) {
                warn!(
                    doc_id = %job.document_id,
                    error = %format_error_chain_ref(&e),
                    "Failed to reset document status"
                );
            }
            self.wakeup.notify_one();
            return;
        }

        error!(
            job_id = %job.id,
            doc_id = %job.document_id,
            attempt = job.attempt_count,
            max_attempts = job.max_attempts,
            terminal = err.is_terminal(),
            error = %message,
            "OCR job failed permanently"
        );
        if let Err(e) = self.db.mark_job_failed(&job.id, &message) {
            error!(
                job_id = %job.id,
                error = %format_error_chain_ref(&e),
                "Failed to mark OCR job failed"
            );
        }
        if let Err(e) = self.db.mark_document_error(&job.document_id, &message) {
            error!(
                doc_id = %job.document_id,
                error = %format_error_chain_ref(&e),
                "Failed to mark document error"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::db::{DocumentStatus, JobStatus, JobType};
    use crate::error::ProviderError;
    use crate::service::testing::{Harness, ScriptedVision};

    fn server_error() -> ProviderError {
        ProviderError::Request {
            status: 500,
            message: "upstream exploded".to_string(),
        }
    }

    #[tokio::test]
    async fn test_drain_runs_jobs_in_order() {
        let harness = Harness::new(ScriptedVision::echo(), 1);
        let first = harness.enqueue("doc-1", JobType::SingleImage, "vision");
        let second = harness.enqueue("doc-2", JobType::SingleImage, "vision");

        let processed = harness
            .service
            .drain_queue(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(processed, 2);
        for id in [&first, &second] {
            let job = harness.db().get_job(id).unwrap().unwrap();
            assert_eq!(job.status, JobStatus::Completed);
            assert!(job.finished_at.is_some());
        }
        let doc = harness.db().get_document("doc-2").unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Ready);
        assert_eq!(doc.chunk_count, harness.db().get_chunks("doc-2").unwrap().len());
        assert!(doc.chunk_count > 0);
    }

    #[tokio::test]
    async fn test_failed_attempts_requeue_until_exhausted() {
        let harness = Harness::new(ScriptedVision::echo().with_single(|_| Err(server_error())), 1);
        let job_id = harness.enqueue("doc-1", JobType::SingleImage, "vision");

        // Attempts 1 and 2 requeue, attempt 3 is the last
        let processed = harness
            .service
            .drain_queue(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(processed, 3);

        let job = harness.db().get_job(&job_id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.attempt_count, 3);
        assert_eq!(
            job.last_error.as_deref(),
            Some("Request failed (status 500): upstream exploded")
        );

        let doc = harness.db().get_document("doc-1").unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Error);
        assert_eq!(doc.processing_error, job.last_error);

        // Nothing left for recovery to pick up
        let report = harness.service.recover().unwrap();
        assert!(report.requeued_jobs.is_empty());
        assert_eq!(
            harness.db().get_job(&job_id).unwrap().unwrap().status,
            JobStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_requeued_attempt_resets_document() {
        let harness = Harness::new(ScriptedVision::echo().with_single(|_| Err(server_error())), 1);
        let job_id = harness.enqueue("doc-1", JobType::SingleImage, "vision");

        let job = harness.db().claim_next_job().unwrap().unwrap();
        harness.service.run_job(job).await;

        let job = harness.db().get_job(&job_id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.attempt_count, 1);
        let doc = harness.db().get_document("doc-1").unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Processing);
        assert!(doc.processing_error.is_none());
    }

    #[tokio::test]
    async fn test_cancelled_token_stops_before_claiming() {
        let harness = Harness::new(ScriptedVision::echo(), 1);
        let job_id = harness.enqueue("doc-1", JobType::SingleImage, "vision");
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        assert_eq!(harness.service.drain_queue(&shutdown).await.unwrap(), 0);
        assert_eq!(
            harness.db().get_job(&job_id).unwrap().unwrap().status,
            JobStatus::Queued
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_wakes_on_enqueue_and_stops_on_cancel() {
        let harness = Harness::new(ScriptedVision::echo(), 1);
        let shutdown = CancellationToken::new();
        let handle = start_worker(harness.service.clone(), shutdown.clone());

        // Let the worker find the empty queue and go to sleep
        tokio::time::sleep(Duration::from_millis(10)).await;
        let job_id = harness.enqueue("doc-1", JobType::SingleImage, "vision");

        let mut status = JobStatus::Queued;
        for _ in 0..100 {
            status = harness.db().get_job(&job_id).unwrap().unwrap().status;
            if status == JobStatus::Completed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert_eq!(status, JobStatus::Completed);

        shutdown.cancel();
        handle.await.unwrap();
    }
}
