//! Startup reconciliation after a crash or restart.

use tracing::{info, warn};

use crate::error::ServiceResult;
use crate::service::OcrService;

const ORPHANED_DOCUMENT_MESSAGE: &str =
    "Processing was interrupted before OCR could be scheduled. Please upload the document again.";

const EXHAUSTED_JOB_MESSAGE: &str =
    "OCR was interrupted on its final attempt. Please upload the document again.";

/// What [`OcrService::recover`] changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Jobs that were `running` and are queued again, checkpoints intact
    pub requeued_jobs: Vec<String>,
    /// Jobs that were `running` on their last attempt, now `failed`
    pub failed_jobs: Vec<String>,
    /// Documents stuck in `processing` with no active job, now `error`
    pub orphaned_documents: Vec<String>,
}

impl RecoveryReport {
    pub fn is_empty(&self) -> bool {
        self.requeued_jobs.is_empty()
            && self.failed_jobs.is_empty()
            && self.orphaned_documents.is_empty()
    }
}

impl OcrService {
    /// Reconcile state left behind by a previous process.
    ///
    /// Must run before the worker starts. Jobs still marked `running` cannot
    /// have a live worker, so they go back to the queue and resume from their
    /// checkpoints; the re-claim counts as a new attempt. Jobs interrupted on
    /// their last attempt fail instead, so a job that keeps taking the process
    /// down still stops at `max_attempts`.
    pub fn recover(&self) -> ServiceResult<RecoveryReport> {
        let mut failed_jobs = Vec::new();
        for (job_id, doc_id) in self.db.fail_exhausted_running_jobs(EXHAUSTED_JOB_MESSAGE)? {
            warn!(
                job_id = %job_id,
                doc_id = %doc_id,
                "Failed OCR job interrupted on its last attempt"
            );
            self.db.mark_document_error(&doc_id, EXHAUSTED_JOB_MESSAGE)?;
            failed_jobs.push(job_id);
        }

        let requeued_jobs = self.db.requeue_running_jobs()?;
        for job_id in &requeued_jobs {
            warn!(job_id = %job_id, "Requeued OCR job interrupted by restart");
        }

        let orphaned_documents = self.db.fail_orphaned_documents(ORPHANED_DOCUMENT_MESSAGE)?;
        for doc_id in &orphaned_documents {
            warn!(doc_id = %doc_id, "Document was processing with no OCR job");
        }

        let report = RecoveryReport {
            requeued_jobs,
            failed_jobs,
            orphaned_documents,
        };
        if !report.is_empty() {
            info!(
                requeued = report.requeued_jobs.len(),
                failed = report.failed_jobs.len(),
                orphaned = report.orphaned_documents.len(),
                "Recovery complete"
            );
            self.wakeup.notify_one();
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{DocumentStatus, JobStatus, JobType};
    use crate::service::testing::{Harness, ScriptedVision, page_text};

    #[test]
    fn test_recover_requeues_running_and_fails_orphans() {
        let harness = Harness::new(ScriptedVision::echo(), 3);
        let job_id = harness.enqueue("doc-1", JobType::SingleFile, "vision");
        let job = harness.db().claim_next_job().unwrap().unwrap();
        harness
            .db()
            .upsert_checkpoint(&job.id, "doc-1", 1, "page one")
            .unwrap();

        // Uploaded but never enqueued
        harness.db().insert_document("doc-2", "lost.pdf").unwrap();
        // Still has a queued job, left alone
        harness.enqueue("doc-3", JobType::SingleImage, "vision");

        let report = harness.service.recover().unwrap();
        assert_eq!(report.requeued_jobs, vec![job_id.clone()]);
        assert_eq!(report.orphaned_documents, vec!["doc-2".to_string()]);

        let job = harness.db().get_job(&job_id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.attempt_count, 1);
        assert_eq!(harness.db().load_checkpoints(&job_id).unwrap().len(), 1);

        let orphan = harness.db().get_document("doc-2").unwrap().unwrap();
        assert_eq!(orphan.status, DocumentStatus::Error);
        assert_eq!(orphan.processing_error.as_deref(), Some(ORPHANED_DOCUMENT_MESSAGE));

        for doc_id in ["doc-1", "doc-3"] {
            let doc = harness.db().get_document(doc_id).unwrap().unwrap();
            assert_eq!(doc.status, DocumentStatus::Processing);
        }
    }

    #[test]
    fn test_crash_loop_stops_at_max_attempts() {
        let harness = Harness::new(ScriptedVision::echo(), 1);
        let job_id = harness.enqueue("doc-1", JobType::SingleImage, "vision");

        // The process dies mid-job on every attempt
        for attempt in 1..=3 {
            let job = harness.db().claim_next_job().unwrap().unwrap();
            assert_eq!(job.attempt_count, attempt);
            harness.service.recover().unwrap();
        }

        let job = harness.db().get_job(&job_id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.attempt_count, 3);
        assert_eq!(job.last_error.as_deref(), Some(EXHAUSTED_JOB_MESSAGE));
        assert!(harness.db().claim_next_job().unwrap().is_none());

        let doc = harness.db().get_document("doc-1").unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Error);
        assert_eq!(doc.processing_error.as_deref(), Some(EXHAUSTED_JOB_MESSAGE));

        // Nothing changes on further restarts
        assert!(harness.service.recover().unwrap().is_empty());
    }

    #[test]
    fn test_recover_on_clean_database() {
        let harness = Harness::new(ScriptedVision::echo(), 1);
        let report = harness.service.recover().unwrap();
        assert!(report.is_empty());
        assert_eq!(report, RecoveryReport::default());
    }

    #[tokio::test]
    async fn test_requeued_job_resumes_from_checkpoints() {
        let harness = Harness::new(ScriptedVision::echo(), 3);
        let job_id = harness.enqueue("doc-1", JobType::SingleFile, "vision");
        let job = harness.db().claim_next_job().unwrap().unwrap();
        for page in [1, 2] {
            harness
                .db()
                .upsert_checkpoint(&job.id, "doc-1", page, &page_text(page))
                .unwrap();
        }

        harness.service.recover().unwrap();
        let job = harness.db().claim_next_job().unwrap().unwrap();
        assert_eq!(job.id, job_id);
        assert_eq!(job.attempt_count, 2);
        harness.service.run_job(job).await;

        assert_eq!(harness.vision.single_pages(), vec![3]);
        let doc = harness.db().get_document("doc-1").unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Ready);
        let text = doc.full_text.unwrap();
        assert!(text.starts_with("Page 1 reads"));
        assert!(text.contains("Page 3 reads"));
    }
}
