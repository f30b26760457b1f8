//! The OCR service: job intake, extraction, the worker loop and crash recovery.
//!
//! Work is split by concern into submodules that each add methods to
//! [`OcrService`]:
//! - enqueue: validating and persisting new jobs
//! - extraction: page and batch extraction with checkpointing
//! - worker: the claim/run loop and job outcome handling
//! - recovery: startup reconciliation

mod batch_response;
mod enqueue;
mod extraction;
mod prompts;
mod recovery;
mod worker;

#[cfg(test)]
mod testing;

pub use enqueue::EnqueueRequest;
pub use recovery::RecoveryReport;
pub use worker::start_worker;

use std::sync::Arc;

use tokio::sync::Notify;
use tracing::info;

use crate::advanced::AdvancedOcr;
use crate::chunking::TextChunker;
use crate::config::ServiceConfig;
use crate::db::{Database, Document, OcrJob};
use crate::error::ServiceResult;
use crate::rate_limit::{RequestPacer, RetryPolicy};
use crate::sources::PageSource;
use crate::vision::VisionModel;

/// Durable, rate-limited OCR job processing
pub struct OcrService {
    pub db: Arc<Database>,
    config: ServiceConfig,
    vision: Arc<dyn VisionModel>,
    pages: Arc<dyn PageSource>,
    chunker: Arc<dyn TextChunker>,
    advanced: Option<Arc<dyn AdvancedOcr>>,
    /// Shared by every outbound model call in this process
    pacer: RequestPacer,
    retry: RetryPolicy,
    /// Wakes the worker when a job is enqueued in this process
    wakeup: Notify,
}

impl OcrService {
    pub fn new(
        db: Arc<Database>,
        config: ServiceConfig,
        vision: Arc<dyn VisionModel>,
        pages: Arc<dyn PageSource>,
        chunker: Arc<dyn TextChunker>,
    ) -> Self {
        let pacer = RequestPacer::new(config.ocr.min_request_gap());
        let retry = RetryPolicy::from_config(&config.ocr);

        info!(
            min_request_gap_ms = pacer.min_gap().as_millis() as u64,
            page_concurrency = config.ocr.page_concurrency,
            batch_size = config.ocr.batch_size,
            batch_concurrency = config.ocr.batch_concurrency,
            auto_batch_threshold = config.ocr.auto_batch_threshold,
            "OCR service initialized"
        );

        Self {
            db,
            config,
            vision,
            pages,
            chunker,
            advanced: None,
            pacer,
            retry,
            wakeup: Notify::new(),
        }
    }

    /// Enable `advanced` mode jobs
    pub fn with_advanced_ocr(mut self, advanced: Arc<dyn AdvancedOcr>) -> Self {
        self.advanced = Some(advanced);
        self
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn get_job(&self, job_id: &str) -> ServiceResult<Option<OcrJob>> {
        self.db.get_job(job_id)
    }

    pub fn active_job_for_document(&self, document_id: &str) -> ServiceResult<Option<OcrJob>> {
        self.db.get_active_job_for_document(document_id)
    }

    pub fn list_jobs_for_document(&self, document_id: &str) -> ServiceResult<Vec<OcrJob>> {
        self.db.list_jobs_for_document(document_id)
    }

    pub fn get_document(&self, document_id: &str) -> ServiceResult<Option<Document>> {
        self.db.get_document(document_id)
    }
}
