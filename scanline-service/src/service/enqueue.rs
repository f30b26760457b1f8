//! Job intake.

use tracing::info;

use crate::db::{JobPayload, JobType, NewJob, OcrMode, resolve_ocr_model};
use crate::error::{ServiceError, ServiceResult};
use crate::service::OcrService;

/// Caller-supplied parameters for a new OCR job
#[derive(Debug, Clone, Default)]
pub struct EnqueueRequest<'a> {
    pub document_id: &'a str,
    pub source_filename: &'a str,
    /// `advanced`, `vision` or `vision_batch`
    pub mode: &'a str,
    /// Requested vision model; unknown models fall back to the configured default
    pub model: Option<&'a str>,
    /// Overrides `ocr.job_max_attempts`
    pub max_attempts: Option<u32>,
}

impl OcrService {
    /// Queue OCR for a multi-page upload
    pub fn enqueue_file_ocr(&self, request: &EnqueueRequest<'_>) -> ServiceResult<String> {
        self.enqueue(JobType::SingleFile, request)
    }

    /// Queue OCR for one photographed or scanned page
    pub fn enqueue_image_ocr(&self, request: &EnqueueRequest<'_>) -> ServiceResult<String> {
        self.enqueue(JobType::SingleImage, request)
    }

    /// Queue OCR for a set of images forming one document
    pub fn enqueue_bundle_ocr(&self, request: &EnqueueRequest<'_>) -> ServiceResult<String> {
        self.enqueue(JobType::ImageBundle, request)
    }

    fn enqueue(&self, job_type: JobType, request: &EnqueueRequest<'_>) -> ServiceResult<String> {
        let mode_str = request.mode.trim();
        let mode = OcrMode::parse(mode_str).ok_or_else(|| ServiceError::InvalidRequest {
            message: format!("Unknown OCR mode '{}'", mode_str),
        })?;
        if !mode.is_valid_for(job_type) {
            return Err(ServiceError::InvalidRequest {
                message: format!(
                    "OCR mode '{}' is not available for {} jobs",
                    mode.as_str(),
                    job_type.as_str()
                ),
            });
        }
        if request.source_filename.trim().is_empty() {
            return Err(ServiceError::InvalidRequest {
                message: "Source filename is required".to_string(),
            });
        }

        let payload = JobPayload {
            source_filename: request.source_filename.to_string(),
            ocr_mode: mode,
            ocr_model: resolve_ocr_model(request.model, &self.config.provider.default_model),
        };
        let max_attempts = request
            .max_attempts
            .unwrap_or(self.config.ocr.job_max_attempts)
            .max(1);

        let job_id = self.db.enqueue_job(&NewJob {
            document_id: request.document_id,
            job_type,
            payload: &payload,
            max_attempts,
        })?;

        info!(
            job_id = %job_id,
            doc_id = %request.document_id,
            job_type = job_type.as_str(),
            mode = mode.as_str(),
            model = %payload.ocr_model,
            max_attempts,
            "OCR job enqueued"
        );

        self.wakeup.notify_one();
        Ok(job_id)
    }
}
