//! Page and batch extraction.
//!
//! Every page result is checkpointed the moment it arrives. A retried job
//! only requests pages that have no checkpoint, and the final text is read
//! back from the checkpoints in page order, so completion order never matters.

use std::collections::BTreeMap;

use futures::{StreamExt, TryStreamExt, stream};
use tracing::{debug, info, warn};

use super::batch_response::{BatchParse, parse_batch_response};
use super::prompts;
use crate::db::{JobPayload, OcrJob, OcrMode};
use crate::error::{ExtractionError, ServiceError, ServiceResult, format_error_chain_ref};
use crate::rate_limit::call_with_retry;
use crate::service::OcrService;
use crate::vision::PageImage;

/// How pending pages are sent to the model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ExtractionMode {
    /// One image per request
    Page,
    /// `batch_size` images per request
    Batch,
}

impl OcrService {
    pub(crate) fn choose_mode(&self, mode: OcrMode, pending: usize) -> ExtractionMode {
        let ocr = &self.config.ocr;
        match mode {
            OcrMode::VisionBatch if ocr.batching_enabled => ExtractionMode::Batch,
            OcrMode::Vision if ocr.batching_enabled && pending >= ocr.auto_batch_threshold => {
                ExtractionMode::Batch
            }
            _ => ExtractionMode::Page,
        }
    }

    /// Extract every page of the job and return the assembled document text
    pub(crate) async fn extract_job_text(
        &self,
        job: &OcrJob,
        payload: &JobPayload,
    ) -> ServiceResult<String> {
        if !payload.ocr_mode.is_valid_for(job.job_type) {
            return Err(ExtractionError::Validation {
                message: format!(
                    "OCR mode '{}' is not available for {} jobs",
                    payload.ocr_mode.as_str(),
                    job.job_type.as_str()
                ),
            }
            .into());
        }

        let page_numbers = match payload.ocr_mode {
            OcrMode::Advanced => self.run_advanced(job, payload).await?,
            OcrMode::Vision | OcrMode::VisionBatch => self.run_vision(job, payload).await?,
        };

        self.assemble(job, &page_numbers)
    }

    async fn run_vision(&self, job: &OcrJob, payload: &JobPayload) -> ServiceResult<Vec<u32>> {
        let pages = self
            .pages
            .load_pages(&job.document_id, &payload.source_filename, job.job_type)
            .await?;
        if pages.is_empty() {
            return Err(ExtractionError::NoPages {
                filename: payload.source_filename.clone(),
            }
            .into());
        }

        let done = self.db.load_checkpoints(&job.id)?;
        let page_numbers: Vec<u32> = pages.iter().map(|p| p.page_number).collect();
        let pending: Vec<PageImage> = pages
            .into_iter()
            .filter(|p| !done.contains_key(&p.page_number))
            .collect();

        info!(
            job_id = %job.id,
            doc_id = %job.document_id,
            total_pages = page_numbers.len(),
            checkpointed = page_numbers.len() - pending.len(),
            pending = pending.len(),
            model = %payload.ocr_model,
            "Extracting pages"
        );

        // Super-chunks run one after another, each choosing its own mode
        let super_chunk = self.config.ocr.super_chunk_pages.max(1);
        for (index, chunk) in pending.chunks(super_chunk).enumerate() {
            let mode = self.choose_mode(payload.ocr_mode, chunk.len());
            debug!(
                job_id = %job.id,
                super_chunk = index + 1,
                pages = chunk.len(),
                mode = ?mode,
                "Extracting super-chunk"
            );
            match mode {
                ExtractionMode::Page => {
                    self.extract_pages(job, &payload.ocr_model, chunk.iter().collect())
                        .await?
                }
                ExtractionMode::Batch => {
                    self.extract_batches(job, &payload.ocr_model, chunk).await?
                }
            }
        }

        Ok(page_numbers)
    }

    async fn run_advanced(&self, job: &OcrJob, payload: &JobPayload) -> ServiceResult<Vec<u32>> {
        let engine = self
            .advanced
            .as_ref()
            .ok_or_else(|| ExtractionError::Validation {
                message: "Advanced OCR is not configured".to_string(),
            })?;

        let pages = engine
            .extract_document(&job.document_id, &payload.source_filename)
            .await?;
        for (page_number, text) in &pages {
            self.db
                .upsert_checkpoint(&job.id, &job.document_id, *page_number, text)?;
        }

        info!(job_id = %job.id, pages = pages.len(), "Advanced OCR pages checkpointed");
        Ok(pages.into_keys().collect())
    }

    /// Single-page requests, at most `page_concurrency` in flight
    async fn extract_pages(
        &self,
        job: &OcrJob,
        model: &str,
        pages: Vec<&PageImage>,
    ) -> ServiceResult<()> {
        stream::iter(pages.into_iter().map(Ok::<_, ServiceError>))
            .try_for_each_concurrent(self.config.ocr.page_concurrency, |page| {
                self.extract_single_page(job, model, page)
            })
            .await
    }

    async fn extract_single_page(
        &self,
        job: &OcrJob,
        model: &str,
        page: &PageImage,
    ) -> ServiceResult<()> {
        let label = format!("page {}", page.page_number);
        let text = call_with_retry(&self.pacer, &self.retry, &label, || {
            self.vision
                .complete(model, prompts::SINGLE_PAGE_PROMPT, std::slice::from_ref(page))
        })
        .await?;

        self.db
            .upsert_checkpoint(&job.id, &job.document_id, page.page_number, &text)?;
        debug!(job_id = %job.id, page = page.page_number, chars = text.len(), "Page checkpointed");
        Ok(())
    }

    /// Batched requests of `batch_size` pages, at most `batch_concurrency` in flight
    async fn extract_batches(
        &self,
        job: &OcrJob,
        model: &str,
        pages: &[PageImage],
    ) -> ServiceResult<()> {
        stream::iter(pages.chunks(self.config.ocr.batch_size.max(1)))
            .map(Ok::<_, ServiceError>)
            .try_for_each_concurrent(self.config.ocr.batch_concurrency, |batch| {
                self.extract_batch(job, model, batch)
            })
            .await
    }

    /// One batched request. Pages the response does not cover, for whatever
    /// reason, are re-requested one by one; a batch failure is never returned.
    async fn extract_batch(
        &self,
        job: &OcrJob,
        model: &str,
        batch: &[PageImage],
    ) -> ServiceResult<()> {
        let (Some(first), Some(last)) = (batch.first(), batch.last()) else {
            return Ok(());
        };
        let label = format!("pages {}-{}", first.page_number, last.page_number);
        let prompt = prompts::batch_prompt(batch.len());

        let response = call_with_retry(&self.pacer, &self.retry, &label, || {
            self.vision.complete(model, &prompt, batch)
        })
        .await;

        let texts = match response {
            Ok(raw) => match parse_batch_response(&raw, batch.len()) {
                BatchParse::Parsed(texts) => texts,
                BatchParse::Malformed(reason) => {
                    warn!(
                        job_id = %job.id,
                        pages = %label,
                        %reason,
                        "Malformed batch response, falling back to single pages"
                    );
                    vec![None; batch.len()]
                }
            },
            Err(e) => {
                warn!(
                    job_id = %job.id,
                    pages = %label,
                    error = %format_error_chain_ref(&e),
                    "Batch request failed, falling back to single pages"
                );
                vec![None; batch.len()]
            }
        };

        let mut missing = Vec::new();
        for (page, text) in batch.iter().zip(texts) {
            match text {
                Some(text) => {
                    self.db
                        .upsert_checkpoint(&job.id, &job.document_id, page.page_number, &text)?;
                }
                None => missing.push(page),
            }
        }

        if !missing.is_empty() {
            debug!(
                job_id = %job.id,
                pages = %label,
                missing = missing.len(),
                "Extracting pages missing from batch individually"
            );
            self.extract_pages(job, model, missing).await?;
        }
        Ok(())
    }

    /// Read the checkpoints back in page order and build the final text
    fn assemble(&self, job: &OcrJob, page_numbers: &[u32]) -> ServiceResult<String> {
        let checkpoints = self.db.load_checkpoints(&job.id)?;

        let missing: Vec<u32> = page_numbers
            .iter()
            .copied()
            .filter(|p| !checkpoints.contains_key(p))
            .collect();
        if !missing.is_empty() {
            return Err(ExtractionError::MissingPages { missing }.into());
        }

        let text = assemble_text(&checkpoints);
        let chars = text.chars().count();
        let min = self.config.ocr.min_text_chars;
        if chars < min {
            return Err(ExtractionError::InsufficientText { chars, min }.into());
        }
        Ok(text)
    }
}

/// Join page texts in page order, separated by a blank line
pub(crate) fn assemble_text(pages: &BTreeMap<u32, String>) -> String {
    pages
        .values()
        .map(|text| normalize_whitespace(text))
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Collapse runs of spaces within lines and runs of blank lines, trim the ends
fn normalize_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = false;

    for line in text.lines() {
        let line = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if line.is_empty() {
            blank_run = !out.is_empty();
            continue;
        }
        if !out.is_empty() {
            out.push_str(if blank_run { "\n\n" } else { "\n" });
        }
        out.push_str(&line);
        blank_run = false;
    }
    out
}
