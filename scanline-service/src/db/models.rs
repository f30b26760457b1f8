//! Database model structs.
//!
//! This module contains the data structures for database records.

use chrono::{DateTime, Utc};
use rusqlite::Row;
use serde::{Deserialize, Serialize};

/// Model used when a job asks for nothing, or for something not on the allow-list
pub const BASELINE_OCR_MODEL: &str = "gpt-4o-mini";

/// Vision models a job may request
pub const ALLOWED_OCR_MODELS: &[&str] = &["gpt-4o-mini", "gpt-4o", "gpt-4.1-mini", "gpt-4.1"];

/// Pick the model for a new job.
///
/// A requested model outside the allow-list silently falls back to the
/// configured default, and that default falls back to the baseline model.
pub fn resolve_ocr_model(requested: Option<&str>, configured_default: &str) -> String {
    let allowed = |m: &str| ALLOWED_OCR_MODELS.contains(&m);
    match requested.map(str::trim) {
        Some(model) if allowed(model) => model.to_string(),
        _ if allowed(configured_default) => configured_default.to_string(),
        _ => BASELINE_OCR_MODEL.to_string(),
    }
}

/// Shape of the source behind a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// A multi-page upload such as a PDF
    SingleFile,
    /// One photographed or scanned page
    SingleImage,
    /// Several images forming one document
    ImageBundle,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::SingleFile => "single_file",
            JobType::SingleImage => "single_image",
            JobType::ImageBundle => "image_bundle",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "single_file" => Some(JobType::SingleFile),
            "single_image" => Some(JobType::SingleImage),
            "image_bundle" => Some(JobType::ImageBundle),
            _ => None,
        }
    }
}

/// Lifecycle state of an OCR job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(JobStatus::Queued),
            "running" => Some(JobStatus::Running),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    /// Queued and running jobs block a new job for the same document
    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Queued | JobStatus::Running)
    }
}

/// How page text is extracted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OcrMode {
    /// Layout-aware OCR engine; single-file jobs only
    Advanced,
    /// Vision model, batching chosen by page count
    Vision,
    /// Vision model, always batched
    VisionBatch,
}

impl OcrMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            OcrMode::Advanced => "advanced",
            OcrMode::Vision => "vision",
            OcrMode::VisionBatch => "vision_batch",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "advanced" => Some(OcrMode::Advanced),
            "vision" => Some(OcrMode::Vision),
            "vision_batch" => Some(OcrMode::VisionBatch),
            _ => None,
        }
    }

    pub fn is_valid_for(&self, job_type: JobType) -> bool {
        !matches!(self, OcrMode::Advanced) || job_type == JobType::SingleFile
    }
}

/// JSON payload persisted with each job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobPayload {
    pub source_filename: String,
    pub ocr_mode: OcrMode,
    pub ocr_model: String,
}

/// OCR job record
#[derive(Debug, Clone, Serialize)]
pub struct OcrJob {
    pub id: String,
    pub document_id: String,
    pub job_type: JobType,
    pub status: JobStatus,
    /// Raw JSON; decoded with [`OcrJob::payload`] so a corrupt row fails the job, not the claim
    pub payload: String,
    pub attempt_count: u32,
    pub max_attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl OcrJob {
    pub(crate) const COLUMNS: &'static str = "id, document_id, job_type, status, payload, attempt_count, max_attempts, last_error, created_at, started_at, updated_at, finished_at";

    pub(crate) fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let job_type_str: String = row.get(2)?;
        let status_str: String = row.get(3)?;
        let attempt_count: i64 = row.get(5)?;
        let max_attempts: i64 = row.get(6)?;
        let created_at_str: String = row.get(8)?;
        let started_at_str: Option<String> = row.get(9)?;
        let updated_at_str: String = row.get(10)?;
        let finished_at_str: Option<String> = row.get(11)?;

        let job_type = JobType::parse(&job_type_str).ok_or_else(|| invalid_text(2, &job_type_str))?;
        let status = JobStatus::parse(&status_str).ok_or_else(|| invalid_text(3, &status_str))?;

        Ok(Self {
            id: row.get(0)?,
            document_id: row.get(1)?,
            job_type,
            status,
            payload: row.get(4)?,
            attempt_count: attempt_count.max(0) as u32,
            max_attempts: max_attempts.max(0) as u32,
            last_error: row.get(7)?,
            created_at: parse_timestamp(&created_at_str),
            started_at: started_at_str.as_deref().map(parse_timestamp),
            updated_at: parse_timestamp(&updated_at_str),
            finished_at: finished_at_str.as_deref().map(parse_timestamp),
        })
    }

    /// Decode the stored payload
    pub fn payload(&self) -> Result<JobPayload, serde_json::Error> {
        serde_json::from_str(&self.payload)
    }

    pub fn attempts_remaining(&self) -> bool {
        self.attempt_count < self.max_attempts
    }
}

/// Extracted text for one page of one job
#[derive(Debug, Clone, Serialize)]
pub struct PageCheckpoint {
    pub id: String,
    pub job_id: String,
    pub document_id: String,
    pub page_number: u32,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PageCheckpoint {
    pub(crate) fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let page_number: i64 = row.get(3)?;
        let created_at_str: String = row.get(5)?;
        let updated_at_str: String = row.get(6)?;

        Ok(Self {
            id: row.get(0)?,
            job_id: row.get(1)?,
            document_id: row.get(2)?,
            page_number: page_number.max(1) as u32,
            text: row.get(4)?,
            created_at: parse_timestamp(&created_at_str),
            updated_at: parse_timestamp(&updated_at_str),
        })
    }
}

/// Processing status of a document as seen by readers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Processing,
    Ready,
    Error,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Processing => "processing",
            DocumentStatus::Ready => "ready",
            DocumentStatus::Error => "error",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "ready" => DocumentStatus::Ready,
            "error" => DocumentStatus::Error,
            _ => DocumentStatus::Processing,
        }
    }
}

/// Document record
#[derive(Debug, Clone, Serialize)]
pub struct Document {
    pub id: String,
    pub filename: String,
    pub status: DocumentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_text: Option<String>,
    pub chunk_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    pub(crate) fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let status_str: String = row.get(2)?;
        let chunk_count: i64 = row.get(5)?;
        let created_at_str: String = row.get(6)?;
        let updated_at_str: String = row.get(7)?;

        Ok(Self {
            id: row.get(0)?,
            filename: row.get(1)?,
            status: DocumentStatus::from_str(&status_str),
            processing_error: row.get(3)?,
            full_text: row.get(4)?,
            chunk_count: chunk_count.max(0) as usize,
            created_at: parse_timestamp(&created_at_str),
            updated_at: parse_timestamp(&updated_at_str),
        })
    }
}

/// Chunk record
#[derive(Debug, Clone, Serialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub content: String,
    pub chunk_index: usize,
    pub created_at: DateTime<Utc>,
}

impl Chunk {
    pub(crate) fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let chunk_index: i64 = row.get(3)?;
        let created_at_str: String = row.get(4)?;

        Ok(Self {
            id: row.get(0)?,
            document_id: row.get(1)?,
            content: row.get(2)?,
            chunk_index: chunk_index.max(0) as usize,
            created_at: parse_timestamp(&created_at_str),
        })
    }
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn invalid_text(column: usize, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        column,
        rusqlite::types::Type::Text,
        format!("unexpected value '{}'", value).into(),
    )
}
