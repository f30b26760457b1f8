use std::time::Duration;

use thiserror::Error;

/// Main service error type
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Document not found: {document_id}")]
    DocumentNotFound { document_id: String },

    #[error("OCR job not found: {job_id}")]
    JobNotFound { job_id: String },

    #[error("An OCR job is already active for document {document_id}")]
    Conflict { document_id: String },

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("Database error")]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl ServiceError {
    /// Errors that no amount of queue-level retrying can fix.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ServiceError::InvalidRequest { .. }
                | ServiceError::Extraction(ExtractionError::Validation { .. })
                | ServiceError::Extraction(ExtractionError::InsufficientText { .. })
                | ServiceError::Extraction(ExtractionError::NoPages { .. })
        )
    }
}

/// Vision provider errors
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Connection failed to vision provider at {url}")]
    Connection {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Model not found: {model}")]
    ModelNotFound { model: String },

    #[error("Rate limited by provider (status {status}): {message}")]
    RateLimited {
        status: u16,
        code: Option<String>,
        message: String,
        hint: RetryHint,
    },

    #[error("Request failed (status {status}): {message}")]
    Request { status: u16, message: String },

    #[error("Invalid response from vision provider")]
    InvalidResponse {
        #[source]
        source: serde_json::Error,
    },

    #[error("Vision provider returned no content")]
    EmptyResponse,

    #[error("Gave up after {attempts} rate-limited attempts")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<ProviderError>,
    },
}

impl ProviderError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ProviderError::RateLimited { .. })
    }
}

/// Delay hints a provider attached to a rate-limit response.
///
/// Only the raw values are kept here; `RetryPolicy` decides which one wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryHint {
    /// `retry-after-ms` header
    pub retry_after_ms: Option<Duration>,
    /// `retry-after` header, in seconds
    pub retry_after: Option<Duration>,
    /// `x-ratelimit-reset-tokens` header
    pub reset_tokens: Option<Duration>,
}

/// Database errors
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database connection failed")]
    Connection(#[source] rusqlite::Error),

    #[error("Query failed")]
    Query(#[source] rusqlite::Error),

    #[error("Migration failed: {message}")]
    Migration { message: String },

    #[error("Serialization failed")]
    Serialization(#[source] serde_json::Error),

    #[error("Database lock poisoned")]
    LockPoisoned,
}

/// Extraction pipeline errors
#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("Invalid OCR job: {message}")]
    Validation { message: String },

    #[error(
        "No readable text was found ({chars} characters extracted, at least {min} required). \
         The scan may be blank or too low quality to read."
    )]
    InsufficientText { chars: usize, min: usize },

    #[error("Source {filename} contains no pages")]
    NoPages { filename: String },

    #[error("Source file {filename} is unavailable")]
    SourceUnavailable {
        filename: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Unsupported source {filename}: {reason}")]
    UnsupportedSource { filename: String, reason: String },

    #[error("Pages {missing:?} have no extracted text")]
    MissingPages { missing: Vec<u32> },

    #[error("Advanced OCR failed: {message}")]
    Advanced { message: String },
}

/// Result type alias for service operations
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Render an error and its full `source()` chain on one line for logging.
pub fn format_error_chain_ref(err: &(dyn std::error::Error + 'static)) -> String {
    let mut out = err.to_string();
    let mut current = err.source();
    while let Some(source) = current {
        out.push_str(": ");
        out.push_str(&source.to_string());
        current = source.source();
    }
    out
}
