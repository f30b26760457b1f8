//! Default value functions for configuration.

use std::path::PathBuf;

use super::schemas::{AdvancedOcrConfig, ChunkingConfig, OcrConfig, ProviderConfig, StorageConfig};

// ==================== Section Defaults ====================

pub(crate) fn default_storage() -> StorageConfig {
    StorageConfig {
        data_dir: default_data_dir(),
    }
}

pub(crate) fn default_provider() -> ProviderConfig {
    ProviderConfig {
        base_url: default_provider_url(),
        api_key: None,
        default_model: default_model(),
        temperature: default_temperature(),
        max_tokens: default_max_tokens(),
        request_timeout_secs: default_request_timeout_secs(),
    }
}

pub(crate) fn default_ocr() -> OcrConfig {
    OcrConfig {
        page_concurrency: default_page_concurrency(),
        batch_size: default_batch_size(),
        batch_concurrency: default_batch_concurrency(),
        auto_batch_threshold: default_auto_batch_threshold(),
        batching_enabled: default_batching_enabled(),
        super_chunk_pages: default_super_chunk_pages(),
        max_retries: default_max_retries(),
        base_retry_delay_ms: default_base_retry_delay_ms(),
        max_retry_delay_ms: default_max_retry_delay_ms(),
        retry_jitter_ms: default_retry_jitter_ms(),
        tokens_per_minute: default_tokens_per_minute(),
        estimated_tokens_per_request: default_estimated_tokens_per_request(),
        job_max_attempts: default_job_max_attempts(),
        min_text_chars: default_min_text_chars(),
        poll_interval_secs: default_poll_interval_secs(),
    }
}

pub(crate) fn default_advanced() -> AdvancedOcrConfig {
    AdvancedOcrConfig {
        command: None,
        model: default_advanced_model(),
        timeout_secs: default_advanced_timeout_secs(),
    }
}

pub(crate) fn default_chunking() -> ChunkingConfig {
    ChunkingConfig {
        chunk_size: default_chunk_size(),
        chunk_overlap: default_chunk_overlap(),
    }
}

// ==================== Storage ====================

pub(crate) fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

// ==================== Provider ====================

pub(crate) fn default_provider_url() -> String {
    "https://api.openai.com/v1".to_string()
}

pub(crate) fn default_model() -> String {
    crate::db::BASELINE_OCR_MODEL.to_string()
}

pub(crate) fn default_temperature() -> f32 {
    0.0
}

pub(crate) fn default_max_tokens() -> u32 {
    4096
}

pub(crate) fn default_request_timeout_secs() -> u64 {
    120
}

// ==================== OCR ====================

pub(crate) fn default_page_concurrency() -> usize {
    5
}

pub(crate) fn default_batch_size() -> usize {
    2
}

pub(crate) fn default_batch_concurrency() -> usize {
    2
}

pub(crate) fn default_auto_batch_threshold() -> usize {
    8
}

pub(crate) fn default_batching_enabled() -> bool {
    true
}

pub(crate) fn default_super_chunk_pages() -> usize {
    30
}

pub(crate) fn default_max_retries() -> u32 {
    8
}

pub(crate) fn default_base_retry_delay_ms() -> u64 {
    1_000
}

pub(crate) fn default_max_retry_delay_ms() -> u64 {
    30_000
}

pub(crate) fn default_retry_jitter_ms() -> u64 {
    250
}

pub(crate) fn default_tokens_per_minute() -> u64 {
    200_000
}

pub(crate) fn default_estimated_tokens_per_request() -> u64 {
    2_000
}

pub(crate) fn default_job_max_attempts() -> u32 {
    3
}

pub(crate) fn default_min_text_chars() -> usize {
    20
}

pub(crate) fn default_poll_interval_secs() -> u64 {
    5
}

// ==================== Chunking ====================

pub(crate) fn default_chunk_size() -> usize {
    300
}

pub(crate) fn default_chunk_overlap() -> usize {
    50
}

// ==================== Advanced OCR ====================

pub(crate) fn default_advanced_model() -> String {
    "ppocr".to_string()
}

pub(crate) fn default_advanced_timeout_secs() -> u64 {
    600
}
