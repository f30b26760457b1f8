//! Configuration struct definitions for each section.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// Storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Holds the SQLite database and the `sources/` tree of uploaded page images
    #[serde(default = "super::defaults::default_data_dir")]
    pub data_dir: PathBuf,
}

impl StorageConfig {
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("scanline.db")
    }

    pub fn sources_dir(&self) -> PathBuf {
        self.data_dir.join("sources")
    }
}

/// Vision provider configuration (OpenAI-compatible chat completions API)
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "super::defaults::default_provider_url")]
    pub base_url: String,

    #[serde(default)]
    pub api_key: Option<String>,

    /// Model used when a job names no model or one outside the allow-list
    #[serde(default = "super::defaults::default_model")]
    pub default_model: String,

    #[serde(default = "super::defaults::default_temperature")]
    pub temperature: f32,

    #[serde(default = "super::defaults::default_max_tokens")]
    pub max_tokens: u32,

    /// Per-request timeout; there is no per-job timeout
    #[serde(default = "super::defaults::default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// OCR queue and extraction tunables
#[derive(Debug, Clone, Deserialize)]
pub struct OcrConfig {
    /// Simultaneous single-page requests in page mode
    #[serde(default = "super::defaults::default_page_concurrency")]
    pub page_concurrency: usize,

    /// Pages per batched request
    #[serde(default = "super::defaults::default_batch_size")]
    pub batch_size: usize,

    /// Simultaneous batched requests in batch mode
    #[serde(default = "super::defaults::default_batch_concurrency")]
    pub batch_concurrency: usize,

    /// Pending page count at which batch mode is chosen automatically
    #[serde(default = "super::defaults::default_auto_batch_threshold")]
    pub auto_batch_threshold: usize,

    /// Master switch for batch mode; `vision_batch` jobs are also downgraded when off
    #[serde(default = "super::defaults::default_batching_enabled")]
    pub batching_enabled: bool,

    /// Pending page count above which work is split into sequential super-chunks
    #[serde(default = "super::defaults::default_super_chunk_pages")]
    pub super_chunk_pages: usize,

    /// In-place retries for rate-limited requests
    #[serde(default = "super::defaults::default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "super::defaults::default_base_retry_delay_ms")]
    pub base_retry_delay_ms: u64,

    #[serde(default = "super::defaults::default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,

    #[serde(default = "super::defaults::default_retry_jitter_ms")]
    pub retry_jitter_ms: u64,

    /// Provider throughput budget; 0 disables pacing
    #[serde(default = "super::defaults::default_tokens_per_minute")]
    pub tokens_per_minute: u64,

    /// Assumed cost of one request, used to derive the minimum request gap
    #[serde(default = "super::defaults::default_estimated_tokens_per_request")]
    pub estimated_tokens_per_request: u64,

    /// Queue-level attempts per job
    #[serde(default = "super::defaults::default_job_max_attempts")]
    pub job_max_attempts: u32,

    /// Assembled text shorter than this is treated as unreadable
    #[serde(default = "super::defaults::default_min_text_chars")]
    pub min_text_chars: usize,

    /// How often the worker looks for jobs enqueued by other processes
    #[serde(default = "super::defaults::default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

impl OcrConfig {
    /// Smallest interval allowed between two outbound model requests.
    pub fn min_request_gap(&self) -> Duration {
        if self.tokens_per_minute == 0 {
            return Duration::ZERO;
        }
        let millis = 60_000u128 * u128::from(self.estimated_tokens_per_request)
            / u128::from(self.tokens_per_minute);
        Duration::from_millis(u64::try_from(millis).unwrap_or(u64::MAX))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    /// Clamp values that would stall the engine and reconcile the batch
    /// threshold with the batch size.
    ///
    /// A threshold below the batch size would pick batch mode for a pending
    /// set smaller than one full batch, so the threshold is raised instead.
    pub fn normalized(mut self) -> Self {
        self.page_concurrency = self.page_concurrency.max(1);
        self.batch_concurrency = self.batch_concurrency.max(1);
        self.batch_size = self.batch_size.max(1);
        self.super_chunk_pages = self.super_chunk_pages.max(1);
        self.job_max_attempts = self.job_max_attempts.max(1);
        self.max_retry_delay_ms = self.max_retry_delay_ms.max(self.base_retry_delay_ms);

        if self.auto_batch_threshold < self.batch_size {
            warn!(
                auto_batch_threshold = self.auto_batch_threshold,
                batch_size = self.batch_size,
                "auto_batch_threshold is below batch_size, raising it to batch_size"
            );
            self.auto_batch_threshold = self.batch_size;
        }

        self
    }
}

/// Chunking of the final assembled text
#[derive(Debug, Clone, Deserialize)]
pub struct ChunkingConfig {
    /// Words per chunk
    #[serde(default = "super::defaults::default_chunk_size")]
    pub chunk_size: usize,

    /// Words shared by consecutive chunks
    #[serde(default = "super::defaults::default_chunk_overlap")]
    pub chunk_overlap: usize,
}

/// External layout-aware OCR engine used by `advanced` jobs
#[derive(Debug, Clone, Deserialize)]
pub struct AdvancedOcrConfig {
    /// Program to run; advanced jobs fail validation when unset
    #[serde(default)]
    pub command: Option<String>,

    /// Value passed as `--model`
    #[serde(default = "super::defaults::default_advanced_model")]
    pub model: String,

    #[serde(default = "super::defaults::default_advanced_timeout_secs")]
    pub timeout_secs: u64,
}
