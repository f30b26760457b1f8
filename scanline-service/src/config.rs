//! Service configuration.
//!
//! Values come from an optional `config` file followed by `SCANLINE__*`
//! environment variables (e.g. `SCANLINE__OCR__PAGE_CONCURRENCY=3`).

mod defaults;
mod loader;
mod schemas;

use serde::Deserialize;

pub use loader::{load_config, load_config_from};
pub use schemas::{AdvancedOcrConfig, ChunkingConfig, OcrConfig, ProviderConfig, StorageConfig};

use defaults::{default_advanced, default_chunking, default_ocr, default_provider, default_storage};

/// Top-level configuration for the OCR service
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_storage")]
    pub storage: StorageConfig,

    #[serde(default = "default_provider")]
    pub provider: ProviderConfig,

    #[serde(default = "default_ocr")]
    pub ocr: OcrConfig,

    #[serde(default = "default_advanced")]
    pub advanced: AdvancedOcrConfig,

    #[serde(default = "default_chunking")]
    pub chunking: ChunkingConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            storage: default_storage(),
            provider: default_provider(),
            ocr: default_ocr(),
            advanced: default_advanced(),
            chunking: default_chunking(),
        }
    }
}
