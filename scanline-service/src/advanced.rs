//! Layout-aware OCR through an external engine, used by `advanced` jobs.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::AdvancedOcrConfig;
use crate::error::ExtractionError;
use crate::sources::FsPageSource;

/// Extracts text for a whole source file in one go
#[async_trait]
pub trait AdvancedOcr: Send + Sync {
    /// Page text keyed by 1-based page number
    async fn extract_document(
        &self,
        document_id: &str,
        source_filename: &str,
    ) -> Result<BTreeMap<u32, String>, ExtractionError>;
}

/// Runs `<command> --pdf_path <file> --model <model>` and reads JSON from stdout.
///
/// The engine prints `{"pages":[{"page":0,"text":"..."}]}` with 0-based pages.
pub struct CommandAdvancedOcr {
    program: String,
    model: String,
    timeout: Duration,
    sources: FsPageSource,
}

impl CommandAdvancedOcr {
    /// `None` when no command is configured
    pub fn from_config(config: &AdvancedOcrConfig, sources: FsPageSource) -> Option<Self> {
        let program = config.command.as_deref()?.trim();
        if program.is_empty() {
            return None;
        }
        Some(Self {
            program: program.to_string(),
            model: config.model.clone(),
            timeout: Duration::from_secs(config.timeout_secs.max(1)),
            sources,
        })
    }
}

#[async_trait]
impl AdvancedOcr for CommandAdvancedOcr {
    async fn extract_document(
        &self,
        document_id: &str,
        source_filename: &str,
    ) -> Result<BTreeMap<u32, String>, ExtractionError> {
        let path = self.sources.resolve(document_id, source_filename)?;
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(ExtractionError::SourceUnavailable {
                filename: source_filename.to_string(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            });
        }

        info!(
            doc_id = %document_id,
            program = %self.program,
            model = %self.model,
            "Running advanced OCR engine"
        );

        let run = Command::new(&self.program)
            .arg("--pdf_path")
            .arg(&path)
            .arg("--model")
            .arg(&self.model)
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, run)
            .await
            .map_err(|_| ExtractionError::Advanced {
                message: format!("engine timed out after {}s", self.timeout.as_secs()),
            })?
            .map_err(|e| ExtractionError::Advanced {
                message: format!("failed to run {}: {}", self.program, e),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExtractionError::Advanced {
                message: format!("engine exited with {}: {}", output.status, stderr.trim()),
            });
        }

        let pages = parse_engine_output(&output.stdout)?;
        if pages.is_empty() {
            return Err(ExtractionError::NoPages {
                filename: source_filename.to_string(),
            });
        }

        debug!(doc_id = %document_id, pages = pages.len(), "Advanced OCR finished");
        Ok(pages)
    }
}

#[derive(Debug, Deserialize)]
struct EngineOutput {
    #[serde(default)]
    pages: Vec<EnginePage>,
}

#[derive(Debug, Deserialize)]
struct EnginePage {
    page: u32,
    #[serde(default)]
    text: String,
}

fn parse_engine_output(stdout: &[u8]) -> Result<BTreeMap<u32, String>, ExtractionError> {
    let output: EngineOutput =
        serde_json::from_slice(stdout).map_err(|e| ExtractionError::Advanced {
            message: format!("unreadable engine output: {}", e),
        })?;

    Ok(output
        .pages
        .into_iter()
        .map(|p| (p.page + 1, p.text))
        .collect())
}
