//! Retrieval of page images for an OCR job.
//!
//! Converting PDFs or camera formats into page images happens before a job is
//! enqueued. This module only serves images that already exist.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use crate::db::JobType;
use crate::error::ExtractionError;
use crate::vision::PageImage;

/// Suffix of the directory holding pre-rasterized pages of a multi-page file
const RASTERIZED_PAGES_SUFFIX: &str = ".pages";

/// Delivers the page images behind a job, ordered by page number
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn load_pages(
        &self,
        document_id: &str,
        source_filename: &str,
        job_type: JobType,
    ) -> Result<Vec<PageImage>, ExtractionError>;
}

/// Serves images stored under `<root>/<document_id>/`.
///
/// - single image: `<root>/<document_id>/<filename>`
/// - image bundle: the directory `<root>/<document_id>/<filename>/`, pages
///   ordered by file name
/// - single file: `<filename>` itself when it is an image, otherwise the
///   rasterized pages in `<filename>.pages/`
pub struct FsPageSource {
    root: PathBuf,
}

impl FsPageSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Location of a source file; rejects names that would escape the document directory
    pub fn resolve(
        &self,
        document_id: &str,
        source_filename: &str,
    ) -> Result<PathBuf, ExtractionError> {
        for part in [document_id, source_filename] {
            let path = Path::new(part);
            let plain = !part.is_empty()
                && path.components().count() == 1
                && matches!(path.components().next(), Some(Component::Normal(_)));
            if !plain {
                return Err(ExtractionError::UnsupportedSource {
                    filename: source_filename.to_string(),
                    reason: format!("'{}' is not a plain file name", part),
                });
            }
        }
        Ok(self.root.join(document_id).join(source_filename))
    }
}

#[async_trait]
impl PageSource for FsPageSource {
    async fn load_pages(
        &self,
        document_id: &str,
        source_filename: &str,
        job_type: JobType,
    ) -> Result<Vec<PageImage>, ExtractionError> {
        let path = self.resolve(document_id, source_filename)?;

        let pages = match job_type {
            JobType::SingleImage => vec![read_image(&path, source_filename, 1).await?],
            JobType::ImageBundle => read_image_dir(&path, source_filename).await?,
            JobType::SingleFile => {
                if mime_type_for(&path).is_some() {
                    vec![read_image(&path, source_filename, 1).await?]
                } else {
                    let mut pages_dir = path.clone().into_os_string();
                    pages_dir.push(RASTERIZED_PAGES_SUFFIX);
                    let pages_dir = PathBuf::from(pages_dir);
                    if !tokio::fs::try_exists(&pages_dir).await.unwrap_or(false) {
                        return Err(ExtractionError::UnsupportedSource {
                            filename: source_filename.to_string(),
                            reason: "no rasterized page images are available".to_string(),
                        });
                    }
                    read_image_dir(&pages_dir, source_filename).await?
                }
            }
        };

        debug!(
            doc_id = %document_id,
            filename = %source_filename,
            pages = pages.len(),
            "Loaded page images"
        );
        Ok(pages)
    }
}

fn mime_type_for(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        _ => None,
    }
}

async fn read_image(
    path: &Path,
    source_filename: &str,
    page_number: u32,
) -> Result<PageImage, ExtractionError> {
    let mime_type = mime_type_for(path).ok_or_else(|| ExtractionError::UnsupportedSource {
        filename: source_filename.to_string(),
        reason: format!("{} is not a supported image type", path.display()),
    })?;

    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| ExtractionError::SourceUnavailable {
            filename: source_filename.to_string(),
            source: e,
        })?;

    Ok(PageImage {
        page_number,
        mime_type: mime_type.to_string(),
        bytes,
    })
}

async fn read_image_dir(
    dir: &Path,
    source_filename: &str,
) -> Result<Vec<PageImage>, ExtractionError> {
    let unavailable = |e| ExtractionError::SourceUnavailable {
        filename: source_filename.to_string(),
        source: e,
    };

    let mut entries = tokio::fs::read_dir(dir).await.map_err(unavailable)?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(unavailable)? {
        let path = entry.path();
        let is_file = entry.file_type().await.map_err(unavailable)?.is_file();
        if is_file && mime_type_for(&path).is_some() {
            files.push(path);
        }
    }
    files.sort();

    if files.is_empty() {
        return Err(ExtractionError::NoPages {
            filename: source_filename.to_string(),
        });
    }

    let mut pages = Vec::with_capacity(files.len());
    for (index, path) in files.iter().enumerate() {
        pages.push(read_image(path, source_filename, index as u32 + 1).await?);
    }
    Ok(pages)
}
