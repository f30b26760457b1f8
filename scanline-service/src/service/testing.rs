//! Scripted collaborators for service tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::OcrService;
use super::prompts::SINGLE_PAGE_PROMPT;
use crate::chunking::WindowChunker;
use crate::config::ServiceConfig;
use crate::db::{Database, JobType};
use crate::error::{ExtractionError, ProviderError};
use crate::sources::PageSource;
use crate::vision::{PageImage, VisionModel};

type SingleReply = Box<dyn Fn(u32) -> Result<String, ProviderError> + Send + Sync>;
type BatchReply = Box<dyn Fn(&[u32]) -> Result<String, ProviderError> + Send + Sync>;

/// One request seen by [`ScriptedVision`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum VisionCall {
    Single(u32),
    Batch(Vec<u32>),
}

/// A request starting or finishing, in the order it happened
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum VisionEvent {
    Started(VisionCall),
    Finished(VisionCall),
}

/// Vision model whose answers are produced by closures
pub(crate) struct ScriptedVision {
    single: SingleReply,
    batch: BatchReply,
    delay: Duration,
    calls: Mutex<Vec<VisionCall>>,
    events: Mutex<Vec<VisionEvent>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

pub(crate) fn page_text(page: u32) -> String {
    format!("Page {} reads: the quick brown fox jumps.", page)
}

pub(crate) fn well_formed_batch(pages: &[u32]) -> String {
    let entries: Vec<_> = pages
        .iter()
        .enumerate()
        .map(|(i, p)| serde_json::json!({ "page": i + 1, "text": page_text(*p) }))
        .collect();
    serde_json::json!({ "pages": entries }).to_string()
}

impl ScriptedVision {
    /// Answers every request correctly
    pub(crate) fn echo() -> Self {
        Self {
            single: Box::new(|page| Ok(page_text(page))),
            batch: Box::new(|pages| Ok(well_formed_batch(pages))),
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
            events: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub(crate) fn with_single(
        mut self,
        reply: impl Fn(u32) -> Result<String, ProviderError> + Send + Sync + 'static,
    ) -> Self {
        self.single = Box::new(reply);
        self
    }

    pub(crate) fn with_batch(
        mut self,
        reply: impl Fn(&[u32]) -> Result<String, ProviderError> + Send + Sync + 'static,
    ) -> Self {
        self.batch = Box::new(reply);
        self
    }

    /// Hold every request open this long, so concurrent requests overlap
    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn calls(&self) -> Vec<VisionCall> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn events(&self) -> Vec<VisionEvent> {
        self.events.lock().unwrap().clone()
    }

    pub(crate) fn single_pages(&self) -> Vec<u32> {
        let mut pages: Vec<u32> = self
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                VisionCall::Single(p) => Some(p),
                VisionCall::Batch(_) => None,
            })
            .collect();
        pages.sort();
        pages
    }

    pub(crate) fn batches(&self) -> Vec<Vec<u32>> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                VisionCall::Batch(p) => Some(p),
                VisionCall::Single(_) => None,
            })
            .collect()
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VisionModel for ScriptedVision {
    async fn complete(
        &self,
        _model: &str,
        prompt: &str,
        images: &[PageImage],
    ) -> Result<String, ProviderError> {
        let pages: Vec<u32> = images.iter().map(|i| i.page_number).collect();
        let single = prompt == SINGLE_PAGE_PROMPT;
        let call = if single {
            VisionCall::Single(pages[0])
        } else {
            VisionCall::Batch(pages.clone())
        };
        self.calls.lock().unwrap().push(call.clone());
        self.events.lock().unwrap().push(VisionEvent::Started(call.clone()));

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.events.lock().unwrap().push(VisionEvent::Finished(call));

        if single {
            (self.single)(pages[0])
        } else {
            (self.batch)(&pages)
        }
    }
}

/// Every document has the same number of in-memory pages
pub(crate) struct StaticPages {
    pub(crate) count: u32,
}

#[async_trait]
impl PageSource for StaticPages {
    async fn load_pages(
        &self,
        _document_id: &str,
        source_filename: &str,
        _job_type: JobType,
    ) -> Result<Vec<PageImage>, ExtractionError> {
        if self.count == 0 {
            return Err(ExtractionError::NoPages {
                filename: source_filename.to_string(),
            });
        }
        Ok((1..=self.count)
            .map(|page_number| PageImage {
                page_number,
                mime_type: "image/png".to_string(),
                bytes: page_number.to_be_bytes().to_vec(),
            })
            .collect())
    }
}

/// Defaults with pacing off and millisecond retry delays
pub(crate) fn test_config() -> ServiceConfig {
    let mut config = ServiceConfig::default();
    config.ocr.tokens_per_minute = 0;
    config.ocr.base_retry_delay_ms = 10;
    config.ocr.max_retry_delay_ms = 100;
    config.ocr.retry_jitter_ms = 0;
    config.ocr.max_retries = 2;
    config
}

/// Service wired to scripted collaborators and an in-memory database
pub(crate) struct Harness {
    pub(crate) service: Arc<OcrService>,
    pub(crate) vision: Arc<ScriptedVision>,
}

impl Harness {
    pub(crate) fn new(vision: ScriptedVision, page_count: u32) -> Self {
        Self::with_config(vision, page_count, test_config())
    }

    pub(crate) fn with_config(
        vision: ScriptedVision,
        page_count: u32,
        config: ServiceConfig,
    ) -> Self {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let vision = Arc::new(vision);
        let chunker = Arc::new(WindowChunker::new(db.clone(), &config.chunking));
        let service = OcrService::new(
            db,
            config,
            vision.clone(),
            Arc::new(StaticPages { count: page_count }),
            chunker,
        );
        Self {
            service: Arc::new(service),
            vision,
        }
    }

    pub(crate) fn db(&self) -> &Database {
        &self.service.db
    }

    /// Insert a document and enqueue a job for it
    pub(crate) fn enqueue(&self, document_id: &str, job_type: JobType, mode: &str) -> String {
        self.db().insert_document(document_id, "scan.png").unwrap();
        let request = super::EnqueueRequest {
            document_id,
            source_filename: "scan.png",
            mode,
            ..Default::default()
        };
        match job_type {
            JobType::SingleFile => self.service.enqueue_file_ocr(&request),
            JobType::SingleImage => self.service.enqueue_image_ocr(&request),
            JobType::ImageBundle => self.service.enqueue_bundle_ocr(&request),
        }
        .unwrap()
    }
}
