//! Splitting finished OCR text into stored chunks.

use std::sync::Arc;

use crate::config::ChunkingConfig;
use crate::db::Database;
use crate::error::ServiceResult;

/// Turns a document's final text into stored chunks
pub trait TextChunker: Send + Sync {
    /// Replace the document's chunks and return how many were written
    fn store_chunks(&self, document_id: &str, text: &str) -> ServiceResult<usize>;
}

/// Overlapping word windows written to the `chunks` table
pub struct WindowChunker {
    db: Arc<Database>,
    chunk_size: usize,
    chunk_overlap: usize,
}

impl WindowChunker {
    pub fn new(db: Arc<Database>, config: &ChunkingConfig) -> Self {
        let chunk_size = config.chunk_size.max(1);
        Self {
            db,
            chunk_size,
            chunk_overlap: config.chunk_overlap.min(chunk_size - 1),
        }
    }
}

impl TextChunker for WindowChunker {
    fn store_chunks(&self, document_id: &str, text: &str) -> ServiceResult<usize> {
        let chunks = split_windows(text, self.chunk_size, self.chunk_overlap);
        self.db.replace_chunks(document_id, &chunks)
    }
}

/// Split text into windows of `size` words, consecutive windows sharing `overlap` words
fn split_windows(text: &str, size: usize, overlap: usize) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return Vec::new();
    }
    if words.len() <= size {
        return vec![words.join(" ")];
    }

    let step = size.saturating_sub(overlap).max(1);
    let mut chunks = Vec::new();
    let mut start = 0;
    loop {
        let end = (start + size).min(words.len());
        chunks.push(words[start..end].join(" "));
        if end == words.len() {
            break;
        }
        start += step;
    }
    chunks
}
