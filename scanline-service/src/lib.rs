//! Durable OCR job queue and rate-limited vision extraction.
//!
//! The upload side inserts documents and enqueues jobs through
//! [`service::OcrService`]; a single worker per process claims jobs, extracts
//! page text through a vision model (or an external OCR engine), checkpoints
//! every page, and stores the assembled text and its chunks.

pub mod advanced;
pub mod chunking;
pub mod config;
pub mod db;
pub mod error;
pub mod rate_limit;
pub mod service;
pub mod sources;
pub mod vision;
