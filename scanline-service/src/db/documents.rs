//! Document status operations.
//!
//! Documents are created by the upload side. The OCR core moves them between
//! `processing`, `ready` and `error` and stores the extracted text.

use rusqlite::{OptionalExtension, params};

use super::models::Document;
use super::{Database, now_timestamp};
use crate::error::{DatabaseError, ServiceResult};

impl Database {
    /// Insert a new document in `processing` state
    pub fn insert_document(&self, id: &str, filename: &str) -> ServiceResult<()> {
        let conn = self.conn()?;
        let now = now_timestamp();

        conn.execute(
            "INSERT INTO documents (id, filename, status, created_at, updated_at) VALUES (?1, ?2, 'processing', ?3, ?3)",
            params![id, filename, now],
        )
        .map_err(DatabaseError::Query)?;

        Ok(())
    }

    /// Get a document by ID
    pub fn get_document(&self, id: &str) -> ServiceResult<Option<Document>> {
        let conn = self.conn()?;

        let doc = conn
            .query_row(
                "SELECT id, filename, status, processing_error, full_text, chunk_count, created_at, updated_at FROM documents WHERE id = ?1",
                params![id],
                Document::from_row,
            )
            .optional()
            .map_err(DatabaseError::Query)?;

        Ok(doc)
    }

    /// Reset a document to `processing` with no error, ahead of another attempt
    pub fn mark_document_processing(&self, id: &str) -> ServiceResult<bool> {
        let conn = self.conn()?;

        let rows = conn
            .execute(
                "UPDATE documents SET status = 'processing', processing_error = NULL, updated_at = ?1 WHERE id = ?2",
                params![now_timestamp(), id],
            )
            .map_err(DatabaseError::Query)?;

        Ok(rows > 0)
    }

    /// Mark a document failed with a human-readable message
    pub fn mark_document_error(&self, id: &str, message: &str) -> ServiceResult<bool> {
        let conn = self.conn()?;

        let rows = conn
            .execute(
                "UPDATE documents SET status = 'error', processing_error = ?1, updated_at = ?2 WHERE id = ?3",
                params![message, now_timestamp(), id],
            )
            .map_err(DatabaseError::Query)?;

        Ok(rows > 0)
    }

    /// Store the extracted text and mark the document ready
    pub fn mark_document_ready(
        &self,
        id: &str,
        full_text: &str,
        chunk_count: usize,
    ) -> ServiceResult<bool> {
        let conn = self.conn()?;

        let rows = conn
            .execute(
                "UPDATE documents SET status = 'ready', processing_error = NULL, full_text = ?1, chunk_count = ?2, updated_at = ?3 WHERE id = ?4",
                params![full_text, chunk_count as i64, now_timestamp(), id],
            )
            .map_err(DatabaseError::Query)?;

        Ok(rows > 0)
    }

    /// Fail every `processing` document that has no queued or running job.
    ///
    /// Returns the ids of the documents that were marked.
    pub fn fail_orphaned_documents(&self, message: &str) -> ServiceResult<Vec<String>> {
        let conn = self.conn()?;

        let mut stmt = conn
            .prepare(
                r#"
                UPDATE documents
                SET status = 'error', processing_error = ?1, updated_at = ?2
                WHERE status = 'processing'
                AND NOT EXISTS (
                    SELECT 1 FROM ocr_jobs j
                    WHERE j.document_id = documents.id AND j.status IN ('queued', 'running')
                )
                RETURNING id
                "#,
            )
            .map_err(DatabaseError::Query)?;
        let ids = stmt
            .query_map(params![message, now_timestamp()], |row| row.get(0))
            .map_err(DatabaseError::Query)?
            .collect::<Result<Vec<String>, _>>()
            .map_err(DatabaseError::Query)?;

        Ok(ids)
    }
}
