//! Database schema migrations.
//!
//! This module contains all database migrations and schema setup.

use rusqlite::Connection;

use crate::error::{DatabaseError, ServiceResult};

/// Run all database migrations.
///
/// This function is called during database initialization to ensure
/// the schema is up to date.
pub(super) fn run_migrations(conn: &Connection) -> ServiceResult<()> {
    // Initial schema setup
    conn.execute_batch(
        r#"
        -- Documents whose pages are being read. Owned by the upload side;
        -- the OCR core only moves status and writes the extracted text.
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            filename TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'processing',
            processing_error TEXT,
            full_text TEXT,
            chunk_count INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
            updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );

        CREATE INDEX IF NOT EXISTS idx_documents_status ON documents(status);

        -- OCR jobs are kept forever for auditing
        CREATE TABLE IF NOT EXISTS ocr_jobs (
            id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            job_type TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'queued',
            payload TEXT NOT NULL,
            attempt_count INTEGER NOT NULL DEFAULT 0,
            max_attempts INTEGER NOT NULL DEFAULT 3,
            last_error TEXT,
            created_at TEXT NOT NULL,
            started_at TEXT,
            updated_at TEXT NOT NULL,
            finished_at TEXT,
            FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_ocr_jobs_status_created ON ocr_jobs(status, created_at);
        CREATE INDEX IF NOT EXISTS idx_ocr_jobs_document ON ocr_jobs(document_id);

        -- Per-page extraction results, purged once the job completes
        CREATE TABLE IF NOT EXISTS ocr_page_checkpoints (
            id TEXT PRIMARY KEY,
            job_id TEXT NOT NULL,
            document_id TEXT NOT NULL,
            page_number INTEGER NOT NULL CHECK (page_number >= 1),
            text TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE (job_id, page_number),
            FOREIGN KEY (job_id) REFERENCES ocr_jobs(id) ON DELETE CASCADE
        );

        -- Chunks of the final assembled text
        CREATE TABLE IF NOT EXISTS chunks (
            id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            content TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(document_id);
        "#,
    )
    .map_err(|e| DatabaseError::Migration {
        message: format!("Failed to create initial schema: {}", e),
    })?;

    run_active_job_index_migration(conn)?;

    Ok(())
}

/// Migration: at most one queued/running job per document.
///
/// Enqueue relies on this index to reject a second active job, so it must
/// exist before the first insert.
fn run_active_job_index_migration(conn: &Connection) -> ServiceResult<()> {
    let has_index: bool = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='index' AND name='idx_ocr_jobs_one_active'",
            [],
            |row| row.get::<_, i64>(0),
        )
        .map_err(DatabaseError::Query)?
        > 0;

    if !has_index {
        conn.execute_batch(
            r#"
            CREATE UNIQUE INDEX idx_ocr_jobs_one_active
            ON ocr_jobs(document_id)
            WHERE status IN ('queued', 'running');
            "#,
        )
        .map_err(|e| DatabaseError::Migration {
            message: format!("Failed to create active job index: {}", e),
        })?;
    }

    Ok(())
}
