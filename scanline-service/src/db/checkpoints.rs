//! Per-page checkpoint operations.
//!
//! Checkpoints make extraction resumable: a job interrupted after some pages
//! picks up with the pages that have no row here.

use std::collections::BTreeMap;

use rusqlite::params;
use uuid::Uuid;

use super::models::PageCheckpoint;
use super::{Database, now_timestamp};
use crate::error::{DatabaseError, ServiceResult};

impl Database {
    /// Extracted text per page number for a job
    pub fn load_checkpoints(&self, job_id: &str) -> ServiceResult<BTreeMap<u32, String>> {
        let conn = self.conn()?;

        let mut stmt = conn
            .prepare(
                "SELECT page_number, text FROM ocr_page_checkpoints WHERE job_id = ?1 ORDER BY page_number",
            )
            .map_err(DatabaseError::Query)?;
        let pages = stmt
            .query_map(params![job_id], |row| {
                let page: i64 = row.get(0)?;
                let text: String = row.get(1)?;
                Ok((page.max(1) as u32, text))
            })
            .map_err(DatabaseError::Query)?
            .collect::<Result<BTreeMap<_, _>, _>>()
            .map_err(DatabaseError::Query)?;

        Ok(pages)
    }

    /// Full checkpoint rows for a job, ordered by page
    pub fn get_checkpoints(&self, job_id: &str) -> ServiceResult<Vec<PageCheckpoint>> {
        let conn = self.conn()?;

        let mut stmt = conn
            .prepare(
                "SELECT id, job_id, document_id, page_number, text, created_at, updated_at FROM ocr_page_checkpoints WHERE job_id = ?1 ORDER BY page_number",
            )
            .map_err(DatabaseError::Query)?;
        let rows = stmt
            .query_map(params![job_id], PageCheckpoint::from_row)
            .map_err(DatabaseError::Query)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(DatabaseError::Query)?;

        Ok(rows)
    }

    /// Store a page's text; a second write for the same page replaces the first
    pub fn upsert_checkpoint(
        &self,
        job_id: &str,
        document_id: &str,
        page_number: u32,
        text: &str,
    ) -> ServiceResult<()> {
        let conn = self.conn()?;
        let now = now_timestamp();

        conn.execute(
            r#"
            INSERT INTO ocr_page_checkpoints (id, job_id, document_id, page_number, text, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
            ON CONFLICT (job_id, page_number) DO UPDATE SET text = excluded.text, updated_at = excluded.updated_at
            "#,
            params![
                Uuid::new_v4().to_string(),
                job_id,
                document_id,
                i64::from(page_number),
                text,
                now,
            ],
        )
        .map_err(DatabaseError::Query)?;

        Ok(())
    }

    /// Delete all checkpoints of a job, returning how many were removed
    pub fn purge_checkpoints(&self, job_id: &str) -> ServiceResult<usize> {
        let conn = self.conn()?;

        let rows = conn
            .execute(
                "DELETE FROM ocr_page_checkpoints WHERE job_id = ?1",
                params![job_id],
            )
            .map_err(DatabaseError::Query)?;

        Ok(rows)
    }
}
