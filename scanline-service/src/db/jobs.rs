//! OCR job queue operations.
//!
//! Every state change is a single conditional statement so that several
//! processes can share one database without an external lock.

use rusqlite::{ErrorCode, OptionalExtension, params};
use tracing::debug;
use uuid::Uuid;

use super::models::{JobPayload, JobType, OcrJob};
use super::{Database, now_timestamp};
use crate::error::{DatabaseError, ServiceError, ServiceResult};

/// Parameters for a job about to be enqueued
#[derive(Debug, Clone)]
pub struct NewJob<'a> {
    pub document_id: &'a str,
    pub job_type: JobType,
    pub payload: &'a JobPayload,
    pub max_attempts: u32,
}

impl Database {
    /// Insert a queued job and flag its document as processing.
    ///
    /// A second active job for the same document is rejected by the
    /// `idx_ocr_jobs_one_active` unique index and surfaces as
    /// [`ServiceError::Conflict`].
    pub fn enqueue_job(&self, job: &NewJob<'_>) -> ServiceResult<String> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(DatabaseError::Query)?;

        let document_exists: bool = tx
            .query_row(
                "SELECT 1 FROM documents WHERE id = ?1",
                params![job.document_id],
                |_| Ok(()),
            )
            .optional()
            .map_err(DatabaseError::Query)?
            .is_some();
        if !document_exists {
            return Err(ServiceError::DocumentNotFound {
                document_id: job.document_id.to_string(),
            });
        }

        let payload_json =
            serde_json::to_string(job.payload).map_err(DatabaseError::Serialization)?;
        let id = Uuid::new_v4().to_string();
        let now = now_timestamp();

        let inserted = tx.execute(
            r#"
            INSERT INTO ocr_jobs (id, document_id, job_type, status, payload, attempt_count, max_attempts, created_at, updated_at)
            VALUES (?1, ?2, ?3, 'queued', ?4, 0, ?5, ?6, ?6)
            "#,
            params![
                id,
                job.document_id,
                job.job_type.as_str(),
                payload_json,
                i64::from(job.max_attempts),
                now,
            ],
        );

        match inserted {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => {
                return Err(ServiceError::Conflict {
                    document_id: job.document_id.to_string(),
                });
            }
            Err(e) => return Err(DatabaseError::Query(e).into()),
        }

        tx.execute(
            "UPDATE documents SET status = 'processing', processing_error = NULL, updated_at = ?1 WHERE id = ?2",
            params![now, job.document_id],
        )
        .map_err(DatabaseError::Query)?;

        tx.commit().map_err(DatabaseError::Query)?;
        Ok(id)
    }

    /// Claim the oldest queued job.
    ///
    /// The select and the `queued → running` flip happen in one conditional
    /// UPDATE; when it changes no row another claimant won and `None` is
    /// returned.
    pub fn claim_next_job(&self) -> ServiceResult<Option<OcrJob>> {
        let conn = self.conn()?;
        let now = now_timestamp();

        let sql = format!(
            r#"
            UPDATE ocr_jobs
            SET status = 'running', attempt_count = attempt_count + 1, started_at = ?1, updated_at = ?1
            WHERE id = (
                SELECT id FROM ocr_jobs WHERE status = 'queued'
                ORDER BY created_at ASC, rowid ASC LIMIT 1
            )
            AND status = 'queued'
            RETURNING {}
            "#,
            OcrJob::COLUMNS
        );

        let job = conn
            .query_row(&sql, params![now], OcrJob::from_row)
            .optional()
            .map_err(DatabaseError::Query)?;

        if job.is_none() {
            debug!("No queued OCR job to claim");
        }
        Ok(job)
    }

    /// Mark a running job completed
    pub fn mark_job_completed(&self, job_id: &str) -> ServiceResult<bool> {
        let conn = self.conn()?;
        let now = now_timestamp();

        let rows = conn
            .execute(
                "UPDATE ocr_jobs SET status = 'completed', last_error = NULL, finished_at = ?1, updated_at = ?1 WHERE id = ?2 AND status = 'running'",
                params![now, job_id],
            )
            .map_err(DatabaseError::Query)?;

        Ok(rows > 0)
    }

    /// Mark a running job permanently failed
    pub fn mark_job_failed(&self, job_id: &str, error: &str) -> ServiceResult<bool> {
        let conn = self.conn()?;
        let now = now_timestamp();

        let rows = conn
            .execute(
                "UPDATE ocr_jobs SET status = 'failed', last_error = ?1, finished_at = ?2, updated_at = ?2 WHERE id = ?3 AND status = 'running'",
                params![error, now, job_id],
            )
            .map_err(DatabaseError::Query)?;

        Ok(rows > 0)
    }

    /// Put a running job back in the queue after a failed attempt
    pub fn requeue_job(&self, job_id: &str, error: &str) -> ServiceResult<bool> {
        let conn = self.conn()?;
        let now = now_timestamp();

        let rows = conn
            .execute(
                "UPDATE ocr_jobs SET status = 'queued', last_error = ?1, updated_at = ?2 WHERE id = ?3 AND status = 'running'",
                params![error, now, job_id],
            )
            .map_err(DatabaseError::Query)?;

        Ok(rows > 0)
    }

    /// Fail every job left `running` by a previous process that has no
    /// attempts left.
    ///
    /// Returns `(job_id, document_id)` pairs.
    pub fn fail_exhausted_running_jobs(
        &self,
        error: &str,
    ) -> ServiceResult<Vec<(String, String)>> {
        let conn = self.conn()?;
        let now = now_timestamp();

        let mut stmt = conn
            .prepare(
                r#"
                UPDATE ocr_jobs
                SET status = 'failed', last_error = ?1, finished_at = ?2, updated_at = ?2
                WHERE status = 'running' AND attempt_count >= max_attempts
                RETURNING id, document_id
                "#,
            )
            .map_err(DatabaseError::Query)?;
        let jobs = stmt
            .query_map(params![error, now], |row| Ok((row.get(0)?, row.get(1)?)))
            .map_err(DatabaseError::Query)?
            .collect::<Result<Vec<(String, String)>, _>>()
            .map_err(DatabaseError::Query)?;

        Ok(jobs)
    }

    /// Requeue every job left `running` by a previous process that still has
    /// attempts left; returns their ids
    pub fn requeue_running_jobs(&self) -> ServiceResult<Vec<String>> {
        let conn = self.conn()?;
        let now = now_timestamp();

        let mut stmt = conn
            .prepare(
                r#"
                UPDATE ocr_jobs
                SET status = 'queued', last_error = 'Interrupted by restart', updated_at = ?1
                WHERE status = 'running' AND attempt_count < max_attempts
                RETURNING id
                "#,
            )
            .map_err(DatabaseError::Query)?;
        let ids = stmt
            .query_map(params![now], |row| row.get(0))
            .map_err(DatabaseError::Query)?
            .collect::<Result<Vec<String>, _>>()
            .map_err(DatabaseError::Query)?;

        Ok(ids)
    }

    /// Get a job by id
    pub fn get_job(&self, job_id: &str) -> ServiceResult<Option<OcrJob>> {
        let conn = self.conn()?;

        let job = conn
            .query_row(
                &format!("SELECT {} FROM ocr_jobs WHERE id = ?1", OcrJob::COLUMNS),
                params![job_id],
                OcrJob::from_row,
            )
            .optional()
            .map_err(DatabaseError::Query)?;

        Ok(job)
    }

    /// The queued or running job for a document, if any
    pub fn get_active_job_for_document(&self, document_id: &str) -> ServiceResult<Option<OcrJob>> {
        let conn = self.conn()?;

        let job = conn
            .query_row(
                &format!(
                    "SELECT {} FROM ocr_jobs WHERE document_id = ?1 AND status IN ('queued', 'running')",
                    OcrJob::COLUMNS
                ),
                params![document_id],
                OcrJob::from_row,
            )
            .optional()
            .map_err(DatabaseError::Query)?;

        Ok(job)
    }

    /// All jobs ever created for a document, oldest first
    pub fn list_jobs_for_document(&self, document_id: &str) -> ServiceResult<Vec<OcrJob>> {
        let conn = self.conn()?;

        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM ocr_jobs WHERE document_id = ?1 ORDER BY created_at ASC, rowid ASC",
                OcrJob::COLUMNS
            ))
            .map_err(DatabaseError::Query)?;
        let jobs = stmt
            .query_map(params![document_id], OcrJob::from_row)
            .map_err(DatabaseError::Query)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(DatabaseError::Query)?;

        Ok(jobs)
    }
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == ErrorCode::ConstraintViolation
                && e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}
