//! Database module for SQLite operations.
//!
//! This module provides the `Database` struct and all database operations
//! organized into submodules by domain.

mod checkpoints;
mod chunks;
mod documents;
mod jobs;
mod migrations;
pub mod models;

pub use jobs::NewJob;
pub use models::{
    ALLOWED_OCR_MODELS, BASELINE_OCR_MODEL, Chunk, Document, DocumentStatus, JobPayload, JobStatus,
    JobType, OcrJob, OcrMode, PageCheckpoint, resolve_ocr_model,
};

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{SecondsFormat, Utc};

use crate::error::{DatabaseError, ServiceError, ServiceResult};

/// How long a connection waits on another process's write lock
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Database manager for SQLite operations
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create the database at the given path
    pub fn open(path: &Path) -> ServiceResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                ServiceError::Database(DatabaseError::Connection(
                    rusqlite::Error::ToSqlConversionFailure(Box::new(e)),
                ))
            })?;
        }

        let conn = Connection::open(path).map_err(DatabaseError::Connection)?;
        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(DatabaseError::Connection)?;

        // WAL lets a second process read while this one holds the write lock
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(DatabaseError::Query)?;

        migrations::run_migrations(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open a private in-memory database, used by tests
    pub fn open_in_memory() -> ServiceResult<Self> {
        let conn = Connection::open_in_memory().map_err(DatabaseError::Connection)?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(DatabaseError::Query)?;

        migrations::run_migrations(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> ServiceResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| ServiceError::Database(DatabaseError::LockPoisoned))
    }
}

/// Timestamp format shared by every table; fixed width so text order is time order
pub(crate) fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_in_memory_runs_migrations() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.conn().unwrap();
        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ('documents', 'ocr_jobs', 'ocr_page_checkpoints', 'chunks')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 4);
    }

    #[test]
    fn test_open_file_db_is_reopenable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("scanline.db");
        {
            let db = Database::open(&path).unwrap();
            db.insert_document("doc-1", "scan.png").unwrap();
        }
        let db = Database::open(&path).unwrap();
        assert!(db.get_document("doc-1").unwrap().is_some());
    }

    #[test]
    fn test_timestamps_sort_lexicographically() {
        let a = now_timestamp();
        std::thread::sleep(Duration::from_millis(2));
        let b = now_timestamp();
        assert!(a < b);
        assert_eq!(a.len(), b.len());
    }
}
