//! Chunk storage for extracted document text.

use rusqlite::params;
use uuid::Uuid;

use super::models::Chunk;
use super::{Database, now_timestamp};
use crate::error::{DatabaseError, ServiceResult};

impl Database {
    /// Replace all chunks of a document in one transaction
    pub fn replace_chunks(&self, document_id: &str, contents: &[String]) -> ServiceResult<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(DatabaseError::Query)?;
        let now = now_timestamp();

        tx.execute(
            "DELETE FROM chunks WHERE document_id = ?1",
            params![document_id],
        )
        .map_err(DatabaseError::Query)?;

        for (index, content) in contents.iter().enumerate() {
            tx.execute(
                "INSERT INTO chunks (id, document_id, content, chunk_index, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    Uuid::new_v4().to_string(),
                    document_id,
                    content,
                    index as i64,
                    now
                ],
            )
            .map_err(DatabaseError::Query)?;
        }

        tx.commit().map_err(DatabaseError::Query)?;
        Ok(contents.len())
    }

    /// Get a document's chunks in order
    pub fn get_chunks(&self, document_id: &str) -> ServiceResult<Vec<Chunk>> {
        let conn = self.conn()?;

        let mut stmt = conn
            .prepare(
                "SELECT id, document_id, content, chunk_index, created_at FROM chunks WHERE document_id = ?1 ORDER BY chunk_index",
            )
            .map_err(DatabaseError::Query)?;
        let chunks = stmt
            .query_map(params![document_id], Chunk::from_row)
            .map_err(DatabaseError::Query)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(DatabaseError::Query)?;

        Ok(chunks)
    }
}
