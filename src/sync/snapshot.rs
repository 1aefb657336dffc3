//! Snapshot builder.
//!
//! A sync point is materialized with set-based `INSERT INTO ... SELECT`
//! statements inside one transaction, so the captured fingerprints are
//! consistent even under concurrent library mutation.

use crate::access::{AccessContext, BookQuery, BookSearch, RequiredJoin};
use crate::db::Database;
use crate::error::{AppError, Result};
use crate::sync::SyncPoint;
use rusqlite::{params, params_from_iter, types::Value};

impl Database {
    /// Insert a sync point header plus one fingerprint row per book
    /// matching `search` under the context's access predicate, and capture
    /// the user's visible read lists. One transaction.
    pub fn create_sync_point(
        &self,
        id: &str,
        user_id: &str,
        api_key_id: Option<&str>,
        now: i64,
        search: &BookSearch,
        ctx: &AccessContext,
    ) -> Result<SyncPoint> {
        let mut book_query = BookQuery::new(ctx)?;
        book_query
            .require(RequiredJoin::ReadProgress)
            .require(RequiredJoin::Thumbnail)
            .apply_search(search);

        // Read lists are captured under the access predicate alone: a list
        // is visible when it holds at least one visible book.
        let mut list_query = BookQuery::new(ctx)?;

        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| AppError::Internal(format!("Failed to start transaction: {}", e)))?;

        tx.execute(
            "INSERT INTO sync_points (id, user_id, api_key_id, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![id, user_id, api_key_id, now],
        )
        .map_err(|e| AppError::Internal(format!("Failed to create sync point: {}", e)))?;

        let sql = format!(
            "INSERT INTO sync_point_books
             (sync_point_id, book_id, created_at, updated_at, file_mtime, file_size,
              file_hash, metadata_updated_at, progress_updated_at, thumbnail_id, synced)
             SELECT ?, b.id, b.created_at, b.updated_at, b.file_mtime, b.file_size,
                    b.file_hash, b.metadata_updated_at, p.updated_at, t.id, 0
             FROM books b
             {}
             {}",
            book_query.join_sql(),
            book_query.where_sql(),
        );
        let mut sql_params = vec![Value::from(id.to_string())];
        sql_params.extend(book_query.params());
        tx.execute(&sql, params_from_iter(sql_params))
            .map_err(|e| AppError::Internal(format!("Failed to snapshot books: {}", e)))?;

        let sql = format!(
            "INSERT INTO sync_point_read_list_books (sync_point_id, read_list_id, book_id)
             SELECT ?, rlb.read_list_id, rlb.book_id
             FROM read_list_books rlb
             JOIN books b ON b.id = rlb.book_id
             {}
             {}",
            list_query.join_sql(),
            list_query.where_sql(),
        );
        let mut sql_params = vec![Value::from(id.to_string())];
        sql_params.extend(list_query.params());
        tx.execute(&sql, params_from_iter(sql_params))
            .map_err(|e| {
                AppError::Internal(format!("Failed to snapshot read list books: {}", e))
            })?;

        tx.execute(
            "INSERT INTO sync_point_read_lists
             (sync_point_id, read_list_id, name, created_at, updated_at, synced)
             SELECT ?1, rl.id, rl.name, rl.created_at, rl.updated_at, 0
             FROM read_lists rl
             WHERE EXISTS (SELECT 1 FROM sync_point_read_list_books srlb
                           WHERE srlb.sync_point_id = ?1 AND srlb.read_list_id = rl.id)",
            params![id],
        )
        .map_err(|e| AppError::Internal(format!("Failed to snapshot read lists: {}", e)))?;

        tx.commit()
            .map_err(|e| AppError::Internal(format!("Failed to commit sync point: {}", e)))?;

        Ok(SyncPoint {
            id: id.to_string(),
            user_id: user_id.to_string(),
            api_key_id: api_key_id.map(|s| s.to_string()),
            created_at: now,
        })
    }
}
