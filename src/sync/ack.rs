//! Acknowledgment tracker.
//!
//! Marking is idempotent both ways: the `synced` flag is only ever set to
//! true, and removal acknowledgments insert with duplicate keys ignored.
//! Two clients acknowledging the same items concurrently therefore commute.

use crate::access::placeholders;
use crate::db::Database;
use crate::error::{AppError, Result};
use rusqlite::{params, params_from_iter, types::Value};

impl Database {
    /// Mark book delta entries as consumed by the client. When
    /// `for_removed` is set the ids are recorded in the removal side table
    /// (a removed book has no fingerprint row in the snapshot to flag).
    pub fn mark_sync_books_synced(
        &self,
        sync_point_id: &str,
        for_removed: bool,
        book_ids: &[String],
    ) -> Result<()> {
        if book_ids.is_empty() {
            return Ok(());
        }

        if for_removed {
            let mut conn = self.conn.lock();
            let tx = conn
                .transaction()
                .map_err(|e| AppError::Internal(format!("Failed to start transaction: {}", e)))?;
            for book_id in book_ids {
                tx.execute(
                    "INSERT OR IGNORE INTO sync_point_removed_books_synced
                         (sync_point_id, book_id)
                     VALUES (?1, ?2)",
                    params![sync_point_id, book_id],
                )
                .map_err(|e| {
                    AppError::Internal(format!("Failed to mark removed book synced: {}", e))
                })?;
            }
            tx.commit()
                .map_err(|e| AppError::Internal(format!("Failed to commit transaction: {}", e)))?;
            return Ok(());
        }

        let sql = format!(
            "UPDATE sync_point_books SET synced = 1
             WHERE sync_point_id = ? AND book_id IN ({})",
            placeholders(book_ids.len())
        );
        let mut sql_params = vec![Value::from(sync_point_id.to_string())];
        sql_params.extend(book_ids.iter().cloned().map(Value::from));

        let conn = self.conn.lock();
        conn.execute(&sql, params_from_iter(sql_params))
            .map_err(|e| AppError::Internal(format!("Failed to mark books synced: {}", e)))?;
        Ok(())
    }

    /// Mark read list delta entries as consumed by the client.
    pub fn mark_sync_read_lists_synced(
        &self,
        sync_point_id: &str,
        for_removed: bool,
        read_list_ids: &[String],
    ) -> Result<()> {
        if read_list_ids.is_empty() {
            return Ok(());
        }

        if for_removed {
            let mut conn = self.conn.lock();
            let tx = conn
                .transaction()
                .map_err(|e| AppError::Internal(format!("Failed to start transaction: {}", e)))?;
            for read_list_id in read_list_ids {
                tx.execute(
                    "INSERT OR IGNORE INTO sync_point_removed_read_lists_synced
                         (sync_point_id, read_list_id)
                     VALUES (?1, ?2)",
                    params![sync_point_id, read_list_id],
                )
                .map_err(|e| {
                    AppError::Internal(format!("Failed to mark removed read list synced: {}", e))
                })?;
            }
            tx.commit()
                .map_err(|e| AppError::Internal(format!("Failed to commit transaction: {}", e)))?;
            return Ok(());
        }

        let sql = format!(
            "UPDATE sync_point_read_lists SET synced = 1
             WHERE sync_point_id = ? AND read_list_id IN ({})",
            placeholders(read_list_ids.len())
        );
        let mut sql_params = vec![Value::from(sync_point_id.to_string())];
        sql_params.extend(read_list_ids.iter().cloned().map(Value::from));

        let conn = self.conn.lock();
        conn.execute(&sql, params_from_iter(sql_params))
            .map_err(|e| AppError::Internal(format!("Failed to mark read lists synced: {}", e)))?;
        Ok(())
    }
}
