//! Lifecycle manager.
//!
//! Deletions run children-first inside one transaction: a concurrent diff
//! must never observe a sync point that is only half there.

use crate::access::placeholders;
use crate::db::Database;
use crate::error::{AppError, Result};
use crate::sync::SyncPoint;
use rusqlite::{OptionalExtension, params, params_from_iter, types::Value};

/// Dependent tables, in deletion order (children before parent).
const CHILD_TABLES: [&str; 5] = [
    "sync_point_removed_books_synced",
    "sync_point_removed_read_lists_synced",
    "sync_point_read_list_books",
    "sync_point_read_lists",
    "sync_point_books",
];

impl Database {
    /// Look up a sync point by id.
    pub fn find_sync_point(&self, id: &str) -> Result<Option<SyncPoint>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, user_id, api_key_id, created_at FROM sync_points WHERE id = ?1",
            params![id],
            |row| {
                Ok(SyncPoint {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    api_key_id: row.get(2)?,
                    created_at: row.get(3)?,
                })
            },
        )
        .optional()
        .map_err(|e| AppError::Internal(format!("Failed to get sync point: {}", e)))
    }

    /// Delete every sync point matching the clause, children first, in one
    /// transaction. Returns the number of sync points removed.
    fn delete_sync_points_where(&self, clause: &str, sql_params: Vec<Value>) -> Result<usize> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| AppError::Internal(format!("Failed to start transaction: {}", e)))?;

        for table in CHILD_TABLES {
            let sql = format!(
                "DELETE FROM {} WHERE sync_point_id IN
                 (SELECT id FROM sync_points WHERE {})",
                table, clause
            );
            tx.execute(&sql, params_from_iter(sql_params.iter().cloned()))
                .map_err(|e| {
                    AppError::Internal(format!("Failed to delete from {}: {}", table, e))
                })?;
        }

        let deleted = tx
            .execute(
                &format!("DELETE FROM sync_points WHERE {}", clause),
                params_from_iter(sql_params),
            )
            .map_err(|e| AppError::Internal(format!("Failed to delete sync points: {}", e)))?;

        tx.commit()
            .map_err(|e| AppError::Internal(format!("Failed to commit deletion: {}", e)))?;
        Ok(deleted)
    }

    /// Delete one sync point and its dependent rows. Deleting an absent
    /// sync point is not an error.
    pub fn delete_sync_point(&self, id: &str) -> Result<()> {
        self.delete_sync_points_where("id = ?", vec![Value::from(id.to_string())])?;
        Ok(())
    }

    /// Delete every sync point of a user.
    pub fn delete_sync_points_by_user(&self, user_id: &str) -> Result<usize> {
        self.delete_sync_points_where("user_id = ?", vec![Value::from(user_id.to_string())])
    }

    /// Delete the user's sync points scoped to the given API keys.
    pub fn delete_sync_points_by_user_and_api_keys(
        &self,
        user_id: &str,
        api_key_ids: &[String],
    ) -> Result<usize> {
        if api_key_ids.is_empty() {
            return Ok(0);
        }

        let clause = format!(
            "user_id = ? AND api_key_id IN ({})",
            placeholders(api_key_ids.len())
        );
        let mut sql_params = vec![Value::from(user_id.to_string())];
        sql_params.extend(api_key_ids.iter().cloned().map(Value::from));
        self.delete_sync_points_where(&clause, sql_params)
    }

    /// Delete every sync point.
    pub fn delete_all_sync_points(&self) -> Result<usize> {
        self.delete_sync_points_where("1 = 1", Vec::new())
    }

    /// Delete sync points created before the cutoff (retention cleanup).
    pub fn delete_sync_points_created_before(&self, cutoff: i64) -> Result<usize> {
        self.delete_sync_points_where("created_at < ?", vec![Value::from(cutoff)])
    }
}
