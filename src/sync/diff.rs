//! Diff engine.
//!
//! All queries are read-only against immutable fingerprints (plus the
//! monotonically-settable `synced` flags), so concurrent diffs of the same
//! snapshot pair need no locking. A missing `from` or `to` id yields empty
//! results, not an error.
//!
//! Change classification is mutually exclusive by construction:
//! `books_changed` triggers on any core field difference, while
//! `books_read_progress_changed` requires every core field to be equal. A
//! book whose core fields and read progress both changed in one interval is
//! reported only under `books_changed`; callers rely on the exclusivity.

use crate::access::placeholders;
use crate::db::Database;
use crate::error::{AppError, Result};
use crate::sync::{Page, PageRequest, SyncPointBook, SyncPointReadList};
use rusqlite::params_from_iter;
use rusqlite::types::Value;
use std::collections::HashMap;

/// Core fingerprint fields differ between aliases `f` and `t`. File hashes
/// are only compared when both sides carry one; thumbnail ids compare
/// null-safe so a cover appearing or disappearing counts as a change.
const BOOK_CHANGED: &str = "(f.file_mtime != t.file_mtime
    OR f.file_size != t.file_size
    OR (f.file_hash IS NOT NULL AND t.file_hash IS NOT NULL AND f.file_hash != t.file_hash)
    OR f.metadata_updated_at != t.metadata_updated_at
    OR f.thumbnail_id IS NOT t.thumbnail_id)";

/// Negation of [`BOOK_CHANGED`], spelled out so both stay in sync.
const BOOK_UNCHANGED: &str = "(f.file_mtime = t.file_mtime
    AND f.file_size = t.file_size
    AND NOT (f.file_hash IS NOT NULL AND t.file_hash IS NOT NULL AND f.file_hash != t.file_hash)
    AND f.metadata_updated_at = t.metadata_updated_at
    AND f.thumbnail_id IS t.thumbnail_id)";

fn book_columns(alias: &str) -> String {
    [
        "sync_point_id",
        "book_id",
        "created_at",
        "updated_at",
        "file_mtime",
        "file_size",
        "file_hash",
        "metadata_updated_at",
        "progress_updated_at",
        "thumbnail_id",
        "synced",
    ]
    .map(|c| format!("{}.{}", alias, c))
    .join(", ")
}

fn row_to_sync_book(row: &rusqlite::Row<'_>) -> rusqlite::Result<SyncPointBook> {
    Ok(SyncPointBook {
        sync_point_id: row.get(0)?,
        book_id: row.get(1)?,
        created_at: row.get(2)?,
        updated_at: row.get(3)?,
        file_mtime: row.get(4)?,
        file_size: row.get(5)?,
        file_hash: row.get(6)?,
        metadata_updated_at: row.get(7)?,
        progress_updated_at: row.get(8)?,
        thumbnail_id: row.get(9)?,
        synced: row.get(10)?,
    })
}

fn read_list_columns(alias: &str) -> String {
    ["sync_point_id", "read_list_id", "name", "created_at", "updated_at", "synced"]
        .map(|c| format!("{}.{}", alias, c))
        .join(", ")
}

fn row_to_sync_read_list(row: &rusqlite::Row<'_>) -> rusqlite::Result<SyncPointReadList> {
    Ok(SyncPointReadList {
        sync_point_id: row.get(0)?,
        read_list_id: row.get(1)?,
        name: row.get(2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
        synced: row.get(5)?,
    })
}

impl Database {
    /// Run a paginated fingerprint query. `body` is everything from `FROM`
    /// to the end of `WHERE`; `alias` names the table the fingerprints are
    /// projected from; ordering by book id keeps pagination deterministic.
    fn paged_books(
        &self,
        body: &str,
        alias: &str,
        sql_params: Vec<Value>,
        page: PageRequest,
    ) -> Result<Page<SyncPointBook>> {
        let conn = self.conn.lock();

        let count_sql = format!("SELECT COUNT(*) {}", body);
        let total: i64 = conn
            .query_row(&count_sql, params_from_iter(sql_params.iter().cloned()), |row| {
                row.get(0)
            })
            .map_err(|e| AppError::Internal(format!("Failed to count diff results: {}", e)))?;

        let sql = format!(
            "SELECT {} {} ORDER BY {}.book_id LIMIT ? OFFSET ?",
            book_columns(alias),
            body,
            alias,
        );
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| AppError::Internal(format!("Failed to prepare query: {}", e)))?;

        let mut all_params = sql_params;
        all_params.push(Value::from(page.limit()));
        all_params.push(Value::from(page.offset()));

        let items = stmt
            .query_map(params_from_iter(all_params), row_to_sync_book)
            .map_err(|e| AppError::Internal(format!("Failed to query diff: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Internal(format!("Failed to collect diff: {}", e)))?;

        Ok(Page::new(items, page, total as u64))
    }

    /// Paginated read list query; same shape as [`Database::paged_books`].
    fn paged_read_lists(
        &self,
        body: &str,
        alias: &str,
        sql_params: Vec<Value>,
        page: PageRequest,
    ) -> Result<Page<SyncPointReadList>> {
        let conn = self.conn.lock();

        let count_sql = format!("SELECT COUNT(*) {}", body);
        let total: i64 = conn
            .query_row(&count_sql, params_from_iter(sql_params.iter().cloned()), |row| {
                row.get(0)
            })
            .map_err(|e| AppError::Internal(format!("Failed to count diff results: {}", e)))?;

        let sql = format!(
            "SELECT {} {} ORDER BY {}.read_list_id LIMIT ? OFFSET ?",
            read_list_columns(alias),
            body,
            alias,
        );
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| AppError::Internal(format!("Failed to prepare query: {}", e)))?;

        let mut all_params = sql_params;
        all_params.push(Value::from(page.limit()));
        all_params.push(Value::from(page.offset()));

        let items = stmt
            .query_map(params_from_iter(all_params), row_to_sync_read_list)
            .map_err(|e| AppError::Internal(format!("Failed to query diff: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Internal(format!("Failed to collect diff: {}", e)))?;

        Ok(Page::new(items, page, total as u64))
    }

    /// All book fingerprints of one sync point.
    pub fn sync_books_in(
        &self,
        sync_point_id: &str,
        page: PageRequest,
        only_not_synced: bool,
    ) -> Result<Page<SyncPointBook>> {
        let mut body = "FROM sync_point_books t WHERE t.sync_point_id = ?".to_string();
        if only_not_synced {
            body.push_str(" AND t.synced = 0");
        }
        self.paged_books(&body, "t", vec![Value::from(sync_point_id.to_string())], page)
    }

    /// Books present in `to` whose id is absent from `from`.
    pub fn sync_books_added(
        &self,
        from: &str,
        to: &str,
        page: PageRequest,
        only_not_synced: bool,
    ) -> Result<Page<SyncPointBook>> {
        let mut body = "FROM sync_point_books t
             WHERE t.sync_point_id = ?
               AND t.book_id NOT IN
                   (SELECT book_id FROM sync_point_books WHERE sync_point_id = ?)"
            .to_string();
        if only_not_synced {
            body.push_str(" AND t.synced = 0");
        }
        self.paged_books(
            &body,
            "t",
            vec![Value::from(to.to_string()), Value::from(from.to_string())],
            page,
        )
    }

    /// Books present in `from` whose id is absent from `to`. Removal
    /// acknowledgments live in a side table keyed by the `to` id, since a
    /// removed book has no row in `to` to flag.
    pub fn sync_books_removed(
        &self,
        from: &str,
        to: &str,
        page: PageRequest,
        only_not_synced: bool,
    ) -> Result<Page<SyncPointBook>> {
        let mut body = "FROM sync_point_books f
             WHERE f.sync_point_id = ?
               AND f.book_id NOT IN
                   (SELECT book_id FROM sync_point_books WHERE sync_point_id = ?)"
            .to_string();
        let mut sql_params = vec![Value::from(from.to_string()), Value::from(to.to_string())];
        if only_not_synced {
            body.push_str(
                " AND f.book_id NOT IN
                   (SELECT book_id FROM sync_point_removed_books_synced
                    WHERE sync_point_id = ?)",
            );
            sql_params.push(Value::from(to.to_string()));
        }
        self.paged_books(&body, "f", sql_params, page)
    }

    /// Books present in both snapshots whose core fingerprint fields differ.
    pub fn sync_books_changed(
        &self,
        from: &str,
        to: &str,
        page: PageRequest,
        only_not_synced: bool,
    ) -> Result<Page<SyncPointBook>> {
        let mut body = format!(
            "FROM sync_point_books t
             JOIN sync_point_books f ON f.book_id = t.book_id AND f.sync_point_id = ?
             WHERE t.sync_point_id = ?
               AND {}",
            BOOK_CHANGED,
        );
        if only_not_synced {
            body.push_str(" AND t.synced = 0");
        }
        self.paged_books(
            &body,
            "t",
            vec![Value::from(from.to_string()), Value::from(to.to_string())],
            page,
        )
    }

    /// Books present in both snapshots whose core fields are all equal but
    /// whose read-progress timestamp differs (including null transitions).
    pub fn sync_books_read_progress_changed(
        &self,
        from: &str,
        to: &str,
        page: PageRequest,
        only_not_synced: bool,
    ) -> Result<Page<SyncPointBook>> {
        let mut body = format!(
            "FROM sync_point_books t
             JOIN sync_point_books f ON f.book_id = t.book_id AND f.sync_point_id = ?
             WHERE t.sync_point_id = ?
               AND {}
               AND f.progress_updated_at IS NOT t.progress_updated_at",
            BOOK_UNCHANGED,
        );
        if only_not_synced {
            body.push_str(" AND t.synced = 0");
        }
        self.paged_books(
            &body,
            "t",
            vec![Value::from(from.to_string()), Value::from(to.to_string())],
            page,
        )
    }

    /// Read lists present in `to` whose id is absent from `from`.
    pub fn sync_read_lists_added(
        &self,
        from: &str,
        to: &str,
        page: PageRequest,
        only_not_synced: bool,
    ) -> Result<Page<SyncPointReadList>> {
        let mut body = "FROM sync_point_read_lists t
             WHERE t.sync_point_id = ?
               AND t.read_list_id NOT IN
                   (SELECT read_list_id FROM sync_point_read_lists WHERE sync_point_id = ?)"
            .to_string();
        if only_not_synced {
            body.push_str(" AND t.synced = 0");
        }
        self.paged_read_lists(
            &body,
            "t",
            vec![Value::from(to.to_string()), Value::from(from.to_string())],
            page,
        )
    }

    /// Read lists present in `from` whose id is absent from `to`.
    pub fn sync_read_lists_removed(
        &self,
        from: &str,
        to: &str,
        page: PageRequest,
        only_not_synced: bool,
    ) -> Result<Page<SyncPointReadList>> {
        let mut body = "FROM sync_point_read_lists f
             WHERE f.sync_point_id = ?
               AND f.read_list_id NOT IN
                   (SELECT read_list_id FROM sync_point_read_lists WHERE sync_point_id = ?)"
            .to_string();
        let mut sql_params = vec![Value::from(from.to_string()), Value::from(to.to_string())];
        if only_not_synced {
            body.push_str(
                " AND f.read_list_id NOT IN
                   (SELECT read_list_id FROM sync_point_removed_read_lists_synced
                    WHERE sync_point_id = ?)",
            );
            sql_params.push(Value::from(to.to_string()));
        }
        self.paged_read_lists(&body, "f", sql_params, page)
    }

    /// Read lists present in both snapshots whose name or update timestamp
    /// differ.
    pub fn sync_read_lists_changed(
        &self,
        from: &str,
        to: &str,
        page: PageRequest,
        only_not_synced: bool,
    ) -> Result<Page<SyncPointReadList>> {
        let mut body = "FROM sync_point_read_lists t
             JOIN sync_point_read_lists f
               ON f.read_list_id = t.read_list_id AND f.sync_point_id = ?
             WHERE t.sync_point_id = ?
               AND (f.updated_at != t.updated_at OR f.name != t.name)"
            .to_string();
        if only_not_synced {
            body.push_str(" AND t.synced = 0");
        }
        self.paged_read_lists(
            &body,
            "t",
            vec![Value::from(from.to_string()), Value::from(to.to_string())],
            page,
        )
    }

    /// Membership of read lists as captured at snapshot time, keyed by read
    /// list id.
    pub fn sync_book_ids_by_read_list_ids(
        &self,
        sync_point_id: &str,
        read_list_ids: &[String],
    ) -> Result<HashMap<String, Vec<String>>> {
        if read_list_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let conn = self.conn.lock();
        let sql = format!(
            "SELECT read_list_id, book_id FROM sync_point_read_list_books
             WHERE sync_point_id = ? AND read_list_id IN ({})
             ORDER BY read_list_id, book_id",
            placeholders(read_list_ids.len())
        );
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| AppError::Internal(format!("Failed to prepare query: {}", e)))?;

        let mut sql_params = vec![Value::from(sync_point_id.to_string())];
        sql_params.extend(read_list_ids.iter().cloned().map(Value::from));

        let rows = stmt
            .query_map(params_from_iter(sql_params), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(|e| AppError::Internal(format!("Failed to query memberships: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Internal(format!("Failed to collect memberships: {}", e)))?;

        let mut by_read_list: HashMap<String, Vec<String>> = HashMap::new();
        for (read_list_id, book_id) in rows {
            by_read_list.entry(read_list_id).or_default().push(book_id);
        }
        Ok(by_read_list)
    }
}
