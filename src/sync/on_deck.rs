//! On-Deck deriver.
//!
//! "First unread book per qualifying series": a series qualifies when the
//! user has read at least one of its books, has none in progress, and has
//! not read them all. The per-series winner is the unread book with the
//! smallest `(number_sort, book_id)` pair, picked by an in-memory grouped
//! min.

use crate::access::{AccessContext, BookQuery, RequiredJoin, placeholders};
use crate::db::Database;
use crate::error::{AppError, Result};
use crate::sync::ON_DECK_READ_LIST_ID;
use rusqlite::{params, params_from_iter, types::Value};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Unread book candidate within a series.
struct Candidate {
    book_id: String,
    number_sort: Option<f64>,
}

impl Candidate {
    /// Order by `(number_sort, book_id)`; missing sort numbers go last.
    fn cmp_sort_key(&self, other: &Self) -> Ordering {
        let a = self.number_sort.unwrap_or(f64::INFINITY);
        let b = other.number_sort.unwrap_or(f64::INFINITY);
        a.partial_cmp(&b)
            .unwrap_or(Ordering::Equal)
            .then_with(|| self.book_id.cmp(&other.book_id))
    }
}

impl Database {
    /// Derive the On-Deck read list into an existing sync point. Returns the
    /// number of books inserted; the header row is only written when that
    /// number is positive.
    pub fn add_on_deck(
        &self,
        sync_point_id: &str,
        ctx: &AccessContext,
        library_ids: Option<&[String]>,
        now: i64,
    ) -> Result<usize> {
        let mut series_query = BookQuery::new(ctx)?;
        series_query
            .require(RequiredJoin::ReadProgress)
            .push_clause("b.series_id IS NOT NULL", Vec::new());
        if let Some(ids) = library_ids {
            series_query.push_clause(
                &format!("b.library_id IN ({})", placeholders(ids.len())),
                ids.iter().cloned().map(Value::from).collect(),
            );
        }

        // Holding the connection for the whole derivation keeps the
        // candidate queries and the inserts consistent with each other.
        let mut conn = self.conn.lock();

        let sql = format!(
            "SELECT b.series_id,
                    COUNT(*) AS total,
                    COUNT(CASE WHEN p.completed = 1 THEN 1 END) AS read_count,
                    COUNT(CASE WHEN p.completed = 0 THEN 1 END) AS in_progress_count,
                    MAX(CASE WHEN p.completed = 1 THEN p.updated_at END) AS last_read
             FROM books b
             {}
             {}
             GROUP BY b.series_id
             HAVING read_count > 0 AND in_progress_count = 0 AND read_count < total",
            series_query.join_sql(),
            series_query.where_sql(),
        );
        let candidate_series: Vec<(String, Option<i64>)> = {
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| AppError::Internal(format!("Failed to prepare query: {}", e)))?;
            stmt.query_map(params_from_iter(series_query.params()), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, Option<i64>>(4)?))
            })
            .map_err(|e| AppError::Internal(format!("Failed to query candidate series: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Internal(format!("Failed to collect candidate series: {}", e)))?
        };

        if candidate_series.is_empty() {
            return Ok(0);
        }

        let series_ids: Vec<String> = candidate_series.iter().map(|(id, _)| id.clone()).collect();
        let mut book_query = BookQuery::new(ctx)?;
        book_query
            .require(RequiredJoin::ReadProgress)
            .push_clause("p.book_id IS NULL", Vec::new())
            .push_clause(
                &format!("b.series_id IN ({})", placeholders(series_ids.len())),
                series_ids.iter().cloned().map(Value::from).collect(),
            );

        let sql = format!(
            "SELECT b.series_id, b.id, b.number_sort
             FROM books b
             {}
             {}",
            book_query.join_sql(),
            book_query.where_sql(),
        );
        let unread: Vec<(String, Candidate)> = {
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| AppError::Internal(format!("Failed to prepare query: {}", e)))?;
            stmt.query_map(params_from_iter(book_query.params()), |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    Candidate {
                        book_id: row.get(1)?,
                        number_sort: row.get(2)?,
                    },
                ))
            })
            .map_err(|e| AppError::Internal(format!("Failed to query unread books: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Internal(format!("Failed to collect unread books: {}", e)))?
        };

        // Grouped min per series.
        let mut first_unread: HashMap<String, Candidate> = HashMap::new();
        for (series_id, candidate) in unread {
            match first_unread.get(&series_id) {
                Some(current) if current.cmp_sort_key(&candidate) != Ordering::Greater => {}
                _ => {
                    first_unread.insert(series_id, candidate);
                }
            }
        }

        if first_unread.is_empty() {
            return Ok(0);
        }

        let dated = candidate_series
            .iter()
            .filter_map(|(_, last_read)| *last_read)
            .max()
            .unwrap_or(now);

        let tx = conn
            .transaction()
            .map_err(|e| AppError::Internal(format!("Failed to start transaction: {}", e)))?;

        let mut inserted = 0;
        for candidate in first_unread.values() {
            inserted += tx
                .execute(
                    "INSERT OR IGNORE INTO sync_point_read_list_books
                     (sync_point_id, read_list_id, book_id)
                     VALUES (?1, ?2, ?3)",
                    params![sync_point_id, ON_DECK_READ_LIST_ID, candidate.book_id],
                )
                .map_err(|e| {
                    AppError::Internal(format!("Failed to insert on-deck book: {}", e))
                })?;
        }

        if inserted > 0 {
            tx.execute(
                "INSERT INTO sync_point_read_lists
                 (sync_point_id, read_list_id, name, created_at, updated_at, synced)
                 VALUES (?1, ?2, 'On Deck', ?3, ?3, 0)",
                params![sync_point_id, ON_DECK_READ_LIST_ID, dated],
            )
            .map_err(|e| AppError::Internal(format!("Failed to insert on-deck header: {}", e)))?;
        }

        tx.commit()
            .map_err(|e| AppError::Internal(format!("Failed to commit on-deck: {}", e)))?;

        Ok(inserted)
    }
}
