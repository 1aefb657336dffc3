use crate::db::*;
use crate::error::{AppError, Result};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::Arc;

/// Database wrapper for thread-safe access.
#[derive(Clone)]
pub struct Database {
    pub(crate) conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        // Create parent directories if needed
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| AppError::Internal(format!("Failed to open database: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.initialize_schema()?;
        Ok(db)
    }

    /// Open in-memory database (for testing).
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| AppError::Internal(format!("Failed to open database: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.initialize_schema()?;
        Ok(db)
    }

    /// Initialize database schema.
    fn initialize_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            -- Users table
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                username TEXT UNIQUE NOT NULL,
                created_at INTEGER NOT NULL
            );

            -- API keys table
            CREATE TABLE IF NOT EXISTS api_keys (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                label TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );

            -- Libraries table
            CREATE TABLE IF NOT EXISTS libraries (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                is_public INTEGER NOT NULL DEFAULT 1,
                owner_id TEXT,
                created_at INTEGER NOT NULL,
                FOREIGN KEY (owner_id) REFERENCES users(id) ON DELETE SET NULL
            );

            -- Library access table
            CREATE TABLE IF NOT EXISTS library_access (
                user_id TEXT NOT NULL,
                library_id TEXT NOT NULL,
                PRIMARY KEY (user_id, library_id),
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE,
                FOREIGN KEY (library_id) REFERENCES libraries(id) ON DELETE CASCADE
            );

            -- Series table
            CREATE TABLE IF NOT EXISTS series (
                id TEXT PRIMARY KEY,
                library_id TEXT NOT NULL,
                name TEXT NOT NULL,
                age_rating INTEGER,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                FOREIGN KEY (library_id) REFERENCES libraries(id) ON DELETE CASCADE
            );

            -- Series sharing labels table
            CREATE TABLE IF NOT EXISTS series_labels (
                series_id TEXT NOT NULL,
                label TEXT NOT NULL,
                PRIMARY KEY (series_id, label),
                FOREIGN KEY (series_id) REFERENCES series(id) ON DELETE CASCADE
            );

            -- Books table
            CREATE TABLE IF NOT EXISTS books (
                id TEXT PRIMARY KEY,
                library_id TEXT NOT NULL,
                series_id TEXT,
                title TEXT NOT NULL,
                number_sort REAL,
                file_size INTEGER NOT NULL,
                file_mtime INTEGER NOT NULL,
                file_hash TEXT,
                metadata_updated_at INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                FOREIGN KEY (library_id) REFERENCES libraries(id) ON DELETE CASCADE,
                FOREIGN KEY (series_id) REFERENCES series(id) ON DELETE SET NULL
            );

            -- Read progress table
            CREATE TABLE IF NOT EXISTS read_progress (
                user_id TEXT NOT NULL,
                book_id TEXT NOT NULL,
                completed INTEGER NOT NULL DEFAULT 0,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (user_id, book_id),
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE,
                FOREIGN KEY (book_id) REFERENCES books(id) ON DELETE CASCADE
            );

            -- Thumbnails table
            CREATE TABLE IF NOT EXISTS thumbnails (
                id TEXT PRIMARY KEY,
                book_id TEXT NOT NULL,
                selected INTEGER NOT NULL DEFAULT 0,
                FOREIGN KEY (book_id) REFERENCES books(id) ON DELETE CASCADE
            );

            -- Read lists table
            CREATE TABLE IF NOT EXISTS read_lists (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            -- Read list membership table
            CREATE TABLE IF NOT EXISTS read_list_books (
                read_list_id TEXT NOT NULL,
                book_id TEXT NOT NULL,
                PRIMARY KEY (read_list_id, book_id),
                FOREIGN KEY (read_list_id) REFERENCES read_lists(id) ON DELETE CASCADE,
                FOREIGN KEY (book_id) REFERENCES books(id) ON DELETE CASCADE
            );

            -- Sync points table
            CREATE TABLE IF NOT EXISTS sync_points (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                api_key_id TEXT,
                created_at INTEGER NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id)
            );

            -- Sync point book fingerprints table
            CREATE TABLE IF NOT EXISTS sync_point_books (
                sync_point_id TEXT NOT NULL,
                book_id TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                file_mtime INTEGER NOT NULL,
                file_size INTEGER NOT NULL,
                file_hash TEXT,
                metadata_updated_at INTEGER NOT NULL,
                progress_updated_at INTEGER,
                thumbnail_id TEXT,
                synced INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (sync_point_id, book_id),
                FOREIGN KEY (sync_point_id) REFERENCES sync_points(id)
            );

            -- Sync point read list headers table
            CREATE TABLE IF NOT EXISTS sync_point_read_lists (
                sync_point_id TEXT NOT NULL,
                read_list_id TEXT NOT NULL,
                name TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                synced INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (sync_point_id, read_list_id),
                FOREIGN KEY (sync_point_id) REFERENCES sync_points(id)
            );

            -- Sync point read list membership table
            CREATE TABLE IF NOT EXISTS sync_point_read_list_books (
                sync_point_id TEXT NOT NULL,
                read_list_id TEXT NOT NULL,
                book_id TEXT NOT NULL,
                PRIMARY KEY (sync_point_id, read_list_id, book_id),
                FOREIGN KEY (sync_point_id) REFERENCES sync_points(id)
            );

            -- Removal acknowledgments for books
            CREATE TABLE IF NOT EXISTS sync_point_removed_books_synced (
                sync_point_id TEXT NOT NULL,
                book_id TEXT NOT NULL,
                PRIMARY KEY (sync_point_id, book_id),
                FOREIGN KEY (sync_point_id) REFERENCES sync_points(id)
            );

            -- Removal acknowledgments for read lists
            CREATE TABLE IF NOT EXISTS sync_point_removed_read_lists_synced (
                sync_point_id TEXT NOT NULL,
                read_list_id TEXT NOT NULL,
                PRIMARY KEY (sync_point_id, read_list_id),
                FOREIGN KEY (sync_point_id) REFERENCES sync_points(id)
            );

            -- Indexes
            CREATE INDEX IF NOT EXISTS idx_books_library ON books(library_id);
            CREATE INDEX IF NOT EXISTS idx_books_series ON books(series_id);
            CREATE INDEX IF NOT EXISTS idx_progress_user ON read_progress(user_id);
            CREATE INDEX IF NOT EXISTS idx_thumbnails_book ON thumbnails(book_id);
            CREATE INDEX IF NOT EXISTS idx_sync_points_user ON sync_points(user_id);
            CREATE INDEX IF NOT EXISTS idx_sync_points_api_key ON sync_points(api_key_id);
            CREATE INDEX IF NOT EXISTS idx_sync_point_books_book ON sync_point_books(book_id);
            "#,
        )
        .map_err(|e| AppError::Internal(format!("Failed to initialize schema: {}", e)))?;

        Ok(())
    }

    // ========== USER OPERATIONS ==========

    /// Create a new user.
    pub fn create_user(&self, user: &User) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO users (id, username, created_at) VALUES (?1, ?2, ?3)",
            params![user.id, user.username, user.created_at],
        )
        .map_err(|e| AppError::Internal(format!("Failed to create user: {}", e)))?;
        Ok(())
    }

    /// Get user by ID.
    pub fn get_user_by_id(&self, id: &str) -> Result<Option<User>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, username, created_at FROM users WHERE id = ?1",
            params![id],
            |row| {
                Ok(User {
                    id: row.get(0)?,
                    username: row.get(1)?,
                    created_at: row.get(2)?,
                })
            },
        )
        .optional()
        .map_err(|e| AppError::Internal(format!("Failed to get user: {}", e)))
    }

    /// Delete user. Sync points owned by the user are the lifecycle
    /// manager's job and must be deleted first.
    pub fn delete_user(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute("DELETE FROM users WHERE id = ?1", params![id])
            .map_err(|e| AppError::Internal(format!("Failed to delete user: {}", e)))?;
        Ok(rows > 0)
    }

    // ========== API KEY OPERATIONS ==========

    /// Create an API key.
    pub fn create_api_key(&self, key: &ApiKey) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO api_keys (id, user_id, label, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![key.id, key.user_id, key.label, key.created_at],
        )
        .map_err(|e| AppError::Internal(format!("Failed to create API key: {}", e)))?;
        Ok(())
    }

    /// Delete an API key.
    pub fn delete_api_key(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute("DELETE FROM api_keys WHERE id = ?1", params![id])
            .map_err(|e| AppError::Internal(format!("Failed to delete API key: {}", e)))?;
        Ok(rows > 0)
    }

    // ========== LIBRARY OPERATIONS ==========

    /// Create library.
    pub fn create_library(&self, library: &Library) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO libraries (id, name, is_public, owner_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                library.id,
                library.name,
                library.is_public,
                library.owner_id,
                library.created_at,
            ],
        )
        .map_err(|e| AppError::Internal(format!("Failed to create library: {}", e)))?;
        Ok(())
    }

    /// Grant a user access to a non-public library.
    pub fn grant_library_access(&self, user_id: &str, library_id: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR IGNORE INTO library_access (user_id, library_id) VALUES (?1, ?2)",
            params![user_id, library_id],
        )
        .map_err(|e| AppError::Internal(format!("Failed to grant library access: {}", e)))?;
        Ok(())
    }

    // ========== SERIES OPERATIONS ==========

    /// Save or update a series.
    pub fn save_series(&self, series: &Series) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO series (id, library_id, name, age_rating, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT (id) DO UPDATE SET
                name = excluded.name,
                age_rating = excluded.age_rating,
                updated_at = excluded.updated_at",
            params![
                series.id,
                series.library_id,
                series.name,
                series.age_rating,
                series.created_at,
                series.updated_at,
            ],
        )
        .map_err(|e| AppError::Internal(format!("Failed to save series: {}", e)))?;
        Ok(())
    }

    /// Attach a sharing label to a series.
    pub fn add_series_label(&self, series_id: &str, label: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR IGNORE INTO series_labels (series_id, label) VALUES (?1, ?2)",
            params![series_id, label],
        )
        .map_err(|e| AppError::Internal(format!("Failed to add series label: {}", e)))?;
        Ok(())
    }

    // ========== BOOK OPERATIONS ==========

    /// Save or update a book.
    pub fn save_book(&self, book: &StoredBook) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO books
             (id, library_id, series_id, title, number_sort, file_size, file_mtime,
              file_hash, metadata_updated_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT (id) DO UPDATE SET
                library_id = excluded.library_id,
                series_id = excluded.series_id,
                title = excluded.title,
                number_sort = excluded.number_sort,
                file_size = excluded.file_size,
                file_mtime = excluded.file_mtime,
                file_hash = excluded.file_hash,
                metadata_updated_at = excluded.metadata_updated_at,
                updated_at = excluded.updated_at",
            params![
                book.id,
                book.library_id,
                book.series_id,
                book.title,
                book.number_sort,
                book.file_size,
                book.file_mtime,
                book.file_hash,
                book.metadata_updated_at,
                book.created_at,
                book.updated_at,
            ],
        )
        .map_err(|e| AppError::Internal(format!("Failed to save book: {}", e)))?;
        Ok(())
    }

    /// Get book by ID.
    pub fn get_book(&self, id: &str) -> Result<Option<StoredBook>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, library_id, series_id, title, number_sort, file_size, file_mtime,
                    file_hash, metadata_updated_at, created_at, updated_at
             FROM books WHERE id = ?1",
            params![id],
            Self::row_to_stored_book,
        )
        .optional()
        .map_err(|e| AppError::Internal(format!("Failed to get book: {}", e)))
    }

    /// Delete a single book by ID.
    pub fn delete_book(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute("DELETE FROM books WHERE id = ?1", params![id])
            .map_err(|e| AppError::Internal(format!("Failed to delete book: {}", e)))?;
        Ok(rows > 0)
    }

    /// Helper to convert a row to StoredBook.
    fn row_to_stored_book(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredBook> {
        Ok(StoredBook {
            id: row.get(0)?,
            library_id: row.get(1)?,
            series_id: row.get(2)?,
            title: row.get(3)?,
            number_sort: row.get(4)?,
            file_size: row.get(5)?,
            file_mtime: row.get(6)?,
            file_hash: row.get(7)?,
            metadata_updated_at: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }

    // ========== READ PROGRESS OPERATIONS ==========

    /// Save or update reading progress.
    pub fn save_progress(&self, progress: &ReadProgress) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO read_progress (user_id, book_id, completed, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (user_id, book_id) DO UPDATE SET
                completed = excluded.completed,
                updated_at = excluded.updated_at",
            params![
                progress.user_id,
                progress.book_id,
                progress.completed,
                progress.updated_at,
            ],
        )
        .map_err(|e| AppError::Internal(format!("Failed to save progress: {}", e)))?;
        Ok(())
    }

    /// Delete reading progress for a book.
    pub fn delete_progress(&self, user_id: &str, book_id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute(
                "DELETE FROM read_progress WHERE user_id = ?1 AND book_id = ?2",
                params![user_id, book_id],
            )
            .map_err(|e| AppError::Internal(format!("Failed to delete progress: {}", e)))?;
        Ok(rows > 0)
    }

    // ========== THUMBNAIL OPERATIONS ==========

    /// Save a thumbnail. Selecting one deselects any other thumbnail of the
    /// same book.
    pub fn save_thumbnail(&self, thumbnail: &Thumbnail) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| AppError::Internal(format!("Failed to start transaction: {}", e)))?;

        if thumbnail.selected {
            tx.execute(
                "UPDATE thumbnails SET selected = 0 WHERE book_id = ?1",
                params![thumbnail.book_id],
            )
            .map_err(|e| AppError::Internal(format!("Failed to deselect thumbnails: {}", e)))?;
        }

        tx.execute(
            "INSERT INTO thumbnails (id, book_id, selected) VALUES (?1, ?2, ?3)
             ON CONFLICT (id) DO UPDATE SET selected = excluded.selected",
            params![thumbnail.id, thumbnail.book_id, thumbnail.selected],
        )
        .map_err(|e| AppError::Internal(format!("Failed to save thumbnail: {}", e)))?;

        tx.commit()
            .map_err(|e| AppError::Internal(format!("Failed to commit transaction: {}", e)))?;
        Ok(())
    }

    // ========== READ LIST OPERATIONS ==========

    /// Save or update a read list.
    pub fn save_read_list(&self, read_list: &ReadList) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO read_lists (id, name, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (id) DO UPDATE SET
                name = excluded.name,
                updated_at = excluded.updated_at",
            params![
                read_list.id,
                read_list.name,
                read_list.created_at,
                read_list.updated_at,
            ],
        )
        .map_err(|e| AppError::Internal(format!("Failed to save read list: {}", e)))?;
        Ok(())
    }

    /// Add a book to a read list.
    pub fn add_read_list_book(&self, read_list_id: &str, book_id: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR IGNORE INTO read_list_books (read_list_id, book_id) VALUES (?1, ?2)",
            params![read_list_id, book_id],
        )
        .map_err(|e| AppError::Internal(format!("Failed to add read list book: {}", e)))?;
        Ok(())
    }

    /// Delete a read list and its membership.
    pub fn delete_read_list(&self, id: &str) -> Result<bool> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| AppError::Internal(format!("Failed to start transaction: {}", e)))?;

        tx.execute(
            "DELETE FROM read_list_books WHERE read_list_id = ?1",
            params![id],
        )
        .map_err(|e| AppError::Internal(format!("Failed to delete read list books: {}", e)))?;
        let rows = tx
            .execute("DELETE FROM read_lists WHERE id = ?1", params![id])
            .map_err(|e| AppError::Internal(format!("Failed to delete read list: {}", e)))?;

        tx.commit()
            .map_err(|e| AppError::Internal(format!("Failed to commit transaction: {}", e)))?;
        Ok(rows > 0)
    }
}
