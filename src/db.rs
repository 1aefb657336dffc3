mod schema;

pub use schema::Database;

use serde::{Deserialize, Serialize};

/// User account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Unique user ID.
    pub id: String,
    /// Username.
    pub username: String,
    /// Account creation timestamp.
    pub created_at: i64,
}

/// API credential, used to scope sync points to one client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
    /// Unique key ID.
    pub id: String,
    /// Owning user ID.
    pub user_id: String,
    /// Human-readable label ("kobo", "tablet", ...).
    pub label: String,
    /// Creation timestamp.
    pub created_at: i64,
}

/// Library collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Library {
    /// Unique library ID.
    pub id: String,
    /// Library name.
    pub name: String,
    /// Whether library is visible to every user.
    pub is_public: bool,
    /// Owner user ID (None for system library).
    pub owner_id: Option<String>,
    /// Creation timestamp.
    pub created_at: i64,
}

/// Series grouping books, carrier of content restrictions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Series {
    /// Unique series ID.
    pub id: String,
    /// Library ID.
    pub library_id: String,
    /// Series name.
    pub name: String,
    /// Age rating from metadata, if any.
    pub age_rating: Option<i64>,
    /// Creation timestamp.
    pub created_at: i64,
    /// Last metadata update timestamp.
    pub updated_at: i64,
}

/// Stored book with the fields the snapshot fingerprint is built from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredBook {
    /// Book ID.
    pub id: String,
    /// Library ID.
    pub library_id: String,
    /// Series ID, if the book belongs to a series.
    pub series_id: Option<String>,
    /// Book title.
    pub title: String,
    /// Sort position inside the series.
    pub number_sort: Option<f64>,
    /// File size in bytes.
    pub file_size: i64,
    /// File modification time.
    pub file_mtime: i64,
    /// File hash (absent when hashing is disabled).
    pub file_hash: Option<String>,
    /// Last metadata update timestamp.
    pub metadata_updated_at: i64,
    /// Creation timestamp.
    pub created_at: i64,
    /// Last update timestamp.
    pub updated_at: i64,
}

/// Reading progress for a book; a row exists only once a user has touched
/// the book.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadProgress {
    /// User ID.
    pub user_id: String,
    /// Book ID.
    pub book_id: String,
    /// Whether the book has been read to the end.
    pub completed: bool,
    /// Last update timestamp.
    pub updated_at: i64,
}

/// Cover thumbnail; at most one per book is selected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thumbnail {
    /// Thumbnail ID.
    pub id: String,
    /// Book ID.
    pub book_id: String,
    /// Whether this is the currently selected thumbnail.
    pub selected: bool,
}

/// Read list (user-curated ordered collection of books).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadList {
    /// Read list ID.
    pub id: String,
    /// Read list name.
    pub name: String,
    /// Creation timestamp.
    pub created_at: i64,
    /// Last update timestamp.
    pub updated_at: i64,
}
