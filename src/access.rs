//! Access filtering and book search.
//!
//! The visibility rules (library sharing, age rating ceiling, sharing
//! labels) are rendered into a SQL predicate that snapshot and on-deck
//! queries embed, so a sync point only ever captures what its user can
//! currently see.

use crate::error::{AppError, Result};
use rusqlite::types::Value;
use std::collections::BTreeSet;

/// Identity and content restrictions of the requesting user.
#[derive(Debug, Clone, Default)]
pub struct AccessContext {
    /// Requesting user ID. Required for every sync operation.
    pub user_id: Option<String>,
    /// API key the snapshot is scoped to, if any.
    pub api_key_id: Option<String>,
    /// Hide books whose series age rating exceeds this ceiling.
    /// Unrated series are visible.
    pub max_age_rating: Option<i64>,
    /// When non-empty, only series carrying at least one of these sharing
    /// labels are visible. Books without a series are unaffected.
    pub allowed_labels: Vec<String>,
    /// Series carrying any of these sharing labels are hidden.
    pub excluded_labels: Vec<String>,
}

impl AccessContext {
    /// Context for a user with no content restrictions.
    pub fn for_user(user_id: &str) -> Self {
        Self {
            user_id: Some(user_id.to_string()),
            ..Self::default()
        }
    }

    /// Scope the context to one API credential.
    pub fn with_api_key(mut self, api_key_id: &str) -> Self {
        self.api_key_id = Some(api_key_id.to_string());
        self
    }

    /// Resolve the user id, rejecting before any I/O when absent.
    pub fn require_user_id(&self) -> Result<&str> {
        self.user_id
            .as_deref()
            .ok_or_else(|| AppError::Precondition("No user id in access context".to_string()))
    }
}

/// Read status filter for book searches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// No progress row for the requesting user.
    Unread,
    /// Progress exists but the book is not completed.
    InProgress,
    /// The book is completed.
    Read,
}

/// Search conditions a snapshot is built from. Empty search matches every
/// visible book.
#[derive(Debug, Clone, Default)]
pub struct BookSearch {
    /// Restrict to these libraries.
    pub library_ids: Option<Vec<String>>,
    /// Restrict to these series.
    pub series_ids: Option<Vec<String>>,
    /// Restrict to books with this read status for the requesting user.
    pub read_status: Option<ReadStatus>,
}

impl BookSearch {
    /// Search restricted to a set of libraries.
    pub fn in_libraries(library_ids: &[&str]) -> Self {
        Self {
            library_ids: Some(library_ids.iter().map(|s| s.to_string()).collect()),
            ..Self::default()
        }
    }
}

/// Optional relations a book query may need. The query builder attaches
/// only the joins that are requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RequiredJoin {
    /// `libraries` (sharing rules).
    Library,
    /// `series` (age rating).
    Series,
    /// `read_progress` of the requesting user.
    ReadProgress,
    /// Selected `thumbnails` row.
    Thumbnail,
}

impl RequiredJoin {
    fn sql(&self) -> &'static str {
        match self {
            RequiredJoin::Library => "JOIN libraries l ON l.id = b.library_id",
            RequiredJoin::Series => "LEFT JOIN series s ON s.id = b.series_id",
            RequiredJoin::ReadProgress => {
                "LEFT JOIN read_progress p ON p.book_id = b.id AND p.user_id = ?"
            }
            RequiredJoin::Thumbnail => {
                "LEFT JOIN thumbnails t ON t.book_id = b.id AND t.selected = 1"
            }
        }
    }

    fn params(&self, user_id: &str) -> Vec<Value> {
        match self {
            RequiredJoin::ReadProgress => vec![Value::from(user_id.to_string())],
            _ => Vec::new(),
        }
    }
}

/// Builder rendering an access-filtered book query. The base table is
/// always `books b`; joins are attached on demand.
#[derive(Debug)]
pub struct BookQuery {
    user_id: String,
    joins: BTreeSet<RequiredJoin>,
    clauses: Vec<String>,
    clause_params: Vec<Value>,
}

impl BookQuery {
    /// Start a query for the context's user, with the access predicate
    /// already applied.
    pub fn new(ctx: &AccessContext) -> Result<Self> {
        let user_id = ctx.require_user_id()?.to_string();
        let mut query = Self {
            user_id,
            joins: BTreeSet::new(),
            clauses: Vec::new(),
            clause_params: Vec::new(),
        };
        query.push_access(ctx);
        Ok(query)
    }

    /// Request an optional relation.
    pub fn require(&mut self, join: RequiredJoin) -> &mut Self {
        self.joins.insert(join);
        self
    }

    fn push_access(&mut self, ctx: &AccessContext) {
        // Library sharing: public, owned, or explicitly granted.
        self.require(RequiredJoin::Library);
        self.clauses.push(
            "(l.is_public = 1 OR l.owner_id = ? OR EXISTS (
                SELECT 1 FROM library_access la
                WHERE la.library_id = b.library_id AND la.user_id = ?))"
                .to_string(),
        );
        let user_id = Value::from(self.user_id.clone());
        self.clause_params.push(user_id.clone());
        self.clause_params.push(user_id);

        if let Some(max) = ctx.max_age_rating {
            self.require(RequiredJoin::Series);
            self.clauses
                .push("(s.age_rating IS NULL OR s.age_rating <= ?)".to_string());
            self.clause_params.push(Value::from(max));
        }

        if !ctx.excluded_labels.is_empty() {
            self.clauses.push(format!(
                "NOT EXISTS (SELECT 1 FROM series_labels sl
                 WHERE sl.series_id = b.series_id AND sl.label IN ({}))",
                placeholders(ctx.excluded_labels.len())
            ));
            self.clause_params
                .extend(ctx.excluded_labels.iter().cloned().map(Value::from));
        }

        if !ctx.allowed_labels.is_empty() {
            self.clauses.push(format!(
                "(b.series_id IS NULL OR EXISTS (SELECT 1 FROM series_labels sl
                 WHERE sl.series_id = b.series_id AND sl.label IN ({})))",
                placeholders(ctx.allowed_labels.len())
            ));
            self.clause_params
                .extend(ctx.allowed_labels.iter().cloned().map(Value::from));
        }
    }

    /// Apply a book search on top of the access predicate.
    pub fn apply_search(&mut self, search: &BookSearch) -> &mut Self {
        if let Some(library_ids) = &search.library_ids {
            self.clauses.push(format!(
                "b.library_id IN ({})",
                placeholders(library_ids.len())
            ));
            self.clause_params
                .extend(library_ids.iter().cloned().map(Value::from));
        }

        if let Some(series_ids) = &search.series_ids {
            self.clauses
                .push(format!("b.series_id IN ({})", placeholders(series_ids.len())));
            self.clause_params
                .extend(series_ids.iter().cloned().map(Value::from));
        }

        if let Some(status) = search.read_status {
            self.require(RequiredJoin::ReadProgress);
            self.clauses.push(
                match status {
                    ReadStatus::Unread => "p.book_id IS NULL",
                    ReadStatus::InProgress => "p.completed = 0",
                    ReadStatus::Read => "p.completed = 1",
                }
                .to_string(),
            );
        }

        self
    }

    /// Add a raw clause with its parameters.
    pub fn push_clause(&mut self, clause: &str, params: Vec<Value>) -> &mut Self {
        self.clauses.push(clause.to_string());
        self.clause_params.extend(params);
        self
    }

    /// Join clauses, in deterministic order.
    pub fn join_sql(&self) -> String {
        self.joins
            .iter()
            .map(|j| j.sql())
            .collect::<Vec<_>>()
            .join("\n ")
    }

    /// WHERE clause (always non-empty: the access predicate is present).
    pub fn where_sql(&self) -> String {
        format!("WHERE {}", self.clauses.join("\n AND "))
    }

    /// Positional parameters: join parameters first (joins precede WHERE in
    /// the statement), then clause parameters.
    pub fn params(&self) -> Vec<Value> {
        let mut params: Vec<Value> = Vec::new();
        for join in &self.joins {
            params.extend(join.params(&self.user_id));
        }
        params.extend(self.clause_params.iter().cloned());
        params
    }
}

/// Comma-separated positional placeholders.
pub(crate) fn placeholders(count: usize) -> String {
    vec!["?"; count].join(",")
}
