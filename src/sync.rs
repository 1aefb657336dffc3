//! Sync points: immutable, access-filtered snapshots of visible library
//! state, diffable against each other and carrying per-client
//! acknowledgment flags.

mod ack;
mod diff;
mod lifecycle;
mod on_deck;
mod snapshot;

use crate::access::{AccessContext, BookSearch};
use crate::clock::{SharedClock, system_clock};
use crate::config::SyncConfig;
use crate::db::Database;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};
use uuid::Uuid;

/// Reserved id of the synthetic "On Deck" read list inside a sync point.
pub const ON_DECK_READ_LIST_ID: &str = "ON_DECK";

/// An immutable snapshot of what a user could see at one instant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncPoint {
    /// Opaque, time-sortable, globally unique id (UUIDv7).
    pub id: String,
    /// Owning user.
    pub user_id: String,
    /// API key the snapshot is scoped to (None means browser/session).
    pub api_key_id: Option<String>,
    /// Creation timestamp.
    pub created_at: i64,
}

/// Book fingerprint captured at snapshot time. Only `synced` is ever
/// updated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncPointBook {
    /// Owning sync point.
    pub sync_point_id: String,
    /// Book id.
    pub book_id: String,
    /// Book creation timestamp at snapshot time.
    pub created_at: i64,
    /// Book update timestamp at snapshot time.
    pub updated_at: i64,
    /// File modification time at snapshot time.
    pub file_mtime: i64,
    /// File size at snapshot time.
    pub file_size: i64,
    /// File hash at snapshot time (absent when hashing is disabled).
    pub file_hash: Option<String>,
    /// Metadata update timestamp at snapshot time.
    pub metadata_updated_at: i64,
    /// Read-progress update timestamp (None: user had no progress).
    pub progress_updated_at: Option<i64>,
    /// Selected thumbnail id, used as a change proxy for cover changes.
    pub thumbnail_id: Option<String>,
    /// Client acknowledgment flag.
    pub synced: bool,
}

/// Read list entry captured at snapshot time (including the synthetic
/// On-Deck list).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncPointReadList {
    /// Owning sync point.
    pub sync_point_id: String,
    /// Read list id.
    pub read_list_id: String,
    /// Read list name at snapshot time.
    pub name: String,
    /// Creation timestamp at snapshot time.
    pub created_at: i64,
    /// Update timestamp at snapshot time.
    pub updated_at: i64,
    /// Client acknowledgment flag.
    pub synced: bool,
}

/// Page request for diff queries.
#[derive(Debug, Clone, Copy)]
pub struct PageRequest {
    /// Zero-based page number.
    pub page: u32,
    /// Page size.
    pub size: u32,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 0,
            size: 100,
        }
    }
}

impl PageRequest {
    /// Page request with the given page number and size.
    pub fn of(page: u32, size: u32) -> Self {
        Self { page, size }
    }

    pub(crate) fn limit(&self) -> i64 {
        self.size as i64
    }

    pub(crate) fn offset(&self) -> i64 {
        self.page as i64 * self.size as i64
    }
}

/// One page of a diff result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    /// Items of this page.
    pub items: Vec<T>,
    /// Zero-based page number.
    pub page: u32,
    /// Page size.
    pub size: u32,
    /// Total matching items across all pages.
    pub total_elements: u64,
}

impl<T> Page<T> {
    pub(crate) fn new(items: Vec<T>, request: PageRequest, total_elements: u64) -> Self {
        Self {
            items,
            page: request.page,
            size: request.size,
            total_elements,
        }
    }

    /// Total number of pages.
    pub fn total_pages(&self) -> u64 {
        if self.size == 0 {
            0
        } else {
            self.total_elements.div_ceil(self.size as u64)
        }
    }

    /// Whether this page has no items.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Sync-point service: snapshot creation, diffing, acknowledgment and
/// lifecycle, over an injected clock.
pub struct SyncService {
    db: Database,
    clock: SharedClock,
}

impl SyncService {
    /// Create a new sync service.
    pub fn new(db: Database, clock: SharedClock) -> Self {
        Self { db, clock }
    }

    /// Create a new sync service on the wall clock.
    pub fn with_system_clock(db: Database) -> Self {
        Self::new(db, system_clock())
    }

    // ========== SNAPSHOT BUILDER ==========

    /// Materialize a new sync point for the context's user: one fingerprint
    /// row per visible book matching the search, plus the user's visible
    /// read lists, in one transaction.
    pub fn create(&self, search: &BookSearch, ctx: &AccessContext) -> Result<SyncPoint> {
        let user_id = ctx.require_user_id()?.to_string();
        let id = Uuid::now_v7().to_string();
        let now = self.clock.now_timestamp();

        let sync_point = self
            .db
            .create_sync_point(&id, &user_id, ctx.api_key_id.as_deref(), now, search, ctx)?;
        debug!(user_id = %user_id, sync_point_id = %id, "Created sync point");
        Ok(sync_point)
    }

    /// Derive the On-Deck read list (first unread book per qualifying
    /// series) into an existing sync point. Intended to run once, right
    /// after [`SyncService::create`]. Returns the number of books added.
    pub fn add_on_deck(
        &self,
        sync_point_id: &str,
        ctx: &AccessContext,
        library_ids: Option<&[String]>,
    ) -> Result<usize> {
        ctx.require_user_id()?;
        let now = self.clock.now_timestamp();
        let added = self
            .db
            .add_on_deck(sync_point_id, ctx, library_ids, now)?;
        debug!(sync_point_id = %sync_point_id, added, "Derived on-deck read list");
        Ok(added)
    }

    // ========== DIFF ENGINE ==========

    /// All book fingerprints of one sync point.
    pub fn books_in(
        &self,
        sync_point_id: &str,
        page: PageRequest,
        only_not_synced: bool,
    ) -> Result<Page<SyncPointBook>> {
        self.db.sync_books_in(sync_point_id, page, only_not_synced)
    }

    /// Books present in `to` but not in `from`.
    pub fn books_added(
        &self,
        from: &str,
        to: &str,
        page: PageRequest,
        only_not_synced: bool,
    ) -> Result<Page<SyncPointBook>> {
        self.db.sync_books_added(from, to, page, only_not_synced)
    }

    /// Books present in `from` but not in `to`.
    pub fn books_removed(
        &self,
        from: &str,
        to: &str,
        page: PageRequest,
        only_not_synced: bool,
    ) -> Result<Page<SyncPointBook>> {
        self.db.sync_books_removed(from, to, page, only_not_synced)
    }

    /// Books present in both whose core fingerprint fields differ.
    pub fn books_changed(
        &self,
        from: &str,
        to: &str,
        page: PageRequest,
        only_not_synced: bool,
    ) -> Result<Page<SyncPointBook>> {
        self.db.sync_books_changed(from, to, page, only_not_synced)
    }

    /// Books present in both whose core fields are all equal but whose
    /// read-progress timestamp differs. Mutually exclusive with
    /// [`SyncService::books_changed`].
    pub fn books_read_progress_changed(
        &self,
        from: &str,
        to: &str,
        page: PageRequest,
        only_not_synced: bool,
    ) -> Result<Page<SyncPointBook>> {
        self.db
            .sync_books_read_progress_changed(from, to, page, only_not_synced)
    }

    /// Read lists present in `to` but not in `from`.
    pub fn read_lists_added(
        &self,
        from: &str,
        to: &str,
        page: PageRequest,
        only_not_synced: bool,
    ) -> Result<Page<SyncPointReadList>> {
        self.db.sync_read_lists_added(from, to, page, only_not_synced)
    }

    /// Read lists present in `from` but not in `to`.
    pub fn read_lists_removed(
        &self,
        from: &str,
        to: &str,
        page: PageRequest,
        only_not_synced: bool,
    ) -> Result<Page<SyncPointReadList>> {
        self.db
            .sync_read_lists_removed(from, to, page, only_not_synced)
    }

    /// Read lists present in both whose name or update timestamp differ.
    pub fn read_lists_changed(
        &self,
        from: &str,
        to: &str,
        page: PageRequest,
        only_not_synced: bool,
    ) -> Result<Page<SyncPointReadList>> {
        self.db
            .sync_read_lists_changed(from, to, page, only_not_synced)
    }

    /// Membership of read lists as captured at snapshot time.
    pub fn book_ids_by_read_list_ids(
        &self,
        sync_point_id: &str,
        read_list_ids: &[String],
    ) -> Result<HashMap<String, Vec<String>>> {
        self.db
            .sync_book_ids_by_read_list_ids(sync_point_id, read_list_ids)
    }

    // ========== ACKNOWLEDGMENT TRACKER ==========

    /// Record that a client consumed book delta entries. `for_removed`
    /// selects the side-table path for items absent from the `to` snapshot.
    pub fn mark_books_synced(
        &self,
        sync_point_id: &str,
        for_removed: bool,
        book_ids: &[String],
    ) -> Result<()> {
        self.db
            .mark_sync_books_synced(sync_point_id, for_removed, book_ids)
    }

    /// Record that a client consumed read list delta entries.
    pub fn mark_read_lists_synced(
        &self,
        sync_point_id: &str,
        for_removed: bool,
        read_list_ids: &[String],
    ) -> Result<()> {
        self.db
            .mark_sync_read_lists_synced(sync_point_id, for_removed, read_list_ids)
    }

    // ========== LIFECYCLE MANAGER ==========

    /// Look up a sync point by id.
    pub fn find_by_id(&self, sync_point_id: &str) -> Result<Option<SyncPoint>> {
        self.db.find_sync_point(sync_point_id)
    }

    /// Delete one sync point and all its dependent rows. No-op when absent.
    pub fn delete_one(&self, sync_point_id: &str) -> Result<()> {
        self.db.delete_sync_point(sync_point_id)
    }

    /// Delete every sync point of a user (account cleanup).
    pub fn delete_by_user(&self, user_id: &str) -> Result<usize> {
        let deleted = self.db.delete_sync_points_by_user(user_id)?;
        info!(user_id = %user_id, deleted, "Deleted sync points for user");
        Ok(deleted)
    }

    /// Delete the user's sync points scoped to the given API keys (key
    /// revocation cleanup).
    pub fn delete_by_user_and_api_keys(
        &self,
        user_id: &str,
        api_key_ids: &[String],
    ) -> Result<usize> {
        let deleted = self
            .db
            .delete_sync_points_by_user_and_api_keys(user_id, api_key_ids)?;
        info!(user_id = %user_id, deleted, "Deleted sync points for revoked API keys");
        Ok(deleted)
    }

    /// Delete every sync point.
    pub fn delete_all(&self) -> Result<usize> {
        self.db.delete_all_sync_points()
    }

    /// Retention cleanup: delete sync points older than the configured
    /// window. No-op when retention is disabled.
    pub fn cleanup(&self, config: &SyncConfig) -> Result<usize> {
        let Some(window) = config.retention_seconds() else {
            return Ok(0);
        };
        let cutoff = self.clock.now_timestamp() - window;
        let deleted = self.db.delete_sync_points_created_before(cutoff)?;
        if deleted > 0 {
            info!(deleted, "Retention cleanup removed sync points");
        }
        Ok(deleted)
    }
}
