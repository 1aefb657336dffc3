//! shelfsync: the sync-point synchronization core of a self-hosted digital
//! library server.
//!
//! A sync point is an immutable, access-filtered snapshot of what one user
//! can currently see: one fingerprint row per visible book, the user's
//! visible read lists, and optionally a synthetic "On Deck" read list of
//! first-unread-per-series books. Two sync points can later be diffed into
//! precise deltas (added, removed, changed, read-progress-only changed),
//! and a client tracks which delta entries it has already consumed through
//! per-item acknowledgment flags.
//!
//! # Features
//!
//! - Atomic, point-in-time consistent snapshot creation
//! - On-Deck derivation (first unread book per qualifying series)
//! - Multi-way diffing between any two snapshots, paginated
//! - Partial acknowledgment, idempotent, with a side table for removals
//! - Lifecycle cleanup scoped to users, API keys, or a retention window
//!
//! Clients poll by creating new sync points and diffing against previously
//! held ones; the core owns no HTTP surface and mandates no wire format.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Access filtering and book search.
pub mod access;
/// Injected clock.
pub mod clock;
/// Configuration.
pub mod config;
/// Database operations and library-side models.
pub mod db;
/// Error types.
pub mod error;
/// Sync points: snapshots, diffing, acknowledgment, lifecycle.
pub mod sync;

#[cfg(test)]
mod tests;

pub use access::{AccessContext, BookSearch, ReadStatus};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::Config;
pub use db::Database;
pub use error::{AppError, Result};
pub use sync::{
    ON_DECK_READ_LIST_ID, Page, PageRequest, SyncPoint, SyncPointBook, SyncPointReadList,
    SyncService,
};
