//! Injected clock.
//!
//! Snapshot and on-deck timestamps come from an explicit clock dependency
//! rather than an ambient "now", so tests can pin time.

use chrono::Utc;
use std::sync::Arc;

/// Source of the current time, as UTC epoch seconds.
pub trait Clock: Send + Sync {
    /// Current time as UTC epoch seconds.
    fn now_timestamp(&self) -> i64;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_timestamp(&self) -> i64 {
        Utc::now().timestamp()
    }
}

/// Fixed clock for tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub i64);

impl Clock for FixedClock {
    fn now_timestamp(&self) -> i64 {
        self.0
    }
}

/// Shared clock handle.
pub type SharedClock = Arc<dyn Clock>;

/// Wall clock as a shared handle.
pub fn system_clock() -> SharedClock {
    Arc::new(SystemClock)
}
