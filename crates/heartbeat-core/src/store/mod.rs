//! Sample log store capability and backends.
//!
//! One ordered, append-only log per identity. The hub only depends on the
//! [`SampleLogStore`] trait; backends decide where the logs live.
//!
//! Range reads use inclusive-inclusive bounds where negative indices count
//! from the end (`-1` is the last sample), matching list-range semantics of
//! key-value stores.

mod memory;
mod sqlite;

use std::future::Future;

use serde::{Deserialize, Serialize};

pub use memory::MemoryLogStore;
pub use sqlite::SqliteLogStore;

use crate::error::StoreError;
use crate::sample::Sample;

/// Stable backend identity for store implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackendKind {
    Memory,
    Sqlite,
}

/// Per-identity append-only sample logs.
///
/// All futures are `Send` so cycles can run on spawned tasks.
pub trait SampleLogStore: Send + Sync {
    fn backend_kind(&self) -> StoreBackendKind;

    /// Append one sample to `identity`'s log and return the new log length.
    fn append(
        &self,
        identity: &str,
        sample: &Sample,
    ) -> impl Future<Output = Result<u64, StoreError>> + Send;

    /// Read `[start, end]` inclusive; negative indices count from the end.
    ///
    /// A missing identity yields an empty vector, not an error.
    fn read_range(
        &self,
        identity: &str,
        start: i64,
        end: i64,
    ) -> impl Future<Output = Result<Vec<Sample>, StoreError>> + Send;

    /// Current log length (0 for a missing identity).
    fn len(&self, identity: &str) -> impl Future<Output = Result<u64, StoreError>> + Send;

    /// Append `old`'s log after `new`'s existing entries and delete `old`.
    ///
    /// Applied as one logical operation; returns the destination's new length.
    fn rename(
        &self,
        old: &str,
        new: &str,
    ) -> impl Future<Output = Result<u64, StoreError>> + Send;

    /// Drop every log.
    fn clear(&self) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// Resolve an inclusive `[start, end]` range against a log of `len` entries.
///
/// Returns the half-open index range to slice, or `None` when the window is
/// empty. Out-of-range bounds are clamped the way list-range reads clamp.
#[must_use]
pub fn resolve_range(len: u64, start: i64, end: i64) -> Option<std::ops::Range<u64>> {
    if len == 0 {
        return None;
    }
    let len_i = i64::try_from(len).unwrap_or(i64::MAX);
    let start = if start < 0 {
        len_i.saturating_add(start).max(0)
    } else {
        start
    };
    let end = if end < 0 { len_i.saturating_add(end) } else { end };
    if end < 0 || start >= len_i || start > end {
        return None;
    }
    let end = end.min(len_i - 1);
    Some(start as u64..(end as u64 + 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_range_covers_log() {
        assert_eq!(resolve_range(5, 0, -1), Some(0..5));
    }

    #[test]
    fn trailing_window_from_negative_start() {
        assert_eq!(resolve_range(7, -3, -1), Some(4..7));
    }

    #[test]
    fn negative_start_past_head_clamps_to_zero() {
        assert_eq!(resolve_range(2, -5, -1), Some(0..2));
    }

    #[test]
    fn end_past_tail_clamps() {
        assert_eq!(resolve_range(3, 1, 100), Some(1..3));
    }

    #[test]
    fn empty_log_or_inverted_bounds_yield_nothing() {
        assert_eq!(resolve_range(0, 0, -1), None);
        assert_eq!(resolve_range(5, 3, 1), None);
        assert_eq!(resolve_range(5, 5, 9), None);
        assert_eq!(resolve_range(5, 0, -6), None);
    }
}
