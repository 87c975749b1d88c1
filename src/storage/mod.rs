//! Insights storage.
//!
//! The store is a flat key/value table: one row per metric name, values
//! are opaque text. Serialization of structured values happens before the
//! store sees them (see `InsightsResult::to_rows`).

mod sqlite;

pub use sqlite::SqliteStore;

use crate::error::Result;
use crate::models::VERSION_KEY;

/// Key/value store for computed insights.
pub trait InsightStore {
    /// Insert or replace every `(metric, value)` pair atomically.
    ///
    /// Returns the number of rows written.
    fn upsert(&self, rows: &[(String, String)]) -> Result<usize>;

    /// Value stored under `metric`, if any.
    fn get(&self, metric: &str) -> Result<Option<String>>;

    /// Every stored row, ordered by metric name.
    fn all(&self) -> Result<Vec<(String, String)>>;

    /// Dataset version of the last persisted run.
    fn latest_version(&self) -> Result<Option<String>> {
        self.get(VERSION_KEY)
    }
}
