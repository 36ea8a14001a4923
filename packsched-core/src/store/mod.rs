//! Ledger persistence
//!
//! The crash ledger is the only schedule state that must outlive the
//! process. [`LedgerStore`] is the contract the coordinator needs from a
//! backing store:
//! - dirty markers, written the moment a query starts
//! - blacklist counts, one per query name
//! - performance totals, for inspection outside the process
//!
//! Two implementations ship with the crate: [`MemoryStore`] for tests and
//! embedding, and [`SqliteStore`] for the daemon.

mod memory;
pub mod schema;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::error::Result;
use crate::performance::QueryPerformance;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// A query that had started but not finished when last seen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirtyQuery {
    pub name: String,
    pub started_at: DateTime<Utc>,
}

/// Backing store for the crash and performance ledger.
pub trait LedgerStore: Send + Sync {
    /// Persist that `name` started and has not finished.
    fn mark_dirty(&self, name: &str, started_at: DateTime<Utc>) -> Result<()>;

    /// Persist that `name` finished.
    fn clear_dirty(&self, name: &str) -> Result<()>;

    /// Queries still marked as started.
    fn load_dirty(&self) -> Result<Vec<DirtyQuery>>;

    /// Recorded failure count per query.
    fn load_blacklist(&self) -> Result<BTreeMap<String, u64>>;

    /// Persist the failure count for one query.
    fn store_blacklist(&self, name: &str, count: u64) -> Result<()>;

    /// Persist the running totals for one query.
    fn store_performance(&self, name: &str, performance: &QueryPerformance) -> Result<()>;

    /// All persisted performance totals.
    fn load_performance(&self) -> Result<BTreeMap<String, QueryPerformance>>;

    /// Forget all persisted performance totals.
    fn clear_performance(&self) -> Result<()>;
}

/// Crash state recovered at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Recovery {
    /// The most recently started query that never finished
    pub failed_query: Option<String>,
    /// Failure counts after this recovery was applied
    pub blacklist: BTreeMap<String, u64>,
}

/// Turn leftover dirty markers into blacklist increments.
///
/// Every dirty query gains exactly one failure and has its marker cleared,
/// so a later restart does not count the same crash again. Store errors are
/// logged; recovery never fails the caller.
pub fn recover(store: &dyn LedgerStore) -> Recovery {
    let mut blacklist = store.load_blacklist().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Failed to load query blacklist");
        BTreeMap::new()
    });

    let mut dirty = store.load_dirty().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Failed to load dirty query markers");
        Vec::new()
    });
    dirty.sort_by(|a, b| {
        a.started_at
            .cmp(&b.started_at)
            .then_with(|| a.name.cmp(&b.name))
    });

    for query in &dirty {
        let count = blacklist.entry(query.name.clone()).or_insert(0);
        *count += 1;
        tracing::warn!(
            query = %query.name,
            started_at = %query.started_at,
            failures = *count,
            "Scheduled query may have failed"
        );

        if let Err(e) = store.store_blacklist(&query.name, *count) {
            tracing::warn!(query = %query.name, error = %e, "Failed to persist blacklist count");
        }
        if let Err(e) = store.clear_dirty(&query.name) {
            tracing::warn!(query = %query.name, error = %e, "Failed to clear dirty marker");
        }
    }

    Recovery {
        failed_query: dirty.last().map(|q| q.name.clone()),
        blacklist,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_recover_counts_each_dirty_query_once() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store.mark_dirty("older", now - Duration::seconds(30)).unwrap();
        store.mark_dirty("newer", now).unwrap();
        store.store_blacklist("older", 2).unwrap();

        let recovery = recover(&store);
        assert_eq!(recovery.failed_query.as_deref(), Some("newer"));
        assert_eq!(recovery.blacklist["older"], 3);
        assert_eq!(recovery.blacklist["newer"], 1);
        assert!(store.load_dirty().unwrap().is_empty());

        let again = recover(&store);
        assert_eq!(again.failed_query, None);
        assert_eq!(again.blacklist["older"], 3);
    }

    #[test]
    fn test_recover_from_clean_store() {
        let recovery = recover(&MemoryStore::new());
        assert_eq!(recovery, Recovery::default());
    }
}
