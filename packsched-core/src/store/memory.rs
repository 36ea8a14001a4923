//! In-process ledger store
//!
//! Clones share the same underlying maps, so a test can hand one clone to a
//! [`Config`](crate::Config), drop it, and build a new one from another clone
//! to simulate a restart.

use super::{DirtyQuery, LedgerStore};
use crate::error::Result;
use crate::performance::QueryPerformance;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct Ledger {
    dirty: BTreeMap<String, DateTime<Utc>>,
    blacklist: BTreeMap<String, u64>,
    performance: BTreeMap<String, QueryPerformance>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Ledger>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl LedgerStore for MemoryStore {
    fn mark_dirty(&self, name: &str, started_at: DateTime<Utc>) -> Result<()> {
        self.ledger().dirty.insert(name.to_string(), started_at);
        Ok(())
    }

    fn clear_dirty(&self, name: &str) -> Result<()> {
        self.ledger().dirty.remove(name);
        Ok(())
    }

    fn load_dirty(&self) -> Result<Vec<DirtyQuery>> {
        Ok(self
            .ledger()
            .dirty
            .iter()
            .map(|(name, started_at)| DirtyQuery {
                name: name.clone(),
                started_at: *started_at,
            })
            .collect())
    }

    fn load_blacklist(&self) -> Result<BTreeMap<String, u64>> {
        Ok(self.ledger().blacklist.clone())
    }

    fn store_blacklist(&self, name: &str, count: u64) -> Result<()> {
        self.ledger().blacklist.insert(name.to_string(), count);
        Ok(())
    }

    fn store_performance(&self, name: &str, performance: &QueryPerformance) -> Result<()> {
        self.ledger()
            .performance
            .insert(name.to_string(), performance.clone());
        Ok(())
    }

    fn load_performance(&self) -> Result<BTreeMap<String, QueryPerformance>> {
        Ok(self.ledger().performance.clone())
    }

    fn clear_performance(&self) -> Result<()> {
        self.ledger().performance.clear();
        Ok(())
    }
}
