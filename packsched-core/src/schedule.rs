//! The pack schedule
//!
//! [`Schedule`] owns every loaded [`Pack`] and exposes a filtered view of
//! the ones that apply to the host right now. It also carries the crash
//! bookkeeping recovered from the ledger at startup: the last query found
//! unfinished and the per-query blacklist counts. The schedule only stores
//! those; deciding to skip a blacklisted query is the scheduler's job.

use crate::pack::{HostFacts, Pack};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default)]
pub struct Schedule {
    packs: Vec<Pack>,
    failed_query: Option<String>,
    blacklist: BTreeMap<String, u64>,
}

impl Schedule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule seeded with recovered crash state.
    pub fn with_recovery(failed_query: Option<String>, blacklist: BTreeMap<String, u64>) -> Self {
        Self {
            packs: Vec::new(),
            failed_query,
            blacklist,
        }
    }

    /// Insert a pack, replacing any pack with the same name and source.
    pub fn add(&mut self, pack: Pack) {
        self.remove_from(pack.name(), pack.source());
        self.packs.push(pack);
    }

    /// Remove the default-source pack with this name.
    pub fn remove(&mut self, name: &str) {
        self.remove_from(name, "");
    }

    /// Remove the pack with exactly this name and source.
    pub fn remove_from(&mut self, name: &str, source: &str) {
        self.packs
            .retain(|p| !(p.name() == name && p.source() == source));
    }

    /// Remove every pack contributed by `source`.
    pub fn remove_source(&mut self, source: &str) -> usize {
        let before = self.packs.len();
        self.packs.retain(|p| p.source() != source);
        before - self.packs.len()
    }

    /// Drop all packs. Crash bookkeeping is kept.
    pub fn clear(&mut self) {
        self.packs.clear();
    }

    /// Packs that apply to a host with `facts`, evaluated on this call.
    pub fn iter<'a>(&'a self, facts: &'a HostFacts) -> impl Iterator<Item = &'a Pack> + 'a {
        self.packs.iter().filter(move |p| p.should_execute(facts))
    }

    /// Every pack regardless of applicability.
    pub fn all(&self) -> impl Iterator<Item = &Pack> {
        self.packs.iter()
    }

    pub fn get(&self, name: &str, source: &str) -> Option<&Pack> {
        self.packs
            .iter()
            .find(|p| p.name() == name && p.source() == source)
    }

    pub fn len(&self) -> usize {
        self.packs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packs.is_empty()
    }

    /// Query found unfinished when this process started, if any.
    pub fn failed_query(&self) -> Option<&str> {
        self.failed_query.as_deref()
    }

    pub fn blacklist(&self) -> &BTreeMap<String, u64> {
        &self.blacklist
    }

    pub fn blacklist_count(&self, name: &str) -> u64 {
        self.blacklist.get(name).copied().unwrap_or(0)
    }

    /// Whether `name` has crashed at least `threshold` times.
    pub fn is_blacklisted(&self, name: &str, threshold: u64) -> bool {
        self.blacklist_count(name) >= threshold
    }
}
