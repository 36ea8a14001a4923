//! Configuration coordinator
//!
//! [`Config`] turns raw source content into the live schedule.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  gen_config   ┌──────────────────────────────────────┐
//! │ ConfigPlugin │ ────────────► │               Config                 │
//! │ (filesystem, │  gen_pack     │  stage each source (parse, digest)   │
//! │  memory ...) │ ◄──────────── │  apply staged sources in one write   │
//! └──────────────┘               │  ├─ Schedule (packs per source)      │
//!                                │  ├─ file categories                  │
//!                                │  └─ per-source digests               │
//!                                │  merge remaining keys across sources │
//!                                └──────────────────┬───────────────────┘
//!                                                   │ update(keys)
//!                                                   ▼
//!                                      ┌─────────────────────────┐
//!                                      │ ConfigParserPlugin ...  │
//!                                      │ (options, events, ...)  │
//!                                      └─────────────────────────┘
//! ```
//!
//! ## Locking
//!
//! All mutable state sits behind one `RwLock`. Visitor accessors hold the
//! read side for the duration of the callback, so callbacks must not call
//! back into mutating methods. A second mutex serializes whole load/update
//! cycles. Ledger writes to the backing store happen after the state lock
//! is released.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use packsched_core::{Config, MemoryStore};
//! use packsched_core::plugins::MemoryConfigPlugin;
//! use std::sync::Arc;
//!
//! let plugin = MemoryConfigPlugin::new().with_source("main", r#"{"schedule": {}}"#);
//! let config = Config::new(Box::new(plugin), Arc::new(MemoryStore::new()));
//! config.load()?;
//! config.scheduled_queries(|name, query| println!("{name}: {}", query.query));
//! ```

mod parser;
mod plugin;
mod source;

pub use parser::ConfigParserPlugin;
pub use plugin::{
    ConfigPlugin, PluginRequest, PluginResponse, ACTION_GEN_CONFIG, ACTION_GEN_PACK,
};

use crate::digest::{digest_all, digest_content};
use crate::error::{Error, Result};
use crate::merge::merge_sources;
use crate::pack::{HostFacts, Pack, ScheduledQuery};
use crate::performance::{QueryPerformance, ResourceSample};
use crate::schedule::Schedule;
use crate::settings::Settings;
use crate::store::{recover, LedgerStore};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use source::{stage_source, StagedSource};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread;
use std::time::{Duration, Instant};

const DEFAULT_RETRIEVAL_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_BLACKLIST_THRESHOLD: u64 = 3;

/// Source key for files added directly through [`Config::add_file`].
const MANUAL_SOURCE: &str = "";

struct ParserSlot {
    parser: Box<dyn ConfigParserPlugin>,
    enabled: bool,
}

struct ConfigState {
    schedule: Schedule,
    facts: HostFacts,
    performance: BTreeMap<String, QueryPerformance>,
    /// source -> category -> patterns
    file_sources: BTreeMap<String, BTreeMap<String, Vec<String>>>,
    /// category -> patterns, appended in source order
    files: BTreeMap<String, Vec<String>>,
    hashes: BTreeMap<String, String>,
    /// source -> top-level keys not consumed by the coordinator
    documents: BTreeMap<String, Map<String, Value>>,
    valid: bool,
}

impl ConfigState {
    fn rebuild_files(&mut self) {
        let mut files: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for categories in self.file_sources.values() {
            for (category, patterns) in categories {
                files
                    .entry(category.clone())
                    .or_default()
                    .extend(patterns.iter().cloned());
            }
        }
        self.files = files;
    }

    /// Replace everything `staged.source` contributed with its new content.
    fn apply(&mut self, staged: StagedSource) {
        let StagedSource {
            source,
            digest,
            packs,
            files,
            document,
        } = staged;

        let removed = self.schedule.remove_source(&source);
        let added = packs.len();
        for pack in packs {
            self.schedule.add(pack);
        }

        if files.is_empty() {
            self.file_sources.remove(&source);
        } else {
            self.file_sources.insert(source.clone(), files);
        }
        self.rebuild_files();

        self.documents.insert(source.clone(), document);
        self.hashes.insert(source.clone(), digest);

        tracing::info!(source = %source, packs_removed = removed, packs_added = added, "Applied config source");
    }
}

/// The configuration and schedule engine.
///
/// Constructed once at startup and shared (e.g. in an `Arc`) with the
/// scheduler and the loader. Construction recovers crash state from the
/// ledger store.
pub struct Config {
    plugin: Arc<dyn ConfigPlugin>,
    store: Arc<dyn LedgerStore>,
    retrieval_timeout: Duration,
    blacklist_threshold: u64,
    state: RwLock<ConfigState>,
    parsers: Mutex<Vec<ParserSlot>>,
    cycle: Mutex<()>,
    start_time: DateTime<Utc>,
}

impl Config {
    /// Create a coordinator reading from `plugin` and persisting to `store`.
    pub fn new(plugin: Box<dyn ConfigPlugin>, store: Arc<dyn LedgerStore>) -> Self {
        let recovery = recover(store.as_ref());
        if let Some(failed) = &recovery.failed_query {
            tracing::warn!(query = %failed, "Recovered failed query from previous run");
        }

        Self {
            plugin: Arc::from(plugin),
            store,
            retrieval_timeout: DEFAULT_RETRIEVAL_TIMEOUT,
            blacklist_threshold: DEFAULT_BLACKLIST_THRESHOLD,
            state: RwLock::new(ConfigState {
                schedule: Schedule::with_recovery(recovery.failed_query, recovery.blacklist),
                facts: HostFacts::detect(),
                performance: BTreeMap::new(),
                file_sources: BTreeMap::new(),
                files: BTreeMap::new(),
                hashes: BTreeMap::new(),
                documents: BTreeMap::new(),
                valid: false,
            }),
            parsers: Mutex::new(Vec::new()),
            cycle: Mutex::new(()),
            start_time: Utc::now(),
        }
    }

    /// Create a coordinator wired from daemon settings.
    ///
    /// The active plugin is looked up in `plugins`; every parser in
    /// `parsers` is registered.
    pub fn from_settings(
        settings: &Settings,
        plugins: &crate::registry::PluginRegistry<dyn ConfigPlugin>,
        parsers: Vec<Box<dyn ConfigParserPlugin>>,
        store: Arc<dyn LedgerStore>,
    ) -> Result<Self> {
        settings.validate()?;
        let plugin = plugins.create(&settings.source.plugin)?;

        let mut config = Self::new(plugin, store)
            .with_retrieval_timeout(Duration::from_millis(settings.source.timeout_ms))
            .with_blacklist_threshold(settings.schedule.blacklist_threshold)
            .with_host_facts(HostFacts::from_settings(&settings.host));
        for parser in parsers {
            config = config.with_parser(parser);
        }
        Ok(config)
    }

    pub fn with_retrieval_timeout(mut self, timeout: Duration) -> Self {
        self.retrieval_timeout = timeout;
        self
    }

    pub fn with_blacklist_threshold(mut self, threshold: u64) -> Self {
        self.blacklist_threshold = threshold.max(1);
        self
    }

    pub fn with_host_facts(self, facts: HostFacts) -> Self {
        self.write_state().facts = facts;
        self
    }

    pub fn with_parser(self, parser: Box<dyn ConfigParserPlugin>) -> Self {
        self.register_parser(parser);
        self
    }

    /// Register a parser; it takes part from the next load or update on.
    pub fn register_parser(&self, parser: Box<dyn ConfigParserPlugin>) {
        tracing::info!(parser = parser.name(), keys = ?parser.keys(), "Registered config parser");
        self.lock_parsers().push(ParserSlot {
            parser,
            enabled: true,
        });
    }

    fn read_state(&self) -> RwLockReadGuard<'_, ConfigState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, ConfigState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_parsers(&self) -> MutexGuard<'_, Vec<ParserSlot>> {
        self.parsers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_cycle(&self) -> MutexGuard<'_, ()> {
        self.cycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ============================================
    // Load / update
    // ============================================

    /// Retrieve content from the active plugin and merge it.
    ///
    /// A failed or over-budget retrieval leaves all state untouched.
    pub fn load(&self) -> Result<()> {
        let _cycle = self.lock_cycle();
        let config = self.retrieve()?;
        self.apply_sources(config)
    }

    /// Merge pushed content for the given sources.
    ///
    /// Each source's previous packs, files and keys are replaced by its new
    /// content; sources not named here are left alone.
    pub fn update(&self, config: BTreeMap<String, String>) -> Result<()> {
        let _cycle = self.lock_cycle();
        self.apply_sources(config)
    }

    /// Run `gen_config` on a worker thread bounded by the retrieval timeout.
    ///
    /// A worker that misses the deadline is left to finish on its own; its
    /// result is dropped with the channel.
    fn retrieve(&self) -> Result<BTreeMap<String, String>> {
        let start = Instant::now();
        tracing::debug!(plugin = self.plugin.name(), "Retrieving config");

        let (tx, rx) = mpsc::channel();
        let plugin = Arc::clone(&self.plugin);
        thread::Builder::new()
            .name(format!("config-{}", self.plugin.name()))
            .spawn(move || {
                let _ = tx.send(plugin.gen_config());
            })?;

        let result = match rx.recv_timeout(self.retrieval_timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                let elapsed_ms = start.elapsed().as_millis() as u64;
                let timeout_ms = self.retrieval_timeout.as_millis() as u64;
                tracing::warn!(
                    plugin = self.plugin.name(),
                    elapsed_ms,
                    timeout_ms,
                    "Config retrieval exceeded timeout; discarding content"
                );
                return Err(Error::Timeout {
                    elapsed_ms,
                    timeout_ms,
                });
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(Error::Retrieval(format!(
                    "config plugin {} stopped without a result",
                    self.plugin.name()
                )));
            }
        };

        let config = result.map_err(|e| {
            tracing::error!(plugin = self.plugin.name(), error = %e, "Config retrieval failed");
            match e {
                Error::Timeout { .. } | Error::Retrieval(_) => e,
                other => Error::Retrieval(other.to_string()),
            }
        })?;

        tracing::debug!(
            plugin = self.plugin.name(),
            sources = config.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Retrieved config"
        );
        Ok(config)
    }

    fn apply_sources(&self, config: BTreeMap<String, String>) -> Result<()> {
        let provided = config.len();
        let mut staged = Vec::with_capacity(provided);

        for (source, content) in &config {
            match stage_source(self.plugin.as_ref(), source, content) {
                Ok(update) => staged.push(update),
                Err(e) => {
                    tracing::warn!(source = %source, error = %e, "Skipping config source");
                }
            }
        }

        if provided > 0 && staged.is_empty() {
            return Err(Error::NoValidSource(provided));
        }

        let applied = staged.len();
        let merged = {
            let mut state = self.write_state();
            for update in staged {
                state.apply(update);
            }
            state.valid = true;
            merge_sources(state.documents.values())
        };

        tracing::info!(provided, applied, keys = merged.len(), "Config cycle applied");
        self.dispatch(&merged);
        Ok(())
    }

    fn dispatch(&self, merged: &BTreeMap<String, Value>) {
        let mut parsers = self.lock_parsers();
        for slot in parsers.iter_mut().filter(|slot| slot.enabled) {
            let wanted: BTreeMap<String, Value> = slot
                .parser
                .keys()
                .into_iter()
                .filter_map(|key| merged.get(&key).map(|value| (key, value.clone())))
                .collect();
            if wanted.is_empty() {
                continue;
            }

            if let Err(e) = slot.parser.update(&wanted) {
                slot.enabled = false;
                tracing::warn!(
                    parser = slot.parser.name(),
                    error = %e,
                    "Config parser rejected update; disabling it"
                );
            }
        }
    }

    /// Record the digest of one source's content.
    pub fn hash_source(&self, source: &str, content: &str) {
        self.write_state()
            .hashes
            .insert(source.to_string(), digest_content(content));
    }

    // ============================================
    // Explicit resets
    // ============================================

    /// Drop every pack and all performance totals.
    pub fn clear_schedule(&self) {
        {
            let mut state = self.write_state();
            state.schedule.clear();
            state.performance.clear();
        }
        if let Err(e) = self.store.clear_performance() {
            tracing::warn!(error = %e, "Failed to clear persisted performance");
        }
    }

    /// Drop every file category.
    pub fn clear_files(&self) {
        let mut state = self.write_state();
        state.file_sources.clear();
        state.files.clear();
    }

    /// Drop every source digest.
    pub fn clear_hash(&self) {
        self.write_state().hashes.clear();
    }

    // ============================================
    // Direct edits
    // ============================================

    /// Parse `content` as a pack and upsert it under `(name, source)`.
    pub fn add_pack(&self, name: &str, source: &str, content: &Value) -> Result<()> {
        let pack = Pack::from_value(name, source, content)?;
        self.write_state().schedule.add(pack);
        Ok(())
    }

    /// Remove the default-source pack named `name`.
    pub fn remove_pack(&self, name: &str) {
        self.write_state().schedule.remove(name);
    }

    /// Remove the pack `(name, source)`.
    pub fn remove_pack_from(&self, name: &str, source: &str) {
        self.write_state().schedule.remove_from(name, source);
    }

    /// Append a pattern to a file category outside any config source.
    pub fn add_file(&self, category: &str, path: &str) {
        let mut state = self.write_state();
        state
            .file_sources
            .entry(MANUAL_SOURCE.to_string())
            .or_default()
            .entry(category.to_string())
            .or_default()
            .push(path.to_string());
        state.rebuild_files();
    }

    /// Replace the host facts packs are evaluated against.
    pub fn set_host_facts(&self, facts: HostFacts) {
        self.write_state().facts = facts;
    }

    pub fn host_facts(&self) -> HostFacts {
        self.read_state().facts.clone()
    }

    // ============================================
    // Crash and performance ledger
    // ============================================

    /// Mark `name` as running. The marker is persisted before returning.
    pub fn record_query_start(&self, name: &str) {
        let started_at = Utc::now();
        self.write_state()
            .performance
            .entry(name.to_string())
            .or_default()
            .dirty = true;

        if let Err(e) = self.store.mark_dirty(name, started_at) {
            tracing::warn!(query = name, error = %e, "Failed to persist query start");
        }
    }

    /// Record a completed run of `name` and clear its running marker.
    ///
    /// `before` and `after` are process resource samples taken around the
    /// run; see [`ResourceSample`].
    pub fn record_query_performance(
        &self,
        name: &str,
        delay: u64,
        size: u64,
        before: &ResourceSample,
        after: &ResourceSample,
    ) {
        let snapshot = {
            let mut state = self.write_state();
            let performance = state.performance.entry(name.to_string()).or_default();
            performance.record(delay, size, before, after, Utc::now());
            performance.clone()
        };

        if let Err(e) = self.store.clear_dirty(name) {
            tracing::warn!(query = name, error = %e, "Failed to clear query start marker");
        }
        if let Err(e) = self.store.store_performance(name, &snapshot) {
            tracing::warn!(query = name, error = %e, "Failed to persist query performance");
        }
    }

    /// Query found unfinished when this process started.
    pub fn failed_query(&self) -> Option<String> {
        self.read_state()
            .schedule
            .failed_query()
            .map(str::to_string)
    }

    pub fn blacklist_count(&self, name: &str) -> u64 {
        self.read_state().schedule.blacklist_count(name)
    }

    /// Whether `name` reached the configured crash threshold.
    pub fn is_blacklisted(&self, name: &str) -> bool {
        self.read_state()
            .schedule
            .is_blacklisted(name, self.blacklist_threshold)
    }

    // ============================================
    // Accessors
    // ============================================

    /// Visit every pack that applies to the current host facts.
    pub fn packs(&self, mut visit: impl FnMut(&Pack)) {
        let state = self.read_state();
        for pack in state.schedule.iter(&state.facts) {
            visit(pack);
        }
    }

    /// Visit every applicable query as `(schedule-wide name, definition)`.
    pub fn scheduled_queries(&self, mut visit: impl FnMut(&str, &ScheduledQuery)) {
        let state = self.read_state();
        for pack in state.schedule.iter(&state.facts) {
            for query in pack.queries() {
                if query.applies_to(&state.facts) {
                    visit(&pack.qualified_name(query), query);
                }
            }
        }
    }

    /// Visit every file category with its patterns, merged across sources.
    pub fn files(&self, mut visit: impl FnMut(&str, &[String])) {
        let state = self.read_state();
        for (category, patterns) in &state.files {
            visit(category, patterns);
        }
    }

    /// Expand a category's patterns against the filesystem.
    ///
    /// `%%` matches recursively and `%` matches within one directory.
    pub fn resolve_files(&self, category: &str) -> Vec<PathBuf> {
        let patterns = self
            .read_state()
            .files
            .get(category)
            .cloned()
            .unwrap_or_default();

        let mut resolved = Vec::new();
        for pattern in patterns {
            let glob_pattern = pattern.replace("%%", "**").replace('%', "*");
            match glob::glob(&glob_pattern) {
                Ok(paths) => resolved.extend(paths.flatten()),
                Err(e) => {
                    tracing::warn!(category, pattern = %pattern, error = %e, "Invalid file pattern");
                }
            }
        }
        resolved
    }

    /// Visit the performance totals for `name`. Returns whether any exist.
    pub fn performance_stats(&self, name: &str, visit: impl FnOnce(&QueryPerformance)) -> bool {
        let state = self.read_state();
        match state.performance.get(name) {
            Some(performance) => {
                visit(performance);
                true
            }
            None => false,
        }
    }

    /// Visit a registered parser by name.
    pub fn visit_parser<R>(
        &self,
        name: &str,
        visit: impl FnOnce(&dyn ConfigParserPlugin) -> R,
    ) -> Result<R> {
        let parsers = self.lock_parsers();
        parsers
            .iter()
            .find(|slot| slot.parser.name() == name)
            .map(|slot| visit(slot.parser.as_ref()))
            .ok_or_else(|| Error::PluginNotFound {
                kind: "config_parser",
                name: name.to_string(),
            })
    }

    /// Whether a registered parser still receives updates.
    pub fn parser_enabled(&self, name: &str) -> Option<bool> {
        self.lock_parsers()
            .iter()
            .find(|slot| slot.parser.name() == name)
            .map(|slot| slot.enabled)
    }

    /// Aggregate digest over every source, in lexical source order.
    pub fn digest(&self) -> Result<String> {
        let state = self.read_state();
        if !state.valid {
            return Err(Error::NotLoaded);
        }
        Ok(digest_all(state.hashes.values()))
    }

    /// Digest of a single source, if it has been seen.
    pub fn source_digest(&self, source: &str) -> Option<String> {
        self.read_state().hashes.get(source).cloned()
    }

    /// Visit every recorded `(source, digest)` in lexical source order.
    pub fn source_digests(&self, mut visit: impl FnMut(&str, &str)) {
        let state = self.read_state();
        for (source, digest) in &state.hashes {
            visit(source, digest);
        }
    }

    pub fn is_valid(&self) -> bool {
        self.read_state().valid
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    /// Registered name of the active config plugin.
    pub fn plugin_name(&self) -> &str {
        self.plugin.name()
    }
}
