//! # packsched-core
//!
//! Configuration and schedule engine for a host-monitoring agent.
//!
//! This library provides:
//! - Pluggable config sources and key-scoped config parsers
//! - A deterministic multi-source merge
//! - The live pack schedule, filtered by host facts
//! - A crash and performance ledger that survives restarts
//! - Settings and logging infrastructure
//!
//! ## Architecture
//!
//! - **Sources:** [`ConfigPlugin`] implementations return raw content per source
//! - **Coordinator:** [`Config`] stages, digests and merges that content
//! - **Schedule:** [`Schedule`] holds [`Pack`]s; only applicable ones are visited
//! - **Ledger:** [`LedgerStore`] persists dirty markers, blacklist and performance
//!
//! ## Example
//!
//! ```rust,no_run
//! use packsched_core::{plugins, Config, Settings, SqliteStore};
//! use std::sync::Arc;
//!
//! let settings = Settings::load().expect("failed to load settings");
//!
//! let store = SqliteStore::open(&Settings::ledger_path()).expect("failed to open ledger");
//! store.migrate().expect("failed to run migrations");
//!
//! let config = Config::from_settings(
//!     &settings,
//!     &plugins::config_plugin_registry(&settings.source),
//!     plugins::create_all_parsers(),
//!     Arc::new(store),
//! )
//! .expect("failed to build config");
//! config.load().expect("failed to load config");
//! ```

// Re-export commonly used items at the crate root
pub use config::{Config, ConfigParserPlugin, ConfigPlugin};
pub use error::{Error, Result};
pub use pack::{HostFacts, Pack, ScheduledQuery};
pub use performance::{QueryPerformance, ResourceSample};
pub use registry::PluginRegistry;
pub use schedule::Schedule;
pub use settings::Settings;
pub use store::{LedgerStore, MemoryStore, SqliteStore};

// Public modules
pub mod config;
pub mod digest;
pub mod error;
pub mod logging;
pub mod merge;
pub mod pack;
pub mod performance;
pub mod plugins;
pub mod registry;
pub mod schedule;
pub mod settings;
pub mod store;
