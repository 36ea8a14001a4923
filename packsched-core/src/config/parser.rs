//! Config parser plugin trait
//!
//! A [`ConfigParserPlugin`] claims a few top-level keys of the merged
//! configuration and receives their merged values on every load or update.
//! A parser that rejects an update is switched off for the rest of the
//! process; the coordinator keeps loading without it.

use crate::error::Result;
use serde_json::Value;
use std::collections::BTreeMap;

pub trait ConfigParserPlugin: Send + Sync {
    /// Registered name of this parser.
    fn name(&self) -> &str;

    /// Top-level keys this parser wants to observe.
    fn keys(&self) -> Vec<String>;

    /// Receive the merged values of the requested keys that are present.
    ///
    /// Only called when at least one requested key is present.
    fn update(&mut self, config: &BTreeMap<String, Value>) -> Result<()>;

    /// Latest accepted snapshot.
    fn data(&self) -> &Value;
}
