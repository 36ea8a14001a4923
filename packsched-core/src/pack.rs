//! Packs and scheduled queries
//!
//! A [`Pack`] is a named bundle of [`ScheduledQuery`] definitions contributed
//! by one config source. Identity is the pair `(name, source)`; the same pack
//! name may appear once per source.
//!
//! Whether a pack runs is never stored. It is evaluated against [`HostFacts`]
//! each time the schedule is walked, so a change in host facts is reflected
//! on the next pass without touching the schedule.

use crate::error::{Error, Result};
use crate::settings::HostSettings;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

/// Pack name given to a source's top-level `schedule` key.
pub const MAIN_PACK: &str = "main";

// ============================================
// Host facts
// ============================================

/// Facts about the running host used to gate packs and queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostFacts {
    /// Normalized platform name (`linux`, `darwin`, `windows`, `freebsd`, ...)
    pub platform: String,
    /// Agent version compared against pack minimum versions
    pub version: String,
    /// Pack names switched off on this host
    pub disabled_packs: BTreeSet<String>,
}

impl HostFacts {
    pub fn new(platform: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            platform: normalize_platform(&platform.into()),
            version: version.into(),
            disabled_packs: BTreeSet::new(),
        }
    }

    /// Facts for the current build target and crate version.
    pub fn detect() -> Self {
        Self::new(std::env::consts::OS, env!("CARGO_PKG_VERSION"))
    }

    /// Detected facts with any overrides from settings applied.
    pub fn from_settings(settings: &HostSettings) -> Self {
        let detected = Self::detect();
        let mut facts = Self::new(
            settings.platform.clone().unwrap_or(detected.platform),
            settings.version.clone().unwrap_or(detected.version),
        );
        facts.disabled_packs = settings.disabled_packs.iter().cloned().collect();
        facts
    }

    fn is_windows(&self) -> bool {
        self.platform == "windows"
    }

    /// Whether a platform constraint admits this host.
    ///
    /// Empty, `all` and `any` admit every host, `posix` admits everything but
    /// Windows, anything else is a comma-separated list of platform names.
    pub fn matches_platform(&self, constraint: &str) -> bool {
        let constraint = constraint.trim();
        if constraint.is_empty() {
            return true;
        }

        constraint
            .split(',')
            .map(|p| normalize_platform(p.trim()))
            .any(|p| match p.as_str() {
                "all" | "any" => true,
                "posix" => !self.is_windows(),
                other => other == self.platform,
            })
    }

    /// Whether this host's version is at least `minimum`.
    pub fn meets_version(&self, minimum: &str) -> bool {
        let minimum = minimum.trim();
        minimum.is_empty() || compare_versions(&self.version, minimum) != Ordering::Less
    }
}

fn normalize_platform(platform: &str) -> String {
    match platform.to_ascii_lowercase().as_str() {
        "macos" | "osx" | "darwin" => "darwin".to_string(),
        other => other.to_string(),
    }
}

/// Compare dotted versions numerically; missing components count as zero.
fn compare_versions(left: &str, right: &str) -> Ordering {
    let parse = |v: &str| -> Vec<u64> {
        v.split('.')
            .map(|part| {
                let digits: String = part.chars().take_while(|c| c.is_ascii_digit()).collect();
                digits.parse().unwrap_or(0)
            })
            .collect()
    };

    let (l, r) = (parse(left), parse(right));
    let len = l.len().max(r.len());
    for i in 0..len {
        let a = l.get(i).copied().unwrap_or(0);
        let b = r.get(i).copied().unwrap_or(0);
        match a.cmp(&b) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

// ============================================
// Scheduled query
// ============================================

fn default_removed() -> bool {
    true
}

/// One query definition inside a pack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledQuery {
    /// Name within its pack (the key under `queries`)
    #[serde(skip)]
    pub name: String,
    /// Query text
    pub query: String,
    /// Seconds between runs
    pub interval: u64,
    /// Report full result sets instead of differentials
    #[serde(default)]
    pub snapshot: bool,
    /// Report removed rows in differential results
    #[serde(default = "default_removed")]
    pub removed: bool,
    /// Per-query platform constraint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    /// Per-query minimum version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Any other options, kept verbatim
    #[serde(flatten)]
    pub options: BTreeMap<String, Value>,
}

impl ScheduledQuery {
    pub fn new(name: impl Into<String>, query: impl Into<String>, interval: u64) -> Self {
        Self {
            name: name.into(),
            query: query.into(),
            interval,
            snapshot: false,
            removed: true,
            platform: None,
            version: None,
            options: BTreeMap::new(),
        }
    }

    /// Parse a query definition, rejecting a zero interval.
    pub fn from_value(name: &str, value: &Value) -> Result<Self> {
        let mut query: ScheduledQuery =
            serde_json::from_value(value.clone()).map_err(|e| Error::Pack {
                name: name.to_string(),
                message: format!("query {}: {}", name, e),
            })?;
        if query.interval == 0 {
            return Err(Error::Pack {
                name: name.to_string(),
                message: format!("query {} has a zero interval", name),
            });
        }
        query.name = name.to_string();
        Ok(query)
    }

    /// Whether the per-query platform/version options admit this host.
    pub fn applies_to(&self, facts: &HostFacts) -> bool {
        self.platform
            .as_deref()
            .map_or(true, |p| facts.matches_platform(p))
            && self
                .version
                .as_deref()
                .map_or(true, |v| facts.meets_version(v))
    }
}

// ============================================
// Pack
// ============================================

#[derive(Debug, Default, Deserialize)]
struct PackDocument {
    #[serde(default)]
    platform: String,
    #[serde(default)]
    version: String,
    #[serde(default)]
    queries: serde_json::Map<String, Value>,
}

/// A named, sourced bundle of scheduled queries.
#[derive(Debug, Clone, PartialEq)]
pub struct Pack {
    name: String,
    source: String,
    platform: String,
    version: String,
    queries: Vec<ScheduledQuery>,
}

impl Pack {
    /// An empty pack with no platform or version constraint.
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            platform: String::new(),
            version: String::new(),
            queries: Vec::new(),
        }
    }

    /// Parse pack content (`{"platform", "version", "queries"}`).
    ///
    /// Individual malformed queries are skipped with a warning; a value that
    /// is not a pack object is an error.
    pub fn from_value(name: &str, source: &str, value: &Value) -> Result<Self> {
        if !value.is_object() {
            return Err(Error::Pack {
                name: name.to_string(),
                message: "pack content must be an object".to_string(),
            });
        }
        let document: PackDocument =
            serde_json::from_value(value.clone()).map_err(|e| Error::Pack {
                name: name.to_string(),
                message: e.to_string(),
            })?;

        let mut pack = Self::new(name, source);
        pack.platform = document.platform;
        pack.version = document.version;
        pack.queries = parse_queries(name, source, &document.queries);
        Ok(pack)
    }

    /// Build the `main` pack from a source's top-level `schedule` object.
    pub fn from_schedule(source: &str, schedule: &Value) -> Result<Self> {
        let queries = schedule.as_object().ok_or_else(|| Error::Pack {
            name: MAIN_PACK.to_string(),
            message: "schedule must be an object".to_string(),
        })?;

        let mut pack = Self::new(MAIN_PACK, source);
        pack.queries = parse_queries(MAIN_PACK, source, queries);
        Ok(pack)
    }

    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = platform.into();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_query(mut self, query: ScheduledQuery) -> Self {
        self.queries.push(query);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn platform(&self) -> &str {
        &self.platform
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn queries(&self) -> &[ScheduledQuery] {
        &self.queries
    }

    /// Whether the pack should run on a host with these facts.
    pub fn should_execute(&self, facts: &HostFacts) -> bool {
        !facts.disabled_packs.contains(&self.name)
            && facts.matches_platform(&self.platform)
            && facts.meets_version(&self.version)
    }

    /// Schedule-wide name of one of this pack's queries.
    ///
    /// Queries of the `main` pack keep their own name; all others are
    /// namespaced as `pack_<pack>_<query>`.
    pub fn qualified_name(&self, query: &ScheduledQuery) -> String {
        if self.name == MAIN_PACK {
            query.name.clone()
        } else {
            format!("pack_{}_{}", self.name, query.name)
        }
    }
}

fn parse_queries(
    pack: &str,
    source: &str,
    queries: &serde_json::Map<String, Value>,
) -> Vec<ScheduledQuery> {
    queries
        .iter()
        .filter_map(|(name, value)| match ScheduledQuery::from_value(name, value) {
            Ok(query) => Some(query),
            Err(e) => {
                tracing::warn!(pack, source, query = %name, error = %e, "Skipping malformed query");
                None
            }
        })
        .collect()
}
