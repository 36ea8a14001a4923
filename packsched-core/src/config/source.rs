//! Per-source staging
//!
//! One source's content is parsed and split into packs, file categories and
//! parser-facing keys before any shared state is touched. The coordinator
//! applies a staged source in one step or not at all.

use super::plugin::ConfigPlugin;
use crate::digest::digest_content;
use crate::error::{Error, Result};
use crate::pack::{Pack, MAIN_PACK};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

pub(crate) const PACKS_KEY: &str = "packs";
pub(crate) const FILE_PATHS_KEY: &str = "file_paths";
pub(crate) const SCHEDULE_KEY: &str = "schedule";

/// Everything one source contributes to the merged state.
#[derive(Debug)]
pub(crate) struct StagedSource {
    pub source: String,
    pub digest: String,
    pub packs: Vec<Pack>,
    pub files: BTreeMap<String, Vec<String>>,
    pub document: Map<String, Value>,
}

/// Parse and split one source's raw content.
///
/// Fails only when the content is not a JSON object; problems inside
/// `packs`, `schedule` or `file_paths` drop the offending entry and keep
/// the rest.
pub(crate) fn stage_source(
    plugin: &dyn ConfigPlugin,
    source: &str,
    content: &str,
) -> Result<StagedSource> {
    let digest = digest_content(content);

    let parsed: Value = serde_json::from_str(content).map_err(|e| Error::Parse {
        source_name: source.to_string(),
        message: e.to_string(),
    })?;
    let Value::Object(mut document) = parsed else {
        return Err(Error::Parse {
            source_name: source.to_string(),
            message: "top level must be an object".to_string(),
        });
    };

    let mut packs = Vec::new();
    if let Some(value) = document.remove(PACKS_KEY) {
        match value {
            Value::Object(entries) => {
                for (name, entry) in entries {
                    if let Some(pack) = stage_pack(plugin, source, &name, &entry) {
                        packs.push(pack);
                    }
                }
            }
            _ => tracing::warn!(source, "Ignoring packs: expected an object"),
        }
    }

    if let Some(schedule) = document.remove(SCHEDULE_KEY) {
        match Pack::from_schedule(source, &schedule) {
            Ok(pack) => {
                if let Some(index) = packs.iter().position(|p| p.name() == MAIN_PACK) {
                    tracing::warn!(
                        source,
                        pack = MAIN_PACK,
                        "Top-level schedule replaces the pack of the same name"
                    );
                    packs.remove(index);
                }
                packs.push(pack);
            }
            Err(e) => tracing::warn!(source, error = %e, "Ignoring schedule"),
        }
    }

    let files = document
        .remove(FILE_PATHS_KEY)
        .map(|value| stage_files(source, value))
        .unwrap_or_default();

    tracing::debug!(
        source,
        packs = packs.len(),
        categories = files.len(),
        keys = document.len(),
        "Staged config source"
    );

    Ok(StagedSource {
        source: source.to_string(),
        digest,
        packs,
        files,
        document,
    })
}

fn stage_pack(plugin: &dyn ConfigPlugin, source: &str, name: &str, entry: &Value) -> Option<Pack> {
    let resolved;
    let content = match entry {
        Value::Object(_) => entry,
        Value::String(reference) => match resolve_pack(plugin, name, reference) {
            Ok(value) => {
                resolved = value;
                &resolved
            }
            Err(Error::PackIndirectionUnsupported) => {
                tracing::warn!(
                    source,
                    pack = name,
                    plugin = plugin.name(),
                    "Skipping pack reference: plugin does not resolve packs"
                );
                return None;
            }
            Err(e) => {
                tracing::warn!(source, pack = name, error = %e, "Skipping unresolved pack");
                return None;
            }
        },
        _ => {
            tracing::warn!(source, pack = name, "Skipping pack: expected an object or a reference");
            return None;
        }
    };

    match Pack::from_value(name, source, content) {
        Ok(pack) => Some(pack),
        Err(e) => {
            tracing::warn!(source, pack = name, error = %e, "Skipping invalid pack");
            None
        }
    }
}

fn resolve_pack(plugin: &dyn ConfigPlugin, name: &str, reference: &str) -> Result<Value> {
    let content = plugin.gen_pack(name, reference)?;
    serde_json::from_str(&content).map_err(|e| Error::Pack {
        name: name.to_string(),
        message: format!("resolved content is not JSON: {}", e),
    })
}

fn stage_files(source: &str, value: Value) -> BTreeMap<String, Vec<String>> {
    let Value::Object(categories) = value else {
        tracing::warn!(source, "Ignoring file_paths: expected an object");
        return BTreeMap::new();
    };

    let mut files = BTreeMap::new();
    for (category, patterns) in categories {
        let patterns: Vec<String> = match patterns {
            Value::Array(items) => items
                .into_iter()
                .filter_map(|item| match item {
                    Value::String(pattern) => Some(pattern),
                    other => {
                        tracing::warn!(source, category = %category, value = %other, "Ignoring non-string file path");
                        None
                    }
                })
                .collect(),
            Value::String(pattern) => vec![pattern],
            _ => {
                tracing::warn!(source, category = %category, "Ignoring file category: expected a list");
                continue;
            }
        };
        files.insert(category, patterns);
    }
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Resolver;

    impl ConfigPlugin for Resolver {
        fn name(&self) -> &str {
            "resolver"
        }

        fn gen_config(&self) -> Result<BTreeMap<String, String>> {
            Ok(BTreeMap::new())
        }

        fn gen_pack(&self, name: &str, value: &str) -> Result<String> {
            match value {
                "good" => {
                    let mut queries = Map::new();
                    queries.insert(name.to_string(), json!({"query": "select 1", "interval": 5}));
                    Ok(json!({ "queries": queries }).to_string())
                }
                "garbage" => Ok("not json".to_string()),
                _ => Err(Error::Retrieval(format!("no pack at {}", value))),
            }
        }
    }

    struct NoPacks;

    impl ConfigPlugin for NoPacks {
        fn name(&self) -> &str {
            "nopacks"
        }

        fn gen_config(&self) -> Result<BTreeMap<String, String>> {
            Ok(BTreeMap::new())
        }
    }

    #[test]
    fn test_stage_splits_document() {
        let content = json!({
            "schedule": {"uptime": {"query": "select * from uptime", "interval": 10}},
            "packs": {"inline": {"queries": {"q": {"query": "select 1", "interval": 1}}}},
            "file_paths": {"etc": ["/etc/%%"], "tmp": "/tmp/%"},
            "options": {"verbose": true}
        })
        .to_string();

        let staged = stage_source(&NoPacks, "s1", &content).unwrap();
        assert_eq!(staged.source, "s1");
        assert_eq!(staged.digest, digest_content(&content));
        assert_eq!(staged.packs.len(), 2);
        assert!(staged.packs.iter().any(|p| p.name() == MAIN_PACK));
        assert_eq!(staged.files["etc"], vec!["/etc/%%".to_string()]);
        assert_eq!(staged.files["tmp"], vec!["/tmp/%".to_string()]);
        assert_eq!(staged.document.len(), 1);
        assert!(staged.document.contains_key("options"));
    }

    #[test]
    fn test_stage_rejects_invalid_content() {
        match stage_source(&NoPacks, "s1", "{not json") {
            Err(Error::Parse { source_name, message }) => {
                assert_eq!(source_name, "s1");
                assert!(!message.is_empty());
            }
            other => panic!("expected a parse error, got {:?}", other.map(|s| s.source)),
        }
        assert!(matches!(
            stage_source(&NoPacks, "s1", "[1, 2]"),
            Err(Error::Parse { .. })
        ));
    }

    #[test]
    fn test_pack_references_resolve_or_skip() {
        let content = json!({
            "packs": {
                "resolved": "good",
                "missing": "elsewhere",
                "garbage": "garbage",
                "numeric": 42
            }
        })
        .to_string();

        let staged = stage_source(&Resolver, "s1", &content).unwrap();
        assert_eq!(staged.packs.len(), 1);
        assert_eq!(staged.packs[0].name(), "resolved");
        assert_eq!(staged.packs[0].queries()[0].name, "resolved");

        let staged = stage_source(&NoPacks, "s1", &content).unwrap();
        assert!(staged.packs.is_empty());
    }

    #[test]
    fn test_schedule_wins_over_main_pack() {
        let content = json!({
            "packs": {
                "main": {"queries": {"from_pack": {"query": "select 1", "interval": 1}}},
                "other": {"queries": {}}
            },
            "schedule": {"from_schedule": {"query": "select 2", "interval": 2}}
        })
        .to_string();

        let staged = stage_source(&NoPacks, "s1", &content).unwrap();
        let main: Vec<_> = staged
            .packs
            .iter()
            .filter(|p| p.name() == MAIN_PACK)
            .collect();
        assert_eq!(main.len(), 1);
        let queries: Vec<_> = main[0].queries().iter().map(|q| q.name.as_str()).collect();
        assert_eq!(queries, vec!["from_schedule"]);
        assert_eq!(staged.packs.len(), 2);
    }
}
