//! In-memory config source
//!
//! Serves a fixed source map. Used for embedding and tests.

use crate::config::ConfigPlugin;
use crate::error::{Error, Result};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default)]
pub struct MemoryConfigPlugin {
    sources: BTreeMap<String, String>,
    packs: BTreeMap<String, String>,
}

impl MemoryConfigPlugin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `content` under source `source`.
    pub fn with_source(mut self, source: impl Into<String>, content: impl Into<String>) -> Self {
        self.sources.insert(source.into(), content.into());
        self
    }

    /// Resolve pack reference `reference` to `content`.
    pub fn with_pack(mut self, reference: impl Into<String>, content: impl Into<String>) -> Self {
        self.packs.insert(reference.into(), content.into());
        self
    }
}

impl ConfigPlugin for MemoryConfigPlugin {
    fn name(&self) -> &str {
        "memory"
    }

    fn gen_config(&self) -> Result<BTreeMap<String, String>> {
        Ok(self.sources.clone())
    }

    /// Without any registered packs this behaves like a plugin that does
    /// not support references at all.
    fn gen_pack(&self, name: &str, value: &str) -> Result<String> {
        if self.packs.is_empty() {
            return Err(Error::PackIndirectionUnsupported);
        }
        self.packs
            .get(value)
            .cloned()
            .ok_or_else(|| Error::Retrieval(format!("pack {} not found at {}", name, value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serves_sources_and_packs() {
        let plugin = MemoryConfigPlugin::new()
            .with_source("a", "{}")
            .with_pack("ref", r#"{"queries": {}}"#);

        assert_eq!(plugin.gen_config().unwrap()["a"], "{}");
        assert!(plugin.gen_pack("p", "ref").is_ok());
        assert!(matches!(plugin.gen_pack("p", "other"), Err(Error::Retrieval(_))));
        assert!(matches!(
            MemoryConfigPlugin::new().gen_pack("p", "ref"),
            Err(Error::PackIndirectionUnsupported)
        ));
    }
}
