//! Built-in plugins
//!
//! ## Config sources
//!
//! | Name | Type | Notes |
//! |------|------|-------|
//! | `filesystem` | [`FilesystemConfigPlugin`] | main document plus `*.conf` overlays |
//! | `memory` | [`MemoryConfigPlugin`] | fixed map, for embedding and tests |
//!
//! ## Config parsers
//!
//! | Name | Type | Keys |
//! |------|------|------|
//! | `options` | [`OptionsParser`] | `options` |
//! | `events` | [`EventsParser`] | `events` |

mod events;
mod filesystem;
mod memory;
mod options;

pub use events::EventsParser;
pub use filesystem::FilesystemConfigPlugin;
pub use memory::MemoryConfigPlugin;
pub use options::OptionsParser;

use crate::config::{ConfigParserPlugin, ConfigPlugin};
use crate::registry::PluginRegistry;
use crate::settings::SourceSettings;

/// Registry of config sources, wired from source settings.
pub fn config_plugin_registry(settings: &SourceSettings) -> PluginRegistry<dyn ConfigPlugin> {
    let mut registry: PluginRegistry<dyn ConfigPlugin> = PluginRegistry::new("config");

    let path = settings.config_path();
    registry.register("filesystem", move || {
        Box::new(FilesystemConfigPlugin::new(path.clone())) as Box<dyn ConfigPlugin>
    });
    registry.register("memory", || {
        Box::new(MemoryConfigPlugin::new()) as Box<dyn ConfigPlugin>
    });

    registry
}

/// Registry of config parsers.
pub fn parser_registry() -> PluginRegistry<dyn ConfigParserPlugin> {
    let mut registry: PluginRegistry<dyn ConfigParserPlugin> = PluginRegistry::new("config_parser");
    registry.register("options", || {
        Box::new(OptionsParser::new()) as Box<dyn ConfigParserPlugin>
    });
    registry.register("events", || {
        Box::new(EventsParser::new()) as Box<dyn ConfigParserPlugin>
    });
    registry
}

/// Create one instance of every built-in parser.
pub fn create_all_parsers() -> Vec<Box<dyn ConfigParserPlugin>> {
    let registry = parser_registry();
    let parsers = registry
        .names()
        .into_iter()
        .filter_map(|name| registry.create(name).ok())
        .collect();
    parsers
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_config_registry() {
        let settings = SourceSettings {
            path: Some(PathBuf::from("/etc/packsched/packsched.conf")),
            ..Default::default()
        };
        let registry = config_plugin_registry(&settings);

        assert_eq!(registry.names(), vec!["filesystem", "memory"]);
        assert_eq!(registry.create("filesystem").unwrap().name(), "filesystem");
        assert!(registry.create("tls").is_err());
    }

    #[test]
    fn test_create_all_parsers() {
        let parsers = create_all_parsers();
        let names: Vec<_> = parsers.iter().map(|p| p.name()).collect();
        assert_eq!(names, vec!["events", "options"]);
    }
}
