//! Name -> factory plugin registries
//!
//! Registries are filled once at startup (see [`crate::plugins`]) and
//! consulted when settings name a plugin. A miss is a typed
//! [`Error::PluginNotFound`], never a panic.

use crate::error::{Error, Result};
use std::collections::BTreeMap;

type Factory<P> = Box<dyn Fn() -> Box<P> + Send + Sync>;

pub struct PluginRegistry<P: ?Sized> {
    kind: &'static str,
    factories: BTreeMap<String, Factory<P>>,
}

impl<P: ?Sized> PluginRegistry<P> {
    /// Empty registry; `kind` names the plugin family in errors and logs.
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            factories: BTreeMap::new(),
        }
    }

    /// Register a factory, replacing any previous one with the same name.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<P> + Send + Sync + 'static,
    {
        let name = name.into();
        tracing::debug!(kind = self.kind, plugin = %name, "Registered plugin factory");
        self.factories.insert(name, Box::new(factory));
    }

    /// Build a fresh instance of the named plugin.
    pub fn create(&self, name: &str) -> Result<Box<P>> {
        self.factories
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| Error::PluginNotFound {
                kind: self.kind,
                name: name.to_string(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered names in lexical order.
    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Greeter {
        fn greet(&self) -> String;
    }

    struct Hello;

    impl Greeter for Hello {
        fn greet(&self) -> String {
            "hello".to_string()
        }
    }

    #[test]
    fn test_create_registered() {
        let mut registry: PluginRegistry<dyn Greeter> = PluginRegistry::new("greeter");
        registry.register("hello", || Box::new(Hello) as Box<dyn Greeter>);

        assert!(registry.contains("hello"));
        assert_eq!(registry.names(), vec!["hello"]);
        assert_eq!(registry.create("hello").unwrap().greet(), "hello");
    }

    #[test]
    fn test_missing_plugin_is_typed_error() {
        let registry: PluginRegistry<dyn Greeter> = PluginRegistry::new("greeter");
        match registry.create("nope") {
            Err(Error::PluginNotFound { kind, name }) => {
                assert_eq!(kind, "greeter");
                assert_eq!(name, "nope");
            }
            _ => panic!("expected PluginNotFound"),
        }
    }
}
