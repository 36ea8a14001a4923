//! Options parser
//!
//! Observes the `options` key: a flat-or-nested object of agent options.
//! Anything other than an object is rejected.

use crate::config::ConfigParserPlugin;
use crate::error::{Error, Result};
use serde_json::{json, Value};
use std::collections::BTreeMap;

const OPTIONS_KEY: &str = "options";

pub struct OptionsParser {
    data: Value,
}

impl OptionsParser {
    pub fn new() -> Self {
        Self {
            data: json!({ OPTIONS_KEY: {} }),
        }
    }

    /// Value of one option from the latest accepted snapshot.
    pub fn option(&self, name: &str) -> Option<&Value> {
        self.data.get(OPTIONS_KEY).and_then(|options| options.get(name))
    }
}

impl Default for OptionsParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigParserPlugin for OptionsParser {
    fn name(&self) -> &str {
        "options"
    }

    fn keys(&self) -> Vec<String> {
        vec![OPTIONS_KEY.to_string()]
    }

    fn update(&mut self, config: &BTreeMap<String, Value>) -> Result<()> {
        let Some(options) = config.get(OPTIONS_KEY) else {
            return Ok(());
        };
        if !options.is_object() {
            return Err(Error::ParserRejected {
                parser: self.name().to_string(),
                message: "options must be an object".to_string(),
            });
        }

        self.data = json!({ OPTIONS_KEY: options.clone() });
        tracing::debug!(count = options.as_object().map_or(0, |o| o.len()), "Options updated");
        Ok(())
    }

    fn data(&self) -> &Value {
        &self.data
    }
}
