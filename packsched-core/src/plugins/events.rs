//! Events parser
//!
//! Observes the `events` key. The only setting read today is
//! `disable_publishers`, a list of event publisher names to keep off.

use crate::config::ConfigParserPlugin;
use crate::error::{Error, Result};
use serde_json::{json, Value};
use std::collections::BTreeMap;

const EVENTS_KEY: &str = "events";

pub struct EventsParser {
    data: Value,
    disabled: Vec<String>,
}

impl EventsParser {
    pub fn new() -> Self {
        Self {
            data: json!({ EVENTS_KEY: {} }),
            disabled: Vec::new(),
        }
    }

    pub fn disabled_publishers(&self) -> &[String] {
        &self.disabled
    }

    pub fn is_disabled(&self, publisher: &str) -> bool {
        self.disabled.iter().any(|p| p == publisher)
    }

    fn reject(&self, message: &str) -> Error {
        Error::ParserRejected {
            parser: self.name().to_string(),
            message: message.to_string(),
        }
    }
}

impl Default for EventsParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigParserPlugin for EventsParser {
    fn name(&self) -> &str {
        "events"
    }

    fn keys(&self) -> Vec<String> {
        vec![EVENTS_KEY.to_string()]
    }

    fn update(&mut self, config: &BTreeMap<String, Value>) -> Result<()> {
        let Some(events) = config.get(EVENTS_KEY) else {
            return Ok(());
        };
        let Some(settings) = events.as_object() else {
            return Err(self.reject("events must be an object"));
        };

        let disabled = match settings.get("disable_publishers") {
            None => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect(),
            Some(_) => return Err(self.reject("disable_publishers must be a list")),
        };

        self.disabled = disabled;
        self.data = json!({ EVENTS_KEY: events.clone() });
        Ok(())
    }

    fn data(&self) -> &Value {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(events: Value) -> BTreeMap<String, Value> {
        let mut config = BTreeMap::new();
        config.insert("events".to_string(), events);
        config
    }

    #[test]
    fn test_disabled_publishers() {
        let mut parser = EventsParser::new();
        parser
            .update(&config(json!({"disable_publishers": ["inotify", "udev"]})))
            .unwrap();

        assert!(parser.is_disabled("udev"));
        assert!(!parser.is_disabled("syslog"));
        assert_eq!(parser.disabled_publishers().len(), 2);
    }

    #[test]
    fn test_rejects_malformed() {
        let mut parser = EventsParser::new();
        assert!(parser.update(&config(json!("off"))).is_err());
        assert!(parser
            .update(&config(json!({"disable_publishers": "udev"})))
            .is_err());
        assert!(parser.disabled_publishers().is_empty());
    }
}
