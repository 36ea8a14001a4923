//! Config source plugin trait
//!
//! A [`ConfigPlugin`] is where raw configuration text comes from: files on
//! disk, a remote endpoint, a fixed map in tests. It returns content keyed
//! by source identifier and never interprets it.

use crate::error::{Error, Result};
use std::collections::BTreeMap;

/// Key/value request passed to [`ConfigPlugin::call`].
pub type PluginRequest = BTreeMap<String, String>;

/// Rows returned from [`ConfigPlugin::call`].
pub type PluginResponse = Vec<BTreeMap<String, String>>;

/// Action selecting [`ConfigPlugin::gen_config`].
pub const ACTION_GEN_CONFIG: &str = "genConfig";

/// Action selecting [`ConfigPlugin::gen_pack`].
pub const ACTION_GEN_PACK: &str = "genPack";

/// Trait implemented by every configuration source.
///
/// ## Example
///
/// ```rust,ignore
/// use packsched_core::config::ConfigPlugin;
///
/// struct Static;
///
/// impl ConfigPlugin for Static {
///     fn name(&self) -> &str { "static" }
///
///     fn gen_config(&self) -> Result<BTreeMap<String, String>> {
///         Ok(BTreeMap::from([("static".into(), r#"{"options":{}}"#.into())]))
///     }
/// }
/// ```
pub trait ConfigPlugin: Send + Sync {
    /// Registered name of this plugin.
    fn name(&self) -> &str;

    /// Retrieve content for every source this plugin knows about.
    ///
    /// An `Err` aborts the whole load cycle; nothing from a failing call is
    /// merged.
    fn gen_config(&self) -> Result<BTreeMap<String, String>>;

    /// Resolve a pack reference (`"packs": {"name": "<value>"}`) into pack
    /// JSON.
    ///
    /// The default refuses with [`Error::PackIndirectionUnsupported`]; the
    /// coordinator skips the pack rather than failing the load.
    fn gen_pack(&self, _name: &str, _value: &str) -> Result<String> {
        Err(Error::PackIndirectionUnsupported)
    }

    /// Request/response entrypoint keyed by `action`.
    ///
    /// - `genConfig`: one row of source -> content
    /// - `genPack` (requires `name` and `value`): one row with `name` and `pack`
    fn call(&self, request: &PluginRequest) -> Result<PluginResponse> {
        match request.get("action").map(String::as_str) {
            Some(ACTION_GEN_CONFIG) => Ok(vec![self.gen_config()?]),
            Some(ACTION_GEN_PACK) => {
                let name = request
                    .get("name")
                    .ok_or_else(|| Error::Request("genPack requires a name".to_string()))?;
                let value = request
                    .get("value")
                    .ok_or_else(|| Error::Request("genPack requires a value".to_string()))?;
                let pack = self.gen_pack(name, value)?;

                let mut row = BTreeMap::new();
                row.insert("name".to_string(), name.clone());
                row.insert("pack".to_string(), pack);
                Ok(vec![row])
            }
            Some(other) => Err(Error::Request(format!("unknown action: {}", other))),
            None => Err(Error::Request("missing action".to_string())),
        }
    }
}
