//! Filesystem config source
//!
//! Reads a main JSON document plus any `*.conf` overlays in a sibling
//! `<file name>.d/` directory. Each file is its own source, named by its
//! path, so overlays sort after the main document and win merge conflicts.
//!
//! Pack references (`"packs": {"name": "relative/or/absolute.json"}`) are
//! read from disk, relative to the main document's directory.

use crate::config::ConfigPlugin;
use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub struct FilesystemConfigPlugin {
    path: PathBuf,
}

impl FilesystemConfigPlugin {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Overlay directory: `<dir>/<file name>.d`
    pub fn overlay_dir(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".d");
        self.path.with_file_name(name)
    }

    fn base_dir(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("."))
    }

    fn read(path: &Path) -> Result<String> {
        std::fs::read_to_string(path)
            .map_err(|e| Error::Retrieval(format!("failed to read {}: {}", path.display(), e)))
    }
}

impl ConfigPlugin for FilesystemConfigPlugin {
    fn name(&self) -> &str {
        "filesystem"
    }

    fn gen_config(&self) -> Result<BTreeMap<String, String>> {
        if !self.path.is_file() {
            return Err(Error::Retrieval(format!(
                "config file does not exist: {}",
                self.path.display()
            )));
        }

        let mut config = BTreeMap::new();
        config.insert(
            self.path.to_string_lossy().to_string(),
            Self::read(&self.path)?,
        );

        let overlay_dir = self.overlay_dir();
        if overlay_dir.is_dir() {
            let pattern = overlay_dir.join("*.conf");
            let entries = glob::glob(&pattern.to_string_lossy())
                .map_err(|e| Error::Retrieval(format!("invalid overlay pattern: {}", e)))?;
            for entry in entries.flatten() {
                tracing::debug!(path = %entry.display(), "Reading config overlay");
                config.insert(entry.to_string_lossy().to_string(), Self::read(&entry)?);
            }
        }

        Ok(config)
    }

    fn gen_pack(&self, name: &str, value: &str) -> Result<String> {
        let reference = Path::new(value);
        let path = if reference.is_absolute() {
            reference.to_path_buf()
        } else {
            self.base_dir().join(reference)
        };

        tracing::debug!(pack = name, path = %path.display(), "Reading pack file");
        Self::read(&path)
    }
}
