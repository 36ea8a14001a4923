//! Daemon settings loading and management
//!
//! Settings are loaded from `~/.config/packsched/settings.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/packsched/` (~/.config/packsched/)
//! - Data: `$XDG_DATA_HOME/packsched/` (~/.local/share/packsched/)
//! - State/Logs: `$XDG_STATE_HOME/packsched/` (~/.local/state/packsched/)

use crate::error::{Error, Result};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// File name prefix of the rotating log.
pub const LOG_FILE_PREFIX: &str = "packsched";

/// File name suffix of the rotating log.
pub const LOG_FILE_SUFFIX: &str = "log";

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main settings struct
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Settings {
    /// Where configuration content comes from
    #[serde(default)]
    pub source: SourceSettings,

    /// Schedule health settings
    #[serde(default)]
    pub schedule: ScheduleSettings,

    /// Host fact overrides
    #[serde(default)]
    pub host: HostSettings,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Config source settings
#[derive(Debug, Deserialize, Clone)]
pub struct SourceSettings {
    /// Registered name of the active config plugin
    #[serde(default = "default_source_plugin")]
    pub plugin: String,

    /// Main config document for the filesystem plugin
    pub path: Option<PathBuf>,

    /// Retrieval budget in milliseconds
    #[serde(default = "default_retrieval_timeout")]
    pub timeout_ms: u64,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            plugin: default_source_plugin(),
            path: None,
            timeout_ms: default_retrieval_timeout(),
        }
    }
}

impl SourceSettings {
    /// Config document path, falling back to `$XDG_CONFIG_HOME/packsched/packsched.conf`
    pub fn config_path(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| Settings::config_dir().join("packsched.conf"))
    }
}

fn default_source_plugin() -> String {
    "filesystem".to_string()
}

fn default_retrieval_timeout() -> u64 {
    30_000
}

/// Schedule health settings
#[derive(Debug, Deserialize, Clone)]
pub struct ScheduleSettings {
    /// Crash count at which a query should no longer be scheduled
    #[serde(default = "default_blacklist_threshold")]
    pub blacklist_threshold: u64,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            blacklist_threshold: default_blacklist_threshold(),
        }
    }
}

fn default_blacklist_threshold() -> u64 {
    3
}

/// Overrides for detected host facts
#[derive(Debug, Deserialize, Default, Clone)]
pub struct HostSettings {
    /// Platform name to report instead of the build target OS
    pub platform: Option<String>,
    /// Agent version to report instead of the crate version
    pub version: Option<String>,
    /// Packs that never run on this host
    #[serde(default)]
    pub disabled_packs: Vec<String>,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl Settings {
    /// Load settings from the default path
    pub fn load() -> Result<Self> {
        let settings_path = Self::settings_path();

        if !settings_path.exists() {
            tracing::info!("No settings file found at {:?}, using defaults", settings_path);
            return Ok(Settings::default());
        }

        Self::load_from(&settings_path)
    }

    /// Load settings from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read settings file {:?}: {}", path, e))
        })?;

        let settings: Settings = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse settings: {}", e)))?;

        settings.validate()?;
        Ok(settings)
    }

    /// Validate settings, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.source.plugin.trim().is_empty() {
            return Err(Error::Config("source.plugin must not be empty".to_string()));
        }
        if self.source.timeout_ms == 0 {
            return Err(Error::Config(
                "source.timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.schedule.blacklist_threshold == 0 {
            return Err(Error::Config(
                "schedule.blacklist_threshold must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the settings directory
    ///
    /// `$XDG_CONFIG_HOME/packsched/` (~/.config/packsched/)
    pub fn config_dir() -> PathBuf {
        xdg_config_home().join("packsched")
    }

    /// Returns the default settings file path
    ///
    /// `$XDG_CONFIG_HOME/packsched/settings.toml` (~/.config/packsched/settings.toml)
    pub fn settings_path() -> PathBuf {
        Self::config_dir().join("settings.toml")
    }

    /// Returns the data directory path (for the ledger database)
    ///
    /// `$XDG_DATA_HOME/packsched/` (~/.local/share/packsched/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("packsched")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/packsched/` (~/.local/state/packsched/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("packsched")
    }

    /// Returns the ledger database path
    ///
    /// `$XDG_DATA_HOME/packsched/ledger.db` (~/.local/share/packsched/ledger.db)
    pub fn ledger_path() -> PathBuf {
        Self::data_dir().join("ledger.db")
    }

    /// Returns today's log file path
    ///
    /// `$XDG_STATE_HOME/packsched/packsched.YYYY-MM-DD.log`. Files rotate daily
    /// on the UTC date.
    pub fn log_path() -> PathBuf {
        Self::log_path_for(Utc::now().date_naive())
    }

    /// Returns the log file written on `date`.
    pub fn log_path_for(date: NaiveDate) -> PathBuf {
        Self::state_dir().join(format!(
            "{}.{}.{}",
            LOG_FILE_PREFIX,
            date.format("%Y-%m-%d"),
            LOG_FILE_SUFFIX
        ))
    }

    /// Ensure XDG base directory environment variables are set.
    ///
    /// This is mainly for CLI binaries that want explicit, stable path behavior
    /// before invoking other components that read these env vars.
    pub fn ensure_xdg_env() {
        let home = home_dir();

        if std::env::var("XDG_DATA_HOME").is_err() {
            std::env::set_var("XDG_DATA_HOME", home.join(".local/share"));
        }

        if std::env::var("XDG_STATE_HOME").is_err() {
            std::env::set_var("XDG_STATE_HOME", home.join(".local/state"));
        }

        if std::env::var("XDG_CONFIG_HOME").is_err() {
            std::env::set_var("XDG_CONFIG_HOME", home.join(".config"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.source.plugin, "filesystem");
        assert_eq!(settings.source.timeout_ms, 30_000);
        assert_eq!(settings.schedule.blacklist_threshold, 3);
        assert!(settings.host.platform.is_none());
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_parse_settings() {
        let toml = r#"
[source]
plugin = "memory"
path = "/etc/packsched/packsched.conf"
timeout_ms = 500

[schedule]
blacklist_threshold = 5

[host]
platform = "linux"
version = "2.1.0"
disabled_packs = ["noisy"]

[logging]
level = "debug"
"#;
        let settings: Settings = toml::from_str(toml).unwrap();

        assert_eq!(settings.source.plugin, "memory");
        assert_eq!(
            settings.source.config_path(),
            PathBuf::from("/etc/packsched/packsched.conf")
        );
        assert_eq!(settings.source.timeout_ms, 500);
        assert_eq!(settings.schedule.blacklist_threshold, 5);
        assert_eq!(settings.host.platform.as_deref(), Some("linux"));
        assert_eq!(settings.host.disabled_packs, vec!["noisy".to_string()]);
        assert_eq!(settings.logging.level, "debug");
    }

    #[test]
    fn test_settings_validation() {
        let mut settings = Settings::default();
        settings.source.timeout_ms = 0;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.schedule.blacklist_threshold = 0;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.source.plugin = "  ".to_string();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, "[schedule]\nblacklist_threshold = 7\n").unwrap();

        let settings = Settings::load_from(&path).unwrap();
        assert_eq!(settings.schedule.blacklist_threshold, 7);
        assert_eq!(settings.source.plugin, "filesystem");

        std::fs::write(&path, "[schedule\n").unwrap();
        assert!(matches!(Settings::load_from(&path), Err(Error::Config(_))));
    }
}
