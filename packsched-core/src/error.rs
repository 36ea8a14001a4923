//! Error types for packsched-core

use thiserror::Error;

/// Main error type for the packsched-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Ledger store error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Settings error
    #[error("configuration error: {0}")]
    Config(String),

    /// A config plugin failed to produce content
    #[error("config retrieval failed: {0}")]
    Retrieval(String),

    /// A config plugin exceeded the retrieval budget
    #[error("config retrieval exceeded timeout: {elapsed_ms}ms > {timeout_ms}ms")]
    Timeout { elapsed_ms: u64, timeout_ms: u64 },

    /// One source's content could not be parsed
    #[error("parse error in source {source_name}: {message}")]
    Parse {
        source_name: String,
        message: String,
    },

    /// Every source handed to a load cycle failed to parse
    #[error("no valid config source among {0} provided")]
    NoValidSource(usize),

    /// A pack definition was malformed
    #[error("invalid pack {name}: {message}")]
    Pack { name: String, message: String },

    /// The plugin does not resolve pack references
    #[error("config plugin does not support pack indirection")]
    PackIndirectionUnsupported,

    /// A parser rejected its merged data
    #[error("config parser {parser} rejected update: {message}")]
    ParserRejected { parser: String, message: String },

    /// Digest requested before any successful load
    #[error("config has not been loaded")]
    NotLoaded,

    /// Plugin registry lookup failed
    #[error("{kind} plugin not found: {name}")]
    PluginNotFound { kind: &'static str, name: String },

    /// Malformed plugin request
    #[error("invalid plugin request: {0}")]
    Request(String),
}

/// Result type alias for packsched-core
pub type Result<T> = std::result::Result<T, Error>;
