//! Logging infrastructure for packsched
//!
//! Logs are written to `~/.local/state/packsched/packsched.YYYY-MM-DD.log`
//! following XDG standards, one file per UTC day.

use crate::error::Error;
use crate::settings::{LoggingConfig, Settings, LOG_FILE_PREFIX, LOG_FILE_SUFFIX};
use std::path::{Path, PathBuf};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Initialize the logging system
///
/// Sets up tracing with:
/// - File output to XDG state directory
/// - Daily rotation, keeping at most `max_files` files
/// - Configurable log level via settings or RUST_LOG env var
pub fn init(config: &LoggingConfig) -> crate::error::Result<LoggingGuard> {
    let log_dir = Settings::state_dir();

    std::fs::create_dir_all(&log_dir)?;

    let file_appender = file_appender(&log_dir, config.max_files)?;
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .init();

    tracing::info!(
        log_dir = %log_dir.display(),
        level = %config.level,
        max_files = config.max_files,
        "Logging initialized"
    );

    Ok(LoggingGuard { _guard: guard })
}

/// Daily appender whose file names match [`Settings::log_path_for`].
fn file_appender(log_dir: &Path, max_files: usize) -> crate::error::Result<RollingFileAppender> {
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .filename_suffix(LOG_FILE_SUFFIX)
        .max_log_files(max_files.max(1))
        .build(log_dir)
        .map_err(|e| Error::Config(format!("failed to create log appender: {}", e)))
}

/// Initialize logging for tests (logs to stdout)
pub fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .with_span_events(FmtSpan::CLOSE)
        .try_init();
}

/// Guard that keeps the logging system alive
///
/// When dropped, flushes any pending log writes.
pub struct LoggingGuard {
    _guard: tracing_appender::non_blocking::WorkerGuard,
}

/// Returns the path of today's log file
pub fn log_file_path() -> PathBuf {
    Settings::log_path()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_log_file_path() {
        let path = Settings::log_path_for(NaiveDate::from_ymd_opt(2026, 3, 7).unwrap());
        assert!(path.ends_with("packsched.2026-03-07.log"));

        let today = log_file_path();
        let name = today.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("packsched."));
        assert!(name.ends_with(".log"));
    }

    #[test]
    fn test_appender_writes_advertised_file() {
        let dir = TempDir::new().unwrap();
        let date = Utc::now().date_naive();

        let mut appender = file_appender(dir.path(), 3).unwrap();
        appender.write_all(b"hello\n").unwrap();
        appender.flush().unwrap();

        // The appender and the path helper agree unless the UTC day rolled over.
        if Utc::now().date_naive() == date {
            let expected = Settings::log_path_for(date);
            let written = dir.path().join(expected.file_name().unwrap());
            assert!(written.is_file(), "missing {}", written.display());
        }
    }
}
