//! Watch mode: keep the schedule live while config files change.
//!
//! The main config file and its `.d` overlay directory are watched. When a
//! debounced batch of events arrives, only the sources whose files changed
//! are re-read and pushed through [`Config::update`]; every other source
//! keeps its current packs and keys.

use crate::process_lock::acquire_ledger_guard;
use anyhow::{Context, Result};
use notify_debouncer_mini::notify::{RecursiveMode, Watcher};
use notify_debouncer_mini::{new_debouncer, DebounceEventResult};
use packsched_core::config::ConfigPlugin;
use packsched_core::plugins::{self, FilesystemConfigPlugin};
use packsched_core::{Config, Settings, SqliteStore};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

const SHUTDOWN_POLL: Duration = Duration::from_millis(200);

pub fn run(settings: &Settings, debounce_ms: u64) -> Result<()> {
    if settings.source.plugin != "filesystem" {
        anyhow::bail!(
            "watch requires the filesystem source (configured: {})",
            settings.source.plugin
        );
    }

    // Source names are file paths; watcher events report absolute ones.
    let mut settings = settings.clone();
    let config_path = std::path::absolute(settings.source.config_path())
        .context("failed to resolve config path")?;
    settings.source.path = Some(config_path.clone());

    let ledger_path = Settings::ledger_path();
    let _ledger_guard = acquire_ledger_guard(&ledger_path).context("failed to acquire ledger lock")?;

    tracing::info!(path = %ledger_path.display(), "Opening ledger");
    let store = SqliteStore::open(&ledger_path).context("failed to open ledger")?;
    store.migrate().context("failed to run ledger migrations")?;

    let registry = plugins::config_plugin_registry(&settings.source);
    let config = Config::from_settings(
        &settings,
        &registry,
        plugins::create_all_parsers(),
        Arc::new(store),
    )
    .context("failed to build config")?;

    if let Some(failed) = config.failed_query() {
        println!(
            "Previous run stopped during query {} ({} failure(s) recorded)",
            failed,
            config.blacklist_count(&failed)
        );
    }

    match config.load() {
        Ok(()) => print_state(&config, "Loaded"),
        // Keep watching: the next file change gets another chance.
        Err(e) => {
            tracing::error!(error = %e, "Initial config load failed");
            eprintln!("Initial load failed: {}", e);
        }
    }

    // Set up signal handler for graceful shutdown
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();

    ctrlc::set_handler(move || {
        eprintln!("\nShutting down...");
        r.store(false, Ordering::SeqCst);
    })
    .context("failed to set Ctrl+C handler")?;

    let reader = FilesystemConfigPlugin::new(config_path);
    let (tx, rx) = mpsc::channel::<DebounceEventResult>();
    let mut debouncer =
        new_debouncer(Duration::from_millis(debounce_ms), tx).context("failed to create file watcher")?;

    let watch_dir = reader
        .path()
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    debouncer
        .watcher()
        .watch(&watch_dir, RecursiveMode::NonRecursive)
        .with_context(|| format!("failed to watch {}", watch_dir.display()))?;

    let overlay_dir = reader.overlay_dir();
    if overlay_dir.is_dir() {
        debouncer
            .watcher()
            .watch(&overlay_dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("failed to watch {}", overlay_dir.display()))?;
    }

    println!(
        "Watching {} (debounce {}ms). Press Ctrl+C to stop.",
        reader.path().display(),
        debounce_ms
    );

    while running.load(Ordering::SeqCst) {
        let events = match rx.recv_timeout(SHUTDOWN_POLL) {
            Ok(Ok(events)) => events,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "File watcher error");
                continue;
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        let changed: BTreeSet<PathBuf> = events
            .into_iter()
            .map(|event| event.path)
            .filter(|path| is_config_file(&reader, path))
            .collect();
        if changed.is_empty() {
            continue;
        }

        match changed_sources(&reader, &changed) {
            Ok(update) if update.is_empty() => {
                tracing::info!(files = changed.len(), "Changed config files are gone; keeping their last content");
            }
            Ok(update) => {
                let count = update.len();
                match config.update(update) {
                    Ok(()) => print_state(&config, &format!("Updated {} source(s)", count)),
                    Err(e) => {
                        tracing::warn!(error = %e, "Config update rejected");
                        eprintln!("Update rejected: {}", e);
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to re-read config");
                eprintln!("Failed to re-read config: {}", e);
            }
        }
    }

    println!("Watch mode stopped.");
    tracing::info!("packsched watch mode stopped");

    Ok(())
}

/// The main file or a `*.conf` overlay.
fn is_config_file(reader: &FilesystemConfigPlugin, path: &Path) -> bool {
    if path == reader.path() {
        return true;
    }
    path.parent() == Some(reader.overlay_dir().as_path())
        && path.extension().is_some_and(|ext| ext == "conf")
}

/// Re-read every source and keep those whose file is in `changed`.
fn changed_sources(
    reader: &FilesystemConfigPlugin,
    changed: &BTreeSet<PathBuf>,
) -> packsched_core::Result<BTreeMap<String, String>> {
    let wanted: BTreeSet<String> = changed
        .iter()
        .map(|path| path.to_string_lossy().to_string())
        .collect();

    Ok(reader
        .gen_config()?
        .into_iter()
        .filter(|(source, _)| wanted.contains(source))
        .collect())
}

fn print_state(config: &Config, action: &str) {
    let mut packs = 0;
    config.packs(|_| packs += 1);
    let mut queries = 0;
    config.scheduled_queries(|_, _| queries += 1);
    let digest = config.digest().unwrap_or_default();
    let short = digest.get(..12).unwrap_or(&digest);

    let timestamp = chrono::Local::now().format("%H:%M:%S");
    println!(
        "[{}] {}: {} pack(s), {} queries, digest {}",
        timestamp, action, packs, queries, short
    );
    tracing::info!(packs, queries, digest = %digest, "{}", action);
}
