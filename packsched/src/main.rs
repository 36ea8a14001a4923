//! packsched - inspect and run the query pack schedule
//!
//! Loads configuration through the configured source plugin and reports on
//! the resulting schedule, digests and crash ledger. `watch` keeps the
//! schedule live while the config files change.
//!
//! Uses XDG Base Directory specification for file locations:
//! - Settings: $XDG_CONFIG_HOME/packsched/settings.toml (~/.config/packsched/settings.toml)
//! - Config: $XDG_CONFIG_HOME/packsched/packsched.conf unless `source.path` is set
//! - Ledger: $XDG_DATA_HOME/packsched/ledger.db (~/.local/share/packsched/ledger.db)
//! - Logs: $XDG_STATE_HOME/packsched/packsched.YYYY-MM-DD.log (one file per UTC day)

mod process_lock;
mod watch;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use packsched_core::store::DirtyQuery;
use packsched_core::{plugins, Config, LedgerStore, MemoryStore, Settings, SqliteStore};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "packsched")]
#[command(about = "Query pack schedule and configuration engine")]
#[command(version)]
struct Args {
    /// Settings file (defaults to the XDG settings path)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Config file to read with the filesystem source, overriding settings
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load the configuration once and print the active schedule
    Check {
        /// Print a JSON summary instead of text
        #[arg(long)]
        json: bool,
    },
    /// Load the configuration once and print its digest
    Digest {
        /// Also print the digest of every source
        #[arg(long)]
        sources: bool,
    },
    /// Print the persisted crash and performance ledger
    Ledger {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Load the configuration and reapply sources as their files change
    Watch {
        /// Debounce window for file events in milliseconds
        #[arg(long, default_value = "500")]
        debounce: u64,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Ensure XDG environment variables are set before using core library
    Settings::ensure_xdg_env();

    let settings = load_settings(&args)?;

    let _log_guard =
        packsched_core::logging::init(&settings.logging).context("failed to initialize logging")?;

    tracing::info!(plugin = %settings.source.plugin, "packsched starting");

    match args.command {
        Command::Check { json } => run_check(&settings, json),
        Command::Digest { sources } => run_digest(&settings, sources),
        Command::Ledger { json } => run_ledger(&settings, json),
        Command::Watch { debounce } => watch::run(&settings, debounce),
    }
}

fn load_settings(args: &Args) -> Result<Settings> {
    let mut settings = match &args.settings {
        Some(path) => Settings::load_from(path)
            .with_context(|| format!("failed to load settings from {}", path.display()))?,
        None => Settings::load().context("failed to load settings")?,
    };

    if let Some(path) = &args.config {
        settings.source.plugin = "filesystem".to_string();
        settings.source.path = Some(path.clone());
    }

    Ok(settings)
}

/// Build a coordinator backed by a throwaway ledger.
///
/// One-shot commands must not consume the crash markers a running watcher
/// relies on, so they never touch the persistent ledger.
fn detached_config(settings: &Settings) -> Result<Config> {
    let registry = plugins::config_plugin_registry(&settings.source);
    Config::from_settings(
        settings,
        &registry,
        plugins::create_all_parsers(),
        Arc::new(MemoryStore::new()),
    )
    .context("failed to build config")
}

fn run_check(settings: &Settings, as_json: bool) -> Result<()> {
    let config = detached_config(settings)?;
    config.load().context("failed to load configuration")?;

    let mut packs = Vec::new();
    config.packs(|pack| {
        let queries: Vec<_> = pack
            .queries()
            .iter()
            .map(|query| pack.qualified_name(query))
            .collect();
        packs.push(json!({
            "name": pack.name(),
            "source": pack.source(),
            "platform": pack.platform(),
            "version": pack.version(),
            "queries": queries,
        }));
    });

    let mut files = serde_json::Map::new();
    config.files(|category, patterns| {
        files.insert(category.to_string(), json!(patterns));
    });

    let mut query_count = 0;
    config.scheduled_queries(|_, _| query_count += 1);

    let digest = config.digest()?;

    if as_json {
        let summary = json!({
            "plugin": config.plugin_name(),
            "digest": digest,
            "packs": packs,
            "files": files,
            "queries": query_count,
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("Plugin: {}", config.plugin_name());
    println!("Digest: {}", digest);
    println!(
        "Active packs: {} ({} scheduled queries)",
        packs.len(),
        query_count
    );
    for pack in &packs {
        println!(
            "  - {} [{}]",
            pack["name"].as_str().unwrap_or_default(),
            pack["source"].as_str().unwrap_or_default()
        );
        if let Some(queries) = pack["queries"].as_array() {
            for query in queries {
                println!("      {}", query.as_str().unwrap_or_default());
            }
        }
    }

    if !files.is_empty() {
        println!("File categories: {}", files.len());
        for (category, patterns) in &files {
            let count = patterns.as_array().map_or(0, |p| p.len());
            println!("  - {}: {} pattern(s)", category, count);
        }
    }

    tracing::info!(packs = packs.len(), queries = query_count, "Check complete");
    Ok(())
}

fn run_digest(settings: &Settings, sources: bool) -> Result<()> {
    let config = detached_config(settings)?;
    config.load().context("failed to load configuration")?;

    println!("{}", config.digest()?);
    if sources {
        config.source_digests(|source, digest| println!("  {}  {}", digest, source));
    }
    Ok(())
}

fn run_ledger(settings: &Settings, as_json: bool) -> Result<()> {
    let ledger_path = Settings::ledger_path();
    tracing::info!(path = %ledger_path.display(), "Opening ledger");

    let store = SqliteStore::open(&ledger_path).context("failed to open ledger")?;
    store.migrate().context("failed to run ledger migrations")?;

    let dirty = store.load_dirty().context("failed to read dirty queries")?;
    let blacklist = store.load_blacklist().context("failed to read blacklist")?;
    let performance = store
        .load_performance()
        .context("failed to read performance")?;
    let threshold = settings.schedule.blacklist_threshold;

    if as_json {
        let report = json!({
            "ledger": ledger_path,
            "running": dirty.iter().map(|d| json!({"name": d.name, "started_at": d.started_at})).collect::<Vec<_>>(),
            "blacklist": blacklist,
            "blacklist_threshold": threshold,
            "performance": performance,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Ledger: {}", ledger_path.display());
    print_running(&dirty);

    if blacklist.is_empty() {
        println!("Blacklist: empty");
    } else {
        println!("Blacklist (threshold {}):", threshold);
        for (name, count) in &blacklist {
            let marker = if *count >= threshold { " (blacklisted)" } else { "" };
            println!("  - {}: {} failure(s){}", name, count, marker);
        }
    }

    if performance.is_empty() {
        println!("Performance: no executions recorded");
    } else {
        println!("Performance:");
        for (name, perf) in &performance {
            let last = perf
                .last_executed
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "never".to_string());
            println!(
                "  - {}: {} run(s), {}ms wall, {} bytes, last {}",
                name, perf.executions, perf.wall_time, perf.output_size, last
            );
        }
    }

    Ok(())
}

fn print_running(dirty: &[DirtyQuery]) {
    if dirty.is_empty() {
        println!("Running: none");
        return;
    }
    println!("Running (unfinished at last write):");
    for query in dirty {
        println!(
            "  - {} since {}",
            query.name,
            query.started_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
}
