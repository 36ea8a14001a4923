use chrono::Utc;
use packsched_core::{LedgerStore, SqliteStore};
use serde_json::{json, Value};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

struct CliTestEnv {
    _temp_dir: TempDir,
    home: PathBuf,
    xdg_data: PathBuf,
    xdg_config: PathBuf,
    xdg_state: PathBuf,
}

impl CliTestEnv {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let base = temp_dir.path().to_path_buf();
        let home = base.join("home");
        let xdg_data = base.join("xdg-data");
        let xdg_config = base.join("xdg-config");
        let xdg_state = base.join("xdg-state");

        fs::create_dir_all(&home).expect("failed to create HOME");
        fs::create_dir_all(&xdg_data).expect("failed to create XDG_DATA_HOME");
        fs::create_dir_all(&xdg_config).expect("failed to create XDG_CONFIG_HOME");
        fs::create_dir_all(&xdg_state).expect("failed to create XDG_STATE_HOME");

        Self {
            _temp_dir: temp_dir,
            home,
            xdg_data,
            xdg_config,
            xdg_state,
        }
    }

    fn config_dir(&self) -> PathBuf {
        self.xdg_config.join("packsched")
    }

    /// Default config location read by the filesystem source.
    fn config_path(&self) -> PathBuf {
        self.config_dir().join("packsched.conf")
    }

    fn ledger_path(&self) -> PathBuf {
        self.xdg_data.join("packsched/ledger.db")
    }

    fn write(&self, path: &Path, content: &str) {
        fs::create_dir_all(path.parent().expect("missing parent")).expect("failed to create dir");
        fs::write(path, content).expect("failed to write file");
    }

    fn write_config(&self, content: &Value) {
        self.write(&self.config_path(), &content.to_string());
    }

    fn write_settings(&self, content: &str) {
        self.write(&self.config_dir().join("settings.toml"), content);
    }
}

fn sample_config() -> Value {
    json!({
        "schedule": {
            "uptime": {"query": "select * from uptime", "interval": 10}
        },
        "packs": {
            "sys": {
                "platform": "posix",
                "queries": {"procs": {"query": "select * from processes", "interval": 60}}
            },
            "win": {
                "platform": "windows",
                "queries": {"services": {"query": "select * from services", "interval": 60}}
            }
        },
        "file_paths": {"etc": ["/etc/%%"]},
        "options": {"verbose": true}
    })
}

fn run_bin(env: &CliTestEnv, args: &[&str]) -> Output {
    let bin_path = PathBuf::from(assert_cmd::cargo::cargo_bin!("packsched"));

    Command::new(bin_path)
        .args(args)
        .env("HOME", &env.home)
        .env("XDG_DATA_HOME", &env.xdg_data)
        .env("XDG_CONFIG_HOME", &env.xdg_config)
        .env("XDG_STATE_HOME", &env.xdg_state)
        .env("XDG_RUNTIME_DIR", &env.xdg_state)
        .output()
        .unwrap_or_else(|e| panic!("failed to execute packsched: {e}"))
}

fn assert_success(args: &[&str], output: &Output) {
    if output.status.success() {
        return;
    }

    let rendered_args = args
        .iter()
        .map(|arg| OsString::from(arg).to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ");
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    panic!(
        "packsched {rendered_args} failed\nstatus: {}\nstdout:\n{}\nstderr:\n{}",
        output.status, stdout, stderr
    );
}

fn stdout_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn check_prints_active_schedule_from_default_config() {
    let env = CliTestEnv::new();
    env.write_config(&sample_config());
    env.write_settings("[host]\nplatform = \"linux\"\n");

    let output = run_bin(&env, &["check"]);
    assert_success(&["check"], &output);

    let stdout = stdout_of(&output);
    assert!(stdout.contains("Plugin: filesystem"), "got:\n{stdout}");
    assert!(
        stdout.contains("Active packs: 2 (2 scheduled queries)"),
        "got:\n{stdout}"
    );
    assert!(stdout.contains("pack_sys_procs"));
    assert!(stdout.contains("uptime"));
    assert!(!stdout.contains("pack_win_services"));
    assert!(stdout.contains("etc: 1 pattern(s)"));
}

#[test]
fn check_json_honours_host_settings() {
    let env = CliTestEnv::new();
    let config_path = env.home.join("agent/custom.conf");
    env.write(&config_path, &sample_config().to_string());
    env.write_settings("[host]\nplatform = \"windows\"\ndisabled_packs = [\"main\"]\n");

    let args = ["--config", config_path.to_str().expect("utf-8 path"), "check", "--json"];
    let output = run_bin(&env, &args);
    assert_success(&args, &output);

    let summary: Value = serde_json::from_slice(&output.stdout).expect("check --json output");
    let packs: Vec<&str> = summary["packs"]
        .as_array()
        .expect("packs array")
        .iter()
        .filter_map(|pack| pack["name"].as_str())
        .collect();
    assert_eq!(packs, vec!["win"]);
    assert_eq!(summary["queries"], json!(1));
    assert_eq!(summary["files"]["etc"], json!(["/etc/%%"]));
    assert_eq!(summary["digest"].as_str().map(str::len), Some(64));
}

#[test]
fn digest_is_stable_and_tracks_overlays() {
    let env = CliTestEnv::new();
    env.write_config(&sample_config());

    let first = run_bin(&env, &["digest"]);
    assert_success(&["digest"], &first);
    let second = run_bin(&env, &["digest"]);
    assert_eq!(stdout_of(&first), stdout_of(&second));

    env.write(
        &env.config_dir().join("packsched.conf.d/10-extra.conf"),
        &json!({"options": {"verbose": false}}).to_string(),
    );

    let args = ["digest", "--sources"];
    let third = run_bin(&env, &args);
    assert_success(&args, &third);

    let stdout = stdout_of(&third);
    let mut lines = stdout.lines();
    let aggregate = lines.next().expect("aggregate digest line");
    assert_ne!(Some(aggregate), stdout_of(&first).lines().next());
    assert_eq!(lines.filter(|line| line.contains(".conf")).count(), 2);
}

#[test]
fn check_fails_when_config_is_unusable() {
    let env = CliTestEnv::new();

    let missing = run_bin(&env, &["check"]);
    assert!(!missing.status.success());

    env.write(&env.config_path(), "{\"packs\": ");
    let invalid = run_bin(&env, &["check"]);
    assert!(!invalid.status.success());
    let stderr = String::from_utf8_lossy(&invalid.stderr);
    assert!(stderr.contains("failed to load configuration"), "got:\n{stderr}");
}

#[test]
fn invalid_settings_are_rejected() {
    let env = CliTestEnv::new();
    env.write_config(&sample_config());
    env.write_settings("[source]\ntimeout_ms = 0\n");

    let output = run_bin(&env, &["check"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("timeout_ms"), "got:\n{stderr}");
}

#[test]
fn ledger_reports_unfinished_and_blacklisted_queries() {
    let env = CliTestEnv::new();

    {
        fs::create_dir_all(env.ledger_path().parent().expect("ledger parent"))
            .expect("failed to create data dir");
        let store = SqliteStore::open(&env.ledger_path()).expect("failed to open ledger");
        store.migrate().expect("failed to migrate ledger");
        store.mark_dirty("pack_sys_procs", Utc::now()).expect("mark dirty");
        store.store_blacklist("uptime", 3).expect("store blacklist");
    }

    let output = run_bin(&env, &["ledger"]);
    assert_success(&["ledger"], &output);
    let stdout = stdout_of(&output);
    assert!(stdout.contains("pack_sys_procs since"), "got:\n{stdout}");
    assert!(stdout.contains("uptime: 3 failure(s) (blacklisted)"), "got:\n{stdout}");
    assert!(stdout.contains("no executions recorded"));

    // Reading the ledger does not consume crash markers.
    let args = ["ledger", "--json"];
    let output = run_bin(&env, &args);
    assert_success(&args, &output);
    let report: Value = serde_json::from_slice(&output.stdout).expect("ledger --json output");
    assert_eq!(report["running"][0]["name"], json!("pack_sys_procs"));
    assert_eq!(report["blacklist"]["uptime"], json!(3));
    assert_eq!(report["blacklist_threshold"], json!(3));
}
