//! Process-level lock for the ledger owner.
//!
//! Only one `packsched watch` may record into a given ledger. The lock is an
//! advisory OS file lock (flock) in the runtime directory, scoped by a hash of
//! the ledger path and held for the process lifetime.

use anyhow::{Context, Result};
use std::collections::hash_map::DefaultHasher;
use std::fs::{self, File, OpenOptions};
use std::hash::{Hash, Hasher};
use std::io::{self, Seek, SeekFrom, Write};
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};

const WATCH_LOCK_FILE: &str = "packsched-watch.lock";

/// Held by the process that owns a ledger.
pub struct LedgerGuard {
    file: File,
    path: PathBuf,
}

impl LedgerGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LedgerGuard {
    fn drop(&mut self) {
        let _ = unlock_file(&self.file);
        let _ = fs::remove_file(&self.path);
    }
}

/// Acquire the owner lock for `ledger_path`, failing if another process
/// already holds it.
pub fn acquire_ledger_guard(ledger_path: &Path) -> Result<LedgerGuard> {
    let dir = lock_dir();
    fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create runtime lock directory: {}", dir.display()))?;

    let path = dir.join(scoped_lock_filename(WATCH_LOCK_FILE, ledger_path));
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&path)
        .with_context(|| format!("failed to open lock file: {}", path.display()))?;

    match lock_file_nonblocking(&file) {
        Ok(()) => {
            let _ = file.set_len(0);
            let _ = file.seek(SeekFrom::Start(0));
            let _ = writeln!(file, "pid={}", std::process::id());
            let _ = file.flush();

            Ok(LedgerGuard { file, path })
        }
        Err(e) if is_lock_busy(&e) => anyhow::bail!(
            "another packsched watch already owns the ledger at {}",
            ledger_path.display()
        ),
        Err(e) => Err(e).with_context(|| format!("failed to lock file: {}", path.display())),
    }
}

fn lock_dir() -> PathBuf {
    let mut dir = match std::env::var_os("XDG_RUNTIME_DIR") {
        Some(path) if !path.is_empty() => PathBuf::from(path),
        _ => std::env::temp_dir(),
    };
    dir.push("packsched");
    dir
}

fn scoped_lock_filename(base_filename: &str, ledger_path: &Path) -> String {
    let mut hasher = DefaultHasher::new();
    ledger_path.to_string_lossy().hash(&mut hasher);
    let digest = hasher.finish();
    format!("{base_filename}.{digest:016x}")
}

fn is_lock_busy(error: &io::Error) -> bool {
    matches!(error.kind(), io::ErrorKind::WouldBlock)
        || matches!(error.raw_os_error(), Some(11) | Some(35))
}

#[cfg(unix)]
fn lock_file_nonblocking(file: &File) -> io::Result<()> {
    const LOCK_EX: i32 = 2;
    const LOCK_NB: i32 = 4;
    let fd = file.as_raw_fd();
    // SAFETY: flock is called with a valid file descriptor and constant flags.
    let rc = unsafe { flock(fd, LOCK_EX | LOCK_NB) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(unix)]
fn unlock_file(file: &File) -> io::Result<()> {
    const LOCK_UN: i32 = 8;
    let fd = file.as_raw_fd();
    // SAFETY: flock is called with a valid file descriptor and constant flags.
    let rc = unsafe { flock(fd, LOCK_UN) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(unix)]
unsafe extern "C" {
    fn flock(fd: i32, operation: i32) -> i32;
}

#[cfg(not(unix))]
compile_error!("packsched ledger locks currently require Unix (macOS/Linux)");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_guard_is_refused() {
        let dir = tempfile::TempDir::new().unwrap();
        let ledger = dir.path().join("ledger.db");

        let guard = acquire_ledger_guard(&ledger).unwrap();
        assert!(guard.path().exists());
        assert!(acquire_ledger_guard(&ledger).is_err());

        let other = acquire_ledger_guard(&dir.path().join("other.db")).unwrap();
        drop(other);

        drop(guard);
        assert!(acquire_ledger_guard(&ledger).is_ok());
    }
}
