//! SQLite-backed ledger store

use super::{DirtyQuery, LedgerStore};
use crate::error::{Error, Result};
use crate::performance::QueryPerformance;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Ledger handle over a single SQLite connection
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

impl SqliteStore {
    /// Open or create a ledger database at the given path
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        // Dirty markers are written on every query start; WAL keeps that cheap.
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run migrations on this database
    pub fn migrate(&self) -> Result<()> {
        let conn = self.connection();
        super::schema::run_migrations(&conn)
    }

    fn connection(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn row_to_performance(row: &Row) -> rusqlite::Result<(String, QueryPerformance)> {
        let last_executed: Option<String> = row.get("last_executed")?;
        let performance = QueryPerformance {
            executions: row.get::<_, i64>("executions")? as u64,
            last_executed: last_executed.as_deref().and_then(parse_timestamp),
            wall_time: row.get::<_, i64>("wall_time")? as u64,
            output_size: row.get::<_, i64>("output_size")? as u64,
            user_time: row.get::<_, i64>("user_time")? as u64,
            system_time: row.get::<_, i64>("system_time")? as u64,
            average_memory: row.get::<_, i64>("average_memory")? as u64,
            dirty: false,
        };
        Ok((row.get("name")?, performance))
    }
}

impl LedgerStore for SqliteStore {
    fn mark_dirty(&self, name: &str, started_at: DateTime<Utc>) -> Result<()> {
        self.connection().execute(
            r#"
            INSERT INTO dirty_queries (name, started_at) VALUES (?1, ?2)
            ON CONFLICT(name) DO UPDATE SET started_at = excluded.started_at
            "#,
            params![name, started_at.to_rfc3339()],
        )?;
        Ok(())
    }

    fn clear_dirty(&self, name: &str) -> Result<()> {
        self.connection()
            .execute("DELETE FROM dirty_queries WHERE name = ?", [name])?;
        Ok(())
    }

    fn load_dirty(&self) -> Result<Vec<DirtyQuery>> {
        let conn = self.connection();
        let mut stmt = conn.prepare("SELECT name, started_at FROM dirty_queries ORDER BY name")?;
        let rows = stmt.query_map([], |row| {
            let started_at: String = row.get(1)?;
            Ok(DirtyQuery {
                name: row.get(0)?,
                started_at: parse_timestamp(&started_at).unwrap_or_else(Utc::now),
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Error::from)
    }

    fn load_blacklist(&self) -> Result<BTreeMap<String, u64>> {
        let conn = self.connection();
        let mut stmt = conn.prepare("SELECT name, failures FROM blacklist")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
        })?;
        rows.collect::<rusqlite::Result<BTreeMap<_, _>>>()
            .map_err(Error::from)
    }

    fn store_blacklist(&self, name: &str, count: u64) -> Result<()> {
        self.connection().execute(
            r#"
            INSERT INTO blacklist (name, failures, updated_at) VALUES (?1, ?2, ?3)
            ON CONFLICT(name) DO UPDATE SET
                failures = excluded.failures,
                updated_at = excluded.updated_at
            "#,
            params![name, count as i64, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn store_performance(&self, name: &str, performance: &QueryPerformance) -> Result<()> {
        self.connection().execute(
            r#"
            INSERT INTO query_performance (
                name, executions, last_executed, wall_time, output_size,
                user_time, system_time, average_memory, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(name) DO UPDATE SET
                executions = excluded.executions,
                last_executed = excluded.last_executed,
                wall_time = excluded.wall_time,
                output_size = excluded.output_size,
                user_time = excluded.user_time,
                system_time = excluded.system_time,
                average_memory = excluded.average_memory,
                updated_at = excluded.updated_at
            "#,
            params![
                name,
                performance.executions as i64,
                performance.last_executed.map(|t| t.to_rfc3339()),
                performance.wall_time as i64,
                performance.output_size as i64,
                performance.user_time as i64,
                performance.system_time as i64,
                performance.average_memory as i64,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn load_performance(&self) -> Result<BTreeMap<String, QueryPerformance>> {
        let conn = self.connection();
        let mut stmt = conn.prepare("SELECT * FROM query_performance")?;
        let rows = stmt.query_map([], Self::row_to_performance)?;
        rows.collect::<rusqlite::Result<BTreeMap<_, _>>>()
            .map_err(Error::from)
    }

    fn clear_performance(&self) -> Result<()> {
        self.connection()
            .execute_batch("DELETE FROM query_performance")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::recover;

    fn store() -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        store.migrate().unwrap();
        store
    }

    #[test]
    fn test_dirty_markers() {
        let store = store();
        store.mark_dirty("a", Utc::now()).unwrap();
        store.mark_dirty("b", Utc::now()).unwrap();
        store.mark_dirty("a", Utc::now()).unwrap();

        let dirty = store.load_dirty().unwrap();
        assert_eq!(dirty.len(), 2);
        assert_eq!(dirty[0].name, "a");

        store.clear_dirty("a").unwrap();
        assert_eq!(store.load_dirty().unwrap().len(), 1);
    }

    #[test]
    fn test_blacklist_upsert() {
        let store = store();
        store.store_blacklist("q", 1).unwrap();
        store.store_blacklist("q", 2).unwrap();

        let blacklist = store.load_blacklist().unwrap();
        assert_eq!(blacklist.len(), 1);
        assert_eq!(blacklist["q"], 2);
    }

    #[test]
    fn test_performance_persisted() {
        let store = store();
        let perf = QueryPerformance {
            executions: 3,
            last_executed: Some(Utc::now()),
            wall_time: 120,
            output_size: 4096,
            user_time: 7,
            system_time: 2,
            average_memory: 1024,
            dirty: false,
        };
        store.store_performance("q", &perf).unwrap();

        let loaded = store.load_performance().unwrap();
        assert_eq!(loaded["q"].executions, 3);
        assert_eq!(loaded["q"].output_size, 4096);
        assert!(loaded["q"].last_executed.is_some());

        store.clear_performance().unwrap();
        assert!(store.load_performance().unwrap().is_empty());
    }

    #[test]
    fn test_file_backed_recovery_survives_reopen() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("ledger.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store.migrate().unwrap();
            store.mark_dirty("crashy", Utc::now()).unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        store.migrate().unwrap();
        let recovery = recover(&store);
        assert_eq!(recovery.failed_query.as_deref(), Some("crashy"));
        assert_eq!(recovery.blacklist["crashy"], 1);
        assert!(store.load_dirty().unwrap().is_empty());
    }
}
