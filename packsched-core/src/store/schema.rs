//! Ledger database schema and migrations
//!
//! Uses SQLite with embedded migrations managed via PRAGMA user_version.

use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// SQL migrations, indexed by version number
const MIGRATIONS: &[&str] = &[
    // Version 1: crash ledger
    r#"
    CREATE TABLE IF NOT EXISTS dirty_queries (
        name             TEXT PRIMARY KEY,
        started_at       DATETIME NOT NULL
    );

    CREATE TABLE IF NOT EXISTS blacklist (
        name             TEXT PRIMARY KEY,
        failures         INTEGER NOT NULL,
        updated_at       DATETIME NOT NULL
    );
    "#,
    // Version 2: performance totals
    r#"
    CREATE TABLE IF NOT EXISTS query_performance (
        name             TEXT PRIMARY KEY,
        executions       INTEGER NOT NULL DEFAULT 0,
        last_executed    DATETIME,
        wall_time        INTEGER NOT NULL DEFAULT 0,
        output_size      INTEGER NOT NULL DEFAULT 0,
        user_time        INTEGER NOT NULL DEFAULT 0,
        system_time      INTEGER NOT NULL DEFAULT 0,
        average_memory   INTEGER NOT NULL DEFAULT 0,
        updated_at       DATETIME NOT NULL
    );
    "#,
];

/// Run all pending migrations
pub fn run_migrations(conn: &Connection) -> crate::error::Result<()> {
    let current_version: i32 = conn
        .query_row("PRAGMA user_version", [], |r| r.get(0))
        .unwrap_or(0);

    tracing::info!(
        current_version,
        target_version = SCHEMA_VERSION,
        "Checking ledger migrations"
    );

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let version = (i + 1) as i32;
        if version > current_version {
            tracing::info!(version, "Running migration");
            conn.execute_batch(migration)?;
            conn.execute_batch(&format!("PRAGMA user_version = {}", version))?;
        }
    }

    if current_version < SCHEMA_VERSION {
        tracing::info!(
            from = current_version,
            to = SCHEMA_VERSION,
            "Migrations complete"
        );
    }

    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> crate::error::Result<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_idempotent() {
        let conn = Connection::open_in_memory().unwrap();

        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let version = get_schema_version(&conn).unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_tables_created() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        for table in ["dirty_queries", "blacklist", "query_performance"] {
            let exists: i32 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?",
                    [table],
                    |r| r.get(0),
                )
                .unwrap();
            assert_eq!(exists, 1, "Table {} should exist", table);
        }
    }
}
