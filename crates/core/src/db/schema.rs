//! Outcome-log schema definitions and migration runner.
//!
//! Migrations are simple SQL strings applied in order. The SQLite
//! `user_version` pragma tracks which migrations have already been applied.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::errors::DatabaseError;

/// All migrations, in order. Each entry is `(version, description, sql)`.
static MIGRATIONS: &[(u32, &str, &str)] = &[
    (
        1,
        "initial schema",
        r#"
        CREATE TABLE IF NOT EXISTS merge_runs (
            id            TEXT PRIMARY KEY,
            source        TEXT NOT NULL,
            plan_count    INTEGER NOT NULL DEFAULT 0,
            status        TEXT NOT NULL DEFAULT 'running',
            started_at    TEXT NOT NULL,
            completed_at  TEXT,
            summary       TEXT
        );

        CREATE TABLE IF NOT EXISTS merge_outcomes (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id          TEXT NOT NULL,
            email           TEXT NOT NULL,
            main_id         TEXT NOT NULL,
            other_id        TEXT NOT NULL,
            collection      TEXT NOT NULL,
            success         INTEGER NOT NULL,
            modified_count  INTEGER NOT NULL DEFAULT 0,
            error           TEXT,
            recorded_at     TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_merge_outcomes_pair
            ON merge_outcomes (main_id, other_id, collection);
        CREATE INDEX IF NOT EXISTS idx_merge_outcomes_run ON merge_outcomes (run_id);

        CREATE TABLE IF NOT EXISTS audit_log (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            action      TEXT NOT NULL,
            details     TEXT,
            success     INTEGER NOT NULL DEFAULT 1,
            created_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_audit_log_created_at ON audit_log (created_at);
        "#,
    ),
    (
        2,
        "reject updates and deletes on merge_outcomes",
        r#"
        CREATE TRIGGER IF NOT EXISTS merge_outcomes_no_update
        BEFORE UPDATE ON merge_outcomes
        BEGIN
            SELECT RAISE(ABORT, 'merge_outcomes is append-only');
        END;

        CREATE TRIGGER IF NOT EXISTS merge_outcomes_no_delete
        BEFORE DELETE ON merge_outcomes
        BEGIN
            SELECT RAISE(ABORT, 'merge_outcomes is append-only');
        END;
        "#,
    ),
];

/// Run all pending migrations against `conn`.
pub fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    let current_version = get_schema_version(conn)?;
    info!(
        current_version,
        target_version = MIGRATIONS.last().map(|m| m.0).unwrap_or(0),
        "checking outcome log migrations"
    );

    for &(version, description, sql) in MIGRATIONS {
        if version > current_version {
            info!(version, description, "applying migration");
            conn.execute_batch(sql)
                .map_err(|e| DatabaseError::MigrationFailed {
                    version,
                    detail: e.to_string(),
                })?;
            set_schema_version(conn, version)?;
            debug!(version, "migration applied successfully");
        }
    }

    Ok(())
}

/// Read the current schema version from the SQLite `user_version` pragma.
pub(crate) fn get_schema_version(conn: &Connection) -> Result<u32, DatabaseError> {
    let version: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version)
}

/// Set the schema version via the SQLite `user_version` pragma.
fn set_schema_version(conn: &Connection, version: u32) -> Result<(), DatabaseError> {
    conn.pragma_update(None, "user_version", version)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_run_idempotently() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), 2);
    }

    #[test]
    fn test_tables_created() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        let tables: Vec<String> = {
            let mut stmt = conn
                .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
                .unwrap();
            stmt.query_map([], |row| row.get(0))
                .unwrap()
                .filter_map(|r| r.ok())
                .collect()
        };

        assert!(tables.contains(&"merge_runs".to_string()));
        assert!(tables.contains(&"merge_outcomes".to_string()));
        assert!(tables.contains(&"audit_log".to_string()));
    }

    #[test]
    fn test_outcomes_are_append_only() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn.execute(
            "INSERT INTO merge_outcomes
                (run_id, email, main_id, other_id, collection, success, recorded_at)
             VALUES ('r', 'a@x.com', '1', '2', 'datasets', 0, '2025-01-01T00:00:00Z')",
            [],
        )
        .unwrap();

        assert!(conn
            .execute("UPDATE merge_outcomes SET success = 1", [])
            .is_err());
        assert!(conn.execute("DELETE FROM merge_outcomes", []).is_err());
    }
}
