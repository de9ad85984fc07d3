//! Outcome log: the durable record of what each merge run did.
//!
//! Every adapter call and every identity deletion is appended to
//! `merge_outcomes`, keyed by `(main_id, other_id, collection)`. A later run
//! consults it through [`Database::has_succeeded`] and skips work that
//! already succeeded, which is what makes an interrupted or partially failed
//! merge resumable. Identity and dependent-collection data live in the record
//! store ([`crate::store`]), never here.

pub mod queries;
pub mod schema;

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::errors::DatabaseError;

/// Handle to the outcome log. Shared by the executor and the CLI reporting
/// commands; all access goes through one locked connection.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open the outcome log at `path` without migrating it. The data
    /// directory is created if missing.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DatabaseError> {
        let path = path.as_ref();
        info!(path = %path.display(), "opening outcome log");

        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }

        let conn = Connection::open(path)?;
        // `usermerge outcomes` may read while a merge is writing.
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA busy_timeout = 5000;")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open the outcome log at `path` and bring its schema up to date.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DatabaseError> {
        let db = Self::new(path)?;
        db.initialize()?;
        Ok(db)
    }

    /// Unmigrated in-memory log, for tests.
    pub fn in_memory() -> Result<Self, DatabaseError> {
        Ok(Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        })
    }

    /// Apply pending migrations.
    pub fn initialize(&self) -> Result<(), DatabaseError> {
        let conn = self.conn();
        schema::run_migrations(&conn)?;
        debug!(version = schema::get_schema_version(&conn)?, "outcome log ready");
        Ok(())
    }

    pub fn schema_version(&self) -> Result<u32, DatabaseError> {
        schema::get_schema_version(&self.conn())
    }

    /// Lock the connection, recovering a poisoned lock. Every outcome write
    /// is a single statement.
    pub fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| {
            warn!("outcome log lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }
}
