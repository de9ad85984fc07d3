//! Backing record store: the identity collection plus its dependent
//! collections.
//!
//! Each collection is its own table and every update issued by the merge
//! engine is its own statement; nothing here wraps several collections in one
//! transaction. The store is opened once per run through
//! [`crate::context::RunContext`] and closed on every exit path.

pub mod identities;
pub mod schema;

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection};
use tracing::{debug, info, warn};

use crate::config::is_identifier;
use crate::errors::StoreError;

/// Handle to the record store.
pub struct RecordStore {
    conn: Mutex<Connection>,
}

impl RecordStore {
    /// Open an existing record store. Fails if the file does not exist, so a
    /// mistyped path never silently creates an empty store.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(StoreError::NotFound(path.display().to_string()));
        }
        Self::create(path)
    }

    /// Open a record store, creating the file if needed.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref();
        info!(path = %path.display(), "connecting to record store");
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        conn.execute_batch("PRAGMA busy_timeout = 5000;")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory store (useful for testing).
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create the identity and standard dependent tables if they are missing.
    pub fn initialize(&self) -> Result<(), StoreError> {
        debug!("ensuring record store schema");
        self.conn().execute_batch(schema::STANDARD_SCHEMA)?;
        Ok(())
    }

    /// Obtain a lock on the underlying connection, recovering from poison.
    pub fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| {
            warn!("record store mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Whether `table` exists and has a column named `column`.
    pub fn column_exists(&self, table: &str, column: &str) -> Result<bool, StoreError> {
        if !is_identifier(table) {
            return Err(StoreError::InvalidIdentifier(table.to_string()));
        }
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT COUNT(*) FROM pragma_table_info(?1) WHERE name = ?2")?;
        let count: i64 = stmt.query_row(params![table, column], |row| row.get(0))?;
        Ok(count > 0)
    }

    /// Total number of rows in `table`.
    pub fn count_rows(&self, table: &str) -> Result<u64, StoreError> {
        if !is_identifier(table) {
            return Err(StoreError::InvalidIdentifier(table.to_string()));
        }
        let conn = self.conn();
        let count: i64 =
            conn.query_row(&format!("SELECT COUNT(*) FROM \"{}\"", table), [], |row| {
                row.get(0)
            })?;
        Ok(count as u64)
    }

    /// Close the connection, reporting any error from SQLite.
    pub fn close(self) -> Result<(), StoreError> {
        let conn = self
            .conn
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        conn.close().map_err(|(_, e)| StoreError::SqliteError(e))?;
        info!("record store connection closed");
        Ok(())
    }

    // -- seeding --------------------------------------------------------------

    /// Insert an identity record.
    pub fn insert_identity(
        &self,
        record: &crate::models::IdentityRecord,
    ) -> Result<(), StoreError> {
        self.conn().execute(
            "INSERT INTO users (id, email, provider, provider_id) VALUES (?1, ?2, ?3, ?4)",
            params![record.id, record.email, record.provider, record.provider_id],
        )?;
        Ok(())
    }

    /// Insert a record owned through a flat `user_id` column.
    pub fn insert_owned(&self, table: &str, id: &str, owner_id: &str) -> Result<(), StoreError> {
        if !is_identifier(table) {
            return Err(StoreError::InvalidIdentifier(table.to_string()));
        }
        self.conn().execute(
            &format!("INSERT INTO \"{}\" (id, user_id) VALUES (?1, ?2)", table),
            params![id, owner_id],
        )?;
        Ok(())
    }

    /// Insert a team whose confirmed members are `(id, email)` pairs.
    pub fn insert_team(
        &self,
        id: &str,
        name: &str,
        confirmed: &[(&str, &str)],
    ) -> Result<(), StoreError> {
        let members: Vec<serde_json::Value> = confirmed
            .iter()
            .map(|(id, email)| serde_json::json!({ "id": id, "email": email }))
            .collect();
        self.conn().execute(
            "INSERT INTO teams (id, name, confirmed_users) VALUES (?1, ?2, ?3)",
            params![id, name, serde_json::Value::Array(members).to_string()],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_missing_store_fails() {
        let result = RecordStore::open("/nonexistent/store.db");
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_create_initialize_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");
        let store = RecordStore::create(&path).unwrap();
        store.initialize().unwrap();
        store.insert_owned("datasets", "d1", "u1").unwrap();
        store.close().unwrap();

        let store = RecordStore::open(&path).unwrap();
        assert_eq!(store.count_rows("datasets").unwrap(), 1);
    }

    #[test]
    fn test_column_exists() {
        let store = RecordStore::in_memory().unwrap();
        store.initialize().unwrap();
        assert!(store.column_exists("datasets", "user_id").unwrap());
        assert!(!store.column_exists("datasets", "userI").unwrap());
        assert!(!store.column_exists("no_such_table", "user_id").unwrap());
        assert!(matches!(
            store.column_exists("bad name", "user_id"),
            Err(StoreError::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn test_insert_team_serializes_members() {
        let store = RecordStore::in_memory().unwrap();
        store.initialize().unwrap();
        store
            .insert_team("t1", "Rangers", &[("u1", "a@x.com")])
            .unwrap();
        let raw: String = store
            .conn()
            .query_row("SELECT confirmed_users FROM teams WHERE id = 't1'", [], |r| {
                r.get(0)
            })
            .unwrap();
        let members: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(members[0]["id"], "u1");
    }
}
