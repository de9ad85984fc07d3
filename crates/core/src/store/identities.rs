//! Identity-collection queries on the record store.

use rusqlite::params;
use tracing::{debug, info};

use super::RecordStore;
use crate::config::CleanupRule;
use crate::errors::{DeleteError, SourceReadError, StoreError};
use crate::models::IdentityRecord;
use crate::source::{IdentityRemover, IdentitySource};

const RULE_PREDICATE: &str =
    "provider = ?1 AND (?2 = 0 OR email IS NULL OR TRIM(email) = '')";

impl IdentitySource for RecordStore {
    fn fetch_page(
        &self,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<IdentityRecord>, SourceReadError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, email, provider, provider_id FROM users
             WHERE (?1 IS NULL OR id > ?1) ORDER BY id LIMIT ?2",
        )?;
        let records = stmt
            .query_map(params![after, limit as i64], |row| {
                Ok(IdentityRecord {
                    id: row.get(0)?,
                    email: row.get(1)?,
                    provider: row.get(2)?,
                    provider_id: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    fn count_identities(&self) -> Result<u64, SourceReadError> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

impl IdentityRemover for RecordStore {
    fn contains(&self, id: &str) -> Result<bool, DeleteError> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM users WHERE id = ?1", params![id], |row| {
                row.get(0)
            })
            .map_err(|source| DeleteError::Query {
                id: id.to_string(),
                source,
            })?;
        Ok(count > 0)
    }

    fn remove(&self, id: &str) -> Result<u64, DeleteError> {
        let removed = self
            .conn()
            .execute("DELETE FROM users WHERE id = ?1", params![id])
            .map_err(|source| DeleteError::Query {
                id: id.to_string(),
                source,
            })?;
        debug!(id, removed, "deleted identity");
        Ok(removed as u64)
    }
}

impl RecordStore {
    /// Count identities matching a cleanup rule.
    pub fn count_matching(&self, rule: &CleanupRule) -> Result<u64, StoreError> {
        let count: i64 = self.conn().query_row(
            &format!("SELECT COUNT(*) FROM users WHERE {}", RULE_PREDICATE),
            params![rule.provider, rule.missing_email as i64],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Delete every identity matching a cleanup rule.
    pub fn delete_matching(&self, rule: &CleanupRule) -> Result<u64, StoreError> {
        let deleted = self.conn().execute(
            &format!("DELETE FROM users WHERE {}", RULE_PREDICATE),
            params![rule.provider, rule.missing_email as i64],
        )?;
        info!(
            provider = %rule.provider,
            missing_email = rule.missing_email,
            deleted,
            "deleted identities matching cleanup rule"
        );
        Ok(deleted as u64)
    }
}
