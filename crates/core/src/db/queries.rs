//! Typed query helpers for every table in the outcome log.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use tracing::debug;
use uuid::Uuid;

use super::Database;
use crate::errors::DatabaseError;
use crate::models::{self, MergeOutcome};

// ---------------------------------------------------------------------------
// Rows returned by queries
// ---------------------------------------------------------------------------

/// A row from the `merge_runs` table.
#[derive(Debug, Clone)]
pub struct MergeRunEntry {
    pub id: String,
    pub source: String,
    pub plan_count: i64,
    pub status: String,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub summary: Option<String>,
}

/// A row from the `merge_outcomes` table.
#[derive(Debug, Clone)]
pub struct OutcomeEntry {
    pub id: i64,
    pub run_id: String,
    pub email: String,
    pub main_id: String,
    pub other_id: String,
    pub collection: String,
    pub success: bool,
    pub modified_count: i64,
    pub error: Option<String>,
    pub recorded_at: String,
}

/// A row from the `audit_log` table.
#[derive(Debug, Clone)]
pub struct AuditLogEntry {
    pub id: i64,
    pub action: String,
    pub details: Option<String>,
    pub success: bool,
    pub created_at: String,
}

const OUTCOME_COLUMNS: &str = "o.id, o.run_id, o.email, o.main_id, o.other_id, o.collection, \
     o.success, o.modified_count, o.error, o.recorded_at";

fn outcome_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<OutcomeEntry> {
    Ok(OutcomeEntry {
        id: row.get(0)?,
        run_id: row.get(1)?,
        email: row.get(2)?,
        main_id: row.get(3)?,
        other_id: row.get(4)?,
        collection: row.get(5)?,
        success: row.get::<_, i64>(6)? != 0,
        modified_count: row.get(7)?,
        error: row.get(8)?,
        recorded_at: row.get(9)?,
    })
}

// ---------------------------------------------------------------------------
// Query implementations
// ---------------------------------------------------------------------------

impl Database {
    // -- merge_runs ---------------------------------------------------------

    /// Record the start of a merge run and return its id.
    pub fn start_merge_run(&self, source: &str, plan_count: usize) -> Result<String, DatabaseError> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO merge_runs (id, source, plan_count, status, started_at)
             VALUES (?1, ?2, ?3, 'running', ?4)",
            params![id, source, plan_count as i64, now],
        )?;
        debug!(run_id = %id, source, plan_count, "started merge run");
        Ok(id)
    }

    /// Mark a merge run as finished.
    pub fn complete_merge_run(
        &self,
        id: &str,
        status: &str,
        summary: Option<&str>,
    ) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn();
        let changed = conn.execute(
            "UPDATE merge_runs SET status = ?1, completed_at = ?2, summary = ?3 WHERE id = ?4",
            params![status, now, summary, id],
        )?;
        if changed == 0 {
            return Err(DatabaseError::NotFound {
                entity: "merge_run".into(),
                id: id.to_string(),
            });
        }
        debug!(run_id = id, status, "completed merge run");
        Ok(())
    }

    /// Get the most recently started merge run.
    pub fn get_latest_merge_run(&self) -> Result<Option<MergeRunEntry>, DatabaseError> {
        let conn = self.conn();
        let entry = conn
            .query_row(
                "SELECT id, source, plan_count, status, started_at, completed_at, summary
                 FROM merge_runs ORDER BY started_at DESC, rowid DESC LIMIT 1",
                [],
                |row| {
                    Ok(MergeRunEntry {
                        id: row.get(0)?,
                        source: row.get(1)?,
                        plan_count: row.get(2)?,
                        status: row.get(3)?,
                        started_at: row.get(4)?,
                        completed_at: row.get(5)?,
                        summary: row.get(6)?,
                    })
                },
            )
            .optional()?;
        Ok(entry)
    }

    // -- merge_outcomes -----------------------------------------------------

    /// Append one outcome to the log.
    pub fn insert_outcome(&self, run_id: &str, outcome: &MergeOutcome) -> Result<i64, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO merge_outcomes
                (run_id, email, main_id, other_id, collection, success, modified_count, error, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                run_id,
                outcome.email,
                outcome.main_id,
                outcome.other_id,
                outcome.collection,
                outcome.success as i64,
                outcome.modified_count as i64,
                outcome.error,
                now,
            ],
        )?;
        let id = conn.last_insert_rowid();
        debug!(
            id,
            main_id = %outcome.main_id,
            other_id = %outcome.other_id,
            collection = %outcome.collection,
            success = outcome.success,
            "recorded merge outcome"
        );
        Ok(id)
    }

    /// Whether any run has recorded a success for this exact tuple.
    pub fn has_succeeded(
        &self,
        main_id: &str,
        other_id: &str,
        collection: &str,
    ) -> Result<bool, DatabaseError> {
        let conn = self.conn();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM merge_outcomes
             WHERE main_id = ?1 AND other_id = ?2 AND collection = ?3 AND success = 1",
            params![main_id, other_id, collection],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// All outcomes recorded for one pair, oldest first.
    pub fn list_outcomes_for_pair(
        &self,
        main_id: &str,
        other_id: &str,
    ) -> Result<Vec<OutcomeEntry>, DatabaseError> {
        let conn = self.conn();
        let sql = format!(
            "SELECT {} FROM merge_outcomes o WHERE o.main_id = ?1 AND o.other_id = ?2 ORDER BY o.id",
            OUTCOME_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let entries = stmt
            .query_map(params![main_id, other_id], outcome_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    /// Tuples whose most recent outcome is a failure and which never
    /// succeeded, i.e. the work a re-run still has to do.
    pub fn list_outstanding_failures(&self, limit: u32) -> Result<Vec<OutcomeEntry>, DatabaseError> {
        let conn = self.conn();
        let sql = format!(
            "SELECT {} FROM merge_outcomes o
             JOIN (SELECT main_id, other_id, collection, MAX(id) AS last_id
                   FROM merge_outcomes GROUP BY main_id, other_id, collection) l
               ON o.id = l.last_id
             WHERE o.success = 0
               AND NOT EXISTS (SELECT 1 FROM merge_outcomes s
                               WHERE s.main_id = o.main_id AND s.other_id = o.other_id
                                 AND s.collection = o.collection AND s.success = 1)
             ORDER BY o.id LIMIT ?1",
            OUTCOME_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let entries = stmt
            .query_map(params![limit], outcome_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    /// Count `(successes, failures)` recorded for one run.
    pub fn count_run_outcomes(&self, run_id: &str) -> Result<(i64, i64), DatabaseError> {
        let conn = self.conn();
        let counts = conn.query_row(
            "SELECT COALESCE(SUM(success = 1), 0), COALESCE(SUM(success = 0), 0)
             FROM merge_outcomes WHERE run_id = ?1",
            params![run_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(counts)
    }

    // -- audit_log ----------------------------------------------------------

    /// Insert an audit entry from the model type.
    pub fn insert_audit_entry(&self, entry: &models::AuditEntry) -> Result<i64, DatabaseError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO audit_log (action, details, success, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                entry.action,
                entry.details,
                entry.success as i64,
                entry.timestamp.to_rfc3339()
            ],
        )?;
        let id = conn.last_insert_rowid();
        debug!(id, action = %entry.action, "inserted audit entry");
        Ok(id)
    }

    /// Return the most recent N audit-log entries.
    pub fn list_audit_log(&self, limit: u32) -> Result<Vec<AuditLogEntry>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, action, details, success, created_at
             FROM audit_log ORDER BY id DESC LIMIT ?1",
        )?;
        let entries = stmt
            .query_map(params![limit], |row| {
                Ok(AuditLogEntry {
                    id: row.get(0)?,
                    action: row.get(1)?,
                    details: row.get(2)?,
                    success: row.get::<_, i64>(3)? != 0,
                    created_at: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }
}
