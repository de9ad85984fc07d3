//! The per-run context: configuration plus the store and outcome-log
//! connections, acquired once and passed to every component.
//!
//! Both connections are released when the context is dropped, so an early
//! return on error still closes them. [`RunContext::close`] releases them
//! explicitly and surfaces any close error.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::db::Database;
use crate::errors::{CoreError, StoreError};
use crate::executor::{MergeExecutor, MergeSummary};
use crate::models::{AuditEntry, MergePlan};
use crate::source::IdentitySource;
use crate::store::RecordStore;
use crate::transfer::TransferRegistry;

pub struct RunContext {
    pub config: AppConfig,
    pub store: Arc<RecordStore>,
    pub db: Database,
}

/// Where a merge run's plans came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanSource<'a> {
    File(&'a str),
    Store,
}

impl std::fmt::Display for PlanSource<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File(path) => write!(f, "file:{}", path),
            Self::Store => write!(f, "store"),
        }
    }
}

impl RunContext {
    /// Open the record store and the outcome log named by `config`.
    pub fn open(config: AppConfig) -> Result<Self, CoreError> {
        let store = RecordStore::open(config.store_path()?)?;
        let db = Database::open(config.run.outcome_db_path())?;
        Ok(Self::from_parts(config, store, db))
    }

    pub fn from_parts(config: AppConfig, store: RecordStore, db: Database) -> Self {
        Self {
            config,
            store: Arc::new(store),
            db,
        }
    }

    /// Transfer adapters for the configured collections.
    pub fn registry(&self) -> Result<TransferRegistry, StoreError> {
        TransferRegistry::from_configs(Arc::clone(&self.store), &self.config.collection_configs())
    }

    pub fn identity_count(&self) -> Result<u64, CoreError> {
        Ok(self.store.count_identities()?)
    }

    /// Execute `plans` as one recorded merge run.
    ///
    /// The run row is completed with status `completed`, `incomplete` (some
    /// pair did not converge or the run was interrupted) or `failed` (the
    /// batch aborted).
    pub fn merge(
        &self,
        plans: &[MergePlan],
        source: PlanSource<'_>,
        dry_run: bool,
        shutdown: Option<Arc<AtomicBool>>,
    ) -> Result<(String, MergeSummary), CoreError> {
        let before = self.identity_count()?;
        info!(identities = before, plans = plans.len(), %source, "identity count before merge");

        let registry = self.registry()?;
        let run_id = self.db.start_merge_run(&source.to_string(), plans.len())?;

        let mut executor =
            MergeExecutor::new(&registry, &*self.store, &self.db, run_id.clone()).dry_run(dry_run);
        if let Some(flag) = shutdown {
            executor = executor.with_shutdown(flag);
        }

        let summary = match executor.execute(plans) {
            Ok(summary) => summary,
            Err(e) => {
                error!(run_id = %run_id, error = %e, "merge run aborted");
                if let Err(db_err) = self.db.complete_merge_run(&run_id, "failed", None) {
                    warn!(run_id = %run_id, error = %db_err, "could not mark merge run failed");
                }
                self.db.insert_audit_entry(&AuditEntry::failure("merge", &e.to_string()))?;
                return Err(e.into());
            }
        };

        let status = if summary.is_clean() {
            "completed"
        } else {
            "incomplete"
        };
        let summary_json = serde_json::to_string(&summary).unwrap_or_default();
        self.db
            .complete_merge_run(&run_id, status, Some(&summary_json))?;
        if !dry_run {
            self.db
                .insert_audit_entry(&AuditEntry::success("merge", &summary_json))?;
        }

        let after = self.identity_count()?;
        info!(identities = after, run_id = %run_id, status, "identity count after merge");
        Ok((run_id, summary))
    }

    /// Release both connections.
    pub fn close(self) -> Result<(), CoreError> {
        drop(self.db);
        match Arc::try_unwrap(self.store) {
            Ok(store) => store.close()?,
            Err(_) => warn!("record store still shared at close, releasing on last drop"),
        }
        Ok(())
    }
}
