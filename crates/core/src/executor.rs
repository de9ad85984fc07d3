//! Merge executor: drives each (main, other) pair through the transfer
//! state machine and records every adapter call in the outcome log.
//!
//! Per pair:
//!
//! 1. `Pending -> Transferring`: run every adapter in registration order,
//!    skipping adapters already recorded successful for the pair.
//! 2. `Transferring -> AllTransferred` once every adapter has succeeded, now
//!    or in an earlier run.
//! 3. `AllTransferred -> Deleted`: delete the superseded identity.
//! 4. `Transferring -> PartiallyFailed` when any adapter failed. The identity
//!    is kept and the next run retries only the failed adapters.
//!
//! Per-pair failures never abort the batch. Outcome-log and identity-store
//! connection errors do.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::db::Database;
use crate::errors::{DatabaseError, MergeError};
use crate::models::{MergeOutcome, MergePlan, IDENTITY_COLLECTION};
use crate::source::IdentityRemover;
use crate::transfer::TransferRegistry;

// ---------------------------------------------------------------------------
// Outcome log
// ---------------------------------------------------------------------------

/// Append-only record of adapter and delete outcomes.
pub trait OutcomeLog {
    fn record(&self, run_id: &str, outcome: &MergeOutcome) -> Result<(), DatabaseError>;

    /// Whether a success has ever been recorded for the tuple.
    fn has_succeeded(
        &self,
        main_id: &str,
        other_id: &str,
        collection: &str,
    ) -> Result<bool, DatabaseError>;
}

impl OutcomeLog for Database {
    fn record(&self, run_id: &str, outcome: &MergeOutcome) -> Result<(), DatabaseError> {
        self.insert_outcome(run_id, outcome)?;
        Ok(())
    }

    fn has_succeeded(
        &self,
        main_id: &str,
        other_id: &str,
        collection: &str,
    ) -> Result<bool, DatabaseError> {
        Database::has_succeeded(self, main_id, other_id, collection)
    }
}

// ---------------------------------------------------------------------------
// Pair state machine
// ---------------------------------------------------------------------------

/// States of one (main, other) pair within a run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PairState {
    Pending,
    Transferring,
    AllTransferred,
    Deleted,
    PartiallyFailed,
}

impl std::fmt::Display for PairState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Transferring => write!(f, "transferring"),
            Self::AllTransferred => write!(f, "all_transferred"),
            Self::Deleted => write!(f, "deleted"),
            Self::PartiallyFailed => write!(f, "partially_failed"),
        }
    }
}

impl PairState {
    pub fn can_advance_to(self, next: PairState) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Transferring)
                | (Self::Transferring, Self::AllTransferred)
                | (Self::Transferring, Self::PartiallyFailed)
                | (Self::AllTransferred, Self::Deleted)
        )
    }

    /// Move to `next`, rejecting transitions the machine does not allow.
    pub fn advance(self, next: PairState) -> Result<PairState, MergeError> {
        if self.can_advance_to(next) {
            Ok(next)
        } else {
            Err(MergeError::InvalidStateTransition {
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Deleted | Self::PartiallyFailed)
    }
}

// ---------------------------------------------------------------------------
// Summary
// ---------------------------------------------------------------------------

/// Totals for one executor run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MergeSummary {
    pub plans: usize,
    pub plans_skipped: usize,
    pub pairs: usize,
    /// Pairs that reached `Deleted` in this run.
    pub identities_merged: usize,
    pub pairs_partially_failed: usize,
    /// Pairs whose transfers all succeeded but whose delete failed.
    pub delete_failures: usize,
    /// Identity records actually removed.
    pub identities_deleted: u64,
    /// Pairs skipped because their delete was already recorded.
    pub pairs_already_deleted: usize,
    pub adapter_calls_skipped: usize,
    pub records_reassigned: u64,
    pub interrupted: bool,
    pub dry_run: bool,
}

impl MergeSummary {
    /// Whether every pair in the run converged.
    pub fn is_clean(&self) -> bool {
        self.pairs_partially_failed == 0
            && self.delete_failures == 0
            && self.plans_skipped == 0
            && !self.interrupted
    }
}

impl std::fmt::Display for MergeSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} identities merged, {} pairs partially failed, {} identities deleted",
            self.identities_merged, self.pairs_partially_failed, self.identities_deleted
        )
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

/// Executes merge plans against a closed set of transfer adapters.
pub struct MergeExecutor<'a> {
    registry: &'a TransferRegistry,
    identities: &'a dyn IdentityRemover,
    log: &'a dyn OutcomeLog,
    run_id: String,
    shutdown: Option<Arc<AtomicBool>>,
    dry_run: bool,
}

impl<'a> MergeExecutor<'a> {
    pub fn new(
        registry: &'a TransferRegistry,
        identities: &'a dyn IdentityRemover,
        log: &'a dyn OutcomeLog,
        run_id: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            identities,
            log,
            run_id: run_id.into(),
            shutdown: None,
            dry_run: false,
        }
    }

    /// Stop between pairs once `flag` is set.
    pub fn with_shutdown(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown = Some(flag);
        self
    }

    /// Report the plans without invoking adapters or deleting anything.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    fn interrupted(&self) -> bool {
        self.shutdown
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    /// Execute every plan in order.
    pub fn execute(&self, plans: &[MergePlan]) -> Result<MergeSummary, MergeError> {
        self.registry.verify_all()?;
        info!(
            run_id = %self.run_id,
            plans = plans.len(),
            adapters = self.registry.len(),
            dry_run = self.dry_run,
            "starting merge run"
        );

        let mut summary = MergeSummary {
            plans: plans.len(),
            dry_run: self.dry_run,
            ..Default::default()
        };

        'plans: for plan in plans {
            if !self.identities.contains(&plan.main_id)? {
                warn!(
                    email = %plan.email,
                    main_id = %plan.main_id,
                    "canonical identity not found, skipping plan"
                );
                summary.plans_skipped += 1;
                continue;
            }

            for other_id in &plan.other_ids {
                if self.interrupted() {
                    warn!(run_id = %self.run_id, "interrupted, stopping before next pair");
                    summary.interrupted = true;
                    break 'plans;
                }
                if other_id == &plan.main_id {
                    warn!(email = %plan.email, id = %other_id, "pair merges an identity into itself, skipping");
                    continue;
                }

                summary.pairs += 1;
                if self.dry_run {
                    info!(email = %plan.email, main_id = %plan.main_id, other_id = %other_id, "would merge");
                    continue;
                }
                let state = self.execute_pair(plan, other_id, &mut summary)?;
                debug!(main_id = %plan.main_id, other_id = %other_id, state = %state, "pair finished");
            }
        }

        info!(
            run_id = %self.run_id,
            merged = summary.identities_merged,
            partially_failed = summary.pairs_partially_failed,
            deleted = summary.identities_deleted,
            "merge run finished"
        );
        Ok(summary)
    }

    /// Drive one pair as far as it can go in this run.
    pub fn execute_pair(
        &self,
        plan: &MergePlan,
        other_id: &str,
        summary: &mut MergeSummary,
    ) -> Result<PairState, MergeError> {
        let main_id = plan.main_id.as_str();
        let mut state = PairState::Pending;

        if self.log.has_succeeded(main_id, other_id, IDENTITY_COLLECTION)? {
            debug!(main_id, other_id, "pair already merged, skipping");
            summary.pairs_already_deleted += 1;
            return Ok(PairState::Deleted);
        }

        state = state.advance(PairState::Transferring)?;
        let mut failed = Vec::new();
        for adapter in self.registry.adapters() {
            let collection = adapter.collection();
            if self.log.has_succeeded(main_id, other_id, collection)? {
                debug!(collection, main_id, other_id, "transfer already recorded, skipping");
                summary.adapter_calls_skipped += 1;
                continue;
            }
            match adapter.transfer(main_id, other_id) {
                Ok(modified) => {
                    summary.records_reassigned += modified;
                    self.log.record(
                        &self.run_id,
                        &MergeOutcome::success(plan, other_id, collection, modified),
                    )?;
                }
                Err(e) => {
                    error!(collection, main_id, other_id, error = %e, "transfer failed");
                    self.log.record(
                        &self.run_id,
                        &MergeOutcome::failure(plan, other_id, collection, e.to_string()),
                    )?;
                    failed.push(collection);
                }
            }
        }

        if !failed.is_empty() {
            state = state.advance(PairState::PartiallyFailed)?;
            warn!(
                main_id,
                other_id,
                failed = %failed.join(","),
                "pair partially failed, identity kept"
            );
            summary.pairs_partially_failed += 1;
            return Ok(state);
        }

        state = state.advance(PairState::AllTransferred)?;
        match self.identities.remove(other_id) {
            Ok(removed) => {
                self.log.record(
                    &self.run_id,
                    &MergeOutcome::success(plan, other_id, IDENTITY_COLLECTION, removed),
                )?;
                state = state.advance(PairState::Deleted)?;
                info!(main_id, other_id, removed, "superseded identity deleted");
                summary.identities_merged += 1;
                summary.identities_deleted += removed;
            }
            Err(e) => {
                error!(main_id, other_id, error = %e, "delete failed");
                self.log.record(
                    &self.run_id,
                    &MergeOutcome::failure(plan, other_id, IDENTITY_COLLECTION, e.to_string()),
                )?;
                summary.delete_failures += 1;
            }
        }
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{DeleteError, StoreError, TransferError};
    use crate::transfer::OwnershipTransfer;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicU32;
    use std::sync::Mutex;

    type Events = Arc<Mutex<Vec<String>>>;

    struct FakeAdapter {
        name: &'static str,
        failures_left: AtomicU32,
        events: Events,
    }

    impl FakeAdapter {
        fn new(name: &'static str, failures: u32, events: &Events) -> Self {
            Self {
                name,
                failures_left: AtomicU32::new(failures),
                events: Arc::clone(events),
            }
        }
    }

    impl OwnershipTransfer for FakeAdapter {
        fn collection(&self) -> &str {
            self.name
        }
        fn label(&self) -> &str {
            self.name
        }
        fn transfer(&self, _main_id: &str, other_id: &str) -> Result<u64, TransferError> {
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                self.events
                    .lock()
                    .unwrap()
                    .push(format!("fail:{}:{}", self.name, other_id));
                return Err(TransferError::Rejected {
                    collection: self.name.into(),
                    detail: "simulated".into(),
                });
            }
            self.events
                .lock()
                .unwrap()
                .push(format!("ok:{}:{}", self.name, other_id));
            Ok(1)
        }
        fn count_owned(&self, _owner_id: &str) -> Result<u64, TransferError> {
            Ok(0)
        }
        fn verify(&self) -> Result<(), StoreError> {
            Ok(())
        }
    }

    struct FakeIdentities {
        present: Mutex<HashSet<String>>,
        fail_deletes: bool,
        events: Events,
    }

    impl FakeIdentities {
        fn new(ids: &[&str], events: &Events) -> Self {
            Self {
                present: Mutex::new(ids.iter().map(|s| s.to_string()).collect()),
                fail_deletes: false,
                events: Arc::clone(events),
            }
        }
    }

    impl IdentityRemover for FakeIdentities {
        fn contains(&self, id: &str) -> Result<bool, DeleteError> {
            Ok(self.present.lock().unwrap().contains(id))
        }
        fn remove(&self, id: &str) -> Result<u64, DeleteError> {
            if self.fail_deletes {
                return Err(DeleteError::Rejected {
                    id: id.into(),
                    detail: "simulated".into(),
                });
            }
            self.events.lock().unwrap().push(format!("delete:{}", id));
            Ok(self.present.lock().unwrap().remove(id) as u64)
        }
    }

    const NAMES: [&str; 3] = ["datasets", "teams", "areas"];

    fn registry(events: &Events, teams_failures: u32) -> TransferRegistry {
        TransferRegistry::new()
            .register(FakeAdapter::new(NAMES[0], 0, events))
            .register(FakeAdapter::new(NAMES[1], teams_failures, events))
            .register(FakeAdapter::new(NAMES[2], 0, events))
    }

    fn log() -> Database {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();
        db
    }

    fn plan(main: &str, others: &[&str]) -> MergePlan {
        MergePlan {
            email: "a@x.com".into(),
            main_id: main.into(),
            other_ids: others.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_state_transitions() {
        let s = PairState::Pending.advance(PairState::Transferring).unwrap();
        assert!(s.advance(PairState::Deleted).is_err());
        let s = s.advance(PairState::AllTransferred).unwrap();
        let s = s.advance(PairState::Deleted).unwrap();
        assert!(s.is_terminal());
        assert!(PairState::Pending.advance(PairState::AllTransferred).is_err());
        assert!(PairState::PartiallyFailed
            .advance(PairState::Deleted)
            .is_err());
        assert_eq!(PairState::AllTransferred.to_string(), "all_transferred");
    }

    #[test]
    fn test_successful_pair_is_deleted_after_all_transfers() {
        let events: Events = Arc::default();
        let registry = registry(&events, 0);
        let ids = FakeIdentities::new(&["1", "2", "3"], &events);
        let db = log();
        let executor = MergeExecutor::new(&registry, &ids, &db, "run-1");

        let summary = executor.execute(&[plan("1", &["2", "3"])]).unwrap();
        assert_eq!(summary.identities_merged, 2);
        assert_eq!(summary.identities_deleted, 2);
        assert_eq!(summary.records_reassigned, 6);
        assert!(summary.is_clean());
        assert!(ids.contains("1").unwrap());
        assert!(!ids.contains("2").unwrap());

        // Every delete comes after all adapter successes for that identity.
        let events = events.lock().unwrap();
        for (pos, event) in events.iter().enumerate() {
            if let Some(id) = event.strip_prefix("delete:") {
                for name in NAMES {
                    let ok = format!("ok:{}:{}", name, id);
                    assert!(events[..pos].contains(&ok), "{} missing before delete", ok);
                }
            }
        }
    }

    #[test]
    fn test_failed_adapter_keeps_identity_and_resume_retries_only_it() {
        let events: Events = Arc::default();
        let registry = registry(&events, 1);
        let ids = FakeIdentities::new(&["1", "2"], &events);
        let db = log();

        let first = MergeExecutor::new(&registry, &ids, &db, "run-1")
            .execute(&[plan("1", &["2"])])
            .unwrap();
        assert_eq!(first.pairs_partially_failed, 1);
        assert_eq!(first.identities_merged, 0);
        assert!(ids.contains("2").unwrap());
        assert!(!events.lock().unwrap().iter().any(|e| e.starts_with("delete:")));

        events.lock().unwrap().clear();
        let second = MergeExecutor::new(&registry, &ids, &db, "run-2")
            .execute(&[plan("1", &["2"])])
            .unwrap();
        assert_eq!(second.adapter_calls_skipped, 2);
        assert_eq!(second.identities_merged, 1);
        assert_eq!(
            *events.lock().unwrap(),
            vec!["ok:teams:2".to_string(), "delete:2".to_string()]
        );
        assert!(!ids.contains("2").unwrap());

        // A third run touches nothing.
        events.lock().unwrap().clear();
        let third = MergeExecutor::new(&registry, &ids, &db, "run-3")
            .execute(&[plan("1", &["2"])])
            .unwrap();
        assert_eq!(third.pairs_already_deleted, 1);
        assert!(events.lock().unwrap().is_empty());
    }

    #[test]
    fn test_failed_delete_is_retried() {
        let events: Events = Arc::default();
        let registry = registry(&events, 0);
        let mut ids = FakeIdentities::new(&["1", "2"], &events);
        ids.fail_deletes = true;
        let db = log();

        let first = MergeExecutor::new(&registry, &ids, &db, "run-1")
            .execute(&[plan("1", &["2"])])
            .unwrap();
        assert_eq!(first.delete_failures, 1);
        assert!(!first.is_clean());

        ids.fail_deletes = false;
        let second = MergeExecutor::new(&registry, &ids, &db, "run-2")
            .execute(&[plan("1", &["2"])])
            .unwrap();
        assert_eq!(second.adapter_calls_skipped, 3);
        assert_eq!(second.identities_merged, 1);
    }

    #[test]
    fn test_missing_main_skips_plan() {
        let events: Events = Arc::default();
        let registry = registry(&events, 0);
        let ids = FakeIdentities::new(&["2"], &events);
        let db = log();
        let summary = MergeExecutor::new(&registry, &ids, &db, "run-1")
            .execute(&[plan("1", &["2"])])
            .unwrap();
        assert_eq!(summary.plans_skipped, 1);
        assert!(events.lock().unwrap().is_empty());
        assert!(ids.contains("2").unwrap());
    }

    #[test]
    fn test_self_pair_and_dry_run() {
        let events: Events = Arc::default();
        let registry = registry(&events, 0);
        let ids = FakeIdentities::new(&["1", "2"], &events);
        let db = log();

        let summary = MergeExecutor::new(&registry, &ids, &db, "run-1")
            .dry_run(true)
            .execute(&[plan("1", &["1", "2"])])
            .unwrap();
        assert!(summary.dry_run);
        assert_eq!(summary.pairs, 1);
        assert!(events.lock().unwrap().is_empty());
        assert!(ids.contains("2").unwrap());
    }

    #[test]
    fn test_shutdown_stops_between_pairs() {
        let events: Events = Arc::default();
        let registry = registry(&events, 0);
        let ids = FakeIdentities::new(&["1", "2", "3"], &events);
        let db = log();
        let flag = Arc::new(AtomicBool::new(true));

        let summary = MergeExecutor::new(&registry, &ids, &db, "run-1")
            .with_shutdown(Arc::clone(&flag))
            .execute(&[plan("1", &["2", "3"])])
            .unwrap();
        assert!(summary.interrupted);
        assert_eq!(summary.pairs, 0);
        assert!(ids.contains("2").unwrap());
    }
}
