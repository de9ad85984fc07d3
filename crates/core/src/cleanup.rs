//! Pre-merge cleanup: delete identities from retired providers and
//! unusable local accounts.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::CleanupRule;
use crate::db::Database;
use crate::errors::CoreError;
use crate::models::AuditEntry;
use crate::source::IdentitySource;
use crate::store::RecordStore;

/// Per-rule result of a cleanup pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RuleResult {
    pub provider: String,
    pub missing_email: bool,
    /// Matched identities (deleted unless dry run).
    pub matched: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CleanupSummary {
    pub before: u64,
    pub after: u64,
    pub dry_run: bool,
    pub rules: Vec<RuleResult>,
}

/// Apply each rule in order. With `dry_run` only counts are taken.
pub fn run_cleanup(
    store: &RecordStore,
    db: &Database,
    rules: &[CleanupRule],
    dry_run: bool,
) -> Result<CleanupSummary, CoreError> {
    let before = store.count_identities()?;
    info!(identities = before, dry_run, "starting cleanup");

    let mut results = Vec::with_capacity(rules.len());
    for rule in rules {
        let matched = if dry_run {
            store.count_matching(rule)?
        } else {
            store.delete_matching(rule)?
        };
        info!(
            provider = %rule.provider,
            missing_email = rule.missing_email,
            matched,
            dry_run,
            "cleanup rule applied"
        );
        results.push(RuleResult {
            provider: rule.provider.clone(),
            missing_email: rule.missing_email,
            matched,
        });
    }

    let after = store.count_identities()?;
    let summary = CleanupSummary {
        before,
        after,
        dry_run,
        rules: results,
    };
    if !dry_run {
        let details = serde_json::to_string(&summary).unwrap_or_default();
        db.insert_audit_entry(&AuditEntry::success("cleanup", &details))?;
    }
    info!(before, after, "cleanup finished");
    Ok(summary)
}
