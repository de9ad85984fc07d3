//! Domain model types used throughout usermerge.
//!
//! These types bridge the grouper, the plan builder, the merge executor, and
//! the outcome log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Name under which identity deletions are recorded in the outcome log.
pub const IDENTITY_COLLECTION: &str = "users";

/// Provider whose identities are preferred as the canonical merge target.
pub const LOCAL_PROVIDER: &str = "local";

// ---------------------------------------------------------------------------
// Identity records
// ---------------------------------------------------------------------------

/// A user identity as read from the identity collection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IdentityRecord {
    pub id: String,
    pub email: Option<String>,
    pub provider: String,
    pub provider_id: String,
}

impl IdentityRecord {
    pub fn new(
        id: impl Into<String>,
        email: Option<&str>,
        provider: impl Into<String>,
        provider_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            email: email.map(str::to_string),
            provider: provider.into(),
            provider_id: provider_id.into(),
        }
    }

    /// Whether the record carries a usable (non-blank) email.
    pub fn has_email(&self) -> bool {
        self.email.as_deref().is_some_and(|e| !e.trim().is_empty())
    }

    /// Whether this identity was created through local sign-up.
    pub fn is_local(&self) -> bool {
        self.provider == LOCAL_PROVIDER
    }
}

// ---------------------------------------------------------------------------
// Groups and plans
// ---------------------------------------------------------------------------

/// A set of identities sharing one normalized email, canonical member first.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DuplicateGroup {
    pub email: String,
    pub members: Vec<IdentityRecord>,
}

/// Merge one or more superseded identities into a canonical one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MergePlan {
    pub email: String,
    pub main_id: String,
    pub other_ids: Vec<String>,
}

impl MergePlan {
    /// Number of (main, other) pairs this plan expands to.
    pub fn pair_count(&self) -> usize {
        self.other_ids.len()
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Result of one adapter call (or the identity deletion) for one pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MergeOutcome {
    pub email: String,
    pub main_id: String,
    pub other_id: String,
    pub collection: String,
    pub success: bool,
    pub modified_count: u64,
    pub error: Option<String>,
}

impl MergeOutcome {
    pub fn success(plan: &MergePlan, other_id: &str, collection: &str, modified: u64) -> Self {
        Self {
            email: plan.email.clone(),
            main_id: plan.main_id.clone(),
            other_id: other_id.to_string(),
            collection: collection.to_string(),
            success: true,
            modified_count: modified,
            error: None,
        }
    }

    pub fn failure(plan: &MergePlan, other_id: &str, collection: &str, error: String) -> Self {
        Self {
            email: plan.email.clone(),
            main_id: plan.main_id.clone(),
            other_id: other_id.to_string(),
            collection: collection.to_string(),
            success: false,
            modified_count: 0,
            error: Some(error),
        }
    }
}

// ---------------------------------------------------------------------------
// Audit Entry
// ---------------------------------------------------------------------------

/// An audit-log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub action: String,
    pub details: String,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
}

impl AuditEntry {
    /// Create a success audit entry.
    pub fn success(action: &str, details: &str) -> Self {
        Self {
            action: action.to_string(),
            details: details.to_string(),
            success: true,
            timestamp: Utc::now(),
        }
    }

    /// Create a failure audit entry.
    pub fn failure(action: &str, details: &str) -> Self {
        Self {
            action: action.to_string(),
            details: details.to_string(),
            success: false,
            timestamp: Utc::now(),
        }
    }
}
