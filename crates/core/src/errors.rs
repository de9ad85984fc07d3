//! Error types for the usermerge core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Source(#[from] SourceReadError),

    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error(transparent)]
    Delete(#[from] DeleteError),

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Merge(#[from] MergeError),

    #[error(transparent)]
    Report(#[from] ReportError),

    #[error(transparent)]
    Counting(#[from] CountingError),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A required environment variable is not set.
    #[error("required environment variable '{var}' is not set (referenced by config field '{field}')")]
    EnvVarMissing {
        var: String,
        field: String,
    },

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue {
        field: String,
        detail: String,
    },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Outcome-log database errors
// ---------------------------------------------------------------------------

/// Errors from the SQLite outcome-log database.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Underlying rusqlite error.
    #[error("database error: {0}")]
    SqliteError(#[from] rusqlite::Error),

    /// A migration failed.
    #[error("database migration failed (version {version}): {detail}")]
    MigrationFailed {
        version: u32,
        detail: String,
    },

    /// A record was not found.
    #[error("{entity} not found: {id}")]
    NotFound {
        entity: String,
        id: String,
    },

    /// Generic I/O error (e.g. file permissions).
    #[error("database I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Record store errors
// ---------------------------------------------------------------------------

/// Errors from opening or maintaining the backing record store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying rusqlite error.
    #[error("record store error: {0}")]
    SqliteError(#[from] rusqlite::Error),

    /// The store file does not exist.
    #[error("record store not found at '{0}'")]
    NotFound(String),

    /// A table or column name is not a plain SQL identifier.
    #[error("invalid identifier '{0}'")]
    InvalidIdentifier(String),

    /// A collection or owner field is missing from the store schema.
    #[error("collection '{collection}' has no column '{column}' in table '{table}'")]
    MissingColumn {
        collection: String,
        table: String,
        column: String,
    },
}

// ---------------------------------------------------------------------------
// Identity source errors
// ---------------------------------------------------------------------------

/// Paging or connectivity failure while reading identities. Always fatal.
#[derive(Debug, Error)]
pub enum SourceReadError {
    /// The underlying store query failed.
    #[error("failed to read identities: {0}")]
    Query(#[from] rusqlite::Error),

    /// A page could not be fetched.
    #[error("failed to fetch identity page after '{after}': {detail}")]
    Page {
        after: String,
        detail: String,
    },
}

// ---------------------------------------------------------------------------
// Transfer errors
// ---------------------------------------------------------------------------

/// An ownership transfer failed for one collection and one pair.
#[derive(Debug, Error)]
pub enum TransferError {
    /// The update statement failed.
    #[error("[{collection}] update failed: {source}")]
    Query {
        collection: String,
        #[source]
        source: rusqlite::Error,
    },

    /// A nested membership document could not be decoded or encoded.
    #[error("[{collection}] malformed document '{document}': {detail}")]
    MalformedDocument {
        collection: String,
        document: String,
        detail: String,
    },

    /// The adapter refused the call (used by instrumented adapters in tests
    /// and by stores that report a non-ok acknowledgement).
    #[error("[{collection}] transfer rejected: {detail}")]
    Rejected {
        collection: String,
        detail: String,
    },
}

impl TransferError {
    /// Name of the collection whose adapter failed.
    pub fn collection(&self) -> &str {
        match self {
            Self::Query { collection, .. }
            | Self::MalformedDocument { collection, .. }
            | Self::Rejected { collection, .. } => collection,
        }
    }
}

// ---------------------------------------------------------------------------
// Delete errors
// ---------------------------------------------------------------------------

/// Deletion of a superseded identity failed after a full transfer.
#[derive(Debug, Error)]
pub enum DeleteError {
    /// The delete statement failed.
    #[error("failed to delete identity '{id}': {source}")]
    Query {
        id: String,
        #[source]
        source: rusqlite::Error,
    },

    /// The store refused the delete.
    #[error("delete of identity '{id}' rejected: {detail}")]
    Rejected {
        id: String,
        detail: String,
    },
}

// ---------------------------------------------------------------------------
// Plan errors
// ---------------------------------------------------------------------------

/// Errors from building or loading merge plans.
#[derive(Debug, Error)]
pub enum PlanError {
    /// Internal invariant violated: a group cannot produce a plan.
    #[error("invalid duplicate group for '{email}': {detail}")]
    InvalidGroup {
        email: String,
        detail: String,
    },

    /// The plan file could not be read or parsed.
    #[error("plan file error at '{path}': {detail}")]
    File {
        path: String,
        detail: String,
    },

    /// A required column is missing from the plan file header.
    #[error("plan file is missing the '{0}' column")]
    MissingColumn(String),

    /// Rows for one email are not contiguous.
    #[error("email '{email}' reappears at row {row} after a different email; the plan file must be sorted by email")]
    NonContiguousEmail {
        email: String,
        row: usize,
    },

    /// CSV decoding error.
    #[error("plan file CSV error: {0}")]
    Csv(#[from] csv::Error),
}

// ---------------------------------------------------------------------------
// Merge executor errors
// ---------------------------------------------------------------------------

/// Batch-level errors from the merge executor. Per-pair failures are never
/// reported through this type; they are recorded as outcomes instead.
#[derive(Debug, Error)]
pub enum MergeError {
    /// The outcome log could not be read or written.
    #[error("outcome log error: {0}")]
    OutcomeLog(#[from] DatabaseError),

    /// A pair state transition was invalid.
    #[error("invalid pair state transition from {from} to {to}")]
    InvalidStateTransition {
        from: String,
        to: String,
    },

    /// The canonical identity lookup failed at the connection level.
    #[error("identity store error: {0}")]
    IdentityStore(#[from] DeleteError),

    /// Adapter verification failed before the run started.
    #[error("transfer registry verification failed: {0}")]
    Registry(#[from] StoreError),
}

// ---------------------------------------------------------------------------
// Report errors
// ---------------------------------------------------------------------------

/// Errors from writing CSV reports.
#[derive(Debug, Error)]
pub enum ReportError {
    /// CSV encoding error.
    #[error("report CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// I/O error creating or flushing a report file.
    #[error("report I/O error at '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

// ---------------------------------------------------------------------------
// Counting service errors
// ---------------------------------------------------------------------------

/// Errors from the external dashboard counting service.
#[derive(Debug, Error)]
pub enum CountingError {
    /// HTTP-level transport error.
    #[error("counting service HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// The service returned a non-success status code.
    #[error("counting service error (HTTP {status}): {body}")]
    ApiError {
        status: u16,
        body: String,
    },

    /// The response did not contain a usable count.
    #[error("counting service response parse error: {0}")]
    ParseError(String),

    /// An owned-record count through a transfer adapter failed.
    #[error(transparent)]
    Transfer(#[from] TransferError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let err = TransferError::Rejected {
            collection: "teams".into(),
            detail: "simulated".into(),
        };
        assert_eq!(err.to_string(), "[teams] transfer rejected: simulated");
        assert_eq!(err.collection(), "teams");

        let err = PlanError::NonContiguousEmail {
            email: "a@x.com".into(),
            row: 7,
        };
        assert!(err.to_string().contains("row 7"));

        let err = ConfigError::EnvVarMissing {
            var: "DASHBOARD_TOKEN".into(),
            field: "dashboards.token_env".into(),
        };
        assert!(err.to_string().contains("DASHBOARD_TOKEN"));

        let err = MergeError::InvalidStateTransition {
            from: "transferring".into(),
            to: "deleted".into(),
        };
        assert_eq!(
            err.to_string(),
            "invalid pair state transition from transferring to deleted"
        );
    }

    #[test]
    fn test_core_error_from_subsystem() {
        let plan_err = PlanError::InvalidGroup {
            email: "a@x.com".into(),
            detail: "single member".into(),
        };
        let core_err: CoreError = plan_err.into();
        assert!(matches!(core_err, CoreError::Plan(_)));

        let db_err = DatabaseError::NotFound {
            entity: "merge_run".into(),
            id: "abc".into(),
        };
        let core_err: CoreError = MergeError::from(db_err).into();
        assert!(matches!(core_err, CoreError::Merge(MergeError::OutcomeLog(_))));
    }
}
