//! usermerge core library.
//!
//! This crate provides the components for finding duplicate user identities
//! and merging them: configuration, the record store, duplicate grouping,
//! merge plans, per-collection ownership transfer, the resumable merge
//! executor, and its outcome log.

pub mod cleanup;
pub mod config;
pub mod context;
pub mod dashboards;
pub mod db;
pub mod errors;
pub mod executor;
pub mod grouping;
pub mod models;
pub mod plan;
pub mod report;
pub mod source;
pub mod store;
pub mod transfer;

// Re-exports for convenience.
pub use config::AppConfig;
pub use context::RunContext;
pub use db::Database;
pub use executor::{MergeExecutor, MergeSummary};
pub use store::RecordStore;
pub use transfer::TransferRegistry;
