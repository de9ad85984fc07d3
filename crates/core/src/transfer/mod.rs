//! Ownership transfer adapters, one per dependent collection.
//!
//! An adapter re-points every record owned by a superseded identity at the
//! canonical identity. The set of adapters is fixed when the
//! [`TransferRegistry`] is built and cannot change during a run.

pub mod foreign_key;
pub mod team_membership;

use std::sync::Arc;

use tracing::{debug, info};

use crate::config::{CollectionConfig, OwnershipKind};
use crate::errors::{StoreError, TransferError};
use crate::store::RecordStore;

pub use foreign_key::ForeignKeyTransfer;
pub use team_membership::ConfirmedMembersTransfer;

/// Moves ownership in one dependent collection from one identity to another.
pub trait OwnershipTransfer: Send + Sync {
    /// Stable collection name, used as the key in the outcome log.
    fn collection(&self) -> &str;

    /// Human-readable label, used as the report column header.
    fn label(&self) -> &str;

    /// Transfer everything owned by `other_id` to `main_id`, returning the
    /// number of records modified. Zero matching records is a success.
    fn transfer(&self, main_id: &str, other_id: &str) -> Result<u64, TransferError>;

    /// Number of records currently owned by `owner_id`.
    fn count_owned(&self, owner_id: &str) -> Result<u64, TransferError>;

    /// Check that the backing table and owner field exist.
    fn verify(&self) -> Result<(), StoreError>;
}

/// The closed, ordered set of adapters used by one run.
#[derive(Default)]
pub struct TransferRegistry {
    adapters: Vec<Box<dyn OwnershipTransfer>>,
}

impl TransferRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an adapter. Adapters run in registration order.
    pub fn register<T: OwnershipTransfer + 'static>(mut self, adapter: T) -> Self {
        debug!(collection = adapter.collection(), "registered transfer adapter");
        self.adapters.push(Box::new(adapter));
        self
    }

    /// Build one adapter per configured collection.
    pub fn from_configs(
        store: Arc<RecordStore>,
        configs: &[CollectionConfig],
    ) -> Result<Self, StoreError> {
        let mut registry = Self::new();
        for config in configs {
            registry = match config.kind {
                OwnershipKind::ForeignKey => {
                    registry.register(ForeignKeyTransfer::new(Arc::clone(&store), config)?)
                }
                OwnershipKind::ConfirmedMembers => {
                    registry.register(ConfirmedMembersTransfer::new(Arc::clone(&store), config)?)
                }
            };
        }
        info!(adapters = registry.len(), "transfer registry built");
        Ok(registry)
    }

    /// The eight standard dependent collections.
    pub fn standard(store: Arc<RecordStore>) -> Result<Self, StoreError> {
        Self::from_configs(store, &CollectionConfig::standard())
    }

    pub fn adapters(&self) -> &[Box<dyn OwnershipTransfer>] {
        &self.adapters
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    /// Collection names in execution order.
    pub fn collections(&self) -> Vec<&str> {
        self.adapters.iter().map(|a| a.collection()).collect()
    }

    /// Verify every adapter against the store schema.
    pub fn verify_all(&self) -> Result<(), StoreError> {
        for adapter in &self.adapters {
            adapter.verify()?;
        }
        debug!(adapters = self.adapters.len(), "transfer adapters verified");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> Arc<RecordStore> {
        let store = RecordStore::in_memory().unwrap();
        store.initialize().unwrap();
        Arc::new(store)
    }

    #[test]
    fn test_standard_registry_order() {
        let registry = TransferRegistry::standard(store()).unwrap();
        assert_eq!(
            registry.collections(),
            vec![
                "datasets",
                "layers",
                "widgets",
                "subscriptions",
                "teams",
                "vocabularies",
                "areas",
                "metadata"
            ]
        );
        registry.verify_all().unwrap();
        let labels: Vec<_> = registry.adapters().iter().map(|a| a.label()).collect();
        assert_eq!(labels[4], "FW Teams");
    }

    #[test]
    fn test_verify_reports_misspelled_owner_field() {
        let mut configs = CollectionConfig::standard();
        configs[0].owner_field = "userI".into();
        let registry = TransferRegistry::from_configs(store(), &configs).unwrap();
        match registry.verify_all() {
            Err(StoreError::MissingColumn { collection, column, .. }) => {
                assert_eq!(collection, "datasets");
                assert_eq!(column, "userI");
            }
            other => panic!("expected MissingColumn, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_invalid_table_name_is_rejected() {
        let mut configs = CollectionConfig::standard();
        configs[1].table = "layers; DROP TABLE users".into();
        assert!(matches!(
            TransferRegistry::from_configs(store(), &configs),
            Err(StoreError::InvalidIdentifier(_))
        ));
    }
}
