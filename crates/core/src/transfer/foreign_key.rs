//! Transfer for collections owned through a flat owner column.

use std::sync::Arc;

use rusqlite::params;
use tracing::info;

use super::OwnershipTransfer;
use crate::config::{is_identifier, CollectionConfig};
use crate::errors::{StoreError, TransferError};
use crate::store::RecordStore;

/// Rewrites `owner_field = other` to `owner_field = main` in one table.
pub struct ForeignKeyTransfer {
    store: Arc<RecordStore>,
    collection: String,
    label: String,
    table: String,
    owner_field: String,
}

impl ForeignKeyTransfer {
    pub fn new(store: Arc<RecordStore>, config: &CollectionConfig) -> Result<Self, StoreError> {
        for ident in [&config.table, &config.owner_field] {
            if !is_identifier(ident) {
                return Err(StoreError::InvalidIdentifier(ident.clone()));
            }
        }
        Ok(Self {
            store,
            collection: config.name.clone(),
            label: config.label.clone(),
            table: config.table.clone(),
            owner_field: config.owner_field.clone(),
        })
    }

    fn query_error(&self, source: rusqlite::Error) -> TransferError {
        TransferError::Query {
            collection: self.collection.clone(),
            source,
        }
    }
}

impl OwnershipTransfer for ForeignKeyTransfer {
    fn collection(&self) -> &str {
        &self.collection
    }

    fn label(&self) -> &str {
        &self.label
    }

    fn transfer(&self, main_id: &str, other_id: &str) -> Result<u64, TransferError> {
        let sql = format!(
            "UPDATE \"{table}\" SET \"{field}\" = ?1 WHERE \"{field}\" = ?2",
            table = self.table,
            field = self.owner_field
        );
        let modified = self
            .store
            .conn()
            .execute(&sql, params![main_id, other_id])
            .map_err(|e| self.query_error(e))?;
        info!(
            collection = %self.label,
            modified,
            main_id,
            other_id,
            "transferred ownership"
        );
        Ok(modified as u64)
    }

    fn count_owned(&self, owner_id: &str) -> Result<u64, TransferError> {
        let sql = format!(
            "SELECT COUNT(*) FROM \"{}\" WHERE \"{}\" = ?1",
            self.table, self.owner_field
        );
        let count: i64 = self
            .store
            .conn()
            .query_row(&sql, params![owner_id], |row| row.get(0))
            .map_err(|e| self.query_error(e))?;
        Ok(count as u64)
    }

    fn verify(&self) -> Result<(), StoreError> {
        if self.store.column_exists(&self.table, &self.owner_field)? {
            Ok(())
        } else {
            Err(StoreError::MissingColumn {
                collection: self.collection.clone(),
                table: self.table.clone(),
                column: self.owner_field.clone(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OwnershipKind;

    fn datasets(store: &Arc<RecordStore>) -> ForeignKeyTransfer {
        let config = CollectionConfig {
            name: "datasets".into(),
            label: "Datasets".into(),
            table: "datasets".into(),
            owner_field: "user_id".into(),
            kind: OwnershipKind::ForeignKey,
        };
        ForeignKeyTransfer::new(Arc::clone(store), &config).unwrap()
    }

    fn seeded() -> Arc<RecordStore> {
        let store = RecordStore::in_memory().unwrap();
        store.initialize().unwrap();
        store.insert_owned("datasets", "d1", "u1").unwrap();
        store.insert_owned("datasets", "d2", "u2").unwrap();
        store.insert_owned("datasets", "d3", "u2").unwrap();
        store.insert_owned("datasets", "d4", "u3").unwrap();
        Arc::new(store)
    }

    #[test]
    fn test_transfer_moves_every_owned_record() {
        let store = seeded();
        let adapter = datasets(&store);
        assert_eq!(adapter.transfer("u1", "u2").unwrap(), 2);
        assert_eq!(adapter.count_owned("u1").unwrap(), 3);
        assert_eq!(adapter.count_owned("u2").unwrap(), 0);
        assert_eq!(adapter.count_owned("u3").unwrap(), 1);
        assert_eq!(store.count_rows("datasets").unwrap(), 4);
    }

    #[test]
    fn test_transfer_with_nothing_owned_is_ok() {
        let store = seeded();
        let adapter = datasets(&store);
        assert_eq!(adapter.transfer("u1", "nobody").unwrap(), 0);
        // Re-running a completed transfer changes nothing.
        adapter.transfer("u1", "u2").unwrap();
        assert_eq!(adapter.transfer("u1", "u2").unwrap(), 0);
        assert_eq!(adapter.count_owned("u1").unwrap(), 3);
    }

    #[test]
    fn test_missing_table_fails_transfer() {
        let store = Arc::new(RecordStore::in_memory().unwrap());
        let adapter = datasets(&store);
        let err = adapter.transfer("u1", "u2").unwrap_err();
        assert_eq!(err.collection(), "datasets");
        assert!(adapter.verify().is_err());
    }
}
