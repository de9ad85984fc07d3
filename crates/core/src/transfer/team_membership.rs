//! Transfer for teams, which reference members inside a nested JSON array.
//!
//! Each team document stores `[{"id": ..., "email": ...}, ...]` in its
//! members column. Every element whose `id` is the superseded identity is
//! rewritten to the canonical one. When the canonical identity is already a
//! member, the superseded element is dropped instead so no team lists the
//! same member twice.

use std::sync::Arc;

use rusqlite::params;
use serde_json::Value;
use tracing::{debug, info};

use super::OwnershipTransfer;
use crate::config::{is_identifier, CollectionConfig};
use crate::errors::{StoreError, TransferError};
use crate::store::RecordStore;

/// Rewrites nested member references in team documents.
pub struct ConfirmedMembersTransfer {
    store: Arc<RecordStore>,
    collection: String,
    label: String,
    table: String,
    members_field: String,
}

impl ConfirmedMembersTransfer {
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
            members_field: config.owner_field.clone(),
        })
    }

    fn query_error(&self, source: rusqlite::Error) -> TransferError {
        TransferError::Query {
            collection: self.collection.clone(),
            source,
        }
    }

    fn malformed(&self, document: &str, detail: impl ToString) -> TransferError {
        TransferError::MalformedDocument {
            collection: self.collection.clone(),
            document: document.to_string(),
            detail: detail.to_string(),
        }
    }

    /// SQL filter selecting documents that list `?1` as a member.
    fn member_filter(&self) -> String {
        format!(
            "EXISTS (SELECT 1 FROM json_each(\"{table}\".\"{field}\") \
             WHERE json_extract(json_each.value, '$.id') = ?1)",
            table = self.table,
            field = self.members_field
        )
    }
}

/// Rewrite the member list of one document. Returns `None` when nothing in
/// it refers to `other_id`.
fn rewrite_members(members: &[Value], main_id: &str, other_id: &str) -> Option<Vec<Value>> {
    let member_id = |m: &Value| m.get("id").and_then(Value::as_str).map(str::to_owned);
    if !members.iter().any(|m| member_id(m).as_deref() == Some(other_id)) {
        return None;
    }

    let mut main_present = members
        .iter()
        .any(|m| member_id(m).as_deref() == Some(main_id));
    let mut rewritten = Vec::with_capacity(members.len());
    for member in members {
        if member_id(member).as_deref() != Some(other_id) {
            rewritten.push(member.clone());
            continue;
        }
        if main_present {
            continue;
        }
        let mut member = member.clone();
        if let Some(obj) = member.as_object_mut() {
            obj.insert("id".into(), Value::String(main_id.to_string()));
        }
        rewritten.push(member);
        main_present = true;
    }
    Some(rewritten)
}

impl OwnershipTransfer for ConfirmedMembersTransfer {
    fn collection(&self) -> &str {
        &self.collection
    }

    fn label(&self) -> &str {
        &self.label
    }

    fn transfer(&self, main_id: &str, other_id: &str) -> Result<u64, TransferError> {
        let mut conn = self.store.conn();
        let tx = conn.transaction().map_err(|e| self.query_error(e))?;

        let docs: Vec<(String, String)> = {
            let sql = format!(
                "SELECT id, \"{field}\" FROM \"{table}\" WHERE {filter} ORDER BY id",
                field = self.members_field,
                table = self.table,
                filter = self.member_filter()
            );
            let mut stmt = tx.prepare(&sql).map_err(|e| self.query_error(e))?;
            let rows = stmt
                .query_map(params![other_id], |row| Ok((row.get(0)?, row.get(1)?)))
                .map_err(|e| self.query_error(e))?;
            let docs = rows
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| self.query_error(e))?;
            docs
        };

        let update = format!(
            "UPDATE \"{}\" SET \"{}\" = ?1 WHERE id = ?2",
            self.table, self.members_field
        );
        let mut modified = 0u64;
        for (doc_id, raw) in docs {
            let members: Vec<Value> =
                serde_json::from_str(&raw).map_err(|e| self.malformed(&doc_id, e))?;
            let Some(rewritten) = rewrite_members(&members, main_id, other_id) else {
                continue;
            };
            let encoded =
                serde_json::to_string(&rewritten).map_err(|e| self.malformed(&doc_id, e))?;
            tx.execute(&update, params![encoded, doc_id])
                .map_err(|e| self.query_error(e))?;
            debug!(team = %doc_id, main_id, other_id, "rewrote confirmed member");
            modified += 1;
        }
        tx.commit().map_err(|e| self.query_error(e))?;

        info!(
            collection = %self.label,
            modified,
            main_id,
            other_id,
            "transferred team membership"
        );
        Ok(modified)
    }

    fn count_owned(&self, owner_id: &str) -> Result<u64, TransferError> {
        let sql = format!(
            "SELECT COUNT(*) FROM \"{}\" WHERE {}",
            self.table,
            self.member_filter()
        );
        let count: i64 = self
            .store
            .conn()
            .query_row(&sql, params![owner_id], |row| row.get(0))
            .map_err(|e| self.query_error(e))?;
        Ok(count as u64)
    }

    fn verify(&self) -> Result<(), StoreError> {
        for column in ["id", self.members_field.as_str()] {
            if !self.store.column_exists(&self.table, column)? {
                return Err(StoreError::MissingColumn {
                    collection: self.collection.clone(),
                    table: self.table.clone(),
                    column: column.to_string(),
                });
            }
        }
        Ok(())
    }
}
