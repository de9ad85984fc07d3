//! Identity record access used by the grouper and the merge executor.
//!
//! [`IdentitySource`] is the paginated read side; [`IdentityRemover`] is the
//! narrow write side the executor needs to retire superseded identities.

use std::collections::HashSet;

use tracing::{debug, info};

use crate::errors::{DeleteError, SourceReadError};
use crate::models::IdentityRecord;

/// Paginated read access to the identity collection.
///
/// Pages follow a stable total order on `id`: `fetch_page(after, n)` returns
/// up to `n` identities with `id > after`, ascending.
pub trait IdentitySource {
    fn fetch_page(
        &self,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<IdentityRecord>, SourceReadError>;

    fn count_identities(&self) -> Result<u64, SourceReadError>;
}

/// Existence checks and deletion of identity records.
pub trait IdentityRemover {
    fn contains(&self, id: &str) -> Result<bool, DeleteError>;

    /// Delete one identity, returning the number of records removed. Removing
    /// an identity that is already gone returns `Ok(0)`.
    fn remove(&self, id: &str) -> Result<u64, DeleteError>;
}

/// Read every identity by exhaustive keyset pagination.
///
/// Fails if a page does not advance past its cursor or repeats an id, since
/// either would mean records were skipped or read twice.
pub fn fetch_all(
    source: &dyn IdentitySource,
    page_size: usize,
) -> Result<Vec<IdentityRecord>, SourceReadError> {
    let page_size = page_size.max(1);
    let mut records: Vec<IdentityRecord> = Vec::new();
    let mut seen = HashSet::new();
    let mut cursor: Option<String> = None;
    let mut page_number = 0usize;

    loop {
        let page = source.fetch_page(cursor.as_deref(), page_size)?;
        page_number += 1;
        debug!(page = page_number, len = page.len(), "fetched identity page");

        let Some(last) = page.last() else {
            break;
        };
        if let Some(ref after) = cursor {
            if last.id.as_str() <= after.as_str() {
                return Err(SourceReadError::Page {
                    after: after.clone(),
                    detail: "page did not advance past its cursor".into(),
                });
            }
        }
        let next_cursor = last.id.clone();
        let short_page = page.len() < page_size;

        for record in page {
            if !seen.insert(record.id.clone()) {
                return Err(SourceReadError::Page {
                    after: cursor.clone().unwrap_or_default(),
                    detail: format!("identity '{}' returned twice", record.id),
                });
            }
            records.push(record);
        }

        if short_page {
            break;
        }
        cursor = Some(next_cursor);
    }

    info!(count = records.len(), pages = page_number, "read all identities");
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct VecSource {
        records: Vec<IdentityRecord>,
        repeat_first: bool,
    }

    impl IdentitySource for VecSource {
        fn fetch_page(
            &self,
            after: Option<&str>,
            limit: usize,
        ) -> Result<Vec<IdentityRecord>, SourceReadError> {
            if self.repeat_first {
                return Ok(self.records.iter().take(limit).cloned().collect());
            }
            Ok(self
                .records
                .iter()
                .filter(|r| after.map_or(true, |a| r.id.as_str() > a))
                .take(limit)
                .cloned()
                .collect())
        }

        fn count_identities(&self) -> Result<u64, SourceReadError> {
            Ok(self.records.len() as u64)
        }
    }

    fn records(n: usize) -> Vec<IdentityRecord> {
        (0..n)
            .map(|i| IdentityRecord::new(format!("u{:03}", i), Some("a@x.com"), "local", ""))
            .collect()
    }

    #[test]
    fn test_fetch_all_reads_every_page() {
        let source = VecSource {
            records: records(7),
            repeat_first: false,
        };
        let all = fetch_all(&source, 3).unwrap();
        assert_eq!(all.len(), 7);
        assert_eq!(all[6].id, "u006");
    }

    #[test]
    fn test_fetch_all_exact_page_multiple() {
        let source = VecSource {
            records: records(6),
            repeat_first: false,
        };
        assert_eq!(fetch_all(&source, 3).unwrap().len(), 6);
    }

    #[test]
    fn test_fetch_all_empty() {
        let source = VecSource {
            records: Vec::new(),
            repeat_first: false,
        };
        assert!(fetch_all(&source, 3).unwrap().is_empty());
    }

    #[test]
    fn test_fetch_all_rejects_stuck_pages() {
        let source = VecSource {
            records: records(4),
            repeat_first: true,
        };
        let result = fetch_all(&source, 2);
        assert!(matches!(result, Err(SourceReadError::Page { .. })));
    }
}
