//! Reader for the persisted merge-plan artifact.
//!
//! The file is the duplicates report: a CSV whose header contains at least
//! `Id` and `Email`. Rows sharing an email must be contiguous. The first row
//! of each run is the canonical identity, the following rows are superseded.
//! Runs of a single row carry nothing to merge and produce no plan.

use std::collections::HashSet;
use std::io::Read;
use std::path::Path;

use tracing::{debug, info};

use super::build_plan;
use crate::errors::PlanError;
use crate::models::{DuplicateGroup, IdentityRecord, MergePlan};

/// Load merge plans from a CSV file.
pub fn load<P: AsRef<Path>>(path: P) -> Result<Vec<MergePlan>, PlanError> {
    let path = path.as_ref();
    info!(path = %path.display(), "loading merge plan file");
    if !path.exists() {
        return Err(PlanError::File {
            path: path.display().to_string(),
            detail: "file not found".into(),
        });
    }
    let reader = csv::Reader::from_path(path)?;
    from_csv(reader)
}

/// Parse merge plans from any CSV source.
pub fn from_reader<R: Read>(reader: R) -> Result<Vec<MergePlan>, PlanError> {
    from_csv(csv::Reader::from_reader(reader))
}

fn from_csv<R: Read>(mut reader: csv::Reader<R>) -> Result<Vec<MergePlan>, PlanError> {
    let headers = reader.headers()?.clone();
    let column = |name: &str| {
        headers
            .iter()
            .position(|h| h.trim() == name)
            .ok_or_else(|| PlanError::MissingColumn(name.to_string()))
    };
    let id_col = column("Id")?;
    let email_col = column("Email")?;
    let provider_col = column("Provider").ok();

    let mut plans = Vec::new();
    let mut finished: HashSet<String> = HashSet::new();
    let mut current: Option<DuplicateGroup> = None;

    for (idx, row) in reader.records().enumerate() {
        let row = row?;
        // Header is line 1.
        let line = idx + 2;
        let id = row.get(id_col).unwrap_or("").trim();
        let email = row.get(email_col).unwrap_or("").trim();
        if id.is_empty() {
            return Err(PlanError::File {
                path: format!("row {}", line),
                detail: "empty Id".into(),
            });
        }
        let provider = provider_col
            .and_then(|c| row.get(c))
            .unwrap_or("")
            .trim();
        let record = IdentityRecord::new(id, Some(email), provider, "");

        match current {
            Some(ref mut group) if group.email == email => group.members.push(record),
            _ => {
                if finished.contains(email) {
                    return Err(PlanError::NonContiguousEmail {
                        email: email.to_string(),
                        row: line,
                    });
                }
                if let Some(group) = current.take() {
                    finish_group(group, &mut finished, &mut plans)?;
                }
                current = Some(DuplicateGroup {
                    email: email.to_string(),
                    members: vec![record],
                });
            }
        }
    }
    if let Some(group) = current.take() {
        finish_group(group, &mut finished, &mut plans)?;
    }

    info!(plans = plans.len(), "loaded merge plans");
    Ok(plans)
}

fn finish_group(
    group: DuplicateGroup,
    finished: &mut HashSet<String>,
    plans: &mut Vec<MergePlan>,
) -> Result<(), PlanError> {
    finished.insert(group.email.clone());
    if group.members.len() < 2 {
        debug!(email = %group.email, "single row, nothing to merge");
        return Ok(());
    }
    plans.push(build_plan(&group)?);
    Ok(())
}
