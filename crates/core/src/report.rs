//! Duplicate analysis and the CSV reports it produces.
//!
//! The duplicates report lists every member of every duplicate group,
//! canonical member first, with per-collection ownership counts. Rows of a
//! group are contiguous, so the file doubles as the merge-plan artifact read
//! by [`crate::plan::plan_file`].

use std::fs;
use std::path::Path;

use tracing::{debug, info};

use crate::dashboards::DashboardClient;
use crate::errors::{CoreError, CountingError, ReportError};
use crate::grouping::group_duplicates;
use crate::models::{DuplicateGroup, IdentityRecord};
use crate::source::{fetch_all, IdentitySource};
use crate::transfer::TransferRegistry;

/// Header of the dashboard column, placed after `Widgets`.
pub const DASHBOARDS_LABEL: &str = "Dashboards";
const DASHBOARDS_AFTER: &str = "widgets";

/// One line of the duplicates report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateRow {
    pub id: String,
    pub email: String,
    pub provider: String,
    /// Owned-record counts in report column order. `None` when the count is
    /// unavailable (no dashboard service configured).
    pub counts: Vec<Option<u64>>,
}

/// Result of an analysis pass.
#[derive(Debug, Clone, Default)]
pub struct AnalysisReport {
    pub total_identities: usize,
    /// Count column headers, in order.
    pub columns: Vec<String>,
    pub groups: Vec<DuplicateGroup>,
    pub rows: Vec<DuplicateRow>,
    pub without_email: Vec<IdentityRecord>,
}

enum Column {
    Adapter(usize),
    Dashboards,
}

fn count_columns(registry: &TransferRegistry) -> Vec<(String, Column)> {
    let mut columns = Vec::new();
    let mut dashboards_placed = false;
    for (idx, adapter) in registry.adapters().iter().enumerate() {
        columns.push((adapter.label().to_string(), Column::Adapter(idx)));
        if adapter.collection() == DASHBOARDS_AFTER {
            columns.push((DASHBOARDS_LABEL.to_string(), Column::Dashboards));
            dashboards_placed = true;
        }
    }
    if !dashboards_placed {
        columns.push((DASHBOARDS_LABEL.to_string(), Column::Dashboards));
    }
    columns
}

/// Read every identity, group duplicates, and count what each duplicate owns
/// in the record store.
///
/// Blocking; the dashboards column is left `None` for
/// [`count_dashboards`] to fill. `on_progress(done, total)` is called after
/// each duplicate identity is counted.
pub fn analyze(
    source: &dyn IdentitySource,
    registry: &TransferRegistry,
    page_size: usize,
    on_progress: &mut dyn FnMut(usize, usize),
) -> Result<AnalysisReport, CoreError> {
    let records = fetch_all(source, page_size)?;
    let without_email: Vec<IdentityRecord> =
        records.iter().filter(|r| !r.has_email()).cloned().collect();
    let groups = group_duplicates(&records);

    let columns = count_columns(registry);
    let total: usize = groups.iter().map(|g| g.members.len()).sum();
    info!(
        identities = records.len(),
        groups = groups.len(),
        duplicates = total,
        without_email = without_email.len(),
        "analyzing duplicate identities"
    );

    let mut rows = Vec::with_capacity(total);
    for group in &groups {
        for member in &group.members {
            let mut counts = Vec::with_capacity(columns.len());
            for (_, column) in &columns {
                counts.push(match column {
                    Column::Adapter(idx) => Some(registry.adapters()[*idx].count_owned(&member.id)?),
                    Column::Dashboards => None,
                });
            }
            debug!(id = %member.id, email = %group.email, "counted owned records");
            rows.push(DuplicateRow {
                id: member.id.clone(),
                email: group.email.clone(),
                provider: member.provider.clone(),
                counts,
            });
            on_progress(rows.len(), total);
        }
    }

    Ok(AnalysisReport {
        total_identities: records.len(),
        columns: columns.into_iter().map(|(label, _)| label).collect(),
        groups,
        rows,
        without_email,
    })
}

/// Fill the dashboards column of every row from the counting service.
pub async fn count_dashboards(
    report: &mut AnalysisReport,
    client: &DashboardClient,
    on_progress: &mut dyn FnMut(usize, usize),
) -> Result<(), CountingError> {
    let Some(column) = report.columns.iter().position(|c| c == DASHBOARDS_LABEL) else {
        return Ok(());
    };
    let total = report.rows.len();
    for (done, row) in report.rows.iter_mut().enumerate() {
        row.counts[column] = Some(client.count_for_user(&row.id).await?);
        on_progress(done + 1, total);
    }
    info!(rows = total, "counted dashboards");
    Ok(())
}

fn writer_for(path: &Path) -> Result<csv::Writer<fs::File>, ReportError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| ReportError::Io {
            path: parent.display().to_string(),
            source,
        })?;
    }
    let file = fs::File::create(path).map_err(|source| ReportError::Io {
        path: path.display().to_string(),
        source,
    })?;
    Ok(csv::Writer::from_writer(file))
}

/// Write `Id,Email,Provider,<count columns>` for every duplicate row.
pub fn write_duplicates_report(path: &Path, report: &AnalysisReport) -> Result<(), ReportError> {
    let mut writer = writer_for(path)?;
    let mut header = vec!["Id", "Email", "Provider"];
    header.extend(report.columns.iter().map(String::as_str));
    writer.write_record(&header)?;

    for row in &report.rows {
        let mut record = vec![row.id.clone(), row.email.clone(), row.provider.clone()];
        record.extend(
            row.counts
                .iter()
                .map(|c| c.map(|n| n.to_string()).unwrap_or_default()),
        );
        writer.write_record(&record)?;
    }
    writer.flush().map_err(|source| ReportError::Io {
        path: path.display().to_string(),
        source,
    })?;
    info!(path = %path.display(), rows = report.rows.len(), "wrote duplicates report");
    Ok(())
}

/// Write `Id,Provider` for every identity without an email.
pub fn write_no_email_report(path: &Path, records: &[IdentityRecord]) -> Result<(), ReportError> {
    let mut writer = writer_for(path)?;
    writer.write_record(["Id", "Provider"])?;
    for record in records {
        writer.write_record([record.id.as_str(), record.provider.as_str()])?;
    }
    writer.flush().map_err(|source| ReportError::Io {
        path: path.display().to_string(),
        source,
    })?;
    info!(path = %path.display(), rows = records.len(), "wrote no-email report");
    Ok(())
}
