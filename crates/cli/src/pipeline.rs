//! Pipeline entry points: import, report, CSV intake.
//!
//! Each `run_*` function takes its settings explicitly and never panics or
//! returns an error: failures come back as a [`PipelineOutcome`] with
//! `success == false` and a message fit for the user.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;

use doctrack_config::Settings;
use doctrack_core::normalize::normalize_record;
use doctrack_core::{resolve_range, DocumentRecord, Field};
use doctrack_io::assignment::append_rows;
use doctrack_io::csv::{prepare, read_export, Exclusions};
use doctrack_io::database::write_rows;
use doctrack_io::files::{backup_file, ensure_dir, find_latest_export, move_into, remove_stale_exports};
use doctrack_io::{read_dataset, render_report, report_file_name, IoError, ReportGrid, ReportSpec};
use doctrack_recon::{aggregate, reconcile, ReconError};

use crate::paths::Paths;
use crate::viewer::open_in_viewer;

/// Backup name prefix for the database.
pub const DATABASE_BACKUP_PREFIX: &str = "backup_";

/// Columns the report cannot do without.
const REPORT_FIELDS: [Field; 3] = [Field::StaffName, Field::Department, Field::DepositDate];

// ============================================================================
// Outcome
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Failed,
    NotFound,
    Locked,
}

/// What a pipeline run reports back to its caller.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineOutcome {
    pub success: bool,
    pub message: String,
    /// File produced or updated by the run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl PipelineOutcome {
    fn succeeded(message: String, output: PathBuf, warnings: Vec<String>) -> Self {
        Self { success: true, message, output: Some(output), failure: None, warnings }
    }

    fn failed(err: PipelineError) -> Self {
        log::error!("{err}");
        Self {
            success: false,
            message: err.to_string(),
            output: None,
            failure: Some(err.kind()),
            warnings: Vec::new(),
        }
    }

    fn from_result(result: Result<PipelineOutcome, PipelineError>) -> Self {
        result.unwrap_or_else(Self::failed)
    }
}

#[derive(Debug)]
pub enum PipelineError {
    Io(IoError),
    Recon(ReconError),
    /// Database empty or missing a column the report needs.
    NoData,
    /// Date bounds were given and no record falls inside them.
    NoDataInRange { start: String, end: String },
    /// No export file in the downloads directory.
    NoExport(PathBuf),
}

impl PipelineError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Io(IoError::NotFound(_)) | Self::NoExport(_) => FailureKind::NotFound,
            Self::Io(IoError::Locked(_)) => FailureKind::Locked,
            _ => FailureKind::Failed,
        }
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "{e}"),
            Self::Recon(e) => write!(f, "{e}"),
            Self::NoData => write!(f, "no data to analyze"),
            Self::NoDataInRange { start, end } => write!(f, "no data for {start}..{end}"),
            Self::NoExport(dir) => write!(f, "no CSV export found in {}", dir.display()),
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Recon(e) => Some(e),
            _ => None,
        }
    }
}

impl From<IoError> for PipelineError {
    fn from(e: IoError) -> Self {
        Self::Io(e)
    }
}

impl From<ReconError> for PipelineError {
    fn from(e: ReconError) -> Self {
        Self::Recon(e)
    }
}

// ============================================================================
// Import
// ============================================================================

/// Merge `source` into the database, clean, de-duplicate, rewrite, back up.
fn unknown_column_warnings(path: &Path, headers: &[String]) -> Vec<String> {
    headers
        .iter()
        .map(|h| format!("{}: unknown column '{}' ignored", path.display(), h))
        .collect()
}

pub fn run_import(source: &Path, paths: &Paths) -> PipelineOutcome {
    PipelineOutcome::from_result(import(source, paths))
}

fn import(source: &Path, paths: &Paths) -> Result<PipelineOutcome, PipelineError> {
    let incoming = read_dataset(source)?;
    let mut warnings = unknown_column_warnings(source, &incoming.unknown_headers);

    let database_exists = paths.database.exists();
    let existing = if database_exists {
        match read_dataset(&paths.database) {
            Ok(loaded) => {
                // these columns are not written back
                warnings.extend(unknown_column_warnings(&paths.database, &loaded.unknown_headers));
                Some(loaded.dataset)
            }
            Err(IoError::EmptySheet(_)) => {
                log::info!("{} is empty, starting a new database", paths.database.display());
                None
            }
            Err(e) => return Err(e.into()),
        }
    } else {
        None
    };

    let reconciled = reconcile(incoming.dataset, existing)?;
    warnings.extend(reconciled.report.warnings.iter().cloned());

    let written = write_rows(&paths.database, &reconciled.schema, &reconciled.records, !database_exists)?;

    if let Err(e) = backup_file(&paths.database, &paths.backup_dir, DATABASE_BACKUP_PREFIX) {
        let warning = format!("backup failed: {e}");
        log::warn!("{warning}");
        warnings.push(warning);
    }

    let message = format!(
        "{} rows written to {} ({})",
        written.rows_written,
        written.path.display(),
        reconciled.report.summary()
    );
    log::info!("{message}");
    Ok(PipelineOutcome::succeeded(message, written.path, warnings))
}

// ============================================================================
// Report
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct ReportOptions {
    /// Inclusive bounds, `YYYY-MM-DD`; `None` falls back to the settings.
    pub from: Option<String>,
    pub to: Option<String>,
    /// Launch the default viewer on the result (also gated by settings).
    pub open: bool,
}

/// Tally the database by staff and department and render the report.
pub fn run_report(settings: &Settings, paths: &Paths, options: &ReportOptions) -> PipelineOutcome {
    let outcome = PipelineOutcome::from_result(report(settings, paths, options));
    if outcome.success && options.open && settings.automation.open_report {
        if let Some(output) = &outcome.output {
            open_in_viewer(output, Duration::from_secs(settings.automation.open_wait_seconds));
        }
    }
    outcome
}

fn report(settings: &Settings, paths: &Paths, options: &ReportOptions) -> Result<PipelineOutcome, PipelineError> {
    let loaded = match read_dataset(&paths.database) {
        Ok(loaded) => loaded,
        Err(IoError::EmptySheet(_)) => return Err(PipelineError::NoData),
        Err(e) => return Err(e.into()),
    };
    let schema = loaded.dataset.schema;
    if loaded.dataset.rows.is_empty() || !schema.missing(&REPORT_FIELDS).is_empty() {
        return Err(PipelineError::NoData);
    }

    let records: Vec<DocumentRecord> = loaded
        .dataset
        .rows
        .into_iter()
        .map(|row| DocumentRecord::from_raw(&normalize_record(row)))
        .collect();

    let (configured_start, configured_end) = settings.date_bounds();
    let start = options.from.as_deref().or(configured_start);
    let end = options.to.as_deref().or(configured_end);

    let resolved = resolve_range(&schema, records, start, end);
    if resolved.bounded && resolved.records.is_empty() {
        return Err(PipelineError::NoDataInRange {
            start: start.unwrap_or_default().to_string(),
            end: end.unwrap_or_default().to_string(),
        });
    }

    let aggregation = aggregate(&resolved.records);
    let staff_order = settings.staff_order();
    let department_order = settings.department_order();
    let mut warnings = Vec::new();
    if staff_order.is_empty() {
        let warning = "no staff names configured; the report has no staff rows".to_string();
        log::warn!("{warning}");
        warnings.push(warning);
    }

    let spec = ReportSpec {
        label: &settings.analysis.report_label,
        staff_order: &staff_order,
        department_order: &department_order,
    };
    let grid = ReportGrid::build(&spec, &aggregation, &resolved.range);

    ensure_dir(&paths.output_dir)?;
    let output = paths
        .output_dir
        .join(report_file_name(&settings.analysis.report_label, &resolved.range.file_token));
    let written = render_report(paths.template.as_deref(), &grid, &output)?;

    let message = format!(
        "report for {} records ({} - {}) written to {}",
        resolved.records.len(),
        resolved.range.start_display,
        resolved.range.end_display,
        written.display()
    );
    log::info!("{message}");
    Ok(PipelineOutcome::succeeded(message, written, warnings))
}

// ============================================================================
// CSV intake
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct IntakeOptions {
    /// Export to take; `None` picks the newest one in the downloads directory.
    pub csv: Option<PathBuf>,
    /// Open the assignment list afterwards (also gated by settings).
    pub open: bool,
}

/// Append the newest CSV export to the assignment list.
pub fn run_intake(settings: &Settings, paths: &Paths, options: &IntakeOptions) -> PipelineOutcome {
    let outcome = PipelineOutcome::from_result(intake(settings, paths, options));
    if outcome.success && options.open && settings.automation.open_report {
        if let Some(output) = &outcome.output {
            open_in_viewer(output, Duration::from_secs(settings.automation.open_wait_seconds));
        }
    }
    outcome
}

fn intake(settings: &Settings, paths: &Paths, options: &IntakeOptions) -> Result<PipelineOutcome, PipelineError> {
    ensure_dir(&paths.processed_dir)?;
    remove_stale_exports(&paths.processed_dir, settings.automation.processed_retention_days);

    let csv_path = match &options.csv {
        Some(path) => path.clone(),
        None => find_latest_export(&paths.downloads_dir)?
            .ok_or_else(|| PipelineError::NoExport(paths.downloads_dir.clone()))?,
    };
    log::info!("taking export {}", csv_path.display());

    let table = read_export(&csv_path)?;
    let exclusions = Exclusions::new(settings.excluded_documents(), settings.excluded_doctors());
    let batch = prepare(table, &exclusions);
    let summary = append_rows(&paths.assignment_list, &batch)?;

    let mut warnings = Vec::new();
    if let Err(e) = backup_file(&paths.assignment_list, &paths.backup_dir, "") {
        let warning = format!("backup failed: {e}");
        log::warn!("{warning}");
        warnings.push(warning);
    }
    move_into(&csv_path, &paths.processed_dir)?;

    let message = format!(
        "{} rows appended to {} ({} already listed, {} excluded)",
        summary.appended,
        summary.path.display(),
        summary.already_listed,
        batch.excluded
    );
    log::info!("{message}");
    Ok(PipelineOutcome::succeeded(message, summary.path, warnings))
}
