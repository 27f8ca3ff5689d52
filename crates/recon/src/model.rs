use serde::Serialize;

use doctrack_core::{DocumentRecord, Field, Schema};

// ---------------------------------------------------------------------------
// Schema reconciliation
// ---------------------------------------------------------------------------

/// Outcome of comparing the incoming and accumulated datasets' field sets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SchemaCompatibility {
    /// Same field set (order may differ); the datasets can be merged.
    Compatible,
    /// Field sets differ; only the incoming dataset is used for this run.
    IncompatibleUseSourceOnly {
        source_only: Vec<Field>,
        existing_only: Vec<Field>,
    },
}

// ---------------------------------------------------------------------------
// De-duplication
// ---------------------------------------------------------------------------

/// Which part of the composite key de-duplication actually used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "key", rename_all = "snake_case")]
pub enum DedupKey {
    /// All five key fields were present.
    Full,
    /// Some key fields were missing; the present subset was used.
    Partial { used: Vec<Field>, missing: Vec<Field> },
    /// No key field was present; nothing was de-duplicated.
    Skipped,
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct ReconcileReport {
    pub source_rows: usize,
    /// Existing rows merged into the working set (0 when discarded).
    pub existing_rows: usize,
    /// Existing rows left out because of a schema mismatch.
    pub existing_discarded: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<SchemaCompatibility>,
    pub dropped_missing_request_date: usize,
    pub dropped_missing_staff: usize,
    /// Mandatory-field filters not applied because the column is absent.
    pub filters_skipped: Vec<Field>,
    pub dedup: DedupKey,
    pub duplicates_removed: usize,
    pub output_rows: usize,
    pub warnings: Vec<String>,
}

impl ReconcileReport {
    pub(crate) fn new(source_rows: usize) -> Self {
        Self {
            source_rows,
            existing_rows: 0,
            existing_discarded: 0,
            schema: None,
            dropped_missing_request_date: 0,
            dropped_missing_staff: 0,
            filters_skipped: Vec::new(),
            dedup: DedupKey::Full,
            duplicates_removed: 0,
            output_rows: 0,
            warnings: Vec::new(),
        }
    }

    pub(crate) fn warn(&mut self, message: String) {
        log::warn!("{message}");
        self.warnings.push(message);
    }

    /// One-line summary for status output.
    pub fn summary(&self) -> String {
        format!(
            "{} source + {} existing rows → {} rows ({} without request date, {} without staff, {} duplicates removed)",
            self.source_rows,
            self.existing_rows,
            self.output_rows,
            self.dropped_missing_request_date,
            self.dropped_missing_staff,
            self.duplicates_removed,
        )
    }
}

/// The cleaned dataset plus an account of what was done to it.
#[derive(Debug, Clone)]
pub struct Reconciled {
    /// Fields carried by `records`, in canonical order.
    pub schema: Schema,
    pub records: Vec<DocumentRecord>,
    pub report: ReconcileReport,
}
