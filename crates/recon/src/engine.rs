use std::collections::HashSet;

use doctrack_core::normalize::normalize_record;
use doctrack_core::{Dataset, DocumentRecord, Field, Schema};

use crate::error::ReconError;
use crate::model::{DedupKey, ReconcileReport, Reconciled, SchemaCompatibility};
use crate::schema::check_schema;

/// Merge an incoming dataset into the accumulated one, then clean and de-duplicate.
///
/// Steps, in order: normalize cells, reconcile schemas (a mismatch drops the
/// existing rows for this run), concatenate, stringify, drop rows without a
/// doctor request date or staff name, de-duplicate on the composite key.
/// Surviving rows keep working-set order: source rows first.
pub fn reconcile(source: Dataset, existing: Option<Dataset>) -> Result<Reconciled, ReconError> {
    if source.is_empty() {
        return Err(ReconError::EmptySource);
    }
    if source.schema.is_empty() {
        return Err(ReconError::NoRecognizedColumns);
    }

    let mut report = ReconcileReport::new(source.len());
    let schema = canonical_order(&source.schema);

    // Normalize + concatenate
    let mut working: Vec<DocumentRecord> = Vec::with_capacity(source.len());
    working.extend(source.rows.into_iter().map(to_document));

    if let Some(existing) = existing.filter(|e| !e.is_empty()) {
        let compatibility = check_schema(&source.schema, &existing.schema);
        match &compatibility {
            SchemaCompatibility::Compatible => {
                report.existing_rows = existing.len();
                working.extend(existing.rows.into_iter().map(to_document));
            }
            SchemaCompatibility::IncompatibleUseSourceOnly { source_only, existing_only } => {
                report.existing_discarded = existing.len();
                report.warn(format!(
                    "source and existing columns differ (source only: {}; existing only: {}); using source rows only",
                    field_list(source_only),
                    field_list(existing_only),
                ));
            }
        }
        report.schema = Some(compatibility);
    }

    let working = drop_missing(working, &schema, Field::DoctorRequestDate, &mut report);
    let working = drop_missing(working, &schema, Field::StaffName, &mut report);

    let (records, dedup, removed) = dedupe(working, &schema);
    match &dedup {
        DedupKey::Full => {}
        DedupKey::Partial { used, missing } => report.warn(format!(
            "duplicate check is missing columns {}; de-duplicating on {} only",
            field_list(missing),
            field_list(used),
        )),
        DedupKey::Skipped => report.warn(format!(
            "none of the duplicate-check columns ({}) are present; skipping de-duplication",
            field_list(&Field::DEDUP_KEY),
        )),
    }
    report.dedup = dedup;
    report.duplicates_removed = removed;
    report.output_rows = records.len();

    log::info!("reconcile: {}", report.summary());

    Ok(Reconciled { schema, records, report })
}

/// Remove duplicate records on the composite key, keeping the first of each.
///
/// Falls back to the key fields present in `schema`, and does nothing when
/// none are. Returns the survivors, the key actually used, and how many rows
/// were removed.
pub fn dedupe(records: Vec<DocumentRecord>, schema: &Schema) -> (Vec<DocumentRecord>, DedupKey, usize) {
    let missing = schema.missing(&Field::DEDUP_KEY);
    let used: Vec<Field> = Field::DEDUP_KEY
        .iter()
        .copied()
        .filter(|f| schema.contains(*f))
        .collect();

    let key = if missing.is_empty() {
        DedupKey::Full
    } else if used.is_empty() {
        return (records, DedupKey::Skipped, 0);
    } else {
        DedupKey::Partial { used: used.clone(), missing }
    };

    let before = records.len();
    let mut seen: HashSet<Vec<String>> = HashSet::with_capacity(before);
    let survivors: Vec<DocumentRecord> = records
        .into_iter()
        .filter(|r| {
            let k: Vec<String> = r.project(&used).into_iter().map(str::to_string).collect();
            seen.insert(k)
        })
        .collect();
    let removed = before - survivors.len();
    (survivors, key, removed)
}

fn to_document(row: doctrack_core::RawRecord) -> DocumentRecord {
    DocumentRecord::from_raw(&normalize_record(row))
}

/// Drop rows whose `field` is blank; skip (with a warning) when the column is absent.
fn drop_missing(
    records: Vec<DocumentRecord>,
    schema: &Schema,
    field: Field,
    report: &mut ReconcileReport,
) -> Vec<DocumentRecord> {
    if !schema.contains(field) {
        report.filters_skipped.push(field);
        report.warn(format!("column '{field}' not found; skipping the empty-{field} filter"));
        return records;
    }

    let before = records.len();
    let kept: Vec<DocumentRecord> = records.into_iter().filter(|r| !r.get(field).is_empty()).collect();
    let dropped = before - kept.len();
    match field {
        Field::DoctorRequestDate => report.dropped_missing_request_date = dropped,
        Field::StaffName => report.dropped_missing_staff = dropped,
        _ => {}
    }
    log::debug!("after dropping rows with empty '{field}': {} rows", kept.len());
    kept
}

fn canonical_order(schema: &Schema) -> Schema {
    let mut fields = schema.fields().to_vec();
    fields.sort();
    Schema::new(fields)
}

fn field_list(fields: &[Field]) -> String {
    fields.iter().map(|f| f.header()).collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use doctrack_core::{CellValue, RawRecord};

    fn raw(values: [&str; 9]) -> RawRecord {
        let mut record = RawRecord::default();
        for (field, value) in Field::ALL.into_iter().zip(values) {
            if !value.is_empty() {
                record.set(field, CellValue::Text(value.to_string()));
            }
        }
        record
    }

    fn dataset(rows: Vec<RawRecord>) -> Dataset {
        Dataset::new(Schema::canonical(), rows)
    }

    const ROW: [&str; 9] = ["2025/01/10", "1", "docA", "Yamada", "Naika", "DrA", "", "2025/01/09", ""];

    #[test]
    fn exact_duplicates_collapse() {
        let out = reconcile(dataset(vec![raw(ROW), raw(ROW)]), None).unwrap();
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.report.duplicates_removed, 1);
        assert_eq!(out.report.dedup, DedupKey::Full);
    }

    #[test]
    fn rows_differing_outside_key_collapse() {
        let mut other = ROW;
        other[8] = "different memo";
        other[3] = "Sato";
        let out = reconcile(dataset(vec![raw(ROW), raw(other)]), None).unwrap();
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].staff_name, "Yamada");
    }

    #[test]
    fn empty_request_date_dropped() {
        let mut no_date = ROW;
        no_date[7] = "";
        no_date[1] = "2";
        let out = reconcile(dataset(vec![raw(ROW), raw(no_date)]), None).unwrap();
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.report.dropped_missing_request_date, 1);
        assert_eq!(out.report.dropped_missing_staff, 0);
    }

    #[test]
    fn empty_staff_dropped() {
        let mut no_staff = ROW;
        no_staff[3] = "";
        no_staff[1] = "2";
        let out = reconcile(dataset(vec![raw(ROW), raw(no_staff)]), None).unwrap();
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.report.dropped_missing_staff, 1);
        assert_eq!(out.report.dropped_missing_request_date, 0);
    }

    #[test]
    fn dashed_and_slashed_dates_are_the_same_key() {
        let mut dashed = ROW;
        dashed[0] = "2025-01-10";
        let out = reconcile(dataset(vec![raw(ROW), raw(dashed)]), None).unwrap();
        assert_eq!(out.records.len(), 1);
    }

    #[test]
    fn numeric_and_text_ids_are_the_same_key() {
        let mut numeric = raw(ROW);
        numeric.set(Field::PatientId, CellValue::Float(1.0));
        let out = reconcile(dataset(vec![raw(ROW), numeric]), None).unwrap();
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].patient_id, "1");
    }

    #[test]
    fn existing_rows_merge_after_source() {
        let mut old = ROW;
        old[0] = "2024/12/01";
        let existing = dataset(vec![raw(old), raw(ROW)]);
        let out = reconcile(dataset(vec![raw(ROW)]), Some(existing)).unwrap();
        assert_eq!(out.report.existing_rows, 2);
        assert_eq!(out.report.schema, Some(SchemaCompatibility::Compatible));
        assert_eq!(out.records.len(), 2);
        assert_eq!(out.records[0].deposit_date, "2025/01/10");
    }

    #[test]
    fn schema_mismatch_uses_source_only() {
        let mut old = ROW;
        old[0] = "2024/12/01";
        let existing = Dataset::new(
            Schema::new(Field::ALL[..8].to_vec()),
            vec![raw(old)],
        );
        let out = reconcile(dataset(vec![raw(ROW)]), Some(existing)).unwrap();
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.report.existing_rows, 0);
        assert_eq!(out.report.existing_discarded, 1);
        assert!(matches!(
            out.report.schema,
            Some(SchemaCompatibility::IncompatibleUseSourceOnly { .. })
        ));
        assert_eq!(out.report.warnings.len(), 1);
    }

    #[test]
    fn empty_existing_is_ignored() {
        let existing = Dataset::new(Schema::new(vec![Field::Memo]), Vec::new());
        let out = reconcile(dataset(vec![raw(ROW)]), Some(existing)).unwrap();
        assert_eq!(out.report.schema, None);
        assert!(out.report.warnings.is_empty());
    }

    #[test]
    fn missing_filter_columns_skip_filters() {
        let schema = Schema::new(vec![Field::DepositDate, Field::PatientId, Field::DocumentName]);
        let mut row = RawRecord::default();
        row.set(Field::DepositDate, CellValue::from("2025/01/10"));
        row.set(Field::PatientId, CellValue::from("3"));
        let out = reconcile(Dataset::new(schema, vec![row.clone(), row]), None).unwrap();
        assert_eq!(
            out.report.filters_skipped,
            vec![Field::DoctorRequestDate, Field::StaffName]
        );
        // Partial key still de-duplicates
        assert_eq!(out.records.len(), 1);
        assert_eq!(
            out.report.dedup,
            DedupKey::Partial {
                used: vec![Field::DepositDate, Field::PatientId, Field::DocumentName],
                missing: vec![Field::Department, Field::DoctorName],
            }
        );
    }

    #[test]
    fn no_key_columns_skips_dedup() {
        let schema = Schema::new(vec![Field::StaffName, Field::DoctorRequestDate]);
        let mut row = RawRecord::default();
        row.set(Field::StaffName, CellValue::from("Yamada"));
        row.set(Field::DoctorRequestDate, CellValue::from("2025/01/09"));
        let out = reconcile(Dataset::new(schema, vec![row.clone(), row]), None).unwrap();
        assert_eq!(out.records.len(), 2);
        assert_eq!(out.report.dedup, DedupKey::Skipped);
        assert_eq!(out.report.duplicates_removed, 0);
    }

    #[test]
    fn structural_errors() {
        assert_eq!(reconcile(dataset(Vec::new()), None).unwrap_err(), ReconError::EmptySource);
        let headerless = Dataset::new(Schema::default(), vec![raw(ROW)]);
        assert_eq!(reconcile(headerless, None).unwrap_err(), ReconError::NoRecognizedColumns);
    }

    #[test]
    fn output_schema_is_canonical_order() {
        let schema = Schema::new(vec![Field::Memo, Field::StaffName, Field::DepositDate]);
        let mut row = RawRecord::default();
        row.set(Field::StaffName, CellValue::from("Yamada"));
        row.set(Field::DepositDate, CellValue::from("2025/01/10"));
        let out = reconcile(Dataset::new(schema, vec![row]), None).unwrap();
        assert_eq!(out.schema.fields(), &[Field::DepositDate, Field::StaffName, Field::Memo]);
    }
}
