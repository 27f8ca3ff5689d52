// Property-based tests for reconcile, aggregate and date display.
// CI: 256 cases (default). Soak: PROPTEST_CASES=10000 cargo test --release

use std::collections::HashSet;

use chrono::{Duration, NaiveDate};
use doctrack_core::date_range::render_date;
use doctrack_core::{normalize_cell, CellValue, Dataset, DocumentRecord, Field, FieldRole, RawRecord, Schema};
use doctrack_recon::{aggregate, reconcile};
use proptest::prelude::*;

fn config() -> ProptestConfig {
    ProptestConfig {
        cases: std::env::var("PROPTEST_CASES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(256),
        failure_persistence: None,
        ..ProptestConfig::default()
    }
}

// ---------------------------------------------------------------------------
// Generators
// ---------------------------------------------------------------------------

/// Small alphabets so that duplicate keys and blanks actually occur.
fn arb_row() -> impl Strategy<Value = [String; 9]> {
    (
        prop::sample::select(vec!["2025/01/10", "2025-01-10", "2025/01/11", "2025/02/01 09:00:00"]),
        prop::sample::select(vec!["1", "2", " 3 ", "A-9"]),
        prop::sample::select(vec!["診断書", "紹介状"]),
        prop::sample::select(vec!["山田", "佐藤", ""]),
        prop::sample::select(vec!["内科", "外科", ""]),
        prop::sample::select(vec!["田中", "鈴木"]),
        prop::sample::select(vec!["", "2025/01/09", "2025-01-08"]),
        prop::sample::select(vec!["", "memo"]),
    )
        .prop_map(|(date, pid, doc, staff, dept, doctor, req, memo)| {
            [
                date.to_string(),
                pid.to_string(),
                doc.to_string(),
                staff.to_string(),
                dept.to_string(),
                doctor.to_string(),
                String::new(),
                req.to_string(),
                memo.to_string(),
            ]
        })
}

/// Any day from 1900-01-01 through 2099-12-31.
fn arb_date() -> impl Strategy<Value = NaiveDate> {
    let first = NaiveDate::from_ymd_opt(1900, 1, 1).unwrap();
    let last = NaiveDate::from_ymd_opt(2099, 12, 31).unwrap();
    (0..=(last - first).num_days()).prop_map(move |days| first + Duration::days(days))
}

fn to_raw(values: &[String; 9]) -> RawRecord {
    let mut record = RawRecord::default();
    for (field, value) in Field::ALL.into_iter().zip(values.iter()) {
        if !value.is_empty() {
            record.set(field, CellValue::Text(value.clone()));
        }
    }
    record
}

fn from_document(record: &DocumentRecord) -> RawRecord {
    let mut raw = RawRecord::default();
    for field in Field::ALL {
        let value = record.get(field);
        if !value.is_empty() {
            raw.set(field, CellValue::Text(value.to_string()));
        }
    }
    raw
}

fn dataset(rows: &[[String; 9]]) -> Dataset {
    Dataset::new(Schema::canonical(), rows.iter().map(to_raw).collect())
}

fn key_of(r: &DocumentRecord) -> Vec<String> {
    r.project(&Field::DEDUP_KEY).into_iter().map(str::to_string).collect()
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(config())]

    #[test]
    fn reconcile_is_idempotent(rows in prop::collection::vec(arb_row(), 1..40)) {
        let first = reconcile(dataset(&rows), None).unwrap();
        prop_assume!(!first.records.is_empty());

        let again = Dataset::new(first.schema.clone(), first.records.iter().map(from_document).collect());
        let second = reconcile(again, None).unwrap();

        let a: HashSet<DocumentRecord> = first.records.iter().cloned().collect();
        let b: HashSet<DocumentRecord> = second.records.iter().cloned().collect();
        prop_assert_eq!(first.records.len(), second.records.len());
        prop_assert_eq!(a, b);
        prop_assert_eq!(second.report.duplicates_removed, 0);
    }

    #[test]
    fn output_keys_are_unique_and_mandatory_fields_present(rows in prop::collection::vec(arb_row(), 1..40)) {
        let out = reconcile(dataset(&rows), None).unwrap();
        let mut keys = HashSet::new();
        for r in &out.records {
            prop_assert!(!r.staff_name.is_empty());
            prop_assert!(!r.doctor_request_date.is_empty());
            prop_assert!(keys.insert(key_of(r)));
        }
    }

    #[test]
    fn repeating_every_row_changes_nothing(rows in prop::collection::vec(arb_row(), 1..20)) {
        let single = reconcile(dataset(&rows), None).unwrap();
        let doubled: Vec<[String; 9]> = rows.iter().chain(rows.iter()).cloned().collect();
        let twice = reconcile(dataset(&doubled), None).unwrap();
        prop_assert_eq!(single.records, twice.records);
    }

    #[test]
    fn marginals_match_record_counts(rows in prop::collection::vec(arb_row(), 0..60)) {
        let records: Vec<DocumentRecord> = rows
            .iter()
            .map(|r| DocumentRecord::from_values(r.clone()))
            .collect();
        let agg = aggregate(&records);

        let with_staff = records.iter().filter(|r| !r.staff_name.is_empty()).count();
        let with_dept = records.iter().filter(|r| !r.department.is_empty()).count();
        let with_both = records
            .iter()
            .filter(|r| !r.staff_name.is_empty() && !r.department.is_empty())
            .count();

        prop_assert_eq!(agg.grand_total(), with_staff);
        prop_assert_eq!(agg.department_totals.iter().map(|(_, n)| n).sum::<usize>(), with_dept);
        prop_assert_eq!(agg.pair_counts.values().sum::<usize>(), with_both);
    }

    #[test]
    fn normalized_dates_render_in_display_form(
        date in arb_date(),
        slashes in any::<bool>(),
        with_time in any::<bool>(),
    ) {
        let mut raw = date.format(if slashes { "%Y/%m/%d" } else { "%Y-%m-%d" }).to_string();
        if with_time {
            raw.push_str(" 09:30:00");
        }
        let canonical = normalize_cell(FieldRole::Date, CellValue::Text(raw)).into_value().to_text();
        prop_assert_eq!(&canonical, &date.format("%Y/%m/%d").to_string());
        prop_assert_eq!(render_date(&canonical).0, date.format("%Y年%m月%d日").to_string());
    }
}
