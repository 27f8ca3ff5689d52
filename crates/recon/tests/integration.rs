use doctrack_core::{resolve_range, CellValue, Dataset, DocumentRecord, Field, HeaderTable, Schema};
use doctrack_recon::{aggregate, reconcile, DedupKey, SchemaCompatibility};

fn sheet(headers: &[&str], rows: &[Vec<CellValue>]) -> Dataset {
    let table = HeaderTable::resolve(headers).unwrap();
    let records = rows.iter().map(|r| table.record_from_row(r)).collect();
    Dataset::new(table.schema(), records)
}

fn canonical_headers() -> Vec<&'static str> {
    Field::ALL.iter().map(|f| f.header()).collect()
}

fn t(s: &str) -> CellValue {
    if s.is_empty() {
        CellValue::Empty
    } else {
        CellValue::Text(s.to_string())
    }
}

fn row(date: &str, pid: &str, doc: &str, staff: &str, dept: &str, doctor: &str, req: &str) -> Vec<CellValue> {
    vec![t(date), t(pid), t(doc), t(staff), t(dept), t(doctor), t(""), t(req), t("")]
}

// -------------------------------------------------------------------------
// Import pipeline: source sheet merged into accumulated sheet
// -------------------------------------------------------------------------

#[test]
fn monthly_import_merges_and_dedupes() {
    let headers = canonical_headers();
    let existing = sheet(
        &headers,
        &[
            row("2025/01/06", "100", "診断書", "山田", "内科", "田中", "2025/01/05"),
            row("2025/01/07", "101", "紹介状", "佐藤", "外科", "鈴木", "2025/01/06"),
        ],
    );
    let source = sheet(
        &headers,
        &[
            // Re-export of an existing row, with dashed date and time component
            row("2025-01-06 00:00:00", "100", "診断書", "山田", "内科", "田中", "2025-01-05"),
            row("2025/01/10", "102", "意見書", "山田", "外科", "鈴木", "2025/01/09"),
            // Incomplete rows
            row("2025/01/11", "103", "診断書", "", "内科", "田中", "2025/01/10"),
            row("2025/01/12", "104", "診断書", "佐藤", "内科", "田中", ""),
        ],
    );

    let out = reconcile(source, Some(existing)).unwrap();
    assert_eq!(out.report.schema, Some(SchemaCompatibility::Compatible));
    assert_eq!(out.report.dropped_missing_staff, 1);
    assert_eq!(out.report.dropped_missing_request_date, 1);
    assert_eq!(out.report.duplicates_removed, 1);
    assert_eq!(out.records.len(), 3);

    let first = &out.records[0];
    assert_eq!(first.deposit_date, "2025/01/06");
    assert_eq!(first.doctor_request_date, "2025/01/05");
    assert_eq!(first.patient_id, "100");
}

#[test]
fn reordered_columns_in_existing_still_merge() {
    let source = sheet(
        &canonical_headers(),
        &[row("2025/01/10", "1", "docA", "Yamada", "Naika", "DrA", "2025/01/09")],
    );
    let mut reordered: Vec<&str> = canonical_headers();
    reordered.swap(0, 3);
    let mut r = row("2025/01/11", "2", "docB", "Sato", "Geka", "DrB", "2025/01/10");
    r.swap(0, 3);
    let existing = sheet(&reordered, &[r]);

    let out = reconcile(source, Some(existing)).unwrap();
    assert_eq!(out.records.len(), 2);
    assert_eq!(out.records[1].staff_name, "Sato");
    assert_eq!(out.records[1].deposit_date, "2025/01/11");
}

#[test]
fn older_existing_layout_is_discarded_with_warning() {
    let source = sheet(
        &canonical_headers(),
        &[row("2025/01/10", "1", "docA", "Yamada", "Naika", "DrA", "2025/01/09")],
    );
    let legacy_headers: Vec<&str> = canonical_headers()[..6].to_vec();
    let existing = sheet(
        &legacy_headers,
        &[vec![t("2024/12/01"), t("9"), t("docZ"), t("Abe"), t("Naika"), t("DrZ")]],
    );

    let out = reconcile(source, Some(existing)).unwrap();
    assert_eq!(out.records.len(), 1);
    assert_eq!(out.report.existing_discarded, 1);
    match out.report.schema {
        Some(SchemaCompatibility::IncompatibleUseSourceOnly { ref source_only, ref existing_only }) => {
            assert_eq!(
                source_only,
                &vec![Field::DepartmentRequested, Field::DoctorRequestDate, Field::Memo]
            );
            assert!(existing_only.is_empty());
        }
        ref other => panic!("expected mismatch, got {other:?}"),
    }
}

#[test]
fn sheet_without_doctor_name_dedupes_on_remaining_key() {
    let headers = ["預り日", "患者ID", "文書名", "担当者名", "診療科", "医師依頼日"];
    let rows = vec![
        vec![t("2025/01/10"), t("1"), t("docA"), t("Yamada"), t("Naika"), t("2025/01/09")],
        vec![t("2025/01/10"), t("1"), t("docA"), t("Sato"), t("Naika"), t("2025/01/08")],
    ];
    let out = reconcile(sheet(&headers, &rows), None).unwrap();
    assert_eq!(out.records.len(), 1);
    assert_eq!(
        out.report.dedup,
        DedupKey::Partial {
            used: vec![Field::DepositDate, Field::PatientId, Field::DocumentName, Field::Department],
            missing: vec![Field::DoctorName],
        }
    );
}

// -------------------------------------------------------------------------
// Report pipeline: range → aggregation
// -------------------------------------------------------------------------

#[test]
fn range_then_aggregate() {
    let records: Vec<DocumentRecord> = [
        ("2023/05/01", "A", "X"),
        ("2023/05/12", "A", "X"),
        ("2023/05/15", "B", "Y"),
        ("2023/05/30", "A", "Y"),
    ]
    .iter()
    .map(|(d, s, dept)| DocumentRecord {
        deposit_date: d.to_string(),
        staff_name: s.to_string(),
        department: dept.to_string(),
        ..Default::default()
    })
    .collect();

    let resolved = resolve_range(&Schema::canonical(), records, Some("2023-05-10"), Some("2023-05-20"));
    assert_eq!(resolved.range.start_display, "2023年05月12日");
    assert_eq!(resolved.range.end_display, "2023年05月15日");
    assert_eq!(resolved.range.file_token, "20230512-20230515");

    let agg = aggregate(&resolved.records);
    assert_eq!(agg.pair_count("A", "X"), 1);
    assert_eq!(agg.pair_count("B", "Y"), 1);
    assert_eq!(agg.pair_count("A", "Y"), 0);
    assert_eq!(agg.grand_total(), 2);
}
