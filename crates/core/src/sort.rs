// Display order for the accumulated dataset: deposit date, then department,
// then patient id (numerically). Blank values sort first.

use std::cmp::Ordering;

use crate::normalize::canonical_date_text;
use crate::record::DocumentRecord;

/// Sort key shared by every sheet written in dataset order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct DisplayKey {
    date: String,
    department: String,
    patient: PatientKey,
}

/// Numeric ids order numerically; anything non-numeric orders after them by text.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum PatientKey {
    Number(i64),
    Text(String),
}

impl DisplayKey {
    pub fn new(date: &str, department: &str, patient_id: &str) -> Self {
        let trimmed = patient_id.trim();
        let patient = if trimmed.is_empty() {
            PatientKey::Number(0)
        } else {
            match trimmed.parse::<i64>() {
                Ok(n) => PatientKey::Number(n),
                Err(_) => PatientKey::Text(trimmed.to_string()),
            }
        };
        Self {
            date: canonical_date_text(date.trim()),
            department: department.to_string(),
            patient,
        }
    }

    pub fn of(record: &DocumentRecord) -> Self {
        Self::new(&record.deposit_date, &record.department, &record.patient_id)
    }
}

/// Stable ascending sort in display order.
pub fn sort_records(records: &mut [DocumentRecord]) {
    records.sort_by_cached_key(DisplayKey::of);
}

/// Compare two records in display order.
pub fn display_cmp(a: &DocumentRecord, b: &DocumentRecord) -> Ordering {
    DisplayKey::of(a).cmp(&DisplayKey::of(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(date: &str, dept: &str, pid: &str, memo: &str) -> DocumentRecord {
        DocumentRecord {
            deposit_date: date.into(),
            department: dept.into(),
            patient_id: pid.into(),
            memo: memo.into(),
            ..Default::default()
        }
    }

    #[test]
    fn sorts_by_date_then_department_then_numeric_id() {
        let mut records = vec![
            rec("2025/01/11", "内科", "5", "d"),
            rec("2025/01/10", "外科", "3", "c"),
            rec("2025/01/10", "内科", "10", "b"),
            rec("2025/01/10", "内科", "9", "a"),
        ];
        sort_records(&mut records);
        let memos: Vec<&str> = records.iter().map(|r| r.memo.as_str()).collect();
        // "内科" (U+5185) sorts before "外科" (U+5916)
        assert_eq!(memos, ["a", "b", "c", "d"]);
    }

    #[test]
    fn blanks_sort_first_and_sort_is_stable() {
        let mut records = vec![
            rec("2025/01/10", "", "1", "x"),
            rec("", "", "", "first"),
            rec("2025/01/10", "", "1", "y"),
            rec("2025/01/10", "", "", "zero"),
        ];
        sort_records(&mut records);
        let memos: Vec<&str> = records.iter().map(|r| r.memo.as_str()).collect();
        assert_eq!(memos, ["first", "zero", "x", "y"]);
    }

    #[test]
    fn dashed_dates_compare_like_slashed() {
        let a = rec("2025-01-10", "", "", "");
        let b = rec("2025/01/09", "", "", "");
        assert_eq!(display_cmp(&a, &b), Ordering::Greater);
    }

    #[test]
    fn text_ids_after_numbers() {
        let mut records = vec![rec("d", "", "A1", "text"), rec("d", "", "99999", "num")];
        sort_records(&mut records);
        assert_eq!(records[0].memo, "num");
    }
}
