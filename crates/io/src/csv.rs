// CSV export intake: decode the order-system export, reshape it into
// assignment-list columns, and apply the configured exclusions.

use std::path::Path;

use chrono::NaiveDate;
use encoding_rs::{Encoding, SHIFT_JIS, UTF_8};

use doctrack_core::CellValue;

use crate::error::IoError;

/// Lines before the header row in an export.
pub const PREAMBLE_LINES: usize = 3;

/// Raw column holding the `YYYYMMDD` date (column D).
const RAW_DATE_COLUMN: usize = 3;
/// Raw columns dropped first (I and K), then the leading A-C.
const RAW_DROPPED_COLUMNS: [usize; 2] = [8, 10];
const RAW_LEADING_DROPPED: usize = 3;

/// Columns of the reshaped table the exclusion lists look at.
pub const DOCUMENT_COLUMN: usize = 3;
pub const DOCTOR_COLUMN: usize = 5;

/// A decoded export, header row plus string rows.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
    /// Name of the encoding that decoded the file.
    pub encoding: &'static str,
}

/// Substring exclusion lists for the intake.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Exclusions {
    pub documents: Vec<String>,
    pub doctors: Vec<String>,
}

impl Exclusions {
    /// Build from config lists, dropping blank entries.
    pub fn new(documents: Vec<String>, doctors: Vec<String>) -> Self {
        let keep = |v: Vec<String>| v.into_iter().filter(|s| !s.trim().is_empty()).collect();
        Self { documents: keep(documents), doctors: keep(doctors) }
    }
}

/// Reshaped export rows, ready to append to the assignment list.
#[derive(Debug, Clone, PartialEq)]
pub struct IntakeBatch {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
    /// Rows removed by the exclusion lists.
    pub excluded: usize,
}

/// Read an export, trying Shift_JIS first and then UTF-8.
pub fn read_export(path: &Path) -> Result<ExportTable, IoError> {
    let bytes = std::fs::read(path).map_err(|e| IoError::from_read(path, e))?;

    for encoding in candidate_encodings(&bytes) {
        match decode_table(&bytes, encoding) {
            Ok(table) if table.headers.len() > 1 => {
                log::info!(
                    "read {} rows x {} columns from {} ({})",
                    table.rows.len(),
                    table.headers.len(),
                    path.display(),
                    table.encoding
                );
                return Ok(table);
            }
            Ok(_) => log::debug!("{}: {} gave a single column", path.display(), encoding.name()),
            Err(reason) => log::debug!("{}: {} failed: {}", path.display(), encoding.name(), reason),
        }
    }

    Err(IoError::Csv {
        path: path.to_path_buf(),
        reason: "not readable as Shift_JIS or UTF-8 with more than one column".to_string(),
    })
}

/// Shift_JIS, then UTF-8. Well-formed non-ASCII UTF-8 goes the other way
/// round: Shift_JIS decodes most UTF-8 Japanese without error, as mojibake.
fn candidate_encodings(bytes: &[u8]) -> [&'static Encoding; 2] {
    if !bytes.is_ascii() && std::str::from_utf8(bytes).is_ok() {
        [UTF_8, SHIFT_JIS]
    } else {
        [SHIFT_JIS, UTF_8]
    }
}

fn decode_table(bytes: &[u8], encoding: &'static Encoding) -> Result<ExportTable, String> {
    let (text, used, had_errors) = encoding.decode(bytes);
    if had_errors {
        return Err("malformed byte sequence".to_string());
    }

    let body = skip_lines(&text, PREAMBLE_LINES);
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(body.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| e.to_string())?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| e.to_string())?;
        if record.iter().all(|f| f.trim().is_empty()) {
            continue;
        }
        rows.push(record.iter().map(str::to_string).collect());
    }

    Ok(ExportTable { headers, rows, encoding: used.name() })
}

fn skip_lines(text: &str, count: usize) -> &str {
    let mut rest = text;
    for _ in 0..count {
        match rest.find('\n') {
            Some(idx) => rest = &rest[idx + 1..],
            None => return "",
        }
    }
    rest
}

/// Reshape an export into assignment-list columns and apply exclusions.
///
/// Raw column D becomes a date when it reads as `YYYYMMDD`; raw columns I
/// and K are dropped, then A-C. Rows whose document or doctor column contains
/// an excluded substring are removed; when a doctor list is configured,
/// whitespace and `*` are stripped from both columns.
pub fn prepare(table: ExportTable, exclusions: &Exclusions) -> IntakeBatch {
    let width = table.headers.len();
    let headers = reshape(table.headers.into_iter());

    let mut excluded = 0;
    let mut rows = Vec::with_capacity(table.rows.len());
    for mut raw in table.rows {
        raw.resize(width.max(raw.len()), String::new());
        let cells: Vec<CellValue> = raw
            .into_iter()
            .enumerate()
            .map(|(idx, value)| {
                if idx == RAW_DATE_COLUMN {
                    parse_compact_date(&value)
                } else if value.is_empty() {
                    CellValue::Empty
                } else {
                    CellValue::Text(value)
                }
            })
            .collect();
        let mut row = reshape(cells.into_iter());

        if is_excluded(&row, exclusions) {
            excluded += 1;
            continue;
        }
        if !exclusions.doctors.is_empty() {
            for idx in [DOCUMENT_COLUMN, DOCTOR_COLUMN] {
                if let Some(CellValue::Text(s)) = row.get_mut(idx) {
                    s.retain(|c| !c.is_whitespace() && c != '*');
                }
            }
        }
        rows.push(row);
    }

    if excluded > 0 {
        log::info!("excluded {} rows by document/doctor lists", excluded);
    }
    IntakeBatch { headers, rows, excluded }
}

fn reshape<T>(values: impl Iterator<Item = T>) -> Vec<T> {
    values
        .enumerate()
        .filter(|(idx, _)| !RAW_DROPPED_COLUMNS.contains(idx))
        .skip(RAW_LEADING_DROPPED)
        .map(|(_, v)| v)
        .collect()
}

fn parse_compact_date(value: &str) -> CellValue {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return CellValue::Empty;
    }
    match NaiveDate::parse_from_str(trimmed, "%Y%m%d") {
        Ok(d) => CellValue::Date(d),
        Err(_) => CellValue::Text(value.to_string()),
    }
}

fn is_excluded(row: &[CellValue], exclusions: &Exclusions) -> bool {
    let contains_any = |idx: usize, needles: &[String]| {
        let text = row.get(idx).map(CellValue::to_text).unwrap_or_default();
        needles.iter().any(|n| text.contains(n.as_str()))
    };
    contains_any(DOCUMENT_COLUMN, &exclusions.documents) || contains_any(DOCTOR_COLUMN, &exclusions.doctors)
}
