// The staff assignment list fed by CSV intake: append unseen rows, keep the
// sheet sorted by date, department, patient id.
//
// The workbook is edited in place (it is usually macro-enabled and carries
// other sheets), so only cells of the first worksheet change.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;

use doctrack_core::sort::DisplayKey;
use doctrack_core::CellValue;

use crate::csv::IntakeBatch;
use crate::error::IoError;
use crate::xlsx::{read_rows, ColumnAlign, OutputCell, DATE_NUM_FORMAT, ID_NUM_FORMAT};
use crate::xlsx_patch::SheetPatch;

/// Leading columns compared when deciding whether a row is already listed.
const KEY_COLUMNS: usize = 6;
/// Columns A..I move together when the list is sorted.
const SORTED_COLUMNS: u16 = 9;
const DATE_COLUMN: usize = 0;
const ID_COLUMN: usize = 1;
const DEPARTMENT_COLUMN: usize = 4;

#[derive(Debug, Clone, PartialEq)]
pub struct AppendSummary {
    pub path: PathBuf,
    pub appended: usize,
    pub already_listed: usize,
    pub total_rows: usize,
}

/// Append `batch` to the assignment list at `path`, skipping rows already
/// present, and sort the data rows.
///
/// Existing rows run from row 2 to the first blank row; new rows go right
/// after them. The list must already exist; a sheet without headers takes the
/// batch's. Repeats within the batch itself are skipped as well.
pub fn append_rows(path: &Path, batch: &IntakeBatch) -> Result<AppendSummary, IoError> {
    let (has_headers, mut rows) = match read_rows(path, None) {
        Ok(sheet) => {
            let rows: Vec<Vec<CellValue>> = sheet
                .rows
                .into_iter()
                .take_while(|r| !r.iter().all(CellValue::is_blank))
                .collect();
            (true, rows)
        }
        Err(IoError::EmptySheet(_)) => (false, Vec::new()),
        Err(e) => return Err(e),
    };
    let mut patch = SheetPatch::open(path)?;

    if !has_headers {
        let style = patch.cell_style(ColumnAlign::General, None);
        for (col, header) in batch.headers.iter().enumerate() {
            patch.set(0, col as u16, OutputCell::text(header), style);
        }
    }

    let mut listed: HashSet<Vec<String>> = rows.iter().map(|r| row_key(r)).collect();
    let mut appended = 0;
    let mut already_listed = 0;
    for row in &batch.rows {
        if !listed.insert(row_key(row)) {
            already_listed += 1;
            continue;
        }
        // header is sheet row 0, data follows
        let sheet_row = (rows.len() + 1) as u32;
        for (idx, cell) in row.iter().enumerate() {
            let value = output_cell(idx, cell);
            let style = match column_align(idx) {
                Some(align) => patch.cell_style(align, num_format(&value)),
                None => None,
            };
            patch.set(sheet_row, idx as u16, value, style);
        }
        rows.push(row.clone());
        appended += 1;
    }

    let mut order: Vec<u32> = (0..rows.len() as u32).collect();
    order.sort_by_cached_key(|&i| sort_key(&rows[i as usize]));
    if order.iter().enumerate().any(|(pos, &i)| pos as u32 != i) {
        let sources: Vec<u32> = order.iter().map(|i| i + 1).collect();
        patch.reorder_rows(1, &sources, 0..SORTED_COLUMNS);
    }

    patch.save(path)?;

    log::info!(
        "assignment list {}: {} appended, {} already listed",
        path.display(),
        appended,
        already_listed
    );
    Ok(AppendSummary {
        path: path.to_path_buf(),
        appended,
        already_listed,
        total_rows: rows.len(),
    })
}

/// Alignment of an appended cell; columns past F keep whatever the sheet has.
fn column_align(idx: usize) -> Option<ColumnAlign> {
    match idx {
        0 | 1 | 4 | 5 => Some(ColumnAlign::Center),
        2 | 3 => Some(ColumnAlign::LeftShrink),
        _ => None,
    }
}

fn num_format(value: &OutputCell) -> Option<&'static str> {
    match value {
        OutputCell::Date(_) => Some(DATE_NUM_FORMAT),
        OutputCell::Id(_) => Some(ID_NUM_FORMAT),
        _ => None,
    }
}

fn output_cell(idx: usize, cell: &CellValue) -> OutputCell {
    match (idx, cell) {
        (DATE_COLUMN, CellValue::Text(s)) => OutputCell::date_from_text(s),
        // the list stores export ids as numbers, separators removed
        (ID_COLUMN, CellValue::Text(s)) => match OutputCell::id_from_text(&s.replace(',', "")) {
            OutputCell::Id(n) => OutputCell::Id(n),
            _ => OutputCell::text(s),
        },
        (ID_COLUMN, CellValue::Int(n)) => OutputCell::Id(*n),
        (ID_COLUMN, CellValue::Float(n)) if n.fract() == 0.0 && n.abs() < 9.0e15 => OutputCell::Id(*n as i64),
        _ => OutputCell::from_cell(cell),
    }
}

/// First six columns as text, date as `YYYYMMDD`, id without separators.
fn row_key(row: &[CellValue]) -> Vec<String> {
    (0..KEY_COLUMNS)
        .map(|idx| {
            let cell = row.get(idx).unwrap_or(&CellValue::Empty);
            match idx {
                DATE_COLUMN => date_key(cell),
                ID_COLUMN => cell.to_text().trim().replace(',', ""),
                _ => cell.to_text(),
            }
        })
        .collect()
}

fn date_key(cell: &CellValue) -> String {
    match cell {
        CellValue::Date(d) => d.format("%Y%m%d").to_string(),
        CellValue::DateTime(dt) => dt.date().format("%Y%m%d").to_string(),
        other => {
            let text = other.to_text();
            ["%Y-%m-%d", "%Y/%m/%d"]
                .iter()
                .find_map(|f| NaiveDate::parse_from_str(text.trim(), f).ok())
                .map(|d| d.format("%Y%m%d").to_string())
                .unwrap_or(text)
        }
    }
}

fn sort_key(row: &[CellValue]) -> DisplayKey {
    let text = |idx: usize| row.get(idx).map(CellValue::to_text).unwrap_or_default();
    DisplayKey::new(
        &text(DATE_COLUMN),
        &text(DEPARTMENT_COLUMN),
        &text(ID_COLUMN).replace(',', ""),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn keys_compare_dates_as_compact_text() {
        let from_sheet = vec![
            CellValue::Date(ymd(2025, 1, 10)),
            CellValue::Int(1234),
            "山田".into(),
            "診断書".into(),
            "内科".into(),
            "田中".into(),
            "memo differs".into(),
        ];
        let from_csv = vec![
            CellValue::Text("2025-01-10".into()),
            CellValue::Text("1,234".into()),
            "山田".into(),
            "診断書".into(),
            "内科".into(),
            "田中".into(),
        ];
        assert_eq!(row_key(&from_sheet), row_key(&from_csv));
        assert_eq!(row_key(&from_csv)[0], "20250110");
    }

    #[test]
    fn sort_uses_date_department_then_id() {
        let mut rows = vec![
            vec![CellValue::Date(ymd(2025, 1, 11)), CellValue::Int(1), "".into(), "".into(), "内科".into()],
            vec![CellValue::Date(ymd(2025, 1, 10)), CellValue::Int(20), "".into(), "".into(), "内科".into()],
            vec![CellValue::Date(ymd(2025, 1, 10)), CellValue::Int(3), "".into(), "".into(), "内科".into()],
        ];
        rows.sort_by_cached_key(|r| sort_key(r));
        let ids: Vec<String> = rows.iter().map(|r| r[1].to_text()).collect();
        assert_eq!(ids, ["3", "20", "1"]);
    }

    #[test]
    fn output_types_for_date_and_id_columns() {
        assert_eq!(output_cell(0, &CellValue::Date(ymd(2025, 1, 10))), OutputCell::Date(ymd(2025, 1, 10)));
        assert_eq!(output_cell(0, &"2025-01-10".into()), OutputCell::Date(ymd(2025, 1, 10)));
        assert_eq!(output_cell(1, &CellValue::Float(77.0)), OutputCell::Id(77));
        assert_eq!(output_cell(1, &"1,234".into()), OutputCell::Id(1234));
        assert_eq!(output_cell(2, &"x".into()), OutputCell::Text("x".into()));
    }

    #[test]
    fn only_columns_a_to_f_get_formats() {
        assert_eq!(column_align(0), Some(ColumnAlign::Center));
        assert_eq!(column_align(3), Some(ColumnAlign::LeftShrink));
        assert_eq!(column_align(6), None);
        assert_eq!(num_format(&OutputCell::Id(1)), Some("0"));
        assert_eq!(num_format(&OutputCell::Date(ymd(2025, 1, 10))), Some("yyyy/mm/dd"));
        assert_eq!(num_format(&OutputCell::Text("a".into())), None);
        assert_eq!(output_cell(1, &"A-1,2".into()), OutputCell::Text("A-1,2".into()));
    }
}
