// The accumulated database workbook: one sheet, header row, records in display order.

use std::path::{Path, PathBuf};

use rust_xlsxwriter::Workbook;

use doctrack_core::sort::sort_records;
use doctrack_core::{DocumentRecord, Field, FieldRole, Schema};

use crate::error::IoError;
use crate::xlsx::{save_workbook, write_table, xlsx_write_error, ColumnStyle, OutputCell};
use crate::xlsx_layout::{read_layout_or_default, SheetLayout};

/// Sheet name used when the database is created from scratch.
pub const SHEET_NAME: &str = "Sheet1";

#[derive(Debug, Clone, PartialEq)]
pub struct WriteSummary {
    pub path: PathBuf,
    pub rows_written: usize,
    /// Column widths / row heights / merges taken over from the previous file.
    pub layout_carried: bool,
}

/// Cell format for a database column.
pub fn column_style(field: Field) -> ColumnStyle {
    match field {
        Field::DocumentName | Field::StaffName | Field::Memo => ColumnStyle::LEFT_SHRINK,
        _ => ColumnStyle::CENTER,
    }
}

/// Typed output value for one stored field.
pub fn output_cell(field: Field, value: &str) -> OutputCell {
    match field.role() {
        FieldRole::Date => OutputCell::date_from_text(value),
        FieldRole::Id => OutputCell::id_from_text(value),
        FieldRole::Text => OutputCell::text(value),
    }
}

/// Write `records` as the whole database, columns in `schema` order.
///
/// Rows are sorted by deposit date, department, patient id. With
/// `create_new == false` and an existing file, the previous sheet's column
/// widths, custom row heights and merges are carried over.
pub fn write_rows(
    path: &Path,
    schema: &Schema,
    records: &[DocumentRecord],
    create_new: bool,
) -> Result<WriteSummary, IoError> {
    let layout = if !create_new && path.exists() {
        read_layout_or_default(path)
    } else {
        SheetLayout::default()
    };

    let mut sorted = records.to_vec();
    sort_records(&mut sorted);

    let fields = schema.fields();
    let headers = schema.headers();
    let styles: Vec<ColumnStyle> = fields.iter().map(|f| column_style(*f)).collect();
    let rows: Vec<Vec<OutputCell>> = sorted
        .iter()
        .map(|r| fields.iter().map(|f| output_cell(*f, r.get(*f))).collect())
        .collect();

    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name(SHEET_NAME).map_err(|e| xlsx_write_error(path, e))?;
    layout.apply(worksheet).map_err(|e| xlsx_write_error(path, e))?;
    write_table(worksheet, &headers, &rows, &styles).map_err(|e| xlsx_write_error(path, e))?;
    save_workbook(&mut workbook, path)?;

    log::info!("wrote {} rows to {}", rows.len(), path.display());
    Ok(WriteSummary {
        path: path.to_path_buf(),
        rows_written: rows.len(),
        layout_carried: !layout.is_empty(),
    })
}
