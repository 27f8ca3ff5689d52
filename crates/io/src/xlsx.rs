// XLSX reading (calamine) and the shared writing primitives (rust_xlsxwriter)

use std::path::Path;

use calamine::{open_workbook_auto, Data, Reader};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use rust_xlsxwriter::{Format, FormatAlign, Workbook, Worksheet, XlsxError};

use doctrack_core::record::FIELD_COUNT;
use doctrack_core::{CellValue, Dataset, Field, HeaderTable};

use crate::error::IoError;

/// Number format applied to every date cell written.
pub const DATE_NUM_FORMAT: &str = "yyyy/mm/dd";

/// Number format applied to integral patient ids.
pub const ID_NUM_FORMAT: &str = "0";

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

/// Cell values of one worksheet, addressed from A1 (row 0, col 0).
#[derive(Debug, Clone, Default)]
pub struct SheetGrid {
    pub name: String,
    pub rows: Vec<Vec<CellValue>>,
}

impl SheetGrid {
    pub fn is_empty(&self) -> bool {
        self.rows.iter().all(|r| r.iter().all(CellValue::is_blank))
    }

    pub fn width(&self) -> usize {
        self.rows.iter().map(Vec::len).max().unwrap_or(0)
    }
}

/// Header row plus data rows of a worksheet.
#[derive(Debug, Clone)]
pub struct SheetRows {
    pub sheet_name: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
}

/// A database sheet resolved against the field table.
#[derive(Debug, Clone)]
pub struct LoadedSheet {
    pub dataset: Dataset,
    /// Header texts that matched no field; those columns were ignored.
    pub unknown_headers: Vec<String>,
    /// Rows left out at the read boundary (blank, or no deposit date).
    pub skipped_rows: usize,
}

/// Read the first worksheet of a workbook into a grid of typed cells.
///
/// "Not found" and "unreadable" are reported as distinct failures.
pub fn read_first_sheet(path: &Path) -> Result<SheetGrid, IoError> {
    // Probe with a plain open first so the OS error kind survives
    std::fs::File::open(path).map_err(|e| IoError::from_read(path, e))?;

    let mut workbook = open_workbook_auto(path).map_err(|e| IoError::unreadable(path, e))?;
    let sheet_names = workbook.sheet_names().to_vec();
    let Some(name) = sheet_names.first().cloned() else {
        return Err(IoError::unreadable(path, "workbook contains no sheets"));
    };

    let range = workbook
        .worksheet_range(&name)
        .map_err(|e| IoError::unreadable(path, format!("sheet '{name}': {e}")))?;

    let (height, width) = range.get_size();
    if height == 0 || width == 0 {
        return Ok(SheetGrid { name, rows: Vec::new() });
    }

    // Range start offset (data may not begin at A1)
    let (start_row, start_col) = range.start().unwrap_or((0, 0));
    let mut rows: Vec<Vec<CellValue>> = vec![Vec::new(); start_row as usize];
    for row in range.rows() {
        let mut cells = vec![CellValue::Empty; start_col as usize];
        cells.extend(row.iter().map(cell_from_data));
        rows.push(cells);
    }

    log::debug!("read {} rows from '{}' in {}", rows.len(), name, path.display());
    Ok(SheetGrid { name, rows })
}

/// Read the header row and data rows of the first worksheet.
///
/// Only the first `column_limit` columns are kept when a limit is given.
pub fn read_rows(path: &Path, column_limit: Option<usize>) -> Result<SheetRows, IoError> {
    let grid = read_first_sheet(path)?;
    if grid.is_empty() {
        return Err(IoError::EmptySheet(path.to_path_buf()));
    }

    let limit = column_limit.unwrap_or(usize::MAX);
    let mut iter = grid.rows.into_iter();
    let headers: Vec<String> = iter
        .next()
        .unwrap_or_default()
        .iter()
        .take(limit)
        .map(CellValue::to_text)
        .collect();
    if headers.iter().all(|h| h.trim().is_empty()) {
        return Err(IoError::EmptySheet(path.to_path_buf()));
    }

    let rows = iter
        .map(|mut r| {
            r.truncate(limit);
            r
        })
        .collect();

    Ok(SheetRows { sheet_name: grid.name, headers, rows })
}

/// Read a database workbook: first nine columns, headers resolved to fields.
///
/// Blank rows are dropped, and so are rows without a deposit date when the
/// sheet has that column.
pub fn read_dataset(path: &Path) -> Result<LoadedSheet, IoError> {
    let sheet = read_rows(path, Some(FIELD_COUNT))?;
    let table = HeaderTable::resolve(&sheet.headers).map_err(|source| IoError::Header {
        path: path.to_path_buf(),
        source,
    })?;

    for header in table.unknown() {
        log::warn!("{}: unknown column '{}' ignored", path.display(), header);
    }

    let schema = table.schema();
    let needs_date = schema.contains(Field::DepositDate);
    let total = sheet.rows.len();
    let records: Vec<_> = sheet
        .rows
        .iter()
        .map(|row| table.record_from_row(row))
        .filter(|r| !r.is_blank())
        .filter(|r| !needs_date || !r.get(Field::DepositDate).is_blank())
        .collect();

    let skipped_rows = total - records.len();
    log::info!(
        "loaded {} rows from {} ({} skipped at read)",
        records.len(),
        path.display(),
        skipped_rows
    );

    Ok(LoadedSheet {
        dataset: Dataset::new(schema, records),
        unknown_headers: table.unknown().to_vec(),
        skipped_rows,
    })
}

/// Convert a calamine cell into the core cell type.
pub fn cell_from_data(cell: &Data) -> CellValue {
    match cell {
        Data::Empty => CellValue::Empty,
        Data::String(s) if s.is_empty() => CellValue::Empty,
        Data::String(s) => CellValue::Text(s.clone()),
        Data::Int(n) => CellValue::Int(*n),
        Data::Float(n) => CellValue::Float(*n),
        Data::Bool(b) => CellValue::Bool(*b),
        Data::DateTime(dt) => {
            // 1900 date system assumed (calamine doesn't expose the 1904 flag)
            from_excel_serial(dt.as_f64()).unwrap_or(CellValue::Float(dt.as_f64()))
        }
        Data::DateTimeIso(s) => parse_iso_datetime(s),
        Data::DurationIso(s) => CellValue::Text(s.clone()),
        Data::Error(e) => CellValue::Text(format!("#{:?}", e)),
    }
}

fn parse_iso_datetime(s: &str) -> CellValue {
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
        return CellValue::DateTime(dt);
    }
    match NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        Ok(d) => CellValue::Date(d),
        Err(_) => CellValue::Text(s.to_string()),
    }
}

fn excel_epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1899, 12, 30).unwrap_or_default()
}

/// Excel serial → date (whole days) or datetime (with a time fraction).
pub fn from_excel_serial(serial: f64) -> Option<CellValue> {
    if !serial.is_finite() || serial < 1.0 {
        return None;
    }
    let days = serial.floor() as i64;
    // Serials before 1900-03-01 are off by one (phantom 1900-02-29)
    let base = if days < 61 { excel_epoch() + Duration::days(1) } else { excel_epoch() };
    let date = base.checked_add_signed(Duration::days(days))?;

    let seconds = ((serial - serial.floor()) * 86_400.0).round() as i64;
    if seconds == 0 || seconds >= 86_400 {
        return Some(CellValue::Date(date));
    }
    let time = date.and_hms_opt(0, 0, 0)? + Duration::seconds(seconds);
    Some(CellValue::DateTime(time))
}

/// Date → Excel serial (1900 date system, dates after 1900-02-28).
pub fn to_excel_serial(date: NaiveDate) -> f64 {
    (date - excel_epoch()).num_days() as f64
}

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

/// Horizontal placement of a column's cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnAlign {
    Center,
    /// Left-aligned, shrunk to fit the column width.
    LeftShrink,
    General,
}

/// Named cell format for one output column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnStyle {
    pub align: ColumnAlign,
}

impl ColumnStyle {
    pub const CENTER: Self = Self { align: ColumnAlign::Center };
    pub const LEFT_SHRINK: Self = Self { align: ColumnAlign::LeftShrink };
    pub const GENERAL: Self = Self { align: ColumnAlign::General };

    /// Base format for the column's cells; all vertically centered.
    pub fn format(&self) -> Format {
        let format = Format::new().set_align(FormatAlign::VerticalCenter);
        match self.align {
            ColumnAlign::Center => format.set_align(FormatAlign::Center),
            ColumnAlign::LeftShrink => format.set_align(FormatAlign::Left).set_shrink(),
            ColumnAlign::General => format,
        }
    }
}

/// A value as it will be stored in the output cell.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputCell {
    Blank,
    Text(String),
    Number(f64),
    /// Integral id written with the `0` number format.
    Id(i64),
    Bool(bool),
    Date(NaiveDate),
}

impl OutputCell {
    /// Typed write of a cell that kept its read-time type.
    pub fn from_cell(cell: &CellValue) -> Self {
        match cell {
            CellValue::Empty => Self::Blank,
            CellValue::Text(s) if s.is_empty() => Self::Blank,
            CellValue::Text(s) => Self::Text(s.clone()),
            CellValue::Int(n) => Self::Number(*n as f64),
            CellValue::Float(n) => Self::Number(*n),
            CellValue::Bool(b) => Self::Bool(*b),
            CellValue::Date(d) => Self::Date(*d),
            CellValue::DateTime(dt) => Self::Date(dt.date()),
        }
    }

    /// Stored date text → real date when it parses, else text.
    pub fn date_from_text(text: &str) -> Self {
        if text.is_empty() {
            return Self::Blank;
        }
        match doctrack_core::normalize::parse_slash_date(&doctrack_core::normalize::canonical_date_text(text)) {
            Some(d) => Self::Date(d),
            None => Self::Text(text.to_string()),
        }
    }

    /// Stored id text → integer when it parses, else text.
    ///
    /// Accepts exactly what the id normalizer turns into a number, so an id
    /// such as "1,234" stays text and compares equal after a re-read.
    pub fn id_from_text(text: &str) -> Self {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Self::Blank;
        }
        match trimmed.parse::<i64>() {
            Ok(n) => Self::Id(n),
            Err(_) => Self::Text(text.to_string()),
        }
    }

    pub fn text(text: &str) -> Self {
        if text.is_empty() {
            Self::Blank
        } else {
            Self::Text(text.to_string())
        }
    }
}

/// Write one cell using the column's base format.
pub fn write_cell(
    worksheet: &mut Worksheet,
    row: u32,
    col: u16,
    value: &OutputCell,
    base: &Format,
) -> Result<(), XlsxError> {
    match value {
        OutputCell::Blank => {
            worksheet.write_blank(row, col, base)?;
        }
        OutputCell::Text(s) => {
            worksheet.write_string_with_format(row, col, s, base)?;
        }
        OutputCell::Number(n) => {
            worksheet.write_number_with_format(row, col, *n, base)?;
        }
        OutputCell::Id(n) => {
            let format = base.clone().set_num_format(ID_NUM_FORMAT);
            worksheet.write_number_with_format(row, col, *n as f64, &format)?;
        }
        OutputCell::Bool(b) => {
            worksheet.write_boolean_with_format(row, col, *b, base)?;
        }
        OutputCell::Date(d) => {
            let format = base.clone().set_num_format(DATE_NUM_FORMAT);
            worksheet.write_number_with_format(row, col, to_excel_serial(*d), &format)?;
        }
    }
    Ok(())
}

/// Write a header row followed by data rows, one base format per column.
pub fn write_table(
    worksheet: &mut Worksheet,
    headers: &[String],
    rows: &[Vec<OutputCell>],
    styles: &[ColumnStyle],
) -> Result<(), XlsxError> {
    let header_format = Format::new().set_align(FormatAlign::VerticalCenter);
    for (col, header) in headers.iter().enumerate() {
        worksheet.write_string_with_format(0, col as u16, header, &header_format)?;
    }

    let formats: Vec<Format> = styles.iter().map(ColumnStyle::format).collect();
    let fallback = ColumnStyle::GENERAL.format();
    for (r, row) in rows.iter().enumerate() {
        for (c, value) in row.iter().enumerate() {
            let base = formats.get(c).unwrap_or(&fallback);
            write_cell(worksheet, (r + 1) as u32, c as u16, value, base)?;
        }
    }
    Ok(())
}

/// Save a workbook, mapping permission problems to `IoError::Locked`.
pub fn save_workbook(workbook: &mut Workbook, path: &Path) -> Result<(), IoError> {
    check_writable(path)?;
    workbook.save(path).map_err(|e| xlsx_write_error(path, e))
}

/// Open an existing target for writing so a lock surfaces as
/// `IoError::Locked`; the writers only report a generic error.
pub(crate) fn check_writable(path: &Path) -> Result<(), IoError> {
    if path.exists() {
        std::fs::OpenOptions::new()
            .write(true)
            .open(path)
            .map_err(|e| IoError::from_write(path, e))?;
    }
    Ok(())
}

pub(crate) fn xlsx_write_error(path: &Path, err: XlsxError) -> IoError {
    match err {
        XlsxError::IoError(io) => IoError::from_write(path, io),
        other => IoError::write(path, other),
    }
}
