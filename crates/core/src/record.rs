// Canonical document record and the header table that maps sheet columns onto it.
//
// Rows arrive from spreadsheets as loosely typed cells keyed by header text.
// The header table is resolved once per sheet; after that every access goes
// through `Field`, never through a column position.

use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;

/// Number of recognized columns. Anything to the right of these is ignored.
pub const FIELD_COUNT: usize = 9;

/// The nine recognized fields, in canonical column order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    DepositDate,
    PatientId,
    DocumentName,
    StaffName,
    Department,
    DoctorName,
    DepartmentRequested,
    DoctorRequestDate,
    Memo,
}

/// How a field's raw cell values are normalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRole {
    Date,
    Id,
    Text,
}

impl Field {
    pub const ALL: [Field; FIELD_COUNT] = [
        Field::DepositDate,
        Field::PatientId,
        Field::DocumentName,
        Field::StaffName,
        Field::Department,
        Field::DoctorName,
        Field::DepartmentRequested,
        Field::DoctorRequestDate,
        Field::Memo,
    ];

    /// Composite key used to detect duplicate records.
    pub const DEDUP_KEY: [Field; 5] = [
        Field::DepositDate,
        Field::PatientId,
        Field::DocumentName,
        Field::Department,
        Field::DoctorName,
    ];

    /// Zero-based canonical column index.
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Field> {
        Self::ALL.get(index).copied()
    }

    /// Header text as it appears in the workbooks.
    pub fn header(self) -> &'static str {
        match self {
            Field::DepositDate => "預り日",
            Field::PatientId => "患者ID",
            Field::DocumentName => "文書名",
            Field::StaffName => "担当者名",
            Field::Department => "診療科",
            Field::DoctorName => "医師名",
            Field::DepartmentRequested => "依頼部署",
            Field::DoctorRequestDate => "医師依頼日",
            Field::Memo => "memo",
        }
    }

    /// ASCII identifier, accepted as an alternative header spelling.
    pub fn name(self) -> &'static str {
        match self {
            Field::DepositDate => "deposit_date",
            Field::PatientId => "patient_id",
            Field::DocumentName => "document_name",
            Field::StaffName => "staff_name",
            Field::Department => "department",
            Field::DoctorName => "doctor_name",
            Field::DepartmentRequested => "department_requested",
            Field::DoctorRequestDate => "doctor_request_date",
            Field::Memo => "memo",
        }
    }

    /// Look up a field by header text (Japanese header or ASCII name, trimmed).
    pub fn from_header(header: &str) -> Option<Field> {
        let header = header.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|f| f.header() == header || f.name().eq_ignore_ascii_case(header))
    }

    pub fn role(self) -> FieldRole {
        match self {
            Field::DepositDate | Field::DoctorRequestDate => FieldRole::Date,
            Field::PatientId => FieldRole::Id,
            _ => FieldRole::Text,
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.header())
    }
}

// ---------------------------------------------------------------------------
// Raw cell values
// ---------------------------------------------------------------------------

/// A cell as read from a spreadsheet, before any normalization.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum CellValue {
    #[default]
    Empty,
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
}

impl CellValue {
    /// True only for a truly absent value. `Text("")` is blank, not absent.
    pub fn is_empty(&self) -> bool {
        matches!(self, CellValue::Empty)
    }

    /// Absent, or text that is blank after trimming.
    pub fn is_blank(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// Text rendition used once a dataset is stringified. Absent becomes "".
    pub fn to_text(&self) -> String {
        match self {
            CellValue::Empty => String::new(),
            CellValue::Text(s) => s.clone(),
            CellValue::Int(n) => n.to_string(),
            CellValue::Float(n) => {
                // Integers without decimals
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    format!("{}", *n as i64)
                } else {
                    format!("{}", n)
                }
            }
            CellValue::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
            CellValue::Date(d) => d.format(crate::normalize::DATE_FORMAT).to_string(),
            CellValue::DateTime(dt) => dt.format("%Y/%m/%d %H:%M:%S").to_string(),
        }
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        CellValue::Text(s.to_string())
    }
}

impl From<String> for CellValue {
    fn from(s: String) -> Self {
        CellValue::Text(s)
    }
}

impl From<i64> for CellValue {
    fn from(n: i64) -> Self {
        CellValue::Int(n)
    }
}

impl From<NaiveDate> for CellValue {
    fn from(d: NaiveDate) -> Self {
        CellValue::Date(d)
    }
}

// ---------------------------------------------------------------------------
// Schema + header table
// ---------------------------------------------------------------------------

/// The set of recognized fields a dataset actually carries, in sheet order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Schema {
    fields: Vec<Field>,
}

impl Schema {
    pub fn new(fields: Vec<Field>) -> Self {
        let mut seen = Vec::with_capacity(fields.len());
        for f in fields {
            if !seen.contains(&f) {
                seen.push(f);
            }
        }
        Self { fields: seen }
    }

    /// All nine fields in canonical order.
    pub fn canonical() -> Self {
        Self { fields: Field::ALL.to_vec() }
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn contains(&self, field: Field) -> bool {
        self.fields.contains(&field)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Fields from `wanted` that this schema lacks.
    pub fn missing(&self, wanted: &[Field]) -> Vec<Field> {
        wanted.iter().copied().filter(|f| !self.contains(*f)).collect()
    }

    /// Set equality, ignoring column order.
    pub fn same_fields(&self, other: &Schema) -> bool {
        self.fields.len() == other.fields.len() && self.fields.iter().all(|f| other.contains(*f))
    }

    /// Header row text in this schema's order.
    pub fn headers(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.header().to_string()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderError {
    /// The same field appears under two headers.
    Duplicate { field: Field, first: usize, second: usize },
}

impl fmt::Display for HeaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Duplicate { field, first, second } => write!(
                f,
                "header '{}' appears twice (columns {} and {})",
                field,
                first + 1,
                second + 1
            ),
        }
    }
}

impl std::error::Error for HeaderError {}

/// Column position → field mapping for one sheet, resolved once at load time.
#[derive(Debug, Clone)]
pub struct HeaderTable {
    columns: Vec<Option<Field>>,
    unknown: Vec<String>,
}

impl HeaderTable {
    /// Resolve a header row. Blank headers are ignored silently, unrecognized
    /// ones are ignored and reported through `unknown()`.
    pub fn resolve<S: AsRef<str>>(headers: &[S]) -> Result<Self, HeaderError> {
        let mut columns = Vec::with_capacity(headers.len().min(FIELD_COUNT));
        let mut unknown = Vec::new();

        for (idx, header) in headers.iter().take(FIELD_COUNT).enumerate() {
            let text = header.as_ref().trim();
            if text.is_empty() {
                columns.push(None);
                continue;
            }
            match Field::from_header(text) {
                Some(field) => {
                    if let Some(first) = columns.iter().position(|c| *c == Some(field)) {
                        return Err(HeaderError::Duplicate { field, first, second: idx });
                    }
                    columns.push(Some(field));
                }
                None => {
                    unknown.push(text.to_string());
                    columns.push(None);
                }
            }
        }

        Ok(Self { columns, unknown })
    }

    pub fn schema(&self) -> Schema {
        Schema::new(self.columns.iter().flatten().copied().collect())
    }

    /// Header texts that matched no known field.
    pub fn unknown(&self) -> &[String] {
        &self.unknown
    }

    /// Map a sheet row onto a record. Cells beyond the recognized columns are dropped.
    pub fn record_from_row(&self, row: &[CellValue]) -> RawRecord {
        let mut record = RawRecord::default();
        for (cell, column) in row.iter().zip(&self.columns) {
            if let Some(field) = column {
                record.set(*field, cell.clone());
            }
        }
        record
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// A row with typed cells, as loaded (and later normalized).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawRecord {
    cells: [CellValue; FIELD_COUNT],
}

impl RawRecord {
    pub fn get(&self, field: Field) -> &CellValue {
        &self.cells[field.index()]
    }

    pub fn set(&mut self, field: Field, value: CellValue) {
        self.cells[field.index()] = value;
    }

    pub fn take(&mut self, field: Field) -> CellValue {
        std::mem::take(&mut self.cells[field.index()])
    }

    pub fn is_blank(&self) -> bool {
        self.cells.iter().all(CellValue::is_blank)
    }
}

/// A loaded sheet: the fields it carries plus its rows.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    pub schema: Schema,
    pub rows: Vec<RawRecord>,
}

impl Dataset {
    pub fn new(schema: Schema, rows: Vec<RawRecord>) -> Self {
        Self { schema, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// One row of the canonical dataset, every field as text ("" = absent).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
pub struct DocumentRecord {
    pub deposit_date: String,
    pub patient_id: String,
    pub document_name: String,
    pub staff_name: String,
    pub department: String,
    pub doctor_name: String,
    pub department_requested: String,
    pub doctor_request_date: String,
    pub memo: String,
}

impl DocumentRecord {
    /// Build from nine values in canonical column order.
    pub fn from_values<S: Into<String>>(values: [S; FIELD_COUNT]) -> Self {
        let mut record = Self::default();
        for (field, value) in Field::ALL.into_iter().zip(values) {
            record.set(field, value.into());
        }
        record
    }

    /// Stringify and fill: every cell becomes text, absent cells become "".
    pub fn from_raw(raw: &RawRecord) -> Self {
        let mut record = Self::default();
        for field in Field::ALL {
            record.set(field, raw.get(field).to_text());
        }
        record
    }

    pub fn get(&self, field: Field) -> &str {
        match field {
            Field::DepositDate => &self.deposit_date,
            Field::PatientId => &self.patient_id,
            Field::DocumentName => &self.document_name,
            Field::StaffName => &self.staff_name,
            Field::Department => &self.department,
            Field::DoctorName => &self.doctor_name,
            Field::DepartmentRequested => &self.department_requested,
            Field::DoctorRequestDate => &self.doctor_request_date,
            Field::Memo => &self.memo,
        }
    }

    pub fn set(&mut self, field: Field, value: String) {
        let slot = match field {
            Field::DepositDate => &mut self.deposit_date,
            Field::PatientId => &mut self.patient_id,
            Field::DocumentName => &mut self.document_name,
            Field::StaffName => &mut self.staff_name,
            Field::Department => &mut self.department,
            Field::DoctorName => &mut self.doctor_name,
            Field::DepartmentRequested => &mut self.department_requested,
            Field::DoctorRequestDate => &mut self.doctor_request_date,
            Field::Memo => &mut self.memo,
        };
        *slot = value;
    }

    /// Values for the given fields, in order.
    pub fn project(&self, fields: &[Field]) -> Vec<&str> {
        fields.iter().map(|f| self.get(*f)).collect()
    }
}
