// Cell normalization, applied when rows are read and again when they are written.
//
// Best-effort: a value that cannot be normalized is passed through unchanged,
// and the outcome says which path was taken.

use chrono::NaiveDate;

use crate::record::{CellValue, Field, FieldRole, RawRecord};

/// Canonical stored date format.
pub const DATE_FORMAT: &str = "%Y/%m/%d";

/// Result of normalizing one cell.
#[derive(Debug, Clone, PartialEq)]
pub enum CellOutcome {
    /// The value was rewritten into canonical form.
    Normalized(CellValue),
    /// The value was left as it came in.
    PassedThrough(CellValue),
}

impl CellOutcome {
    pub fn value(&self) -> &CellValue {
        match self {
            Self::Normalized(v) | Self::PassedThrough(v) => v,
        }
    }

    pub fn into_value(self) -> CellValue {
        match self {
            Self::Normalized(v) | Self::PassedThrough(v) => v,
        }
    }

    pub fn was_normalized(&self) -> bool {
        matches!(self, Self::Normalized(_))
    }
}

/// Normalize a raw cell according to its field's role.
pub fn normalize_cell(role: FieldRole, raw: CellValue) -> CellOutcome {
    match role {
        FieldRole::Date => normalize_date(raw),
        FieldRole::Id => normalize_id(raw),
        FieldRole::Text => CellOutcome::PassedThrough(raw),
    }
}

pub fn normalize_field(field: Field, raw: CellValue) -> CellOutcome {
    normalize_cell(field.role(), raw)
}

/// Normalize every field of a record in place.
pub fn normalize_record(mut record: RawRecord) -> RawRecord {
    for field in Field::ALL {
        let raw = record.take(field);
        record.set(field, normalize_field(field, raw).into_value());
    }
    record
}

fn normalize_date(raw: CellValue) -> CellOutcome {
    match raw {
        CellValue::Date(d) => CellOutcome::Normalized(CellValue::Text(d.format(DATE_FORMAT).to_string())),
        CellValue::DateTime(dt) => {
            CellOutcome::Normalized(CellValue::Text(dt.date().format(DATE_FORMAT).to_string()))
        }
        CellValue::Text(s) => match normalize_date_text(&s) {
            Some(rewritten) => CellOutcome::Normalized(CellValue::Text(rewritten)),
            None => CellOutcome::PassedThrough(CellValue::Text(s)),
        },
        other => CellOutcome::PassedThrough(other),
    }
}

fn normalize_id(raw: CellValue) -> CellOutcome {
    match raw {
        CellValue::Text(s) => match s.trim().parse::<i64>() {
            Ok(n) if !s.trim().is_empty() => CellOutcome::Normalized(CellValue::Int(n)),
            _ => CellOutcome::PassedThrough(CellValue::Text(s)),
        },
        CellValue::Float(n) if n.is_finite() && n.fract() == 0.0 && n.abs() < 9.0e15 => {
            CellOutcome::Normalized(CellValue::Int(n as i64))
        }
        other => CellOutcome::PassedThrough(other),
    }
}

/// Rewrite a date string into slash form.
///
/// A time component ("2025-01-10 09:30:00") is dropped, and `-` separators
/// become `/`. Returns `None` when the text is already canonical or is not
/// something this rule touches.
pub fn normalize_date_text(text: &str) -> Option<String> {
    if text.is_empty() {
        return None;
    }

    let date_part = if text.contains(' ') {
        text.split_whitespace().next().unwrap_or("")
    } else {
        text
    };

    let rewritten = if date_part.contains('-') {
        let parts: Vec<&str> = date_part.split('-').collect();
        if parts.len() == 3 {
            parts.join("/")
        } else {
            date_part.to_string()
        }
    } else {
        date_part.to_string()
    };

    if rewritten == text {
        None
    } else {
        Some(rewritten)
    }
}

/// Apply `normalize_date_text`, returning the input when nothing changes.
pub fn canonical_date_text(text: &str) -> String {
    normalize_date_text(text).unwrap_or_else(|| text.to_string())
}

/// Parse a canonical `YYYY/MM/DD` date.
pub fn parse_slash_date(text: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(text.trim(), DATE_FORMAT).ok()
}

/// Parse an ISO `YYYY-MM-DD` date (the form used for range bounds).
pub fn parse_iso_date(text: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d").ok()
}
