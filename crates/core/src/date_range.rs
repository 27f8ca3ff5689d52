// Date-range resolution for reports: optional filtering by deposit date plus
// the display and file-name renditions of the dataset's first and last dates.

use chrono::NaiveDate;
use serde::Serialize;

use crate::normalize::{canonical_date_text, parse_iso_date, parse_slash_date, DATE_FORMAT};
use crate::record::{DocumentRecord, Field, Schema};

/// Display text used when there is nothing to report.
pub const NO_DATA_DISPLAY: &str = "no data";

/// File token used when there is nothing to report.
pub const NO_DATA_TOKEN: &str = "no_data";

const DISPLAY_FORMAT: &str = "%Y年%m月%d日";
const FILE_FORMAT: &str = "%Y%m%d";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DateRange {
    /// e.g. "2023年05月01日"
    pub start_display: String,
    pub end_display: String,
    /// e.g. "20230501-20230530", or "no_data"
    pub file_token: String,
}

impl DateRange {
    pub fn no_data() -> Self {
        Self {
            start_display: NO_DATA_DISPLAY.to_string(),
            end_display: NO_DATA_DISPLAY.to_string(),
            file_token: NO_DATA_TOKEN.to_string(),
        }
    }

    pub fn is_no_data(&self) -> bool {
        self.file_token == NO_DATA_TOKEN
    }
}

/// Output of `resolve_range`.
#[derive(Debug, Clone)]
pub struct ResolvedRange {
    pub records: Vec<DocumentRecord>,
    pub range: DateRange,
    /// True when both bounds were valid and the records were filtered by them.
    pub bounded: bool,
}

/// Inclusive date bounds parsed from ISO `YYYY-MM-DD` strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateBounds {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateBounds {
    /// Both bounds must be present and parse; anything else means "unbounded".
    pub fn parse(start: Option<&str>, end: Option<&str>) -> Option<Self> {
        let (start_text, end_text) = match (start, end) {
            (Some(s), Some(e)) if !s.trim().is_empty() && !e.trim().is_empty() => (s, e),
            _ => return None,
        };
        match (parse_iso_date(start_text), parse_iso_date(end_text)) {
            (Some(start), Some(end)) => Some(Self { start, end }),
            _ => {
                log::warn!(
                    "ignoring date range {start_text}..{end_text}: expected YYYY-MM-DD, reporting all dates"
                );
                None
            }
        }
    }

    fn slash_bounds(&self) -> (String, String) {
        (
            self.start.format(DATE_FORMAT).to_string(),
            self.end.format(DATE_FORMAT).to_string(),
        )
    }
}

/// Filter `records` to the optional bounds and describe the resulting date span.
///
/// Never fails: dates that do not parse are rendered from their raw text.
pub fn resolve_range(
    schema: &Schema,
    mut records: Vec<DocumentRecord>,
    start: Option<&str>,
    end: Option<&str>,
) -> ResolvedRange {
    if !schema.contains(Field::DepositDate) || records.is_empty() {
        return ResolvedRange { records, range: DateRange::no_data(), bounded: false };
    }

    let bounds = DateBounds::parse(start, end);
    if let Some(bounds) = bounds {
        let (lo, hi) = bounds.slash_bounds();
        for record in records.iter_mut() {
            record.deposit_date = canonical_date_text(&record.deposit_date);
        }
        // Fixed-width zero-padded YYYY/MM/DD compares correctly as text
        records.retain(|r| {
            let d = r.deposit_date.as_str();
            !d.is_empty() && d >= lo.as_str() && d <= hi.as_str()
        });
    }

    let range = span_of(&records);
    ResolvedRange { records, range, bounded: bounds.is_some() }
}

/// First/last deposit date among `records`, rendered for display and file names.
pub fn span_of(records: &[DocumentRecord]) -> DateRange {
    let mut dates = records
        .iter()
        .map(|r| r.deposit_date.as_str())
        .filter(|d| !d.is_empty());

    let Some(first) = dates.next() else {
        return DateRange::no_data();
    };
    let (min, max) = dates.fold((first, first), |(lo, hi), d| (lo.min(d), hi.max(d)));

    let (start_display, start_file) = render_date(min);
    let (end_display, end_file) = render_date(max);
    DateRange {
        start_display,
        end_display,
        file_token: format!("{start_file}-{end_file}"),
    }
}

/// Render one stored date as (display, file) text, falling back to the raw value.
pub fn render_date(raw: &str) -> (String, String) {
    match parse_slash_date(&canonical_date_text(raw)) {
        Some(date) => (format_display(date), date.format(FILE_FORMAT).to_string()),
        None => (raw.to_string(), raw.replace('/', "")),
    }
}

/// "YYYY年MM月DD日"
pub fn format_display(date: NaiveDate) -> String {
    date.format(DISPLAY_FORMAT).to_string()
}
