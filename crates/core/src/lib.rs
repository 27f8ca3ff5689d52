//! `doctrack-core`: record model, cell normalization, date ranges.
//!
//! Pure crate: no file access. Readers and writers live in `doctrack-io`.

pub mod date_range;
pub mod normalize;
pub mod record;
pub mod sort;

pub use date_range::{resolve_range, DateRange, ResolvedRange};
pub use normalize::{normalize_cell, normalize_record, CellOutcome};
pub use record::{CellValue, Dataset, DocumentRecord, Field, FieldRole, HeaderTable, RawRecord, Schema};
