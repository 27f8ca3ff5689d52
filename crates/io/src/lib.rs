// File I/O: database and assignment-list workbooks, CSV export intake,
// report rendering, file housekeeping.

pub mod assignment;
pub mod csv;
pub mod database;
pub mod error;
pub mod files;
pub mod report;
pub mod xlsx;
pub mod xlsx_layout;
pub mod xlsx_patch;

pub use error::IoError;
pub use report::{render_report, report_file_name, ReportGrid, ReportSpec};
pub use xlsx::{read_dataset, read_rows, LoadedSheet, SheetRows};
