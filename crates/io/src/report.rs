// Staff × department report: a pure grid layout, then rendering into a copy
// of the template (or a blank workbook).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use rust_xlsxwriter::{Format, Workbook};

use doctrack_core::DateRange;
use doctrack_recon::Aggregation;

use crate::error::IoError;
use crate::xlsx::{save_workbook, write_cell, xlsx_write_error, OutputCell};
use crate::xlsx_patch::SheetPatch;

/// Label of the name column (A2).
pub const NAME_HEADER: &str = "氏名";
/// Label of the total row, and of the total pseudo-department.
pub const TOTAL_LABEL: &str = "合計";

/// Row of the first staff member (1-based).
const FIRST_STAFF_ROW: u32 = 3;
/// Column of the first department (1-based).
const FIRST_DEPARTMENT_COL: u16 = 2;

/// What goes into the report besides the counts.
#[derive(Debug, Clone, Copy)]
pub struct ReportSpec<'a> {
    pub label: &'a str,
    pub staff_order: &'a [String],
    pub department_order: &'a [String],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GridValue {
    Text(String),
    Count(usize),
}

/// Report cells keyed by 1-based (row, column).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReportGrid {
    cells: BTreeMap<(u32, u16), GridValue>,
    total_row: u32,
}

impl ReportGrid {
    /// Lay out the matrix.
    ///
    /// Row 1 holds the title, row 2 the headers (only when departments are
    /// configured), then one row per staff member and a final total row. A
    /// `合計` department is never read from the pair counts: staff rows get
    /// the sum of their other department columns, the total row gets the sum
    /// of all staff totals.
    pub fn build(spec: &ReportSpec<'_>, aggregation: &Aggregation, range: &DateRange) -> Self {
        let mut grid = ReportGrid::default();
        grid.put(
            1,
            1,
            GridValue::Text(format!("{} {}-{}", spec.label, range.start_display, range.end_display)),
        );

        if !spec.department_order.is_empty() {
            grid.put(2, 1, GridValue::Text(NAME_HEADER.to_string()));
            for (col, department) in department_columns(spec.department_order) {
                grid.put(2, col, GridValue::Text(department.clone()));
            }
        }

        let total_col = department_columns(spec.department_order)
            .find(|(_, d)| d.as_str() == TOTAL_LABEL)
            .map(|(col, _)| col);

        let mut row = FIRST_STAFF_ROW;
        for staff in spec.staff_order {
            grid.put(row, 1, GridValue::Text(staff.clone()));
            let mut running = 0;
            for (col, department) in department_columns(spec.department_order) {
                if department == TOTAL_LABEL {
                    continue;
                }
                let count = aggregation.pair_count(staff, department);
                running += count;
                grid.put(row, col, GridValue::Count(count));
            }
            if let Some(col) = total_col {
                grid.put(row, col, GridValue::Count(running));
            }
            row += 1;
        }

        grid.total_row = row;
        grid.put(row, 1, GridValue::Text(TOTAL_LABEL.to_string()));
        for (col, department) in department_columns(spec.department_order) {
            if department == TOTAL_LABEL {
                continue;
            }
            grid.put(row, col, GridValue::Count(aggregation.department_total(department)));
        }
        if let Some(col) = total_col {
            grid.put(row, col, GridValue::Count(aggregation.grand_total()));
        }

        grid
    }

    fn put(&mut self, row: u32, col: u16, value: GridValue) {
        self.cells.insert((row, col), value);
    }

    pub fn get(&self, row: u32, col: u16) -> Option<&GridValue> {
        self.cells.get(&(row, col))
    }

    pub fn count(&self, row: u32, col: u16) -> Option<usize> {
        match self.get(row, col)? {
            GridValue::Count(n) => Some(*n),
            GridValue::Text(_) => None,
        }
    }

    pub fn text(&self, row: u32, col: u16) -> Option<&str> {
        match self.get(row, col)? {
            GridValue::Text(s) => Some(s.as_str()),
            GridValue::Count(_) => None,
        }
    }

    /// 1-based row of the `合計` row.
    pub fn total_row(&self) -> u32 {
        self.total_row
    }

    /// Cells in row-major order, 1-based addresses.
    pub fn cells(&self) -> impl Iterator<Item = (u32, u16, &GridValue)> {
        self.cells.iter().map(|(&(r, c), v)| (r, c, v))
    }
}

fn department_columns(departments: &[String]) -> impl Iterator<Item = (u16, &String)> {
    departments
        .iter()
        .enumerate()
        .map(|(idx, d)| (FIRST_DEPARTMENT_COL + idx as u16, d))
}

/// "<label><file token>.xlsx"
pub fn report_file_name(label: &str, file_token: &str) -> String {
    format!("{label}{file_token}.xlsx")
}

/// Write `grid` to `output`.
///
/// With a template, the template file is copied and the grid written into
/// its first sheet; cells keep the template's formatting, and other sheets,
/// formulas and parts stay as they are. Without one (or when it is missing)
/// a blank single-sheet workbook is used. Returns the written path.
pub fn render_report(template: Option<&Path>, grid: &ReportGrid, output: &Path) -> Result<PathBuf, IoError> {
    match template.filter(|t| t.exists()) {
        Some(template) => {
            log::debug!("rendering into template {}", template.display());
            let mut patch = SheetPatch::open(template)?;
            for (row, col, value) in grid.cells() {
                patch.set(row - 1, col - 1, output_cell(value), None);
            }
            patch.save(output)?;
        }
        None => {
            if let Some(t) = template {
                log::warn!("template {} not found, using a blank workbook", t.display());
            }
            let mut workbook = Workbook::new();
            let worksheet = workbook.add_worksheet();
            let plain = Format::new();
            for (row, col, value) in grid.cells() {
                write_cell(worksheet, row - 1, col - 1, &output_cell(value), &plain)
                    .map_err(|e| xlsx_write_error(output, e))?;
            }
            save_workbook(&mut workbook, output)?;
        }
    }

    log::info!("report written to {}", output.display());
    Ok(output.to_path_buf())
}

fn output_cell(value: &GridValue) -> OutputCell {
    match value {
        GridValue::Text(s) => OutputCell::Text(s.clone()),
        GridValue::Count(n) => OutputCell::Number(*n as f64),
    }
}
