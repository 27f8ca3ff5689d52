// Worksheet layout carry-over: column widths, custom row heights, merged cells.
//
// calamine doesn't read layout, so the first worksheet's XML is parsed
// directly from the archive.

use std::collections::{BTreeMap, HashMap};
use std::io::{Read, Seek};
use std::path::Path;

use quick_xml::events::Event;
use quick_xml::Reader;
use rust_xlsxwriter::{Format, Worksheet, XlsxError};
use zip::ZipArchive;

use crate::error::IoError;

/// Inclusive merged-cell region, 0-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeRegion {
    pub first_row: u32,
    pub first_col: u16,
    pub last_row: u32,
    pub last_col: u16,
}

impl MergeRegion {
    pub fn is_single_cell(&self) -> bool {
        self.first_row == self.last_row && self.first_col == self.last_col
    }

    fn overlaps(&self, other: &MergeRegion) -> bool {
        self.first_row <= other.last_row
            && other.first_row <= self.last_row
            && self.first_col <= other.last_col
            && other.first_col <= self.last_col
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SheetLayout {
    /// Column → width in character units as passed to `set_column_width`
    /// (custom widths only).
    pub col_widths: BTreeMap<u16, f64>,
    /// Row → height in points (custom heights only).
    pub row_heights: BTreeMap<u32, f64>,
    pub merges: Vec<MergeRegion>,
}

impl SheetLayout {
    pub fn is_empty(&self) -> bool {
        self.col_widths.is_empty() && self.row_heights.is_empty() && self.merges.is_empty()
    }

    /// Re-apply the layout to a freshly created worksheet.
    ///
    /// Merges go first: `merge_range` blanks the region, and cell values
    /// written afterwards land on top. Overlapping or single-cell merges are
    /// skipped. Returns the number of merges applied.
    pub fn apply(&self, worksheet: &mut Worksheet) -> Result<usize, XlsxError> {
        for (col, width) in &self.col_widths {
            worksheet.set_column_width(*col, *width)?;
        }
        for (row, height) in &self.row_heights {
            worksheet.set_row_height(*row, *height)?;
        }

        let blank = Format::new();
        let mut applied: Vec<MergeRegion> = Vec::with_capacity(self.merges.len());
        for merge in &self.merges {
            if merge.is_single_cell() || applied.iter().any(|m| m.overlaps(merge)) {
                log::debug!("skipping merge {:?}", merge);
                continue;
            }
            worksheet.merge_range(
                merge.first_row,
                merge.first_col,
                merge.last_row,
                merge.last_col,
                "",
                &blank,
            )?;
            applied.push(*merge);
        }
        Ok(applied.len())
    }
}

/// Layout of the first worksheet of an XLSX file.
pub fn read_layout(path: &Path) -> Result<SheetLayout, IoError> {
    let file = std::fs::File::open(path).map_err(|e| IoError::from_read(path, e))?;
    let mut archive = ZipArchive::new(file).map_err(|e| IoError::unreadable(path, e))?;

    let workbook_xml = read_zip_file(&mut archive, "xl/workbook.xml")
        .ok_or_else(|| IoError::unreadable(path, "missing xl/workbook.xml"))?;
    let rels_xml = read_zip_file(&mut archive, "xl/_rels/workbook.xml.rels")
        .ok_or_else(|| IoError::unreadable(path, "missing workbook relationships"))?;

    let sheet_path = first_worksheet_path(&workbook_xml, &rels_xml)
        .ok_or_else(|| IoError::unreadable(path, "no worksheet in workbook"))?;
    let sheet_xml = read_zip_file(&mut archive, &sheet_path)
        .ok_or_else(|| IoError::unreadable(path, format!("missing {sheet_path}")))?;

    Ok(parse_sheet_layout(&sheet_xml))
}

/// Same as `read_layout`, but a file that can't be inspected yields an empty
/// layout (with a warning) instead of an error.
pub fn read_layout_or_default(path: &Path) -> SheetLayout {
    match read_layout(path) {
        Ok(layout) => layout,
        Err(e) => {
            log::warn!("layout of {} not carried over: {}", path.display(), e);
            SheetLayout::default()
        }
    }
}

pub(crate) fn read_zip_file<R: Read + Seek>(archive: &mut ZipArchive<R>, path: &str) -> Option<String> {
    let mut file = archive.by_name(path).ok()?;
    let mut content = String::new();
    file.read_to_string(&mut content).ok()?;
    Some(content)
}

/// Archive path of the first `<sheet>` in workbook.xml, via its relationship.
pub(crate) fn first_worksheet_path(workbook_xml: &str, rels_xml: &str) -> Option<String> {
    let mut first_rid = None;
    let mut reader = Reader::from_str(workbook_xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Empty(ref e)) | Ok(Event::Start(ref e)) if e.name().as_ref() == b"sheet" => {
                first_rid = e
                    .attributes()
                    .flatten()
                    .find(|a| a.key.as_ref() == b"r:id")
                    .map(|a| String::from_utf8_lossy(&a.value).to_string());
                break;
            }
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
        buf.clear();
    }
    let rid = first_rid?;

    let mut targets: HashMap<String, String> = HashMap::new();
    let mut reader = Reader::from_str(rels_xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Empty(ref e)) | Ok(Event::Start(ref e)) if e.name().as_ref() == b"Relationship" => {
                let mut id = None;
                let mut target = None;
                for attr in e.attributes().flatten() {
                    match attr.key.as_ref() {
                        b"Id" => id = Some(String::from_utf8_lossy(&attr.value).to_string()),
                        b"Target" => target = Some(String::from_utf8_lossy(&attr.value).to_string()),
                        _ => {}
                    }
                }
                if let (Some(id), Some(target)) = (id, target) {
                    targets.insert(id, target);
                }
            }
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    let target = targets.get(&rid)?;
    // Targets are usually relative to xl/, some writers emit absolute "/xl/..."
    Some(match target.strip_prefix('/') {
        Some(absolute) => absolute.to_string(),
        None => format!("xl/{target}"),
    })
}

/// Parse custom column widths, custom row heights and merges from worksheet XML.
pub fn parse_sheet_layout(xml: &str) -> SheetLayout {
    let mut layout = SheetLayout::default();
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => match e.name().as_ref() {
                b"col" => {
                    let mut min = None;
                    let mut max = None;
                    let mut width = None;
                    let mut custom = false;
                    for attr in e.attributes().flatten() {
                        let value = String::from_utf8_lossy(&attr.value);
                        match attr.key.as_ref() {
                            b"min" => min = value.parse::<u16>().ok(),
                            b"max" => max = value.parse::<u16>().ok(),
                            b"width" => width = value.parse::<f64>().ok().map(stored_width_to_chars),
                            b"customWidth" => custom = is_true(&value),
                            _ => {}
                        }
                    }
                    if let (true, Some(min), Some(max), Some(width)) = (custom, min, max, width) {
                        // 1-based inclusive span; a trailing "to column XFD" span is capped
                        let last = max.min(min.saturating_add(255));
                        for col in min..=last {
                            layout.col_widths.insert(col.saturating_sub(1), width);
                        }
                    }
                }
                b"row" => {
                    let mut row = None;
                    let mut height = None;
                    let mut custom = false;
                    for attr in e.attributes().flatten() {
                        let value = String::from_utf8_lossy(&attr.value);
                        match attr.key.as_ref() {
                            b"r" => row = value.parse::<u32>().ok(),
                            b"ht" => height = value.parse::<f64>().ok(),
                            b"customHeight" => custom = is_true(&value),
                            _ => {}
                        }
                    }
                    if let (true, Some(row), Some(height)) = (custom, row, height) {
                        layout.row_heights.insert(row.saturating_sub(1), height);
                    }
                }
                b"mergeCell" => {
                    for attr in e.attributes().flatten() {
                        if attr.key.as_ref() == b"ref" {
                            if let Some(region) = parse_range_ref(&String::from_utf8_lossy(&attr.value)) {
                                layout.merges.push(region);
                            }
                        }
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    layout
}

/// Stored `<col width>` includes cell padding; strip it so that writing the
/// value back with `set_column_width` reproduces the same column.
fn stored_width_to_chars(stored: f64) -> f64 {
    // 7px max digit width, 5px padding (Calibri 11)
    let pixels = (stored * 7.0).round();
    if pixels >= 12.0 {
        (pixels - 5.0) / 7.0
    } else {
        pixels / 12.0
    }
}

fn is_true(value: &str) -> bool {
    value == "1" || value == "true"
}

/// "A1:C3" → merge region.
pub fn parse_range_ref(r: &str) -> Option<MergeRegion> {
    let (start, end) = r.split_once(':')?;
    let (first_row, first_col) = parse_cell_ref(start)?;
    let (last_row, last_col) = parse_cell_ref(end)?;
    Some(MergeRegion { first_row, first_col, last_row, last_col })
}

/// "B5" → (4, 1). `$` anchors are ignored.
pub(crate) fn parse_cell_ref(r: &str) -> Option<(u32, u16)> {
    let r = r.replace('$', "");
    let split = r.find(|c: char| c.is_ascii_digit())?;
    let (letters, digits) = r.split_at(split);
    if letters.is_empty() || !letters.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }

    let mut col: u32 = 0;
    for ch in letters.chars() {
        col = col * 26 + (ch.to_ascii_uppercase() as u32 - 'A' as u32 + 1);
    }
    let row: u32 = digits.parse().ok()?;
    if row == 0 || col == 0 || col > u16::MAX as u32 {
        return None;
    }
    Some((row - 1, (col - 1) as u16))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_xlsxwriter::Workbook;

    #[test]
    fn cell_refs() {
        assert_eq!(parse_cell_ref("A1"), Some((0, 0)));
        assert_eq!(parse_cell_ref("B5"), Some((4, 1)));
        assert_eq!(parse_cell_ref("$AA$10"), Some((9, 26)));
        assert_eq!(parse_cell_ref("A0"), None);
        assert_eq!(parse_cell_ref("12"), None);
    }

    #[test]
    fn layout_from_sheet_xml() {
        let xml = r#"<?xml version="1.0"?>
<worksheet>
  <cols>
    <col min="1" max="1" width="12.7109375" customWidth="1"/>
    <col min="3" max="4" width="30.7109375" customWidth="1"/>
    <col min="5" max="5" width="8"/>
  </cols>
  <sheetData>
    <row r="1" ht="28" customHeight="1"><c r="A1"><v>1</v></c></row>
    <row r="2" ht="15"><c r="A2"><v>2</v></c></row>
  </sheetData>
  <mergeCells count="1"><mergeCell ref="A1:D1"/></mergeCells>
</worksheet>"#;

        let layout = parse_sheet_layout(xml);
        assert_eq!(layout.col_widths.len(), 3);
        assert_eq!(layout.col_widths[&0], 12.0);
        assert_eq!(layout.col_widths[&3], 30.0);
        assert!(!layout.col_widths.contains_key(&4));
        assert_eq!(layout.row_heights.len(), 1);
        assert_eq!(layout.row_heights[&0], 28.0);
        assert_eq!(
            layout.merges,
            vec![MergeRegion { first_row: 0, first_col: 0, last_row: 0, last_col: 3 }]
        );
    }

    #[test]
    fn worksheet_path_resolution() {
        let workbook = r#"<workbook><sheets>
            <sheet name="Data" sheetId="1" r:id="rId3"/>
            <sheet name="Other" sheetId="2" r:id="rId1"/>
        </sheets></workbook>"#;
        let rels = r#"<Relationships>
            <Relationship Id="rId1" Target="worksheets/sheet2.xml"/>
            <Relationship Id="rId3" Target="worksheets/sheet1.xml"/>
        </Relationships>"#;
        assert_eq!(first_worksheet_path(workbook, rels).as_deref(), Some("xl/worksheets/sheet1.xml"));

        let rels_absolute = r#"<Relationships>
            <Relationship Id="rId3" Target="/xl/worksheets/data.xml"/>
        </Relationships>"#;
        assert_eq!(
            first_worksheet_path(workbook, rels_absolute).as_deref(),
            Some("xl/worksheets/data.xml")
        );
    }

    #[test]
    fn layout_survives_a_write_read_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("layout.xlsx");

        let layout = SheetLayout {
            col_widths: BTreeMap::from([(0, 14.0), (2, 40.0)]),
            row_heights: BTreeMap::from([(0, 30.0)]),
            merges: vec![
                MergeRegion { first_row: 0, first_col: 0, last_row: 0, last_col: 2 },
                // overlaps the first one, skipped
                MergeRegion { first_row: 0, first_col: 1, last_row: 1, last_col: 1 },
                MergeRegion { first_row: 5, first_col: 5, last_row: 5, last_col: 5 },
            ],
        };

        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        assert_eq!(layout.apply(sheet).unwrap(), 1);
        sheet.write_string(0, 0, "title").unwrap();
        workbook.save(&path).unwrap();

        let read = read_layout(&path).unwrap();
        assert_eq!(read.col_widths.get(&0), Some(&14.0));
        assert_eq!(read.col_widths.get(&2), Some(&40.0));
        assert_eq!(read.row_heights.get(&0), Some(&30.0));
        assert_eq!(read.merges.len(), 1);
        assert_eq!(read.merges[0].last_col, 2);
    }

    #[test]
    fn unreadable_layout_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.txt");
        std::fs::write(&path, "hello").unwrap();
        assert!(read_layout(&path).is_err());
        assert!(read_layout_or_default(&path).is_empty());
    }
}
