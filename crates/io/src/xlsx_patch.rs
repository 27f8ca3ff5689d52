// In-place edits of an existing workbook package.
//
// Cells of the first worksheet are patched in its XML, new cell formats are
// appended to styles.xml, and every other part of the archive is copied
// through as stored (other sheets, VBA, charts, shared strings).

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::{Cursor, Read, Seek, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use rust_xlsxwriter::utility::row_col_to_cell;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::IoError;
use crate::xlsx::{check_writable, to_excel_serial, ColumnAlign, OutputCell};
use crate::xlsx_layout::{first_worksheet_path, parse_cell_ref, read_zip_file};

const STYLES_PATH: &str = "xl/styles.xml";
const CONTENT_TYPES_PATH: &str = "[Content_Types].xml";
const WORKBOOK_PATH: &str = "xl/workbook.xml";
const WORKBOOK_RELS_PATH: &str = "xl/_rels/workbook.xml.rels";
const CALC_CHAIN_PATH: &str = "xl/calcChain.xml";

const MACRO_WORKBOOK_TYPE: &str = "application/vnd.ms-excel.sheet.macroEnabled.main+xml";
const PLAIN_WORKBOOK_TYPE: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml";

/// Lowest id Excel accepts for a custom number format.
const FIRST_CUSTOM_NUM_FMT: u32 = 164;

/// Built-in number formats that need no `<numFmt>` entry.
const BUILTIN_NUM_FMTS: &[(&str, u32)] = &[("General", 0), ("0", 1), ("0.00", 2)];

/// The first worksheet of a workbook file, opened for cell edits.
#[derive(Debug)]
pub struct SheetPatch {
    source: PathBuf,
    sheet_path: String,
    sheet: SheetXml,
    styles: Option<StyleSheet>,
    /// A formula cell was overwritten or moved, so calcChain.xml is stale.
    formulas_disturbed: bool,
}

impl SheetPatch {
    pub fn open(path: &Path) -> Result<Self, IoError> {
        let file = std::fs::File::open(path).map_err(|e| IoError::from_read(path, e))?;
        let mut archive = ZipArchive::new(file).map_err(|e| IoError::unreadable(path, e))?;

        let workbook_xml = read_zip_file(&mut archive, WORKBOOK_PATH)
            .ok_or_else(|| IoError::unreadable(path, "missing xl/workbook.xml"))?;
        let rels_xml = read_zip_file(&mut archive, WORKBOOK_RELS_PATH)
            .ok_or_else(|| IoError::unreadable(path, "missing workbook relationships"))?;
        let sheet_path = first_worksheet_path(&workbook_xml, &rels_xml)
            .ok_or_else(|| IoError::unreadable(path, "no worksheet in workbook"))?;
        let sheet_xml = read_zip_file(&mut archive, &sheet_path)
            .ok_or_else(|| IoError::unreadable(path, format!("missing {sheet_path}")))?;
        let sheet = parse_sheet(&sheet_xml).map_err(|e| IoError::unreadable(path, format!("{sheet_path}: {e}")))?;

        let styles = match read_zip_file(&mut archive, STYLES_PATH) {
            Some(xml) => Some(StyleSheet::parse(&xml).map_err(|e| IoError::unreadable(path, format!("{STYLES_PATH}: {e}")))?),
            None => None,
        };

        log::debug!("opened {} of {} for editing", sheet_path, path.display());
        Ok(Self { source: path.to_path_buf(), sheet_path, sheet, styles, formulas_disturbed: false })
    }

    /// Style index for cells with the given alignment and number format,
    /// added to the package's cell formats on first use. `None` when the
    /// package carries no styles part.
    pub fn cell_style(&mut self, align: ColumnAlign, num_format: Option<&str>) -> Option<u32> {
        self.styles.as_mut().map(|styles| styles.xf_for(align, num_format))
    }

    /// Set the cell at (row, col), 0-based. Without an explicit style the
    /// cell keeps the style it had.
    pub fn set(&mut self, row: u32, col: u16, value: OutputCell, style: Option<u32>) {
        let cells = &mut self.sheet.rows.entry(row).or_default().cells;
        let previous = cells.get(&col);
        if previous.is_some_and(CellXml::has_formula) {
            self.formulas_disturbed = true;
        }
        let style = style.or_else(|| previous.and_then(CellXml::style));
        cells.insert(col, CellXml::Written { value, style });
    }

    /// Rearrange the cells of `cols` in the rows starting at `first_row`:
    /// target row `first_row + i` receives what row `order[i]` held.
    /// `order` must be a permutation of `first_row..first_row + order.len()`.
    pub fn reorder_rows(&mut self, first_row: u32, order: &[u32], cols: Range<u16>) {
        let mut taken: HashMap<u32, Vec<(u16, CellXml)>> = HashMap::with_capacity(order.len());
        for offset in 0..order.len() as u32 {
            let row = first_row + offset;
            let Some(xml) = self.sheet.rows.get_mut(&row) else {
                continue;
            };
            let keys: Vec<u16> = xml.cells.range(cols.clone()).map(|(c, _)| *c).collect();
            let cells = keys.into_iter().filter_map(|c| xml.cells.remove(&c).map(|cell| (c, cell))).collect();
            taken.insert(row, cells);
        }

        for (offset, source) in order.iter().enumerate() {
            let target = first_row + offset as u32;
            let Some(cells) = taken.remove(source) else {
                continue;
            };
            if *source != target && cells.iter().any(|(_, cell)| cell.has_formula()) {
                self.formulas_disturbed = true;
            }
            self.sheet.rows.entry(target).or_default().cells.extend(cells);
        }
    }

    /// Write the edited package to `target` (which may be the source file).
    ///
    /// A `.xlsx` target written from a macro-enabled package drops the VBA
    /// parts so the content matches the extension.
    pub fn save(&self, target: &Path) -> Result<(), IoError> {
        let file = std::fs::File::open(&self.source).map_err(|e| IoError::from_read(&self.source, e))?;
        let mut archive = ZipArchive::new(file).map_err(|e| IoError::unreadable(&self.source, e))?;

        let names: Vec<String> = archive.file_names().map(str::to_string).collect();
        let strip_macros = is_plain_xlsx(target) && names.iter().any(|n| is_macro_part(n));
        let dropped: HashSet<String> = names
            .iter()
            .filter(|n| (self.formulas_disturbed && n.as_str() == CALC_CHAIN_PATH) || (strip_macros && is_macro_part(n)))
            .cloned()
            .collect();

        let source = &self.source;
        let mut replaced: HashMap<String, Vec<u8>> = HashMap::new();
        let sheet_xml = self.sheet.to_xml().map_err(|e| IoError::write(target, e))?;
        replaced.insert(self.sheet_path.clone(), sheet_xml);
        if let Some(styles) = self.styles.as_ref().filter(|s| s.is_modified()) {
            replaced.insert(STYLES_PATH.to_string(), styles.to_xml().map_err(|e| IoError::write(target, e))?);
        }
        if !dropped.is_empty() {
            for part in [CONTENT_TYPES_PATH, WORKBOOK_RELS_PATH] {
                let Some(xml) = read_zip_file(&mut archive, part) else {
                    continue;
                };
                let rewritten = match part {
                    CONTENT_TYPES_PATH => without_content_types(&xml, &dropped, strip_macros),
                    _ => without_relationships(&xml, &dropped),
                }
                .map_err(|e| IoError::unreadable(source, format!("{part}: {e}")))?;
                replaced.insert(part.to_string(), rewritten);
            }
        }

        let bytes = rebuild_archive(&mut archive, &dropped, &replaced).map_err(|e| IoError::write(target, e))?;
        drop(archive);

        check_writable(target)?;
        std::fs::write(target, bytes).map_err(|e| IoError::from_write(target, e))?;
        if !dropped.is_empty() {
            log::debug!("dropped {:?} from {}", dropped, target.display());
        }
        Ok(())
    }
}

fn rebuild_archive<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    dropped: &HashSet<String>,
    replaced: &HashMap<String, Vec<u8>>,
) -> Result<Vec<u8>, String> {
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for index in 0..archive.len() {
        let entry = archive.by_index_raw(index).map_err(|e| e.to_string())?;
        let name = entry.name().to_string();
        if dropped.contains(&name) {
            continue;
        }
        match replaced.get(&name) {
            Some(bytes) => {
                writer.start_file(name.as_str(), options).map_err(|e| e.to_string())?;
                writer.write_all(bytes).map_err(|e| e.to_string())?;
            }
            None => writer.raw_copy_file(entry).map_err(|e| e.to_string())?,
        }
    }
    let cursor = writer.finish().map_err(|e| e.to_string())?;
    Ok(cursor.into_inner())
}

fn is_plain_xlsx(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()).is_some_and(|e| e.eq_ignore_ascii_case("xlsx"))
}

fn is_macro_part(name: &str) -> bool {
    let file = name.rsplit('/').next().unwrap_or(name);
    name.starts_with("xl/") && (file.starts_with("vbaProject") || file.starts_with("vbaData"))
}

// ---------------------------------------------------------------------------
// Worksheet XML
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum CellXml {
    /// A cell as found in the package; only its address is rewritten.
    Kept { start: BytesStart<'static>, inner: Vec<Event<'static>> },
    Written { value: OutputCell, style: Option<u32> },
}

impl CellXml {
    fn style(&self) -> Option<u32> {
        match self {
            Self::Kept { start, .. } => attr(start, b"s").and_then(|s| s.parse().ok()),
            Self::Written { style, .. } => *style,
        }
    }

    fn has_formula(&self) -> bool {
        match self {
            Self::Kept { inner, .. } => inner
                .iter()
                .any(|e| matches!(e, Event::Start(s) | Event::Empty(s) if s.local_name().as_ref() == b"f")),
            Self::Written { .. } => false,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct RowXml {
    /// The original `<row>` element, absent for rows created by edits.
    start: Option<BytesStart<'static>>,
    cells: BTreeMap<u16, CellXml>,
}

#[derive(Debug, Default)]
struct SheetXml {
    head: Vec<Event<'static>>,
    data: Option<BytesStart<'static>>,
    rows: BTreeMap<u32, RowXml>,
    tail: Vec<Event<'static>>,
}

fn parse_sheet(xml: &str) -> Result<SheetXml, String> {
    let mut reader = Reader::from_str(xml);
    let mut sheet = SheetXml::default();
    let mut in_data = false;
    let mut next_row = 0u32;

    loop {
        let event = reader.read_event().map_err(|e| e.to_string())?;
        match event {
            Event::Eof => break,
            Event::Start(e) if sheet.data.is_none() && e.local_name().as_ref() == b"sheetData" => {
                sheet.data = Some(e.into_owned());
                in_data = true;
            }
            Event::Empty(e) if sheet.data.is_none() && e.local_name().as_ref() == b"sheetData" => {
                sheet.data = Some(e.into_owned());
            }
            Event::End(e) if in_data && e.local_name().as_ref() == b"sheetData" => in_data = false,
            Event::Start(e) if in_data && e.local_name().as_ref() == b"row" => {
                let (index, row) = read_row(&mut reader, e, next_row, false)?;
                next_row = index + 1;
                sheet.rows.insert(index, row);
            }
            Event::Empty(e) if in_data && e.local_name().as_ref() == b"row" => {
                let (index, row) = read_row(&mut reader, e, next_row, true)?;
                next_row = index + 1;
                sheet.rows.insert(index, row);
            }
            _ if in_data => {}
            other if sheet.data.is_none() => sheet.head.push(other.into_owned()),
            other => sheet.tail.push(other.into_owned()),
        }
    }

    if sheet.data.is_none() {
        return Err("worksheet has no sheetData".to_string());
    }
    Ok(sheet)
}

fn read_row<'a>(
    reader: &mut Reader<&'a [u8]>,
    start: BytesStart<'a>,
    fallback: u32,
    empty: bool,
) -> Result<(u32, RowXml), String> {
    // `r` is optional; rows without it follow the previous one
    let index = attr(&start, b"r")
        .and_then(|r| r.parse::<u32>().ok())
        .and_then(|r| r.checked_sub(1))
        .unwrap_or(fallback);
    let mut row = RowXml { start: Some(start.into_owned()), cells: BTreeMap::new() };
    if empty {
        return Ok((index, row));
    }

    let mut next_col = 0u16;
    loop {
        match reader.read_event().map_err(|e| e.to_string())? {
            Event::Start(c) if c.local_name().as_ref() == b"c" => {
                let col = cell_column(&c).unwrap_or(next_col);
                let mut inner = Vec::new();
                loop {
                    match reader.read_event().map_err(|e| e.to_string())? {
                        Event::End(end) if end.local_name().as_ref() == b"c" => break,
                        Event::Eof => return Err("unexpected end inside a cell".to_string()),
                        other => inner.push(other.into_owned()),
                    }
                }
                row.cells.insert(col, CellXml::Kept { start: c.into_owned(), inner });
                next_col = col.saturating_add(1);
            }
            Event::Empty(c) if c.local_name().as_ref() == b"c" => {
                let col = cell_column(&c).unwrap_or(next_col);
                row.cells.insert(col, CellXml::Kept { start: c.into_owned(), inner: Vec::new() });
                next_col = col.saturating_add(1);
            }
            Event::End(end) if end.local_name().as_ref() == b"row" => break,
            Event::Eof => return Err("unexpected end inside a row".to_string()),
            _ => {}
        }
    }
    Ok((index, row))
}

fn cell_column(c: &BytesStart<'_>) -> Option<u16> {
    attr(c, b"r").and_then(|r| parse_cell_ref(&r)).map(|(_, col)| col)
}

impl SheetXml {
    fn dimension(&self) -> String {
        let mut bounds: Option<(u32, u16, u32, u16)> = None;
        for (&row, xml) in &self.rows {
            let (Some(&first), Some(&last)) = (xml.cells.keys().next(), xml.cells.keys().next_back()) else {
                continue;
            };
            bounds = Some(match bounds {
                None => (row, first, row, last),
                Some((r0, c0, _, c1)) => (r0, c0.min(first), row, c1.max(last)),
            });
        }
        match bounds {
            None => "A1".to_string(),
            Some((r0, c0, r1, c1)) if r0 == r1 && c0 == c1 => row_col_to_cell(r0, c0),
            Some((r0, c0, r1, c1)) => format!("{}:{}", row_col_to_cell(r0, c0), row_col_to_cell(r1, c1)),
        }
    }

    fn to_xml(&self) -> Result<Vec<u8>, String> {
        let mut writer = Writer::new(Vec::new());
        let dimension = self.dimension();
        for event in &self.head {
            match event {
                Event::Empty(e) if e.local_name().as_ref() == b"dimension" => {
                    emit(&mut writer, Event::Empty(rebuild(e, &[("ref", dimension.clone())], &[])))?;
                }
                other => emit(&mut writer, other.borrow())?,
            }
        }

        let data = self.data.as_ref().ok_or("worksheet has no sheetData")?;
        emit(&mut writer, Event::Start(data.borrow()))?;
        for (&index, row) in &self.rows {
            if row.start.is_none() && row.cells.is_empty() {
                continue;
            }
            let number = (index + 1).to_string();
            // spans is an optional hint and goes stale once cells move
            let start = match &row.start {
                Some(s) => rebuild(s, &[("r", number)], &[b"spans".as_slice()]),
                None => {
                    let mut s = BytesStart::new("row");
                    s.push_attribute(("r", number.as_str()));
                    s
                }
            };
            if row.cells.is_empty() {
                emit(&mut writer, Event::Empty(start))?;
                continue;
            }
            emit(&mut writer, Event::Start(start.borrow()))?;
            for (&col, cell) in &row.cells {
                write_cell(&mut writer, index, col, cell)?;
            }
            emit(&mut writer, Event::End(start.to_end()))?;
        }
        emit(&mut writer, Event::End(data.to_end()))?;

        for event in &self.tail {
            emit(&mut writer, event.borrow())?;
        }
        Ok(writer.into_inner())
    }
}

fn write_cell(writer: &mut Writer<Vec<u8>>, row: u32, col: u16, cell: &CellXml) -> Result<(), String> {
    let reference = row_col_to_cell(row, col);
    match cell {
        CellXml::Kept { start, inner } => {
            let start = rebuild(start, &[("r", reference)], &[]);
            if inner.is_empty() {
                return emit(writer, Event::Empty(start));
            }
            emit(writer, Event::Start(start.borrow()))?;
            for event in inner {
                emit(writer, event.borrow())?;
            }
            emit(writer, Event::End(start.to_end()))
        }
        CellXml::Written { value, style } => {
            let mut start = BytesStart::new("c");
            start.push_attribute(("r", reference.as_str()));
            if let Some(style) = style {
                start.push_attribute(("s", style.to_string().as_str()));
            }
            let number = match value {
                OutputCell::Blank => return emit(writer, Event::Empty(start)),
                OutputCell::Text(text) => {
                    start.push_attribute(("t", "inlineStr"));
                    let mut t = BytesStart::new("t");
                    t.push_attribute(("xml:space", "preserve"));
                    emit(writer, Event::Start(start.borrow()))?;
                    emit(writer, Event::Start(BytesStart::new("is")))?;
                    emit(writer, Event::Start(t.borrow()))?;
                    emit(writer, Event::Text(BytesText::new(text)))?;
                    emit(writer, Event::End(t.to_end()))?;
                    emit(writer, Event::End(BytesEnd::new("is")))?;
                    return emit(writer, Event::End(start.to_end()));
                }
                OutputCell::Bool(b) => {
                    start.push_attribute(("t", "b"));
                    if *b { "1".to_string() } else { "0".to_string() }
                }
                OutputCell::Number(n) => number_text(*n),
                OutputCell::Id(n) => n.to_string(),
                OutputCell::Date(d) => number_text(to_excel_serial(*d)),
            };
            emit(writer, Event::Start(start.borrow()))?;
            emit(writer, Event::Start(BytesStart::new("v")))?;
            emit(writer, Event::Text(BytesText::new(&number)))?;
            emit(writer, Event::End(BytesEnd::new("v")))?;
            emit(writer, Event::End(start.to_end()))
        }
    }
}

fn number_text(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        (n as i64).to_string()
    } else {
        n.to_string()
    }
}

// ---------------------------------------------------------------------------
// styles.xml
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct XfSpec {
    align: ColumnAlign,
    num_fmt_id: u32,
}

#[derive(Debug)]
struct StyleSheet {
    events: Vec<Event<'static>>,
    /// `<xf>` entries already in `<cellXfs>`.
    base_xfs: u32,
    /// `<numFmt>` entries already in `<numFmts>`.
    base_num_fmts: u32,
    /// formatCode → id of the custom number formats present.
    num_fmts: HashMap<String, u32>,
    next_num_fmt: u32,
    added_num_fmts: Vec<(u32, String)>,
    added_xfs: Vec<XfSpec>,
    known: HashMap<XfSpec, u32>,
}

impl StyleSheet {
    fn parse(xml: &str) -> Result<Self, String> {
        let mut reader = Reader::from_str(xml);
        let mut events = Vec::new();
        let mut num_fmts = HashMap::new();
        let mut max_num_fmt = FIRST_CUSTOM_NUM_FMT - 1;
        let mut base_xfs = 0;
        let mut base_num_fmts = 0;
        let mut in_cell_xfs = false;
        let mut in_num_fmts = false;
        loop {
            let event = reader.read_event().map_err(|e| e.to_string())?;
            match &event {
                Event::Eof => break,
                Event::Start(e) if e.local_name().as_ref() == b"numFmts" => in_num_fmts = true,
                Event::End(e) if e.local_name().as_ref() == b"numFmts" => in_num_fmts = false,
                Event::Start(e) | Event::Empty(e) if in_num_fmts && e.local_name().as_ref() == b"numFmt" => {
                    base_num_fmts += 1;
                    let id = attr(e, b"numFmtId").and_then(|v| v.parse::<u32>().ok());
                    if let (Some(id), Some(code)) = (id, attr(e, b"formatCode")) {
                        max_num_fmt = max_num_fmt.max(id);
                        num_fmts.insert(code, id);
                    }
                }
                Event::Start(e) if e.local_name().as_ref() == b"cellXfs" => in_cell_xfs = true,
                Event::End(e) if e.local_name().as_ref() == b"cellXfs" => in_cell_xfs = false,
                Event::Start(e) | Event::Empty(e) if in_cell_xfs && e.local_name().as_ref() == b"xf" => base_xfs += 1,
                _ => {}
            }
            events.push(event.into_owned());
        }

        Ok(Self {
            events,
            base_xfs,
            base_num_fmts,
            num_fmts,
            next_num_fmt: max_num_fmt + 1,
            added_num_fmts: Vec::new(),
            added_xfs: Vec::new(),
            known: HashMap::new(),
        })
    }

    fn is_modified(&self) -> bool {
        !self.added_xfs.is_empty()
    }

    fn num_fmt_id(&mut self, code: Option<&str>) -> u32 {
        let code = code.unwrap_or("General");
        if let Some((_, id)) = BUILTIN_NUM_FMTS.iter().find(|(c, _)| *c == code) {
            return *id;
        }
        if let Some(id) = self.num_fmts.get(code) {
            return *id;
        }
        let id = self.next_num_fmt;
        self.next_num_fmt += 1;
        self.num_fmts.insert(code.to_string(), id);
        self.added_num_fmts.push((id, code.to_string()));
        id
    }

    fn xf_for(&mut self, align: ColumnAlign, num_format: Option<&str>) -> u32 {
        let spec = XfSpec { align, num_fmt_id: self.num_fmt_id(num_format) };
        if let Some(index) = self.known.get(&spec) {
            return *index;
        }
        let index = self.base_xfs + self.added_xfs.len() as u32;
        self.added_xfs.push(spec.clone());
        self.known.insert(spec, index);
        index
    }

    fn to_xml(&self) -> Result<Vec<u8>, String> {
        let mut writer = Writer::new(Vec::new());
        let has_num_fmts = self
            .events
            .iter()
            .any(|e| matches!(e, Event::Start(s) | Event::Empty(s) if s.local_name().as_ref() == b"numFmts"));
        let num_fmt_count = (self.base_num_fmts + self.added_num_fmts.len() as u32).to_string();
        let xf_count = (self.base_xfs + self.added_xfs.len() as u32).to_string();

        for event in &self.events {
            match event {
                Event::Start(e) if e.local_name().as_ref() == b"styleSheet" => {
                    emit(&mut writer, event.borrow())?;
                    if !has_num_fmts && !self.added_num_fmts.is_empty() {
                        let mut start = BytesStart::new("numFmts");
                        start.push_attribute(("count", num_fmt_count.as_str()));
                        emit(&mut writer, Event::Start(start.borrow()))?;
                        self.write_num_fmts(&mut writer)?;
                        emit(&mut writer, Event::End(start.to_end()))?;
                    }
                }
                Event::Start(e) if e.local_name().as_ref() == b"numFmts" => {
                    emit(&mut writer, Event::Start(rebuild(e, &[("count", num_fmt_count.clone())], &[])))?;
                }
                Event::End(e) if e.local_name().as_ref() == b"numFmts" => {
                    self.write_num_fmts(&mut writer)?;
                    emit(&mut writer, event.borrow())?;
                }
                Event::Empty(e) if e.local_name().as_ref() == b"numFmts" => {
                    let start = rebuild(e, &[("count", num_fmt_count.clone())], &[]);
                    emit(&mut writer, Event::Start(start.borrow()))?;
                    self.write_num_fmts(&mut writer)?;
                    emit(&mut writer, Event::End(start.to_end()))?;
                }
                Event::Start(e) if e.local_name().as_ref() == b"cellXfs" => {
                    emit(&mut writer, Event::Start(rebuild(e, &[("count", xf_count.clone())], &[])))?;
                }
                Event::End(e) if e.local_name().as_ref() == b"cellXfs" => {
                    self.write_xfs(&mut writer)?;
                    emit(&mut writer, event.borrow())?;
                }
                Event::Empty(e) if e.local_name().as_ref() == b"cellXfs" => {
                    let start = rebuild(e, &[("count", xf_count.clone())], &[]);
                    emit(&mut writer, Event::Start(start.borrow()))?;
                    self.write_xfs(&mut writer)?;
                    emit(&mut writer, Event::End(start.to_end()))?;
                }
                other => emit(&mut writer, other.borrow())?,
            }
        }
        Ok(writer.into_inner())
    }

    fn write_num_fmts(&self, writer: &mut Writer<Vec<u8>>) -> Result<(), String> {
        for (id, code) in &self.added_num_fmts {
            let mut e = BytesStart::new("numFmt");
            e.push_attribute(("numFmtId", id.to_string().as_str()));
            e.push_attribute(("formatCode", code.as_str()));
            emit(writer, Event::Empty(e))?;
        }
        Ok(())
    }

    fn write_xfs(&self, writer: &mut Writer<Vec<u8>>) -> Result<(), String> {
        for spec in &self.added_xfs {
            let mut xf = BytesStart::new("xf");
            xf.push_attribute(("numFmtId", spec.num_fmt_id.to_string().as_str()));
            for key in ["fontId", "fillId", "borderId", "xfId"] {
                xf.push_attribute((key, "0"));
            }
            if spec.num_fmt_id != 0 {
                xf.push_attribute(("applyNumberFormat", "1"));
            }
            xf.push_attribute(("applyAlignment", "1"));

            let mut alignment = BytesStart::new("alignment");
            match spec.align {
                ColumnAlign::Center => alignment.push_attribute(("horizontal", "center")),
                ColumnAlign::LeftShrink => alignment.push_attribute(("horizontal", "left")),
                ColumnAlign::General => {}
            }
            alignment.push_attribute(("vertical", "center"));
            if spec.align == ColumnAlign::LeftShrink {
                alignment.push_attribute(("shrinkToFit", "1"));
            }

            emit(writer, Event::Start(xf.borrow()))?;
            emit(writer, Event::Empty(alignment))?;
            emit(writer, Event::End(xf.to_end()))?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Package bookkeeping for dropped parts
// ---------------------------------------------------------------------------

/// `[Content_Types].xml` without overrides for `dropped` parts; with
/// `plain_workbook` the workbook is re-typed as a macro-free one.
fn without_content_types(xml: &str, dropped: &HashSet<String>, plain_workbook: bool) -> Result<Vec<u8>, String> {
    rewrite_empty_elements(xml, |e| {
        if e.local_name().as_ref() != b"Override" {
            return Some(e.to_owned());
        }
        let part = attr(e, b"PartName").unwrap_or_default();
        if dropped.contains(part.trim_start_matches('/')) {
            return None;
        }
        if plain_workbook && attr(e, b"ContentType").as_deref() == Some(MACRO_WORKBOOK_TYPE) {
            return Some(rebuild(e, &[("ContentType", PLAIN_WORKBOOK_TYPE.to_string())], &[]));
        }
        Some(e.to_owned())
    })
}

/// Workbook relationships without those pointing at `dropped` parts.
fn without_relationships(xml: &str, dropped: &HashSet<String>) -> Result<Vec<u8>, String> {
    rewrite_empty_elements(xml, |e| {
        if e.local_name().as_ref() != b"Relationship" {
            return Some(e.to_owned());
        }
        let target = attr(e, b"Target").unwrap_or_default();
        let part = match target.strip_prefix('/') {
            Some(absolute) => absolute.to_string(),
            None => format!("xl/{target}"),
        };
        (!dropped.contains(&part)).then(|| e.to_owned())
    })
}

fn rewrite_empty_elements(
    xml: &str,
    mut keep: impl FnMut(&BytesStart<'_>) -> Option<BytesStart<'static>>,
) -> Result<Vec<u8>, String> {
    let mut reader = Reader::from_str(xml);
    let mut writer = Writer::new(Vec::new());
    loop {
        match reader.read_event().map_err(|e| e.to_string())? {
            Event::Eof => break,
            Event::Empty(e) => {
                if let Some(kept) = keep(&e) {
                    emit(&mut writer, Event::Empty(kept))?;
                }
            }
            other => emit(&mut writer, other)?,
        }
    }
    Ok(writer.into_inner())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn emit(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> Result<(), String> {
    writer.write_event(event).map_err(|e| e.to_string())
}

fn attr(e: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == key)
        .map(|a| String::from_utf8_lossy(&a.value).into_owned())
}

/// Copy of `e` with `replace` attributes set first and `drop` attributes removed.
fn rebuild(e: &BytesStart<'_>, replace: &[(&str, String)], drop: &[&[u8]]) -> BytesStart<'static> {
    let mut out = BytesStart::new(String::from_utf8_lossy(e.name().as_ref()).into_owned());
    for (key, value) in replace {
        out.push_attribute((*key, value.as_str()));
    }
    for a in e.attributes().flatten() {
        let key = a.key.as_ref();
        if drop.contains(&key) || replace.iter().any(|(k, _)| k.as_bytes() == key) {
            continue;
        }
        out.push_attribute((key, a.value.as_ref()));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_xlsxwriter::{Format, Workbook};

    const SHEET: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><dimension ref="A1:C2"/><sheetData><row r="1" spans="1:3"><c r="A1" s="1" t="s"><v>0</v></c><c r="C1"><f>SUM(A2:B2)</f><v>3</v></c></row><row r="2" ht="20" customHeight="1"><c r="A2"><v>1</v></c><c><v>2</v></c></row></sheetData><mergeCells count="1"><mergeCell ref="A1:B1"/></mergeCells></worksheet>"#;

    const STYLES: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<styleSheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><fonts count="1"><font/></fonts><cellXfs count="2"><xf numFmtId="0" fontId="0"/><xf numFmtId="0" fontId="0" applyFont="1"/></cellXfs></styleSheet>"#;

    fn xml_text(bytes: Vec<u8>) -> String {
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn sheet_xml_round_trips_untouched_cells() {
        let sheet = parse_sheet(SHEET).unwrap();
        assert_eq!(sheet.rows.len(), 2);
        // a cell without `r` follows the previous one
        assert!(sheet.rows[&1].cells.contains_key(&1));
        assert!(sheet.rows[&0].cells[&2].has_formula());

        let out = xml_text(sheet.to_xml().unwrap());
        assert!(out.contains(r#"<c r="A1" s="1" t="s"><v>0</v></c>"#), "{out}");
        assert!(out.contains("<f>SUM(A2:B2)</f>"));
        assert!(out.contains(r#"<c r="B2"><v>2</v></c>"#));
        assert!(out.contains(r#"<row r="2" ht="20" customHeight="1">"#));
        assert!(out.contains(r#"<mergeCell ref="A1:B1"/>"#));
        assert!(out.contains(r#"<dimension ref="A1:C2"/>"#));
    }

    #[test]
    fn written_cells_keep_style_and_extend_dimension() {
        let mut sheet = parse_sheet(SHEET).unwrap();
        sheet.rows.entry(3).or_default().cells.insert(
            3,
            CellXml::Written { value: OutputCell::Text("a < b".into()), style: Some(4) },
        );
        sheet.rows.get_mut(&0).unwrap().cells.insert(
            0,
            CellXml::Written { value: OutputCell::Number(2.5), style: Some(1) },
        );
        let out = xml_text(sheet.to_xml().unwrap());
        assert!(out.contains(r#"<dimension ref="A1:D4"/>"#), "{out}");
        assert!(out.contains(r#"<c r="A1" s="1"><v>2.5</v></c>"#));
        assert!(out.contains(r#"<c r="D4" s="4" t="inlineStr"><is><t xml:space="preserve">a &lt; b</t></is></c>"#));
    }

    #[test]
    fn styles_gain_formats_once() {
        let mut styles = StyleSheet::parse(STYLES).unwrap();
        assert_eq!(styles.base_xfs, 2);
        let date = styles.xf_for(ColumnAlign::Center, Some("yyyy/mm/dd"));
        let id = styles.xf_for(ColumnAlign::Center, Some("0"));
        assert_eq!((date, id), (2, 3));
        assert_eq!(styles.xf_for(ColumnAlign::Center, Some("yyyy/mm/dd")), 2);

        let out = xml_text(styles.to_xml().unwrap());
        assert!(out.contains(r#"<numFmts count="1"><numFmt numFmtId="164" formatCode="yyyy/mm/dd"/></numFmts><fonts"#), "{out}");
        assert!(out.contains(r#"<cellXfs count="4">"#));
        assert!(out.contains(r#"<xf numFmtId="1" fontId="0" fillId="0" borderId="0" xfId="0" applyNumberFormat="1" applyAlignment="1"><alignment horizontal="center" vertical="center"/></xf></cellXfs>"#));
    }

    #[test]
    fn dropped_parts_leave_content_types_and_relationships() {
        let dropped: HashSet<String> = ["xl/calcChain.xml".to_string(), "xl/vbaProject.bin".to_string()].into();
        let types = r#"<Types><Default Extension="bin" ContentType="application/vnd.ms-office.vbaProject"/><Override PartName="/xl/workbook.xml" ContentType="application/vnd.ms-excel.sheet.macroEnabled.main+xml"/><Override PartName="/xl/calcChain.xml" ContentType="x"/></Types>"#;
        let out = xml_text(without_content_types(types, &dropped, true).unwrap());
        assert!(!out.contains("calcChain"));
        assert!(out.contains(PLAIN_WORKBOOK_TYPE));

        let rels = r#"<Relationships><Relationship Id="rId1" Target="worksheets/sheet1.xml"/><Relationship Id="rId9" Target="vbaProject.bin"/><Relationship Id="rId8" Target="/xl/calcChain.xml"/></Relationships>"#;
        let out = xml_text(without_relationships(rels, &dropped).unwrap());
        assert!(out.contains("rId1"));
        assert!(!out.contains("rId9") && !out.contains("rId8"));
    }

    fn zip_entries(path: &Path) -> BTreeMap<String, Vec<u8>> {
        let mut archive = ZipArchive::new(std::fs::File::open(path).unwrap()).unwrap();
        let mut entries = BTreeMap::new();
        for i in 0..archive.len() {
            let mut file = archive.by_index(i).unwrap();
            let mut bytes = Vec::new();
            file.read_to_end(&mut bytes).unwrap();
            entries.insert(file.name().to_string(), bytes);
        }
        entries
    }

    #[test]
    fn untouched_parts_are_copied_as_stored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book.xlsx");
        let mut workbook = Workbook::new();
        let first = workbook.add_worksheet();
        first.write_string(0, 0, "header").unwrap();
        first.write_formula(0, 3, "=1+1").unwrap();
        let second = workbook.add_worksheet();
        second.write_string_with_format(0, 0, "other", &Format::new().set_bold()).unwrap();
        workbook.save(&path).unwrap();
        let before = zip_entries(&path);

        let mut patch = SheetPatch::open(&path).unwrap();
        let style = patch.cell_style(ColumnAlign::Center, Some("yyyy/mm/dd"));
        assert!(style.is_some());
        patch.set(1, 0, OutputCell::Date(NaiveDate::from_ymd_opt(2025, 1, 10).unwrap()), style);
        patch.save(&path).unwrap();

        let after = zip_entries(&path);
        assert_eq!(before.keys().collect::<Vec<_>>(), after.keys().collect::<Vec<_>>());
        for (name, bytes) in &before {
            if name == "xl/worksheets/sheet1.xml" || name == STYLES_PATH {
                assert_ne!(&after[name], bytes, "{name}");
            } else {
                assert_eq!(&after[name], bytes, "{name}");
            }
        }
    }

    #[test]
    fn moving_a_formula_marks_calc_chain_stale() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book.xlsx");
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.write_number(1, 0, 2).unwrap();
        sheet.write_formula(2, 0, "=A2*2").unwrap();
        workbook.save(&path).unwrap();

        let mut patch = SheetPatch::open(&path).unwrap();
        patch.reorder_rows(1, &[1, 2], 0..1);
        assert!(!patch.formulas_disturbed);
        patch.reorder_rows(1, &[2, 1], 0..1);
        assert!(patch.formulas_disturbed);
    }

    #[test]
    fn macro_parts() {
        assert!(is_macro_part("xl/vbaProject.bin"));
        assert!(is_macro_part("xl/_rels/vbaProject.bin.rels"));
        assert!(!is_macro_part("xl/worksheets/sheet1.xml"));
        assert!(is_plain_xlsx(Path::new("report.XLSX")));
        assert!(!is_plain_xlsx(Path::new("list.xlsm")));
    }
}
