//! Minimal XLSX workbook reader
//!
//! An XLSX file is a zip container of SpreadsheetML parts. The reader uses
//! these:
//!
//! - `xl/workbook.xml`: sheet names, in display order, with relationship ids
//! - `xl/_rels/workbook.xml.rels`: relationship id -> worksheet part
//! - `xl/sharedStrings.xml`: the shared string table (optional)
//! - `xl/styles.xml`: cell styles and number formats (optional)
//! - `xl/worksheets/sheetN.xml`: the cells
//!
//! Rows come back as `Vec<Vec<String>>`. Missing cells inside a row become
//! empty strings, trailing empty cells are trimmed, and gaps between rows are
//! kept as empty rows. Numeric cells styled with a date or time format are
//! rendered through that format; other numbers are returned as stored.

mod format;

pub use format::DateFormat;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::HashMap;
use std::io::{Read, Seek};
use thiserror::Error;
use zip::result::ZipError;
use zip::ZipArchive;

use format::{CellFormats, STYLES_PART};

const WORKBOOK_PART: &str = "xl/workbook.xml";
const WORKBOOK_RELS_PART: &str = "xl/_rels/workbook.xml.rels";
const SHARED_STRINGS_PART: &str = "xl/sharedStrings.xml";

/// Widest sheet a workbook may declare (column XFD)
pub const MAX_COLUMNS: usize = 16_384;
/// Tallest sheet a workbook may declare
pub const MAX_ROWS: usize = 1_048_576;

/// Errors raised while reading a workbook
#[derive(Error, Debug)]
pub enum WorkbookError {
    #[error("Not a valid XLSX container: {0}")]
    Container(#[from] ZipError),

    #[error("Malformed XML in {part}: {message}")]
    Xml { part: String, message: String },

    #[error("Missing workbook part: {0}")]
    MissingPart(String),

    #[error("Sheet not found: {0}")]
    SheetNotFound(String),

    #[error("Invalid cell reference '{0}'")]
    CellReference(String),

    #[error("Shared string index {0} out of range")]
    SharedString(usize),
}

pub type Result<T> = std::result::Result<T, WorkbookError>;

/// Which sheet to read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SheetSelector {
    /// Zero-based position in the workbook's sheet order
    Index(usize),
    /// Exact sheet name
    Name(String),
}

impl std::fmt::Display for SheetSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SheetSelector::Index(i) => write!(f, "#{}", i),
            SheetSelector::Name(name) => write!(f, "'{}'", name),
        }
    }
}

#[derive(Debug, Clone)]
struct SheetEntry {
    name: String,
    part: String,
}

/// An opened workbook
pub struct Workbook<R: Read + Seek> {
    archive: ZipArchive<R>,
    sheets: Vec<SheetEntry>,
    shared_strings: Vec<String>,
    formats: CellFormats,
}

impl<R: Read + Seek> Workbook<R> {
    /// Open a workbook from any seekable byte source
    pub fn open(reader: R) -> Result<Self> {
        let mut archive = ZipArchive::new(reader)?;

        let rels = read_part(&mut archive, WORKBOOK_RELS_PART)?
            .ok_or_else(|| WorkbookError::MissingPart(WORKBOOK_RELS_PART.to_string()))?;
        let targets = parse_relationships(&rels)?;

        let workbook = read_part(&mut archive, WORKBOOK_PART)?
            .ok_or_else(|| WorkbookError::MissingPart(WORKBOOK_PART.to_string()))?;

        let (sheet_list, date1904) = parse_workbook(&workbook)?;
        let sheets = sheet_list
            .into_iter()
            .map(|(name, rel_id)| {
                let target = targets
                    .get(&rel_id)
                    .ok_or_else(|| WorkbookError::MissingPart(format!("relationship {}", rel_id)))?;
                Ok(SheetEntry {
                    name,
                    part: resolve_target(target),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let shared_strings = match read_part(&mut archive, SHARED_STRINGS_PART)? {
            Some(bytes) => parse_shared_strings(&bytes)?,
            None => Vec::new(),
        };

        let formats = match read_part(&mut archive, STYLES_PART)? {
            Some(bytes) => CellFormats::parse(&bytes, date1904)?,
            None => CellFormats::plain(date1904),
        };

        Ok(Self {
            archive,
            sheets,
            shared_strings,
            formats,
        })
    }

    /// Sheet names in workbook order
    pub fn sheet_names(&self) -> Vec<String> {
        self.sheets.iter().map(|s| s.name.clone()).collect()
    }

    /// Read every row of the selected sheet
    pub fn rows(&mut self, selector: &SheetSelector) -> Result<Vec<Vec<String>>> {
        let sheet = match selector {
            SheetSelector::Index(i) => self.sheets.get(*i),
            SheetSelector::Name(name) => self.sheets.iter().find(|s| &s.name == name),
        }
        .cloned()
        .ok_or_else(|| WorkbookError::SheetNotFound(selector.to_string()))?;

        let bytes = read_part(&mut self.archive, &sheet.part)?
            .ok_or_else(|| WorkbookError::MissingPart(sheet.part.clone()))?;
        let cells = CellContext {
            shared: &self.shared_strings,
            formats: &self.formats,
        };
        parse_sheet(&bytes, &sheet.part, &cells)
    }
}

/// Raw bytes of a zip part; `Ok(None)` when the part is absent
fn read_part<R: Read + Seek>(archive: &mut ZipArchive<R>, part: &str) -> Result<Option<Vec<u8>>> {
    let mut file = match archive.by_name(part) {
        Ok(file) => file,
        Err(ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes).map_err(ZipError::from)?;
    Ok(Some(bytes))
}

fn xml_error(part: &str, err: impl std::fmt::Display) -> WorkbookError {
    WorkbookError::Xml {
        part: part.to_string(),
        message: err.to_string(),
    }
}

fn attribute(element: &BytesStart<'_>, part: &str, local: &[u8]) -> Result<Option<String>> {
    for attr in element.attributes() {
        let attr = attr.map_err(|e| xml_error(part, e))?;
        if attr.key.local_name().as_ref() == local {
            let value = attr.unescape_value().map_err(|e| xml_error(part, e))?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

fn resolve_target(target: &str) -> String {
    match target.strip_prefix('/') {
        Some(absolute) => absolute.to_string(),
        None => format!("xl/{}", target),
    }
}

fn parse_relationships(xml: &[u8]) -> Result<HashMap<String, String>> {
    let mut reader = Reader::from_reader(xml);
    let mut targets = HashMap::new();
    let mut buf = Vec::new();
    loop {
        match reader
            .read_event_into(&mut buf)
            .map_err(|e| xml_error(WORKBOOK_RELS_PART, e))?
        {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"Relationship" => {
                let id = attribute(&e, WORKBOOK_RELS_PART, b"Id")?;
                let target = attribute(&e, WORKBOOK_RELS_PART, b"Target")?;
                if let (Some(id), Some(target)) = (id, target) {
                    targets.insert(id, target);
                }
            },
            Event::Eof => break,
            _ => {},
        }
        buf.clear();
    }
    Ok(targets)
}

/// Sheet names with relationship ids, and whether dates count from 1904
fn parse_workbook(xml: &[u8]) -> Result<(Vec<(String, String)>, bool)> {
    let mut reader = Reader::from_reader(xml);
    let mut sheets = Vec::new();
    let mut date1904 = false;
    let mut buf = Vec::new();
    loop {
        match reader
            .read_event_into(&mut buf)
            .map_err(|e| xml_error(WORKBOOK_PART, e))?
        {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"sheet" => {
                let name = attribute(&e, WORKBOOK_PART, b"name")?;
                // `r:id`; the local name is `id`
                let rel_id = attribute(&e, WORKBOOK_PART, b"id")?;
                if let (Some(name), Some(rel_id)) = (name, rel_id) {
                    sheets.push((name, rel_id));
                }
            },
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"workbookPr" => {
                date1904 = matches!(
                    attribute(&e, WORKBOOK_PART, b"date1904")?.as_deref(),
                    Some("1" | "true")
                );
            },
            Event::Eof => break,
            _ => {},
        }
        buf.clear();
    }
    Ok((sheets, date1904))
}

fn parse_shared_strings(xml: &[u8]) -> Result<Vec<String>> {
    let mut reader = Reader::from_reader(xml);
    let mut strings = Vec::new();
    let mut current = String::new();
    let mut in_text = false;
    // Phonetic runs (<rPh>) carry reading hints, not cell text.
    let mut phonetic_depth = 0usize;
    let mut buf = Vec::new();

    loop {
        match reader
            .read_event_into(&mut buf)
            .map_err(|e| xml_error(SHARED_STRINGS_PART, e))?
        {
            Event::Start(e) => match e.local_name().as_ref() {
                b"si" => current.clear(),
                b"rPh" => phonetic_depth += 1,
                b"t" if phonetic_depth == 0 => in_text = true,
                _ => {},
            },
            Event::Empty(e) if e.local_name().as_ref() == b"si" => strings.push(String::new()),
            Event::Text(t) if in_text => {
                current.push_str(&t.unescape().map_err(|e| xml_error(SHARED_STRINGS_PART, e))?);
            },
            Event::CData(t) if in_text => {
                current.push_str(&String::from_utf8_lossy(&t.into_inner()));
            },
            Event::End(e) => match e.local_name().as_ref() {
                b"si" => strings.push(std::mem::take(&mut current)),
                b"rPh" => phonetic_depth = phonetic_depth.saturating_sub(1),
                b"t" => in_text = false,
                _ => {},
            },
            Event::Eof => break,
            _ => {},
        }
        buf.clear();
    }
    Ok(strings)
}

/// Split an A1-style reference into zero-based (column, row)
///
/// References past [`MAX_COLUMNS`] or [`MAX_ROWS`] are rejected.
pub fn parse_cell_reference(reference: &str) -> Option<(usize, usize)> {
    let split = reference.find(|c: char| c.is_ascii_digit())?;
    let (letters, digits) = reference.split_at(split);
    if letters.is_empty()
        || letters.len() > 3
        || !letters.chars().all(|c| c.is_ascii_alphabetic())
    {
        return None;
    }

    let mut column = 0usize;
    for c in letters.chars() {
        column = column
            .checked_mul(26)?
            .checked_add((c.to_ascii_uppercase() as u8 - b'A') as usize + 1)?;
    }
    let row: usize = digits.parse().ok()?;
    if row == 0 || row > MAX_ROWS || column > MAX_COLUMNS {
        return None;
    }
    Some((column - 1, row - 1))
}

/// Workbook-wide tables a cell value is resolved against
struct CellContext<'a> {
    shared: &'a [String],
    formats: &'a CellFormats,
}

#[derive(Default)]
struct CellState {
    column: usize,
    cell_type: Option<String>,
    style: usize,
    value: String,
    capturing: bool,
}

fn parse_sheet(xml: &[u8], part: &str, cells: &CellContext<'_>) -> Result<Vec<Vec<String>>> {
    let mut reader = Reader::from_reader(xml);
    let mut rows: Vec<Vec<String>> = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut row_index = 0usize;
    let mut next_row_index = 0usize;
    let mut cell: Option<CellState> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf).map_err(|e| xml_error(part, e))? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"row" => {
                    row_index = row_position(&e, part, next_row_index)?;
                    row.clear();
                },
                b"c" => cell = Some(start_cell(&e, part, row.len())?),
                b"v" | b"t" => {
                    if let Some(cell) = cell.as_mut() {
                        cell.capturing = true;
                    }
                },
                _ => {},
            },
            Event::Empty(e) => match e.local_name().as_ref() {
                // A self-closing row has no cells.
                b"row" => {
                    row_index = row_position(&e, part, next_row_index)?;
                    next_row_index = row_index + 1;
                },
                // Styled but empty cell; nothing to place.
                b"c" => {},
                _ => {},
            },
            Event::Text(t) => {
                if let Some(cell) = cell.as_mut().filter(|c| c.capturing) {
                    cell.value
                        .push_str(&t.unescape().map_err(|e| xml_error(part, e))?);
                }
            },
            Event::End(e) => match e.local_name().as_ref() {
                b"v" | b"t" => {
                    if let Some(cell) = cell.as_mut() {
                        cell.capturing = false;
                    }
                },
                b"c" => {
                    if let Some(done) = cell.take() {
                        let column = done.column;
                        let text = cell_text(done, cells)?;
                        if !text.is_empty() {
                            if row.len() <= column {
                                row.resize(column + 1, String::new());
                            }
                            row[column] = text;
                        }
                    }
                },
                b"row" => {
                    while row.last().is_some_and(|v| v.is_empty()) {
                        row.pop();
                    }
                    if !row.is_empty() {
                        if rows.len() < row_index {
                            rows.resize(row_index, Vec::new());
                        }
                        if rows.len() == row_index {
                            rows.push(std::mem::take(&mut row));
                        } else {
                            rows[row_index] = std::mem::take(&mut row);
                        }
                    }
                    next_row_index = row_index + 1;
                },
                _ => {},
            },
            Event::Eof => break,
            _ => {},
        }
        buf.clear();
    }

    Ok(rows)
}

fn row_position(element: &BytesStart<'_>, part: &str, fallback: usize) -> Result<usize> {
    match attribute(element, part, b"r")? {
        Some(r) => r
            .parse::<usize>()
            .ok()
            .filter(|n| *n <= MAX_ROWS)
            .and_then(|n| n.checked_sub(1))
            .ok_or(WorkbookError::CellReference(r)),
        None => Ok(fallback),
    }
}

fn start_cell(element: &BytesStart<'_>, part: &str, next_column: usize) -> Result<CellState> {
    let column = match attribute(element, part, b"r")? {
        Some(reference) => {
            parse_cell_reference(&reference)
                .ok_or(WorkbookError::CellReference(reference))?
                .0
        },
        None => next_column,
    };
    let style = match attribute(element, part, b"s")? {
        Some(s) => s
            .parse::<usize>()
            .map_err(|_| xml_error(part, format!("invalid style index '{}'", s)))?,
        None => 0,
    };
    Ok(CellState {
        column,
        cell_type: attribute(element, part, b"t")?,
        style,
        ..CellState::default()
    })
}

fn cell_text(cell: CellState, cells: &CellContext<'_>) -> Result<String> {
    let raw = cell.value;
    match cell.cell_type.as_deref() {
        Some("s") => {
            let index: usize = raw
                .trim()
                .parse()
                .map_err(|_| WorkbookError::CellReference(raw.clone()))?;
            cells
                .shared
                .get(index)
                .cloned()
                .ok_or(WorkbookError::SharedString(index))
        },
        Some("b") => Ok(match raw.trim() {
            "1" => "TRUE".to_string(),
            "0" => "FALSE".to_string(),
            other => other.to_string(),
        }),
        None | Some("n") => Ok(cells.formats.render(cell.style, &raw).unwrap_or(raw)),
        _ => Ok(raw),
    }
}
