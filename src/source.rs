//! Tabular source reader.
//!
//! Turns an uploaded file (CSV, or a spreadsheet when the `excel` feature is
//! on) into ordered rows of `header -> cell`. This is the only stage that can
//! fail before the store is touched.

use std::borrow::Cow;
use std::path::Path;

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::{ImportError, ImportResult};

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";
const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const OLE_MAGIC: &[u8] = b"\xD0\xCF\x11\xE0";

/// One raw cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Text(String),
    Number(f64),
}

impl Cell {
    pub fn is_blank(&self) -> bool {
        match self {
            Cell::Empty => true,
            Cell::Text(s) => s.trim().is_empty(),
            Cell::Number(_) => false,
        }
    }

    /// Trimmed text form; `None` for blank cells. Whole numbers render
    /// without a fractional part so `10.0` reads as `"10"`.
    pub fn text(&self) -> Option<Cow<'_, str>> {
        match self {
            Cell::Empty => None,
            Cell::Text(s) => {
                let t = s.trim();
                if t.is_empty() {
                    None
                } else {
                    Some(Cow::Borrowed(t))
                }
            }
            Cell::Number(n) => Some(Cow::Owned(format_number(*n))),
        }
    }

    fn from_json(v: &Value) -> Cell {
        match v {
            Value::Null => Cell::Empty,
            Value::String(s) => Cell::Text(s.clone()),
            Value::Number(n) => n.as_f64().map(Cell::Number).unwrap_or(Cell::Empty),
            Value::Bool(b) => Cell::Text(b.to_string()),
            other => Cell::Text(other.to_string()),
        }
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

/// A data row keyed by the header text it appeared under.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRow {
    /// 1-based spreadsheet row; the header is row 1.
    pub row: usize,
    cells: Vec<(String, Cell)>,
}

impl SourceRow {
    pub fn new(row: usize, cells: Vec<(String, Cell)>) -> Self {
        Self { row, cells }
    }

    pub fn get(&self, header: &str) -> Option<&Cell> {
        self.cells
            .iter()
            .find(|(h, _)| h == header)
            .map(|(_, c)| c)
    }

    pub fn cells(&self) -> impl Iterator<Item = (&str, &Cell)> {
        self.cells.iter().map(|(h, c)| (h.as_str(), c))
    }

    pub fn is_blank(&self) -> bool {
        self.cells.iter().all(|(_, c)| c.is_blank())
    }
}

/// Rows plus a fingerprint of the bytes they came from.
#[derive(Debug, Clone)]
pub struct LoadedTable {
    pub rows: Vec<SourceRow>,
    pub sha256: Option<String>,
}

pub fn read_path(path: &Path, sheet: Option<&str>) -> ImportResult<LoadedTable> {
    let bytes = std::fs::read(path)
        .map_err(|e| ImportError::SourceUnreadable(format!("{}: {e}", path.display())))?;
    let rows = read_table(&bytes, sheet)?;
    Ok(LoadedTable {
        rows,
        sha256: Some(fingerprint(&bytes)),
    })
}

/// Parse a byte stream as a table with a header row.
pub fn read_table(bytes: &[u8], sheet: Option<&str>) -> ImportResult<Vec<SourceRow>> {
    if bytes.starts_with(ZIP_MAGIC) || bytes.starts_with(OLE_MAGIC) {
        return read_spreadsheet(bytes, sheet);
    }
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    if bytes.contains(&0u8) {
        return Err(ImportError::SourceUnreadable(
            "binary content is not delimited text".to_string(),
        ));
    }
    read_csv(bytes)
}

fn read_csv(bytes: &[u8]) -> ImportResult<Vec<SourceRow>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(bytes);
    let headers = rdr
        .headers()?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').trim().to_string())
        .collect::<Vec<_>>();
    ensure_header(&headers)?;

    let mut rows = Vec::new();
    for (idx0, record) in rdr.records().enumerate() {
        let record = record?;
        // Header is row 1.
        let row_no = idx0 + 2;
        let cells = headers
            .iter()
            .enumerate()
            .map(|(i, h)| {
                let cell = match record.get(i) {
                    Some(v) if !v.trim().is_empty() => Cell::Text(v.to_string()),
                    _ => Cell::Empty,
                };
                (h.clone(), cell)
            })
            .collect();
        rows.push(SourceRow::new(row_no, cells));
    }
    trim_trailing_blank(&mut rows);
    Ok(rows)
}

#[cfg(feature = "excel")]
fn read_spreadsheet(bytes: &[u8], sheet: Option<&str>) -> ImportResult<Vec<SourceRow>> {
    use calamine::{open_workbook_auto_from_rs, Data, Reader};
    use std::io::Cursor;

    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))?;
    let sheet_name = match sheet {
        Some(name) => name.to_string(),
        None => workbook
            .sheet_names()
            .first()
            .cloned()
            .ok_or_else(|| ImportError::SourceUnreadable("workbook has no sheets".to_string()))?,
    };
    let range = workbook.worksheet_range(&sheet_name)?;
    let start = range.start();

    let to_cell = |d: &Data| match d {
        Data::Empty => Cell::Empty,
        Data::String(s) => Cell::Text(s.clone()),
        Data::Int(i) => Cell::Number(*i as f64),
        Data::Float(f) => Cell::Number(*f),
        other => Cell::Text(other.to_string()),
    };

    let mut header: Option<(usize, Vec<String>)> = None;
    let mut rows = Vec::new();
    for (idx0, row) in range.rows().enumerate() {
        let Some((_, headers)) = header.as_ref() else {
            if row.iter().any(|c| !matches!(c, Data::Empty)) {
                let cells = row
                    .iter()
                    .map(|c| to_cell(c).text().map(|t| t.into_owned()).unwrap_or_default())
                    .collect::<Vec<_>>();
                header = Some((idx0, cells));
            }
            continue;
        };
        let cells = headers
            .iter()
            .enumerate()
            .map(|(i, h)| (h.clone(), row.get(i).map(to_cell).unwrap_or(Cell::Empty)))
            .collect();
        rows.push(SourceRow::new(sheet_row_number(start, idx0), cells));
    }

    let Some((_, headers)) = header else {
        return Err(ImportError::SourceUnreadable(format!(
            "sheet '{sheet_name}' has no header row"
        )));
    };
    ensure_header(&headers)?;
    trim_trailing_blank(&mut rows);
    Ok(rows)
}

/// 1-based sheet row for the `idx0`-th row of a used range that begins at
/// `start` (0-based row, column). Leading empty rows are not in the range.
#[cfg_attr(not(feature = "excel"), allow(dead_code))]
fn sheet_row_number(start: Option<(u32, u32)>, idx0: usize) -> usize {
    start.map(|(row, _)| row as usize).unwrap_or(0) + idx0 + 1
}

#[cfg(not(feature = "excel"))]
fn read_spreadsheet(_bytes: &[u8], _sheet: Option<&str>) -> ImportResult<Vec<SourceRow>> {
    Err(ImportError::SourceUnreadable(
        "spreadsheet input requires the `excel` feature".to_string(),
    ))
}

/// Rows handed over already parsed, as an array of `{column: value}` objects.
pub fn rows_from_json(value: &Value) -> ImportResult<Vec<SourceRow>> {
    let Some(items) = value.as_array() else {
        return Err(ImportError::SourceUnreadable(
            "rows must be an array of objects".to_string(),
        ));
    };
    let mut rows = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let Some(obj) = item.as_object() else {
            return Err(ImportError::SourceUnreadable(format!(
                "rows[{i}] is not an object"
            )));
        };
        let cells = obj
            .iter()
            .map(|(k, v)| (k.trim().to_string(), Cell::from_json(v)))
            .collect();
        rows.push(SourceRow::new(i + 2, cells));
    }
    trim_trailing_blank(&mut rows);
    Ok(rows)
}

pub fn fingerprint(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

fn ensure_header(headers: &[String]) -> ImportResult<()> {
    if headers.iter().all(|h| h.is_empty()) {
        return Err(ImportError::SourceUnreadable(
            "missing header row".to_string(),
        ));
    }
    Ok(())
}

fn trim_trailing_blank(rows: &mut Vec<SourceRow>) {
    while rows.last().map(|r| r.is_blank()).unwrap_or(false) {
        rows.pop();
    }
}
