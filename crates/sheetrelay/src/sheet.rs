//! In-memory spreadsheet table plus reading and writing.
//!
//! Only the first worksheet of a workbook is considered. The first row is the
//! header row; everything below it is data.

use std::fmt;
use std::path::{Path, PathBuf};

use calamine::{open_workbook_auto, Data, Reader};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use rust_xlsxwriter::{Format, Workbook};
use thiserror::Error;

/// Maximum columns an xlsx worksheet can hold.
pub const MAX_COLUMNS: usize = 16_384;

/// Maximum rows an xlsx worksheet can hold, header included.
pub const MAX_ROWS: usize = 1_048_576;

const DATE_FORMAT: &str = "yyyy-mm-dd";
const DATETIME_FORMAT: &str = "yyyy-mm-dd hh:mm:ss";
const DURATION_FORMAT: &str = "[h]:mm:ss";

#[derive(Error, Debug)]
pub enum SheetError {
    #[error("Failed to open workbook '{path}': {reason}")]
    Open { path: PathBuf, reason: String },

    #[error("Workbook '{0}' has no worksheets")]
    NoWorksheet(PathBuf),

    #[error("Failed to write workbook '{path}': {reason}")]
    Write { path: PathBuf, reason: String },

    #[error("Table too large: {0}")]
    TooLarge(String),
}

/// A single cell value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Cell {
    #[default]
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
    /// Date or date-time as a 1900-system serial number.
    DateTime(f64),
    /// Elapsed time as a fraction of days.
    Duration(f64),
}

impl Cell {
    pub fn is_blank(&self) -> bool {
        match self {
            Cell::Empty => true,
            Cell::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Empty => Ok(()),
            Cell::Text(s) => f.write_str(s),
            // Integral values print without a trailing ".0".
            Cell::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => write!(f, "{}", *n as i64),
            Cell::Number(n) => write!(f, "{}", n),
            Cell::Bool(b) => write!(f, "{}", b),
            Cell::DateTime(serial) => match serial_to_datetime(*serial) {
                Some(dt) if serial.fract() == 0.0 => write!(f, "{}", dt.format("%Y-%m-%d")),
                Some(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S")),
                None => write!(f, "{}", serial),
            },
            Cell::Duration(days) => {
                let total = (days * 86_400.0).round() as i64;
                write!(f, "{}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
            }
        }
    }
}

/// Converts a 1900-system serial (day 0 = 1899-12-30) to a calendar value.
fn serial_to_datetime(serial: f64) -> Option<NaiveDateTime> {
    if !serial.is_finite() || serial < 0.0 {
        return None;
    }
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?.and_hms_opt(0, 0, 0)?;
    let millis = (serial * 86_400_000.0).round() as i64;
    epoch.checked_add_signed(Duration::milliseconds(millis))
}

impl From<&Data> for Cell {
    fn from(data: &Data) -> Self {
        match data {
            Data::Empty => Cell::Empty,
            Data::String(s) => Cell::Text(s.clone()),
            Data::Int(i) => Cell::Number(*i as f64),
            Data::Float(f) => Cell::Number(*f),
            Data::Bool(b) => Cell::Bool(*b),
            Data::DateTime(dt) if dt.is_duration() => Cell::Duration(dt.as_f64()),
            Data::DateTime(dt) => Cell::DateTime(dt.as_f64()),
            Data::DateTimeIso(s) | Data::DurationIso(s) => Cell::Text(s.clone()),
            Data::Error(e) => Cell::Text(format!("#{:?}", e)),
        }
    }
}

/// A rectangular table with a header row.
///
/// Rows may be shorter than the header; missing trailing cells read as empty.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl Table {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<Cell>>) -> Self {
        Self { headers, rows }
    }

    pub fn width(&self) -> usize {
        self.headers.len()
    }

    /// Returns the cell at (row, col), or `Cell::Empty` when out of range.
    pub fn cell(&self, row: usize, col: usize) -> &Cell {
        const EMPTY: &Cell = &Cell::Empty;
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .unwrap_or(EMPTY)
    }
}

/// Reads the first worksheet of an xlsx or xls file.
///
/// Blank header cells are named `Column N` (1-based) and repeated header names
/// get a ` (2)`, ` (3)` suffix so every column has a distinct name. Trailing
/// fully blank rows are dropped.
pub fn read_table(path: &Path) -> Result<Table, SheetError> {
    let mut workbook = open_workbook_auto(path).map_err(|e| SheetError::Open {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| SheetError::NoWorksheet(path.to_path_buf()))?
        .map_err(|e| SheetError::Open {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    let mut rows = range.rows();
    let raw_headers: Vec<String> = match rows.next() {
        Some(header_row) => header_row
            .iter()
            .map(|d| Cell::from(d).to_string().trim().to_string())
            .collect(),
        None => return Ok(Table::default()),
    };
    let headers = unique_headers(raw_headers);

    let mut data: Vec<Vec<Cell>> = rows
        .map(|r| r.iter().map(Cell::from).collect::<Vec<_>>())
        .collect();
    while data
        .last()
        .is_some_and(|r| r.iter().all(Cell::is_blank))
    {
        data.pop();
    }

    Ok(Table::new(headers, data))
}

/// Writes a table as a single-sheet xlsx workbook with a bold header row.
pub fn write_table(table: &Table, path: &Path) -> Result<(), SheetError> {
    if table.width() > MAX_COLUMNS {
        return Err(SheetError::TooLarge(format!(
            "{} columns exceeds the limit of {}",
            table.width(),
            MAX_COLUMNS
        )));
    }
    if table.rows.len() + 1 > MAX_ROWS {
        return Err(SheetError::TooLarge(format!(
            "{} rows exceeds the limit of {}",
            table.rows.len(),
            MAX_ROWS - 1
        )));
    }

    let write_err = |e: rust_xlsxwriter::XlsxError| SheetError::Write {
        path: path.to_path_buf(),
        reason: e.to_string(),
    };

    let mut workbook = Workbook::new();
    let bold = Format::new().set_bold();
    let date = Format::new().set_num_format(DATE_FORMAT);
    let datetime = Format::new().set_num_format(DATETIME_FORMAT);
    let duration = Format::new().set_num_format(DURATION_FORMAT);
    let worksheet = workbook.add_worksheet();

    for (col, header) in table.headers.iter().enumerate() {
        worksheet
            .write_string_with_format(0, col as u16, header, &bold)
            .map_err(write_err)?;
    }

    for (r, row) in table.rows.iter().enumerate() {
        let xr = (r + 1) as u32;
        for (col, cell) in row.iter().enumerate().take(table.width()) {
            let xc = col as u16;
            match cell {
                Cell::Empty => {}
                Cell::Text(s) => {
                    worksheet.write_string(xr, xc, s).map_err(write_err)?;
                }
                Cell::Number(n) => {
                    worksheet.write_number(xr, xc, *n).map_err(write_err)?;
                }
                Cell::Bool(b) => {
                    worksheet.write_boolean(xr, xc, *b).map_err(write_err)?;
                }
                Cell::DateTime(serial) => {
                    let format = if serial.fract() == 0.0 { &date } else { &datetime };
                    worksheet
                        .write_number_with_format(xr, xc, *serial, format)
                        .map_err(write_err)?;
                }
                Cell::Duration(days) => {
                    worksheet
                        .write_number_with_format(xr, xc, *days, &duration)
                        .map_err(write_err)?;
                }
            }
        }
    }

    workbook.save(path).map_err(write_err)?;
    Ok(())
}

fn unique_headers(raw: Vec<String>) -> Vec<String> {
    let mut seen: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
    raw.into_iter()
        .enumerate()
        .map(|(idx, name)| {
            let base = if name.is_empty() {
                format!("Column {}", idx + 1)
            } else {
                name
            };
            let count = seen.entry(base.clone()).or_insert(0);
            *count += 1;
            if *count == 1 {
                base
            } else {
                format!("{} ({})", base, count)
            }
        })
        .collect()
}
