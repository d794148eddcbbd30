use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::errors::ReadError;

static EMPTY_CELL: RawCell = RawCell::Empty;

/// A single cell exactly as the source sheet stored it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RawCell {
    Empty,
    Number(f64),
    Text(String),
    Bool(bool),
    /// A spreadsheet error value such as `#DIV/0!`.
    Error(String),
}

impl RawCell {
    pub fn is_empty(&self) -> bool {
        match self {
            RawCell::Empty => true,
            RawCell::Text(value) => value.trim().is_empty(),
            RawCell::Number(_) | RawCell::Bool(_) | RawCell::Error(_) => false,
        }
    }
}

impl fmt::Display for RawCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawCell::Empty => Ok(()),
            RawCell::Number(value) => f.write_str(&format_number(*value)),
            RawCell::Text(value) | RawCell::Error(value) => f.write_str(value),
            RawCell::Bool(true) => f.write_str("TRUE"),
            RawCell::Bool(false) => f.write_str("FALSE"),
        }
    }
}

/// Formats a number the way a spreadsheet shows it in a general cell: integral
/// values lose their trailing `.0`.
pub fn format_number(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

/// Spreadsheet column letters for a zero-based column index (`0 -> A`, `27 -> AB`).
pub fn column_letters(index: usize) -> String {
    let mut letters = Vec::new();
    let mut remaining = index + 1;
    while remaining > 0 {
        let rem = (remaining - 1) % 26;
        letters.push(b'A' + rem as u8);
        remaining = (remaining - 1) / 26;
    }
    letters.reverse();
    String::from_utf8(letters).unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    /// 1-based line of the row inside its sheet.
    pub line_index: usize,
    pub cells: Vec<RawCell>,
}

impl RawRow {
    pub fn new(line_index: usize, cells: Vec<RawCell>) -> Self {
        Self { line_index, cells }
    }

    pub fn cell(&self, index: usize) -> &RawCell {
        self.cells.get(index).unwrap_or(&EMPTY_CELL)
    }

    pub fn is_blank(&self) -> bool {
        self.cells.iter().all(RawCell::is_empty)
    }
}

/// Untyped grid of one sheet. Fully blank lines may be absent.
#[derive(Debug, Clone)]
pub struct RawSheet {
    pub name: String,
    pub rows: Vec<RawRow>,
}

impl RawSheet {
    pub fn new(name: impl Into<String>, rows: Vec<RawRow>) -> Self {
        Self {
            name: name.into(),
            rows,
        }
    }

    /// Interprets the sheet as a table whose headers sit on `header_row`
    /// (1-based). Lines above the header are ignored, blank lines are skipped
    /// and headers are kept verbatim apart from surrounding whitespace.
    pub fn tabulate(&self, header_row: usize) -> Result<RawTable, ReadError> {
        if self.rows.iter().all(RawRow::is_blank) {
            return Err(ReadError::EmptySheet {
                sheet: self.name.clone(),
            });
        }

        if header_row == 0 {
            return Err(self.malformed(0, "header row numbering starts at 1"));
        }

        let header = self
            .rows
            .iter()
            .find(|row| row.line_index == header_row)
            .filter(|row| !row.is_blank())
            .ok_or_else(|| self.malformed(header_row, "header row is blank"))?;

        let width = header
            .cells
            .iter()
            .rposition(|cell| !cell.is_empty())
            .map(|pos| pos + 1)
            .unwrap_or(0);

        let mut headers: Vec<String> = Vec::with_capacity(width);
        for cell in &header.cells[..width] {
            let name = cell.to_string().trim().to_string();
            if !name.is_empty() && headers.contains(&name) {
                return Err(self.malformed(header_row, format!("duplicate header '{name}'")));
            }
            headers.push(name);
        }

        let mut rows = Vec::new();
        for row in self.rows.iter().filter(|row| row.line_index > header_row) {
            if row.is_blank() {
                continue;
            }

            if let Some((idx, _)) = row
                .cells
                .iter()
                .enumerate()
                .skip(width)
                .find(|(_, cell)| !cell.is_empty())
            {
                return Err(self.malformed(
                    row.line_index,
                    format!(
                        "value in column {} lies beyond the {width} header columns",
                        column_letters(idx)
                    ),
                ));
            }

            for (idx, name) in headers.iter().enumerate() {
                if name.is_empty() && !row.cell(idx).is_empty() {
                    return Err(self.malformed(
                        row.line_index,
                        format!("column {} holds data but has no header", column_letters(idx)),
                    ));
                }
            }

            rows.push(row);
        }

        if rows.is_empty() {
            return Err(ReadError::EmptySheet {
                sheet: self.name.clone(),
            });
        }

        let keep: Vec<usize> = headers
            .iter()
            .enumerate()
            .filter(|(_, name)| !name.is_empty())
            .map(|(idx, _)| idx)
            .collect();

        let rows = rows
            .into_iter()
            .map(|row| {
                let cells = keep.iter().map(|idx| row.cell(*idx).clone()).collect();
                RawRow::new(row.line_index, cells)
            })
            .collect();
        let headers = keep.iter().map(|idx| headers[*idx].clone()).collect();

        Ok(RawTable {
            sheet: self.name.clone(),
            headers,
            rows,
        })
    }

    fn malformed(&self, line_index: usize, message: impl Into<String>) -> ReadError {
        ReadError::Malformed {
            sheet: self.name.clone(),
            line_index,
            message: message.into(),
        }
    }
}

/// Rows of one source sheet under its published headers.
#[derive(Debug, Clone)]
pub struct RawTable {
    pub sheet: String,
    pub headers: Vec<String>,
    pub rows: Vec<RawRow>,
}

impl RawTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, header: &str) -> Option<usize> {
        self.headers.iter().position(|name| name == header)
    }
}

#[derive(Debug, Clone)]
pub struct SourceWorkbook {
    pub origin: PathBuf,
    pub reader: &'static str,
    pub content_hash: String,
    pub sheets: Vec<RawSheet>,
}

impl SourceWorkbook {
    pub fn sheet_names(&self) -> Vec<&str> {
        self.sheets.iter().map(|sheet| sheet.name.as_str()).collect()
    }

    pub fn sheet(&self, name: &str) -> Result<&RawSheet, ReadError> {
        self.sheets
            .iter()
            .find(|sheet| sheet.name == name)
            .ok_or_else(|| ReadError::MissingSheet {
                sheet: name.to_string(),
            })
    }
}

/// Formula text stored in one cell, without the leading `=`.
#[derive(Debug, Clone, PartialEq)]
pub struct FormulaCell {
    /// 1-based line of the cell.
    pub line_index: usize,
    /// Zero-based column of the cell.
    pub column: usize,
    pub text: String,
}
