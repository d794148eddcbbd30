use std::path::Path;

use calamine::{open_workbook_auto, Data, Reader};

use crate::errors::ReadError;
use crate::model::{FormulaCell, RawCell, RawRow, RawSheet, SourceWorkbook};
use crate::registry::WorkbookReader;

use super::{extension_of, read_bytes, text_cell};

/// Reads Excel and OpenDocument workbooks; every worksheet becomes one sheet.
pub struct SpreadsheetReader;

impl Default for SpreadsheetReader {
    fn default() -> Self {
        Self
    }
}

impl SpreadsheetReader {
    const NAME: &'static str = "SPREADSHEET";
    const EXTENSIONS: &'static [&'static str] = &["xlsx", "xlsm", "xlsb", "xls", "ods"];

    fn convert_cell(data: &Data) -> RawCell {
        match data {
            Data::Empty => RawCell::Empty,
            Data::Int(value) => RawCell::Number(*value as f64),
            Data::Float(value) => RawCell::Number(*value),
            Data::String(value) => text_cell(value),
            Data::Bool(value) => RawCell::Bool(*value),
            Data::DateTime(value) => RawCell::Number(value.as_f64()),
            Data::DateTimeIso(value) | Data::DurationIso(value) => text_cell(value),
            Data::Error(err) => RawCell::Error(err.to_string()),
        }
    }

    /// Formula text of every formula cell on `sheet`, in row-major order.
    pub fn formulas(path: &Path, sheet: &str) -> Result<Vec<FormulaCell>, ReadError> {
        let mut workbook = open_workbook_auto(path).map_err(|err| ReadError::Workbook {
            reader: Self::NAME,
            message: err.to_string(),
        })?;

        if !workbook.sheet_names().iter().any(|name| name == sheet) {
            return Err(ReadError::MissingSheet {
                sheet: sheet.to_string(),
            });
        }

        let range = workbook
            .worksheet_formula(sheet)
            .map_err(|err| ReadError::Workbook {
                reader: Self::NAME,
                message: format!("sheet '{sheet}': {err}"),
            })?;

        let (first_row, first_col) = range.start().unwrap_or((0, 0));
        let mut cells = Vec::new();
        for (offset, row) in range.rows().enumerate() {
            for (idx, text) in row.iter().enumerate() {
                let text = text.trim();
                if text.is_empty() {
                    continue;
                }
                cells.push(FormulaCell {
                    line_index: first_row as usize + offset + 1,
                    column: first_col as usize + idx,
                    text: text.trim_start_matches('=').to_string(),
                });
            }
        }
        Ok(cells)
    }
}

impl WorkbookReader for SpreadsheetReader {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn read(&self, path: &Path) -> Result<SourceWorkbook, ReadError> {
        match extension_of(path) {
            Some(ext) if Self::EXTENSIONS.contains(&ext.as_str()) => {}
            other => {
                return Err(ReadError::FormatMismatch {
                    reader: Self::NAME,
                    reason: format!("unsupported extension {other:?}"),
                });
            }
        }

        let bytes = read_bytes(Self::NAME, path)?;
        let content_hash = blake3::hash(&bytes).to_hex().to_string();

        let mut workbook = open_workbook_auto(path).map_err(|err| ReadError::Workbook {
            reader: Self::NAME,
            message: err.to_string(),
        })?;

        let mut sheets = Vec::new();
        for name in workbook.sheet_names() {
            let range = workbook
                .worksheet_range(&name)
                .map_err(|err| ReadError::Workbook {
                    reader: Self::NAME,
                    message: format!("sheet '{name}': {err}"),
                })?;

            // calamine trims leading blank rows/columns from the range
            let (first_row, first_col) = range.start().unwrap_or((0, 0));
            let first_col = first_col as usize;

            let mut rows = Vec::with_capacity(range.height());
            for (offset, data_row) in range.rows().enumerate() {
                let line_index = first_row as usize + offset + 1;
                let mut cells = vec![RawCell::Empty; first_col];
                cells.extend(data_row.iter().map(Self::convert_cell));
                rows.push(RawRow::new(line_index, cells));
            }

            sheets.push(RawSheet::new(name, rows));
        }

        Ok(SourceWorkbook {
            origin: path.to_path_buf(),
            reader: Self::NAME,
            content_hash,
            sheets,
        })
    }
}
