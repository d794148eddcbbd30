use std::fs;
use std::path::{Path, PathBuf};

use crate::errors::ReadError;
use crate::model::{RawRow, RawSheet, SourceWorkbook};
use crate::registry::WorkbookReader;

use super::{extension_of, read_bytes, text_cell};

/// Treats a directory of `*.csv` files as a workbook, one sheet per file
/// named after the file stem. Files are taken in name order.
pub struct CsvDirectoryReader;

impl Default for CsvDirectoryReader {
    fn default() -> Self {
        Self
    }
}

impl CsvDirectoryReader {
    const NAME: &'static str = "CSV_DIRECTORY";

    fn list_csv_files(path: &Path) -> Result<Vec<PathBuf>, ReadError> {
        let entries = fs::read_dir(path).map_err(|source| ReadError::Io {
            reader: Self::NAME,
            path: path.to_path_buf(),
            source,
        })?;

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| ReadError::Io {
                reader: Self::NAME,
                path: path.to_path_buf(),
                source,
            })?;
            let file_path = entry.path();
            if file_path.is_file() && extension_of(&file_path).as_deref() == Some("csv") {
                files.push(file_path);
            }
        }
        files.sort();
        Ok(files)
    }

    fn parse_sheet(name: &str, bytes: &[u8]) -> Result<RawSheet, ReadError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(bytes);

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|err| ReadError::Csv {
                reader: Self::NAME,
                sheet: name.to_string(),
                source: err,
            })?;
            let line_index = record
                .position()
                .map(|pos| pos.line() as usize)
                .unwrap_or(rows.len() + 1);
            let cells = record.iter().map(text_cell).collect();
            rows.push(RawRow::new(line_index, cells));
        }

        Ok(RawSheet::new(name, rows))
    }
}

impl WorkbookReader for CsvDirectoryReader {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn read(&self, path: &Path) -> Result<SourceWorkbook, ReadError> {
        if !path.is_dir() {
            return Err(ReadError::FormatMismatch {
                reader: Self::NAME,
                reason: "input is not a directory".to_string(),
            });
        }

        let files = Self::list_csv_files(path)?;
        if files.is_empty() {
            return Err(ReadError::FormatMismatch {
                reader: Self::NAME,
                reason: "directory holds no .csv files".to_string(),
            });
        }

        let mut hasher = blake3::Hasher::new();
        let mut sheets = Vec::with_capacity(files.len());
        for file in &files {
            let name = file
                .file_stem()
                .and_then(|stem| stem.to_str())
                .unwrap_or_default()
                .to_string();
            let bytes = read_bytes(Self::NAME, file)?;
            hasher.update(name.as_bytes());
            hasher.update(&bytes);
            sheets.push(Self::parse_sheet(&name, &bytes)?);
        }

        Ok(SourceWorkbook {
            origin: path.to_path_buf(),
            reader: Self::NAME,
            content_hash: hasher.finalize().to_hex().to_string(),
            sheets,
        })
    }
}
