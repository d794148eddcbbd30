use std::path::Path;

use tracing::debug;

use crate::errors::{ReadError, ReaderAttempt};
use crate::formats::{CsvDirectoryReader, SpreadsheetReader};
use crate::model::SourceWorkbook;

pub trait WorkbookReader {
    fn name(&self) -> &'static str;
    fn read(&self, path: &Path) -> Result<SourceWorkbook, ReadError>;
}

pub fn read_workbook(path: &Path) -> Result<SourceWorkbook, ReadError> {
    let spreadsheet = SpreadsheetReader;
    let csv_directory = CsvDirectoryReader;
    let readers: [&dyn WorkbookReader; 2] = [&spreadsheet, &csv_directory];
    read_with_readers(path, &readers)
}

pub fn read_with_readers(
    path: &Path,
    readers: &[&dyn WorkbookReader],
) -> Result<SourceWorkbook, ReadError> {
    let mut attempts = Vec::new();

    for reader in readers {
        match reader.read(path) {
            Ok(workbook) => {
                debug!(
                    reader = reader.name(),
                    sheets = workbook.sheets.len(),
                    "workbook loaded"
                );
                return Ok(workbook);
            }
            Err(ReadError::FormatMismatch { reason, .. }) => {
                attempts.push(ReaderAttempt::new(reader.name(), reason));
            }
            Err(err) => return Err(err),
        }
    }

    Err(ReadError::NoMatchingReader {
        path: path.to_path_buf(),
        attempts,
    })
}
