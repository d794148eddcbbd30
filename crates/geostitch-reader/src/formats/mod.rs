mod common;
mod csv_directory;
mod spreadsheet;

pub use csv_directory::CsvDirectoryReader;
pub use spreadsheet::SpreadsheetReader;

pub(crate) use common::{extension_of, read_bytes, text_cell};
