pub mod errors;
pub mod formats;
pub mod model;
mod registry;

pub use errors::{ReadError, ReaderAttempt};
pub use model::{
    column_letters, format_number, FormulaCell, RawCell, RawRow, RawSheet, RawTable, SourceWorkbook,
};
pub use registry::{read_with_readers, read_workbook, WorkbookReader};

#[cfg(test)]
mod tests;
