use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Clone)]
pub struct ReaderAttempt {
    pub reader: &'static str,
    pub message: String,
}

impl ReaderAttempt {
    pub fn new(reader: &'static str, message: impl Into<String>) -> Self {
        Self {
            reader,
            message: message.into(),
        }
    }
}

impl fmt::Display for ReaderAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.reader, self.message)
    }
}

#[derive(Debug, Error)]
pub enum ReadError {
    #[error("{reader} format mismatch: {reason}")]
    FormatMismatch {
        reader: &'static str,
        reason: String,
    },

    #[error("{reader} failed to read {}: {source}", path.display())]
    Io {
        reader: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{reader} could not open workbook: {message}")]
    Workbook {
        reader: &'static str,
        message: String,
    },

    #[error("{reader} CSV error in sheet '{sheet}': {source}")]
    Csv {
        reader: &'static str,
        sheet: String,
        #[source]
        source: csv::Error,
    },

    #[error("sheet '{sheet}' is missing from the workbook")]
    MissingSheet { sheet: String },

    #[error("sheet '{sheet}' did not contain any data rows")]
    EmptySheet { sheet: String },

    #[error("sheet '{sheet}' line {line_index} is malformed: {message}")]
    Malformed {
        sheet: String,
        line_index: usize,
        message: String,
    },

    #[error("sheet '{sheet}' line {line_index} column '{column}' invalid: {message}")]
    InvalidCell {
        sheet: String,
        line_index: usize,
        column: String,
        message: String,
    },

    #[error("no reader recognized {}; attempts: {attempts:?}", path.display())]
    NoMatchingReader {
        path: PathBuf,
        attempts: Vec<ReaderAttempt>,
    },
}
