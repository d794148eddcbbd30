use std::fs;
use std::path::Path;

use crate::errors::ReadError;
use crate::model::RawCell;

pub(crate) fn text_cell(value: &str) -> RawCell {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        RawCell::Empty
    } else {
        RawCell::Text(trimmed.to_string())
    }
}

pub(crate) fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
}

pub(crate) fn read_bytes(reader: &'static str, path: &Path) -> Result<Vec<u8>, ReadError> {
    fs::read(path).map_err(|source| ReadError::Io {
        reader,
        path: path.to_path_buf(),
        source,
    })
}
