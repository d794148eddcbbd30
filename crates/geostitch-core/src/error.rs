// crates/geostitch-core/src/error.rs

use geostitch_reader::ReadError;
use thiserror::Error;

use crate::expression::ExpressionError;
use crate::formula::FormulaError;
use crate::mapping::MappingError;
use crate::reference::UnitConversionError;

#[derive(Error, Debug)]
pub enum StitchError {
    #[error("Reading sources failed: {0}")]
    Read(#[from] ReadError),

    #[error("Mapping error: {0}")]
    Mapping(#[from] MappingError),

    #[error("Unit conversion failed for source '{sheet}' column '{column}': {source}")]
    UnitConversion {
        sheet: String,
        column: String,
        #[source]
        source: UnitConversionError,
    },

    #[error("Elemental reference error: {0}")]
    Reference(#[from] UnitConversionError),

    #[error("Index definition error: {0}")]
    Expression(#[from] ExpressionError),

    #[error("Formula emission failed: {0}")]
    Formula(#[from] FormulaError),

    #[error("Unified table is inconsistent: {0}")]
    Validation(String),

    #[error("Polars operation failed: {0}")]
    Polars(#[from] polars::error::PolarsError),

    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Workbook write failed: {0}")]
    Xlsx(#[from] rust_xlsxwriter::XlsxError),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Output error: {0}")]
    Output(String),
}

pub type Result<T> = std::result::Result<T, StitchError>;
