use std::collections::HashMap;
use std::path::Path;

use geostitch_reader::{
    column_letters, formats::SpreadsheetReader, read_workbook, FormulaCell, RawCell, RawSheet,
    WorkbookReader,
};
use serde::Serialize;
use tracing::{info, warn};

use crate::cell_eval::{evaluate_formula, CellAddress, CellGrid, SpreadsheetError};
use crate::error::{Result, StitchError};
use crate::expression::Expr;
use crate::formula::HEADER_LINE;
use crate::outputs::{INDICES_SHEET, UNIFIED_SHEET};

pub const DEFAULT_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, Copy)]
pub struct VerifyOptions {
    /// Relative tolerance for every comparison.
    pub tolerance: f64,
    /// Also compare each formula with the result stored in its cell. Only
    /// meaningful for workbooks written with cached results or re-saved by
    /// spreadsheet software.
    pub compare_cached: bool,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
            compare_cached: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Mismatch {
    pub cell: String,
    pub index: String,
    pub formula: Option<String>,
    pub detail: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct VerificationReport {
    pub checked: usize,
    pub blank: usize,
    pub mismatches: Vec<Mismatch>,
}

impl VerificationReport {
    pub fn is_clean(&self) -> bool {
        self.mismatches.is_empty()
    }
}

fn close(a: f64, b: f64, tolerance: f64) -> bool {
    a == b || (a - b).abs() <= tolerance * a.abs().max(b.abs())
}

fn header_positions(sheet: &RawSheet) -> Result<HashMap<String, usize>> {
    let header = sheet
        .rows
        .iter()
        .find(|row| row.line_index == HEADER_LINE)
        .ok_or_else(|| StitchError::Validation(format!("sheet '{}' has no header row", sheet.name)))?;
    Ok(header
        .cells
        .iter()
        .enumerate()
        .filter(|(_, cell)| !cell.is_empty())
        .map(|(column, cell)| (cell.to_string(), column))
        .collect())
}

struct IndexColumn {
    code: String,
    column: usize,
    expression: Expr,
}

/// Re-evaluates every index cell of a stitched workbook. Each formula is
/// evaluated from the sheet's cells and compared with the index expression
/// evaluated from the same row's measurement columns.
pub fn verify_workbook(path: &Path, options: VerifyOptions) -> Result<VerificationReport> {
    let workbook = read_workbook(path)?;
    if workbook.reader != SpreadsheetReader.name() {
        return Err(StitchError::Validation(format!(
            "{} is not a spreadsheet workbook",
            path.display()
        )));
    }

    let formulas = SpreadsheetReader::formulas(path, UNIFIED_SHEET)?;
    verify_sheets(
        workbook.sheet(UNIFIED_SHEET)?,
        workbook.sheet(INDICES_SHEET)?,
        &formulas,
        options,
    )
}

/// Compares a stored result with the value the formula evaluates to.
fn cached_mismatch(
    actual: &std::result::Result<f64, SpreadsheetError>,
    cached: Option<&RawCell>,
    tolerance: f64,
) -> Option<String> {
    match (actual, cached) {
        (Ok(actual), Some(RawCell::Number(cached))) if !close(*actual, *cached, tolerance) => {
            Some(format!("stored result {cached} differs from {actual}"))
        }
        (Ok(actual), Some(RawCell::Error(code))) => {
            Some(format!("stored error {code} but formula gives {actual}"))
        }
        (Err(err), Some(RawCell::Number(cached))) => {
            Some(format!("stored result {cached} but formula gives {err}"))
        }
        (Err(err), Some(RawCell::Error(code))) if SpreadsheetError::from_code(code) != *err => {
            Some(format!("stored error {code} differs from {err}"))
        }
        _ => None,
    }
}

/// Verification over sheets already read into memory: the `Unified` grid, the
/// `Indices` definitions and the formula text found on the `Unified` sheet.
pub fn verify_sheets(
    unified: &RawSheet,
    definitions: &RawSheet,
    formulas: &[FormulaCell],
    options: VerifyOptions,
) -> Result<VerificationReport> {
    let positions = header_positions(unified)?;

    let definitions = definitions.tabulate(HEADER_LINE)?;
    let code_col = definitions.column_index("code");
    let expression_col = definitions.column_index("expression");
    let (Some(code_col), Some(expression_col)) = (code_col, expression_col) else {
        return Err(StitchError::Validation(
            "Indices sheet lacks code/expression columns".to_string(),
        ));
    };

    let mut indices = Vec::with_capacity(definitions.len());
    for row in &definitions.rows {
        let code = row.cell(code_col).to_string();
        let column = *positions.get(&code).ok_or_else(|| {
            StitchError::Validation(format!("index '{code}' has no column on the Unified sheet"))
        })?;
        let expression = Expr::parse(&row.cell(expression_col).to_string())?;
        indices.push(IndexColumn {
            code,
            column,
            expression,
        });
    }

    let grid = CellGrid::from_sheet(unified);
    let formulas: HashMap<(usize, usize), &str> = formulas
        .iter()
        .map(|cell| ((cell.line_index, cell.column), cell.text.as_str()))
        .collect();

    let last_line = unified
        .rows
        .iter()
        .map(|row| row.line_index)
        .max()
        .unwrap_or(HEADER_LINE);

    let mut report = VerificationReport::default();
    for line in (HEADER_LINE + 1)..=last_line {
        for index in &indices {
            let cell = format!("{}{}", column_letters(index.column), line);
            let mismatch = |formula: Option<&str>, detail: String| Mismatch {
                cell: cell.clone(),
                index: index.code.clone(),
                formula: formula.map(str::to_string),
                detail,
            };

            let expected = index.expression.evaluate(&|name: &str| {
                let column = *positions.get(name)?;
                match grid.get(CellAddress { line, column }) {
                    Some(RawCell::Number(value)) => Some(*value),
                    _ => None,
                }
            });

            let Some(&text) = formulas.get(&(line, index.column)) else {
                report.blank += 1;
                if let Ok(value) = expected {
                    report.mismatches.push(mismatch(
                        None,
                        format!("cell is blank but every operand is measured (expected {value})"),
                    ));
                }
                continue;
            };
            report.checked += 1;

            let foreign = Expr::parse_formula(text)
                .map(|expr| {
                    expr.references()
                        .into_iter()
                        .filter_map(CellAddress::parse)
                        .any(|address| address.line != line)
                })
                .unwrap_or(false);
            if foreign {
                report.mismatches.push(mismatch(
                    Some(text),
                    "formula references another row".to_string(),
                ));
                continue;
            }

            let actual = evaluate_formula(text, &grid);
            match (&actual, &expected) {
                (Ok(actual), Ok(expected)) if close(*actual, *expected, options.tolerance) => {}
                (Err(_), Err(_)) => {}
                _ => {
                    report.mismatches.push(mismatch(
                        Some(text),
                        format!("formula gives {actual:?}, expression gives {expected:?}"),
                    ));
                    continue;
                }
            }

            if options.compare_cached {
                let cached = grid.get(CellAddress {
                    line,
                    column: index.column,
                });
                if let Some(detail) = cached_mismatch(&actual, cached, options.tolerance) {
                    report.mismatches.push(mismatch(Some(text), detail));
                }
            }
        }
    }

    if report.is_clean() {
        info!(checked = report.checked, blank = report.blank, "workbook verified");
    } else {
        warn!(
            checked = report.checked,
            mismatches = report.mismatches.len(),
            "workbook has formula mismatches"
        );
    }
    Ok(report)
}
