//! Evaluates emitted formula text against cell values the way spreadsheet
//! software does. Only used to cross-check formulas, never to produce output.
//!
//! Covers the arithmetic, the functions of the expression language and A1
//! references on one sheet. Ranges, other sheets and text functions are not
//! understood and evaluate to `#NAME?` or fail to parse.

use std::collections::HashMap;

use geostitch_reader::{RawCell, RawSheet};
use thiserror::Error;

use crate::expression::{apply_binary, EvalError, Expr, Function};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SpreadsheetError {
    #[error("#VALUE!")]
    Value,
    #[error("#DIV/0!")]
    DivZero,
    #[error("#NUM!")]
    Num,
    #[error("#NAME?")]
    Name,
    /// Any other error value read from a cell, such as `#N/A` or `#REF!`.
    #[error("{0}")]
    Other(String),
    #[error("formula does not parse: {0}")]
    Parse(String),
}

impl From<EvalError> for SpreadsheetError {
    fn from(err: EvalError) -> Self {
        match err {
            EvalError::DivisionByZero => SpreadsheetError::DivZero,
            EvalError::Domain { .. } | EvalError::NonFinite => SpreadsheetError::Num,
            EvalError::MissingValue { .. } => SpreadsheetError::Name,
        }
    }
}

impl SpreadsheetError {
    /// The error a cell holding `code` propagates into formulas referencing it.
    pub fn from_code(code: &str) -> Self {
        match code.trim() {
            "#VALUE!" => SpreadsheetError::Value,
            "#DIV/0!" => SpreadsheetError::DivZero,
            "#NUM!" => SpreadsheetError::Num,
            "#NAME?" => SpreadsheetError::Name,
            other => SpreadsheetError::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellAddress {
    /// 1-based line.
    pub line: usize,
    /// Zero-based column.
    pub column: usize,
}

impl CellAddress {
    /// Parses `B3` or `$B$3`.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let body: String = text.chars().filter(|ch| *ch != '$').collect();
        let split = body.find(|ch: char| ch.is_ascii_digit())?;
        let (letters, digits) = body.split_at(split);
        if letters.is_empty() || !letters.chars().all(|ch| ch.is_ascii_alphabetic()) {
            return None;
        }
        if !digits.chars().all(|ch| ch.is_ascii_digit()) {
            return None;
        }

        let mut column = 0usize;
        for ch in letters.chars() {
            column = column * 26 + (ch.to_ascii_uppercase() as usize - 'A' as usize + 1);
        }
        let line: usize = digits.parse().ok()?;
        if line == 0 {
            return None;
        }
        Some(Self {
            line,
            column: column - 1,
        })
    }
}

/// Sparse cell values of one sheet.
#[derive(Debug, Clone, Default)]
pub struct CellGrid {
    cells: HashMap<CellAddress, RawCell>,
}

impl CellGrid {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_sheet(sheet: &RawSheet) -> Self {
        let mut grid = Self::new();
        for row in &sheet.rows {
            for (column, cell) in row.cells.iter().enumerate() {
                grid.set(row.line_index, column, cell.clone());
            }
        }
        grid
    }

    pub fn set(&mut self, line: usize, column: usize, cell: RawCell) {
        if cell.is_empty() {
            self.cells.remove(&CellAddress { line, column });
        } else {
            self.cells.insert(CellAddress { line, column }, cell);
        }
    }

    pub fn get(&self, address: CellAddress) -> Option<&RawCell> {
        self.cells.get(&address)
    }

    fn resolve(&self, name: &str) -> Result<Option<&RawCell>, SpreadsheetError> {
        let address = CellAddress::parse(name).ok_or(SpreadsheetError::Name)?;
        Ok(self.get(address))
    }
}

/// Value of a referenced cell in arithmetic: blank is 0, booleans are 0/1,
/// numeric text is coerced, any other text is `#VALUE!`, error cells propagate.
fn arithmetic_value(cell: Option<&RawCell>) -> Result<f64, SpreadsheetError> {
    match cell {
        None | Some(RawCell::Empty) => Ok(0.0),
        Some(RawCell::Number(value)) => Ok(*value),
        Some(RawCell::Bool(value)) => Ok(if *value { 1.0 } else { 0.0 }),
        Some(RawCell::Text(text)) => text
            .trim()
            .parse::<f64>()
            .map_err(|_| SpreadsheetError::Value),
        Some(RawCell::Error(code)) => Err(SpreadsheetError::from_code(code)),
    }
}

fn evaluate(expr: &Expr, grid: &CellGrid) -> Result<f64, SpreadsheetError> {
    match expr {
        Expr::Number(value) => Ok(*value),
        Expr::Reference(name) => arithmetic_value(grid.resolve(name)?),
        Expr::Neg(inner) => Ok(-evaluate(inner, grid)?),
        Expr::Binary { op, lhs, rhs } => {
            let lhs = evaluate(lhs, grid)?;
            let rhs = evaluate(rhs, grid)?;
            Ok(apply_binary(*op, lhs, rhs)?)
        }
        Expr::Call { function, args } => {
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                // MIN and MAX skip referenced cells that hold no number
                if matches!(function, Function::Min | Function::Max) {
                    if let Expr::Reference(name) = arg {
                        match grid.resolve(name)? {
                            Some(RawCell::Number(value)) => values.push(*value),
                            Some(RawCell::Error(code)) => {
                                return Err(SpreadsheetError::from_code(code))
                            }
                            _ => {}
                        }
                        continue;
                    }
                }
                values.push(evaluate(arg, grid)?);
            }
            if values.is_empty() {
                return Ok(0.0);
            }
            Ok(function.apply(&values)?)
        }
    }
}

/// Evaluates formula text (with or without the leading `=`).
pub fn evaluate_formula(text: &str, grid: &CellGrid) -> Result<f64, SpreadsheetError> {
    let body = text.trim().trim_start_matches('=');
    let expr = Expr::parse_formula(body).map_err(|err| SpreadsheetError::Parse(err.to_string()))?;
    evaluate(&expr, grid)
}
