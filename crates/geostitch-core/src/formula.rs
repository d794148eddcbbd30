use geostitch_reader::column_letters;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::expression::EvalError;
use crate::indices::IndexDefinition;
use crate::mapping::MissingOperandPolicy;
use crate::unification::{RowView, UnifiedTable};

#[derive(Debug, Error)]
pub enum FormulaError {
    #[error("index '{index}' references '{column}', which is not a measurement column")]
    UnknownColumn { index: String, column: String },

    #[error("index '{index}' cannot be computed for source '{sheet}' line {line}: '{column}' is not measured")]
    MissingOperand {
        index: String,
        sheet: String,
        line: i64,
        column: String,
    },

    #[error("index '{index}' is declared more than once")]
    DuplicateIndex { index: String },

    #[error("index code '{index}' collides with a table column")]
    ColumnClash { index: String },
}

/// Header sits on line 1; table row `i` is written to line `i + 2`.
pub const HEADER_LINE: usize = 1;

/// Column positions of the `Unified` sheet: table columns first, then one
/// column per index.
#[derive(Debug, Clone, PartialEq)]
pub struct SheetLayout {
    columns: Vec<String>,
    indices: Vec<String>,
}

impl SheetLayout {
    pub fn new(table: &UnifiedTable, indices: &[IndexDefinition]) -> Self {
        Self {
            columns: table.column_names().into_iter().map(str::to_string).collect(),
            indices: indices.iter().map(|index| index.code.clone()).collect(),
        }
    }

    pub fn table_columns(&self) -> &[String] {
        &self.columns
    }

    pub fn index_columns(&self) -> &[String] {
        &self.indices
    }

    pub fn headers(&self) -> impl Iterator<Item = &str> {
        self.columns
            .iter()
            .chain(self.indices.iter())
            .map(String::as_str)
    }

    /// Zero-based column of a table column or index.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|column| column == name)
            .or_else(|| {
                self.indices
                    .iter()
                    .position(|code| code == name)
                    .map(|pos| self.columns.len() + pos)
            })
    }

    pub fn line_of(row_index: usize) -> usize {
        row_index + HEADER_LINE + 1
    }

    /// A1 reference of `name` on the line holding table row `row_index`.
    pub fn cell_ref(&self, name: &str, row_index: usize) -> Option<String> {
        self.column_index(name)
            .map(|column| format!("{}{}", column_letters(column), Self::line_of(row_index)))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmittedFormula {
    /// Formula text without the leading `=`.
    pub text: String,
    /// The index evaluated directly from the row's normalized values.
    pub expected: Result<f64, EvalError>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EmittedCell {
    Formula(EmittedFormula),
    Blank { missing: String },
}

impl EmittedCell {
    pub fn expected_value(&self) -> Option<f64> {
        match self {
            EmittedCell::Formula(formula) => formula.expected.as_ref().ok().copied(),
            EmittedCell::Blank { .. } => None,
        }
    }
}

/// An index cell left blank because an operand was not measured.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlankedCell {
    pub index: String,
    pub source_reference: String,
    pub source_row: i64,
    pub missing: String,
}

#[derive(Debug, Clone)]
pub struct FormulaSheet {
    pub layout: SheetLayout,
    /// Row-major: one entry per table row, one cell per index.
    pub cells: Vec<Vec<EmittedCell>>,
    pub blanked: Vec<BlankedCell>,
}

impl FormulaSheet {
    pub fn cell(&self, row: usize, index: usize) -> Option<&EmittedCell> {
        self.cells.get(row).and_then(|cells| cells.get(index))
    }

    /// Reference values of one index column, `None` where the cell is blank
    /// or the expression cannot be evaluated.
    pub fn index_values(&self, index: usize) -> Vec<Option<f64>> {
        self.cells
            .iter()
            .map(|cells| cells.get(index).and_then(EmittedCell::expected_value))
            .collect()
    }

    pub fn formula_count(&self) -> usize {
        self.cells
            .iter()
            .flatten()
            .filter(|cell| matches!(cell, EmittedCell::Formula(_)))
            .count()
    }
}

fn emit_cell(
    layout: &SheetLayout,
    row: &RowView,
    index: &IndexDefinition,
) -> Result<EmittedCell, FormulaError> {
    if let Some(missing) = index
        .operands()
        .into_iter()
        .find(|name| row.value(name).is_none())
    {
        return Ok(EmittedCell::Blank {
            missing: missing.to_string(),
        });
    }

    let text = index.expression.render(&mut |name: &str| {
        layout
            .cell_ref(name, row.index)
            .ok_or_else(|| FormulaError::UnknownColumn {
                index: index.code.clone(),
                column: name.to_string(),
            })
    })?;
    let expected = index.expression.evaluate(&|name: &str| row.value(name));

    Ok(EmittedCell::Formula(EmittedFormula { text, expected }))
}

/// Emits one formula per row and index, each referencing only its own row.
pub fn emit_formulas(
    table: &UnifiedTable,
    indices: &[IndexDefinition],
    policy: MissingOperandPolicy,
) -> crate::error::Result<FormulaSheet> {
    let layout = SheetLayout::new(table, indices);
    let rows = table.rows()?;

    let mut cells = Vec::with_capacity(rows.len());
    let mut blanked = Vec::new();

    for row in &rows {
        let mut row_cells = Vec::with_capacity(indices.len());
        for index in indices {
            let cell = emit_cell(&layout, row, index)?;
            if let EmittedCell::Blank { missing } = &cell {
                if policy == MissingOperandPolicy::Abort {
                    return Err(FormulaError::MissingOperand {
                        index: index.code.clone(),
                        sheet: row.source_reference.clone(),
                        line: row.source_row,
                        column: missing.clone(),
                    }
                    .into());
                }
                warn!(
                    index = %index.code,
                    sheet = %row.source_reference,
                    line = row.source_row,
                    missing = %missing,
                    "index left blank; operand not measured"
                );
                blanked.push(BlankedCell {
                    index: index.code.clone(),
                    source_reference: row.source_reference.clone(),
                    source_row: row.source_row,
                    missing: missing.clone(),
                });
            }
            row_cells.push(cell);
        }
        cells.push(row_cells);
    }

    let sheet = FormulaSheet {
        layout,
        cells,
        blanked,
    };
    info!(
        formulas = sheet.formula_count(),
        blanked = sheet.blanked.len(),
        "emitted index formulas"
    );
    Ok(sheet)
}
