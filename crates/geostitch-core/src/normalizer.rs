use std::collections::BTreeMap;

use geostitch_reader::{format_number, RawCell, RawRow, RawTable, ReadError};
use tracing::{debug, warn};

use crate::error::{Result, StitchError};
use crate::mapping::{ColumnTarget, MappingError, SourceMapping, Vocabulary};
use crate::reference::ElementalReference;
use crate::unification::SourceBlock;

/// One source row remapped onto the controlled vocabulary. Attributes the
/// source did not measure are absent from `values`.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRecord {
    pub source_reference: String,
    pub source_row: usize,
    pub labels: BTreeMap<String, String>,
    pub values: BTreeMap<String, f64>,
}

impl NormalizedRecord {
    pub fn value(&self, attribute: &str) -> Option<f64> {
        self.values.get(attribute).copied()
    }

    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels.get(name).map(String::as_str)
    }
}

#[derive(Debug, Clone)]
enum PlanKind {
    Label(String),
    Measurement { attribute: String, factor: f64 },
}

#[derive(Debug, Clone)]
struct ColumnPlan {
    index: usize,
    header: String,
    kind: PlanKind,
}

/// Column-by-column conversion plan for one source table, resolved once
/// against the table's headers before any row is touched.
#[derive(Debug, Clone)]
pub struct SourcePlan {
    sheet: String,
    columns: Vec<ColumnPlan>,
    not_measured: Vec<String>,
}

impl SourcePlan {
    pub fn resolve(
        mapping: &SourceMapping,
        table: &RawTable,
        vocabulary: &Vocabulary,
        reference: &ElementalReference,
    ) -> Result<Self> {
        let sheet = mapping.sheet.clone();
        let mut columns = Vec::new();

        for (index, header) in table.headers.iter().enumerate() {
            let rule = mapping
                .columns
                .get(header)
                .ok_or_else(|| MappingError::UnmappedColumn {
                    sheet: sheet.clone(),
                    column: header.clone(),
                })?;

            let kind = match rule.target(&sheet, header)? {
                ColumnTarget::Ignore => continue,
                ColumnTarget::Label(label) => PlanKind::Label(label),
                ColumnTarget::Measurement {
                    attribute,
                    raw_unit,
                    raw_species,
                    factor,
                } => {
                    let canonical = vocabulary.attribute(&attribute).ok_or_else(|| {
                        MappingError::UnknownAttribute {
                            sheet: sheet.clone(),
                            column: header.clone(),
                            target: attribute.clone(),
                        }
                    })?;
                    let unit_factor = raw_unit
                        .map(|unit| unit.factor_to(canonical.unit))
                        .unwrap_or(1.0);
                    let species_factor = match raw_species.as_deref() {
                        Some(species) => reference
                            .species_factor(species, &canonical.species)
                            .map_err(|source| StitchError::UnitConversion {
                                sheet: sheet.clone(),
                                column: header.clone(),
                                source,
                            })?,
                        None => 1.0,
                    };
                    let factor = unit_factor * species_factor * factor;
                    debug!(
                        sheet = %sheet,
                        column = %header,
                        attribute = %attribute,
                        factor,
                        "resolved measurement column"
                    );
                    PlanKind::Measurement { attribute, factor }
                }
            };

            columns.push(ColumnPlan {
                index,
                header: header.clone(),
                kind,
            });
        }

        for declared in mapping.columns.keys() {
            if table.column_index(declared).is_none() {
                warn!(
                    sheet = %sheet,
                    column = %declared,
                    "mapping entry matches no header in the source table"
                );
            }
        }

        Ok(Self {
            sheet,
            columns,
            not_measured: mapping.not_measured_tokens(),
        })
    }

    /// Label columns this source fills, in table order.
    pub fn labels(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter_map(|column| match &column.kind {
                PlanKind::Label(label) => Some(label.as_str()),
                PlanKind::Measurement { .. } => None,
            })
            .collect()
    }

    /// Measurement attributes this source fills, in table order.
    pub fn measurements(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter_map(|column| match &column.kind {
                PlanKind::Measurement { attribute, .. } => Some(attribute.as_str()),
                PlanKind::Label(_) => None,
            })
            .collect()
    }

    pub fn normalize_row(&self, row: &RawRow) -> Result<NormalizedRecord> {
        let mut labels = BTreeMap::new();
        let mut values = BTreeMap::new();

        for column in &self.columns {
            let cell = row.cell(column.index);
            match &column.kind {
                PlanKind::Label(label) => {
                    if let RawCell::Error(code) = cell {
                        return Err(self.invalid_cell(
                            row.line_index,
                            column,
                            format!("cell holds spreadsheet error {code}"),
                        ));
                    }
                    if let Some(text) = label_text(cell) {
                        labels.insert(label.clone(), text);
                    }
                }
                PlanKind::Measurement { attribute, factor } => {
                    if let Some(raw) = self.measured_value(row.line_index, column, cell)? {
                        let value = raw * factor;
                        if !value.is_finite() {
                            return Err(self.invalid_cell(
                                row.line_index,
                                column,
                                format!("converted value {value} is not finite"),
                            ));
                        }
                        values.insert(attribute.clone(), value);
                    }
                }
            }
        }

        Ok(NormalizedRecord {
            source_reference: self.sheet.clone(),
            source_row: row.line_index,
            labels,
            values,
        })
    }

    fn measured_value(
        &self,
        line_index: usize,
        column: &ColumnPlan,
        cell: &RawCell,
    ) -> Result<Option<f64>> {
        match cell {
            RawCell::Empty => Ok(None),
            RawCell::Number(value) if value.is_finite() => Ok(Some(*value)),
            RawCell::Number(value) => Err(self.invalid_cell(
                line_index,
                column,
                format!("number {value} is not finite"),
            )),
            RawCell::Text(text) => {
                let token = text.trim().to_lowercase();
                if self.not_measured.iter().any(|marker| *marker == token) {
                    return Ok(None);
                }
                match token.parse::<f64>() {
                    Ok(value) if value.is_finite() => Ok(Some(value)),
                    _ => Err(self.invalid_cell(
                        line_index,
                        column,
                        format!("'{}' is neither a number nor a not-measured marker", text.trim()),
                    )),
                }
            }
            RawCell::Bool(_) => Err(self.invalid_cell(
                line_index,
                column,
                "boolean in a measurement column".to_string(),
            )),
            RawCell::Error(code) => Err(self.invalid_cell(
                line_index,
                column,
                format!("cell holds spreadsheet error {code}"),
            )),
        }
    }

    fn invalid_cell(&self, line_index: usize, column: &ColumnPlan, message: String) -> StitchError {
        ReadError::InvalidCell {
            sheet: self.sheet.clone(),
            line_index,
            column: column.header.clone(),
            message,
        }
        .into()
    }
}

fn label_text(cell: &RawCell) -> Option<String> {
    match cell {
        RawCell::Empty => None,
        RawCell::Number(value) => Some(format_number(*value)),
        RawCell::Text(text) if text.trim().is_empty() => None,
        RawCell::Text(text) => Some(text.trim().to_string()),
        RawCell::Bool(_) | RawCell::Error(_) => Some(cell.to_string()),
    }
}

/// Normalizes every row of one source table, keeping the table's row order.
pub fn normalize_table(
    mapping: &SourceMapping,
    table: &RawTable,
    vocabulary: &Vocabulary,
    reference: &ElementalReference,
) -> Result<SourceBlock> {
    let plan = SourcePlan::resolve(mapping, table, vocabulary, reference)?;

    let records = table
        .rows
        .iter()
        .map(|row| plan.normalize_row(row))
        .collect::<Result<Vec<_>>>()?;

    debug!(
        sheet = %mapping.sheet,
        rows = records.len(),
        measurements = plan.measurements().len(),
        "normalized source"
    );

    Ok(SourceBlock {
        sheet: mapping.sheet.clone(),
        reference: mapping.reference_label().to_string(),
        labels: plan.labels().into_iter().map(str::to_string).collect(),
        measurements: plan.measurements().into_iter().map(str::to_string).collect(),
        records,
    })
}
