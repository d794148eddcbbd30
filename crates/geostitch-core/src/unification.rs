use std::collections::BTreeMap;

use polars::prelude::{Column, DataFrame, DataType, NamedFrom, Series};
use serde::Serialize;
use tracing::info;

use crate::error::{Result, StitchError};
use crate::mapping::Vocabulary;
use crate::normalizer::NormalizedRecord;

pub const SOURCE_REFERENCE: &str = "source_reference";
pub const SOURCE_ROW: &str = "source_row";
pub const PROVENANCE_COLUMNS: [&str; 2] = [SOURCE_REFERENCE, SOURCE_ROW];

/// Normalized rows of one source, in the source's own order.
#[derive(Debug, Clone)]
pub struct SourceBlock {
    pub sheet: String,
    pub reference: String,
    pub labels: Vec<String>,
    pub measurements: Vec<String>,
    pub records: Vec<NormalizedRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceSummary {
    pub sheet: String,
    pub reference: String,
    /// 1-based position in the stitching order.
    pub priority: usize,
    pub rows: usize,
}

/// One row of the unified table, detached from the frame.
#[derive(Debug, Clone, PartialEq)]
pub struct RowView {
    pub index: usize,
    pub source_reference: String,
    pub source_row: i64,
    pub labels: BTreeMap<String, Option<String>>,
    pub values: BTreeMap<String, Option<f64>>,
}

impl RowView {
    /// `None` when the attribute is not measured for this row or not a
    /// column of the table.
    pub fn value(&self, attribute: &str) -> Option<f64> {
        self.values.get(attribute).copied().flatten()
    }

    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels.get(name).and_then(|value| value.as_deref())
    }
}

#[derive(Debug, Clone)]
pub struct UnifiedTable {
    df: DataFrame,
    labels: Vec<String>,
    measurements: Vec<String>,
    sources: Vec<SourceSummary>,
}

impl UnifiedTable {
    pub fn dataframe(&self) -> &DataFrame {
        &self.df
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn measurements(&self) -> &[String] {
        &self.measurements
    }

    pub fn source_counts(&self) -> &[SourceSummary] {
        &self.sources
    }

    pub fn height(&self) -> usize {
        self.df.height()
    }

    /// Column names in output order: provenance, labels, measurements.
    pub fn column_names(&self) -> Vec<&str> {
        PROVENANCE_COLUMNS
            .iter()
            .copied()
            .chain(self.labels.iter().map(String::as_str))
            .chain(self.measurements.iter().map(String::as_str))
            .collect()
    }

    pub fn rows(&self) -> Result<Vec<RowView>> {
        let references = self.df.column(SOURCE_REFERENCE)?.str()?;
        let lines = self.df.column(SOURCE_ROW)?.i64()?;

        let mut label_columns = Vec::with_capacity(self.labels.len());
        for name in &self.labels {
            let values: Vec<Option<String>> = self
                .df
                .column(name)?
                .str()?
                .into_iter()
                .map(|value| value.map(str::to_string))
                .collect();
            label_columns.push((name, values));
        }

        let mut measurement_columns = Vec::with_capacity(self.measurements.len());
        for name in &self.measurements {
            let values: Vec<Option<f64>> = self.df.column(name)?.f64()?.into_iter().collect();
            measurement_columns.push((name, values));
        }

        let mut rows = Vec::with_capacity(self.height());
        for index in 0..self.height() {
            let source_reference = references
                .get(index)
                .ok_or_else(|| {
                    StitchError::Validation(format!("row {index} has no source reference"))
                })?
                .to_string();
            let source_row = lines.get(index).unwrap_or_default();

            let labels = label_columns
                .iter()
                .map(|(name, values)| ((*name).clone(), values[index].clone()))
                .collect();
            let values = measurement_columns
                .iter()
                .map(|(name, values)| ((*name).clone(), values[index]))
                .collect();

            rows.push(RowView {
                index,
                source_reference,
                source_row,
                labels,
                values,
            });
        }
        Ok(rows)
    }

    pub fn row(&self, index: usize) -> Result<RowView> {
        self.rows()?
            .into_iter()
            .nth(index)
            .ok_or_else(|| StitchError::Validation(format!("row {index} is out of range")))
    }

    /// Re-checks the table invariants: provenance on every row, vocabulary-only
    /// columns, text labels and float measurements.
    pub fn validate(&self, vocabulary: &Vocabulary) -> Result<()> {
        let references = self.df.column(SOURCE_REFERENCE)?;
        if references.null_count() > 0 {
            return Err(StitchError::Validation(format!(
                "{} rows lack a source reference",
                references.null_count()
            )));
        }

        for column in self.df.get_columns() {
            let name = column.name().as_str();
            if PROVENANCE_COLUMNS.contains(&name) {
                continue;
            }
            let expected = if vocabulary.has_label(name) {
                DataType::String
            } else if vocabulary.has_measurement(name) {
                DataType::Float64
            } else {
                return Err(StitchError::Validation(format!(
                    "column '{name}' is not in the controlled vocabulary"
                )));
            };
            if column.dtype() != &expected {
                return Err(StitchError::Validation(format!(
                    "column '{name}' has type {}, expected {expected}",
                    column.dtype()
                )));
            }
        }
        Ok(())
    }
}

/// Concatenates normalized sources into one table. Blocks are taken in the
/// order given; attributes a source does not fill stay null for its rows.
pub fn unify(blocks: Vec<SourceBlock>, vocabulary: &Vocabulary) -> Result<UnifiedTable> {
    let labels: Vec<String> = vocabulary
        .labels
        .iter()
        .filter(|name| blocks.iter().any(|block| block.labels.contains(*name)))
        .cloned()
        .collect();
    let measurements: Vec<String> = vocabulary
        .measurements
        .iter()
        .filter(|name| blocks.iter().any(|block| block.measurements.contains(*name)))
        .cloned()
        .collect();

    let height: usize = blocks.iter().map(|block| block.records.len()).sum();
    let mut references: Vec<&str> = Vec::with_capacity(height);
    let mut lines: Vec<i64> = Vec::with_capacity(height);
    let mut label_values: Vec<Vec<Option<String>>> = vec![Vec::with_capacity(height); labels.len()];
    let mut measurement_values: Vec<Vec<Option<f64>>> =
        vec![Vec::with_capacity(height); measurements.len()];
    let mut sources = Vec::with_capacity(blocks.len());

    for (position, block) in blocks.iter().enumerate() {
        for record in &block.records {
            references.push(block.sheet.as_str());
            lines.push(record.source_row as i64);
            for (name, values) in labels.iter().zip(label_values.iter_mut()) {
                values.push(record.label(name).map(str::to_string));
            }
            for (name, values) in measurements.iter().zip(measurement_values.iter_mut()) {
                values.push(record.value(name));
            }
        }
        sources.push(SourceSummary {
            sheet: block.sheet.clone(),
            reference: block.reference.clone(),
            priority: position + 1,
            rows: block.records.len(),
        });
    }

    let mut columns: Vec<Column> = Vec::with_capacity(2 + labels.len() + measurements.len());
    columns.push(Series::new(SOURCE_REFERENCE.into(), references).into());
    columns.push(Series::new(SOURCE_ROW.into(), lines).into());
    for (name, values) in labels.iter().zip(label_values) {
        columns.push(Series::new(name.as_str().into(), values).into());
    }
    for (name, values) in measurements.iter().zip(measurement_values) {
        columns.push(Series::new(name.as_str().into(), values).into());
    }

    let df = DataFrame::new(columns)?;
    info!(
        rows = df.height(),
        sources = sources.len(),
        labels = labels.len(),
        measurements = measurements.len(),
        "unified source tables"
    );

    let table = UnifiedTable {
        df,
        labels,
        measurements,
        sources,
    };
    table.validate(vocabulary)?;
    Ok(table)
}
