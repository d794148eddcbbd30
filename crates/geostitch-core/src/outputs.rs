use std::fs::{self, File};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use polars::io::parquet::write::ParquetWriter;
use polars::prelude::{Column, CsvWriter, DataFrame, NamedFrom, SerWriter, Series};
use rust_xlsxwriter::{Format, Formula, Workbook, Worksheet};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cell_eval::SpreadsheetError;
use crate::formula::{EmittedCell, FormulaSheet, SheetLayout, HEADER_LINE};
use crate::indices::IndexDefinition;
use crate::mapping::OutputSettings;
use crate::unification::{RowView, UnifiedTable, SOURCE_REFERENCE, SOURCE_ROW};

pub const UNIFIED_SHEET: &str = "Unified";
pub const SOURCES_SHEET: &str = "Sources";
pub const INDICES_SHEET: &str = "Indices";
pub const README_SHEET: &str = "README";

const README_LIVE: &[&str] = &[
    "This workbook was generated by geostitch.",
    "Index columns on the Unified sheet hold live formulas that reference each row's own cells.",
    "The formulas have not been evaluated yet. Open this workbook in spreadsheet software and save it",
    "before reading index values with tools that do not evaluate formulas (pandas, openpyxl, calamine).",
    "Measurement cells showing the not-measured marker were not reported by the source; they are not zero.",
];

const README_CACHED: &[&str] = &[
    "This workbook was generated by geostitch.",
    "Index columns on the Unified sheet hold live formulas that reference each row's own cells.",
    "Each formula also stores the value geostitch computed for it, so table readers can use the",
    "workbook directly. Spreadsheet software recalculates the formulas when the workbook is opened.",
    "Measurement cells showing the not-measured marker were not reported by the source; they are not zero.",
];

/// An output written next to its final path and moved into place on commit.
/// Dropping it uncommitted removes the partial file.
#[derive(Debug)]
pub struct StagedFile {
    partial: PathBuf,
    target: PathBuf,
    committed: bool,
}

impl StagedFile {
    pub fn new(target: &Path) -> Self {
        let mut name = target
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_default();
        name.push(".partial");
        Self {
            partial: target.with_file_name(name),
            target: target.to_path_buf(),
            committed: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.partial
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn commit(mut self) -> Result<PathBuf> {
        fs::rename(&self.partial, &self.target).with_context(|| {
            format!(
                "failed to move {} into place at {}",
                self.partial.display(),
                self.target.display()
            )
        })?;
        self.committed = true;
        debug!(path = %self.target.display(), "committed output");
        Ok(self.target.clone())
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if !self.committed && self.partial.exists() {
            let _ = fs::remove_file(&self.partial);
        }
    }
}

/// All outputs of one run; nothing reaches its final path until every file
/// has been staged successfully. A failed commit removes the outputs it had
/// already moved into place.
#[derive(Debug, Default)]
pub struct Staging {
    files: Vec<StagedFile>,
}

impl Staging {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(&mut self, target: &Path) -> Result<&Path> {
        if let Some(parent) = target.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {}", parent.display()))?;
        }
        self.files.push(StagedFile::new(target));
        self.files
            .last()
            .map(StagedFile::path)
            .ok_or_else(|| anyhow!("staging list is empty"))
    }

    pub fn commit(self) -> Result<Vec<PathBuf>> {
        let mut committed = Vec::with_capacity(self.files.len());
        for file in self.files {
            match file.commit() {
                Ok(path) => committed.push(path),
                Err(err) => {
                    for path in &committed {
                        if let Err(remove) = fs::remove_file(path) {
                            warn!(path = %path.display(), error = %remove, "failed to roll back output");
                        }
                    }
                    return Err(err);
                }
            }
        }
        Ok(committed)
    }
}

fn position(line_index: usize, column: usize) -> Result<(u32, u16)> {
    let row = u32::try_from(line_index - 1).context("row is beyond the worksheet limit")?;
    let col = u16::try_from(column).context("column is beyond the worksheet limit")?;
    Ok((row, col))
}

fn write_header(sheet: &mut Worksheet, headers: &[&str], bold: &Format) -> Result<()> {
    for (column, header) in headers.iter().enumerate() {
        let (row, col) = position(HEADER_LINE, column)?;
        sheet.write_string_with_format(row, col, *header, bold)?;
    }
    sheet.set_freeze_panes(1, 0)?;
    Ok(())
}

fn write_unified(
    sheet: &mut Worksheet,
    rows: &[RowView],
    formulas: &FormulaSheet,
    settings: &OutputSettings,
    bold: &Format,
) -> Result<()> {
    sheet.set_name(UNIFIED_SHEET)?;
    // uncached formulas read back as blank, not 0
    sheet.set_formula_result_default("");
    let layout = &formulas.layout;
    let headers: Vec<&str> = layout.headers().collect();
    write_header(sheet, &headers, bold)?;

    for row in rows {
        let line = SheetLayout::line_of(row.index);
        for (column, name) in layout.table_columns().iter().enumerate() {
            let (r, c) = position(line, column)?;
            match name.as_str() {
                SOURCE_REFERENCE => {
                    sheet.write_string(r, c, &row.source_reference)?;
                }
                SOURCE_ROW => {
                    sheet.write_number(r, c, row.source_row as f64)?;
                }
                _ if row.labels.contains_key(name) => {
                    if let Some(label) = row.label(name) {
                        sheet.write_string(r, c, label)?;
                    }
                }
                _ => match row.value(name) {
                    Some(value) => {
                        sheet.write_number(r, c, value)?;
                    }
                    None => {
                        sheet.write_string(r, c, &settings.not_measured_marker)?;
                    }
                },
            }
        }

        let offset = layout.table_columns().len();
        for (index, _) in layout.index_columns().iter().enumerate() {
            let Some(EmittedCell::Formula(emitted)) = formulas.cell(row.index, index) else {
                continue;
            };
            let (r, c) = position(line, offset + index)?;
            let mut formula = Formula::new(format!("={}", emitted.text));
            if settings.cache_formula_results {
                let result = match &emitted.expected {
                    Ok(value) => value.to_string(),
                    Err(err) => SpreadsheetError::from(err.clone()).to_string(),
                };
                formula = formula.set_result(result);
            }
            sheet.write_formula(r, c, formula)?;
        }
    }
    Ok(())
}

fn write_sources(sheet: &mut Worksheet, table: &UnifiedTable, bold: &Format) -> Result<()> {
    sheet.set_name(SOURCES_SHEET)?;
    write_header(sheet, &["sheet", "reference", "priority", "rows"], bold)?;
    for (offset, source) in table.source_counts().iter().enumerate() {
        let row = u32::try_from(offset + 1)?;
        sheet.write_string(row, 0, &source.sheet)?;
        sheet.write_string(row, 1, &source.reference)?;
        sheet.write_number(row, 2, source.priority as f64)?;
        sheet.write_number(row, 3, source.rows as f64)?;
    }
    Ok(())
}

fn write_indices(sheet: &mut Worksheet, indices: &[IndexDefinition], bold: &Format) -> Result<()> {
    sheet.set_name(INDICES_SHEET)?;
    write_header(sheet, &["code", "description", "expression", "origin"], bold)?;
    for (offset, index) in indices.iter().enumerate() {
        let row = u32::try_from(offset + 1)?;
        let origin = serde_json::to_value(index.origin)?;
        sheet.write_string(row, 0, &index.code)?;
        sheet.write_string(row, 1, &index.description)?;
        sheet.write_string(row, 2, index.expression.to_string())?;
        sheet.write_string(row, 3, origin.as_str().unwrap_or_default())?;
    }
    Ok(())
}

fn write_readme(sheet: &mut Worksheet, cached: bool) -> Result<()> {
    sheet.set_name(README_SHEET)?;
    let lines = if cached { README_CACHED } else { README_LIVE };
    for (offset, line) in lines.iter().enumerate() {
        sheet.write_string(u32::try_from(offset)?, 0, *line)?;
    }
    sheet.set_column_width(0, 100)?;
    Ok(())
}

/// Writes the stitched workbook: the unified table with index formulas,
/// followed by the source list, the index definitions and a README.
pub fn write_workbook(
    path: &Path,
    table: &UnifiedTable,
    formulas: &FormulaSheet,
    indices: &[IndexDefinition],
    settings: &OutputSettings,
) -> Result<()> {
    let rows = table.rows().context("failed to read unified rows")?;
    let bold = Format::new().set_bold();

    let mut workbook = Workbook::new();
    write_unified(workbook.add_worksheet(), &rows, formulas, settings, &bold)
        .context("failed to write Unified sheet")?;
    write_sources(workbook.add_worksheet(), table, &bold)
        .context("failed to write Sources sheet")?;
    write_indices(workbook.add_worksheet(), indices, &bold)
        .context("failed to write Indices sheet")?;
    write_readme(workbook.add_worksheet(), settings.cache_formula_results)
        .context("failed to write README sheet")?;

    workbook
        .save(path)
        .with_context(|| format!("failed to save workbook {}", path.display()))?;

    info!(
        path = %path.display(),
        rows = rows.len(),
        formulas = formulas.formula_count(),
        "wrote stitched workbook"
    );
    Ok(())
}

/// The unified table plus one reference-evaluated column per index.
pub fn values_frame(
    table: &UnifiedTable,
    formulas: &FormulaSheet,
    indices: &[IndexDefinition],
) -> Result<DataFrame> {
    let mut columns: Vec<Column> = table.dataframe().get_columns().to_vec();
    for (position, index) in indices.iter().enumerate() {
        let values = formulas.index_values(position);
        columns.push(Series::new(index.code.as_str().into(), values).into());
    }
    DataFrame::new(columns).context("failed to assemble values frame")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValuesFormat {
    Csv,
    Parquet,
}

impl ValuesFormat {
    pub fn from_path(path: &Path) -> Result<Self> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);
        match extension.as_deref() {
            Some("csv") => Ok(ValuesFormat::Csv),
            Some("parquet") => Ok(ValuesFormat::Parquet),
            _ => bail!(
                "values export {} must end in .csv or .parquet",
                path.display()
            ),
        }
    }
}

pub fn write_values(path: &Path, format: ValuesFormat, frame: &DataFrame) -> Result<()> {
    let mut frame = frame.clone();
    let file = File::create(path)
        .with_context(|| format!("failed to create values export {}", path.display()))?;
    match format {
        ValuesFormat::Csv => {
            CsvWriter::new(file)
                .include_header(true)
                .finish(&mut frame)
                .context("failed to write values csv")?;
        }
        ValuesFormat::Parquet => {
            ParquetWriter::new(file)
                .finish(&mut frame)
                .context("failed to write values parquet")?;
        }
    }
    info!(path = %path.display(), rows = frame.height(), "wrote values export");
    Ok(())
}

pub fn write_report<T: Serialize>(path: &Path, report: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(report).context("failed to serialize run report")?;
    fs::write(path, bytes).with_context(|| format!("failed to write report {}", path.display()))?;
    Ok(())
}
