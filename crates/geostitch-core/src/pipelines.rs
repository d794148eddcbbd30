use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Utc;
use geostitch_reader::{read_workbook, SourceWorkbook};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::Result;
use crate::formula::{emit_formulas, BlankedCell, FormulaSheet};
use crate::indices::{compile_indices, IndexDefinition};
use crate::mapping::MappingConfig;
use crate::normalizer::normalize_table;
use crate::outputs::{self, Staging, ValuesFormat};
use crate::reference::ElementalReference;
use crate::unification::{unify, SourceSummary, UnifiedTable};

/// Everything a stitch needs besides the workbook itself.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub config: MappingConfig,
    pub reference: ElementalReference,
    pub indices: Vec<IndexDefinition>,
}

impl ExecutionContext {
    pub fn new(config: MappingConfig, reference: ElementalReference) -> Result<Self> {
        let indices = compile_indices(&config, &reference)?;
        Ok(Self {
            config,
            reference,
            indices,
        })
    }

    pub fn from_paths(mapping: &Path, reference: Option<&Path>) -> Result<Self> {
        let config = MappingConfig::from_path(mapping)?;
        Self::new(config, load_reference(reference)?)
    }
}

pub fn load_reference(path: Option<&Path>) -> Result<ElementalReference> {
    let reference = ElementalReference::standard();
    match path {
        Some(path) => Ok(reference.with_overrides_from_csv(path)?),
        None => Ok(reference),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StitchSummary {
    pub rows: usize,
    pub sources: Vec<SourceSummary>,
    pub labels: Vec<String>,
    pub measurements: Vec<String>,
    pub indices: Vec<String>,
    pub formulas: usize,
    pub blanked: Vec<BlankedCell>,
}

#[derive(Debug, Clone)]
pub struct StitchOutcome {
    pub table: UnifiedTable,
    pub formulas: FormulaSheet,
    pub summary: StitchSummary,
}

/// Read → normalize → unify → emit, entirely in memory.
pub fn stitch(workbook: &SourceWorkbook, context: &ExecutionContext) -> Result<StitchOutcome> {
    let config = &context.config;
    config.check_sheet_coverage(workbook.sheet_names())?;

    let mut blocks = Vec::new();
    for source in config.ordered_sources() {
        let sheet = workbook.sheet(&source.sheet)?;
        let table = sheet.tabulate(source.header_row)?;
        debug!(sheet = %source.sheet, rows = table.len(), "tabulated source sheet");
        blocks.push(normalize_table(
            source,
            &table,
            &config.vocabulary,
            &context.reference,
        )?);
    }

    let table = unify(blocks, &config.vocabulary)?;
    let formulas = emit_formulas(&table, &context.indices, config.output.on_missing_operand)?;

    let summary = StitchSummary {
        rows: table.height(),
        sources: table.source_counts().to_vec(),
        labels: table.labels().to_vec(),
        measurements: table.measurements().to_vec(),
        indices: context.indices.iter().map(|index| index.code.clone()).collect(),
        formulas: formulas.formula_count(),
        blanked: formulas.blanked.clone(),
    };

    Ok(StitchOutcome {
        table,
        formulas,
        summary,
    })
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub input: PathBuf,
    pub mapping: PathBuf,
    pub reference: Option<PathBuf>,
    pub output: PathBuf,
    pub values: Option<PathBuf>,
    pub report: Option<PathBuf>,
    pub cache_results: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub generated_at: String,
    pub input: PathBuf,
    pub input_reader: String,
    pub input_hash: String,
    pub mapping: PathBuf,
    pub mapping_hash: String,
    pub reference: Option<PathBuf>,
    pub output: PathBuf,
    pub values: Option<PathBuf>,
    pub summary: StitchSummary,
}

/// Full stitching run from files to files. Outputs are staged and only
/// moved into place once every one of them has been written.
pub fn run(options: &RunOptions) -> anyhow::Result<RunReport> {
    let mapping_text = fs::read_to_string(&options.mapping)
        .with_context(|| format!("failed to read mapping {}", options.mapping.display()))?;
    let mapping_hash = blake3::hash(mapping_text.as_bytes()).to_hex().to_string();
    let mut config = MappingConfig::from_toml_str(&mapping_text)
        .with_context(|| format!("invalid mapping {}", options.mapping.display()))?;
    if options.cache_results {
        config.output.cache_formula_results = true;
    }

    let reference = load_reference(options.reference.as_deref())
        .context("failed to load elemental reference")?;
    let context = ExecutionContext::new(config, reference)?;

    let workbook = read_workbook(&options.input)
        .with_context(|| format!("failed to read sources from {}", options.input.display()))?;
    info!(
        input = %options.input.display(),
        reader = workbook.reader,
        sheets = workbook.sheets.len(),
        "loaded source workbook"
    );

    let outcome = stitch(&workbook, &context)?;

    let mut staging = Staging::new();
    let workbook_path = staging.stage(&options.output)?.to_path_buf();
    outputs::write_workbook(
        &workbook_path,
        &outcome.table,
        &outcome.formulas,
        &context.indices,
        &context.config.output,
    )?;

    if let Some(values) = &options.values {
        let format = ValuesFormat::from_path(values)?;
        let frame = outputs::values_frame(&outcome.table, &outcome.formulas, &context.indices)?;
        let path = staging.stage(values)?.to_path_buf();
        outputs::write_values(&path, format, &frame)?;
    }

    let report = RunReport {
        generated_at: Utc::now().to_rfc3339(),
        input: options.input.clone(),
        input_reader: workbook.reader.to_string(),
        input_hash: workbook.content_hash.clone(),
        mapping: options.mapping.clone(),
        mapping_hash,
        reference: options.reference.clone(),
        output: options.output.clone(),
        values: options.values.clone(),
        summary: outcome.summary,
    };

    if let Some(path) = &options.report {
        let staged = staging.stage(path)?.to_path_buf();
        outputs::write_report(&staged, &report)?;
    }

    staging.commit()?;
    info!(
        output = %options.output.display(),
        rows = report.summary.rows,
        blanked = report.summary.blanked.len(),
        "stitching run complete"
    );
    Ok(report)
}
