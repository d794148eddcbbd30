use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use geostitch_core::RunOptions;
use tracing::info;

use crate::SourceArgs;

pub fn run(
    sources: SourceArgs,
    output: PathBuf,
    values: Option<PathBuf>,
    report: Option<PathBuf>,
    cache_results: bool,
) -> Result<ExitCode> {
    let options = RunOptions {
        input: sources.input,
        mapping: sources.mapping,
        reference: sources.reference,
        output,
        values,
        report,
        cache_results,
    };

    let report = geostitch_core::run(&options)?;
    super::print_summary(&report.summary);
    println!("wrote {}", report.output.display());
    if !options.cache_results {
        println!("open and re-save the workbook in spreadsheet software before reading index values with table tools");
    }
    info!(output = %report.output.display(), "stitch finished");
    Ok(ExitCode::SUCCESS)
}
