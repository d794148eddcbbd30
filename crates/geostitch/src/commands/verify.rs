use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use comfy_table::{presets::UTF8_FULL, Table};
use geostitch_core::verification::{verify_workbook, VerifyOptions};

pub fn run(workbook: PathBuf, tolerance: f64, compare_cached: bool) -> Result<ExitCode> {
    let options = VerifyOptions {
        tolerance,
        compare_cached,
    };
    let report = verify_workbook(&workbook, options)
        .with_context(|| format!("failed to verify {}", workbook.display()))?;

    println!(
        "{} formulas checked, {} blank index cells",
        report.checked, report.blank
    );
    if report.is_clean() {
        println!("all formulas agree with their index expressions");
        return Ok(ExitCode::SUCCESS);
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["cell", "index", "formula", "detail"]);
    for mismatch in &report.mismatches {
        table.add_row(vec![
            mismatch.cell.clone(),
            mismatch.index.clone(),
            mismatch.formula.clone().unwrap_or_default(),
            mismatch.detail.clone(),
        ]);
    }
    println!("{table}");
    Ok(ExitCode::FAILURE)
}
