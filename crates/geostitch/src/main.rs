// crates/geostitch/src/main.rs

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

/// Stitches per-source geochemistry tables into one workbook with live index formulas
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
pub struct SourceArgs {
    /// Source workbook (.xlsx/.xls/.ods) or a directory of CSV files
    #[arg(short, long)]
    pub input: PathBuf,
    /// Mapping configuration (TOML)
    #[arg(short, long, env = "GEOSTITCH_MAPPING")]
    pub mapping: PathBuf,
    /// CSV of `symbol,atomic_weight` overriding the built-in atomic weights
    #[arg(long, env = "GEOSTITCH_REFERENCE")]
    pub reference: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Read, normalize and unify the sources, then write the stitched workbook
    Stitch {
        #[command(flatten)]
        sources: SourceArgs,
        /// Output workbook (.xlsx)
        #[arg(short, long)]
        output: PathBuf,
        /// Also export evaluated values (.csv or .parquet)
        #[arg(long)]
        values: Option<PathBuf>,
        /// Write a JSON run report
        #[arg(long)]
        report: Option<PathBuf>,
        /// Store computed results alongside each formula
        #[arg(long)]
        cache_results: bool,
    },
    /// Run the whole pipeline without writing anything and print a summary
    Check {
        #[command(flatten)]
        sources: SourceArgs,
    },
    /// Re-evaluate every index formula of a stitched workbook
    Verify {
        #[arg(short, long)]
        workbook: PathBuf,
        /// Relative tolerance for comparisons
        #[arg(long, default_value_t = geostitch_core::verification::DEFAULT_TOLERANCE)]
        tolerance: f64,
        /// Compare against the results stored in the workbook as well
        #[arg(long)]
        compare_cached: bool,
    },
    /// List the index definitions a run would emit
    Indices {
        #[arg(short, long, env = "GEOSTITCH_MAPPING")]
        mapping: Option<PathBuf>,
        #[arg(long, env = "GEOSTITCH_REFERENCE")]
        reference: Option<PathBuf>,
    },
}

fn main() -> Result<ExitCode> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Stitch {
            sources,
            output,
            values,
            report,
            cache_results,
        } => commands::stitch::run(sources, output, values, report, cache_results),
        Command::Check { sources } => commands::check::run(sources),
        Command::Verify {
            workbook,
            tolerance,
            compare_cached,
        } => commands::verify::run(workbook, tolerance, compare_cached),
        Command::Indices { mapping, reference } => commands::indices::run(mapping, reference),
    }
}
