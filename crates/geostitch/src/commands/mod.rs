pub mod check;
pub mod indices;
pub mod stitch;
pub mod verify;

use comfy_table::{presets::UTF8_FULL, Table};
use geostitch_core::pipelines::StitchSummary;

pub fn summary_table(summary: &StitchSummary) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["priority", "sheet", "reference", "rows"]);
    for source in &summary.sources {
        table.add_row(vec![
            source.priority.to_string(),
            source.sheet.clone(),
            source.reference.clone(),
            source.rows.to_string(),
        ]);
    }
    table
}

pub fn print_summary(summary: &StitchSummary) {
    println!("{}", summary_table(summary));
    println!(
        "{} rows, {} label and {} measurement columns, {} indices",
        summary.rows,
        summary.labels.len(),
        summary.measurements.len(),
        summary.indices.len()
    );
    println!(
        "{} formulas emitted, {} index cells left blank",
        summary.formulas,
        summary.blanked.len()
    );
    for blank in &summary.blanked {
        println!(
            "  {} blank for {} line {}: {} not measured",
            blank.index, blank.source_reference, blank.source_row, blank.missing
        );
    }
}
