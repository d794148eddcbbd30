use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use comfy_table::{presets::UTF8_FULL, Table};
use geostitch_core::indices::{canonical_index_definitions, IndexDefinition};
use geostitch_core::pipelines::load_reference;
use geostitch_core::ExecutionContext;

pub fn run(mapping: Option<PathBuf>, reference: Option<PathBuf>) -> Result<ExitCode> {
    let definitions: Vec<IndexDefinition> = match mapping {
        Some(mapping) => ExecutionContext::from_paths(&mapping, reference.as_deref())?.indices,
        None => canonical_index_definitions(&load_reference(reference.as_deref())?)?,
    };

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["code", "origin", "description", "expression"]);
    for index in &definitions {
        let origin = serde_json::to_value(index.origin)?;
        table.add_row(vec![
            index.code.clone(),
            origin.as_str().unwrap_or_default().to_string(),
            index.description.clone(),
            index.expression.to_string(),
        ]);
    }
    println!("{table}");
    Ok(ExitCode::SUCCESS)
}
