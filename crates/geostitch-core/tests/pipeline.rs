use std::fs;
use std::path::{Path, PathBuf};

use geostitch_core::cell_eval::{evaluate_formula, CellGrid};
use geostitch_core::formula::{EmittedCell, FormulaError, SheetLayout};
use geostitch_core::mapping::{MappingConfig, MappingError, MissingOperandPolicy};
use geostitch_core::outputs::UNIFIED_SHEET;
use geostitch_core::pipelines::RunReport;
use geostitch_core::verification::{verify_workbook, VerifyOptions};
use geostitch_core::{
    run, stitch, ElementalReference, ExecutionContext, RunOptions, StitchError, StitchOutcome,
};
use geostitch_reader::{read_workbook, RawCell};

fn sources_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../geostitch-reader/tests/data/literature")
}

fn mapping_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/data/literature.toml")
}

fn context_with(config: MappingConfig) -> ExecutionContext {
    ExecutionContext::new(config, ElementalReference::standard()).expect("context failed")
}

fn stitch_fixture() -> StitchOutcome {
    let workbook = read_workbook(&sources_dir()).expect("failed to read sources");
    let config = MappingConfig::from_path(&mapping_path()).expect("failed to load mapping");
    stitch(&workbook, &context_with(config)).expect("stitch failed")
}

fn run_options(dir: &Path) -> RunOptions {
    RunOptions {
        input: sources_dir(),
        mapping: mapping_path(),
        output: dir.join("stitched.xlsx"),
        ..RunOptions::default()
    }
}

#[test]
fn sources_are_stacked_in_priority_order() {
    let outcome = stitch_fixture();
    let rows = outcome.table.rows().unwrap();

    assert_eq!(rows.len(), 4 + 3);
    let provenance: Vec<(&str, i64)> = rows
        .iter()
        .map(|row| (row.source_reference.as_str(), row.source_row))
        .collect();
    assert_eq!(
        provenance,
        vec![
            ("Smith2004", 3),
            ("Smith2004", 4),
            ("Smith2004", 5),
            ("Smith2004", 6),
            ("Jones2011", 2),
            ("Jones2011", 3),
            ("Jones2011", 5),
        ]
    );

    let counts: Vec<(&str, usize, usize)> = outcome
        .table
        .source_counts()
        .iter()
        .map(|source| (source.sheet.as_str(), source.priority, source.rows))
        .collect();
    assert_eq!(counts, vec![("Smith2004", 1, 4), ("Jones2011", 2, 3)]);
    assert_eq!(outcome.table.row(4).unwrap(), rows[4]);
    assert!(outcome.table.row(7).is_err());

    assert_eq!(
        outcome.table.column_names()[..5],
        ["source_reference", "source_row", "sample_id", "depth_m", "lithology"]
    );
}

#[test]
fn oxide_and_element_sources_land_in_one_column() {
    let outcome = stitch_fixture();
    let rows = outcome.table.rows().unwrap();

    let smith = rows[0].value("Fe_wt_pct").unwrap();
    assert!((smith - 3.497).abs() < 1e-3, "Smith Fe {smith}");
    assert_eq!(rows[4].value("Fe_wt_pct"), Some(3.5));

    let fe = outcome.table.dataframe().column("Fe_wt_pct").unwrap();
    assert_eq!(fe.null_count(), 1);
    assert!(outcome.table.dataframe().column("Fe2O3_wt_pct").is_err());
}

#[test]
fn missing_attributes_are_null_not_zero() {
    let outcome = stitch_fixture();
    let rows = outcome.table.rows().unwrap();

    // Jones never reports SiO2 or depth
    for row in &rows[4..] {
        assert_eq!(row.value("SiO2_wt_pct"), None);
        assert_eq!(row.label("depth_m"), None);
    }
    // Smith never reports lithology
    assert!(rows[..4].iter().all(|row| row.label("lithology").is_none()));

    assert_eq!(rows[5].value("Ca_wt_pct"), Some(0.0));
    assert!(matches!(
        outcome.formulas.cell(5, 0),
        Some(EmittedCell::Formula(_))
    ));
}

#[test]
fn formulas_reference_their_own_row() {
    let outcome = stitch_fixture();
    let layout = &outcome.formulas.layout;
    let k_rb = layout
        .index_columns()
        .iter()
        .position(|code| code == "K_Rb")
        .unwrap();
    let rb_sr = layout
        .index_columns()
        .iter()
        .position(|code| code == "Rb_Sr")
        .unwrap();

    let k = layout.cell_ref("K_wt_pct", 0).unwrap();
    let rb = layout.cell_ref("Rb_ppm", 0).unwrap();
    let sr = layout.cell_ref("Sr_ppm", 0).unwrap();
    assert!(k.ends_with('2') && rb.ends_with('2'));

    match outcome.formulas.cell(0, k_rb) {
        Some(EmittedCell::Formula(formula)) => {
            assert_eq!(formula.text, format!("{k}*10000/{rb}"));
        }
        other => panic!("unexpected cell {other:?}"),
    }
    match outcome.formulas.cell(0, rb_sr) {
        Some(EmittedCell::Formula(formula)) => assert_eq!(formula.text, format!("{rb}/{sr}")),
        other => panic!("unexpected cell {other:?}"),
    }

    assert_eq!(SheetLayout::line_of(6), 8);
}

#[test]
fn unmeasured_operands_leave_the_index_blank() {
    let outcome = stitch_fixture();
    let codes = outcome.formulas.layout.index_columns().to_vec();
    let mg = codes.iter().position(|code| code == "Mg_number").unwrap();
    let k_rb = codes.iter().position(|code| code == "K_Rb").unwrap();

    // SM-04: Fe2O3 n.m. and Rb empty
    assert_eq!(
        outcome.formulas.cell(3, mg),
        Some(&EmittedCell::Blank {
            missing: "Fe_wt_pct".to_string()
        })
    );
    assert_eq!(
        outcome.formulas.cell(3, k_rb),
        Some(&EmittedCell::Blank {
            missing: "Rb_ppm".to_string()
        })
    );

    let blanked: Vec<(&str, &str, i64)> = outcome
        .summary
        .blanked
        .iter()
        .map(|cell| (cell.index.as_str(), cell.source_reference.as_str(), cell.source_row))
        .collect();
    assert_eq!(
        blanked,
        vec![
            ("Mg_number", "Smith2004", 6),
            ("K_Rb", "Smith2004", 6),
            ("Rb_Sr", "Smith2004", 6),
            ("K_Rb", "Jones2011", 5),
            ("Rb_Sr", "Jones2011", 5),
        ]
    );
}

#[test]
fn abort_policy_stops_at_first_unmeasured_operand() {
    let workbook = read_workbook(&sources_dir()).unwrap();
    let mut config = MappingConfig::from_path(&mapping_path()).unwrap();
    config.output.on_missing_operand = MissingOperandPolicy::Abort;

    let err = stitch(&workbook, &context_with(config)).unwrap_err();
    match err {
        StitchError::Formula(FormulaError::MissingOperand {
            index,
            sheet,
            line,
            column,
        }) => {
            assert_eq!(index, "Mg_number");
            assert_eq!(sheet, "Smith2004");
            assert_eq!(line, 6);
            assert_eq!(column, "Fe_wt_pct");
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn emitted_formulas_match_the_reference_evaluator() {
    let outcome = stitch_fixture();
    let layout = &outcome.formulas.layout;
    let rows = outcome.table.rows().unwrap();

    let mut grid = CellGrid::new();
    for row in &rows {
        let line = SheetLayout::line_of(row.index);
        for (name, value) in &row.values {
            let column = layout.column_index(name).unwrap();
            let cell = value.map(RawCell::Number).unwrap_or(RawCell::Text("n.m.".into()));
            grid.set(line, column, cell);
        }
    }

    let mut compared = 0;
    for (row, cells) in outcome.formulas.cells.iter().enumerate() {
        for cell in cells {
            let EmittedCell::Formula(formula) = cell else {
                continue;
            };
            let expected = formula.expected.clone().expect("reference evaluation failed");
            let actual = evaluate_formula(&formula.text, &grid).expect("formula evaluation failed");
            assert!(
                (actual - expected).abs() <= 1e-9 * expected.abs().max(1.0),
                "row {row} {}: {actual} vs {expected}",
                formula.text
            );
            compared += 1;
        }
    }
    assert_eq!(compared, outcome.summary.formulas);
    assert_eq!(compared, 7 * 6 - 5);
}

#[test]
fn stitching_is_idempotent() {
    let first = stitch_fixture();
    let second = stitch_fixture();

    assert!(first
        .table
        .dataframe()
        .equals_missing(second.table.dataframe()));
    assert_eq!(first.formulas.cells, second.formulas.cells);
}

#[test]
fn run_writes_workbook_values_and_report() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut options = run_options(dir.path());
    options.values = Some(dir.path().join("values.csv"));
    options.report = Some(dir.path().join("report.json"));

    let report = run(&options).expect("run failed");
    assert_eq!(report.summary.rows, 7);
    assert!(options.output.exists());
    assert!(!dir.path().join("stitched.xlsx.partial").exists());

    let written = read_workbook(&options.output).unwrap();
    assert_eq!(
        written.sheet_names(),
        vec!["Unified", "Sources", "Indices", "README"]
    );
    let unified = written.sheet(UNIFIED_SHEET).unwrap().tabulate(1).unwrap();
    assert_eq!(unified.len(), 7);
    let fe = unified.column_index("Fe_wt_pct").unwrap();
    assert_eq!(unified.rows[3].cell(fe), &RawCell::Text("n.m.".to_string()));
    let ca = unified.column_index("Ca_wt_pct").unwrap();
    assert_eq!(unified.rows[5].cell(ca), &RawCell::Number(0.0));

    let mut values = csv::Reader::from_path(options.values.as_ref().unwrap()).unwrap();
    let headers = values.headers().unwrap().clone();
    assert!(headers.iter().any(|header| header == "CIA"));
    assert!(headers.iter().any(|header| header == "Rb_Sr"));
    assert_eq!(values.records().count(), 7);

    let text = fs::read_to_string(options.report.as_ref().unwrap()).unwrap();
    let json: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(json["input_hash"].as_str().unwrap().len(), 64);
    assert_eq!(json["summary"]["blanked"].as_array().unwrap().len(), 5);
}

#[test]
fn written_workbooks_are_value_identical() {
    let dir = tempfile::tempdir().expect("tempdir");
    let first = run_options(dir.path());
    let mut second = run_options(dir.path());
    second.output = dir.path().join("again.xlsx");

    run(&first).unwrap();
    run(&second).unwrap();

    let a = read_workbook(&first.output).unwrap();
    let b = read_workbook(&second.output).unwrap();
    for name in a.sheet_names() {
        assert_eq!(
            a.sheet(name).unwrap().rows,
            b.sheet(name).unwrap().rows,
            "sheet {name} differs"
        );
    }
}

#[test]
fn missing_mapping_fails_without_writing_output() {
    let dir = tempfile::tempdir().expect("tempdir");
    let text = fs::read_to_string(mapping_path()).unwrap();
    let broken = text.replace("\"Remarks\" = { ignore = true }\n", "");
    assert_ne!(text, broken);
    let mapping = dir.path().join("broken.toml");
    fs::write(&mapping, broken).unwrap();

    let mut options = run_options(dir.path());
    options.mapping = mapping;
    let err = run(&options).unwrap_err();

    match err.downcast_ref::<StitchError>() {
        Some(StitchError::Mapping(MappingError::UnmappedColumn { sheet, column })) => {
            assert_eq!(sheet, "Smith2004");
            assert_eq!(column, "Remarks");
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(!options.output.exists());
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
}

#[test]
fn failed_commit_rolls_back_outputs_already_in_place() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut options = run_options(dir.path());
    let values = dir.path().join("values.csv");
    // a non-empty directory where the values file should land makes its rename fail
    fs::create_dir_all(values.join("occupied")).unwrap();
    options.values = Some(values);

    assert!(run(&options).is_err());
    assert!(!options.output.exists());
    let left: Vec<String> = fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(left, vec!["values.csv".to_string()]);
}

#[test]
fn unknown_index_operand_is_a_formula_error() {
    let mut config = MappingConfig::from_path(&mapping_path()).unwrap();
    config.indices[0].expression = "Rb_ppm / Ba_ppm".to_string();
    let err = ExecutionContext::new(config, ElementalReference::standard()).unwrap_err();
    assert!(matches!(
        err,
        StitchError::Formula(FormulaError::UnknownColumn { ref column, .. }) if column == "Ba_ppm"
    ));
}

#[test]
fn verify_accepts_a_freshly_written_workbook() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut options = run_options(dir.path());
    options.cache_results = true;
    let report: RunReport = run(&options).unwrap();

    let verification = verify_workbook(
        &options.output,
        VerifyOptions {
            compare_cached: true,
            ..VerifyOptions::default()
        },
    )
    .expect("verify failed");

    assert!(verification.is_clean(), "{:?}", verification.mismatches);
    assert_eq!(verification.checked, report.summary.formulas);
    assert_eq!(verification.blank, report.summary.blanked.len());
}
