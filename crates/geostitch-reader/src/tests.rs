use std::path::PathBuf;

use rust_xlsxwriter::Workbook;

use crate::errors::ReadError;
use crate::model::{column_letters, RawCell, RawRow, RawSheet};
use crate::read_workbook;

fn fixture_dir(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/data")
        .join(name)
}

fn text(value: &str) -> RawCell {
    RawCell::Text(value.to_string())
}

fn sheet_from(name: &str, lines: Vec<Vec<RawCell>>) -> RawSheet {
    let rows = lines
        .into_iter()
        .enumerate()
        .map(|(idx, cells)| RawRow::new(idx + 1, cells))
        .collect();
    RawSheet::new(name, rows)
}

#[test]
fn reads_csv_directory_as_workbook() {
    let workbook = read_workbook(&fixture_dir("literature")).expect("csv directory read failed");

    assert_eq!(workbook.reader, "CSV_DIRECTORY");
    assert_eq!(workbook.sheet_names(), vec!["Jones2011", "Smith2004"]);
    assert_eq!(workbook.content_hash.len(), 64);

    let smith = workbook
        .sheet("Smith2004")
        .expect("Smith2004 sheet missing")
        .tabulate(2)
        .expect("Smith2004 tabulate failed");

    assert_eq!(smith.len(), 4);
    assert_eq!(smith.headers[0], "Sample");
    assert_eq!(smith.headers[4], "Fe2O3 (wt%)");
    assert_eq!(smith.rows[0].line_index, 3);
    assert_eq!(smith.rows[0].cell(0), &text("SM-01"));
    assert_eq!(smith.rows[3].cell(4), &text("n.m."));
    assert_eq!(smith.rows[3].cell(9), &RawCell::Empty);
}

#[test]
fn tabulate_skips_blank_lines_but_keeps_line_numbers() {
    let workbook = read_workbook(&fixture_dir("literature")).expect("csv directory read failed");
    let jones = workbook
        .sheet("Jones2011")
        .expect("Jones2011 sheet missing")
        .tabulate(1)
        .expect("Jones2011 tabulate failed");

    assert_eq!(jones.len(), 3);
    assert_eq!(jones.column_index("Sr (mg/kg)"), Some(9));
    let lines: Vec<usize> = jones.rows.iter().map(|row| row.line_index).collect();
    assert_eq!(lines, vec![2, 3, 5]);
}

#[test]
fn spreadsheet_reader_reads_written_workbook() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("sources.xlsx");

    let mut workbook = Workbook::new();
    {
        let sheet = workbook.add_worksheet();
        sheet.set_name("Smith2004").unwrap();
        sheet.write_string(0, 0, "Table 2").unwrap();
        sheet.write_string(1, 0, "Sample").unwrap();
        sheet.write_string(1, 1, "Al2O3 (wt%)").unwrap();
        sheet.write_string(1, 2, "Rb (ppm)").unwrap();
        sheet.write_string(2, 0, "SM-01").unwrap();
        sheet.write_number(2, 1, 18.2).unwrap();
        sheet.write_number(2, 2, 110.0).unwrap();
        sheet.write_string(3, 0, "SM-02").unwrap();
        sheet.write_number(3, 1, 16.9).unwrap();
    }
    {
        let sheet = workbook.add_worksheet();
        sheet.set_name("Jones2011").unwrap();
        sheet.write_string(0, 0, "Sample ID").unwrap();
        sheet.write_string(0, 1, "Fe (wt%)").unwrap();
        sheet.write_string(1, 0, "JN-7").unwrap();
        sheet.write_number(1, 1, 3.5).unwrap();
    }
    workbook.save(&path).expect("failed to write workbook");

    let loaded = read_workbook(&path).expect("spreadsheet read failed");
    assert_eq!(loaded.reader, "SPREADSHEET");
    assert_eq!(loaded.sheet_names(), vec!["Smith2004", "Jones2011"]);

    let smith = loaded
        .sheet("Smith2004")
        .unwrap()
        .tabulate(2)
        .expect("tabulate failed");
    assert_eq!(smith.headers, vec!["Sample", "Al2O3 (wt%)", "Rb (ppm)"]);
    assert_eq!(smith.rows[0].line_index, 3);
    assert_eq!(smith.rows[0].cell(1), &RawCell::Number(18.2));
    assert_eq!(smith.rows[1].cell(2), &RawCell::Empty);

    let jones = loaded.sheet("Jones2011").unwrap().tabulate(1).unwrap();
    assert_eq!(jones.rows[0].cell(1), &RawCell::Number(3.5));
}

#[test]
fn missing_sheet_names_the_sheet() {
    let workbook = read_workbook(&fixture_dir("literature")).unwrap();
    let err = workbook.sheet("Brown1999").unwrap_err();
    assert!(matches!(err, ReadError::MissingSheet { ref sheet } if sheet == "Brown1999"));
}

#[test]
fn header_only_sheet_is_empty() {
    let sheet = sheet_from("Empty", vec![vec![text("Sample"), text("Al (wt%)")]]);
    let err = sheet.tabulate(1).unwrap_err();
    assert!(matches!(err, ReadError::EmptySheet { .. }));

    let blank = sheet_from("Blank", vec![]);
    assert!(matches!(
        blank.tabulate(1).unwrap_err(),
        ReadError::EmptySheet { .. }
    ));
}

#[test]
fn duplicate_headers_are_malformed() {
    let sheet = sheet_from(
        "Dup",
        vec![
            vec![text("Sample"), text("Al (wt%)"), text("Al (wt%)")],
            vec![text("A"), RawCell::Number(1.0), RawCell::Number(2.0)],
        ],
    );
    let err = sheet.tabulate(1).unwrap_err();
    match err {
        ReadError::Malformed {
            line_index,
            message,
            ..
        } => {
            assert_eq!(line_index, 1);
            assert!(message.contains("duplicate header"));
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn data_beyond_header_width_is_malformed() {
    let sheet = sheet_from(
        "Wide",
        vec![
            vec![text("Sample"), text("Al (wt%)")],
            vec![text("A"), RawCell::Number(1.0)],
            vec![text("B"), RawCell::Number(2.0), RawCell::Number(9.0)],
        ],
    );
    match sheet.tabulate(1).unwrap_err() {
        ReadError::Malformed {
            line_index,
            message,
            ..
        } => {
            assert_eq!(line_index, 3);
            assert!(message.contains("column C"));
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn unlabeled_empty_columns_are_dropped() {
    let sheet = sheet_from(
        "Gaps",
        vec![
            vec![text("Sample"), RawCell::Empty, text("Al (wt%)")],
            vec![text("A"), RawCell::Empty, RawCell::Number(1.0)],
        ],
    );
    let table = sheet.tabulate(1).expect("tabulate failed");
    assert_eq!(table.headers, vec!["Sample", "Al (wt%)"]);
    assert_eq!(table.rows[0].cells, vec![text("A"), RawCell::Number(1.0)]);
}

#[test]
fn blank_header_row_is_malformed() {
    let sheet = sheet_from(
        "Offset",
        vec![
            vec![text("Sample")],
            vec![RawCell::Empty],
            vec![text("A")],
        ],
    );
    assert!(matches!(
        sheet.tabulate(2).unwrap_err(),
        ReadError::Malformed { line_index: 2, .. }
    ));
}

#[test]
fn unknown_inputs_report_every_attempt() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("notes.txt");
    std::fs::write(&path, "not a workbook").unwrap();

    match read_workbook(&path).unwrap_err() {
        ReadError::NoMatchingReader { attempts, .. } => {
            let readers: Vec<&str> = attempts.iter().map(|a| a.reader).collect();
            assert_eq!(readers, vec!["SPREADSHEET", "CSV_DIRECTORY"]);
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn column_letters_follow_spreadsheet_order() {
    assert_eq!(column_letters(0), "A");
    assert_eq!(column_letters(25), "Z");
    assert_eq!(column_letters(26), "AA");
    assert_eq!(column_letters(701), "ZZ");
    assert_eq!(column_letters(702), "AAA");
}
