//! Shared fixtures: small project-finance models written with rust_xlsxwriter

#![allow(dead_code)]

use royalbit_sheetlens::types::CellValue;
use rust_xlsxwriter::{Color, Format, FormatBorder, Note, Table, TableColumn, Workbook};
use std::path::{Path, PathBuf};

pub fn text(s: &str) -> CellValue {
    CellValue::Text(s.to_string())
}

pub fn num(n: f64) -> CellValue {
    CellValue::Number(n)
}

/// Inputs, Cashflow (declared table "Flows") and Summary with IRR, NPV and DSCR
pub fn model_workbook() -> Workbook {
    let mut workbook = Workbook::new();

    let inputs = workbook.add_worksheet();
    inputs.set_name("Inputs").unwrap();
    inputs.write_string(0, 0, "Discount rate").unwrap();
    inputs.write_number(0, 1, 0.08).unwrap();
    inputs.write_string(1, 0, "Debt service").unwrap();
    inputs.write_number(1, 1, 25.0).unwrap();

    let cashflow = workbook.add_worksheet();
    cashflow.set_name("Cashflow").unwrap();
    cashflow.write_string(0, 0, "Year").unwrap();
    cashflow.write_string(0, 1, "Flow").unwrap();
    for (i, (year, flow)) in [(2024.0, -100.0), (2025.0, 30.0), (2026.0, 40.0), (2027.0, 50.0)]
        .into_iter()
        .enumerate()
    {
        let row = i as u32 + 1;
        cashflow.write_number(row, 0, year).unwrap();
        cashflow.write_number(row, 1, flow).unwrap();
    }
    let columns = vec![
        TableColumn::new().set_header("Year"),
        TableColumn::new().set_header("Flow"),
    ];
    let table = Table::new().set_name("Flows").set_columns(&columns);
    cashflow.add_table(0, 0, 4, 1, &table).unwrap();

    let summary = workbook.add_worksheet();
    summary.set_name("Summary").unwrap();
    summary.write_string(0, 0, "Project IRR").unwrap();
    summary.write_formula(0, 1, "=IRR(Cashflow!B2:B5)").unwrap();
    summary.write_string(1, 0, "NPV").unwrap();
    summary
        .write_formula(1, 1, "=NPV(DiscountRate,Cashflow!B3:B5)+Cashflow!B2")
        .unwrap();
    summary.write_string(3, 0, "DSCR").unwrap();
    summary.write_formula(3, 1, "=Cashflow!B5/Inputs!B2").unwrap();
    summary
        .merge_range(4, 2, 4, 3, "Notes", &Format::new())
        .unwrap();

    workbook.define_name("DiscountRate", "=Inputs!$B$1").unwrap();
    workbook
}

pub fn write_model(dir: &Path) -> PathBuf {
    let path = dir.join("model.xlsx");
    model_workbook().save(&path).unwrap();
    path
}

/// Two cells on Loop reading each other, next to one clean formula
pub fn write_circular(dir: &Path) -> PathBuf {
    let path = dir.join("circular.xlsx");
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.set_name("Loop").unwrap();
    sheet.write_number(0, 0, 10.0).unwrap();
    sheet.write_formula(0, 1, "=A1*2").unwrap();
    sheet.write_formula(1, 0, "=B2+1").unwrap();
    sheet.write_formula(1, 1, "=A2+1").unwrap();
    workbook.save(&path).unwrap();
    path
}

/// Inputs tagged for sensitivity runs: a prefixed label, a yellow input with
/// a note, and a bold bordered label; Calc reads the yellow input
pub fn write_sensitivity(dir: &Path) -> PathBuf {
    let path = dir.join("scenarios.xlsx");
    let mut workbook = Workbook::new();
    let highlight = Format::new().set_background_color(Color::Yellow);
    let heading = Format::new().set_bold().set_border(FormatBorder::Thin);

    let inputs = workbook.add_worksheet();
    inputs.set_name("Inputs").unwrap();
    inputs.write_string(0, 0, "Sensitivity_Growth").unwrap();
    inputs.write_number_with_format(0, 1, 0.05, &highlight).unwrap();
    let note = Note::new("Sensitivity_Growth: annual growth").add_author_prefix(false);
    inputs.insert_note(0, 1, &note).unwrap();
    inputs.write_string_with_format(1, 0, "Tax rate", &heading).unwrap();
    inputs.write_number(1, 1, 0.25).unwrap();

    let calc = workbook.add_worksheet();
    calc.set_name("Calc").unwrap();
    calc.write_formula(0, 0, "=Inputs!B1*100").unwrap();

    workbook.save(&path).unwrap();
    path
}
