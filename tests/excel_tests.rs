//! Workbook loading through calamine, against files written by rust_xlsxwriter

mod common;

use common::{model_workbook, num, text, write_model, write_sensitivity};
use royalbit_sheetlens::config::AnalysisConfig;
use royalbit_sheetlens::core::{Analyzer, SensitivityReason, TableSource};
use royalbit_sheetlens::error::AnalyzerError;
use royalbit_sheetlens::excel::{load_bytes, ExcelImporter};
use royalbit_sheetlens::types::{CellAddress, CellRange};
use std::io::{Cursor, Read, Write};
use tempfile::TempDir;
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

fn a(s: &str) -> CellAddress {
    s.parse().unwrap()
}

fn formula_text(formula: Option<&str>) -> Option<&str> {
    formula.map(|f| f.trim_start_matches('='))
}

/// Copy an xlsx package, passing one part through `edit`
fn with_part_replaced(bytes: &[u8], part: &str, edit: impl Fn(&[u8]) -> Vec<u8>) -> Vec<u8> {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for i in 0..archive.len() {
        let mut file = archive.by_index(i).unwrap();
        let name = file.name().to_string();
        let mut content = Vec::new();
        file.read_to_end(&mut content).unwrap();
        if name == part {
            content = edit(&content);
        }
        writer.start_file(name, SimpleFileOptions::default()).unwrap();
        writer.write_all(&content).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

// ═══════════════════════════════════════════════════════════════════════════
// IMPORTER TESTS
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_import_values_and_sheet_order() {
    let dir = TempDir::new().unwrap();
    let workbook = ExcelImporter::new(write_model(dir.path())).import().unwrap();

    assert_eq!(workbook.source(), "model.xlsx");
    assert_eq!(workbook.sheet_names(), vec!["Inputs", "Cashflow", "Summary"]);
    assert_eq!(workbook.value(&a("Inputs!B1")), &num(0.08));
    assert_eq!(workbook.value(&a("Inputs!A2")), &text("Debt service"));
    assert_eq!(workbook.value(&a("Cashflow!B2")), &num(-100.0));
}

#[test]
fn test_import_formulas() {
    let dir = TempDir::new().unwrap();
    let workbook = ExcelImporter::new(write_model(dir.path())).import().unwrap();

    let irr = workbook.cell(&a("Summary!B1")).unwrap();
    assert_eq!(formula_text(irr.formula.as_deref()), Some("IRR(Cashflow!B2:B5)"));
    assert_eq!(workbook.formula_cells().count(), 3);
    assert!(workbook.cell(&a("Inputs!B1")).unwrap().formula.is_none());
}

#[test]
fn test_import_defined_name() {
    let dir = TempDir::new().unwrap();
    let workbook = ExcelImporter::new(write_model(dir.path())).import().unwrap();

    let name = workbook.named_range("discountrate").unwrap();
    assert_eq!(name.name, "DiscountRate");
    assert_eq!(name.addresses, vec![a("Inputs!B1")]);
}

#[test]
fn test_import_declared_table() {
    let dir = TempDir::new().unwrap();
    let workbook = ExcelImporter::new(write_model(dir.path())).import().unwrap();

    let table = workbook.table("Flows").unwrap();
    assert_eq!(table.range, CellRange::new("Cashflow", (1, 1), (5, 2)));
    assert_eq!(table.columns, vec!["Year".to_string(), "Flow".to_string()]);
}

#[test]
fn test_import_merged_cells() {
    let dir = TempDir::new().unwrap();
    let workbook = ExcelImporter::new(write_model(dir.path())).import().unwrap();

    let summary = workbook.sheet("Summary").unwrap();
    assert_eq!(
        summary.merged_regions(),
        &[CellRange::new("Summary", (5, 3), (5, 4))]
    );
}

#[test]
fn test_unreadable_table_part_is_skipped() {
    let bytes = model_workbook().save_to_buffer().unwrap();
    let broken = with_part_replaced(&bytes, "xl/tables/table1.xml", |xml| xml[..xml.len() / 2].to_vec());
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("broken_table.xlsx");
    std::fs::write(&path, &broken).unwrap();

    let workbook = ExcelImporter::new(&path).import().unwrap();
    assert!(workbook.tables().is_empty());
    assert_eq!(workbook.value(&a("Cashflow!B2")), &num(-100.0));
    assert_eq!(workbook.formula_cells().count(), 3);

    let workbook = load_bytes(&broken, "upload.xlsx").unwrap();
    assert!(workbook.tables().is_empty());
}

#[test]
fn test_import_fill_bold_border_and_note() {
    let dir = TempDir::new().unwrap();
    let workbook = ExcelImporter::new(write_sensitivity(dir.path())).import().unwrap();

    let growth = workbook.cell(&a("Inputs!B1")).unwrap();
    let style = growth.style.as_ref().unwrap();
    assert_eq!(style.fill.as_deref(), Some("FFFF00"));
    assert!(!style.bold);
    assert_eq!(growth.comment.as_deref(), Some("Sensitivity_Growth: annual growth"));

    let label = workbook.cell(&a("Inputs!A2")).unwrap();
    let style = label.style.as_ref().unwrap();
    assert!(style.bold && style.border);
    assert_eq!(style.fill, None);

    assert!(workbook.cell(&a("Inputs!B2")).unwrap().style.is_none());
    assert!(workbook.cell(&a("Inputs!A1")).unwrap().comment.is_none());
}

#[test]
fn test_import_from_memory() {
    let bytes = model_workbook().save_to_buffer().unwrap();
    let workbook = load_bytes(&bytes, "upload.xlsx").unwrap();
    assert_eq!(workbook.source(), "upload.xlsx");
    assert_eq!(workbook.sheets().len(), 3);
}

#[test]
fn test_import_unsupported_extension() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("model.csv");
    std::fs::write(&path, "a,b\n1,2\n").unwrap();
    let err = ExcelImporter::new(&path).import().unwrap_err();
    assert!(matches!(err, AnalyzerError::Unsupported(_)));
}

#[test]
fn test_import_corrupt_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("broken.xlsx");
    std::fs::write(&path, b"PK not really a zip").unwrap();
    let err = ExcelImporter::new(&path).import().unwrap_err();
    assert!(matches!(err, AnalyzerError::Load(_)));
}

// ═══════════════════════════════════════════════════════════════════════════
// END-TO-END ANALYSIS
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_analyze_model_file() {
    let dir = TempDir::new().unwrap();
    let path = write_model(dir.path());
    let result = Analyzer::new(AnalysisConfig::default())
        .unwrap()
        .analyze_path(&path)
        .unwrap();
    let graph = &result.dependency_graph;

    assert!(!result.has_cycles());
    assert!(result.parse_warnings.is_empty());

    // The defined name resolves to its target cell
    assert!(graph.precedents(&a("Summary!B2")).contains(&a("Inputs!B1")));
    assert_eq!(
        graph.precedents(&a("Summary!B1")),
        vec![a("Cashflow!B2"), a("Cashflow!B3"), a("Cashflow!B4"), a("Cashflow!B5")]
    );

    // Every edge goes forward in the evaluation order
    let position = |cell: &CellAddress| {
        result
            .evaluation_order
            .iter()
            .position(|c| c == cell)
            .unwrap()
    };
    for edge in graph.edges() {
        assert!(position(&edge.from) < position(&edge.to), "{} before {}", edge.from, edge.to);
    }
    assert_eq!(result.evaluation_order.len(), graph.node_count());

    let flows = &result.table_regions[0];
    assert_eq!(flows.name.as_deref(), Some("Flows"));
    assert_eq!(flows.source, TableSource::Explicit);
    assert_eq!(flows.body_rows(), 4);

    let rules: Vec<(&str, String)> = result
        .metric_matches
        .iter()
        .map(|m| (m.rule.as_str(), m.anchor.to_string()))
        .collect();
    assert!(rules.contains(&("function:IRR", "Summary!B1".to_string())));
    assert!(rules.contains(&("function:NPV", "Summary!B2".to_string())));
    assert!(rules.contains(&("row_label", "Summary!B4".to_string())));
}

#[test]
fn test_sensitivity_inputs_from_file() {
    let dir = TempDir::new().unwrap();
    let mut config = AnalysisConfig::default();
    config.sensitivity.highlight_colors = vec!["#FFFF00".to_string()];
    let result = Analyzer::new(config)
        .unwrap()
        .analyze_path(&write_sensitivity(dir.path()))
        .unwrap();

    let inputs = &result.sensitivity_inputs;
    assert_eq!(inputs.len(), 2);
    assert_eq!(inputs[0].address, a("Inputs!A1"));
    assert_eq!(inputs[0].matched_by, vec![SensitivityReason::Prefix]);

    assert_eq!(inputs[1].address, a("Inputs!B1"));
    assert_eq!(inputs[1].value, num(0.05));
    assert_eq!(inputs[1].parameter.as_deref(), Some("Growth"));
    assert_eq!(
        inputs[1].matched_by,
        vec![SensitivityReason::Comment, SensitivityReason::FillColor]
    );
    assert_eq!(inputs[1].dependents, vec![a("Calc!A1")]);
}
