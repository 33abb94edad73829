//! Analyzer configuration and JSON results

mod common;

use common::{num, text, write_model};
use pretty_assertions::assert_eq;
use royalbit_sheetlens::config::{load_config, AnalysisConfig};
use royalbit_sheetlens::core::reference::ParseWarningKind;
use royalbit_sheetlens::core::{AnalysisResult, Analyzer};
use royalbit_sheetlens::error::AnalyzerError;
use royalbit_sheetlens::report::{default_report_path, write_report};
use royalbit_sheetlens::types::{CellAddress, CellValue};
use royalbit_sheetlens::workbook::WorkbookBuilder;
use std::path::Path;
use tempfile::TempDir;

// ═══════════════════════════════════════════════════════════════════════════
// CONFIGURATION
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_load_config_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("sheetlens.yaml");
    std::fs::write(
        &path,
        "expected_sheets: [Inputs, Debt]\n\
         report_dir: out\n\
         metadata:\n  owner: Treasury\n\
         tables:\n  min_header_columns: 3\n\
         metrics:\n  keywords:\n    LLCR: Loan life coverage ratio\n  disabled_rules: [cash_flow_shape]\n",
    )
    .unwrap();

    let config = load_config(Some(&path)).unwrap();
    assert_eq!(config.expected_sheets, vec!["Inputs", "Debt"]);
    assert_eq!(config.report_dir, Path::new("out"));
    assert_eq!(config.tables.min_header_columns, 3);
    assert!(config.tables.detect_heuristic);
    assert_eq!(config.metadata.get("owner").map(String::as_str), Some("Treasury"));

    let analyzer = Analyzer::new(config).unwrap();
    let names = analyzer.registry().rule_names();
    assert!(names.contains(&"keyword:LLCR"));
    assert!(!names.contains(&"cash_flow_shape"));
}

#[test]
fn test_no_config_means_defaults() {
    assert_eq!(load_config(None).unwrap(), AnalysisConfig::default());
}

#[test]
fn test_unknown_config_key_is_rejected() {
    let err = AnalysisConfig::from_yaml_str("expected_sheet: [Inputs]\n").unwrap_err();
    assert!(matches!(err, AnalyzerError::Yaml(_)));
}

#[test]
fn test_invalid_config_values() {
    let err = AnalysisConfig::from_yaml_str("tables:\n  min_header_columns: 0\n").unwrap_err();
    assert!(matches!(err, AnalyzerError::Config(_)));

    let err = AnalysisConfig::from_yaml_str("metrics:\n  keywords:\n    \"two words\": x\n").unwrap_err();
    assert!(matches!(err, AnalyzerError::Config(_)));
}

#[test]
fn test_missing_config_file() {
    let err = load_config(Some(Path::new("/no/such/sheetlens.yaml"))).unwrap_err();
    assert!(matches!(err, AnalyzerError::Io(_)));
}

// ═══════════════════════════════════════════════════════════════════════════
// RESULTS
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_expected_sheets_and_metadata() {
    let mut config = AnalysisConfig::default();
    config.expected_sheets = vec!["cashflow".to_string(), "Tax".to_string()];
    config.metadata.insert("run".to_string(), "nightly".to_string());

    let dir = TempDir::new().unwrap();
    let result = Analyzer::new(config)
        .unwrap()
        .analyze_path(&write_model(dir.path()))
        .unwrap();

    assert_eq!(result.missing_sheets, vec!["Tax".to_string()]);
    assert_eq!(result.metadata.get("run").map(String::as_str), Some("nightly"));
    assert_eq!(result.issue_count(), 1);
}

#[test]
fn test_sheet_summary_counts() {
    let mut builder = WorkbookBuilder::new("summary.xlsx");
    builder
        .set_value("S", 1, 1, text("Label"))
        .set_value("S", 3, 3, num(1.0))
        .set_formula("S", 2, 2, "=#REF!+C3", CellValue::Error("#REF!".to_string()));
    builder.add_sheet("Blank");
    let result = Analyzer::new(AnalysisConfig::default())
        .unwrap()
        .analyze_workbook(builder.build())
        .unwrap();

    let sheet = &result.sheet_summaries[0];
    assert_eq!(sheet.total_cells, 9);
    assert_eq!(sheet.populated_cells, 3);
    assert_eq!(sheet.empty_cells, 6);
    assert_eq!(sheet.formula_cells, 1);
    assert_eq!(sheet.error_cells, 1);
    assert_eq!(sheet.issues.len(), 2);
    assert!(result.sheet_summaries[1].is_empty);
    assert!(!result.parse_warnings.is_empty());
}

#[test]
fn test_json_keys_and_round_trip() {
    let dir = TempDir::new().unwrap();
    let result = Analyzer::new(AnalysisConfig::default())
        .unwrap()
        .analyze_path(&write_model(dir.path()))
        .unwrap();

    let value = result.to_json_value().unwrap();
    let order = value["evaluation_order"].as_array().unwrap();
    assert_eq!(order.len(), result.evaluation_order.len());
    assert_eq!(value["metric_matches"][0]["confidence"], "certain");
    assert!(value["dependency_graph"]["nodes"].is_array());
    assert!(value["dependency_graph"]["edges"].is_array());

    let json = result.to_json_pretty().unwrap();
    let back = AnalysisResult::from_json_str(&json).unwrap();
    assert_eq!(back, result);
    assert_eq!(
        back.dependency_graph.topological_order().unwrap(),
        result.evaluation_order
    );
}

#[test]
fn test_report_file_round_trip() {
    let dir = TempDir::new().unwrap();
    let result = Analyzer::new(AnalysisConfig::default())
        .unwrap()
        .analyze_path(&write_model(dir.path()))
        .unwrap();

    let reports = dir.path().join("reports");
    assert_eq!(
        default_report_path(&result, &reports),
        reports.join("analysis_model.json")
    );
    let path = write_report(&result, None, &reports).unwrap();
    let back = AnalysisResult::from_json_str(&std::fs::read_to_string(path).unwrap()).unwrap();
    assert_eq!(back.metric_matches, result.metric_matches);
}

#[test]
fn test_range_cap_applies_through_defined_names() {
    let mut builder = WorkbookBuilder::new("capped.xlsx");
    for row in 1..=3 {
        builder.set_value("Data", row, 1, num(row as f64));
    }
    builder.define_name("Block", "Data!$A$1:$J$10");
    builder
        .set_formula("Calc", 1, 1, "=SUM(Block)", num(6.0))
        .set_formula("Calc", 2, 1, "=SUM(Data!A1:J10)", num(6.0));
    let config = AnalysisConfig {
        max_range_cells: 10,
        ..AnalysisConfig::default()
    };
    let result = Analyzer::new(config)
        .unwrap()
        .analyze_workbook(builder.build())
        .unwrap();

    let graph = &result.dependency_graph;
    let via_name = graph.precedents(&CellAddress::new("Calc", 1, 1));
    assert_eq!(via_name.len(), 3);
    assert_eq!(via_name, graph.precedents(&CellAddress::new("Calc", 2, 1)));
    let clamped = result
        .parse_warnings
        .iter()
        .filter(|w| w.kind == ParseWarningKind::RangeClamped)
        .count();
    assert_eq!(clamped, 2);
}
