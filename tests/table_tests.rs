//! Table region detection

mod common;

use common::{num, text};
use pretty_assertions::assert_eq;
use royalbit_sheetlens::config::TableSettings;
use royalbit_sheetlens::core::tables::NoticeReason;
use royalbit_sheetlens::core::{detect_tables, TableSource};
use royalbit_sheetlens::types::{CellRange, DeclaredTable};
use royalbit_sheetlens::workbook::WorkbookBuilder;

fn block(builder: &mut WorkbookBuilder, sheet: &str, top: u32, left: u32, rows: u32) {
    builder
        .set_value(sheet, top, left, text("Period"))
        .set_value(sheet, top, left + 1, text("Opening"))
        .set_value(sheet, top, left + 2, text("Closing"));
    for i in 1..=rows {
        builder
            .set_value(sheet, top + i, left, num(i as f64))
            .set_value(sheet, top + i, left + 1, num(100.0 * i as f64))
            .set_value(sheet, top + i, left + 2, num(90.0 * i as f64));
    }
}

#[test]
fn test_two_blocks_on_one_sheet() {
    let mut builder = WorkbookBuilder::new("blocks");
    block(&mut builder, "Debt", 1, 1, 3);
    block(&mut builder, "Debt", 8, 2, 2);
    let detection = detect_tables(&builder.build(), &TableSettings::default());

    let ranges: Vec<CellRange> = detection.regions.iter().map(|r| r.range.clone()).collect();
    assert_eq!(
        ranges,
        vec![
            CellRange::new("Debt", (1, 1), (4, 3)),
            CellRange::new("Debt", (8, 2), (10, 4)),
        ]
    );
    assert!(detection.regions.iter().all(|r| r.source == TableSource::Heuristic));
    assert_eq!(detection.regions[0].header, vec!["Period", "Opening", "Closing"]);
    assert_eq!(
        detection.regions[0].column("Closing").unwrap(),
        vec![&num(90.0), &num(180.0), &num(270.0)]
    );
    assert!(detection.notices.is_empty());
}

#[test]
fn test_declared_table_takes_precedence() {
    let mut builder = WorkbookBuilder::new("declared");
    block(&mut builder, "Debt", 1, 1, 3);
    builder.declare_table(DeclaredTable {
        name: "Tranche".to_string(),
        range: CellRange::new("Debt", (1, 1), (4, 3)),
        columns: vec!["Period".to_string(), "Opening".to_string(), "Closing".to_string()],
    });
    let detection = detect_tables(&builder.build(), &TableSettings::default());

    assert_eq!(detection.regions.len(), 1);
    assert_eq!(detection.regions[0].source, TableSource::Explicit);
    assert_eq!(detection.regions[0].name.as_deref(), Some("Tranche"));
    assert_eq!(detection.regions[0].body_rows(), 3);
}

#[test]
fn test_partly_filled_row_is_rejected() {
    let mut builder = WorkbookBuilder::new("ragged");
    block(&mut builder, "Debt", 1, 1, 3);
    builder.set_value("Debt", 5, 1, num(4.0));
    let detection = detect_tables(&builder.build(), &TableSettings::default());

    assert!(detection.regions.is_empty());
    assert_eq!(detection.notices.len(), 1);
    assert_eq!(detection.notices[0].reason, NoticeReason::IrregularLayout);
    assert_eq!(detection.notices[0].range, CellRange::new("Debt", (1, 1), (5, 3)));
}

#[test]
fn test_merged_cells_block_detection() {
    let mut builder = WorkbookBuilder::new("merged");
    block(&mut builder, "Debt", 1, 1, 3);
    builder.add_merged_region(CellRange::new("Debt", (3, 2), (3, 3)));
    let detection = detect_tables(&builder.build(), &TableSettings::default());

    assert!(detection.regions.is_empty());
    assert_eq!(detection.notices[0].reason, NoticeReason::MergedCells);
}

#[test]
fn test_text_body_is_not_a_table() {
    let mut builder = WorkbookBuilder::new("notes");
    builder
        .set_value("Notes", 1, 1, text("Assumption"))
        .set_value("Notes", 1, 2, text("Source"))
        .set_value("Notes", 2, 1, text("Inflation"))
        .set_value("Notes", 2, 2, text("Central bank"));
    let detection = detect_tables(&builder.build(), &TableSettings::default());
    assert!(detection.regions.is_empty());
}

#[test]
fn test_settings_control_detection() {
    let mut builder = WorkbookBuilder::new("settings");
    block(&mut builder, "Debt", 1, 1, 2);
    let workbook = builder.build();

    let off = TableSettings {
        detect_heuristic: false,
        ..TableSettings::default()
    };
    assert!(detect_tables(&workbook, &off).regions.is_empty());

    let wide = TableSettings {
        min_header_columns: 4,
        ..TableSettings::default()
    };
    assert!(detect_tables(&workbook, &wide).regions.is_empty());
}
