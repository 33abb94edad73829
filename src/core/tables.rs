//! Table region detection
//!
//! Declared table objects are taken as-is. Beyond those, a block is a table
//! when a row holds a run of text headers and the row below is mostly values;
//! the body extends down to the first row that is empty across the header span.

use crate::config::TableSettings;
use crate::types::{CellRange, CellValue};
use crate::workbook::{Sheet, Workbook};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableSource {
    /// A table object declared in the file
    Explicit,
    /// Inferred from the cell layout
    Heuristic,
}

/// A rectangular tabular view of a sheet: one header row plus body rows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRegion {
    pub sheet: String,
    pub name: Option<String>,
    pub source: TableSource,
    pub range: CellRange,
    pub header: Vec<String>,
    pub body: Vec<Vec<CellValue>>,
}

impl TableRegion {
    pub fn column_count(&self) -> usize {
        self.header.len()
    }

    pub fn body_rows(&self) -> usize {
        self.body.len()
    }

    /// Values of one body column, looked up by header text
    pub fn column(&self, header: &str) -> Option<Vec<&CellValue>> {
        let index = self.header.iter().position(|h| h.eq_ignore_ascii_case(header))?;
        Some(self.body.iter().filter_map(|row| row.get(index)).collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeReason {
    /// A body row is only partly filled across the header span
    IrregularLayout,
    /// The candidate runs into a declared table
    OverlapsExplicit,
    /// The candidate runs into a region accepted earlier
    OverlapsRegion,
    /// The candidate covers merged cells
    MergedCells,
}

/// A candidate block that was looked at and rejected
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableNotice {
    pub sheet: String,
    pub range: CellRange,
    pub reason: NoticeReason,
    pub detail: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableDetection {
    pub regions: Vec<TableRegion>,
    pub notices: Vec<TableNotice>,
}

/// Detect the table regions of every sheet, declared tables first
pub fn detect_tables(workbook: &Workbook, settings: &TableSettings) -> TableDetection {
    let mut detection = TableDetection::default();

    for sheet in workbook.sheets() {
        let explicit = explicit_regions(workbook, sheet, &mut detection.notices);
        let mut regions = explicit.clone();
        if settings.detect_heuristic {
            let found = heuristic_regions(sheet, settings, &explicit, &mut detection.notices);
            regions.extend(found);
        }
        regions.sort_by_key(|r| (r.range.start_row, r.range.start_column));
        debug!(sheet = sheet.name(), regions = regions.len(), "tables detected");
        detection.regions.extend(regions);
    }

    let order: Vec<&str> = workbook.sheet_names();
    let position = |sheet: &str| order.iter().position(|s| *s == sheet).unwrap_or(usize::MAX);
    detection
        .notices
        .sort_by_key(|n| (position(&n.sheet), n.range.start_row, n.range.start_column));

    info!(
        regions = detection.regions.len(),
        notices = detection.notices.len(),
        "table detection finished"
    );
    detection
}

fn header_text(value: &CellValue) -> String {
    value.to_string().trim().to_string()
}

fn read_body(sheet: &Sheet, range: &CellRange) -> Vec<Vec<CellValue>> {
    (range.start_row + 1..=range.end_row)
        .map(|row| {
            (range.start_column..=range.end_column)
                .map(|column| sheet.value(row, column).clone())
                .collect()
        })
        .collect()
}

fn explicit_regions(
    workbook: &Workbook,
    sheet: &Sheet,
    notices: &mut Vec<TableNotice>,
) -> Vec<TableRegion> {
    let mut regions: Vec<TableRegion> = Vec::new();

    for table in workbook.tables_on(sheet.name()) {
        let range = CellRange {
            sheet: sheet.name().to_string(),
            ..table.range.clone()
        };
        if let Some(other) = regions.iter().find(|r| r.range.overlaps(&range)) {
            notices.push(TableNotice {
                sheet: sheet.name().to_string(),
                range: range.clone(),
                reason: NoticeReason::OverlapsRegion,
                detail: format!(
                    "Table '{}' overlaps table '{}'",
                    table.name,
                    other.name.as_deref().unwrap_or_default()
                ),
            });
            continue;
        }

        let header = if table.columns.len() == range.width() as usize {
            table.columns.clone()
        } else {
            (range.start_column..=range.end_column)
                .map(|column| header_text(sheet.value(range.start_row, column)))
                .collect()
        };

        regions.push(TableRegion {
            sheet: sheet.name().to_string(),
            name: Some(table.name.clone()),
            source: TableSource::Explicit,
            body: read_body(sheet, &range),
            range,
            header,
        });
    }

    regions
}

/// Maximal runs of consecutive text cells on one row, as (first, last) columns
fn text_runs(sheet: &Sheet, row: u32, used: &CellRange) -> Vec<(u32, u32)> {
    let mut runs = Vec::new();
    let mut start: Option<u32> = None;
    for column in used.start_column..=used.end_column + 1 {
        let is_text = column <= used.end_column && sheet.value(row, column).is_text();
        match (is_text, start) {
            (true, None) => start = Some(column),
            (false, Some(first)) => {
                runs.push((first, column - 1));
                start = None;
            }
            _ => {}
        }
    }
    runs
}

fn filled_count(sheet: &Sheet, row: u32, (first, last): (u32, u32)) -> u32 {
    (first..=last)
        .filter(|&column| !sheet.value(row, column).is_empty())
        .count() as u32
}

/// More than half of the span holds non-text values
fn mostly_values(sheet: &Sheet, row: u32, (first, last): (u32, u32)) -> bool {
    let width = last - first + 1;
    let values = (first..=last)
        .filter(|&column| {
            let value = sheet.value(row, column);
            !value.is_empty() && !value.is_text()
        })
        .count() as u32;
    values * 2 > width
}

fn heuristic_regions(
    sheet: &Sheet,
    settings: &TableSettings,
    explicit: &[TableRegion],
    notices: &mut Vec<TableNotice>,
) -> Vec<TableRegion> {
    let Some(used) = sheet.used_range().cloned() else {
        return Vec::new();
    };
    let name = sheet.name().to_string();
    let mut accepted: Vec<TableRegion> = Vec::new();

    for row in used.start_row..used.end_row {
        for span in text_runs(sheet, row, &used) {
            let width = span.1 - span.0 + 1;
            if (width as usize) < settings.min_header_columns {
                continue;
            }
            let header_range = CellRange::new(name.clone(), (row, span.0), (row, span.1));
            // Header rows sitting inside a known table belong to that table
            if explicit.iter().chain(accepted.iter()).any(|r| r.range.overlaps(&header_range)) {
                continue;
            }
            if !mostly_values(sheet, row + 1, span) {
                continue;
            }

            let mut last_row = row;
            let mut irregular_at = None;
            for body_row in row + 1..=used.end_row {
                match filled_count(sheet, body_row, span) {
                    0 => break,
                    n if n < width => {
                        irregular_at = Some(body_row);
                        break;
                    }
                    _ => last_row = body_row,
                }
            }

            if let Some(bad_row) = irregular_at {
                notices.push(TableNotice {
                    sheet: name.clone(),
                    range: CellRange::new(name.clone(), (row, span.0), (bad_row, span.1)),
                    reason: NoticeReason::IrregularLayout,
                    detail: format!("Row {} is only partly filled", bad_row),
                });
                continue;
            }

            let range = CellRange::new(name.clone(), (row, span.0), (last_row, span.1));
            let rejection = if let Some(table) = explicit.iter().find(|r| r.range.overlaps(&range)) {
                Some((
                    NoticeReason::OverlapsExplicit,
                    format!(
                        "Runs into table '{}'",
                        table.name.as_deref().unwrap_or_default()
                    ),
                ))
            } else if let Some(region) = accepted.iter().find(|r| r.range.overlaps(&range)) {
                Some((
                    NoticeReason::OverlapsRegion,
                    format!("Runs into the block at {}", region.range.a1()),
                ))
            } else {
                sheet
                    .merged_regions()
                    .iter()
                    .find(|m| m.overlaps(&range))
                    .map(|m| (NoticeReason::MergedCells, format!("Covers merged cells {}", m.a1())))
            };

            if let Some((reason, detail)) = rejection {
                notices.push(TableNotice {
                    sheet: name.clone(),
                    range,
                    reason,
                    detail,
                });
                continue;
            }

            let header = (span.0..=span.1)
                .map(|column| header_text(sheet.value(row, column)))
                .collect();
            accepted.push(TableRegion {
                sheet: name.clone(),
                name: None,
                source: TableSource::Heuristic,
                body: read_body(sheet, &range),
                range,
                header,
            });
        }
    }

    accepted
}
