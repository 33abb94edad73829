//! Excel importer implementation - spreadsheet file → Workbook model

use super::styles::read_annotations;
use crate::error::{AnalyzerError, AnalyzerResult};
use crate::types::{CellRange, CellValue, DeclaredTable};
use crate::workbook::{Workbook, WorkbookBuilder};
use calamine::{open_workbook_auto, open_workbook_auto_from_rs, Data, Range, Reader, Sheets};
use std::fs::File;
use std::io::{Cursor, Read, Seek};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Spreadsheet container formats the importer understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkbookFormat {
    /// `.xlsx` / `.xlsm`: values, formulas, names, tables, merged cells
    Xlsx,
    /// `.xlsb`: values, formulas, names
    Xlsb,
    /// `.xls`: values, formulas, names
    Xls,
    /// `.ods`: values, formulas, names
    Ods,
}

impl WorkbookFormat {
    pub fn from_path(path: &Path) -> AnalyzerResult<Self> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match extension.as_str() {
            "xlsx" | "xlsm" | "xltx" | "xltm" | "xlam" => Ok(WorkbookFormat::Xlsx),
            "xlsb" => Ok(WorkbookFormat::Xlsb),
            "xls" | "xla" => Ok(WorkbookFormat::Xls),
            "ods" => Ok(WorkbookFormat::Ods),
            _ => Err(AnalyzerError::Unsupported(format!(
                "'{}' (expected .xlsx, .xlsm, .xlsb, .xls or .ods)",
                path.display()
            ))),
        }
    }
}

/// Reads a spreadsheet file into an immutable [`Workbook`]
pub struct ExcelImporter {
    path: PathBuf,
}

impl ExcelImporter {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn import(&self) -> AnalyzerResult<Workbook> {
        let format = WorkbookFormat::from_path(&self.path)?;
        // Surface a missing file as an IO error rather than a parse failure
        std::fs::metadata(&self.path)?;

        let mut sheets = open_workbook_auto(&self.path).map_err(|e| {
            AnalyzerError::Load(format!("Failed to open '{}': {}", self.path.display(), e))
        })?;
        let source = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string());

        let package = match format {
            WorkbookFormat::Xlsx => File::open(&self.path).ok(),
            _ => None,
        };
        read_workbook(&mut sheets, &source, package)
    }
}

pub fn load_path(path: &Path) -> AnalyzerResult<Workbook> {
    ExcelImporter::new(path).import()
}

/// Load an in-memory file; the container format is sniffed from the content
pub fn load_bytes(bytes: &[u8], name: &str) -> AnalyzerResult<Workbook> {
    let mut sheets = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
        .map_err(|e| AnalyzerError::Load(format!("Failed to open '{}': {}", name, e)))?;
    read_workbook(&mut sheets, name, Some(Cursor::new(bytes)))
}

/// `package` is a second handle on the file, used for the formatting and
/// notes calamine does not read. Ignored for non-xlsx containers.
fn read_workbook<RS: Read + Seek, P: Read + Seek>(
    sheets: &mut Sheets<RS>,
    source: &str,
    package: Option<P>,
) -> AnalyzerResult<Workbook> {
    let mut builder = WorkbookBuilder::new(source);
    let sheet_names: Vec<String> = sheets.sheet_names().to_vec();

    // Table lookups on an Xlsx whose tables failed to load would panic
    let tables_loaded = match &mut *sheets {
        Sheets::Xlsx(xlsx) => match xlsx.load_tables() {
            Ok(()) => true,
            Err(e) => {
                warn!(source, error = %e, "table definitions could not be read");
                false
            }
        },
        _ => false,
    };

    let mut cell_total = 0usize;
    for sheet_name in &sheet_names {
        builder.add_sheet(sheet_name);

        let range = sheets
            .worksheet_range(sheet_name)
            .map_err(|e| AnalyzerError::Load(format!("Failed to read sheet '{}': {}", sheet_name, e)))?;
        cell_total += read_values(&mut builder, sheet_name, &range);

        match sheets.worksheet_formula(sheet_name) {
            Ok(formulas) => read_formulas(&mut builder, sheet_name, &formulas, &range),
            Err(e) => warn!(sheet = %sheet_name, error = %e, "formulas unavailable"),
        }

        if let Sheets::Xlsx(xlsx) = &mut *sheets {
            read_merged_regions(&mut builder, sheet_name, xlsx);
            if tables_loaded {
                read_tables(&mut builder, sheet_name, xlsx);
            }
        }
    }

    if let (Sheets::Xlsx(_), Some(package)) = (&*sheets, package) {
        apply_annotations(&mut builder, package, &sheet_names, source);
    }

    for (name, refers_to) in sheets.defined_names().to_vec() {
        // Built-in names (print areas, filters) are not model inputs
        if name.starts_with("_xlnm.") {
            continue;
        }
        builder.define_name(&name, &refers_to);
    }

    let workbook = builder.build();
    info!(
        source,
        sheets = sheet_names.len(),
        cells = cell_total,
        formulas = workbook.formula_cells().count(),
        names = workbook.named_ranges().count(),
        tables = workbook.tables().len(),
        "workbook loaded"
    );
    Ok(workbook)
}

fn apply_annotations<P: Read + Seek>(
    builder: &mut WorkbookBuilder,
    package: P,
    sheet_names: &[String],
    source: &str,
) {
    let annotations = match read_annotations(package, sheet_names) {
        Ok(annotations) => annotations,
        Err(e) => {
            warn!(source, error = %e, "cell formatting and notes could not be read");
            return;
        }
    };
    for (sheet, found) in annotations {
        for ((row, column), style) in found.styles {
            builder.set_style(&sheet, row, column, style);
        }
        for ((row, column), text) in found.comments {
            builder.set_comment(&sheet, row, column, text);
        }
    }
}

/// Copy literal values; returns the number of populated cells
fn read_values(builder: &mut WorkbookBuilder, sheet: &str, range: &Range<Data>) -> usize {
    let (row_offset, col_offset) = range.start().unwrap_or((0, 0));
    let mut count = 0;
    for (row, col, data) in range.used_cells() {
        let value = convert_data(data);
        if value == CellValue::Empty {
            continue;
        }
        builder.set_value(
            sheet,
            row_offset + row as u32 + 1,
            col_offset + col as u32 + 1,
            value,
        );
        count += 1;
    }
    debug!(sheet, cells = count, "values read");
    count
}

fn read_formulas(builder: &mut WorkbookBuilder, sheet: &str, formulas: &Range<String>, values: &Range<Data>) {
    // Formula range may start at a different offset than the value range
    let (row_offset, col_offset) = formulas.start().unwrap_or((0, 0));
    let mut count = 0;
    for (row, col, formula) in formulas.cells() {
        if formula.trim().is_empty() {
            continue;
        }
        let position = (row_offset + row as u32, col_offset + col as u32);
        let cached = values
            .get_value(position)
            .map(convert_data)
            .unwrap_or_default();
        builder.set_formula(sheet, position.0 + 1, position.1 + 1, formula, cached);
        count += 1;
    }
    debug!(sheet, formulas = count, "formulas read");
}

fn read_merged_regions<RS: Read + Seek>(
    builder: &mut WorkbookBuilder,
    sheet: &str,
    xlsx: &mut calamine::Xlsx<RS>,
) {
    let regions = match xlsx.worksheet_merge_cells(sheet) {
        Some(Ok(regions)) => regions,
        Some(Err(e)) => {
            warn!(sheet, error = %e, "merged cells could not be read");
            return;
        }
        None => return,
    };
    for region in regions {
        builder.add_merged_region(CellRange::new(
            sheet,
            (region.start.0 + 1, region.start.1 + 1),
            (region.end.0 + 1, region.end.1 + 1),
        ));
    }
}

fn read_tables<RS: Read + Seek>(builder: &mut WorkbookBuilder, sheet: &str, xlsx: &mut calamine::Xlsx<RS>) {
    let names: Vec<String> = xlsx
        .table_names_in_sheet(sheet)
        .into_iter()
        .cloned()
        .collect();

    for name in names {
        let table = match xlsx.table_by_name(&name) {
            Ok(table) => table,
            Err(e) => {
                warn!(sheet, table = %name, error = %e, "table could not be read");
                continue;
            }
        };
        let data = table.data();
        let (Some(start), Some(end)) = (data.start(), data.end()) else {
            debug!(sheet, table = %name, "table without body rows skipped");
            continue;
        };
        // The data range starts below the header row: the 0-based data row
        // equals the 1-based header row
        let header_row = start.0;
        if header_row == 0 {
            debug!(sheet, table = %name, "table without header row skipped");
            continue;
        }
        builder.declare_table(DeclaredTable {
            name: table.name().to_string(),
            range: CellRange::new(
                table.sheet_name(),
                (header_row, start.1 + 1),
                (end.0 + 1, end.1 + 1),
            ),
            columns: table.columns().to_vec(),
        });
    }
}

/// Map a calamine cell to a typed value. Dates keep their serial number.
pub fn convert_data(data: &Data) -> CellValue {
    match data {
        Data::Int(i) => CellValue::Number(*i as f64),
        Data::Float(f) => CellValue::Number(*f),
        Data::String(s) if s.is_empty() => CellValue::Empty,
        Data::String(s) => CellValue::Text(s.clone()),
        Data::Bool(b) => CellValue::Boolean(*b),
        Data::DateTime(dt) => CellValue::Number(dt.as_f64()),
        Data::DateTimeIso(s) | Data::DurationIso(s) => CellValue::Text(s.clone()),
        Data::Error(e) => CellValue::Error(e.to_string()),
        Data::Empty => CellValue::Empty,
    }
}
