//! In-memory workbook model
//!
//! A [`Workbook`] is assembled once through [`WorkbookBuilder`] and is read-only
//! afterwards. Every derived view (dependency graph, table regions, metric
//! matches) borrows it without mutation.

use crate::core::reference::{extract_references, Reference, DEFAULT_MAX_RANGE_CELLS};
use crate::types::{
    CellAddress, CellRange, CellRecord, CellValue, DeclaredTable, NamedRange, StyleHints,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

static EMPTY: CellValue = CellValue::Empty;

//==============================================================================
// Sheet
//==============================================================================

/// One worksheet: populated cells plus layout hints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "SheetData", into = "SheetData")]
pub struct Sheet {
    name: String,
    cells: HashMap<(u32, u32), CellRecord>,
    /// Keys of `cells` in row-major order
    order: Vec<(u32, u32)>,
    merged_regions: Vec<CellRange>,
    used_range: Option<CellRange>,
}

impl Sheet {
    fn assemble(name: String, records: Vec<CellRecord>, mut merged_regions: Vec<CellRange>) -> Self {
        let mut cells = HashMap::with_capacity(records.len());
        for record in records {
            cells.insert((record.address.row, record.address.column), record);
        }
        let mut order: Vec<(u32, u32)> = cells.keys().copied().collect();
        order.sort_unstable();

        let used_range = if order.is_empty() {
            None
        } else {
            let (mut min_row, mut min_col, mut max_row, mut max_col) = (u32::MAX, u32::MAX, 0, 0);
            for &(row, column) in &order {
                min_row = min_row.min(row);
                max_row = max_row.max(row);
                min_col = min_col.min(column);
                max_col = max_col.max(column);
            }
            Some(CellRange::new(name.clone(), (min_row, min_col), (max_row, max_col)))
        };
        merged_regions.sort();

        Self {
            name,
            cells,
            order,
            merged_regions,
            used_range,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// All populated cells in row-major order
    pub fn cells(&self) -> impl Iterator<Item = &CellRecord> + '_ {
        self.order.iter().filter_map(move |key| self.cells.get(key))
    }

    pub fn cell(&self, row: u32, column: u32) -> Option<&CellRecord> {
        self.cells.get(&(row, column))
    }

    /// Value at a position; unpopulated positions read as `Empty`
    pub fn value(&self, row: u32, column: u32) -> &CellValue {
        self.cell(row, column).map(|c| &c.value).unwrap_or(&EMPTY)
    }

    /// Bounding rectangle of populated cells
    pub fn used_range(&self) -> Option<&CellRange> {
        self.used_range.as_ref()
    }

    pub fn merged_regions(&self) -> &[CellRange] {
        &self.merged_regions
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SheetData {
    name: String,
    cells: Vec<CellRecord>,
    #[serde(default)]
    merged_regions: Vec<CellRange>,
}

impl From<SheetData> for Sheet {
    fn from(data: SheetData) -> Self {
        Sheet::assemble(data.name, data.cells, data.merged_regions)
    }
}

impl From<Sheet> for SheetData {
    fn from(sheet: Sheet) -> Self {
        let Sheet {
            name,
            mut cells,
            order,
            merged_regions,
            ..
        } = sheet;
        let cells = order.iter().filter_map(|key| cells.remove(key)).collect();
        SheetData {
            name,
            cells,
            merged_regions,
        }
    }
}

//==============================================================================
// Workbook
//==============================================================================

/// Sheets, named ranges and declared tables of one analyzed file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "WorkbookData", into = "WorkbookData")]
pub struct Workbook {
    source: String,
    sheets: Vec<Sheet>,
    /// Lower-cased sheet name → index into `sheets`
    sheet_index: HashMap<String, usize>,
    /// Upper-cased name → range
    named_ranges: BTreeMap<String, NamedRange>,
    tables: Vec<DeclaredTable>,
}

impl Workbook {
    fn assemble(
        source: String,
        sheets: Vec<Sheet>,
        named_ranges: Vec<NamedRange>,
        tables: Vec<DeclaredTable>,
    ) -> Self {
        let sheet_index = sheets
            .iter()
            .enumerate()
            .map(|(i, s)| (s.name.to_lowercase(), i))
            .collect();
        let named_ranges = named_ranges
            .into_iter()
            .map(|n| (n.name.to_uppercase(), n))
            .collect();
        Self {
            source,
            sheets,
            sheet_index,
            named_ranges,
            tables,
        }
    }

    /// Path or label the workbook was loaded from
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Sheets in workbook order
    pub fn sheets(&self) -> &[Sheet] {
        &self.sheets
    }

    pub fn sheet_names(&self) -> Vec<&str> {
        self.sheets.iter().map(|s| s.name.as_str()).collect()
    }

    /// Case-insensitive sheet lookup
    pub fn sheet(&self, name: &str) -> Option<&Sheet> {
        self.sheet_index
            .get(&name.to_lowercase())
            .map(|&i| &self.sheets[i])
    }

    /// Spelling of a sheet name as stored in the workbook
    pub fn canonical_sheet_name(&self, name: &str) -> Option<&str> {
        self.sheet(name).map(|s| s.name.as_str())
    }

    /// Constant-time cell lookup
    pub fn cell(&self, address: &CellAddress) -> Option<&CellRecord> {
        self.sheet(&address.sheet)?.cell(address.row, address.column)
    }

    pub fn value(&self, address: &CellAddress) -> &CellValue {
        self.cell(address).map(|c| &c.value).unwrap_or(&EMPTY)
    }

    /// Case-insensitive named range lookup
    pub fn named_range(&self, name: &str) -> Option<&NamedRange> {
        self.named_ranges.get(&name.to_uppercase())
    }

    pub fn named_ranges(&self) -> impl Iterator<Item = &NamedRange> + '_ {
        self.named_ranges.values()
    }

    pub fn tables(&self) -> &[DeclaredTable] {
        &self.tables
    }

    /// Case-insensitive declared table lookup
    pub fn table(&self, name: &str) -> Option<&DeclaredTable> {
        self.tables.iter().find(|t| t.name.eq_ignore_ascii_case(name))
    }

    pub fn tables_on<'a>(&'a self, sheet: &'a str) -> impl Iterator<Item = &'a DeclaredTable> + 'a {
        self.tables.iter().filter(move |t| t.range.sheet == sheet)
    }

    /// Every populated cell, sheet by sheet, row-major
    pub fn cells(&self) -> impl Iterator<Item = &CellRecord> + '_ {
        self.sheets.iter().flat_map(|s| s.cells())
    }

    /// Cells carrying formula text, in workbook order
    pub fn formula_cells(&self) -> impl Iterator<Item = &CellRecord> + '_ {
        self.cells().filter(|c| c.has_formula())
    }

    pub fn cell_count(&self) -> usize {
        self.sheets.iter().map(Sheet::len).sum()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WorkbookData {
    source: String,
    sheets: Vec<Sheet>,
    #[serde(default)]
    named_ranges: Vec<NamedRange>,
    #[serde(default)]
    tables: Vec<DeclaredTable>,
}

impl From<WorkbookData> for Workbook {
    fn from(data: WorkbookData) -> Self {
        Workbook::assemble(data.source, data.sheets, data.named_ranges, data.tables)
    }
}

impl From<Workbook> for WorkbookData {
    fn from(workbook: Workbook) -> Self {
        WorkbookData {
            source: workbook.source,
            sheets: workbook.sheets,
            named_ranges: workbook.named_ranges.into_values().collect(),
            tables: workbook.tables,
        }
    }
}

//==============================================================================
// Builder
//==============================================================================

#[derive(Debug, Default)]
struct PendingSheet {
    name: String,
    records: BTreeMap<(u32, u32), CellRecord>,
    merged_regions: Vec<CellRange>,
    styles: HashMap<(u32, u32), StyleHints>,
    comments: HashMap<(u32, u32), String>,
}

impl PendingSheet {
    /// Attach formatting and notes to populated cells; the rest is dropped
    fn into_sheet(mut self) -> Sheet {
        for (key, record) in self.records.iter_mut() {
            record.style = self.styles.remove(key).filter(|s| !s.is_plain());
            record.comment = self.comments.remove(key);
        }
        if !self.styles.is_empty() || !self.comments.is_empty() {
            debug!(
                sheet = %self.name,
                styles = self.styles.len(),
                comments = self.comments.len(),
                "annotations on empty cells ignored"
            );
        }
        Sheet::assemble(self.name, self.records.into_values().collect(), self.merged_regions)
    }
}

/// Collects raw sheet data during load and produces an immutable [`Workbook`]
#[derive(Debug, Default)]
pub struct WorkbookBuilder {
    source: String,
    sheets: Vec<PendingSheet>,
    defined_names: Vec<(String, String)>,
    named_ranges: Vec<NamedRange>,
    tables: Vec<DeclaredTable>,
}

impl WorkbookBuilder {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            ..Self::default()
        }
    }

    fn sheet_mut(&mut self, name: &str) -> &mut PendingSheet {
        let position = self.sheets.iter().position(|s| s.name == name);
        let index = match position {
            Some(index) => index,
            None => {
                self.sheets.push(PendingSheet {
                    name: name.to_string(),
                    ..PendingSheet::default()
                });
                self.sheets.len() - 1
            }
        };
        &mut self.sheets[index]
    }

    /// Register a sheet; sheets keep the order in which they are first mentioned
    pub fn add_sheet(&mut self, name: &str) -> &mut Self {
        self.sheet_mut(name);
        self
    }

    /// Store a literal value. Empty values without formula are not recorded.
    pub fn set_value(&mut self, sheet: &str, row: u32, column: u32, value: CellValue) -> &mut Self {
        self.set_cell(sheet, row, column, value, None)
    }

    /// Store a formula and its cached value
    pub fn set_formula(
        &mut self,
        sheet: &str,
        row: u32,
        column: u32,
        formula: &str,
        cached: CellValue,
    ) -> &mut Self {
        self.set_cell(sheet, row, column, cached, Some(formula.to_string()))
    }

    /// Store a cell. A later call for the same position keeps an existing formula
    /// when the new call carries none.
    pub fn set_cell(
        &mut self,
        sheet: &str,
        row: u32,
        column: u32,
        value: CellValue,
        formula: Option<String>,
    ) -> &mut Self {
        let pending = self.sheet_mut(sheet);
        let previous_formula = pending
            .records
            .get(&(row, column))
            .and_then(|r| r.formula.clone());
        let formula = formula.or(previous_formula);
        let record = CellRecord::new(CellAddress::new(sheet, row, column), value, formula);
        if record.value == CellValue::Empty && record.formula.is_none() {
            pending.records.remove(&(row, column));
        } else {
            pending.records.insert((row, column), record);
        }
        self
    }

    /// Formatting of a cell; kept only if the cell ends up populated
    pub fn set_style(&mut self, sheet: &str, row: u32, column: u32, style: StyleHints) -> &mut Self {
        self.sheet_mut(sheet).styles.insert((row, column), style);
        self
    }

    /// Note text of a cell; kept only if the cell ends up populated
    pub fn set_comment(&mut self, sheet: &str, row: u32, column: u32, text: impl Into<String>) -> &mut Self {
        self.sheet_mut(sheet).comments.insert((row, column), text.into());
        self
    }

    pub fn add_merged_region(&mut self, range: CellRange) -> &mut Self {
        let sheet = range.sheet.clone();
        self.sheet_mut(&sheet).merged_regions.push(range);
        self
    }

    /// Register a name with its definition text (`Inputs!$B$2:$B$6`);
    /// targets are resolved in [`WorkbookBuilder::build`].
    pub fn define_name(&mut self, name: &str, refers_to: &str) -> &mut Self {
        self.defined_names
            .push((name.trim().to_string(), refers_to.trim().to_string()));
        self
    }

    /// Register an already resolved named range
    pub fn add_named_range(&mut self, range: NamedRange) -> &mut Self {
        self.named_ranges.push(range);
        self
    }

    pub fn declare_table(&mut self, table: DeclaredTable) -> &mut Self {
        self.tables.push(table);
        self
    }

    pub fn build(self) -> Workbook {
        let sheets: Vec<Sheet> = self
            .sheets
            .into_iter()
            .map(PendingSheet::into_sheet)
            .collect();

        let mut workbook = Workbook::assemble(self.source, sheets, self.named_ranges, self.tables);

        for (name, refers_to) in self.defined_names {
            let (addresses, constant) = resolve_definition(&workbook, &refers_to);
            debug!(name = %name, targets = addresses.len(), constant, "defined name");
            workbook.named_ranges.insert(
                name.to_uppercase(),
                NamedRange {
                    name,
                    refers_to,
                    addresses,
                    constant,
                },
            );
        }

        workbook
    }
}

/// Expand a defined name's target text into cell addresses. The flag is set
/// for constants: definitions without any reference and without problems.
fn resolve_definition(workbook: &Workbook, refers_to: &str) -> (Vec<CellAddress>, bool) {
    let default_sheet = workbook.sheets.first().map(|s| s.name.clone()).unwrap_or_default();
    let parsed = extract_references(refers_to, &default_sheet);
    let constant = parsed.references.is_empty() && parsed.issues.is_empty();
    let mut addresses = Vec::new();

    let canonical = |sheet: &str| {
        workbook
            .canonical_sheet_name(sheet)
            .unwrap_or(sheet)
            .to_string()
    };
    let within_used = |range: &CellRange| {
        workbook
            .sheet(&range.sheet)
            .and_then(Sheet::used_range)
            .and_then(|used| used.intersect(range))
    };
    let bounded = |range: CellRange, copies: u64| -> Vec<CellAddress> {
        if range.cell_count().saturating_mul(copies) <= DEFAULT_MAX_RANGE_CELLS {
            range.cells().collect()
        } else {
            within_used(&range).map(|block| block.cells().collect()).unwrap_or_default()
        }
    };

    for extracted in parsed.references {
        match extracted.reference {
            Reference::Cell(address) => {
                addresses.push(CellAddress::new(canonical(&address.sheet), address.row, address.column));
            }
            Reference::Range(range) => {
                let range = CellRange {
                    sheet: canonical(&range.sheet),
                    ..range
                };
                addresses.extend(bounded(range, 1));
            }
            Reference::Columns { sheet, start, end } => {
                let columns = CellRange::new(canonical(&sheet), (1, start), (crate::types::MAX_ROW, end));
                if let Some(block) = within_used(&columns) {
                    addresses.extend(block.cells());
                }
            }
            Reference::Rows { sheet, start, end } => {
                let rows = CellRange::new(canonical(&sheet), (start, 1), (end, crate::types::MAX_COLUMN));
                if let Some(block) = within_used(&rows) {
                    addresses.extend(block.cells());
                }
            }
            Reference::SheetSpan {
                first,
                last,
                start,
                end,
            } => {
                let position = |name: &str| {
                    workbook
                        .sheets
                        .iter()
                        .position(|s| s.name.eq_ignore_ascii_case(name))
                };
                if let (Some(a), Some(b)) = (position(&first), position(&last)) {
                    let span = &workbook.sheets[a.min(b)..=a.max(b)];
                    for sheet in span {
                        addresses.extend(bounded(CellRange::new(sheet.name.clone(), start, end), span.len() as u64));
                    }
                }
            }
            Reference::Name { .. } | Reference::Structured { .. } | Reference::External(_) => {}
        }
    }

    let mut seen = std::collections::HashSet::new();
    addresses.retain(|a| seen.insert(a.clone()));
    (addresses, constant)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Workbook {
        let mut builder = WorkbookBuilder::new("sample.xlsx");
        builder
            .add_sheet("Inputs")
            .set_value("Inputs", 1, 1, CellValue::Text("Rate".to_string()))
            .set_value("Inputs", 1, 2, CellValue::Number(0.08))
            .set_value("Inputs", 2, 2, CellValue::Number(100.0))
            .set_formula("Inputs", 3, 2, "=B1*B2", CellValue::Number(8.0))
            .set_value("Inputs", 4, 2, CellValue::Error("#DIV/0!".to_string()))
            .add_sheet("Empty")
            .define_name("Rate", "Inputs!$B$1")
            .define_name("Block", "inputs!$B$1:$B$2,Inputs!$B$1")
            .define_name("Growth", "0.05");
        builder.build()
    }

    #[test]
    fn test_cells_iterate_row_major() {
        let mut builder = WorkbookBuilder::new("t");
        builder
            .set_value("S", 2, 1, CellValue::Number(3.0))
            .set_value("S", 1, 2, CellValue::Number(2.0))
            .set_value("S", 1, 1, CellValue::Number(1.0));
        let workbook = builder.build();
        let order: Vec<String> = workbook.sheets()[0].cells().map(|c| c.address.a1()).collect();
        assert_eq!(order, vec!["A1", "B1", "A2"]);
    }

    #[test]
    fn test_lookup_by_address_and_sheet_case() {
        let workbook = sample();
        let cell = workbook.cell(&CellAddress::new("inputs", 3, 2)).unwrap();
        assert_eq!(cell.formula.as_deref(), Some("=B1*B2"));
        assert_eq!(workbook.canonical_sheet_name("INPUTS"), Some("Inputs"));
        assert_eq!(workbook.value(&CellAddress::new("Inputs", 9, 9)), &CellValue::Empty);
    }

    #[test]
    fn test_empty_sheet_is_valid() {
        let workbook = sample();
        let empty = workbook.sheet("Empty").unwrap();
        assert!(empty.is_empty());
        assert!(empty.used_range().is_none());
        assert_eq!(empty.cells().count(), 0);
    }

    #[test]
    fn test_error_cell_is_derived() {
        let workbook = sample();
        let cell = workbook.cell(&CellAddress::new("Inputs", 4, 2)).unwrap();
        assert!(cell.value.is_error());
        assert_eq!(cell.role, crate::types::CellRole::Derived);
    }

    #[test]
    fn test_defined_names_resolve_to_addresses() {
        let workbook = sample();
        let rate = workbook.named_range("rate").unwrap();
        assert_eq!(rate.addresses, vec![CellAddress::new("Inputs", 1, 2)]);

        let block = workbook.named_range("BLOCK").unwrap();
        assert_eq!(
            block.addresses,
            vec![CellAddress::new("Inputs", 1, 2), CellAddress::new("Inputs", 2, 2)]
        );

        let growth = workbook.named_range("Growth").unwrap();
        assert!(growth.addresses.is_empty());
        assert!(growth.constant);
        assert!(!rate.constant);
    }

    #[test]
    fn test_oversized_name_is_limited_to_used_range() {
        let mut builder = WorkbookBuilder::new("t");
        builder
            .set_value("Data", 1, 1, CellValue::Number(1.0))
            .set_value("Data", 2, 2, CellValue::Number(2.0))
            .define_name("Everything", "Data!$A$1:$XFD$1048576")
            .define_name("Corner", "Data!$A$1:$C$3");
        let workbook = builder.build();

        let everything = workbook.named_range("Everything").unwrap();
        assert_eq!(everything.addresses.len(), 4);
        assert!(everything.addresses.iter().all(|a| a.row <= 2 && a.column <= 2));

        // Within the cap the range is kept as written
        assert_eq!(workbook.named_range("Corner").unwrap().addresses.len(), 9);
    }

    #[test]
    fn test_style_and_comment_attach_to_populated_cells() {
        let fill = StyleHints {
            fill: Some("FFFF00".to_string()),
            ..StyleHints::default()
        };
        let mut builder = WorkbookBuilder::new("t");
        builder
            .set_style("S", 1, 1, fill.clone())
            .set_comment("S", 1, 1, "Sensitivity_Growth")
            .set_value("S", 1, 1, CellValue::Number(0.05))
            .set_style("S", 2, 1, StyleHints::default())
            .set_value("S", 2, 1, CellValue::Number(1.0))
            .set_style("S", 9, 9, fill.clone());
        let workbook = builder.build();

        let cell = workbook.cell(&CellAddress::new("S", 1, 1)).unwrap();
        assert_eq!(cell.style.as_ref(), Some(&fill));
        assert_eq!(cell.comment.as_deref(), Some("Sensitivity_Growth"));
        assert!(workbook.cell(&CellAddress::new("S", 2, 1)).unwrap().style.is_none());
        assert!(workbook.cell(&CellAddress::new("S", 9, 9)).is_none());
    }

    #[test]
    fn test_formula_survives_later_value_write() {
        let mut builder = WorkbookBuilder::new("t");
        builder
            .set_formula("S", 1, 1, "=B1", CellValue::Empty)
            .set_value("S", 1, 1, CellValue::Number(4.0));
        let workbook = builder.build();
        let cell = workbook.cell(&CellAddress::new("S", 1, 1)).unwrap();
        assert_eq!(cell.formula.as_deref(), Some("=B1"));
        assert_eq!(cell.value, CellValue::Number(4.0));
    }

    #[test]
    fn test_serde_round_trip_rebuilds_indexes() {
        let workbook = sample();
        let json = serde_json::to_value(&workbook).unwrap();
        let restored: Workbook = serde_json::from_value(json).unwrap();
        assert_eq!(restored, workbook);
        assert!(restored.cell(&CellAddress::new("Inputs", 2, 2)).is_some());
    }
}
