//! Cell reference parser
//!
//! Two layers:
//! - [`extract_references`]: purely syntactic, formula text → [`Reference`]s
//! - [`FormulaParser`]: resolves those references against a [`Workbook`]
//!   (sheet spelling, sheet spans, named ranges, declared tables, range caps)

mod parser;
mod tokenizer;

pub use parser::{
    extract_references, normalize_function_name, ExtractedReference, FormulaIssue,
    ParseWarningKind, ParsedFormula, Reference,
};
pub use tokenizer::{tokenize, Token, TokenizeError, Tokenizer};

use crate::types::{CellAddress, CellRange};
use crate::workbook::Workbook;
use std::collections::HashSet;

/// Default cap on the number of cells a bounded range may expand to
pub const DEFAULT_MAX_RANGE_CELLS: u64 = 1_000_000;

/// Names referring to names are followed this many levels
const MAX_NAME_DEPTH: usize = 8;

/// A reference mapped to concrete cells
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedReference {
    pub reference: Reference,
    /// Target cells in row-major order
    pub cells: Vec<CellAddress>,
    /// Enclosing function calls, outermost first
    pub functions: Vec<String>,
}

/// A reference that could not be mapped to workbook cells
#[derive(Debug, Clone, PartialEq)]
pub struct UnresolvedReference {
    /// Reference as written
    pub text: String,
    /// Synthetic node standing in for the missing target
    pub marker: CellAddress,
    pub functions: Vec<String>,
}

/// Every reference of one formula, resolved as far as possible
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FormulaReferences {
    pub resolved: Vec<ResolvedReference>,
    pub unresolved: Vec<UnresolvedReference>,
    pub functions: Vec<String>,
    pub issues: Vec<FormulaIssue>,
}

impl FormulaReferences {
    /// Parse-warning flag
    pub fn has_warnings(&self) -> bool {
        !self.issues.is_empty()
    }

    /// All dependency targets (resolved cells, then unresolved markers), deduplicated
    pub fn dependencies(&self) -> Vec<CellAddress> {
        let mut seen = HashSet::new();
        self.resolved
            .iter()
            .flat_map(|r| r.cells.iter())
            .chain(self.unresolved.iter().map(|u| &u.marker))
            .filter(|a| seen.insert((*a).clone()))
            .cloned()
            .collect()
    }

    /// Cells (and unresolved markers) referenced inside the arguments of `function`
    pub fn cells_within(&self, function: &str) -> Vec<CellAddress> {
        let inside = |functions: &[String]| functions.iter().any(|f| f == function);
        let mut cells: Vec<CellAddress> = self
            .resolved
            .iter()
            .filter(|r| inside(&r.functions))
            .flat_map(|r| r.cells.iter().cloned())
            .chain(
                self.unresolved
                    .iter()
                    .filter(|u| inside(&u.functions))
                    .map(|u| u.marker.clone()),
            )
            .collect();
        cells.sort();
        cells.dedup();
        cells
    }

    /// Defined names this formula mentions, resolved or not
    pub fn names(&self) -> Vec<&str> {
        let resolved = self.resolved.iter().filter_map(|r| match &r.reference {
            Reference::Name { name, .. } => Some(name.as_str()),
            _ => None,
        });
        let unresolved = self
            .unresolved
            .iter()
            .filter_map(|u| u.text.strip_prefix("name:"));
        resolved.chain(unresolved).collect()
    }
}

/// Where a reference leads
enum Target {
    Cells(Vec<CellAddress>),
    /// No cells behind it; the text names the synthetic node
    Missing(String),
}

/// Resolves formula references against one workbook
pub struct FormulaParser<'a> {
    workbook: &'a Workbook,
    max_range_cells: u64,
}

impl<'a> FormulaParser<'a> {
    pub fn new(workbook: &'a Workbook) -> Self {
        Self {
            workbook,
            max_range_cells: DEFAULT_MAX_RANGE_CELLS,
        }
    }

    pub fn with_max_range_cells(mut self, max_range_cells: u64) -> Self {
        self.max_range_cells = max_range_cells.max(1);
        self
    }

    /// Parse a cell's formula. An absent formula yields an empty result.
    pub fn parse(&self, formula: Option<&str>, sheet: &str) -> FormulaReferences {
        let Some(formula) = formula else {
            return FormulaReferences::default();
        };
        let parsed = extract_references(formula, sheet);
        let mut result = FormulaReferences {
            functions: parsed.functions,
            issues: parsed.issues,
            ..FormulaReferences::default()
        };

        for extracted in parsed.references {
            self.resolve(extracted, &mut result);
        }

        result
    }

    fn issue(result: &mut FormulaReferences, kind: ParseWarningKind, detail: String) {
        let issue = FormulaIssue::new(kind, detail);
        if !result.issues.contains(&issue) {
            result.issues.push(issue);
        }
    }

    fn unresolved(result: &mut FormulaReferences, text: String, functions: Vec<String>) {
        let marker = CellAddress::synthetic(&text);
        result.unresolved.push(UnresolvedReference {
            text,
            marker,
            functions,
        });
    }

    /// Canonical sheet spelling, or the written one (with a warning) if missing
    fn sheet_name(&self, sheet: &str, result: &mut FormulaReferences) -> (String, bool) {
        match self.workbook.canonical_sheet_name(sheet) {
            Some(name) => (name.to_string(), true),
            None => {
                Self::issue(
                    result,
                    ParseWarningKind::UnresolvedSheet,
                    format!("Sheet '{}' does not exist", sheet),
                );
                (sheet.to_string(), false)
            }
        }
    }

    fn resolve(&self, extracted: ExtractedReference, result: &mut FormulaReferences) {
        let ExtractedReference {
            reference,
            functions,
        } = extracted;

        match self.targets(&reference, &functions, result, 0) {
            Target::Cells(cells) => result.resolved.push(ResolvedReference {
                reference,
                cells,
                functions,
            }),
            Target::Missing(text) => Self::unresolved(result, text, functions),
        }
    }

    fn targets(
        &self,
        reference: &Reference,
        functions: &[String],
        result: &mut FormulaReferences,
        depth: usize,
    ) -> Target {
        match reference {
            Reference::Cell(address) => {
                let (sheet, _) = self.sheet_name(&address.sheet, result);
                Target::Cells(vec![CellAddress::new(sheet, address.row, address.column)])
            }
            Reference::Range(range) => {
                let (sheet, exists) = self.sheet_name(&range.sheet, result);
                let range = CellRange {
                    sheet,
                    ..range.clone()
                };
                Target::Cells(self.bounded(&range, exists, 1, result))
            }
            Reference::Columns { sheet, start, end } => {
                let (sheet, exists) = self.sheet_name(sheet, result);
                let range = CellRange::new(sheet, (1, *start), (crate::types::MAX_ROW, *end));
                Target::Cells(self.clamp(&range, exists))
            }
            Reference::Rows { sheet, start, end } => {
                let (sheet, exists) = self.sheet_name(sheet, result);
                let range = CellRange::new(sheet, (*start, 1), (*end, crate::types::MAX_COLUMN));
                Target::Cells(self.clamp(&range, exists))
            }
            Reference::SheetSpan {
                first,
                last,
                start,
                end,
            } => self.span_targets(first, last, *start, *end, result),
            Reference::Name { name, .. } => self.name_targets(name, functions, result, depth),
            Reference::Structured { table, selector } => {
                let column = self
                    .workbook
                    .table(table)
                    .filter(|_| !selector.contains(['[', '#', '@', ',']))
                    .and_then(|t| t.column_body(selector));
                match column {
                    Some(range) => Target::Cells(range.cells().collect()),
                    None => {
                        let text = format!("{}[{}]", table, selector);
                        Self::issue(
                            result,
                            ParseWarningKind::StructuredReference,
                            format!("Cannot map {} to cells", text),
                        );
                        Target::Missing(text)
                    }
                }
            }
            Reference::External(text) => Target::Missing(text.clone()),
        }
    }

    /// Expand a rectangle that is repeated `copies` times; past the cap it is
    /// limited to the used range
    fn bounded(
        &self,
        range: &CellRange,
        sheet_exists: bool,
        copies: u64,
        result: &mut FormulaReferences,
    ) -> Vec<CellAddress> {
        if range.cell_count().saturating_mul(copies) <= self.max_range_cells {
            return range.cells().collect();
        }
        Self::issue(
            result,
            ParseWarningKind::RangeClamped,
            format!("{} limited to the used range", range),
        );
        self.clamp(range, sheet_exists)
    }

    /// The same rectangle on every sheet between two sheets, in workbook order
    fn span_targets(
        &self,
        first: &str,
        last: &str,
        start: (u32, u32),
        end: (u32, u32),
        result: &mut FormulaReferences,
    ) -> Target {
        let sheets = self.workbook.sheets();
        let position = |name: &str| sheets.iter().position(|s| s.name().eq_ignore_ascii_case(name));

        let (Some(a), Some(b)) = (position(first), position(last)) else {
            Self::issue(
                result,
                ParseWarningKind::UnresolvedSheet,
                format!("Sheet span '{}:{}' does not match the workbook", first, last),
            );
            let area = CellRange::new("", start, end);
            let text = if area.cell_count() == 1 {
                format!("{}:{}!{}", first, last, CellAddress::new("", start.0, start.1).a1())
            } else {
                format!("{}:{}!{}", first, last, area.a1())
            };
            return Target::Missing(text);
        };

        let span = &sheets[a.min(b)..=a.max(b)];
        let mut cells = Vec::new();
        for sheet in span {
            let range = CellRange::new(sheet.name(), start, end);
            cells.extend(self.bounded(&range, true, span.len() as u64, result));
        }
        Target::Cells(cells)
    }

    /// Cells behind a defined name, expanded with the same cap as direct references.
    /// A constant name becomes one synthetic input node.
    fn name_targets(
        &self,
        name: &str,
        functions: &[String],
        result: &mut FormulaReferences,
        depth: usize,
    ) -> Target {
        let Some(named) = self.workbook.named_range(name) else {
            Self::issue(
                result,
                ParseWarningKind::UnresolvedName,
                format!("Name '{}' is not defined", name),
            );
            return Target::Missing(format!("name:{}", name));
        };
        if named.constant {
            return Target::Cells(vec![CellAddress::synthetic(&format!("name:{}", named.name))]);
        }
        if depth >= MAX_NAME_DEPTH {
            Self::issue(
                result,
                ParseWarningKind::UnresolvedName,
                format!("Name '{}' refers to itself or nests too deeply", named.name),
            );
            return Target::Missing(format!("name:{}", named.name));
        }

        let home = self
            .workbook
            .sheets()
            .first()
            .map(|s| s.name())
            .unwrap_or_default();
        let parsed = extract_references(&named.refers_to, home);
        for issue in parsed.issues {
            Self::issue(result, issue.kind, format!("{} in name '{}'", issue.detail, named.name));
        }

        let mut cells = Vec::new();
        for inner in &parsed.references {
            match self.targets(&inner.reference, functions, result, depth + 1) {
                Target::Cells(found) => cells.extend(found),
                Target::Missing(text) => Self::unresolved(result, text, functions.to_vec()),
            }
        }
        let mut seen = HashSet::new();
        cells.retain(|c| seen.insert(c.clone()));
        Target::Cells(cells)
    }

    /// Intersect an oversized or unbounded range with the sheet's used range
    fn clamp(&self, range: &CellRange, sheet_exists: bool) -> Vec<CellAddress> {
        if !sheet_exists {
            return Vec::new();
        }
        self.workbook
            .sheet(&range.sheet)
            .and_then(|s| s.used_range())
            .and_then(|used| used.intersect(range))
            .map(|block| block.cells().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CellValue, DeclaredTable};
    use crate::workbook::WorkbookBuilder;
    use pretty_assertions::assert_eq;

    fn workbook() -> Workbook {
        let mut builder = WorkbookBuilder::new("t");
        builder
            .set_value("Data", 1, 1, CellValue::Text("Year".to_string()))
            .set_value("Data", 1, 2, CellValue::Text("Cash".to_string()))
            .set_value("Data", 2, 1, CellValue::Number(2024.0))
            .set_value("Data", 2, 2, CellValue::Number(-100.0))
            .set_value("Data", 3, 1, CellValue::Number(2025.0))
            .set_value("Data", 3, 2, CellValue::Number(60.0))
            .set_value("Calc", 1, 1, CellValue::Number(0.1))
            .define_name("Rate", "Calc!$A$1")
            .declare_table(DeclaredTable {
                name: "Flows".to_string(),
                range: CellRange::new("Data", (1, 1), (3, 2)),
                columns: vec!["Year".to_string(), "Cash".to_string()],
            });
        builder.build()
    }

    fn a(sheet: &str, coordinate: &str) -> CellAddress {
        CellAddress::parse_a1(sheet, coordinate).unwrap()
    }

    #[test]
    fn test_absent_formula_is_empty() {
        let wb = workbook();
        let refs = FormulaParser::new(&wb).parse(None, "Calc");
        assert!(refs.dependencies().is_empty());
        assert!(!refs.has_warnings());
    }

    #[test]
    fn test_range_expansion_row_major_with_sheet_spelling() {
        let wb = workbook();
        let refs = FormulaParser::new(&wb).parse(Some("=SUM(data!A2:B3)"), "Calc");
        assert_eq!(
            refs.dependencies(),
            vec![a("Data", "A2"), a("Data", "B2"), a("Data", "A3"), a("Data", "B3")]
        );
    }

    #[test]
    fn test_whole_column_clamps_to_used_range() {
        let wb = workbook();
        let refs = FormulaParser::new(&wb).parse(Some("=SUM(Data!B:B)"), "Calc");
        assert_eq!(
            refs.dependencies(),
            vec![a("Data", "B1"), a("Data", "B2"), a("Data", "B3")]
        );
    }

    #[test]
    fn test_named_range_resolution() {
        let wb = workbook();
        let refs = FormulaParser::new(&wb).parse(Some("=rate*2"), "Data");
        assert_eq!(refs.dependencies(), vec![a("Calc", "A1")]);
        assert!(refs.unresolved.is_empty());
    }

    #[test]
    fn test_unknown_name_yields_marker() {
        let wb = workbook();
        let refs = FormulaParser::new(&wb).parse(Some("=Growth*A1"), "Calc");
        assert_eq!(refs.unresolved.len(), 1);
        assert_eq!(refs.unresolved[0].text, "name:Growth");
        assert!(refs.unresolved[0].marker.is_synthetic());
        assert_eq!(refs.issues[0].kind, ParseWarningKind::UnresolvedName);
        assert_eq!(refs.dependencies().len(), 2);
        assert_eq!(refs.names(), vec!["Growth"]);
    }

    #[test]
    fn test_missing_sheet_is_flagged() {
        let wb = workbook();
        let refs = FormulaParser::new(&wb).parse(Some("=Nowhere!A1"), "Calc");
        assert_eq!(refs.dependencies(), vec![a("Nowhere", "A1")]);
        assert_eq!(refs.issues[0].kind, ParseWarningKind::UnresolvedSheet);
    }

    #[test]
    fn test_structured_reference_to_table_column() {
        let wb = workbook();
        let refs = FormulaParser::new(&wb).parse(Some("=IRR(Flows[Cash])"), "Calc");
        assert_eq!(refs.dependencies(), vec![a("Data", "B2"), a("Data", "B3")]);
        assert_eq!(refs.cells_within("IRR"), vec![a("Data", "B2"), a("Data", "B3")]);
    }

    #[test]
    fn test_name_targets_obey_range_cap() {
        let mut builder = WorkbookBuilder::new("t");
        for row in 1..=3 {
            builder.set_value("S", row, 1, CellValue::Number(f64::from(row)));
        }
        builder.define_name("Block", "S!$A$1:$J$10");
        let wb = builder.build();
        let parser = FormulaParser::new(&wb).with_max_range_cells(10);

        let via_name = parser.parse(Some("=SUM(Block)"), "S");
        let direct = parser.parse(Some("=SUM(S!$A$1:$J$10)"), "S");
        assert_eq!(via_name.dependencies(), direct.dependencies());
        assert_eq!(via_name.dependencies().len(), 3);
        assert_eq!(via_name.issues[0].kind, ParseWarningKind::RangeClamped);
        assert_eq!(via_name.names(), vec!["Block"]);
    }

    #[test]
    fn test_constant_name_becomes_synthetic_input() {
        let mut builder = WorkbookBuilder::new("t");
        builder
            .set_value("S", 1, 1, CellValue::Number(100.0))
            .define_name("Growth", "=0.05");
        let wb = builder.build();
        let refs = FormulaParser::new(&wb).parse(Some("=A1*(1+Growth)"), "S");

        assert_eq!(
            refs.dependencies(),
            vec![a("S", "A1"), CellAddress::synthetic("name:Growth")]
        );
        assert!(refs.unresolved.is_empty());
        assert!(!refs.has_warnings());
    }

    #[test]
    fn test_name_chain_and_self_reference() {
        let mut builder = WorkbookBuilder::new("t");
        builder
            .set_value("S", 1, 1, CellValue::Number(1.0))
            .define_name("Base", "S!$A$1")
            .define_name("Alias", "=Base")
            .define_name("Loop", "=Loop");
        let wb = builder.build();
        let parser = FormulaParser::new(&wb);

        assert_eq!(parser.parse(Some("=Alias"), "S").dependencies(), vec![a("S", "A1")]);

        let refs = parser.parse(Some("=Loop"), "S");
        assert_eq!(refs.unresolved[0].text, "name:Loop");
        assert_eq!(refs.issues[0].kind, ParseWarningKind::UnresolvedName);
    }

    #[test]
    fn test_sheet_span_follows_workbook_order() {
        let mut builder = WorkbookBuilder::new("t");
        builder
            .set_value("Jan", 1, 1, CellValue::Number(1.0))
            .set_value("Feb", 1, 1, CellValue::Number(2.0))
            .set_value("Mar", 1, 1, CellValue::Number(3.0))
            .set_value("Total", 1, 1, CellValue::Number(0.0));
        let wb = builder.build();
        let parser = FormulaParser::new(&wb);

        let refs = parser.parse(Some("=SUM(jan:Mar!A1)"), "Total");
        assert_eq!(
            refs.dependencies(),
            vec![a("Jan", "A1"), a("Feb", "A1"), a("Mar", "A1")]
        );
        assert!(refs.unresolved.is_empty());
        assert!(!refs.has_warnings());

        let missing = parser.parse(Some("=SUM(Jan:Dec!A1)"), "Total");
        assert_eq!(missing.unresolved[0].text, "Jan:Dec!A1");
        assert_eq!(missing.issues[0].kind, ParseWarningKind::UnresolvedSheet);
    }

    #[test]
    fn test_let_parameter_is_not_an_unresolved_name() {
        let wb = workbook();
        let refs = FormulaParser::new(&wb).parse(Some("=LET(rate, Calc!A1, rate*2)"), "Data");
        assert_eq!(refs.dependencies(), vec![a("Calc", "A1")]);
        assert!(refs.unresolved.is_empty());
        assert!(!refs.has_warnings());
    }

    #[test]
    fn test_oversized_range_is_clamped() {
        let wb = workbook();
        let refs = FormulaParser::new(&wb)
            .with_max_range_cells(2)
            .parse(Some("=SUM(Data!A1:B100)"), "Calc");
        assert_eq!(refs.dependencies().len(), 6);
        assert_eq!(refs.issues[0].kind, ParseWarningKind::RangeClamped);
    }
}
