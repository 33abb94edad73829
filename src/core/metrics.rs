//! Financial metric rule engine
//!
//! Every rule looks at one formula cell at a time and either tags it with a
//! metric or stays silent. Rules are independent: the engine keeps every match
//! and only sorts them.

use crate::config::MetricSettings;
use crate::core::graph::{DependencyGraph, GraphBuild, Neighborhood};
use crate::core::reference::FormulaReferences;
use crate::error::{AnalyzerError, AnalyzerResult};
use crate::types::{CellAddress, CellRecord};
use crate::workbook::Workbook;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info};

//==============================================================================
// Match types
//==============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MetricKind {
    Irr,
    Xirr,
    Mirr,
    Npv,
    Xnpv,
    Rate,
    Pv,
    Fv,
    Pmt,
    Ipmt,
    Ppmt,
    Nper,
    Dscr,
    Ebitda,
    /// A configured keyword
    Custom(String),
}

/// Spreadsheet functions that compute a financial metric directly
pub const FINANCIAL_FUNCTIONS: [MetricKind; 12] = [
    MetricKind::Irr,
    MetricKind::Xirr,
    MetricKind::Mirr,
    MetricKind::Npv,
    MetricKind::Xnpv,
    MetricKind::Rate,
    MetricKind::Pv,
    MetricKind::Fv,
    MetricKind::Pmt,
    MetricKind::Ipmt,
    MetricKind::Ppmt,
    MetricKind::Nper,
];

/// Metrics recognized by keyword only
pub const KEYWORD_METRICS: [MetricKind; 2] = [MetricKind::Dscr, MetricKind::Ebitda];

impl MetricKind {
    pub fn as_str(&self) -> &str {
        match self {
            MetricKind::Irr => "IRR",
            MetricKind::Xirr => "XIRR",
            MetricKind::Mirr => "MIRR",
            MetricKind::Npv => "NPV",
            MetricKind::Xnpv => "XNPV",
            MetricKind::Rate => "RATE",
            MetricKind::Pv => "PV",
            MetricKind::Fv => "FV",
            MetricKind::Pmt => "PMT",
            MetricKind::Ipmt => "IPMT",
            MetricKind::Ppmt => "PPMT",
            MetricKind::Nper => "NPER",
            MetricKind::Dscr => "DSCR",
            MetricKind::Ebitda => "EBITDA",
            MetricKind::Custom(name) => name,
        }
    }

    pub fn description(&self) -> Option<&'static str> {
        let text = match self {
            MetricKind::Irr => "Internal Rate of Return",
            MetricKind::Xirr => "Extended Internal Rate of Return",
            MetricKind::Mirr => "Modified Internal Rate of Return",
            MetricKind::Npv => "Net Present Value",
            MetricKind::Xnpv => "Extended Net Present Value",
            MetricKind::Rate => "Interest Rate",
            MetricKind::Pv => "Present Value",
            MetricKind::Fv => "Future Value",
            MetricKind::Pmt => "Payment Amount",
            MetricKind::Ipmt => "Interest Payment",
            MetricKind::Ppmt => "Principal Payment",
            MetricKind::Nper => "Number of Periods",
            MetricKind::Dscr => "Debt Service Coverage Ratio",
            MetricKind::Ebitda => "Earnings Before Interest, Taxes, Depreciation, and Amortization",
            MetricKind::Custom(_) => return None,
        };
        Some(text)
    }
}

impl From<String> for MetricKind {
    fn from(value: String) -> Self {
        let upper = value.trim().to_uppercase();
        FINANCIAL_FUNCTIONS
            .into_iter()
            .chain(KEYWORD_METRICS)
            .find(|kind| kind.as_str() == upper)
            .unwrap_or(MetricKind::Custom(upper))
    }
}

impl From<MetricKind> for String {
    fn from(kind: MetricKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    /// An explicit spreadsheet function computes the metric
    Certain,
    /// Inferred from names, labels or layout
    Heuristic,
}

/// A formula cell recognized as a financial metric
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricMatch {
    pub kind: MetricKind,
    pub anchor: CellAddress,
    /// Graph nodes that justified the match
    pub supporting_cells: Vec<CellAddress>,
    pub confidence: Confidence,
    /// Name of the producing rule
    pub rule: String,
    /// The anchor sits on a circular reference
    #[serde(default)]
    pub in_cycle: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl MetricMatch {
    fn new(
        kind: MetricKind,
        anchor: &CellAddress,
        supporting_cells: Vec<CellAddress>,
        confidence: Confidence,
        rule: &str,
    ) -> Self {
        let description = kind.description().map(str::to_string);
        Self {
            kind,
            anchor: anchor.clone(),
            supporting_cells,
            confidence,
            rule: rule.to_string(),
            in_cycle: false,
            description,
        }
    }
}

//==============================================================================
// Rule capability
//==============================================================================

/// What a rule gets to see about one formula cell
pub struct RuleContext<'a> {
    pub cell: &'a CellRecord,
    pub formula: &'a str,
    pub references: &'a FormulaReferences,
    pub graph: &'a DependencyGraph,
    pub workbook: &'a Workbook,
}

impl RuleContext<'_> {
    pub fn address(&self) -> &CellAddress {
        &self.cell.address
    }

    /// The formula calls `function` (normalized, upper-case name)
    pub fn calls(&self, function: &str) -> bool {
        self.references.functions.iter().any(|f| f == function)
    }

    /// Direct precedents in the dependency graph
    pub fn precedents(&self) -> Vec<CellAddress> {
        self.graph.precedents(&self.cell.address)
    }

    pub fn neighborhood(&self) -> Option<Neighborhood> {
        self.graph.neighborhood(&self.cell.address)
    }
}

pub trait MetricRule: Send + Sync {
    fn name(&self) -> &str;
    fn evaluate(&self, context: &RuleContext<'_>) -> Option<MetricMatch>;
}

fn word_pattern(word: &str) -> AnalyzerResult<Regex> {
    Regex::new(&format!(r"(?i)\b{}\b", regex::escape(word)))
        .map_err(|e| AnalyzerError::Config(format!("Regex error for '{}': {}", word, e)))
}

//==============================================================================
// Default rules
//==============================================================================

/// The formula calls a financial function explicitly
pub struct FunctionRule {
    kind: MetricKind,
    name: String,
}

impl FunctionRule {
    pub fn new(kind: MetricKind) -> Self {
        let name = format!("function:{}", kind);
        Self { kind, name }
    }
}

impl MetricRule for FunctionRule {
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&self, context: &RuleContext<'_>) -> Option<MetricMatch> {
        let function = self.kind.as_str();
        if !context.calls(function) {
            return None;
        }
        Some(MetricMatch::new(
            self.kind.clone(),
            context.address(),
            context.references.cells_within(function),
            Confidence::Certain,
            &self.name,
        ))
    }
}

/// A domain keyword appears as a whole word in the formula or in a name it uses
pub struct KeywordRule {
    kind: MetricKind,
    keyword: String,
    description: Option<String>,
    pattern: Regex,
    name: String,
}

impl KeywordRule {
    pub fn new(keyword: &str, description: Option<&str>) -> AnalyzerResult<Self> {
        let keyword = keyword.trim().to_uppercase();
        let kind = MetricKind::from(keyword.clone());
        let description = description
            .map(str::to_string)
            .or_else(|| kind.description().map(str::to_string));
        Ok(Self {
            pattern: word_pattern(&keyword)?,
            name: format!("keyword:{}", keyword),
            kind,
            keyword,
            description,
        })
    }

    fn in_name(&self, name: &str) -> bool {
        name.split(|c: char| !c.is_alphanumeric())
            .any(|part| part.eq_ignore_ascii_case(&self.keyword))
    }
}

impl MetricRule for KeywordRule {
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&self, context: &RuleContext<'_>) -> Option<MetricMatch> {
        let hit = self.pattern.is_match(context.formula)
            || context.references.names().iter().any(|n| self.in_name(n));
        if !hit {
            return None;
        }
        let mut found = MetricMatch::new(
            self.kind.clone(),
            context.address(),
            context.precedents(),
            Confidence::Heuristic,
            &self.name,
        );
        found.description = self.description.clone();
        Some(found)
    }
}

/// The nearest text to the left of the cell names a metric ("Project IRR")
pub struct RowLabelRule {
    vocabulary: Vec<LabelEntry>,
}

struct LabelEntry {
    kind: MetricKind,
    abbreviation: Option<Regex>,
    description: String,
    lowered: String,
}

impl RowLabelRule {
    pub const NAME: &'static str = "row_label";

    pub fn new(keywords: &BTreeMap<String, String>) -> AnalyzerResult<Self> {
        let mut vocabulary = Vec::new();
        let builtin = FINANCIAL_FUNCTIONS.into_iter().chain(KEYWORD_METRICS).map(|kind| {
            let description = kind.description().unwrap_or_default().to_string();
            (kind, description)
        });
        let custom = keywords
            .iter()
            .map(|(word, description)| (MetricKind::from(word.clone()), description.clone()));

        for (kind, description) in builtin.chain(custom) {
            // RATE is recognized by its description only
            let abbreviation = match kind {
                MetricKind::Rate => None,
                _ => Some(word_pattern(kind.as_str())?),
            };
            vocabulary.push(LabelEntry {
                lowered: description.to_lowercase(),
                kind,
                abbreviation,
                description,
            });
        }
        // Longer descriptions first so "Net Present Value" wins over "Present Value"
        vocabulary.sort_by(|a, b| b.lowered.len().cmp(&a.lowered.len()));
        Ok(Self { vocabulary })
    }

    fn label_for<'a>(&self, context: &RuleContext<'a>) -> Option<&'a str> {
        let address = context.address();
        let sheet = context.workbook.sheet(&address.sheet)?;
        (1..address.column)
            .rev()
            .find_map(|column| sheet.value(address.row, column).as_text())
            .filter(|text| !text.trim().is_empty())
    }
}

impl MetricRule for RowLabelRule {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn evaluate(&self, context: &RuleContext<'_>) -> Option<MetricMatch> {
        let label = self.label_for(context)?;
        let lowered = label.to_lowercase();
        let entry = self.vocabulary.iter().find(|entry| {
            entry.abbreviation.as_ref().is_some_and(|p| p.is_match(label))
                || (!entry.lowered.is_empty() && lowered.contains(entry.lowered.as_str()))
        })?;
        debug!(cell = %context.address(), label, metric = %entry.kind, "row label names a metric");
        let mut found = MetricMatch::new(
            entry.kind.clone(),
            context.address(),
            context.precedents(),
            Confidence::Heuristic,
            Self::NAME,
        );
        if found.description.is_none() && !entry.description.is_empty() {
            found.description = Some(entry.description.clone());
        }
        Some(found)
    }
}

/// The formula talks about IRR/NPV without calling the function, and reads a
/// row or column of cash flows (at least three numbers, mixed signs)
pub struct CashFlowShapeRule {
    mention: Regex,
}

impl CashFlowShapeRule {
    pub const NAME: &'static str = "cash_flow_shape";
    const MIN_FLOWS: usize = 3;

    pub fn new() -> AnalyzerResult<Self> {
        let mention = Regex::new(r"(?i)\b(XIRR|MIRR|IRR|XNPV|NPV)\b")
            .map_err(|e| AnalyzerError::Config(format!("Regex error: {}", e)))?;
        Ok(Self { mention })
    }

    /// First run of consecutive numeric cells (along rows or along columns)
    /// that is long enough and holds both signs
    fn cash_flow_run(context: &RuleContext<'_>, precedents: &[CellAddress]) -> Option<Vec<CellAddress>> {
        let numeric: Vec<(&CellAddress, f64)> = precedents
            .iter()
            .filter(|a| !a.is_synthetic())
            .filter_map(|a| context.workbook.value(a).as_number().map(|n| (a, n)))
            .collect();

        let mut lines: BTreeMap<(&str, bool, u32), Vec<(u32, &CellAddress, f64)>> = BTreeMap::new();
        for &(address, value) in &numeric {
            lines
                .entry((address.sheet.as_str(), true, address.row))
                .or_default()
                .push((address.column, address, value));
            lines
                .entry((address.sheet.as_str(), false, address.column))
                .or_default()
                .push((address.row, address, value));
        }

        for cells in lines.values_mut() {
            cells.sort_by_key(|(position, _, _)| *position);
            let mut start = 0;
            for end in 1..=cells.len() {
                let broken = end == cells.len() || cells[end].0 != cells[end - 1].0 + 1;
                if !broken {
                    continue;
                }
                let run = &cells[start..end];
                let negative = run.iter().any(|(_, _, v)| *v < 0.0);
                let positive = run.iter().any(|(_, _, v)| *v > 0.0);
                if run.len() >= Self::MIN_FLOWS && negative && positive {
                    return Some(run.iter().map(|(_, a, _)| (*a).clone()).collect());
                }
                start = end;
            }
        }
        None
    }
}

impl MetricRule for CashFlowShapeRule {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn evaluate(&self, context: &RuleContext<'_>) -> Option<MetricMatch> {
        let mentioned = self.mention.captures(context.formula)?.get(1)?.as_str().to_uppercase();
        if context.calls(&mentioned) {
            return None;
        }
        let precedents = context.precedents();
        let run = Self::cash_flow_run(context, &precedents)?;
        Some(MetricMatch::new(
            MetricKind::from(mentioned),
            context.address(),
            run,
            Confidence::Heuristic,
            Self::NAME,
        ))
    }
}

//==============================================================================
// Registry and engine
//==============================================================================

/// Explicit, ordered list of active rules
#[derive(Default)]
pub struct RuleRegistry {
    rules: Vec<Box<dyn MetricRule>>,
}

impl RuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, rule: Box<dyn MetricRule>) -> &mut Self {
        self.rules.push(rule);
        self
    }

    /// Function rules, keyword rules (DSCR, EBITDA and configured keywords),
    /// the row label rule and the cash-flow shape rule. Rules named in
    /// `disabled_rules` (exact name or family such as `keyword`) are left out.
    pub fn with_default_rules(settings: &MetricSettings) -> AnalyzerResult<Self> {
        let mut candidates: Vec<Box<dyn MetricRule>> = Vec::new();

        for kind in FINANCIAL_FUNCTIONS {
            candidates.push(Box::new(FunctionRule::new(kind)));
        }

        let mut keywords: BTreeMap<String, Option<String>> = BTreeMap::new();
        keywords.insert("DSCR".to_string(), None);
        keywords.insert("EBITDA".to_string(), None);
        for (keyword, description) in &settings.keywords {
            keywords.insert(keyword.trim().to_uppercase(), Some(description.clone()));
        }
        for (keyword, description) in &keywords {
            candidates.push(Box::new(KeywordRule::new(keyword, description.as_deref())?));
        }

        if settings.labels {
            candidates.push(Box::new(RowLabelRule::new(&settings.keywords)?));
        }
        candidates.push(Box::new(CashFlowShapeRule::new()?));

        let disabled = |name: &str| {
            let family = name.split(':').next().unwrap_or(name);
            settings
                .disabled_rules
                .iter()
                .any(|d| d.eq_ignore_ascii_case(name) || d.eq_ignore_ascii_case(family))
        };

        let mut registry = Self::new();
        for rule in candidates {
            if disabled(rule.name()) {
                debug!(rule = rule.name(), "rule disabled");
                continue;
            }
            registry.register(rule);
        }
        Ok(registry)
    }

    pub fn rule_names(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Run every rule over every formula cell, reading the references the
    /// graph build already parsed. Matches anchored on a cycle are kept but
    /// flagged and downgraded to heuristic.
    pub fn evaluate(&self, workbook: &Workbook, build: &GraphBuild) -> Vec<MetricMatch> {
        let graph = &build.graph;
        let cyclic = build.cycles.cells();
        let mut matches = Vec::new();

        for cell in workbook.formula_cells() {
            let Some(formula) = cell.formula.as_deref() else {
                continue;
            };
            let Some(references) = build.references.get(&cell.address) else {
                debug!(cell = %cell.address, "no parsed references, rules skipped");
                continue;
            };
            let context = RuleContext {
                cell,
                formula,
                references,
                graph,
                workbook,
            };
            for rule in &self.rules {
                if let Some(mut found) = rule.evaluate(&context) {
                    if cyclic.contains(&found.anchor) {
                        found.in_cycle = true;
                        found.confidence = Confidence::Heuristic;
                    }
                    matches.push(found);
                }
            }
        }

        matches.sort_by(|a, b| {
            (&a.anchor, &a.kind, &a.rule).cmp(&(&b.anchor, &b.kind, &b.rule))
        });
        info!(matches = matches.len(), rules = self.rules.len(), "metric rules evaluated");
        matches
    }
}
