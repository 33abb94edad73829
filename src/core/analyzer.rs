//! One-shot workbook analysis
//!
//! ```text
//! Workbook ──┬─► DependencyGraphBuilder ──┬─► acyclic remainder ─► order
//!            │                            └─► RuleRegistry ──────► metric matches
//!            ├─► detect_tables ─────────────► regions + notices
//!            └─► find_sensitivity_inputs ───► tagged input cells
//! ```
//!
//! Graph building and table detection run side by side on scoped threads, as
//! do scheduling and metric matching once the graph exists. Nothing is cached
//! between calls.

use crate::config::AnalysisConfig;
use crate::core::graph::{CycleReport, DependencyGraph, DependencyGraphBuilder, ParseWarning};
use crate::core::metrics::{MetricMatch, RuleRegistry};
use crate::core::sensitivity::{find_sensitivity_inputs, SensitivityInput};
use crate::core::tables::{detect_tables, TableNotice, TableRegion};
use crate::error::AnalyzerResult;
use crate::types::CellAddress;
use crate::workbook::{Sheet, Workbook};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::thread::{self, ScopedJoinHandle};
use tracing::{info, warn};

/// Per-sheet counts and problems
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SheetSummary {
    pub name: String,
    /// Cells inside the used range
    pub total_cells: u64,
    pub populated_cells: usize,
    pub formula_cells: usize,
    pub empty_cells: u64,
    pub error_cells: usize,
    pub is_empty: bool,
    pub issues: Vec<String>,
}

impl SheetSummary {
    pub fn from_sheet(sheet: &Sheet) -> Self {
        let total_cells = sheet.used_range().map(|r| r.cell_count()).unwrap_or(0);
        let mut populated_cells = 0;
        let mut formula_cells = 0;
        let mut error_cells = 0;
        let mut issues = Vec::new();

        for cell in sheet.cells() {
            if !cell.value.is_empty() || cell.has_formula() {
                populated_cells += 1;
            }
            if let Some(formula) = &cell.formula {
                formula_cells += 1;
                if formula.contains("#REF!") {
                    issues.push(format!(
                        "Cell {} contains an unresolved reference ({})",
                        cell.address.a1(),
                        formula
                    ));
                }
            }
            if cell.value.is_error() {
                error_cells += 1;
                issues.push(format!(
                    "Cell {} contains an Excel error ({})",
                    cell.address.a1(),
                    cell.value
                ));
            }
        }

        let is_empty = sheet.is_empty();
        if is_empty {
            issues.push("Worksheet is empty".to_string());
        }

        Self {
            name: sheet.name().to_string(),
            total_cells,
            populated_cells,
            formula_cells,
            empty_cells: total_cells.saturating_sub(populated_cells as u64),
            error_cells,
            is_empty,
            issues,
        }
    }
}

/// Everything one analysis produces. Keys are stable across releases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub workbook_model: Workbook,
    pub dependency_graph: DependencyGraph,
    pub cycle_report: CycleReport,
    pub evaluation_order: Vec<CellAddress>,
    pub table_regions: Vec<TableRegion>,
    pub metric_matches: Vec<MetricMatch>,
    pub parse_warnings: Vec<ParseWarning>,
    #[serde(default)]
    pub table_notices: Vec<TableNotice>,
    #[serde(default)]
    pub sheet_summaries: Vec<SheetSummary>,
    #[serde(default)]
    pub missing_sheets: Vec<String>,
    #[serde(default)]
    pub sensitivity_inputs: Vec<SensitivityInput>,
    pub generated_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl AnalysisResult {
    pub fn source(&self) -> &str {
        self.workbook_model.source()
    }

    pub fn has_cycles(&self) -> bool {
        self.cycle_report.has_cycles()
    }

    /// Sheet issues plus missing sheets
    pub fn issue_count(&self) -> usize {
        self.sheet_summaries.iter().map(|s| s.issues.len()).sum::<usize>() + self.missing_sheets.len()
    }

    pub fn to_json_value(&self) -> AnalyzerResult<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn to_json_pretty(&self) -> AnalyzerResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json_value(value: serde_json::Value) -> AnalyzerResult<Self> {
        Ok(serde_json::from_value(value)?)
    }

    pub fn from_json_str(json: &str) -> AnalyzerResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

fn join<T>(handle: ScopedJoinHandle<'_, T>) -> T {
    handle
        .join()
        .unwrap_or_else(|panic| std::panic::resume_unwind(panic))
}

pub struct Analyzer {
    config: AnalysisConfig,
    registry: RuleRegistry,
}

impl Analyzer {
    /// Validate the configuration and build the default rule registry
    pub fn new(config: AnalysisConfig) -> AnalyzerResult<Self> {
        config.validate()?;
        let registry = RuleRegistry::with_default_rules(&config.metrics)?;
        Ok(Self { config, registry })
    }

    /// Use a caller-assembled rule registry instead of the defaults
    pub fn with_registry(config: AnalysisConfig, registry: RuleRegistry) -> AnalyzerResult<Self> {
        config.validate()?;
        Ok(Self { config, registry })
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn registry(&self) -> &RuleRegistry {
        &self.registry
    }

    pub fn analyze_path(&self, path: &Path) -> AnalyzerResult<AnalysisResult> {
        let workbook = crate::excel::load_path(path)?;
        self.analyze_workbook(workbook)
    }

    pub fn analyze_bytes(&self, bytes: &[u8], name: &str) -> AnalyzerResult<AnalysisResult> {
        let workbook = crate::excel::load_bytes(bytes, name)?;
        self.analyze_workbook(workbook)
    }

    pub fn analyze_workbook(&self, workbook: Workbook) -> AnalyzerResult<AnalysisResult> {
        info!(source = workbook.source(), sheets = workbook.sheets().len(), "analysis started");
        let max_range_cells = self.config.max_range_cells;

        let (build, detection) = thread::scope(|scope| {
            let graph_job = scope.spawn(|| {
                DependencyGraphBuilder::new(&workbook)
                    .with_max_range_cells(max_range_cells)
                    .build()
            });
            let table_job = scope.spawn(|| detect_tables(&workbook, &self.config.tables));
            (join(graph_job), join(table_job))
        });

        let remainder = build.graph.acyclic_remainder(&build.cycles);
        let (order, metric_matches) = thread::scope(|scope| {
            let order_job = scope.spawn(|| remainder.topological_order());
            let metric_job = scope.spawn(|| {
                self.registry.evaluate(&workbook, &build)
            });
            (join(order_job), join(metric_job))
        });
        let evaluation_order = order?;
        let sensitivity_inputs =
            find_sensitivity_inputs(&workbook, &build.graph, &self.config.sensitivity);

        let sheet_summaries: Vec<SheetSummary> =
            workbook.sheets().iter().map(SheetSummary::from_sheet).collect();

        let missing_sheets: Vec<String> = self
            .config
            .expected_sheets
            .iter()
            .filter(|name| workbook.sheet(name).is_none())
            .cloned()
            .collect();
        for name in &missing_sheets {
            warn!(sheet = %name, "expected sheet is missing");
        }

        let result = AnalysisResult {
            dependency_graph: build.graph,
            cycle_report: build.cycles,
            evaluation_order,
            table_regions: detection.regions,
            metric_matches,
            parse_warnings: build.warnings,
            table_notices: detection.notices,
            sheet_summaries,
            missing_sheets,
            sensitivity_inputs,
            generated_at: Utc::now(),
            metadata: self.config.metadata.clone(),
            workbook_model: workbook,
        };

        info!(
            source = result.source(),
            nodes = result.dependency_graph.node_count(),
            cycles = result.cycle_report.len(),
            tables = result.table_regions.len(),
            metrics = result.metric_matches.len(),
            sensitivity_inputs = result.sensitivity_inputs.len(),
            issues = result.issue_count(),
            "analysis finished"
        );
        Ok(result)
    }
}
