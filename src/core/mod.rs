//! Analysis engine: reference graph, evaluation order, tables, metrics and
//! sensitivity inputs

pub mod analyzer;
pub mod graph;
pub mod metrics;
pub mod reference;
pub mod scheduler;
pub mod sensitivity;
pub mod tables;

pub use analyzer::{AnalysisResult, Analyzer, SheetSummary};
pub use graph::{
    CycleReport, DependencyEdge, DependencyGraph, DependencyGraphBuilder, GraphBuild, GraphNode,
    Neighborhood, ParseWarning,
};
pub use metrics::{Confidence, MetricKind, MetricMatch, MetricRule, RuleContext, RuleRegistry};
pub use reference::{FormulaParser, FormulaReferences};
pub use scheduler::schedule;
pub use sensitivity::{find_sensitivity_inputs, SensitivityInput, SensitivityReason};
pub use tables::{detect_tables, TableDetection, TableNotice, TableRegion, TableSource};
