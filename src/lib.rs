//! Sheetlens - spreadsheet dependency and financial metric analyzer
//!
//! Loads an Excel workbook, extracts every cell reference from its formulas
//! and builds a directed dependency graph over the cells. From that graph it
//! derives a deterministic evaluation order and reports circular references.
//! Independently it finds table-shaped regions and tags cells that compute
//! financial metrics (IRR, NPV, PMT, DSCR, ...).
//!
//! # Features
//!
//! - Formula reference extraction (A1, ranges, whole rows/columns, quoted
//!   sheets, named ranges, structured table references)
//! - Cycle detection via strongly connected components
//! - Stable topological ordering
//! - Explicit and heuristic table detection
//! - Pluggable metric rules
//! - Sensitivity input tagging from labels, names, notes and fill colours
//! - JSON report export
//!
//! # Example
//!
//! ```no_run
//! use royalbit_sheetlens::config::AnalysisConfig;
//! use royalbit_sheetlens::core::Analyzer;
//! use std::path::Path;
//!
//! let analyzer = Analyzer::new(AnalysisConfig::default())?;
//! let result = analyzer.analyze_path(Path::new("model.xlsx"))?;
//!
//! println!("Cells in order: {}", result.evaluation_order.len());
//! println!("Cycles: {}", result.cycle_report.len());
//! for found in &result.metric_matches {
//!     println!("{} at {}", found.kind, found.anchor);
//! }
//! # Ok::<(), royalbit_sheetlens::error::AnalyzerError>(())
//! ```

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod excel;
pub mod report;
pub mod types;
pub mod workbook;

// Re-export commonly used types
pub use crate::config::AnalysisConfig;
pub use crate::core::{AnalysisResult, Analyzer, DependencyGraph, MetricKind, MetricMatch};
pub use error::{AnalyzerError, AnalyzerResult};
pub use types::{CellAddress, CellRange, CellValue};
pub use workbook::{Workbook, WorkbookBuilder};
