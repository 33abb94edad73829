//! Sensitivity input discovery
//!
//! A cell is a sensitivity input when its text starts with the configured
//! prefix, when a defined name carrying the prefix points at it, when its note
//! mentions one of the keywords, or when its fill is one of the highlight
//! colours.

use crate::config::SensitivitySettings;
use crate::core::graph::DependencyGraph;
use crate::types::{CellAddress, CellRecord, CellValue};
use crate::workbook::Workbook;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensitivityReason {
    /// A defined name with the prefix targets the cell
    Name,
    Comment,
    FillColor,
    /// The cell text starts with the prefix
    Prefix,
}

impl SensitivityReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SensitivityReason::Name => "name",
            SensitivityReason::Comment => "comment",
            SensitivityReason::FillColor => "fill_color",
            SensitivityReason::Prefix => "prefix",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensitivityInput {
    pub address: CellAddress,
    pub value: CellValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    /// Fill colour as `RRGGBB`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill: Option<String>,
    /// Sorted, without duplicates
    pub matched_by: Vec<SensitivityReason>,
    /// Formula cells reading this cell directly
    #[serde(default)]
    pub dependents: Vec<CellAddress>,
}

/// `Growth rate: annual` → `Growth rate`; blank text has no parameter
fn clean_parameter(text: &str) -> Option<String> {
    let candidate = text.trim();
    if candidate.is_empty() {
        return None;
    }
    match candidate.split_once(':') {
        Some((head, _)) if !head.trim().is_empty() => Some(head.trim().to_string()),
        _ => Some(candidate.to_string()),
    }
}

/// Defined names starting with the prefix, by target cell
fn prefixed_names<'a>(workbook: &'a Workbook, prefix: &str) -> HashMap<&'a CellAddress, &'a str> {
    let mut targets = HashMap::new();
    for named in workbook.named_ranges() {
        let Some(rest) = named.name.strip_prefix(prefix) else {
            continue;
        };
        for address in &named.addresses {
            targets.entry(address).or_insert(rest);
        }
    }
    targets
}

fn parameter_for(cell: &CellRecord, prefix: &str, name: Option<&str>) -> Option<String> {
    if let Some(rest) = cell.value.as_text().and_then(|t| t.strip_prefix(prefix)) {
        if let Some(parameter) = clean_parameter(rest) {
            return Some(parameter);
        }
    }
    if let Some(parameter) = name.and_then(clean_parameter) {
        return Some(parameter);
    }
    cell.comment
        .as_deref()?
        .lines()
        .find_map(|line| line.trim_start().strip_prefix(prefix))
        .and_then(clean_parameter)
}

/// Every tagged cell in sheet order, row-major within a sheet
pub fn find_sensitivity_inputs(
    workbook: &Workbook,
    graph: &DependencyGraph,
    settings: &SensitivitySettings,
) -> Vec<SensitivityInput> {
    let prefix = settings.prefix.as_str();
    let keywords = settings.keywords();
    let colors = settings.colors();
    let names = prefixed_names(workbook, prefix);
    let mut inputs = Vec::new();

    for cell in workbook.sheets().iter().flat_map(|sheet| sheet.cells()) {
        let fill = cell.style.as_ref().and_then(|s| s.fill.clone());
        let name = names.get(&cell.address).copied();

        let mut matched_by = Vec::new();
        if cell.value.as_text().is_some_and(|t| t.starts_with(prefix)) {
            matched_by.push(SensitivityReason::Prefix);
        }
        if name.is_some() {
            matched_by.push(SensitivityReason::Name);
        }
        if let Some(comment) = &cell.comment {
            if keywords.iter().any(|k| comment.contains(k)) {
                matched_by.push(SensitivityReason::Comment);
            }
        }
        if fill.as_ref().is_some_and(|f| colors.contains(f)) {
            matched_by.push(SensitivityReason::FillColor);
        }
        if matched_by.is_empty() {
            continue;
        }
        matched_by.sort();

        let parameter = parameter_for(cell, prefix, name);
        debug!(cell = %cell.address, parameter = ?parameter, reasons = ?matched_by, "sensitivity input");
        inputs.push(SensitivityInput {
            address: cell.address.clone(),
            value: cell.value.clone(),
            parameter,
            comment: cell.comment.clone(),
            fill,
            matched_by,
            dependents: graph.dependents(&cell.address),
        });
    }

    info!(inputs = inputs.len(), "sensitivity inputs found");
    inputs
}
