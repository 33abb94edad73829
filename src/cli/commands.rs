use crate::config::{load_config, AnalysisConfig};
use crate::core::analyzer::{AnalysisResult, Analyzer};
use crate::core::metrics::Confidence;
use crate::core::tables::TableSource;
use crate::error::AnalyzerError;
use crate::report::write_report;
use crate::types::{CellAddress, CellValue};
use anyhow::{Context, Result};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::thread;

/// Format a number for display, removing unnecessary decimal places
fn format_number(n: f64) -> String {
    let rounded = (n * 1e6).round() / 1e6;
    format!("{:.6}", rounded)
        .trim_end_matches('0')
        .trim_end_matches('.')
        .to_string()
}

fn format_value(value: &CellValue) -> String {
    match value {
        CellValue::Number(n) => format_number(*n),
        CellValue::Empty => "(empty)".to_string(),
        other => other.to_string(),
    }
}

fn load_settings(config: Option<&Path>) -> Result<AnalysisConfig> {
    load_config(config).with_context(|| match config {
        Some(path) => format!("Failed to load config '{}'", path.display()),
        None => "Failed to load default config".to_string(),
    })
}

fn analyze_one(analyzer: &Analyzer, file: &Path) -> Result<AnalysisResult> {
    analyzer
        .analyze_path(file)
        .with_context(|| format!("Failed to analyze '{}'", file.display()))
}

fn run_single(file: &Path, config: Option<&Path>) -> Result<AnalysisResult> {
    let analyzer = Analyzer::new(load_settings(config)?)?;
    analyze_one(&analyzer, file)
}

/// Execute the analyze command over one or more workbooks
pub fn analyze(
    files: Vec<PathBuf>,
    config: Option<PathBuf>,
    report: Option<PathBuf>,
    no_report: bool,
    verbose: bool,
) -> Result<()> {
    println!("{}", "🔎 Sheetlens - Workbook analysis".bold().green());
    let settings = load_settings(config.as_deref())?;
    if report.is_some() && files.len() > 1 {
        anyhow::bail!("--report takes a single workbook; omit it to write one report per file");
    }
    let report_dir = settings.report_dir.clone();
    let analyzer = Analyzer::new(settings)?;

    // One thread per workbook; output is printed in argument order afterwards
    let outcomes: Vec<Result<AnalysisResult>> = thread::scope(|scope| {
        let jobs: Vec<_> = files
            .iter()
            .map(|file| {
                let analyzer = &analyzer;
                scope.spawn(move || analyze_one(analyzer, file))
            })
            .collect();
        jobs.into_iter()
            .map(|job| {
                job.join()
                    .unwrap_or_else(|panic| std::panic::resume_unwind(panic))
            })
            .collect()
    });

    let mut failures = 0;
    for (file, outcome) in files.iter().zip(outcomes) {
        println!();
        println!("   File: {}", file.display().to_string().bright_blue().bold());
        let result = match outcome {
            Ok(result) => result,
            Err(e) => {
                println!("   {} {:#}", "❌".red(), e);
                failures += 1;
                continue;
            }
        };
        print_summary(&result, verbose);

        if !no_report {
            let path = write_report(&result, report.as_deref(), &report_dir)
                .with_context(|| format!("Failed to write report for '{}'", file.display()))?;
            println!("   📄 Report: {}", path.display().to_string().cyan());
        }
    }

    println!();
    if failures > 0 {
        anyhow::bail!("{} of {} workbooks could not be analyzed", failures, files.len());
    }
    println!("{}", "✅ Analysis complete".bold().green());
    Ok(())
}

fn print_summary(result: &AnalysisResult, verbose: bool) {
    let graph = &result.dependency_graph;
    println!(
        "   📊 {} sheets, {} cells, {} formulas",
        result.workbook_model.sheets().len(),
        result.workbook_model.cell_count(),
        result.workbook_model.formula_cells().count()
    );
    println!(
        "   🌳 Graph: {} nodes, {} edges ({} inputs, {} derived, {} external)",
        graph.node_count(),
        graph.edge_count(),
        graph.inputs().len(),
        graph.derived().len(),
        graph.external().len()
    );
    if result.has_cycles() {
        println!(
            "   {} {} circular reference group(s)",
            "⚠️".yellow(),
            result.cycle_report.len()
        );
    }
    println!("   📋 Tables: {}", result.table_regions.len());
    println!("   💰 Metrics: {}", result.metric_matches.len());
    if !result.sensitivity_inputs.is_empty() {
        println!("   🎚  Sensitivity inputs: {}", result.sensitivity_inputs.len());
    }

    if !result.parse_warnings.is_empty() {
        println!(
            "   {} {} parse warning(s)",
            "⚠️".yellow(),
            result.parse_warnings.len()
        );
        if verbose {
            for warning in &result.parse_warnings {
                println!("      {} {}", warning.cell.to_string().bright_blue(), warning.detail.yellow());
            }
        }
    }
    for sheet in &result.missing_sheets {
        println!("   {} Missing expected sheet: {}", "❌".red(), sheet.bold());
    }
    if verbose {
        for summary in &result.sheet_summaries {
            for issue in &summary.issues {
                println!("      {} | {}", summary.name.bright_blue(), issue.yellow());
            }
        }
    }
}

/// Execute the order command - print the evaluation order
pub fn order(file: PathBuf, config: Option<PathBuf>) -> Result<()> {
    println!("{}", "🧮 Sheetlens - Evaluation order".bold().green());
    println!("   File: {}\n", file.display());
    let result = run_single(&file, config.as_deref())?;

    for (i, cell) in result.evaluation_order.iter().enumerate() {
        let node = result.dependency_graph.node(cell);
        let marker = match node {
            Some(n) if n.external => " (external)".dimmed().to_string(),
            Some(n) if n.has_formula => String::new(),
            _ => " (input)".dimmed().to_string(),
        };
        println!("   {:>5}. {}{}", i + 1, cell.to_string().bright_blue(), marker);
    }
    if result.has_cycles() {
        let skipped = result.cycle_report.cells().len();
        println!(
            "\n   {} {} cell(s) on circular references left out",
            "⚠️".yellow(),
            skipped
        );
    }
    Ok(())
}

/// Execute the cycles command - fails when any circular reference exists
pub fn cycles(file: PathBuf, config: Option<PathBuf>) -> Result<()> {
    println!("{}", "🔁 Sheetlens - Circular references".bold().green());
    println!("   File: {}\n", file.display());
    let result = run_single(&file, config.as_deref())?;

    if !result.has_cycles() {
        println!("{}", "✅ No circular references".bold().green());
        return Ok(());
    }

    for (i, cycle) in result.cycle_report.cycles.iter().enumerate() {
        let cells: Vec<String> = cycle.iter().map(ToString::to_string).collect();
        println!("   {} {}", format!("#{}", i + 1).red().bold(), cells.join(" → "));
    }
    println!();
    Err(AnalyzerError::CycleDetected(result.cycle_report.cells().into_iter().collect()).into())
}

/// Execute the tables command - detected regions and rejected candidates
pub fn tables(file: PathBuf, config: Option<PathBuf>) -> Result<()> {
    println!("{}", "📋 Sheetlens - Table regions".bold().green());
    println!("   File: {}\n", file.display());
    let result = run_single(&file, config.as_deref())?;

    if result.table_regions.is_empty() {
        println!("   No table regions found");
    }
    for region in &result.table_regions {
        let source = match region.source {
            TableSource::Explicit => "explicit".green(),
            TableSource::Heuristic => "heuristic".yellow(),
        };
        let name = region.name.as_deref().unwrap_or("-");
        println!(
            "   {} {} [{}] {} rows",
            region.range.to_string().bright_blue().bold(),
            name,
            source,
            region.body_rows()
        );
        println!("      {}", region.header.join(" | ").cyan());
    }

    if !result.table_notices.is_empty() {
        println!("\n{}", "⚠️  Rejected candidates:".yellow());
        for notice in &result.table_notices {
            println!(
                "   {} {:?}: {}",
                notice.range.to_string().bright_blue(),
                notice.reason,
                notice.detail
            );
        }
    }
    Ok(())
}

/// Execute the metrics command - financial metric matches
pub fn metrics(file: PathBuf, config: Option<PathBuf>) -> Result<()> {
    println!("{}", "💰 Sheetlens - Financial metrics".bold().green());
    println!("   File: {}\n", file.display());
    let result = run_single(&file, config.as_deref())?;

    if result.metric_matches.is_empty() {
        println!("   No financial metrics recognized");
        return Ok(());
    }
    for found in &result.metric_matches {
        let confidence = match found.confidence {
            Confidence::Certain => "certain".green(),
            Confidence::Heuristic => "heuristic".yellow(),
        };
        let cycle = if found.in_cycle { " (in cycle)".red().to_string() } else { String::new() };
        println!(
            "   {} {} [{}] via {}{}",
            found.anchor.to_string().bright_blue().bold(),
            found.kind.to_string().bold(),
            confidence,
            found.rule.dimmed(),
            cycle
        );
        if let Some(description) = &found.description {
            println!("      {}", description.cyan());
        }
        if !found.supporting_cells.is_empty() {
            let cells: Vec<String> = found.supporting_cells.iter().map(ToString::to_string).collect();
            println!("      from {}", cells.join(", "));
        }
    }
    Ok(())
}

/// Execute the sensitivity command - list cells tagged as scenario inputs
pub fn sensitivity(file: PathBuf, config: Option<PathBuf>) -> Result<()> {
    println!("{}", "🎚  Sheetlens - Sensitivity inputs".bold().green());
    println!("   File: {}\n", file.display());
    let result = run_single(&file, config.as_deref())?;

    if result.sensitivity_inputs.is_empty() {
        println!("   No sensitivity inputs tagged");
        return Ok(());
    }
    for input in &result.sensitivity_inputs {
        let reasons: Vec<&str> = input.matched_by.iter().map(|r| r.as_str()).collect();
        println!(
            "   {} = {} [{}]",
            input.address.to_string().bright_blue().bold(),
            format_value(&input.value),
            reasons.join(", ").dimmed()
        );
        if let Some(parameter) = &input.parameter {
            println!("      parameter: {}", parameter.cyan());
        }
        if let Some(fill) = &input.fill {
            println!("      fill: #{}", fill);
        }
        if !input.dependents.is_empty() {
            let cells: Vec<String> = input.dependents.iter().map(ToString::to_string).collect();
            println!("      read by {}", cells.join(", "));
        }
    }
    println!("\n   {} input(s)", result.sensitivity_inputs.len());
    Ok(())
}

/// Execute the audit command - show the dependency chain of one cell
pub fn audit(file: PathBuf, cell: String, config: Option<PathBuf>) -> Result<()> {
    println!("{}", "🔍 Sheetlens - Audit Trail".bold().green());
    println!("   File: {}", file.display());
    println!("   Cell: {}\n", cell.bright_blue().bold());

    let address: CellAddress = cell
        .parse()
        .map_err(|e: String| AnalyzerError::CellNotFound(e))?;
    let result = run_single(&file, config.as_deref())?;
    let workbook = &result.workbook_model;
    let graph = &result.dependency_graph;

    let sheet = workbook
        .canonical_sheet_name(&address.sheet)
        .ok_or_else(|| AnalyzerError::CellNotFound(format!("no sheet named '{}'", address.sheet)))?;
    let address = CellAddress::new(sheet, address.row, address.column);

    println!("{}", "📋 Cell Information:".bold().cyan());
    match workbook.cell(&address) {
        Some(record) => {
            println!("   Value: {}", format_value(&record.value).bold().green());
            if let Some(formula) = &record.formula {
                println!("   Formula: {}", formula.bright_yellow());
            }
        }
        None => println!("   Value: {}", "(empty)".dimmed()),
    }
    if let Some(node) = graph.node(&address) {
        println!("   Role: {:?}", node.role);
    }
    if result.cycle_report.contains(&address) {
        println!("   {} On a circular reference", "⚠️".yellow());
    }
    println!();

    println!("{}", "🌳 Dependency Tree:".bold().cyan());
    if graph.precedents(&address).is_empty() {
        println!("   No dependencies (literal value)");
    } else {
        let mut seen = Vec::new();
        print_precedents(&result, &address, 1, &mut seen);
    }
    println!();

    let dependents = graph.transitive_dependents(&address);
    println!("{}", "⬆️  Used by:".bold().cyan());
    if dependents.is_empty() {
        println!("   Nothing reads this cell");
    }
    for dependent in &dependents {
        println!("   {}", dependent.to_string().bright_blue());
    }

    let metrics: Vec<_> = result
        .metric_matches
        .iter()
        .filter(|m| m.anchor == address)
        .collect();
    if !metrics.is_empty() {
        println!();
        println!("{}", "💰 Metrics:".bold().cyan());
        for found in metrics {
            println!("   {} ({:?}, {})", found.kind.to_string().bold(), found.confidence, found.rule);
        }
    }

    println!();
    println!("{}", "✅ Audit complete".bold().green());
    Ok(())
}

const MAX_AUDIT_DEPTH: usize = 20;

fn print_precedents(result: &AnalysisResult, cell: &CellAddress, indent: usize, seen: &mut Vec<CellAddress>) {
    if indent > MAX_AUDIT_DEPTH {
        return;
    }
    for precedent in result.dependency_graph.precedents(cell) {
        let prefix = "   ".repeat(indent);
        print!("{}└─ {}", prefix, precedent.to_string().bright_blue());
        match result.workbook_model.cell(&precedent) {
            Some(record) => {
                print!(" = {}", format_value(&record.value).green());
                if let Some(formula) = &record.formula {
                    print!(" {}", formula.yellow());
                }
            }
            None => print!(" {}", "(external)".dimmed()),
        }
        if seen.contains(&precedent) {
            println!(" {}", "↺".dimmed());
            continue;
        }
        println!();
        seen.push(precedent.clone());
        print_precedents(result, &precedent, indent + 1, seen);
    }
}

#[cfg(test)]
#[path = "commands_tests.rs"]
mod tests;
