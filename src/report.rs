//! JSON report output

use crate::core::analyzer::AnalysisResult;
use crate::error::AnalyzerResult;
use std::path::{Path, PathBuf};
use tracing::info;

/// Default report location: `<report_dir>/analysis_<workbook stem>.json`
pub fn default_report_path(result: &AnalysisResult, report_dir: &Path) -> PathBuf {
    let stem = Path::new(result.source())
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "workbook".to_string());
    report_dir.join(format!("analysis_{}.json", stem))
}

/// Write the result as pretty JSON, creating parent directories as needed.
/// Returns the path written.
pub fn write_report(
    result: &AnalysisResult,
    output: Option<&Path>,
    report_dir: &Path,
) -> AnalyzerResult<PathBuf> {
    let path = match output {
        Some(path) => path.to_path_buf(),
        None => default_report_path(result, report_dir),
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, result.to_json_pretty()?)?;
    info!(path = %path.display(), "report written");
    Ok(path)
}
