//! Analysis settings loaded from YAML
//!
//! ```yaml
//! expected_sheets: [Inputs, Cashflow]
//! report_dir: reports
//! metadata:
//!   owner: Treasury
//! tables:
//!   min_header_columns: 2
//! metrics:
//!   keywords:
//!     LLCR: Loan life coverage ratio
//!   disabled_rules: [row_label]
//! sensitivity:
//!   prefix: Sensitivity_
//!   highlight_colors: ["#FFFF00"]
//! ```

use crate::core::reference::DEFAULT_MAX_RANGE_CELLS;
use crate::error::{AnalyzerError, AnalyzerResult};
use crate::types::normalize_color;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnalysisConfig {
    /// Sheets the workbook must contain; absent ones are listed in the result
    pub expected_sheets: Vec<String>,
    /// Default directory for JSON reports
    pub report_dir: PathBuf,
    /// Free-form key/values copied into the result
    pub metadata: BTreeMap<String, String>,
    pub tables: TableSettings,
    pub metrics: MetricSettings,
    pub sensitivity: SensitivitySettings,
    /// Largest bounded range expanded cell by cell
    pub max_range_cells: u64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            expected_sheets: Vec::new(),
            report_dir: PathBuf::from("reports"),
            metadata: BTreeMap::new(),
            tables: TableSettings::default(),
            metrics: MetricSettings::default(),
            sensitivity: SensitivitySettings::default(),
            max_range_cells: DEFAULT_MAX_RANGE_CELLS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TableSettings {
    /// Shortest run of text cells accepted as a header row
    pub min_header_columns: usize,
    /// Look for header/body blocks beyond the declared tables
    pub detect_heuristic: bool,
}

impl Default for TableSettings {
    fn default() -> Self {
        Self {
            min_header_columns: 2,
            detect_heuristic: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MetricSettings {
    /// Extra keywords (upper-cased) with a description, on top of DSCR and EBITDA
    pub keywords: BTreeMap<String, String>,
    /// Enable the row label rule
    pub labels: bool,
    /// Rule names to leave out of the registry
    pub disabled_rules: Vec<String>,
}

impl Default for MetricSettings {
    fn default() -> Self {
        Self {
            keywords: BTreeMap::new(),
            labels: true,
            disabled_rules: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SensitivitySettings {
    /// Text prefix marking a sensitivity input; the rest is the parameter name
    pub prefix: String,
    /// Substrings of a note that tag its cell; empty means the prefix
    pub comment_keywords: Vec<String>,
    /// Fill colours (`RRGGBB`, `#RRGGBB` or `AARRGGBB`) that tag a cell
    pub highlight_colors: Vec<String>,
}

impl Default for SensitivitySettings {
    fn default() -> Self {
        Self {
            prefix: "Sensitivity_".to_string(),
            comment_keywords: Vec::new(),
            highlight_colors: Vec::new(),
        }
    }
}

impl SensitivitySettings {
    pub fn keywords(&self) -> Vec<&str> {
        if self.comment_keywords.is_empty() {
            vec![self.prefix.as_str()]
        } else {
            self.comment_keywords.iter().map(String::as_str).collect()
        }
    }

    /// Highlight colours in `RRGGBB` form; invalid entries are dropped
    pub fn colors(&self) -> Vec<String> {
        self.highlight_colors
            .iter()
            .filter_map(|c| normalize_color(c))
            .collect()
    }
}

impl AnalysisConfig {
    pub fn from_yaml_str(content: &str) -> AnalyzerResult<Self> {
        // An empty document is the default configuration
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: AnalysisConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> AnalyzerResult<()> {
        if self.tables.min_header_columns == 0 {
            return Err(AnalyzerError::Config(
                "tables.min_header_columns must be at least 1".to_string(),
            ));
        }
        if self.max_range_cells == 0 {
            return Err(AnalyzerError::Config(
                "max_range_cells must be at least 1".to_string(),
            ));
        }
        for keyword in self.metrics.keywords.keys() {
            let word = keyword.trim();
            if word.is_empty() || !word.chars().all(|c| c.is_alphanumeric() || c == '_') {
                return Err(AnalyzerError::Config(format!(
                    "metrics.keywords: '{}' is not a single word",
                    keyword
                )));
            }
        }
        if self.sensitivity.prefix.trim().is_empty() {
            return Err(AnalyzerError::Config(
                "sensitivity.prefix must not be blank".to_string(),
            ));
        }
        if let Some(color) = self
            .sensitivity
            .highlight_colors
            .iter()
            .find(|c| normalize_color(c).is_none())
        {
            return Err(AnalyzerError::Config(format!(
                "sensitivity.highlight_colors: '{}' is not a hex colour",
                color
            )));
        }
        if let Some(sheet) = self.expected_sheets.iter().find(|s| s.trim().is_empty()) {
            return Err(AnalyzerError::Config(format!(
                "expected_sheets contains a blank name ('{}')",
                sheet
            )));
        }
        Ok(())
    }
}

/// Load settings from a YAML file; no path means defaults
pub fn load_config(path: Option<&Path>) -> AnalyzerResult<AnalysisConfig> {
    let Some(path) = path else {
        return Ok(AnalysisConfig::default());
    };
    debug!(path = %path.display(), "loading analysis config");
    let content = std::fs::read_to_string(path)?;
    AnalysisConfig::from_yaml_str(&content)
}
