use crate::types::CellAddress;
use thiserror::Error;

pub type AnalyzerResult<T> = Result<T, AnalyzerError>;

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to load workbook: {0}")]
    Load(String),

    #[error("Unsupported workbook format: {0}")]
    Unsupported(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Circular dependency detected between: {}", format_cells(.0))]
    CycleDetected(Vec<CellAddress>),

    #[error("Cell not found: {0}")]
    CellNotFound(String),
}

fn format_cells(cells: &[CellAddress]) -> String {
    cells
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_error_names_every_cell() {
        let err = AnalyzerError::CycleDetected(vec![
            CellAddress::new("S", 1, 1),
            CellAddress::new("S", 1, 2),
        ]);
        assert_eq!(
            err.to_string(),
            "Circular dependency detected between: S!A1, S!B1"
        );
    }
}
