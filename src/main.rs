use clap::{Parser, Subcommand};
use royalbit_sheetlens::cli;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sheetlens")]
#[command(about = "Formula dependency graphs and financial metric tagging for Excel models.")]
#[command(long_about = "Sheetlens - Spreadsheet dependency analyzer
Reference graph | Evaluation order | Cycle detection | Table regions | Metrics

Reads .xlsx, .xlsm, .xlsb, .xls and .ods workbooks. Nothing is recalculated:
values are the ones Excel cached when the file was saved.

COMMANDS:
  analyze   - Full analysis, writes a JSON report
  order     - Print cells in dependency order
  cycles    - List circular references (exit code 1 when found)
  tables    - Explicit and detected table regions
  metrics   - Cells computing IRR, NPV, PMT, DSCR, EBITDA, ...
  sensitivity - Cells tagged as scenario inputs (prefix, name, note, fill)
  audit     - Show the dependency chain of one cell

CONFIG:
  Optional YAML file (--config or SHEETLENS_CONFIG):

  expected_sheets: [Inputs, Cashflow]
  report_dir: reports
  metrics:
    keywords:
      LLCR: Loan life coverage ratio
  sensitivity:
    highlight_colors: [\"#FFFF00\"]

LOGGING:
  RUST_LOG=royalbit_sheetlens=debug for step-by-step tracing

EXAMPLES:
  sheetlens analyze model.xlsx                 # Report to reports/analysis_model.json
  sheetlens analyze a.xlsx b.xlsx --no-report  # Summaries only
  sheetlens audit model.xlsx \"Summary!B12\"     # Where does B12 come from?
  sheetlens cycles model.xlsx && echo clean")]
#[command(version)]
struct Cli {
    /// Analysis settings (YAML)
    #[arg(short, long, global = true, env = "SHEETLENS_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(long_about = "Analyze one or more workbooks.

Builds the dependency graph, evaluation order, table regions and metric
matches for every file, prints a summary and writes the complete result as
JSON. Several files are analyzed in parallel.

REPORT LOCATION:
  Default: <report_dir>/analysis_<file stem>.json (report_dir from config,
  'reports' when unset). --report overrides it for a single workbook.")]
    /// Analyze workbooks and write JSON reports
    Analyze {
        /// Workbook files
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Report path (single workbook only)
        #[arg(short, long)]
        report: Option<PathBuf>,

        /// Print the summary without writing a report
        #[arg(long, conflicts_with = "report")]
        no_report: bool,

        /// Show parse warnings and sheet issues
        #[arg(short, long)]
        verbose: bool,
    },

    #[command(long_about = "Print every cell of the dependency graph in evaluation order.

Each cell appears after all the cells it reads. Ties are broken by sheet,
row, then column, so the order is identical across runs. Cells on circular
references are left out and counted at the end.")]
    /// Print cells in dependency order
    Order {
        /// Workbook file
        file: PathBuf,
    },

    #[command(long_about = "List circular reference groups.

Each group is a set of cells that read each other, directly or through other
cells. A formula reading its own cell is a group of one.

Exits with code 1 when any group exists, so it can gate a CI pipeline.")]
    /// List circular references
    Cycles {
        /// Workbook file
        file: PathBuf,
    },

    /// Show explicit and heuristic table regions
    Tables {
        /// Workbook file
        file: PathBuf,
    },

    /// Show cells recognized as financial metrics
    Metrics {
        /// Workbook file
        file: PathBuf,
    },

    #[command(long_about = "List cells tagged as sensitivity inputs.

A cell is tagged when its text starts with the prefix (default
'Sensitivity_'), when a defined name with the prefix points at it, when its
note contains a keyword, or when its fill is a configured highlight colour.
Notes and fills are read from .xlsx/.xlsm files only.")]
    /// List sensitivity input cells
    Sensitivity {
        /// Workbook file
        file: PathBuf,
    },

    #[command(long_about = "Show the audit trail for a cell.

Displays the cell's value and formula, the full tree of cells it reads and
every cell that reads it, plus any metrics anchored on it.

EXAMPLE:
  sheetlens audit model.xlsx \"'Debt Schedule'!F20\"")]
    /// Show the dependency chain of a cell
    Audit {
        /// Workbook file
        file: PathBuf,

        /// Cell to audit, e.g. Summary!B12
        cell: String,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "royalbit_sheetlens=debug"
    } else {
        "royalbit_sheetlens=warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()))
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let verbose = matches!(cli.command, Commands::Analyze { verbose: true, .. });
    init_tracing(verbose);
    let config = cli.config;

    match cli.command {
        Commands::Analyze {
            files,
            report,
            no_report,
            verbose,
        } => cli::analyze(files, config, report, no_report, verbose),

        Commands::Order { file } => cli::order(file, config),

        Commands::Cycles { file } => cli::cycles(file, config),

        Commands::Tables { file } => cli::tables(file, config),

        Commands::Metrics { file } => cli::metrics(file, config),

        Commands::Sensitivity { file } => cli::sensitivity(file, config),

        Commands::Audit { file, cell } => cli::audit(file, cell, config),
    }
}
