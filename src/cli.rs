use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(
    name = "fundeval",
    version,
    about = "Evaluation harness for fund-update metric extraction"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Scan the PDF directory and report ground-truth coverage.
    Inventory(InventoryArgs),
    /// Score recorded model responses against metric ground truth.
    Evaluate(EvaluateArgs),
    /// Score predicted narrative sections against qualitative ground truth.
    Qualitative(QualitativeArgs),
}

#[derive(Args, Debug, Clone)]
pub struct InventoryArgs {
    #[arg(long)]
    pub pdf_dir: PathBuf,

    #[arg(long)]
    pub ground_truth_excel: Option<PathBuf>,

    #[arg(long)]
    pub ground_truth_json: Option<PathBuf>,

    #[arg(long)]
    pub manifest_path: Option<PathBuf>,

    #[arg(long, default_value_t = false)]
    pub dry_run: bool,
}

#[derive(Args, Debug, Clone)]
pub struct EvaluateArgs {
    /// Single PDF plus its ground-truth JSON.
    #[arg(long, requires = "ground_truth")]
    pub pdf: Option<PathBuf>,

    #[arg(long, requires = "pdf")]
    pub ground_truth: Option<PathBuf>,

    /// Directory of test-case subdirectories, each holding a PDF and a
    /// ground_truth.json.
    #[arg(long, conflicts_with_all = ["pdf", "pdf_dir"])]
    pub test_cases_dir: Option<PathBuf>,

    /// Directory of PDFs paired with a shared ground-truth file.
    #[arg(long, conflicts_with = "pdf")]
    pub pdf_dir: Option<PathBuf>,

    #[arg(long, requires = "pdf_dir", conflicts_with = "ground_truth_json")]
    pub ground_truth_excel: Option<PathBuf>,

    #[arg(long, requires = "pdf_dir")]
    pub ground_truth_json: Option<PathBuf>,

    /// Recorded model responses keyed by test case id.
    #[arg(long)]
    pub predictions: PathBuf,

    /// CSV report path; a .json trace is written beside it.
    #[arg(long, default_value = "eval_results.csv")]
    pub output: PathBuf,

    #[arg(long, default_value_t = 0.01)]
    pub tolerance: f64,

    /// Pair the Nth PDF (sorted by filename) with the Nth ground-truth row
    /// instead of matching by name.
    #[arg(long, default_value_t = false)]
    pub match_by_order: bool,

    /// Restrict the run to these test case ids.
    #[arg(long = "test-case-id")]
    pub test_case_ids: Vec<String>,

    /// Lift fraction-style IRR values (0.103) to percentage points.
    #[arg(long, default_value_t = false)]
    pub rescale_fractional_irr: bool,

    /// Fail the run when the fraction of rows with a parseable response
    /// falls below this threshold (e.g. 0.98).
    #[arg(long)]
    pub fail_fast_parse_rate: Option<f64>,

    /// Restrict scoring to these metrics; match flags are still reported
    /// for everything.
    #[arg(long = "metric", value_enum)]
    pub metrics: Vec<MetricScopeArg>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum MetricScopeArg {
    Irr,
    Moic,
    Dpi,
    Other,
}

#[derive(Args, Debug, Clone)]
pub struct QualitativeArgs {
    #[arg(long)]
    pub test_cases_dir: PathBuf,

    /// Directory of predicted update texts, one <test_case_id>.txt each.
    #[arg(long)]
    pub predictions_dir: PathBuf,

    #[arg(long, default_value = "qualitative_results.csv")]
    pub output: PathBuf,
}
