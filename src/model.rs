use std::fmt;

use serde::{Deserialize, Serialize};

/// The three fund-level metrics every evaluation scores.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
pub enum MetricKind {
    Irr,
    Moic,
    Dpi,
}

impl MetricKind {
    pub const ALL: [MetricKind; 3] = [MetricKind::Irr, MetricKind::Moic, MetricKind::Dpi];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Irr => "irr",
            Self::Moic => "moic",
            Self::Dpi => "dpi",
        }
    }

    /// Rate-like metrics are reported in percentage points and are eligible
    /// for fraction rescaling; multiples never are.
    pub fn is_rate(self) -> bool {
        matches!(self, Self::Irr)
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Expected fund-level metrics for one document. Null means "not reported in
/// this document", which is a valid outcome for non-performance documents.
/// Credit and yield funds often report a headline figure that is none of the
/// three core metrics (current yield, distribution rate, revenue growth);
/// that lands in the labeled "other" channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub net_irr: Option<f64>,
    pub net_moic: Option<f64>,
    pub net_dpi: Option<f64>,
    #[serde(default)]
    pub other_metric_label: Option<String>,
    #[serde(default)]
    pub other_metric_value: Option<f64>,
}

impl MetricRecord {
    pub fn get(&self, kind: MetricKind) -> Option<f64> {
        match kind {
            MetricKind::Irr => self.net_irr,
            MetricKind::Moic => self.net_moic,
            MetricKind::Dpi => self.net_dpi,
        }
    }

    pub fn set(&mut self, kind: MetricKind, value: Option<f64>) {
        match kind {
            MetricKind::Irr => self.net_irr = value,
            MetricKind::Moic => self.net_moic = value,
            MetricKind::Dpi => self.net_dpi = value,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.net_irr.is_none()
            && self.net_moic.is_none()
            && self.net_dpi.is_none()
            && self.other_metric_value.is_none()
    }
}

/// Expected narrative sections for one document. Order carries priority and
/// is preserved from the source.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QualitativeRecord {
    #[serde(default)]
    pub investment_performance: Vec<String>,
    #[serde(default)]
    pub key_takeaways: Vec<String>,
    #[serde(default)]
    pub business_updates: Vec<String>,
}

/// Outcome of matching one predicted value against ground truth for a single
/// metric. Raw values are retained for audit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    pub kind: MetricKind,
    pub predicted: Option<f64>,
    pub ground_truth: Option<f64>,
    pub matched: bool,
}

/// Outcome of matching the labeled "other" metric. Only built when ground
/// truth carries an other-metric value; the label may be absent when the
/// source recorded a figure without naming it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OtherMatch {
    pub label: Option<String>,
    pub predicted: Option<f64>,
    pub ground_truth: f64,
    pub matched: bool,
}

/// Overall score for one row. A document whose ground truth carries no
/// metrics at all is out of scope and reported as N/A, not as 0 or 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Score {
    pub numerator: u32,
    pub denominator: u32,
    pub overall: Option<f64>,
}

impl Score {
    pub fn not_applicable() -> Self {
        Self {
            numerator: 0,
            denominator: 0,
            overall: None,
        }
    }

    pub fn is_na(&self) -> bool {
        self.denominator == 0
    }
}

/// One scored (document, model) pair, flattened into the CSV report and the
/// JSON trace.
#[derive(Debug, Clone, Serialize)]
pub struct EvalRow {
    pub test_case_id: String,
    pub model_id: String,
    pub provider: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
    pub parse_ok: bool,
    pub parse_error: Option<String>,
    pub matches: Vec<MatchResult>,
    pub other: Option<OtherMatch>,
    pub score: Score,
    pub grading_explanation: String,
    pub numbers_extracted: Vec<f64>,
}

impl EvalRow {
    pub fn match_for(&self, kind: MetricKind) -> Option<&MatchResult> {
        self.matches.iter().find(|m| m.kind == kind)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PdfEntry {
    pub filename: String,
    pub sha256: String,
    pub ground_truth_resolved: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PdfInventoryManifest {
    pub manifest_version: u32,
    pub generated_at: String,
    pub source_directory: String,
    pub pdf_count: usize,
    pub resolved_count: usize,
    pub unmatched: Vec<String>,
    pub pdfs: Vec<PdfEntry>,
}
