//! Tolerant numeric matching for financial metrics.
//!
//! Everything here is a pure function of optional numbers plus the declared
//! tolerance and metric kind; no I/O, no state.

use crate::model::{MatchResult, MetricKind, MetricRecord, OtherMatch, Score};

#[derive(Debug, Clone, Copy)]
pub struct MatcherConfig {
    /// Maximum absolute difference still counted as a match.
    pub tolerance: f64,
    /// When set, IRR-kind values with magnitude <= 1 are treated as fractions
    /// (0.155 means 15.5%) and rescaled before comparison. Off by default so
    /// a legitimately low single-digit IRR is never silently reinterpreted.
    pub rescale_fractional_irr: bool,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            tolerance: 0.01,
            rescale_fractional_irr: false,
        }
    }
}

/// Convert a raw cell or string value to a number, stripping the decoration
/// financial sources carry: trailing `%`, `x`/`X`/`×`, currency symbols, and
/// thousands separators. Placeholder strings and NaN come back as None.
pub fn normalize_value(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let lower = trimmed.to_ascii_lowercase();
    if matches!(lower.as_str(), "n/a" | "na" | "null" | "none" | "-") {
        return None;
    }

    let cleaned: String = trimmed
        .chars()
        .filter(|c| !matches!(c, ',' | '$' | '€' | '£'))
        .collect();
    let cleaned = cleaned
        .trim()
        .trim_end_matches(['x', 'X', '×', '%'])
        .trim();

    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Rescale a predicted rate between fraction and percentage-point units so it
/// is comparable to ground truth. Only applies to rate-like metrics and only
/// when the caller enabled the policy; multiples pass through untouched.
pub fn unit_normalize(
    predicted: Option<f64>,
    ground_truth: Option<f64>,
    is_rate: bool,
    config: &MatcherConfig,
) -> Option<f64> {
    let pred = predicted?;
    if !config.rescale_fractional_irr || !is_rate {
        return Some(pred);
    }
    let Some(gt) = ground_truth else {
        return Some(pred);
    };
    // Prediction as fraction (0.103) against percent ground truth (10.3).
    if gt.abs() > 1.0 && pred.abs() <= 1.0 {
        return Some(pred * 100.0);
    }
    // Prediction as percent (16.3) against fraction ground truth (0.163);
    // only take the rescaled value when it actually reduces the error.
    if gt.abs() < 1.0 && pred.abs() > 1.0 {
        let as_fraction = pred / 100.0;
        if (gt - as_fraction).abs() < (gt - pred).abs() {
            return Some(as_fraction);
        }
    }
    Some(pred)
}

/// Core match rule: both null is a correct prediction of absence, one null is
/// a miss, two numbers match within tolerance.
pub fn values_match(ground_truth: Option<f64>, predicted: Option<f64>, tolerance: f64) -> bool {
    match (ground_truth, predicted) {
        (None, None) => true,
        (Some(gt), Some(pred)) => (gt - pred).abs() <= tolerance,
        _ => false,
    }
}

/// Match one metric, applying unit normalization to the predicted side, and
/// keep the raw values for audit.
pub fn match_metric(
    kind: MetricKind,
    predicted: Option<f64>,
    ground_truth: Option<f64>,
    config: &MatcherConfig,
) -> MatchResult {
    let normalized = unit_normalize(predicted, ground_truth, kind.is_rate(), config);
    MatchResult {
        kind,
        predicted,
        ground_truth,
        matched: values_match(ground_truth, normalized, config.tolerance),
    }
}

/// Match the labeled "other" metric. None when ground truth carries no value
/// for it, which keeps it out of the score denominator. Other metrics are
/// usually yield-like, so they follow the rate rescaling policy.
pub fn match_other(
    label: Option<&str>,
    predicted: Option<f64>,
    ground_truth: Option<f64>,
    config: &MatcherConfig,
) -> Option<OtherMatch> {
    let gt = ground_truth?;
    let normalized = unit_normalize(predicted, ground_truth, true, config);
    Some(OtherMatch {
        label: label.map(ToOwned::to_owned),
        predicted,
        ground_truth: gt,
        matched: values_match(Some(gt), normalized, config.tolerance),
    })
}

/// True when `ground_truth` is null or some extracted number matches it.
/// `scale_flex` additionally accepts n*100 and n/100 for rate-like metrics,
/// covering models that report 0.155 for 15.5%.
pub fn value_appears_in_set(
    ground_truth: Option<f64>,
    numbers: &[f64],
    tolerance: f64,
    scale_flex: bool,
) -> bool {
    let Some(gt) = ground_truth else {
        return true;
    };
    numbers.iter().any(|&n| {
        values_match(Some(gt), Some(n), tolerance)
            || (scale_flex
                && (values_match(Some(gt), Some(n * 100.0), tolerance)
                    || values_match(Some(gt), Some(n / 100.0), tolerance)))
    })
}

/// Score a row from ground truth and per-metric match flags. A metric is in
/// scope iff ground truth reports it; a document with nothing in scope gets
/// an N/A score.
pub fn score_row(
    ground_truth: &MetricRecord,
    matches: &[MatchResult],
    other: Option<&OtherMatch>,
) -> Score {
    let mut denominator = 0_u32;
    let mut numerator = 0_u32;
    for result in matches {
        if ground_truth.get(result.kind).is_some() {
            denominator += 1;
            if result.matched {
                numerator += 1;
            }
        }
    }
    if ground_truth.other_metric_value.is_some() {
        denominator += 1;
        if other.is_some_and(|o| o.matched) {
            numerator += 1;
        }
    }
    if denominator == 0 {
        return Score::not_applicable();
    }
    Score {
        numerator,
        denominator,
        overall: Some((f64::from(numerator) / f64::from(denominator) * 10_000.0).round() / 10_000.0),
    }
}
