use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Serialize;
use tracing::{info, warn};

use crate::cli::{EvaluateArgs, MetricScopeArg};
use crate::ground_truth::resolve::resolve_documents;
use crate::ground_truth::{excel, legacy, multi_json};
use crate::matcher::{MatcherConfig, match_metric, match_other, score_row, value_appears_in_set};
use crate::model::{EvalRow, MetricKind, MetricRecord};
use crate::predictions::{
    PredictionSet, canonical_metrics, numbers_in_text, parse_response, performance_numbers,
    resolve_other_prediction,
};
use crate::pricing::cost_usd;
use crate::util::{discover_pdfs, file_stem_string, now_utc_string, write_json_pretty};

/// One document queued for scoring, independent of which source shape it
/// came from.
#[derive(Debug, Clone)]
struct EvalCase {
    test_case_id: String,
    metrics: MetricRecord,
}

#[derive(Debug, Serialize)]
struct EvalTrace {
    generated_at: String,
    tolerance: f64,
    rescale_fractional_irr: bool,
    rows: Vec<EvalRow>,
    warnings: Vec<String>,
}

pub fn run(args: EvaluateArgs) -> Result<()> {
    let config = MatcherConfig {
        tolerance: args.tolerance,
        rescale_fractional_irr: args.rescale_fractional_irr,
    };

    let (mut cases, mut warnings) = collect_cases(&args)?;
    if !args.test_case_ids.is_empty() {
        cases.retain(|case| args.test_case_ids.contains(&case.test_case_id));
        if cases.is_empty() {
            bail!("no test cases left after applying --test-case-id filters");
        }
    }
    info!(cases = cases.len(), "collected evaluation cases");

    let predictions = PredictionSet::load(&args.predictions)?;

    let mut rows = Vec::new();
    for case in &cases {
        let Some(runs) = predictions.runs_for(&case.test_case_id) else {
            let message = format!("no recorded runs for test case {:?}", case.test_case_id);
            warn!("{message}");
            warnings.push(message);
            continue;
        };
        for run in runs {
            rows.push(score_run(case, run, &config, &args.metrics));
        }
    }
    if rows.is_empty() {
        bail!("no (test case, model run) pairs to score");
    }

    write_csv(&args.output, &rows)?;
    let trace_path = args.output.with_extension("json");
    write_json_pretty(
        &trace_path,
        &EvalTrace {
            generated_at: now_utc_string(),
            tolerance: config.tolerance,
            rescale_fractional_irr: config.rescale_fractional_irr,
            rows: rows.clone(),
            warnings,
        },
    )?;
    info!(csv = %args.output.display(), trace = %trace_path.display(), "wrote evaluation reports");

    log_model_summary(&rows);
    enforce_parse_rate(&rows, args.fail_fast_parse_rate)
}

/// Run gate: a low parse rate means the responses themselves are broken and
/// every score downstream is suspect. Reports are written first so the
/// failures can be inspected.
fn enforce_parse_rate(rows: &[EvalRow], threshold: Option<f64>) -> Result<()> {
    let parsed = rows.iter().filter(|r| r.parse_ok).count();
    let rate = parsed as f64 / rows.len() as f64;
    info!(
        rows = rows.len(),
        parse_ok = parsed,
        parse_rate = format!("{:.2}%", rate * 100.0),
        "run summary"
    );
    if let Some(threshold) = threshold {
        if rate < threshold {
            bail!(
                "parse_ok rate {:.2}% is below threshold {:.2}%; failing fast",
                rate * 100.0,
                threshold * 100.0
            );
        }
    }
    Ok(())
}

fn collect_cases(args: &EvaluateArgs) -> Result<(Vec<EvalCase>, Vec<String>)> {
    if let (Some(pdf), Some(ground_truth)) = (&args.pdf, &args.ground_truth) {
        let case = EvalCase {
            test_case_id: file_stem_string(pdf)?,
            metrics: legacy::load_metric_ground_truth(ground_truth)?,
        };
        return Ok((vec![case], Vec::new()));
    }

    if let Some(dir) = &args.test_cases_dir {
        return collect_test_case_dirs(dir);
    }

    if let Some(pdf_dir) = &args.pdf_dir {
        let set = match (&args.ground_truth_excel, &args.ground_truth_json) {
            (Some(path), None) => excel::load(path)?,
            (None, Some(path)) => multi_json::load(path, args.rescale_fractional_irr)?,
            _ => bail!(
                "--pdf-dir needs exactly one of --ground-truth-excel or --ground-truth-json"
            ),
        };
        if set.is_empty() {
            bail!("ground truth source has no usable rows");
        }
        let pdfs = discover_pdfs(pdf_dir)?;
        if pdfs.is_empty() {
            bail!("no PDFs found in {}", pdf_dir.display());
        }

        let resolution = resolve_documents(&pdfs, &set, args.match_by_order)?;
        let mut warnings = set.warnings.clone();
        warnings.extend(
            resolution
                .unmatched
                .iter()
                .map(|name| format!("no ground truth row resolves to PDF {name:?}")),
        );
        let cases = resolution
            .cases
            .into_iter()
            .map(|case| EvalCase {
                test_case_id: case.test_case_id,
                metrics: case.metrics,
            })
            .collect();
        return Ok((cases, warnings));
    }

    bail!("pass one of --pdf + --ground-truth, --test-cases-dir, or --pdf-dir")
}

/// A test-cases directory holds one subdirectory per document, each with a
/// `ground_truth.json`. Subdirectories without one are skipped with a warning.
fn collect_test_case_dirs(dir: &Path) -> Result<(Vec<EvalCase>, Vec<String>)> {
    let mut subdirs: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("failed to read {}", dir.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    subdirs.sort();

    if subdirs.is_empty() {
        bail!("no test case subdirectories in {}", dir.display());
    }

    let mut cases = Vec::new();
    let mut warnings = Vec::new();
    for subdir in subdirs {
        let ground_truth = subdir.join("ground_truth.json");
        let id = file_stem_string(&subdir)?;
        if !ground_truth.is_file() {
            let message = format!("test case {id:?} has no ground_truth.json; skipping");
            warn!("{message}");
            warnings.push(message);
            continue;
        }
        cases.push(EvalCase {
            test_case_id: id,
            metrics: legacy::load_metric_ground_truth(&ground_truth)?,
        });
    }
    Ok((cases, warnings))
}

fn score_run(
    case: &EvalCase,
    run: &crate::predictions::ModelRun,
    config: &MatcherConfig,
    scope: &[MetricScopeArg],
) -> EvalRow {
    let parsed = parse_response(&run.response);
    let predicted = canonical_metrics(&parsed.data);

    let matches: Vec<_> = MetricKind::ALL
        .iter()
        .map(|&kind| match_metric(kind, predicted.get(kind), case.metrics.get(kind), config))
        .collect();
    let other_predicted =
        resolve_other_prediction(&parsed.data, case.metrics.other_metric_label.as_deref());
    let other = match_other(
        case.metrics.other_metric_label.as_deref(),
        other_predicted,
        case.metrics.other_metric_value,
        config,
    );

    // Match flags cover everything; the score counts only what is in scope.
    let scoped = scoped_metrics(&case.metrics, scope);
    let score = score_row(&scoped, &matches, other.as_ref());

    let mut numbers_extracted = performance_numbers(&parsed.data);
    for n in numbers_in_text(&run.response) {
        if !numbers_extracted.contains(&n) {
            numbers_extracted.push(n);
        }
    }

    let grading_explanation = explain(case, &matches, other.as_ref(), &numbers_extracted, config);

    EvalRow {
        test_case_id: case.test_case_id.clone(),
        model_id: run.model_id.clone(),
        provider: run.provider.clone(),
        input_tokens: run.input_tokens,
        output_tokens: run.output_tokens,
        cost_usd: cost_usd(&run.model_id, &run.provider, run.input_tokens, run.output_tokens),
        parse_ok: parsed.parse_ok(),
        parse_error: parsed.parse_error,
        matches,
        other,
        score,
        grading_explanation,
        numbers_extracted,
    }
}

/// Null out metrics excluded by --metric so they leave the score denominator
/// without disturbing the reported match flags.
fn scoped_metrics(record: &MetricRecord, scope: &[MetricScopeArg]) -> MetricRecord {
    if scope.is_empty() {
        return record.clone();
    }
    let mut scoped = record.clone();
    for (kind, arg) in [
        (MetricKind::Irr, MetricScopeArg::Irr),
        (MetricKind::Moic, MetricScopeArg::Moic),
        (MetricKind::Dpi, MetricScopeArg::Dpi),
    ] {
        if !scope.contains(&arg) {
            scoped.set(kind, None);
        }
    }
    if !scope.contains(&MetricScopeArg::Other) {
        scoped.other_metric_value = None;
    }
    scoped
}

/// Human-readable per-metric verdicts. A strict miss whose expected value
/// still appears somewhere in the response is called out; that usually means
/// the model put the right number under the wrong field.
fn explain(
    case: &EvalCase,
    matches: &[crate::model::MatchResult],
    other: Option<&crate::model::OtherMatch>,
    numbers: &[f64],
    config: &MatcherConfig,
) -> String {
    let mut parts = Vec::with_capacity(matches.len() + 1);
    for result in matches {
        if case.metrics.get(result.kind).is_none() && result.predicted.is_none() {
            parts.push(format!("{}: not reported, correctly omitted", result.kind));
            continue;
        }
        let expected = fmt_opt(result.ground_truth);
        let got = fmt_opt(result.predicted);
        if result.matched {
            parts.push(format!("{}: expected {expected}, got {got}, match", result.kind));
        } else {
            let elsewhere = value_appears_in_set(
                result.ground_truth,
                numbers,
                config.tolerance,
                result.kind.is_rate(),
            );
            if result.ground_truth.is_some() && elsewhere {
                parts.push(format!(
                    "{}: expected {expected}, got {got}, miss (value present elsewhere in response)",
                    result.kind
                ));
            } else {
                parts.push(format!("{}: expected {expected}, got {got}, miss", result.kind));
            }
        }
    }
    if let Some(other) = other {
        let name = other.label.as_deref().unwrap_or("other");
        let verdict = if other.matched { "match" } else { "miss" };
        parts.push(format!(
            "{name}: expected {}, got {}, {verdict}",
            other.ground_truth,
            fmt_opt(other.predicted)
        ));
    }
    parts.join("; ")
}

fn fmt_opt(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{v}"),
        None => "null".to_owned(),
    }
}

fn write_csv(path: &Path, rows: &[EvalRow]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            crate::util::ensure_directory(parent)?;
        }
    }
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("failed to create csv report: {}", path.display()))?;

    writer.write_record([
        "test_case_id",
        "model_id",
        "provider",
        "input_tokens",
        "output_tokens",
        "cost_usd",
        "parse_ok",
        "parse_error",
        "irr_expected",
        "irr_predicted",
        "irr_match",
        "moic_expected",
        "moic_predicted",
        "moic_match",
        "dpi_expected",
        "dpi_predicted",
        "dpi_match",
        "other_label",
        "other_expected",
        "other_predicted",
        "other_match",
        "score_numerator",
        "score_denominator",
        "overall_score",
        "grading_explanation",
    ])?;

    for row in rows {
        let mut record = vec![
            row.test_case_id.clone(),
            row.model_id.clone(),
            row.provider.clone(),
            row.input_tokens.to_string(),
            row.output_tokens.to_string(),
            format!("{:.6}", row.cost_usd),
            row.parse_ok.to_string(),
            row.parse_error.clone().unwrap_or_default(),
        ];
        for kind in MetricKind::ALL {
            match row.match_for(kind) {
                Some(result) => {
                    record.push(csv_opt(result.ground_truth));
                    record.push(csv_opt(result.predicted));
                    record.push(result.matched.to_string());
                }
                None => record.extend([String::new(), String::new(), String::new()]),
            }
        }
        match &row.other {
            Some(other) => {
                record.push(other.label.clone().unwrap_or_default());
                record.push(format!("{}", other.ground_truth));
                record.push(csv_opt(other.predicted));
                record.push(other.matched.to_string());
            }
            None => record.extend([String::new(), String::new(), String::new(), String::new()]),
        }
        record.push(row.score.numerator.to_string());
        record.push(row.score.denominator.to_string());
        record.push(match row.score.overall {
            Some(overall) => format!("{overall}"),
            None => "N/A".to_owned(),
        });
        record.push(row.grading_explanation.clone());
        writer.write_record(&record)?;
    }

    writer
        .flush()
        .with_context(|| format!("failed to flush csv report: {}", path.display()))
}

fn csv_opt(value: Option<f64>) -> String {
    value.map(|v| format!("{v}")).unwrap_or_default()
}

fn log_model_summary(rows: &[EvalRow]) {
    let mut by_model: BTreeMap<&str, (f64, u32, u32, f64)> = BTreeMap::new();
    for row in rows {
        let entry = by_model.entry(row.model_id.as_str()).or_default();
        if row.score.is_na() {
            entry.2 += 1;
        } else if let Some(overall) = row.score.overall {
            entry.0 += overall;
            entry.1 += 1;
        }
        entry.3 += row.cost_usd;
    }
    for (model_id, (sum, scored, na_rows, cost)) in by_model {
        let mean = (scored > 0).then(|| sum / f64::from(scored));
        match mean {
            Some(mean) => info!(
                model_id,
                scored_rows = scored,
                na_rows,
                mean_score = format!("{mean:.4}"),
                cost_usd = format!("{cost:.4}"),
                "model summary"
            ),
            None => info!(model_id, na_rows, cost_usd = format!("{cost:.4}"), "model summary (all rows N/A)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{EvalCase, enforce_parse_rate, score_run};
    use crate::cli::MetricScopeArg;
    use crate::matcher::MatcherConfig;
    use crate::model::{MetricKind, MetricRecord};
    use crate::predictions::ModelRun;

    fn run_with(response: &str) -> ModelRun {
        ModelRun {
            model_id: "gpt-5-mini".to_owned(),
            provider: "openai".to_owned(),
            input_tokens: 10_000,
            output_tokens: 1_000,
            response: response.to_owned(),
        }
    }

    fn case() -> EvalCase {
        EvalCase {
            test_case_id: "Fund A Q3 2025".to_owned(),
            metrics: MetricRecord {
                net_irr: Some(15.5),
                net_moic: Some(2.2),
                net_dpi: None,
                ..MetricRecord::default()
            },
        }
    }

    #[test]
    fn exact_extraction_scores_full_marks() {
        let row = score_run(
            &case(),
            &run_with(r#"{"net_irr": 15.5, "net_moic": 2.2, "net_dpi": null}"#),
            &MatcherConfig::default(),
            &[],
        );
        assert!(row.parse_ok);
        assert_eq!(row.score.numerator, 2);
        assert_eq!(row.score.denominator, 2);
        assert_eq!(row.score.overall, Some(1.0));
        assert!(row.match_for(MetricKind::Dpi).unwrap().matched);
        assert!(row.other.is_none());
        assert!(row.cost_usd > 0.0);
    }

    #[test]
    fn wrong_field_miss_is_flagged_as_present_elsewhere() {
        // IRR landed in the DPI field; strict match fails but the audit
        // trail shows the value was extracted.
        let row = score_run(
            &case(),
            &run_with(r#"{"net_irr": null, "net_moic": 2.2, "net_dpi": 15.5}"#),
            &MatcherConfig::default(),
            &[],
        );
        assert_eq!(row.score.numerator, 1);
        assert_eq!(row.score.denominator, 2);
        assert!(row
            .grading_explanation
            .contains("value present elsewhere in response"));
    }

    #[test]
    fn unparseable_response_scores_zero_with_error() {
        let row = score_run(&case(), &run_with("no json at all"), &MatcherConfig::default(), &[]);
        assert!(!row.parse_ok);
        assert!(row.parse_error.is_some());
        assert_eq!(row.score.numerator, 0);
        assert_eq!(row.score.denominator, 2);
    }

    #[test]
    fn document_without_metrics_scores_not_applicable() {
        let case = EvalCase {
            test_case_id: "memo".to_owned(),
            metrics: MetricRecord::default(),
        };
        let row = score_run(
            &case,
            &run_with(r#"{"net_irr": null, "net_moic": null, "net_dpi": null}"#),
            &MatcherConfig::default(),
            &[],
        );
        assert!(row.score.is_na());
        assert_eq!(row.score.overall, None);
    }

    #[test]
    fn other_metric_ground_truth_is_scored_by_label() {
        let case = EvalCase {
            test_case_id: "credit fund".to_owned(),
            metrics: MetricRecord {
                other_metric_label: Some("Current Yield".to_owned()),
                other_metric_value: Some(8.6),
                ..MetricRecord::default()
            },
        };
        let row = score_run(
            &case,
            &run_with(r#"{"irr": null, "current_yield": 8.6}"#),
            &MatcherConfig::default(),
            &[],
        );
        let other = row.other.as_ref().expect("other in scope");
        assert!(other.matched);
        assert_eq!(row.score.denominator, 1);
        assert_eq!(row.score.overall, Some(1.0));
        assert!(row.grading_explanation.contains("Current Yield"));
    }

    #[test]
    fn metric_scope_restricts_the_score_but_not_the_match_flags() {
        let row = score_run(
            &case(),
            &run_with(r#"{"net_irr": 15.5, "net_moic": 1.0}"#),
            &MatcherConfig::default(),
            &[MetricScopeArg::Irr],
        );
        // MOIC is wrong, but only IRR counts toward the score.
        assert_eq!(row.score.denominator, 1);
        assert_eq!(row.score.overall, Some(1.0));
        assert!(!row.match_for(MetricKind::Moic).unwrap().matched);
    }

    #[test]
    fn low_parse_rate_fails_the_run_when_gated() {
        let rows = vec![
            score_run(&case(), &run_with(r#"{"net_irr": 15.5}"#), &MatcherConfig::default(), &[]),
            score_run(&case(), &run_with("no json at all"), &MatcherConfig::default(), &[]),
        ];
        assert!(enforce_parse_rate(&rows, None).is_ok());
        assert!(enforce_parse_rate(&rows, Some(0.5)).is_ok());
        let err = enforce_parse_rate(&rows, Some(0.98)).expect_err("below threshold");
        assert!(err.to_string().contains("failing fast"));
    }
}
