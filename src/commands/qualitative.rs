use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::{info, warn};

use crate::cli::QualitativeArgs;
use crate::ground_truth::legacy::load_qualitative_ground_truth;
use crate::matcher::value_appears_in_set;
use crate::model::QualitativeRecord;
use crate::predictions::numbers_in_text;
use crate::util::file_stem_string;

const SECTION_TITLES: [&str; 3] = ["investment performance", "key takeaways", "business updates"];
const METRIC_KEYWORDS: [&str; 4] = ["irr", "moic", "tvpi", "dpi"];

// Figures must reproduce exactly up to rounding noise; same absolute
// tolerance as the default metric-eval one.
const NUMBER_TOLERANCE: f64 = 0.01;

/// Scores for one test case. None means the ground truth has no content for
/// that section, so it is out of scope.
#[derive(Debug, Clone)]
struct QualitativeRow {
    test_case_id: String,
    performance: Option<f64>,
    key_takeaways: Option<f64>,
    business_updates: Option<f64>,
    notes: String,
}

impl QualitativeRow {
    fn overall(&self) -> Option<f64> {
        let scored: Vec<f64> = [self.performance, self.key_takeaways, self.business_updates]
            .into_iter()
            .flatten()
            .collect();
        if scored.is_empty() {
            return None;
        }
        let mean = scored.iter().sum::<f64>() / scored.len() as f64;
        Some((mean * 10_000.0).round() / 10_000.0)
    }
}

pub fn run(args: QualitativeArgs) -> Result<()> {
    let mut subdirs: Vec<PathBuf> = fs::read_dir(&args.test_cases_dir)
        .with_context(|| format!("failed to read {}", args.test_cases_dir.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    subdirs.sort();
    if subdirs.is_empty() {
        bail!(
            "no test case subdirectories in {}",
            args.test_cases_dir.display()
        );
    }

    let mut rows = Vec::new();
    for subdir in subdirs {
        let id = file_stem_string(&subdir)?;
        let ground_truth_path = subdir.join("ground_truth.json");
        if !ground_truth_path.is_file() {
            warn!(test_case = %id, "no ground_truth.json; skipping");
            continue;
        }
        let ground_truth = load_qualitative_ground_truth(&ground_truth_path)?;

        let Some(predicted) = read_prediction(&args.predictions_dir, &id)? else {
            warn!(test_case = %id, "no predicted update text; skipping");
            continue;
        };

        rows.push(score_case(&id, &ground_truth, &predicted));
    }
    if rows.is_empty() {
        bail!("no test cases with both ground truth and a predicted update");
    }

    write_csv(&args.output, &rows)?;
    info!(path = %args.output.display(), cases = rows.len(), "wrote qualitative report");
    Ok(())
}

/// Predicted updates are plain text, one file per test case.
fn read_prediction(dir: &Path, test_case_id: &str) -> Result<Option<String>> {
    for extension in ["txt", "md"] {
        let path = dir.join(format!("{test_case_id}.{extension}"));
        if path.is_file() {
            let text = fs::read_to_string(&path)
                .with_context(|| format!("failed to read prediction: {}", path.display()))?;
            return Ok(Some(text));
        }
    }
    Ok(None)
}

fn score_case(test_case_id: &str, ground_truth: &QualitativeRecord, predicted: &str) -> QualitativeRow {
    let mut notes = Vec::new();
    let mut section = |title: &str, expected: &[String], metric_checks: bool| -> Option<f64> {
        if expected.is_empty() {
            return None;
        }
        let Some(body) = extract_section(predicted, title) else {
            notes.push(format!("missing section: {title}"));
            return Some(0.0);
        };
        Some(section_score(expected, &body, metric_checks))
    };

    let performance = section("investment performance", &ground_truth.investment_performance, true);
    let key_takeaways = section("key takeaways", &ground_truth.key_takeaways, false);
    let business_updates = section("business updates", &ground_truth.business_updates, false);

    QualitativeRow {
        test_case_id: test_case_id.to_owned(),
        performance,
        key_takeaways,
        business_updates,
        notes: notes.join("; "),
    }
}

/// Pull one section's body out of a formatted update. A header line is the
/// section title alone, optionally decorated with markdown markers or a
/// trailing colon; the body runs until the next section header.
fn extract_section(text: &str, title: &str) -> Option<String> {
    let mut body: Vec<&str> = Vec::new();
    let mut inside = false;
    for line in text.lines() {
        match header_title(line) {
            Some(header) if header == title => {
                inside = true;
                continue;
            }
            Some(header) if SECTION_TITLES.contains(&header.as_str()) => {
                if inside {
                    break;
                }
                continue;
            }
            _ => {}
        }
        if inside {
            body.push(line);
        }
    }
    inside.then(|| body.join("\n").trim().to_owned())
}

fn header_title(line: &str) -> Option<String> {
    let stripped = line
        .trim()
        .trim_start_matches(['#', '*', '-', ' '])
        .trim_end_matches([':', '*', ' '])
        .trim();
    if stripped.is_empty() || stripped.len() > 40 {
        return None;
    }
    Some(stripped.to_lowercase().replace('_', " "))
}

/// Fraction of checks the predicted section passes. Every figure in the
/// expected items must reappear in the section; for the performance section
/// each metric keyword the expected items mention must be mentioned too.
fn section_score(expected: &[String], body: &str, metric_checks: bool) -> f64 {
    let body_lower = body.to_lowercase();
    let body_numbers = numbers_in_text(body);

    let mut total = 0_u32;
    let mut passed = 0_u32;

    for item in expected {
        for number in numbers_in_text(item) {
            total += 1;
            if value_appears_in_set(Some(number), &body_numbers, NUMBER_TOLERANCE, false) {
                passed += 1;
            }
        }
    }

    if metric_checks {
        let expected_lower = expected.join("\n").to_lowercase();
        for keyword in METRIC_KEYWORDS {
            if expected_lower.contains(keyword) {
                total += 1;
                if body_lower.contains(keyword) {
                    passed += 1;
                }
            }
        }
    }

    // Narrative-only ground truth: presence of a non-empty section is the
    // only thing checkable at the string level.
    if total == 0 {
        return if body.trim().is_empty() { 0.0 } else { 1.0 };
    }
    let score = f64::from(passed) / f64::from(total);
    (score * 10_000.0).round() / 10_000.0
}

fn write_csv(path: &Path, rows: &[QualitativeRow]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            crate::util::ensure_directory(parent)?;
        }
    }
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("failed to create csv report: {}", path.display()))?;

    writer.write_record([
        "test_case_id",
        "performance_score",
        "key_takeaways_score",
        "business_updates_score",
        "overall_score",
        "notes",
    ])?;
    for row in rows {
        writer.write_record([
            row.test_case_id.clone(),
            csv_score(row.performance),
            csv_score(row.key_takeaways),
            csv_score(row.business_updates),
            csv_score(row.overall()),
            row.notes.clone(),
        ])?;
    }
    writer
        .flush()
        .with_context(|| format!("failed to flush csv report: {}", path.display()))
}

fn csv_score(score: Option<f64>) -> String {
    match score {
        Some(v) => format!("{v}"),
        None => "N/A".to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::{extract_section, score_case, section_score};
    use crate::model::QualitativeRecord;

    const UPDATE: &str = "\
# Fund A Quarterly Update

## Investment Performance
Net IRR of 15.5% and Net MOIC of 2.5x as of quarter end.

## Key Takeaways
- Fundraise closed at $500 million.

## Business Updates
Two new platform acquisitions completed.
";

    #[test]
    fn section_extraction_stops_at_the_next_header() {
        let body = extract_section(UPDATE, "investment performance").expect("section");
        assert!(body.contains("15.5%"));
        assert!(!body.contains("Fundraise"));
        assert!(extract_section(UPDATE, "missing section").is_none());
    }

    #[test]
    fn performance_section_checks_numbers_and_metric_keywords() {
        let expected = vec!["Net IRR: 15.5%".to_owned(), "Net MOIC: 2.5x".to_owned()];
        let body = "Net IRR of 15.5% and Net MOIC of 2.5x.";
        assert_eq!(section_score(&expected, body, true), 1.0);

        // Right keyword, wrong figure: 2 of 4 checks pass.
        let body = "Net IRR of 12.0% and Net MOIC of 1.1x.";
        assert_eq!(section_score(&expected, body, true), 0.5);
    }

    #[test]
    fn narrative_only_sections_score_on_presence() {
        let expected = vec!["Completed two acquisitions".to_owned()];
        assert_eq!(section_score(&expected, "We completed deals.", false), 1.0);
        assert_eq!(section_score(&expected, "   ", false), 0.0);
    }

    #[test]
    fn empty_ground_truth_sections_are_out_of_scope() {
        let ground_truth = QualitativeRecord {
            investment_performance: vec!["Net IRR: 15.5%".to_owned()],
            key_takeaways: Vec::new(),
            business_updates: vec!["Two new platform acquisitions completed.".to_owned()],
        };
        let row = score_case("fund_a", &ground_truth, UPDATE);
        assert_eq!(row.performance, Some(1.0));
        assert_eq!(row.key_takeaways, None);
        assert!(row.business_updates.is_some());
        assert!(row.overall().is_some());
    }

    #[test]
    fn missing_predicted_section_scores_zero() {
        let ground_truth = QualitativeRecord {
            investment_performance: vec!["Net IRR: 15.5%".to_owned()],
            ..QualitativeRecord::default()
        };
        let row = score_case("fund_a", &ground_truth, "no headers here");
        assert_eq!(row.performance, Some(0.0));
        assert!(row.notes.contains("missing section"));
    }
}
