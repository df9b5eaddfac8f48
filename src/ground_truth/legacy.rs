//! Per-test-case `ground_truth.json` files: either explicit metric fields or
//! the legacy shape where metrics are embedded in the
//! `investment_performance` string list.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use regex::Regex;
use serde_json::Value;

use crate::matcher::normalize_value;
use crate::model::{MetricRecord, QualitativeRecord};

/// Load one document's metric ground truth. Explicit `net_irr`/`net_moic`/
/// `net_dpi` keys win; otherwise the `investment_performance` list is parsed
/// best-effort.
pub fn load_metric_ground_truth(path: &Path) -> Result<MetricRecord> {
    let data = read_json(path)?;

    let has_explicit = ["net_irr", "net_moic", "net_dpi"]
        .iter()
        .any(|key| data.get(key).is_some());
    if has_explicit {
        return Ok(MetricRecord {
            net_irr: json_number(data.get("net_irr")),
            net_moic: json_number(data.get("net_moic")),
            net_dpi: json_number(data.get("net_dpi")),
            other_metric_label: data
                .get("other_metric_label")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(ToOwned::to_owned),
            other_metric_value: json_number(data.get("other_metric_value")),
        });
    }

    let lines = string_list(data.get("investment_performance"));
    Ok(parse_performance_lines(&lines))
}

/// Load the three narrative sections. Each may be a list of strings or a
/// single string; order is preserved.
pub fn load_qualitative_ground_truth(path: &Path) -> Result<QualitativeRecord> {
    let data = read_json(path)?;
    Ok(QualitativeRecord {
        investment_performance: string_list(data.get("investment_performance")),
        key_takeaways: string_list(data.get("key_takeaways")),
        business_updates: string_list(data.get("business_updates")),
    })
}

fn read_json(path: &Path) -> Result<Value> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read ground truth: {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse ground truth json: {}", path.display()))
}

/// Accept a number, a decorated string ("15.5%", "2.5x"), or null.
pub fn json_number(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite()),
        Value::String(s) => normalize_value(s),
        _ => None,
    }
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| item.as_str())
            .map(ToOwned::to_owned)
            .collect(),
        Some(Value::String(s)) if !s.is_empty() => vec![s.clone()],
        _ => Vec::new(),
    }
}

/// Parse the first IRR, MOIC/TVPI, and DPI figures out of free-text
/// performance lines. A line that matches no pattern contributes nothing;
/// missing metrics stay null rather than erroring.
pub fn parse_performance_lines(lines: &[String]) -> MetricRecord {
    // First capture group that matched wins, mirroring the label variants
    // seen in real updates (Net/Gross prefix, bare label, trailing label).
    let irr = Regex::new(
        r"(?i)(?:net|gross)\s+irr[:\s]+~?([\d.,]+)\s*%|irr[:\s]+~?([\d.,]+)\s*%|~?([\d.,]+)\s*%\s*(?:net|gross)\s+irr",
    )
    .expect("irr pattern");
    let moic = Regex::new(
        r"(?i)(?:net\s+|gross\s+)?(?:moic|tvpi)[:\s]+([\d.,]+)\s*[x×]|([\d.,]+)\s*[x×]\s*(?:net\s+|gross\s+)?(?:moic|tvpi)",
    )
    .expect("moic pattern");
    let dpi = Regex::new(r"(?i)(?:net\s+)?dpi[:\s]+([\d.,]+)\s*[x%]|([\d.,]+)\s*[x%]\s*(?:net\s+)?dpi")
        .expect("dpi pattern");

    let mut record = MetricRecord::default();
    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if record.net_irr.is_none() {
            record.net_irr = first_capture(&irr, line);
        }
        if record.net_moic.is_none() {
            record.net_moic = first_capture(&moic, line);
        }
        if record.net_dpi.is_none() {
            record.net_dpi = first_capture(&dpi, line);
        }
    }
    record
}

fn first_capture(pattern: &Regex, line: &str) -> Option<f64> {
    let captures = pattern.captures(line)?;
    captures
        .iter()
        .skip(1)
        .flatten()
        .next()
        .and_then(|m| normalize_value(m.as_str()))
}

#[cfg(test)]
mod tests {
    use super::{load_metric_ground_truth, load_qualitative_ground_truth, parse_performance_lines};
    use std::fs;

    fn lines(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn parses_first_irr_and_moic_from_string_list() {
        let record = parse_performance_lines(&lines(&[
            "Net IRR: 15.5% (vs benchmark 13.1%)",
            "Net MOIC: 2.5x",
        ]));
        assert_eq!(record.net_irr, Some(15.5));
        assert_eq!(record.net_moic, Some(2.5));
        assert_eq!(record.net_dpi, None);
    }

    #[test]
    fn tolerates_label_variants_and_tildes() {
        let record = parse_performance_lines(&lines(&[
            "Gross IRR: ~32%",
            "2.2x Gross TVPI to date",
            "DPI: 0.1x",
        ]));
        assert_eq!(record.net_irr, Some(32.0));
        assert_eq!(record.net_moic, Some(2.2));
        assert_eq!(record.net_dpi, Some(0.1));
    }

    #[test]
    fn unmatched_lines_yield_null_not_error() {
        let record = parse_performance_lines(&lines(&[
            "Fund closed two new positions this quarter",
            "",
        ]));
        assert!(record.is_empty());
    }

    #[test]
    fn first_figure_wins_per_metric() {
        let record = parse_performance_lines(&lines(&["Net IRR: 15.5%", "IRR: 12.0%"]));
        assert_eq!(record.net_irr, Some(15.5));
    }

    #[test]
    fn explicit_metric_keys_take_precedence_over_string_list() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("ground_truth.json");
        fs::write(
            &path,
            r#"{"net_irr": 10.3, "net_moic": "1.09x", "net_dpi": null,
                "investment_performance": ["Net IRR: 99.9%"]}"#,
        )
        .expect("write fixture");

        let record = load_metric_ground_truth(&path).expect("load");
        assert_eq!(record.net_irr, Some(10.3));
        assert_eq!(record.net_moic, Some(1.09));
        assert_eq!(record.net_dpi, None);
    }

    #[test]
    fn explicit_other_metric_keys_are_loaded() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("ground_truth.json");
        fs::write(
            &path,
            r#"{"net_irr": null, "other_metric_label": "Current Yield",
                "other_metric_value": "8.6%"}"#,
        )
        .expect("write fixture");

        let record = load_metric_ground_truth(&path).expect("load");
        assert_eq!(record.net_irr, None);
        assert_eq!(record.other_metric_label.as_deref(), Some("Current Yield"));
        assert_eq!(record.other_metric_value, Some(8.6));
    }

    #[test]
    fn qualitative_sections_preserve_order_and_accept_plain_strings() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("ground_truth.json");
        fs::write(
            &path,
            r#"{"investment_performance": ["first", "second"],
                "key_takeaways": "single takeaway",
                "business_updates": []}"#,
        )
        .expect("write fixture");

        let record = load_qualitative_ground_truth(&path).expect("load");
        assert_eq!(record.investment_performance, vec!["first", "second"]);
        assert_eq!(record.key_takeaways, vec!["single takeaway"]);
        assert!(record.business_updates.is_empty());
    }
}
