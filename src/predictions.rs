//! Recorded model responses and the tolerant parsing that turns them into
//! comparable metric values. Models wrap JSON in prose, markdown fences,
//! invalid escapes, and trailing commas; truncated responses still carry
//! recoverable top-level metrics.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::matcher::normalize_value;
use crate::model::MetricRecord;

/// One recorded model run for one document.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelRun {
    pub model_id: String,
    pub provider: String,
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    /// The raw response text, exactly as the model returned it.
    pub response: String,
}

/// Recorded runs keyed by test case id.
#[derive(Debug, Default)]
pub struct PredictionSet {
    runs: HashMap<String, Vec<ModelRun>>,
}

impl PredictionSet {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read predictions: {}", path.display()))?;
        let runs: HashMap<String, Vec<ModelRun>> = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse predictions json: {}", path.display()))?;
        if runs.is_empty() {
            bail!("predictions file has no entries: {}", path.display());
        }
        Ok(Self { runs })
    }

    pub fn runs_for(&self, test_case_id: &str) -> Option<&[ModelRun]> {
        self.runs.get(test_case_id).map(Vec::as_slice)
    }
}

/// Outcome of parsing one raw response.
#[derive(Debug, Clone)]
pub struct ParsedResponse {
    pub data: Value,
    pub parse_error: Option<String>,
}

impl ParsedResponse {
    pub fn parse_ok(&self) -> bool {
        self.parse_error.is_none()
    }
}

/// Extract the first JSON object from a model response, repairing the
/// mistakes models commonly make. On total failure the object is empty and
/// `parse_error` says why.
pub fn parse_response(raw: &str) -> ParsedResponse {
    let cleaned = strip_code_fences(raw.trim());
    let cleaned = strip_json_prefixes(&cleaned);

    let Some(snippet) = first_json_object(&cleaned) else {
        // Truncated response: salvage top-level metrics with regex.
        let partial = extract_partial_metrics(raw);
        if let Some(partial) = partial {
            return ParsedResponse {
                data: partial,
                parse_error: Some("truncated json; extracted partial metrics".to_owned()),
            };
        }
        return ParsedResponse {
            data: Value::Object(Default::default()),
            parse_error: Some("no json object found in response".to_owned()),
        };
    };

    let mut last_error = String::new();
    for candidate in repair_candidates(snippet) {
        match serde_json::from_str::<Value>(&candidate) {
            Ok(Value::Object(map)) => {
                return ParsedResponse {
                    data: Value::Object(map),
                    parse_error: None,
                };
            }
            Ok(other) => {
                last_error = format!("parsed value is not an object: {other}");
            }
            Err(err) => last_error = err.to_string(),
        }
    }

    ParsedResponse {
        data: Value::Object(Default::default()),
        parse_error: Some(last_error),
    }
}

/// The original snippet, then trailing-comma and invalid-escape repairs,
/// in increasing order of aggressiveness.
fn repair_candidates(snippet: &str) -> Vec<String> {
    let trailing_comma = Regex::new(r",\s*([}\]])").expect("trailing comma pattern");
    let fixed_commas = trailing_comma.replace_all(snippet, "$1").into_owned();
    let mut candidates = vec![snippet.to_owned()];
    if fixed_commas != snippet {
        candidates.push(fixed_commas.clone());
    }
    let repaired = repair_invalid_escapes(snippet);
    if repaired != snippet {
        candidates.push(repaired);
        candidates.push(repair_invalid_escapes(&fixed_commas));
    }
    candidates
}

fn strip_code_fences(text: &str) -> String {
    let Some(start) = text.find("```") else {
        return text.to_owned();
    };
    let body = &text[start + 3..];
    let body = body
        .strip_prefix("json")
        .or_else(|| body.strip_prefix("JSON"))
        .unwrap_or(body);
    let end = body.find("```").unwrap_or(body.len());
    body[..end].trim().to_owned()
}

/// Drop leading junk lines like "json:", "[json]", "here is the json:" so
/// the first `{` really starts the object.
fn strip_json_prefixes(text: &str) -> String {
    let mut lines: Vec<&str> = text.lines().collect();
    while let Some(first) = lines.first() {
        let lowered = first.trim().to_lowercase();
        if lowered.is_empty()
            || matches!(
                lowered.as_str(),
                "[json]" | "json" | "json:" | "here is the json:" | "here is the data:"
            )
        {
            lines.remove(0);
            continue;
        }
        break;
    }
    lines.join("\n").trim().to_owned()
}

/// First balanced `{ ... }` span, so trailing prose after the object is
/// ignored. Brace counting is enough here; responses with braces inside
/// strings that unbalance the count fall through to partial extraction.
fn first_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0_i32;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}

/// JSON allows only \" \\ \/ \b \f \n \r \t \uXXXX; replace any other
/// backslash escape with the escaped character itself.
fn repair_invalid_escapes(snippet: &str) -> String {
    let pattern =
        Regex::new(r#"\\(?:u[0-9a-fA-F]{4}|["\\/bfnrt])|\\(.)"#).expect("escape pattern");
    pattern
        .replace_all(snippet, |caps: &regex::Captures<'_>| {
            match caps.get(1) {
                Some(invalid) => invalid.as_str().to_owned(),
                None => caps[0].to_owned(),
            }
        })
        .into_owned()
}

/// Pull `"net_irr": 26.0` style fields out of a truncated response.
fn extract_partial_metrics(raw: &str) -> Option<Value> {
    let mut map = serde_json::Map::new();
    for key in ["net_irr", "net_moic", "net_dpi"] {
        let pattern = Regex::new(&format!(r#""{key}"\s*:\s*(-?\d+\.?\d*|null)"#))
            .expect("partial metric pattern");
        if let Some(caps) = pattern.captures(raw) {
            let value = match &caps[1] {
                "null" => Value::Null,
                number => match number.parse::<f64>() {
                    Ok(v) => serde_json::Number::from_f64(v)
                        .map(Value::Number)
                        .unwrap_or(Value::Null),
                    Err(_) => continue,
                },
            };
            map.insert(key.to_owned(), value);
        }
    }
    (!map.is_empty()).then_some(Value::Object(map))
}

/// Map a parsed response (old `net_irr` schema or new bare-key schema) to
/// the canonical metric record.
pub fn canonical_metrics(data: &Value) -> MetricRecord {
    MetricRecord {
        net_irr: field_number(data, &["irr", "net_irr"]),
        net_moic: field_number(data, &["moic", "net_moic", "tvpi", "net_tvpi"]),
        net_dpi: field_number(data, &["dpi", "net_dpi"]),
        ..MetricRecord::default()
    }
}

/// Find the predicted value for the ground-truth "other" metric. New-schema
/// responses carry it under a field named like the label (`current_yield`
/// for "Current Yield"); old-schema responses carry an
/// `other_metric_label`/`other_metric_value` pair.
pub fn resolve_other_prediction(data: &Value, label: Option<&str>) -> Option<f64> {
    let Some(wanted) = label.map(canonical_label).filter(|l| !l.is_empty()) else {
        // Label-less ground truth can only be answered by the old-schema
        // value field.
        return value_number(data.get("other_metric_value")?);
    };

    if let Some(fields) = data.as_object() {
        for (key, value) in fields {
            if key != "other_metric_label" && key != "other_metric_value"
                && canonical_label(key) == wanted
            {
                if let Some(n) = value_number(value) {
                    return Some(n);
                }
            }
        }
    }
    let old_label = data.get("other_metric_label").and_then(Value::as_str)?;
    if canonical_label(old_label) == wanted {
        return value_number(data.get("other_metric_value")?);
    }
    None
}

/// Labels compare as lowercase alphanumeric words: "Current Yield",
/// "current_yield", and "current-yield" are the same metric.
fn canonical_label(label: &str) -> String {
    let mapped: String = label
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    mapped.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn field_number(data: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|key| value_number(data.get(*key)?))
}

fn value_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite()),
        Value::String(s) => normalize_value(s),
        _ => None,
    }
}

/// Every number that appears anywhere in the parsed object: the top-level
/// metric fields plus numeric tokens inside the three narrative arrays.
/// Deliberately liberal: naming does not need to match for a ground-truth
/// value to count as present.
pub fn performance_numbers(data: &Value) -> Vec<f64> {
    let mut numbers = Vec::new();
    for key in ["net_irr", "net_moic", "net_dpi", "irr", "moic", "dpi", "tvpi"] {
        if let Some(value) = data.get(key) {
            if let Some(n) = value_number(value) {
                numbers.push(n);
            }
        }
    }
    for key in ["investment_performance", "key_takeaways", "business_updates"] {
        if let Some(Value::Array(items)) = data.get(key) {
            for item in items {
                match item {
                    Value::String(s) => numbers.extend(numbers_in_text(s)),
                    Value::Number(n) => {
                        if let Some(v) = n.as_f64().filter(|v| v.is_finite()) {
                            numbers.push(v);
                        }
                    }
                    _ => {}
                }
            }
        }
    }
    numbers
}

/// Numeric tokens in free text: "Net IRR: 15.5%" yields 15.5, "MOIC 1.2x"
/// yields 1.2, thousands separators are stripped.
pub fn numbers_in_text(text: &str) -> Vec<f64> {
    let pattern = Regex::new(r"-?\d+(?:,\d{3})*(?:\.\d+)?").expect("numeric token pattern");
    pattern
        .find_iter(text)
        .filter_map(|m| m.as_str().replace(',', "").parse::<f64>().ok())
        .collect()
}
