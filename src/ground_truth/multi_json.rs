//! Multi-document ground-truth JSON: a mapping of document name → object
//! whose `GTPDF` field names the source PDF, with metric fields keyed by
//! label ("Net IRR", "Net MOIC", ...).

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde_json::Value;
use tracing::info;

use super::{GroundTruthSet, classify_metric_label};
use crate::model::{MetricKind, MetricRecord};

const ID_KEYS: [&str; 4] = ["GTPDF", "gtpdf", "pdf", "filename"];

/// Load a multi-document ground-truth file. `rescale_fractional_irr`
/// controls whether IRR values recorded as fractions (0.103) are lifted to
/// percentage points; it is an explicit caller policy, never a silent guess.
pub fn load(path: &Path, rescale_fractional_irr: bool) -> Result<GroundTruthSet> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read ground truth json: {}", path.display()))?;
    let data: Value = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse ground truth json: {}", path.display()))?;

    let Value::Object(entries) = data else {
        bail!(
            "ground truth json must be an object of document entries: {}",
            path.display()
        );
    };

    let mut set = GroundTruthSet::default();
    for (doc_name, entry) in &entries {
        let Value::Object(entry) = entry else {
            set.warn(format!("skipping non-object ground truth entry {doc_name:?}"));
            continue;
        };
        // Metrics either sit under a "metrics" key or directly on the entry.
        let metrics_obj = match entry.get("metrics") {
            Some(Value::Object(inner)) => inner,
            Some(_) => {
                set.warn(format!("skipping entry {doc_name:?}: \"metrics\" is not an object"));
                continue;
            }
            None => entry,
        };

        let Some(gtpdf) = ID_KEYS
            .iter()
            .find_map(|key| metrics_obj.get(*key))
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
        else {
            set.warn(format!("skipping entry {doc_name:?}: no GTPDF reference"));
            continue;
        };

        let metrics = metrics_from_labeled_fields(metrics_obj, rescale_fractional_irr);
        if metrics.is_empty() {
            set.warn(format!("entry {doc_name:?} carries no metric values"));
        }
        set.push(gtpdf.to_owned(), metrics)?;
    }

    info!(
        path = %path.display(),
        documents = set.len(),
        "loaded multi-document ground truth json"
    );
    Ok(set)
}

/// Fold labeled metric fields into a record. The first field naming each
/// metric wins; the first unrecognized non-null label claims the "other"
/// channel.
fn metrics_from_labeled_fields(
    fields: &serde_json::Map<String, Value>,
    rescale_fractional_irr: bool,
) -> MetricRecord {
    let mut record = MetricRecord::default();
    for (label, value) in fields {
        if ID_KEYS.contains(&label.as_str()) {
            continue;
        }
        let Some(kind) = classify_metric_label(label) else {
            if record.other_metric_label.is_none()
                && record.other_metric_value.is_none()
                && !value.is_null()
            {
                record.other_metric_label = Some(label.clone());
                record.other_metric_value = super::legacy::json_number(Some(value));
            }
            continue;
        };
        if record.get(kind).is_some() {
            continue;
        }
        let mut num = super::legacy::json_number(Some(value));
        if kind == MetricKind::Irr && rescale_fractional_irr {
            // This format records IRR as a fraction (0.103 for 10.3%).
            if let Some(v) = num {
                if v != 0.0 && v.abs() <= 2.0 {
                    num = Some((v * 100.0 * 100.0).round() / 100.0);
                }
            }
        }
        record.set(kind, num);
    }
    record
}
