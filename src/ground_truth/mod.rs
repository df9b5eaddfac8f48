//! Ground-truth ingestion: normalizes the supported source shapes
//! (per-test-case JSON, multi-document GTPDF JSON, three Excel layouts)
//! into one uniform record set keyed by document identifier.

pub mod excel;
pub mod legacy;
pub mod multi_json;
pub mod resolve;

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Result, bail};

use crate::model::{MetricKind, MetricRecord};

/// One normalized ground-truth row. `key` is the document reference as the
/// source wrote it (may be empty for positional-only layouts); `stem` is the
/// filename without extension.
#[derive(Debug, Clone)]
pub struct GroundTruthEntry {
    pub key: String,
    pub stem: String,
    pub metrics: MetricRecord,
}

/// The uniform record set every loader produces: ordered entries (order
/// matters for positional matching) plus a key/stem lookup index.
#[derive(Debug, Default)]
pub struct GroundTruthSet {
    pub entries: Vec<GroundTruthEntry>,
    lookup: HashMap<String, usize>,
    pub warnings: Vec<String>,
}

impl GroundTruthSet {
    /// Append a row. A second row claiming an identifier already present is
    /// a load-time error, never a silent pick.
    pub fn push(&mut self, key: String, metrics: MetricRecord) -> Result<()> {
        let stem = stem_of(&key);
        let index = self.entries.len();

        if !key.is_empty() {
            self.index_alias(&key, index)?;
            if stem != key {
                self.index_alias(&stem, index)?;
            }
        }

        self.entries.push(GroundTruthEntry { key, stem, metrics });
        Ok(())
    }

    fn index_alias(&mut self, alias: &str, index: usize) -> Result<()> {
        if let Some(existing) = self.lookup.insert(alias.to_owned(), index) {
            bail!(
                "ambiguous ground truth: identifier {alias:?} is claimed by rows {existing} and {index}"
            );
        }
        Ok(())
    }

    pub fn get(&self, identifier: &str) -> Option<&GroundTruthEntry> {
        self.lookup
            .get(identifier)
            .map(|&index| &self.entries[index])
    }

    pub fn warn(&mut self, message: String) {
        tracing::warn!("{message}");
        self.warnings.push(message);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Filename stem, only when the key actually looks like a filename.
pub fn stem_of(key: &str) -> String {
    if key.contains('.') {
        Path::new(key)
            .file_stem()
            .and_then(|s| s.to_str())
            .map(ToOwned::to_owned)
            .unwrap_or_else(|| key.to_owned())
    } else {
        key.to_owned()
    }
}

/// Map a label to the metric it names. IRR-bearing labels that also mention
/// MOIC or TVPI classify as multiples, matching how fund reports title
/// combined columns.
pub fn classify_metric_label(label: &str) -> Option<MetricKind> {
    let upper = label.to_uppercase();
    if upper.contains("MOIC") || upper.contains("TVPI") {
        return Some(MetricKind::Moic);
    }
    if upper.contains("IRR") {
        return Some(MetricKind::Irr);
    }
    if upper.contains("DPI") {
        return Some(MetricKind::Dpi);
    }
    None
}

pub fn looks_like_metric_label(label: &str) -> bool {
    classify_metric_label(label).is_some()
}

#[cfg(test)]
mod tests {
    use super::{GroundTruthSet, classify_metric_label, stem_of};
    use crate::model::{MetricKind, MetricRecord};

    #[test]
    fn lookup_resolves_by_key_and_stem() {
        let mut set = GroundTruthSet::default();
        set.push(
            "Fund A Q3 2025.pdf".to_owned(),
            MetricRecord {
                net_irr: Some(15.5),
                ..MetricRecord::default()
            },
        )
        .expect("push");

        assert!(set.get("Fund A Q3 2025.pdf").is_some());
        assert!(set.get("Fund A Q3 2025").is_some());
        assert!(set.get("Fund B").is_none());
    }

    #[test]
    fn duplicate_identifier_is_a_load_time_error() {
        let mut set = GroundTruthSet::default();
        set.push("fund.pdf".to_owned(), MetricRecord::default())
            .expect("first row");
        let err = set
            .push("fund.pdf".to_owned(), MetricRecord::default())
            .expect_err("second row must fail");
        assert!(err.to_string().contains("ambiguous"));
    }

    #[test]
    fn positional_rows_with_empty_keys_do_not_collide() {
        let mut set = GroundTruthSet::default();
        set.push(String::new(), MetricRecord::default())
            .expect("first");
        set.push(String::new(), MetricRecord::default())
            .expect("second");
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn label_classification_prefers_multiples_for_combined_labels() {
        assert_eq!(classify_metric_label("Net IRR"), Some(MetricKind::Irr));
        assert_eq!(classify_metric_label("Gross TVPI"), Some(MetricKind::Moic));
        assert_eq!(classify_metric_label("MOIC / IRR"), Some(MetricKind::Moic));
        assert_eq!(classify_metric_label("Net DPI"), Some(MetricKind::Dpi));
        assert_eq!(classify_metric_label("Vintage"), None);
    }

    #[test]
    fn stem_strips_extension_only_when_present() {
        assert_eq!(stem_of("Fund A.pdf"), "Fund A");
        assert_eq!(stem_of("Fund A"), "Fund A");
    }
}
