//! Resolution of ground-truth rows to the PDF files actually on disk.
//! Unresolved documents are warnings, never crashes; the duplicate-claim
//! invariant is enforced at load time by `GroundTruthSet`.

use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::warn;

use super::{GroundTruthEntry, GroundTruthSet};
use crate::model::MetricRecord;
use crate::util::{file_name_string, file_stem_string};

/// One PDF paired with its ground truth, ready for evaluation. The PDF stem
/// becomes the test case id.
#[derive(Debug, Clone)]
pub struct ResolvedCase {
    pub test_case_id: String,
    pub metrics: MetricRecord,
}

/// Outcome of pairing a PDF directory with a ground-truth set.
#[derive(Debug, Default)]
pub struct Resolution {
    pub cases: Vec<ResolvedCase>,
    pub unmatched: Vec<String>,
}

/// Pair PDFs with ground truth. `match_by_order` pairs the Nth PDF (sorted
/// lexicographically) with the Nth ground-truth row; otherwise each PDF is
/// resolved by filename with progressively looser matching.
pub fn resolve_documents(
    pdfs: &[PathBuf],
    set: &GroundTruthSet,
    match_by_order: bool,
) -> Result<Resolution> {
    if match_by_order {
        return Ok(resolve_by_order(pdfs, set));
    }

    let mut resolution = Resolution::default();
    for pdf in pdfs {
        let name = file_name_string(pdf)?;
        let stem = file_stem_string(pdf)?;
        match lookup(set, &name, &stem) {
            Some(entry) => resolution.cases.push(ResolvedCase {
                test_case_id: stem,
                metrics: entry.metrics.clone(),
            }),
            None => {
                warn!(pdf = %name, "no ground truth row resolves to this PDF; skipping");
                resolution.unmatched.push(name);
            }
        }
    }
    Ok(resolution)
}

fn resolve_by_order(pdfs: &[PathBuf], set: &GroundTruthSet) -> Resolution {
    let pairs = pdfs.len().min(set.entries.len());
    if set.entries.len() != pdfs.len() {
        warn!(
            pdf_count = pdfs.len(),
            row_count = set.entries.len(),
            "positional matching with unequal counts; pairing the first {} only",
            pairs
        );
    }

    let mut resolution = Resolution::default();
    for (pdf, entry) in pdfs.iter().take(pairs).zip(&set.entries) {
        let stem = pdf
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_owned();
        resolution.cases.push(ResolvedCase {
            test_case_id: stem,
            metrics: entry.metrics.clone(),
        });
    }
    for pdf in &pdfs[pairs..] {
        if let Some(name) = pdf.file_name().and_then(|n| n.to_str()) {
            resolution.unmatched.push(name.to_owned());
        }
    }
    resolution
}

/// Exact key/stem lookup first, then normalized equality, then substring,
/// then all-significant-words containment. Copy-pasted names with stray
/// spaces or a missing extension still resolve.
fn lookup<'a>(set: &'a GroundTruthSet, name: &str, stem: &str) -> Option<&'a GroundTruthEntry> {
    if let Some(entry) = set.get(name).or_else(|| set.get(stem)) {
        return Some(entry);
    }

    let name_norm = normalize_for_match(name);
    let stem_norm = normalize_for_match(stem);
    let stem_lower = stem.to_lowercase();

    for entry in &set.entries {
        if entry.key.is_empty() {
            continue;
        }
        let key_norm = normalize_for_match(&entry.key);
        let entry_stem_norm = normalize_for_match(&entry.stem);
        if key_norm == name_norm
            || key_norm == stem_norm
            || entry_stem_norm == name_norm
            || entry_stem_norm == stem_norm
        {
            return Some(entry);
        }

        if entry.stem.len() < 3 {
            continue;
        }
        let key_lower = entry.key.to_lowercase();
        let entry_stem_lower = entry.stem.to_lowercase();
        if entry_stem_lower.contains(&stem_lower)
            || stem_lower.contains(&entry_stem_lower)
            || key_lower.contains(&stem_lower)
            || stem_lower.contains(&key_lower)
        {
            return Some(entry);
        }

        let significant: Vec<&str> = key_norm.split(' ').filter(|w| w.len() >= 3).collect();
        if !significant.is_empty() && significant.iter().all(|w| stem_norm.contains(w)) {
            return Some(entry);
        }
    }
    None
}

fn normalize_for_match(s: &str) -> String {
    let mapped: String = s
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    mapped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Look up one identifier in the set using the same loosened rules as
/// directory resolution. Used by prediction lookup and the inventory report.
pub fn resolve_identifier<'a>(
    set: &'a GroundTruthSet,
    identifier: &str,
) -> Option<&'a GroundTruthEntry> {
    let stem = Path::new(identifier)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(identifier);
    lookup(set, identifier, stem)
}

#[cfg(test)]
mod tests {
    use super::{resolve_documents, resolve_identifier};
    use crate::ground_truth::GroundTruthSet;
    use crate::model::MetricRecord;
    use std::path::PathBuf;

    fn record(irr: f64) -> MetricRecord {
        MetricRecord {
            net_irr: Some(irr),
            ..MetricRecord::default()
        }
    }

    fn pdfs(names: &[&str]) -> Vec<PathBuf> {
        names.iter().map(PathBuf::from).collect()
    }

    #[test]
    fn exact_filename_and_stem_resolve() {
        let mut set = GroundTruthSet::default();
        set.push("Fund A Q3 2025.pdf".to_owned(), record(15.5))
            .unwrap();

        let resolution =
            resolve_documents(&pdfs(&["Fund A Q3 2025.pdf"]), &set, false).expect("resolve");
        assert_eq!(resolution.cases.len(), 1);
        assert_eq!(resolution.cases[0].test_case_id, "Fund A Q3 2025");
        assert_eq!(resolution.cases[0].metrics.net_irr, Some(15.5));
        assert!(resolution.unmatched.is_empty());
    }

    #[test]
    fn normalized_and_substring_matching_cover_sloppy_references() {
        let mut set = GroundTruthSet::default();
        set.push("fund  a   q3-2025".to_owned(), record(10.0)).unwrap();
        set.push("Palmer Square".to_owned(), record(8.0)).unwrap();

        let resolution = resolve_documents(
            &pdfs(&[
                "Fund A Q3 2025.pdf",
                "Palmer Square Credit Q3 Update.pdf",
                "Unrelated Fund.pdf",
            ]),
            &set,
            false,
        )
        .expect("resolve");

        assert_eq!(resolution.cases.len(), 2);
        assert_eq!(resolution.cases[0].metrics.net_irr, Some(10.0));
        assert_eq!(resolution.cases[1].metrics.net_irr, Some(8.0));
        assert_eq!(resolution.unmatched, vec!["Unrelated Fund.pdf"]);
    }

    #[test]
    fn positional_matching_pairs_sorted_pdfs_with_row_order() {
        let mut set = GroundTruthSet::default();
        set.push(
            String::new(),
            MetricRecord {
                net_moic: Some(2.9),
                ..MetricRecord::default()
            },
        )
        .unwrap();
        set.push(String::new(), record(32.0)).unwrap();
        set.push(
            String::new(),
            MetricRecord {
                net_dpi: Some(0.1),
                ..MetricRecord::default()
            },
        )
        .unwrap();

        let resolution =
            resolve_documents(&pdfs(&["doc1.pdf", "doc2.pdf", "doc3.pdf"]), &set, true)
                .expect("resolve");
        assert_eq!(resolution.cases.len(), 3);
        assert_eq!(resolution.cases[0].metrics.net_moic, Some(2.9));
        assert!(resolution.cases[0].metrics.net_irr.is_none());
        assert_eq!(resolution.cases[1].metrics.net_irr, Some(32.0));
        assert!(resolution.cases[1].metrics.net_dpi.is_none());
        assert_eq!(resolution.cases[2].metrics.net_dpi, Some(0.1));
    }

    #[test]
    fn resolve_identifier_accepts_name_or_stem() {
        let mut set = GroundTruthSet::default();
        set.push("Fund A.pdf".to_owned(), record(15.5)).unwrap();
        assert!(resolve_identifier(&set, "Fund A").is_some());
        assert!(resolve_identifier(&set, "Fund A.pdf").is_some());
        assert!(resolve_identifier(&set, "Fund Z").is_none());
    }
}
