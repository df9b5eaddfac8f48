//! Spreadsheet ground truth. Four layouts are supported; the single-sheet
//! layouts are auto-detected from structure and an ambiguous sheet is a
//! fatal error, since a wrong guess would silently corrupt every downstream
//! score.

use std::path::Path;

use anyhow::{Context, Result, bail};
use calamine::{Data, Reader, open_workbook_auto};
use tracing::info;

use super::{GroundTruthSet, classify_metric_label, looks_like_metric_label};
use crate::matcher::normalize_value;
use crate::model::{MetricKind, MetricRecord};

/// Column headers that identify the document reference in the standard
/// layout, matched case-insensitively against trimmed header cells.
const ID_HEADERS: [&str; 6] = ["pdf", "filename", "pdf_filename", "test_case_id", "name", "gtpdf"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Layout {
    /// One row per document, identifier column plus metric columns.
    Standard,
    /// Label row then value row, one pair per document, positional.
    Alternating,
    /// Metric names down the first column, one document per value column.
    Transposed,
}

impl Layout {
    fn as_str(self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Alternating => "alternating label/value",
            Self::Transposed => "transposed",
        }
    }
}

/// Load ground truth from a workbook. Multi-sheet workbooks use the
/// one-tab-per-document layout; single-sheet workbooks are auto-detected.
pub fn load(path: &Path) -> Result<GroundTruthSet> {
    let mut workbook = open_workbook_auto(path)
        .with_context(|| format!("failed to open workbook: {}", path.display()))?;
    let sheet_names = workbook.sheet_names().to_vec();
    if sheet_names.is_empty() {
        bail!("workbook has no sheets: {}", path.display());
    }

    if sheet_names.len() >= 2 {
        let mut sheets = Vec::with_capacity(sheet_names.len());
        for name in &sheet_names {
            let range = workbook
                .worksheet_range(name)
                .with_context(|| format!("failed to read sheet {name:?}: {}", path.display()))?;
            sheets.push((name.clone(), rows_of(&range)));
        }
        let set = parse_one_tab_per_document(&sheets)?;
        info!(path = %path.display(), documents = set.len(), "loaded one-tab-per-document workbook");
        return Ok(set);
    }

    let range = workbook
        .worksheet_range(&sheet_names[0])
        .with_context(|| format!("failed to read sheet: {}", path.display()))?;
    let rows = rows_of(&range);
    let set = parse_single_sheet(&rows)?;
    info!(path = %path.display(), documents = set.len(), "loaded single-sheet workbook");
    Ok(set)
}

fn rows_of(range: &calamine::Range<Data>) -> Vec<Vec<Data>> {
    range.rows().map(<[Data]>::to_vec).collect()
}

/// Detect the layout of a single sheet and parse it. Exactly one layout must
/// apply; zero or several candidates abort the run.
pub fn parse_single_sheet(rows: &[Vec<Data>]) -> Result<GroundTruthSet> {
    if rows.is_empty() {
        bail!("ground truth sheet is empty");
    }

    let mut candidates = Vec::new();
    if find_id_column(&rows[0]).is_some() {
        candidates.push(Layout::Standard);
    }
    if is_alternating_candidate(rows) {
        candidates.push(Layout::Alternating);
    }
    if is_transposed_candidate(rows) {
        candidates.push(Layout::Transposed);
    }

    match candidates.as_slice() {
        [layout] => {
            info!(layout = layout.as_str(), "detected excel ground truth layout");
            match layout {
                Layout::Standard => parse_standard(rows),
                Layout::Alternating => parse_alternating(rows),
                Layout::Transposed => parse_transposed(rows),
            }
        }
        [] => bail!(
            "cannot determine excel ground truth layout: no identifier column \
             (pdf/filename/gtpdf) and no label/value structure found in header {:?}",
            header_preview(&rows[0]),
        ),
        several => bail!(
            "ambiguous excel ground truth layout: sheet matches {} — refusing to guess",
            several
                .iter()
                .map(|l| l.as_str())
                .collect::<Vec<_>>()
                .join(" and "),
        ),
    }
}

fn header_preview(row: &[Data]) -> Vec<String> {
    row.iter().map(|c| cell_str(c).unwrap_or_default()).collect()
}

fn find_id_column(header: &[Data]) -> Option<usize> {
    header.iter().position(|cell| {
        cell_str(cell)
            .map(|s| ID_HEADERS.contains(&s.to_ascii_lowercase().as_str()))
            .unwrap_or(false)
    })
}

/// Label row then value row. An optional non-label header row (e.g.
/// "Metric"/"Value") may precede the first pair.
fn is_alternating_candidate(rows: &[Vec<Data>]) -> bool {
    let direct = rows.len() >= 2
        && cell_is_metric_label(rows[0].first())
        && row_holds_value(&rows[1]);
    let with_header = rows.len() >= 3
        && !cell_is_metric_label(rows[0].first())
        && cell_is_metric_label(rows[1].first())
        && row_holds_value(&rows[2])
        && value_cells_in(&rows[2]) < 2;
    direct || with_header
}

/// A metric-label row carrying two or more populated value cells means the
/// sheet is one-column-per-document.
fn is_transposed_candidate(rows: &[Vec<Data>]) -> bool {
    rows.len() >= 2
        && rows[1..].iter().any(|row| {
            cell_is_metric_label(row.first()) && value_cells_in(&row[1..]) >= 2
        })
}

fn parse_standard(rows: &[Vec<Data>]) -> Result<GroundTruthSet> {
    let header = &rows[0];
    let Some(id_col) = find_id_column(header) else {
        bail!("standard layout requires an identifier column");
    };

    let headers: Vec<String> = header
        .iter()
        .map(|c| cell_str(c).unwrap_or_default().to_ascii_lowercase())
        .collect();
    let column_for = |kind: MetricKind| -> Option<usize> {
        let exact = format!("net_{}", kind.as_str());
        headers
            .iter()
            .position(|h| *h == exact)
            .or_else(|| {
                headers
                    .iter()
                    .position(|h| !h.is_empty() && classify_metric_label(h) == Some(kind))
            })
    };
    let metric_cols: Vec<(MetricKind, Option<usize>)> = MetricKind::ALL
        .iter()
        .map(|&kind| (kind, column_for(kind)))
        .collect();

    let mut set = GroundTruthSet::default();
    for (row_index, row) in rows.iter().enumerate().skip(1) {
        let mut metrics = MetricRecord::default();
        for &(kind, col) in &metric_cols {
            let cell = col.and_then(|c| row.get(c));
            metrics.set(kind, cell.and_then(|c| checked_cell_number(c, row_index, &mut set)));
        }

        // A row with an empty identifier cell still occupies its position;
        // dropping it would shift every later pairing under --match-by-order.
        let key = row.get(id_col).and_then(cell_str).unwrap_or_default();
        set.push(key, metrics)?;
    }
    Ok(set)
}

fn parse_alternating(rows: &[Vec<Data>]) -> Result<GroundTruthSet> {
    // Skip a header row that does not itself look like a metric label.
    let start = usize::from(!cell_is_metric_label(rows[0].first()));
    let rows = &rows[start..];

    let mut set = GroundTruthSet::default();
    let mut index = 0;
    while index + 1 < rows.len() {
        let label_row = &rows[index];
        let value_row = &rows[index + 1];
        index += 2;

        // Value sits beside the label when the sheet has two columns,
        // otherwise directly below it.
        let value_cell = value_row
            .get(1)
            .filter(|c| !matches!(c, Data::Empty))
            .or_else(|| value_row.first());

        let mut metrics = MetricRecord::default();
        let label = label_row.first().and_then(cell_str);
        match label.as_deref().and_then(classify_metric_label) {
            Some(kind) => {
                let row_index = start + index - 1;
                metrics.set(
                    kind,
                    value_cell.and_then(|c| checked_cell_number(c, row_index, &mut set)),
                );
            }
            // Any other label (revenue growth, current yield, ...) is still a
            // metric worth scoring; it goes into the labeled other channel.
            None => {
                let value = value_cell.and_then(cell_number);
                if label.is_some() || value.is_some() {
                    metrics.other_metric_label = label;
                    metrics.other_metric_value = value;
                }
            }
        }
        // One document per pair regardless, so pair count stays aligned with
        // the PDF count for positional matching.
        set.push(String::new(), metrics)?;
    }
    Ok(set)
}

fn parse_transposed(rows: &[Vec<Data>]) -> Result<GroundTruthSet> {
    let header = &rows[0];
    if header.len() < 2 {
        bail!("transposed ground truth sheet has no document columns");
    }
    let doc_count = header.len() - 1;
    let doc_ids: Vec<String> = header[1..]
        .iter()
        .map(|c| cell_str(c).unwrap_or_default())
        .collect();

    let mut records = vec![MetricRecord::default(); doc_count];
    let mut set = GroundTruthSet::default();
    for (row_index, row) in rows.iter().enumerate().skip(1) {
        let Some(kind) = row.first().and_then(cell_str).and_then(|l| classify_metric_label(&l))
        else {
            continue;
        };
        for (doc, record) in records.iter_mut().enumerate() {
            if let Some(cell) = row.get(doc + 1) {
                if let Some(value) = checked_cell_number(cell, row_index, &mut set) {
                    record.set(kind, Some(value));
                }
            }
        }
    }

    for (doc_id, metrics) in doc_ids.into_iter().zip(records) {
        set.push(doc_id, metrics)?;
    }
    Ok(set)
}

/// Multi-sheet workbooks: A1 of each sheet names the document (sheet title
/// as fallback) and the remaining rows carry that document's metrics, either
/// as a header+value pair of rows or as label/value row pairs.
fn parse_one_tab_per_document(sheets: &[(String, Vec<Vec<Data>>)]) -> Result<GroundTruthSet> {
    let mut set = GroundTruthSet::default();
    for (sheet_name, rows) in sheets {
        if rows.is_empty() {
            set.warn(format!("skipping empty sheet {sheet_name:?}"));
            continue;
        }
        let key = rows[0]
            .first()
            .and_then(cell_str)
            .unwrap_or_else(|| sheet_name.trim().to_owned());
        let metrics = parse_sheet_metrics(&rows[1..], &mut set);
        set.push(key, metrics)?;
    }
    Ok(set)
}

fn parse_sheet_metrics(data_rows: &[Vec<Data>], set: &mut GroundTruthSet) -> MetricRecord {
    let mut metrics = MetricRecord::default();
    if data_rows.is_empty() {
        return metrics;
    }

    // Header row of metric names followed by a value row.
    let header_kinds: Vec<Option<MetricKind>> = data_rows[0]
        .iter()
        .map(|c| cell_str(c).and_then(|s| classify_metric_label(&s)))
        .collect();
    if header_kinds.iter().any(Option::is_some) && data_rows.len() >= 2 {
        let value_row = &data_rows[1];
        for (col, kind) in header_kinds.into_iter().enumerate() {
            if let Some(kind) = kind {
                let value = value_row.get(col).and_then(|c| checked_cell_number(c, 1, set));
                metrics.set(kind, value);
            }
        }
        return metrics;
    }

    // Otherwise label/value row pairs.
    let mut index = 0;
    while index + 1 < data_rows.len() {
        let label_row = &data_rows[index];
        let value_row = &data_rows[index + 1];
        index += 2;
        let value_cell = value_row
            .get(1)
            .filter(|c| !matches!(c, Data::Empty))
            .or_else(|| value_row.first());
        let label = label_row.first().and_then(cell_str);
        match label.as_deref().and_then(classify_metric_label) {
            Some(kind) => {
                metrics.set(kind, value_cell.and_then(|c| checked_cell_number(c, index - 1, set)));
            }
            None => {
                if metrics.other_metric_label.is_none() && metrics.other_metric_value.is_none() {
                    let value = value_cell.and_then(cell_number);
                    if label.is_some() || value.is_some() {
                        metrics.other_metric_label = label;
                        metrics.other_metric_value = value;
                    }
                }
            }
        }
    }
    metrics
}

fn cell_str(cell: &Data) -> Option<String> {
    let text = match cell {
        Data::Empty => return None,
        Data::String(s) => s.trim().to_owned(),
        Data::Float(f) => f.to_string(),
        Data::Int(i) => i.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::Error(e) => format!("#ERR:{e:?}"),
        Data::DateTime(dt) => dt.to_string(),
        Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
    };
    (!text.is_empty()).then_some(text)
}

fn cell_number(cell: &Data) -> Option<f64> {
    match cell {
        Data::Float(f) => f.is_finite().then_some(*f),
        Data::Int(i) => Some(*i as f64),
        Data::String(s) => normalize_value(s),
        _ => None,
    }
}

/// Like `cell_number`, but surfaces malformed text cells as warnings so they
/// can be reviewed instead of vanishing into nulls.
fn checked_cell_number(cell: &Data, row_index: usize, set: &mut GroundTruthSet) -> Option<f64> {
    let value = cell_number(cell);
    if value.is_none() {
        if let Data::String(s) = cell {
            let trimmed = s.trim();
            if !trimmed.is_empty()
                && !matches!(
                    trimmed.to_ascii_lowercase().as_str(),
                    "n/a" | "na" | "null" | "none" | "-"
                )
            {
                set.warn(format!(
                    "row {row_index}: non-numeric metric cell {trimmed:?} treated as null"
                ));
            }
        }
    }
    value
}

fn cell_is_metric_label(cell: Option<&Data>) -> bool {
    cell.and_then(cell_str)
        .map(|s| looks_like_metric_label(&s))
        .unwrap_or(false)
}

fn cell_is_value(cell: &Data) -> bool {
    cell_number(cell).is_some()
}

fn row_holds_value(row: &[Data]) -> bool {
    row.first().map(cell_is_value).unwrap_or(false)
        || row.get(1).map(cell_is_value).unwrap_or(false)
}

fn value_cells_in(row: &[Data]) -> usize {
    row.iter().filter(|c| cell_is_value(c)).count()
}

#[cfg(test)]
mod tests {
    use super::parse_single_sheet;
    use calamine::Data;

    fn s(text: &str) -> Data {
        Data::String(text.to_owned())
    }

    fn f(value: f64) -> Data {
        Data::Float(value)
    }

    #[test]
    fn standard_layout_round_trip() {
        let rows = vec![
            vec![s("pdf"), s("net_irr"), s("net_moic"), s("net_dpi")],
            vec![s("Fund A Q3 2025.pdf"), f(15.5), f(2.2), f(0.8)],
        ];
        let set = parse_single_sheet(&rows).expect("parse");
        let entry = set.get("Fund A Q3 2025.pdf").expect("entry");
        assert_eq!(entry.metrics.net_irr, Some(15.5));
        assert_eq!(entry.metrics.net_moic, Some(2.2));
        assert_eq!(entry.metrics.net_dpi, Some(0.8));
        assert!(set.get("Fund A Q3 2025").is_some());
    }

    #[test]
    fn standard_layout_matches_metric_headers_by_substring() {
        let rows = vec![
            vec![s("GTPDF"), s("Gross IRR (%)"), s("Net TVPI"), s("DPI")],
            vec![s("fund.pdf"), s("15.5%"), s("2.2x"), Data::Empty],
        ];
        let set = parse_single_sheet(&rows).expect("parse");
        let entry = set.get("fund.pdf").expect("entry");
        assert_eq!(entry.metrics.net_irr, Some(15.5));
        assert_eq!(entry.metrics.net_moic, Some(2.2));
        assert_eq!(entry.metrics.net_dpi, None);
    }

    #[test]
    fn standard_layout_treats_malformed_cells_as_null_with_warning() {
        let rows = vec![
            vec![s("pdf"), s("net_irr")],
            vec![s("fund.pdf"), s("pending audit")],
        ];
        let set = parse_single_sheet(&rows).expect("parse");
        assert_eq!(set.get("fund.pdf").unwrap().metrics.net_irr, None);
        assert_eq!(set.warnings.len(), 1);
    }

    #[test]
    fn standard_layout_keeps_rows_with_empty_identifier_cells() {
        // Row position must survive an empty ID cell or positional matching
        // pairs every later PDF with the wrong row.
        let rows = vec![
            vec![s("pdf"), s("net_irr")],
            vec![s("a.pdf"), f(10.0)],
            vec![Data::Empty, f(20.0)],
            vec![s("c.pdf"), f(30.0)],
        ];
        let set = parse_single_sheet(&rows).expect("parse");
        assert_eq!(set.len(), 3);
        assert!(set.entries[1].key.is_empty());
        assert_eq!(set.entries[1].metrics.net_irr, Some(20.0));
        assert_eq!(set.entries[2].key, "c.pdf");
        assert_eq!(set.entries[2].metrics.net_irr, Some(30.0));
    }

    #[test]
    fn alternating_layout_yields_one_record_per_pair() {
        let rows = vec![
            vec![s("MOIC")],
            vec![f(2.9)],
            vec![s("Gross IRR")],
            vec![f(32.0)],
            vec![s("DPI")],
            vec![f(0.1)],
        ];
        let set = parse_single_sheet(&rows).expect("parse");
        assert_eq!(set.len(), 3);
        assert_eq!(set.entries[0].metrics.net_moic, Some(2.9));
        assert!(set.entries[0].metrics.net_irr.is_none());
        assert_eq!(set.entries[1].metrics.net_irr, Some(32.0));
        assert_eq!(set.entries[2].metrics.net_dpi, Some(0.1));
    }

    #[test]
    fn alternating_layout_routes_unrecognized_labels_to_the_other_channel() {
        let rows = vec![
            vec![s("Net IRR")],
            vec![f(15.5)],
            vec![s("Revenue Growth")],
            vec![f(12.0)],
        ];
        let set = parse_single_sheet(&rows).expect("parse");
        assert_eq!(set.len(), 2);
        assert_eq!(set.entries[0].metrics.net_irr, Some(15.5));
        let other = &set.entries[1].metrics;
        assert!(other.net_irr.is_none());
        assert_eq!(other.other_metric_label.as_deref(), Some("Revenue Growth"));
        assert_eq!(other.other_metric_value, Some(12.0));
    }

    #[test]
    fn alternating_layout_skips_leading_header_row() {
        let rows = vec![
            vec![s("Metric"), s("Value")],
            vec![s("Net IRR")],
            vec![Data::Empty, f(15.5)],
        ];
        let set = parse_single_sheet(&rows).expect("parse");
        assert_eq!(set.len(), 1);
        assert_eq!(set.entries[0].metrics.net_irr, Some(15.5));
    }

    #[test]
    fn transposed_layout_maps_one_document_per_column() {
        let rows = vec![
            vec![s("Metric"), s("Fund A.pdf"), s("Fund B.pdf")],
            vec![s("MOIC"), f(2.9), f(1.5)],
            vec![s("Gross IRR"), f(32.0), f(12.0)],
        ];
        let set = parse_single_sheet(&rows).expect("parse");
        assert_eq!(set.len(), 2);
        let a = set.get("Fund A").expect("fund a");
        assert_eq!(a.metrics.net_moic, Some(2.9));
        assert_eq!(a.metrics.net_irr, Some(32.0));
        let b = set.get("Fund B.pdf").expect("fund b");
        assert_eq!(b.metrics.net_moic, Some(1.5));
        assert!(b.metrics.net_dpi.is_none());
    }

    #[test]
    fn ambiguous_sheet_fails_loudly() {
        // Header carries both an identifier column and a metric label in the
        // alternating position.
        let rows = vec![
            vec![s("MOIC"), s("GTPDF")],
            vec![f(2.9)],
            vec![s("Gross IRR")],
            vec![f(32.0)],
        ];
        let err = parse_single_sheet(&rows).expect_err("must not guess");
        assert!(err.to_string().contains("ambiguous"));
    }

    #[test]
    fn undetectable_sheet_fails_loudly() {
        let rows = vec![vec![s("Fund"), s("Vintage")], vec![s("Fund A"), f(2020.0)]];
        let err = parse_single_sheet(&rows).expect_err("no layout applies");
        assert!(err.to_string().contains("cannot determine"));
    }
}
