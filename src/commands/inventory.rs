use std::path::Path;

use anyhow::{Result, bail};
use tracing::info;

use crate::cli::InventoryArgs;
use crate::ground_truth::resolve::resolve_identifier;
use crate::ground_truth::{GroundTruthSet, excel, multi_json};
use crate::model::{PdfEntry, PdfInventoryManifest};
use crate::util::{discover_pdfs, file_name_string, now_utc_string, sha256_file, write_json_pretty};

pub fn run(args: InventoryArgs) -> Result<()> {
    let ground_truth = load_ground_truth(&args)?;
    let manifest = build_manifest(&args.pdf_dir, ground_truth.as_ref())?;

    if args.dry_run {
        info!(
            pdf_count = manifest.pdf_count,
            resolved = manifest.resolved_count,
            source = %manifest.source_directory,
            "inventory dry-run complete"
        );
        return Ok(());
    }

    let manifest_path = args
        .manifest_path
        .unwrap_or_else(|| args.pdf_dir.join("pdf_inventory.json"));

    write_json_pretty(&manifest_path, &manifest)?;
    info!(path = %manifest_path.display(), "wrote inventory manifest");
    info!(
        pdf_count = manifest.pdf_count,
        resolved = manifest.resolved_count,
        unmatched = manifest.unmatched.len(),
        "inventory completed"
    );

    Ok(())
}

fn load_ground_truth(args: &InventoryArgs) -> Result<Option<GroundTruthSet>> {
    match (&args.ground_truth_excel, &args.ground_truth_json) {
        (Some(_), Some(_)) => {
            bail!("pass either --ground-truth-excel or --ground-truth-json, not both")
        }
        (Some(path), None) => excel::load(path).map(Some),
        (None, Some(path)) => multi_json::load(path, false).map(Some),
        (None, None) => Ok(None),
    }
}

pub fn build_manifest(
    pdf_dir: &Path,
    ground_truth: Option<&GroundTruthSet>,
) -> Result<PdfInventoryManifest> {
    let pdf_paths = discover_pdfs(pdf_dir)?;
    if pdf_paths.is_empty() {
        bail!("no PDFs found in {}", pdf_dir.display());
    }

    let mut pdfs = Vec::with_capacity(pdf_paths.len());
    let mut unmatched = Vec::new();

    for path in pdf_paths {
        let filename = file_name_string(&path)?;
        let sha256 = sha256_file(&path)?;

        let resolved = match ground_truth {
            Some(set) => resolve_identifier(set, &filename).is_some(),
            // Without a ground-truth source every PDF counts as covered.
            None => true,
        };
        if !resolved {
            unmatched.push(filename.clone());
        }

        pdfs.push(PdfEntry {
            filename,
            sha256,
            ground_truth_resolved: resolved,
        });
    }

    let resolved_count = pdfs.iter().filter(|p| p.ground_truth_resolved).count();

    Ok(PdfInventoryManifest {
        manifest_version: 1,
        generated_at: now_utc_string(),
        source_directory: pdf_dir.display().to_string(),
        pdf_count: pdfs.len(),
        resolved_count,
        unmatched,
        pdfs,
    })
}
