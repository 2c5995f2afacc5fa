use std::fs;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::cli::StatusArgs;
use crate::model::SyncRunManifest;
use crate::store::LocalStore;

pub fn run(args: StatusArgs) -> Result<()> {
    info!(db_path = %args.db_path.display(), "status requested");

    if args.db_path.exists() {
        let store = LocalStore::open(&args.db_path)
            .with_context(|| format!("failed to open {}", args.db_path.display()))?;
        let counts = store.counts()?;

        info!(
            snapshots = counts.snapshots,
            counts = counts.counts,
            product_meta = counts.product_meta,
            ledger_entries = counts.import_ledger,
            corrections = counts.corrections,
            "local store status"
        );
    } else {
        warn!(path = %args.db_path.display(), "local store missing");
    }

    match latest_run_manifest(&args)? {
        Some((path, manifest)) => {
            info!(
                path = %path,
                run_id = %manifest.run_id,
                status = %manifest.status,
                started_at = %manifest.started_at,
                updated_at = %manifest.updated_at,
                snapshot_rows_inserted = manifest.counts.snapshot_rows_inserted,
                count_rows_inserted = manifest.counts.count_rows_inserted,
                product_codes_unresolved = manifest.counts.product_codes_unresolved,
                report_rows = manifest.counts.report_rows,
                warnings = manifest.warnings.len(),
                "last sync run"
            );
        }
        None => {
            warn!(path = %args.manifest_dir.display(), "no sync run manifest found");
        }
    }

    Ok(())
}

/// Most recent `sync_run_*.json` by filename; the embedded compact UTC
/// timestamp makes lexicographic order chronological.
fn latest_run_manifest(args: &StatusArgs) -> Result<Option<(String, SyncRunManifest)>> {
    if !args.manifest_dir.exists() {
        return Ok(None);
    }

    let entries = fs::read_dir(&args.manifest_dir)
        .with_context(|| format!("failed to read {}", args.manifest_dir.display()))?;

    let mut candidates = Vec::new();
    for entry in entries {
        let entry = entry
            .with_context(|| format!("failed to read entry in {}", args.manifest_dir.display()))?;
        let path = entry.path();
        let filename = match path.file_name().and_then(|name| name.to_str()) {
            Some(name) => name.to_string(),
            None => continue,
        };

        if filename.starts_with("sync_run_") && filename.ends_with(".json") {
            candidates.push((filename, path));
        }
    }

    candidates.sort();
    let (_, path) = match candidates.pop() {
        Some(latest) => latest,
        None => return Ok(None),
    };

    let raw = fs::read(&path).with_context(|| format!("failed to read {}", path.display()))?;
    let manifest: SyncRunManifest = serde_json::from_slice(&raw)
        .with_context(|| format!("failed to parse {}", path.display()))?;

    Ok(Some((path.display().to_string(), manifest)))
}
