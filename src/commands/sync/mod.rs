mod backfill;
mod counts;
mod snapshots;
#[cfg(test)]
mod tests;

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::info;

use crate::cli::SyncArgs;
use crate::commands::report;
use crate::model::{SyncCounts, SyncRunManifest};
use crate::remote::{MariaDbSource, RemoteConfig};
use crate::store::{DB_SCHEMA_VERSION, DEFAULT_DEPOT, LocalStore};
use crate::util::{now_utc_string, utc_compact_string, write_json_pretty};

/// Full pipeline: snapshot ingest, remote count fetch, metadata backfill,
/// discrepancy report. Phases run strictly one after another; the skip
/// flags gate which phases run, never how they behave.
pub fn run(args: SyncArgs) -> Result<()> {
    let started_ts = Utc::now();
    let started_at = now_utc_string();
    let run_id = format!("run-{}", utc_compact_string(started_ts));

    info!(db_path = %args.db_path.display(), run_id = %run_id, "starting sync");

    let mut store = LocalStore::open(&args.db_path)
        .with_context(|| format!("failed to open {}", args.db_path.display()))?;
    if args.reset {
        store.reset().context("failed to reset local store")?;
        info!("local store reset");
    }

    // Both remote phases share one connection; skipping both means the
    // remote source (and its credentials) are never touched.
    let mut remote = if args.skip_remote && args.skip_backfill {
        None
    } else {
        let config = RemoteConfig::from_env().context("remote credentials not configured")?;
        Some(MariaDbSource::connect(&config).context("failed to reach remote inventory source")?)
    };

    let mut counts = SyncCounts::default();
    let mut warnings = Vec::new();

    if args.skip_snapshots {
        info!("snapshot ingest skipped");
    } else {
        let stats = snapshots::ingest_dir(&mut store, &args.snapshot_dir)?;
        counts.snapshot_files_seen = stats.files_seen;
        counts.snapshot_files_skipped_ledger = stats.skipped_ledger;
        counts.snapshot_files_skipped_invalid = stats.skipped_invalid;
        counts.snapshot_rows_dropped = stats.rows_dropped;
        counts.snapshot_rows_inserted = stats.rows_inserted;
        warnings.extend(stats.warnings);
        info!(
            files = stats.files_seen,
            inserted = stats.rows_inserted,
            "snapshot ingest completed"
        );
    }

    if args.skip_remote {
        info!("remote count fetch skipped");
    } else if let Some(source) = remote.as_mut() {
        let stats = counts::fetch_and_store(source, &mut store, args.batch_size)?;
        counts.count_rows_expected = stats.expected;
        counts.count_rows_fetched = stats.fetched;
        counts.count_rows_dropped = stats.dropped;
        counts.count_rows_inserted = stats.inserted;
    }

    if args.skip_backfill {
        info!("metadata backfill skipped");
    } else if let Some(source) = remote.as_mut() {
        let stats = backfill::run(source, &mut store, args.backfill_batch_size)?;
        counts.product_meta_fetched = stats.fetched;
        counts.product_codes_unresolved = stats.unresolved;
        if stats.unresolved > 0 {
            warnings.push(format!(
                "{} product codes unresolved during metadata backfill",
                stats.unresolved
            ));
        }
    }

    let rows = store.discrepancy_report(DEFAULT_DEPOT)?;
    counts.report_rows = rows.len();

    let report_path = args
        .report_path
        .clone()
        .unwrap_or_else(|| {
            PathBuf::from(format!(
                "discrepancy_report_{}.csv",
                utc_compact_string(started_ts)
            ))
        });
    report::write_report_csv(&report_path, &rows)?;
    info!(path = %report_path.display(), rows = rows.len(), "wrote discrepancy report");

    if args.print_report {
        report::print_rows(&rows);
    }

    let manifest_path = args.run_manifest_path.clone().unwrap_or_else(|| {
        PathBuf::from("manifests").join(format!("sync_run_{}.json", utc_compact_string(started_ts)))
    });
    let manifest = SyncRunManifest {
        manifest_version: 1,
        run_id: run_id.clone(),
        db_schema_version: DB_SCHEMA_VERSION.to_string(),
        status: "completed".to_string(),
        started_at,
        updated_at: now_utc_string(),
        command: render_sync_command(&args),
        db_path: args.db_path.display().to_string(),
        report_path: Some(report_path.display().to_string()),
        counts,
        warnings,
    };
    write_json_pretty(&manifest_path, &manifest)?;
    info!(path = %manifest_path.display(), "wrote sync run manifest");

    info!(run_id = %run_id, "sync completed");
    Ok(())
}

fn render_sync_command(args: &SyncArgs) -> String {
    let mut command = vec![
        "stockrec".to_string(),
        "sync".to_string(),
        "--snapshot-dir".to_string(),
        args.snapshot_dir.display().to_string(),
        "--db-path".to_string(),
        args.db_path.display().to_string(),
    ];

    if let Some(path) = &args.report_path {
        command.push("--report-path".to_string());
        command.push(path.display().to_string());
    }
    if let Some(path) = &args.run_manifest_path {
        command.push("--run-manifest-path".to_string());
        command.push(path.display().to_string());
    }
    if args.reset {
        command.push("--reset".to_string());
    }
    if args.skip_snapshots {
        command.push("--skip-snapshots".to_string());
    }
    if args.skip_remote {
        command.push("--skip-remote".to_string());
    }
    if args.skip_backfill {
        command.push("--skip-backfill".to_string());
    }
    if args.print_report {
        command.push("--print-report".to_string());
    }
    command.push("--batch-size".to_string());
    command.push(args.batch_size.to_string());
    command.push("--backfill-batch-size".to_string());
    command.push(args.backfill_batch_size.to_string());

    command.join(" ")
}
