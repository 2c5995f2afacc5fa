use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::Utc;
use tracing::info;

use crate::cli::ReportArgs;
use crate::model::DiscrepancyRow;
use crate::store::{DEFAULT_DEPOT, LocalStore};
use crate::util::{ensure_directory, utc_compact_string};

/// Recomputes the discrepancy report from the local store only; no remote
/// access.
pub fn run(args: ReportArgs) -> Result<()> {
    if !args.db_path.exists() {
        bail!(
            "local store not found: {} (run `stockrec sync` first)",
            args.db_path.display()
        );
    }

    let store = LocalStore::open(&args.db_path)
        .with_context(|| format!("failed to open {}", args.db_path.display()))?;
    let rows = store.discrepancy_report(DEFAULT_DEPOT)?;

    let report_path = args.report_path.clone().unwrap_or_else(|| {
        PathBuf::from(format!(
            "discrepancy_report_{}.csv",
            utc_compact_string(Utc::now())
        ))
    });

    write_report_csv(&report_path, &rows)?;
    info!(path = %report_path.display(), rows = rows.len(), "wrote discrepancy report");

    if args.print_report {
        print_rows(&rows);
    }

    Ok(())
}

pub(crate) fn write_report_csv(path: &Path, rows: &[DiscrepancyRow]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            ensure_directory(parent)?;
        }
    }

    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("failed to create report file: {}", path.display()))?;

    for row in rows {
        writer
            .serialize(row)
            .with_context(|| format!("failed to write report row for sku {}", row.sku))?;
    }

    writer
        .flush()
        .with_context(|| format!("failed to finalize report file: {}", path.display()))?;

    Ok(())
}

pub(crate) fn print_rows(rows: &[DiscrepancyRow]) {
    if rows.is_empty() {
        println!("no discrepancies found");
        return;
    }

    println!("sku\tdepot\tsite\tlocation\tcount_date\tsnapshot\ttotal_counted\tdiscrepancy");
    for row in rows {
        println!(
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            row.sku,
            row.depot,
            display_opt(row.site.as_deref()),
            display_opt(row.location.as_deref()),
            display_opt(row.count_date.map(|date| date.to_string()).as_deref()),
            display_opt(row.snapshot_quantity.map(|qta| qta.to_string()).as_deref()),
            display_opt(
                row.total_counted_quantity
                    .map(|qta| qta.to_string())
                    .as_deref()
            ),
            display_opt(row.discrepancy.map(|delta| delta.to_string()).as_deref()),
        );
    }
}

fn display_opt(value: Option<&str>) -> &str {
    value.unwrap_or("-")
}
