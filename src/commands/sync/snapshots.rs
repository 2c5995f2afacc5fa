use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use calamine::{Data, Reader, Xlsx, XlsxError, open_workbook};
use chrono::NaiveDate;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::error::SyncError;
use crate::model::SnapshotRecord;
use crate::store::LocalStore;

/// Source-specific header names renamed to the canonical column set.
const COLUMN_ALIASES: &[(&str, &str)] = &[
    ("Codice articolo", "sku"),
    ("Giac.att.1", "qta"),
    ("Dep", "dep"),
];

const REQUIRED_COLUMNS: &[&str] = &["sku", "qta", "dep"];

#[derive(Debug, Default)]
pub(crate) struct SnapshotStats {
    pub files_seen: usize,
    pub skipped_ledger: usize,
    pub skipped_invalid: usize,
    pub rows_dropped: usize,
    pub rows_inserted: usize,
    pub warnings: Vec<String>,
}

/// Ingests every spreadsheet export in `dir`, skipping files already in the
/// import ledger. Undated or malformed files are skipped with a warning;
/// only store failures abort the run.
pub(crate) fn ingest_dir(store: &mut LocalStore, dir: &Path) -> Result<SnapshotStats> {
    let date_pattern =
        Regex::new(r"(\d{2})-(\d{2})-(\d{4})").context("failed to compile filename date regex")?;

    let mut filenames = discover_exports(dir)?;
    filenames.sort();

    let mut stats = SnapshotStats::default();

    for filename in filenames {
        stats.files_seen += 1;

        if store.already_imported(&filename)? {
            debug!(file = %filename, "already in import ledger, skipping");
            stats.skipped_ledger += 1;
            continue;
        }

        let path = dir.join(&filename);
        match parse_snapshot_file(&path, &filename, &date_pattern) {
            Ok((records, dropped)) => {
                let inserted = store.insert_snapshots(&filename, &records)?;
                stats.rows_dropped += dropped;
                stats.rows_inserted += inserted;
                info!(
                    file = %filename,
                    rows = records.len(),
                    inserted,
                    dropped,
                    "ingested snapshot file"
                );
            }
            Err(err) if !err.is_fatal() => {
                warn!(file = %filename, error = %err, "skipping snapshot file");
                stats.skipped_invalid += 1;
                stats.warnings.push(err.to_string());
            }
            Err(err) => return Err(err.into()),
        }
    }

    Ok(stats)
}

fn discover_exports(dir: &Path) -> Result<Vec<String>> {
    let entries =
        fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))?;

    let mut filenames = Vec::new();
    for entry in entries {
        let entry =
            entry.with_context(|| format!("failed to read entry in {}", dir.display()))?;
        let path = entry.path();

        let is_xlsx = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("xlsx"))
            .unwrap_or(false);
        if !is_xlsx || !path.is_file() {
            continue;
        }

        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(ToOwned::to_owned)
            .with_context(|| format!("invalid UTF-8 filename: {}", path.display()))?;
        filenames.push(filename);
    }

    Ok(filenames)
}

fn parse_snapshot_file(
    path: &Path,
    filename: &str,
    date_pattern: &Regex,
) -> Result<(Vec<SnapshotRecord>, usize), SyncError> {
    let date =
        extract_date_from_filename(filename, date_pattern).ok_or_else(|| SyncError::Parse {
            file: filename.to_string(),
            reason: "no valid DD-MM-YYYY date in filename".to_string(),
        })?;

    let mut workbook: Xlsx<_> = open_workbook(path).map_err(|err: XlsxError| SyncError::Parse {
        file: filename.to_string(),
        reason: err.to_string(),
    })?;

    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| SyncError::Parse {
            file: filename.to_string(),
            reason: "workbook has no worksheets".to_string(),
        })?
        .map_err(|err| SyncError::Parse {
            file: filename.to_string(),
            reason: err.to_string(),
        })?;

    records_from_rows(range.rows(), date, filename)
}

/// Strict `DD-MM-YYYY` extraction; an impossible calendar date is treated
/// the same as a missing one.
pub(crate) fn extract_date_from_filename(name: &str, pattern: &Regex) -> Option<NaiveDate> {
    let captures = pattern.captures(name)?;
    let day: u32 = captures.get(1)?.as_str().parse().ok()?;
    let month: u32 = captures.get(2)?.as_str().parse().ok()?;
    let year: i32 = captures.get(3)?.as_str().parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Turns raw worksheet rows into snapshot records. The first row is the
/// header; it must yield the required columns after alias renaming or the
/// whole file fails with a `Schema` error. Data rows missing a required
/// field or carrying a negative quantity are dropped, never coerced.
pub(crate) fn records_from_rows<'a>(
    mut rows: impl Iterator<Item = &'a [Data]>,
    date: NaiveDate,
    filename: &str,
) -> Result<(Vec<SnapshotRecord>, usize), SyncError> {
    let header = rows.next().ok_or_else(|| SyncError::Schema {
        file: filename.to_string(),
        missing: REQUIRED_COLUMNS.join(", "),
    })?;

    let columns: Vec<String> = header
        .iter()
        .map(|cell| rename_column(&cell.to_string()))
        .collect();

    let index_of = |name: &str| columns.iter().position(|column| column == name);
    let indexes = [
        ("sku", index_of("sku")),
        ("qta", index_of("qta")),
        ("dep", index_of("dep")),
    ];

    let missing: Vec<&str> = indexes
        .iter()
        .filter(|(_, index)| index.is_none())
        .map(|(name, _)| *name)
        .collect();
    let [(_, Some(sku_index)), (_, Some(qta_index)), (_, Some(dep_index))] = indexes else {
        return Err(SyncError::Schema {
            file: filename.to_string(),
            missing: missing.join(", "),
        });
    };

    let mut records = Vec::new();
    let mut dropped = 0;

    for row in rows {
        let sku = cell_string(row.get(sku_index));
        let quantity = cell_integer(row.get(qta_index));
        let depot = cell_string(row.get(dep_index));

        match (sku, quantity, depot) {
            (Some(sku), Some(quantity), Some(depot)) if quantity >= 0 => {
                records.push(SnapshotRecord {
                    sku,
                    date,
                    quantity,
                    depot,
                });
            }
            _ => {
                debug!(file = %filename, "dropping row with missing or invalid fields");
                dropped += 1;
            }
        }
    }

    Ok((records, dropped))
}

fn rename_column(header: &str) -> String {
    let trimmed = header.trim();
    COLUMN_ALIASES
        .iter()
        .find(|(alias, _)| *alias == trimmed)
        .map(|(_, canonical)| (*canonical).to_string())
        .unwrap_or_else(|| trimmed.to_string())
}

fn cell_string(cell: Option<&Data>) -> Option<String> {
    match cell? {
        Data::String(value) => {
            let trimmed = value.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Data::Int(value) => Some(value.to_string()),
        Data::Float(value) if value.fract() == 0.0 => Some((*value as i64).to_string()),
        _ => None,
    }
}

fn cell_integer(cell: Option<&Data>) -> Option<i64> {
    match cell? {
        Data::Int(value) => Some(*value),
        Data::Float(value) if value.fract() == 0.0 => Some(*value as i64),
        Data::String(value) => value.trim().parse().ok(),
        _ => None,
    }
}
