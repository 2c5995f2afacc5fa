use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// System-of-record stock level for one product at one depot on one date,
/// extracted from a dated spreadsheet export. Immutable once written:
/// re-ingestion of the same (sku, date, depot) key is a no-op.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRecord {
    pub sku: String,
    pub date: NaiveDate,
    pub quantity: i64,
    pub depot: String,
}

/// One physical count entry by one operator at one location, pulled from
/// the remote authoritative system. Append-only with duplicate-skip on the
/// (sku, section, site, location, operator) key.
#[derive(Debug, Clone, PartialEq)]
pub struct CountRecord {
    pub sku: String,
    pub quantity: i64,
    pub location: String,
    pub section: i64,
    pub site: String,
    pub created: NaiveDate,
    pub last_modified: DateTime<Utc>,
    pub note: Option<String>,
    pub operator: String,
}

/// Descriptive product metadata, backfilled lazily and never deleted.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductMeta {
    pub canonical_code: String,
    pub legacy_code: Option<String>,
    pub description: String,
    pub last_modified: DateTime<Utc>,
}

/// An operator-entered correction against a specific product/location/site
/// combination. Read-side context only; never mutates counts or snapshots.
#[derive(Debug, Clone, PartialEq)]
pub struct Correction {
    pub canonical_code: String,
    pub location: String,
    pub section: i64,
    pub site: String,
    pub operator: String,
    pub note: Option<String>,
}

/// One row of the discrepancy report.
///
/// Absent sides stay `None` so that "no data" remains distinguishable from
/// a confirmed zero stock level. `discrepancy` is only populated when both
/// the snapshot and the aggregated count are present.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiscrepancyRow {
    pub sku: String,
    pub description: Option<String>,
    pub counted_quantity: Option<i64>,
    pub total_counted_quantity: Option<i64>,
    pub snapshot_quantity: Option<i64>,
    pub discrepancy: Option<i64>,
    pub location: Option<String>,
    pub section: Option<i64>,
    pub site: Option<String>,
    pub depot: String,
    pub count_date: Option<NaiveDate>,
    pub snapshot_date: Option<NaiveDate>,
    pub note: Option<String>,
    pub operator: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncCounts {
    pub snapshot_files_seen: usize,
    pub snapshot_files_skipped_ledger: usize,
    pub snapshot_files_skipped_invalid: usize,
    pub snapshot_rows_dropped: usize,
    pub snapshot_rows_inserted: usize,
    pub count_rows_expected: u64,
    pub count_rows_fetched: usize,
    pub count_rows_dropped: usize,
    pub count_rows_inserted: usize,
    pub product_meta_fetched: usize,
    pub product_codes_unresolved: usize,
    pub report_rows: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRunManifest {
    pub manifest_version: u32,
    pub run_id: String,
    pub db_schema_version: String,
    pub status: String,
    pub started_at: String,
    pub updated_at: String,
    pub command: String,
    pub db_path: String,
    pub report_path: Option<String>,
    pub counts: SyncCounts,
    pub warnings: Vec<String>,
}
