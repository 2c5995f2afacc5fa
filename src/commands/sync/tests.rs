use calamine::Data;
use chrono::NaiveDate;
use chrono::Utc;
use regex::Regex;

use super::{backfill, counts, render_sync_command, snapshots};
use crate::cli::SyncArgs;
use crate::error::{Result, SyncError};
use crate::model::ProductMeta;
use crate::remote::{CountSource, ProductSource, RawCountRow};
use crate::store::LocalStore;

fn date_pattern() -> Regex {
    Regex::new(r"(\d{2})-(\d{2})-(\d{4})").expect("date regex compiles")
}

fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("valid test date")
}

#[test]
fn filename_date_extraction_is_strict_dd_mm_yyyy() {
    let pattern = date_pattern();

    assert_eq!(
        snapshots::extract_date_from_filename("ts_01-03-2024.xlsx", &pattern),
        Some(date("2024-03-01"))
    );
    assert_eq!(
        snapshots::extract_date_from_filename("ts_export.xlsx", &pattern),
        None
    );
    // An impossible calendar date is treated as missing.
    assert_eq!(
        snapshots::extract_date_from_filename("ts_31-02-2024.xlsx", &pattern),
        None
    );
}

fn header(cells: &[&str]) -> Vec<Data> {
    cells
        .iter()
        .map(|cell| Data::String((*cell).to_string()))
        .collect()
}

#[test]
fn source_headers_are_renamed_to_canonical_columns() {
    let rows = vec![
        header(&["Codice articolo", "Giac.att.1", "Dep"]),
        vec![
            Data::String("X001".to_string()),
            Data::Float(10.0),
            Data::String("00".to_string()),
        ],
    ];

    let (records, dropped) = snapshots::records_from_rows(
        rows.iter().map(Vec::as_slice),
        date("2024-03-01"),
        "ts_01-03-2024.xlsx",
    )
    .expect("rows parse");

    assert_eq!(dropped, 0);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].sku, "X001");
    assert_eq!(records[0].quantity, 10);
    assert_eq!(records[0].depot, "00");
    assert_eq!(records[0].date, date("2024-03-01"));
}

#[test]
fn missing_columns_after_rename_fail_with_schema_error() {
    let rows = vec![header(&["Codice articolo", "Dep"])];

    let err = snapshots::records_from_rows(
        rows.iter().map(Vec::as_slice),
        date("2024-03-01"),
        "ts_01-03-2024.xlsx",
    )
    .expect_err("schema must be rejected");

    match err {
        SyncError::Schema { missing, .. } => assert_eq!(missing, "qta"),
        other => panic!("expected schema error, got {other}"),
    }
}

#[test]
fn rows_with_missing_or_invalid_fields_are_dropped_not_coerced() {
    let rows = vec![
        header(&["sku", "qta", "dep"]),
        // valid
        vec![
            Data::String("X001".to_string()),
            Data::Int(4),
            Data::String("FE".to_string()),
        ],
        // missing sku
        vec![
            Data::Empty,
            Data::Int(4),
            Data::String("FE".to_string()),
        ],
        // negative quantity
        vec![
            Data::String("X002".to_string()),
            Data::Int(-1),
            Data::String("FE".to_string()),
        ],
        // fractional quantity
        vec![
            Data::String("X003".to_string()),
            Data::Float(2.5),
            Data::String("FE".to_string()),
        ],
    ];

    let (records, dropped) = snapshots::records_from_rows(
        rows.iter().map(Vec::as_slice),
        date("2024-03-01"),
        "ts_01-03-2024.xlsx",
    )
    .expect("rows parse");

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].sku, "X001");
    assert_eq!(dropped, 3);
}

fn temp_snapshot_dir(tag: &str) -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!("stockrec-{tag}-{}", std::process::id()));
    std::fs::create_dir_all(&dir).expect("temp dir creates");
    dir
}

#[test]
fn ledger_gated_files_are_skipped_without_being_read() {
    let dir = temp_snapshot_dir("ledger-gate");
    // Not a real workbook: if the ledger gate ever re-reads the file, the
    // run records a parse warning instead of a clean skip.
    std::fs::write(dir.join("ts_01-03-2024.xlsx"), b"not a workbook").expect("file writes");

    let mut store = LocalStore::open_in_memory().expect("store opens");
    store.mark_imported("ts_01-03-2024.xlsx").expect("mark");

    let stats = snapshots::ingest_dir(&mut store, &dir).expect("ingest runs");
    std::fs::remove_dir_all(&dir).ok();

    assert_eq!(stats.files_seen, 1);
    assert_eq!(stats.skipped_ledger, 1);
    assert_eq!(stats.skipped_invalid, 0);
    assert!(stats.warnings.is_empty());
    assert_eq!(store.counts().expect("counts").snapshots, 0);
}

#[test]
fn unreadable_files_are_skipped_with_a_warning_not_fatally() {
    let dir = temp_snapshot_dir("bad-workbook");
    std::fs::write(dir.join("ts_01-03-2024.xlsx"), b"not a workbook").expect("file writes");

    let mut store = LocalStore::open_in_memory().expect("store opens");
    let stats = snapshots::ingest_dir(&mut store, &dir).expect("ingest runs");
    std::fs::remove_dir_all(&dir).ok();

    assert_eq!(stats.files_seen, 1);
    assert_eq!(stats.skipped_invalid, 1);
    assert_eq!(stats.warnings.len(), 1);
    // A skipped file must not be marked imported; it is retried next run.
    assert!(!store.already_imported("ts_01-03-2024.xlsx").expect("lookup"));
}

struct FakeCountSource {
    rows: Vec<RawCountRow>,
    reported_total: u64,
}

impl CountSource for FakeCountSource {
    fn count_total(&mut self) -> Result<u64> {
        Ok(self.reported_total)
    }

    fn fetch_page(&mut self, limit: usize, offset: usize) -> Result<Vec<RawCountRow>> {
        Ok(self
            .rows
            .iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }
}

fn raw_count(code: &str, quantity: i64, location: &str) -> RawCountRow {
    RawCountRow {
        current_code: Some(code.to_string()),
        legacy_code: None,
        quantity: Some(quantity),
        location: Some(location.to_string()),
        section: Some(1),
        site: Some("Rende".to_string()),
        created: Some(date("2024-03-01")),
        last_modified: date("2024-03-01").and_hms_opt(8, 30, 0),
        note: None,
        operator: Some("mario".to_string()),
    }
}

#[test]
fn count_fetch_accumulates_batches_and_drops_invalid_rows() {
    let mut invalid = raw_count("X999", 5, "C-03");
    invalid.current_code = None;

    let mut source = FakeCountSource {
        rows: vec![
            raw_count("X001", 5, "A-01"),
            raw_count("X002", 7, "B-02"),
            invalid,
        ],
        reported_total: 3,
    };
    let mut store = LocalStore::open_in_memory().expect("store opens");

    let stats = counts::fetch_and_store(&mut source, &mut store, 2).expect("fetch runs");

    assert_eq!(stats.fetched, 3);
    assert_eq!(stats.dropped, 1);
    assert_eq!(stats.inserted, 2);
    assert_eq!(stats.batches, 2);
    assert_eq!(store.counts().expect("counts").counts, 2);
}

#[test]
fn count_fetch_is_idempotent_across_runs() {
    let rows = vec![raw_count("X001", 5, "A-01"), raw_count("X002", 7, "B-02")];
    let mut store = LocalStore::open_in_memory().expect("store opens");

    let mut source = FakeCountSource {
        rows: rows.clone(),
        reported_total: 2,
    };
    let first = counts::fetch_and_store(&mut source, &mut store, 10).expect("first run");

    let mut source = FakeCountSource {
        rows,
        reported_total: 2,
    };
    let second = counts::fetch_and_store(&mut source, &mut store, 10).expect("second run");

    assert_eq!(first.inserted, 2);
    assert_eq!(second.inserted, 0);
    assert_eq!(store.counts().expect("counts").counts, 2);
}

struct FakeProductSource {
    known: Vec<ProductMeta>,
    lookups: Vec<usize>,
}

impl ProductSource for FakeProductSource {
    fn lookup_products(&mut self, codes: &[String]) -> Result<Vec<ProductMeta>> {
        self.lookups.push(codes.len());
        Ok(self
            .known
            .iter()
            .filter(|meta| {
                codes.contains(&meta.canonical_code)
                    || meta
                        .legacy_code
                        .as_ref()
                        .is_some_and(|legacy| codes.contains(legacy))
            })
            .cloned()
            .collect())
    }
}

fn meta(canonical: &str, legacy: Option<&str>, description: &str) -> ProductMeta {
    ProductMeta {
        canonical_code: canonical.to_string(),
        legacy_code: legacy.map(ToOwned::to_owned),
        description: description.to_string(),
        last_modified: Utc::now(),
    }
}

#[test]
fn backfill_resolves_by_either_code_and_leaves_the_rest_for_next_run() {
    let mut store = LocalStore::open_in_memory().expect("store opens");
    let mut source = FakeCountSource {
        rows: vec![
            raw_count("X001", 5, "A-01"),
            raw_count("OLD-2", 3, "B-02"),
            raw_count("GHOST", 1, "C-03"),
        ],
        reported_total: 3,
    };
    counts::fetch_and_store(&mut source, &mut store, 10).expect("counts load");

    let mut products = FakeProductSource {
        known: vec![
            meta("X001", None, "Widget"),
            meta("NEW-2", Some("OLD-2"), "Renumbered widget"),
        ],
        lookups: Vec::new(),
    };

    let stats = backfill::run(&mut products, &mut store, 2).expect("backfill runs");

    assert_eq!(stats.missing, 3);
    assert_eq!(stats.fetched, 2);
    assert_eq!(stats.inserted, 2);
    assert_eq!(stats.unresolved, 1);
    assert_eq!(
        store.missing_product_codes().expect("missing"),
        vec!["GHOST".to_string()]
    );
}

#[test]
fn backfill_batches_lookups_by_configured_size() {
    let mut store = LocalStore::open_in_memory().expect("store opens");
    let rows: Vec<RawCountRow> = (0..5)
        .map(|index| raw_count(&format!("X{index:03}"), 1, &format!("A-{index:02}")))
        .collect();
    let mut source = FakeCountSource {
        reported_total: rows.len() as u64,
        rows,
    };
    counts::fetch_and_store(&mut source, &mut store, 10).expect("counts load");

    let mut products = FakeProductSource {
        known: Vec::new(),
        lookups: Vec::new(),
    };
    let stats = backfill::run(&mut products, &mut store, 2).expect("backfill runs");

    assert_eq!(stats.batches, 3);
    assert_eq!(products.lookups, vec![2, 2, 1]);
    assert_eq!(stats.unresolved, 5);
}

#[test]
fn backfill_with_nothing_missing_never_touches_the_source() {
    let mut store = LocalStore::open_in_memory().expect("store opens");
    let mut products = FakeProductSource {
        known: Vec::new(),
        lookups: Vec::new(),
    };

    let stats = backfill::run(&mut products, &mut store, 2).expect("backfill runs");

    assert_eq!(stats.missing, 0);
    assert!(products.lookups.is_empty());
}

#[test]
fn render_sync_command_includes_phase_gates() {
    let args = SyncArgs {
        snapshot_dir: "db_files".into(),
        db_path: "inventario.db".into(),
        report_path: None,
        run_manifest_path: None,
        reset: false,
        skip_snapshots: false,
        skip_remote: true,
        skip_backfill: true,
        print_report: false,
        batch_size: 500,
        backfill_batch_size: 50,
    };

    let command = render_sync_command(&args);
    assert!(command.contains("--skip-remote"));
    assert!(command.contains("--skip-backfill"));
    assert!(command.contains("--batch-size 500"));
    assert!(!command.contains("--reset"));
}
