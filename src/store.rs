use std::path::Path;

use rusqlite::{Connection, OptionalExtension, params};

use crate::error::Result;
use crate::model::{Correction, CountRecord, DiscrepancyRow, ProductMeta, SnapshotRecord};
use crate::util::now_utc_string;

pub const DB_SCHEMA_VERSION: &str = "0.1.0";

/// Depot code used for any site without an explicit `site_depot_map` row.
pub const DEFAULT_DEPOT: &str = "FE";

/// Durable local store for all ingested and derived data; the system of
/// record for reconciliation. All writes are insert-or-ignore upserts keyed
/// by natural business keys, so partially-committed runs are safe to rerun.
pub struct LocalStore {
    conn: Connection,
}

#[derive(Debug, Clone, Default)]
pub struct StoreCounts {
    pub snapshots: i64,
    pub counts: i64,
    pub product_meta: i64,
    pub import_ledger: i64,
    pub corrections: i64,
}

impl LocalStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        configure_connection(&conn)?;
        let store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    /// In-memory store, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    /// Drops all tables and recreates the schema. Explicit operator action
    /// behind the `--reset` flag; never invoked automatically.
    pub fn reset(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            DROP TABLE IF EXISTS snapshots;
            DROP TABLE IF EXISTS counts;
            DROP TABLE IF EXISTS product_meta;
            DROP TABLE IF EXISTS import_ledger;
            DROP TABLE IF EXISTS corrections;
            DROP TABLE IF EXISTS site_depot_map;
            DROP TABLE IF EXISTS metadata;
            ",
        )?;
        self.ensure_schema()
    }

    fn ensure_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS metadata (
              key TEXT PRIMARY KEY,
              value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS snapshots (
              sku TEXT NOT NULL,
              date TEXT NOT NULL,
              quantity INTEGER NOT NULL,
              depot TEXT NOT NULL,
              UNIQUE (sku, date, depot)
            );

            CREATE TABLE IF NOT EXISTS counts (
              sku TEXT NOT NULL,
              quantity INTEGER NOT NULL,
              location TEXT NOT NULL,
              section INTEGER NOT NULL,
              site TEXT NOT NULL,
              created TEXT NOT NULL,
              last_modified TEXT NOT NULL,
              note TEXT,
              operator TEXT NOT NULL,
              UNIQUE (sku, section, site, location, operator)
            );

            CREATE TABLE IF NOT EXISTS product_meta (
              canonical_code TEXT PRIMARY KEY,
              legacy_code TEXT,
              description TEXT NOT NULL,
              last_modified TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS import_ledger (
              filename TEXT PRIMARY KEY,
              imported_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS corrections (
              canonical_code TEXT NOT NULL,
              location TEXT NOT NULL,
              section INTEGER NOT NULL,
              site TEXT NOT NULL,
              operator TEXT NOT NULL,
              last_modified TEXT NOT NULL,
              note TEXT,
              UNIQUE (canonical_code, location, section, site, operator)
            );

            CREATE TABLE IF NOT EXISTS site_depot_map (
              site TEXT PRIMARY KEY,
              depot TEXT NOT NULL
            );

            INSERT OR IGNORE INTO site_depot_map(site, depot) VALUES('Rende', '00');
            ",
        )?;

        let now = now_utc_string();
        self.conn.execute(
            "INSERT INTO metadata(key, value) VALUES('db_schema_version', ?1)
             ON CONFLICT(key) DO UPDATE SET value=excluded.value",
            [DB_SCHEMA_VERSION],
        )?;
        self.conn.execute(
            "INSERT INTO metadata(key, value) VALUES('db_updated_at', ?1)
             ON CONFLICT(key) DO UPDATE SET value=excluded.value",
            [now],
        )?;

        Ok(())
    }

    // ── Import ledger ────────────────────────────────────────────────

    pub fn already_imported(&self, filename: &str) -> Result<bool> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM import_ledger WHERE filename = ?1",
                [filename],
                |_| Ok(true),
            )
            .optional()?;
        Ok(found.unwrap_or(false))
    }

    pub fn mark_imported(&self, filename: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO import_ledger(filename, imported_at) VALUES(?1, ?2)",
            params![filename, now_utc_string()],
        )?;
        Ok(())
    }

    // ── Snapshots ────────────────────────────────────────────────────

    /// Inserts all rows from one snapshot file and records the filename in
    /// the ledger within the same transaction, so a crash mid-file never
    /// falsely marks it imported. Returns the number of rows actually
    /// inserted (duplicates on the natural key are skipped).
    pub fn insert_snapshots(&mut self, filename: &str, records: &[SnapshotRecord]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let mut inserted = 0;

        {
            let mut statement = tx.prepare(
                "INSERT OR IGNORE INTO snapshots(sku, date, quantity, depot)
                 VALUES(?1, ?2, ?3, ?4)",
            )?;

            for record in records {
                inserted += statement.execute(params![
                    record.sku,
                    record.date,
                    record.quantity,
                    record.depot
                ])?;
            }
        }

        tx.execute(
            "INSERT OR IGNORE INTO import_ledger(filename, imported_at) VALUES(?1, ?2)",
            params![filename, now_utc_string()],
        )?;

        tx.commit()?;
        Ok(inserted)
    }

    // ── Counts ───────────────────────────────────────────────────────

    /// Bulk insert-or-ignore of count records. Idempotent by natural key;
    /// a partially-applied batch is safe to reapply on retry.
    pub fn insert_counts(&mut self, records: &[CountRecord]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let mut inserted = 0;

        {
            let mut statement = tx.prepare(
                "INSERT OR IGNORE INTO counts(
                   sku, quantity, location, section, site,
                   created, last_modified, note, operator
                 )
                 VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )?;

            for record in records {
                inserted += statement.execute(params![
                    record.sku,
                    record.quantity,
                    record.location,
                    record.section,
                    record.site,
                    record.created,
                    record.last_modified,
                    record.note,
                    record.operator
                ])?;
            }
        }

        tx.commit()?;
        Ok(inserted)
    }

    // ── Product metadata ─────────────────────────────────────────────

    /// Distinct skus referenced by counts but unresolved against both the
    /// canonical and the legacy product code.
    pub fn missing_product_codes(&self) -> Result<Vec<String>> {
        let mut statement = self.conn.prepare(
            "SELECT DISTINCT c.sku FROM counts c
             WHERE NOT EXISTS (
               SELECT 1 FROM product_meta p
               WHERE p.canonical_code = c.sku OR p.legacy_code = c.sku
             )
             ORDER BY c.sku",
        )?;

        let codes = statement
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(codes)
    }

    pub fn insert_product_meta(&mut self, metas: &[ProductMeta]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let mut inserted = 0;

        {
            let mut statement = tx.prepare(
                "INSERT OR IGNORE INTO product_meta(
                   canonical_code, legacy_code, description, last_modified
                 )
                 VALUES(?1, ?2, ?3, ?4)",
            )?;

            for meta in metas {
                inserted += statement.execute(params![
                    meta.canonical_code,
                    meta.legacy_code,
                    meta.description,
                    meta.last_modified
                ])?;
            }
        }

        tx.commit()?;
        Ok(inserted)
    }

    // ── Corrections ──────────────────────────────────────────────────

    /// Returns true when the correction was new, false when the natural key
    /// was already recorded.
    pub fn insert_correction(&self, correction: &Correction) -> Result<bool> {
        let changed = self.conn.execute(
            "INSERT OR IGNORE INTO corrections(
               canonical_code, location, section, site, operator, last_modified, note
             )
             VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                correction.canonical_code,
                correction.location,
                correction.section,
                correction.site,
                correction.operator,
                now_utc_string(),
                correction.note
            ],
        )?;
        Ok(changed > 0)
    }

    // ── Site → depot mapping ─────────────────────────────────────────

    pub fn set_site_depot(&self, site: &str, depot: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO site_depot_map(site, depot) VALUES(?1, ?2)
             ON CONFLICT(site) DO UPDATE SET depot=excluded.depot",
            params![site, depot],
        )?;
        Ok(())
    }

    // ── Discrepancy report ───────────────────────────────────────────

    /// Joins per-day aggregated counts against snapshots and emits one row
    /// per count whose comparison is off or one-sided, plus one row per
    /// snapshot that no count ever matched.
    ///
    /// A count at site S on day D pairs with the snapshot whose date equals
    /// D and whose depot is the `site_depot_map` entry for S (default
    /// `default_depot`). Counts aggregate by (sku, site, day) before the
    /// comparison; time-of-day is ignored throughout.
    ///
    /// Descriptions resolve against `product_meta` via a canonical-code
    /// match first, then a legacy-code match, one description per row.
    pub fn discrepancy_report(&self, default_depot: &str) -> Result<Vec<DiscrepancyRow>> {
        let mut statement = self.conn.prepare(
            "
            WITH totals AS (
              SELECT sku, site, date(created) AS day, SUM(quantity) AS total_counted
              FROM counts
              GROUP BY sku, site, date(created)
            ),
            resolved AS (
              SELECT c.sku, c.quantity, c.location, c.section, c.site,
                     date(c.created) AS day, c.note, c.operator,
                     COALESCE(m.depot, ?1) AS depot,
                     t.total_counted
              FROM counts c
              JOIN totals t
                ON t.sku = c.sku AND t.site = c.site AND t.day = date(c.created)
              LEFT JOIN site_depot_map m ON m.site = c.site
            )
            SELECT r.sku,
                   COALESCE(
                     (SELECT pm.description FROM product_meta pm
                      WHERE pm.canonical_code = r.sku),
                     (SELECT pm.description FROM product_meta pm
                      WHERE pm.legacy_code = r.sku
                      ORDER BY pm.canonical_code LIMIT 1)
                   ) AS description,
                   r.quantity AS counted_quantity,
                   r.total_counted AS total_counted_quantity,
                   s.quantity AS snapshot_quantity,
                   CASE WHEN s.quantity IS NULL THEN NULL
                        ELSE s.quantity - r.total_counted END AS discrepancy,
                   r.location, r.section, r.site, r.depot,
                   r.day AS count_date, s.date AS snapshot_date,
                   r.note, r.operator
            FROM resolved r
            LEFT JOIN snapshots s
              ON s.sku = r.sku AND s.date = r.day AND s.depot = r.depot
            WHERE s.quantity IS NULL OR s.quantity - r.total_counted <> 0

            UNION ALL

            SELECT s.sku,
                   COALESCE(
                     (SELECT pm.description FROM product_meta pm
                      WHERE pm.canonical_code = s.sku),
                     (SELECT pm.description FROM product_meta pm
                      WHERE pm.legacy_code = s.sku
                      ORDER BY pm.canonical_code LIMIT 1)
                   ),
                   NULL, NULL, s.quantity, NULL,
                   NULL, NULL, NULL, s.depot,
                   NULL, s.date, NULL, NULL
            FROM snapshots s
            WHERE NOT EXISTS (
              SELECT 1 FROM counts c
              LEFT JOIN site_depot_map m ON m.site = c.site
              WHERE c.sku = s.sku
                AND date(c.created) = s.date
                AND COALESCE(m.depot, ?1) = s.depot
            )

            ORDER BY sku, count_date, site, location
            ",
        )?;

        let rows = statement
            .query_map([default_depot], |row| {
                Ok(DiscrepancyRow {
                    sku: row.get(0)?,
                    description: row.get(1)?,
                    counted_quantity: row.get(2)?,
                    total_counted_quantity: row.get(3)?,
                    snapshot_quantity: row.get(4)?,
                    discrepancy: row.get(5)?,
                    location: row.get(6)?,
                    section: row.get(7)?,
                    site: row.get(8)?,
                    depot: row.get(9)?,
                    count_date: row.get(10)?,
                    snapshot_date: row.get(11)?,
                    note: row.get(12)?,
                    operator: row.get(13)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    // ── Status ───────────────────────────────────────────────────────

    pub fn counts(&self) -> Result<StoreCounts> {
        Ok(StoreCounts {
            snapshots: self.count_rows("SELECT COUNT(*) FROM snapshots")?,
            counts: self.count_rows("SELECT COUNT(*) FROM counts")?,
            product_meta: self.count_rows("SELECT COUNT(*) FROM product_meta")?,
            import_ledger: self.count_rows("SELECT COUNT(*) FROM import_ledger")?,
            corrections: self.count_rows("SELECT COUNT(*) FROM corrections")?,
        })
    }

    fn count_rows(&self, sql: &str) -> Result<i64> {
        let count = self.conn.query_row(sql, [], |row| row.get(0))?;
        Ok(count)
    }
}

fn configure_connection(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    Ok(())
}
