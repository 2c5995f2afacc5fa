use std::env;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use mysql::prelude::Queryable;
use mysql::{Conn, OptsBuilder, Row};
use tracing::debug;

use crate::error::{Result, SyncError};
use crate::model::{CountRecord, ProductMeta};

/// One un-normalized row from the remote count join. Field presence is not
/// guaranteed; [`RawCountRow::normalize`] enforces the row contract.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawCountRow {
    pub current_code: Option<String>,
    pub legacy_code: Option<String>,
    pub quantity: Option<i64>,
    pub location: Option<String>,
    pub section: Option<i64>,
    pub site: Option<String>,
    pub created: Option<NaiveDate>,
    pub last_modified: Option<NaiveDateTime>,
    pub note: Option<String>,
    pub operator: Option<String>,
}

impl RawCountRow {
    /// Derives the sku from the current product code, falling back to the
    /// legacy code. Rows missing any other required field, or carrying a
    /// negative quantity, are rejected rather than coerced.
    pub fn normalize(self) -> Result<CountRecord> {
        let sku = self
            .current_code
            .filter(|code| !code.trim().is_empty())
            .or_else(|| self.legacy_code.filter(|code| !code.trim().is_empty()))
            .ok_or_else(|| SyncError::Validation {
                reason: "count row has neither a current nor a legacy product code".to_string(),
            })?;

        let quantity = self.quantity.ok_or_else(|| SyncError::Validation {
            reason: format!("count row for {sku} has no quantity"),
        })?;
        if quantity < 0 {
            return Err(SyncError::Validation {
                reason: format!("count row for {sku} has negative quantity {quantity}"),
            });
        }

        let site = self
            .site
            .filter(|site| !site.trim().is_empty())
            .ok_or_else(|| SyncError::Validation {
                reason: format!("count row for {sku} has no site"),
            })?;
        let location = self
            .location
            .filter(|location| !location.trim().is_empty())
            .ok_or_else(|| SyncError::Validation {
                reason: format!("count row for {sku} has no location"),
            })?;
        let operator = self
            .operator
            .filter(|operator| !operator.trim().is_empty())
            .ok_or_else(|| SyncError::Validation {
                reason: format!("count row for {sku} has no operator"),
            })?;
        let created = self.created.ok_or_else(|| SyncError::Validation {
            reason: format!("count row for {sku} has no creation date"),
        })?;

        // Part of the natural key; coercing a missing value to 0 could
        // collide distinct counts.
        let section = self.section.ok_or_else(|| SyncError::Validation {
            reason: format!("count row for {sku} has no section"),
        })?;
        let last_modified = self
            .last_modified
            .ok_or_else(|| SyncError::Validation {
                reason: format!("count row for {sku} has no last-modified timestamp"),
            })?
            .and_utc();

        Ok(CountRecord {
            sku,
            quantity,
            location,
            section,
            site,
            created,
            last_modified,
            note: self.note.filter(|note| !note.trim().is_empty()),
            operator,
        })
    }
}

/// Paginated access to the remote authoritative count join.
pub trait CountSource {
    /// Exact row count of the remote join; used only for progress logging.
    fn count_total(&mut self) -> Result<u64>;

    /// One `LIMIT/OFFSET` page in deterministic order. An empty page means
    /// the sequence is exhausted.
    fn fetch_page(&mut self, limit: usize, offset: usize) -> Result<Vec<RawCountRow>>;
}

/// Dual-key product metadata lookup for the backfill phase.
pub trait ProductSource {
    /// Products whose canonical or legacy code appears in `codes`.
    fn lookup_products(&mut self, codes: &[String]) -> Result<Vec<ProductMeta>>;
}

/// Lazy, finite, non-restartable sequence of remote pages. Iteration stops
/// at the first empty page even when fewer rows than `count_total` were
/// seen, which guards against concurrent remote mutation mid-fetch.
pub struct Batches<'a, S: CountSource + ?Sized> {
    source: &'a mut S,
    batch_size: usize,
    offset: usize,
    done: bool,
}

impl<S: CountSource + ?Sized> Iterator for Batches<'_, S> {
    type Item = Result<Vec<RawCountRow>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match self.source.fetch_page(self.batch_size, self.offset) {
            Ok(page) if page.is_empty() => {
                self.done = true;
                None
            }
            Ok(page) => {
                self.offset += page.len();
                Some(Ok(page))
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

pub fn fetch_batches<S: CountSource + ?Sized>(source: &mut S, batch_size: usize) -> Batches<'_, S> {
    Batches {
        source,
        batch_size: batch_size.max(1),
        offset: 0,
        done: false,
    }
}

/// Connection parameters for the remote inventory database. The secured
/// tunnel is established externally; this only ever dials the local bind.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
}

impl RemoteConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            host: require_env("ODIN_DB_HOST")?,
            port: require_env("ODIN_DB_PORT")?
                .parse()
                .map_err(|_| SyncError::Config("ODIN_DB_PORT".to_string()))?,
            user: require_env("ODIN_DB_USER")?,
            password: require_env("ODIN_DB_PW")?,
            database: require_env("ODIN_DB_NAME")?,
        })
    }
}

fn require_env(name: &str) -> Result<String> {
    env::var(name)
        .ok()
        .filter(|value| !value.is_empty())
        .ok_or_else(|| SyncError::Config(name.to_string()))
}

const COUNT_JOIN_FROM: &str = "
    FROM inventario_completo ic
    LEFT JOIN prodotti p ON ic.id_prod = p.id
    LEFT JOIN sedi s ON s.id = ic.id_sede
";

/// MariaDB-backed implementation of both remote source traits.
pub struct MariaDbSource {
    conn: Conn,
}

impl MariaDbSource {
    pub fn connect(config: &RemoteConfig) -> Result<Self> {
        let opts = OptsBuilder::new()
            .ip_or_hostname(Some(config.host.clone()))
            .tcp_port(config.port)
            .user(Some(config.user.clone()))
            .pass(Some(config.password.clone()))
            .db_name(Some(config.database.clone()));

        let conn = Conn::new(opts)?;
        debug!(host = %config.host, port = config.port, "connected to remote inventory source");
        Ok(Self { conn })
    }
}

impl CountSource for MariaDbSource {
    fn count_total(&mut self) -> Result<u64> {
        let total: Option<u64> = self
            .conn
            .query_first(format!("SELECT COUNT(*) {COUNT_JOIN_FROM}"))?;
        Ok(total.unwrap_or(0))
    }

    fn fetch_page(&mut self, limit: usize, offset: usize) -> Result<Vec<RawCountRow>> {
        // Dates come back as formatted strings so the row shape does not
        // depend on driver-side temporal type mapping.
        let sql = format!(
            "SELECT p.cod AS cod,
                    p.cod_vecchio AS cod_vecchio,
                    ic.qta AS qta,
                    ic.luogo AS luogo,
                    ic.sezione AS sezione,
                    s.nome AS sede,
                    DATE_FORMAT(ic.data_creazione, '%Y-%m-%d') AS data_creazione,
                    DATE_FORMAT(ic.ultima_modifica, '%Y-%m-%dT%H:%i:%S') AS ultima_modifica,
                    ic.note AS note,
                    ic.operatore AS operatore
             {COUNT_JOIN_FROM}
             ORDER BY ic.id
             LIMIT ? OFFSET ?"
        );

        let rows: Vec<Row> = self.conn.exec(sql, (limit as u64, offset as u64))?;
        Ok(rows.into_iter().map(raw_count_row).collect())
    }
}

impl ProductSource for MariaDbSource {
    fn lookup_products(&mut self, codes: &[String]) -> Result<Vec<ProductMeta>> {
        if codes.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; codes.len()].join(", ");
        let sql = format!(
            "SELECT cod, cod_vecchio, descrizione,
                    DATE_FORMAT(ultima_modifica, '%Y-%m-%dT%H:%i:%S') AS ultima_modifica
             FROM prodotti
             WHERE cod IN ({placeholders}) OR cod_vecchio IN ({placeholders})"
        );

        let mut bound: Vec<mysql::Value> = Vec::with_capacity(codes.len() * 2);
        for _ in 0..2 {
            bound.extend(codes.iter().map(|code| mysql::Value::from(code.as_str())));
        }

        let rows: Vec<Row> = self.conn.exec(sql, bound)?;
        Ok(rows.into_iter().filter_map(product_meta_row).collect())
    }
}

fn raw_count_row(mut row: Row) -> RawCountRow {
    RawCountRow {
        current_code: take_opt(&mut row, "cod"),
        legacy_code: take_opt(&mut row, "cod_vecchio"),
        quantity: take_opt(&mut row, "qta"),
        location: take_opt(&mut row, "luogo"),
        section: take_opt(&mut row, "sezione"),
        site: take_opt(&mut row, "sede"),
        created: take_opt::<String>(&mut row, "data_creazione")
            .and_then(|raw| NaiveDate::parse_from_str(&raw, "%Y-%m-%d").ok()),
        last_modified: take_opt::<String>(&mut row, "ultima_modifica")
            .and_then(|raw| NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S").ok()),
        note: take_opt(&mut row, "note"),
        operator: take_opt(&mut row, "operatore"),
    }
}

fn product_meta_row(mut row: Row) -> Option<ProductMeta> {
    let canonical_code: String = take_opt(&mut row, "cod")?;
    let description: String = take_opt(&mut row, "descrizione").unwrap_or_default();
    let last_modified: DateTime<Utc> = take_opt::<String>(&mut row, "ultima_modifica")
        .and_then(|raw| NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S").ok())
        .map(|naive| naive.and_utc())
        .unwrap_or_else(Utc::now);

    Some(ProductMeta {
        canonical_code,
        legacy_code: take_opt(&mut row, "cod_vecchio"),
        description,
        last_modified,
    })
}

fn take_opt<T: mysql::prelude::FromValue>(row: &mut Row, column: &str) -> Option<T> {
    row.take::<Option<T>, _>(column).flatten()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(code: &str, quantity: i64) -> RawCountRow {
        RawCountRow {
            current_code: Some(code.to_string()),
            legacy_code: None,
            quantity: Some(quantity),
            location: Some("A-01".to_string()),
            section: Some(1),
            site: Some("Rende".to_string()),
            created: NaiveDate::from_ymd_opt(2024, 3, 1),
            last_modified: NaiveDate::from_ymd_opt(2024, 3, 1)
                .and_then(|day| day.and_hms_opt(8, 30, 0)),
            note: None,
            operator: Some("mario".to_string()),
        }
    }

    struct FakeSource {
        rows: Vec<RawCountRow>,
        reported_total: u64,
        pages_served: usize,
    }

    impl FakeSource {
        fn new(rows: Vec<RawCountRow>) -> Self {
            let reported_total = rows.len() as u64;
            Self {
                rows,
                reported_total,
                pages_served: 0,
            }
        }
    }

    impl CountSource for FakeSource {
        fn count_total(&mut self) -> Result<u64> {
            Ok(self.reported_total)
        }

        fn fetch_page(&mut self, limit: usize, offset: usize) -> Result<Vec<RawCountRow>> {
            self.pages_served += 1;
            Ok(self
                .rows
                .iter()
                .skip(offset)
                .take(limit)
                .cloned()
                .collect())
        }
    }

    #[test]
    fn fetch_batches_yields_ceil_of_total_over_batch_size() {
        let rows: Vec<RawCountRow> = (0..7).map(|i| raw(&format!("X{i:03}"), i)).collect();
        let mut source = FakeSource::new(rows.clone());

        let batches: Vec<Vec<RawCountRow>> = fetch_batches(&mut source, 3)
            .collect::<Result<Vec<_>>>()
            .expect("batches fetch");

        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].len(), 3);
        assert_eq!(batches[2].len(), 1);

        let concatenated: Vec<RawCountRow> = batches.into_iter().flatten().collect();
        assert_eq!(concatenated, rows);
    }

    #[test]
    fn fetch_batches_stops_on_empty_page_even_if_total_lied() {
        let mut source = FakeSource::new(vec![raw("X001", 1), raw("X002", 2)]);
        source.reported_total = 100;

        let batches: Vec<Vec<RawCountRow>> = fetch_batches(&mut source, 2)
            .collect::<Result<Vec<_>>>()
            .expect("batches fetch");

        let seen: usize = batches.iter().map(Vec::len).sum();
        assert_eq!(seen, 2);
        // One full page plus the empty terminator.
        assert_eq!(source.pages_served, 2);
    }

    #[test]
    fn exact_multiple_of_batch_size_needs_a_terminating_empty_page() {
        let mut source = FakeSource::new(vec![raw("X001", 1), raw("X002", 2)]);

        let batches: Vec<Vec<RawCountRow>> = fetch_batches(&mut source, 1)
            .collect::<Result<Vec<_>>>()
            .expect("batches fetch");

        assert_eq!(batches.len(), 2);
        assert_eq!(source.pages_served, 3);
    }

    #[test]
    fn normalize_prefers_current_code_and_falls_back_to_legacy() {
        let mut row = raw("X001", 5);
        row.legacy_code = Some("OLD-1".to_string());
        assert_eq!(row.clone().normalize().expect("normalizes").sku, "X001");

        row.current_code = None;
        assert_eq!(row.normalize().expect("normalizes").sku, "OLD-1");
    }

    #[test]
    fn normalize_rejects_rows_without_any_code() {
        let mut row = raw("X001", 5);
        row.current_code = None;
        row.legacy_code = Some("   ".to_string());

        let err = row.normalize().expect_err("row must be rejected");
        assert!(matches!(err, SyncError::Validation { .. }));
    }

    #[test]
    fn normalize_rejects_negative_quantities() {
        let err = raw("X001", -3).normalize().expect_err("row must be rejected");
        assert!(matches!(err, SyncError::Validation { .. }));
    }

    #[test]
    fn normalize_rejects_rows_without_a_section() {
        let mut row = raw("X001", 5);
        row.section = None;

        let err = row.normalize().expect_err("row must be rejected");
        assert!(matches!(err, SyncError::Validation { .. }));
    }

    #[test]
    fn normalize_rejects_rows_without_a_last_modified_timestamp() {
        let mut row = raw("X001", 5);
        row.last_modified = None;

        let err = row.normalize().expect_err("row must be rejected");
        assert!(matches!(err, SyncError::Validation { .. }));
    }

    #[test]
    fn normalize_drops_blank_notes() {
        let mut row = raw("X001", 5);
        row.note = Some("  ".to_string());

        let record = row.normalize().expect("normalizes");
        assert_eq!(record.note, None);
        assert_eq!(
            record.last_modified.date_naive(),
            NaiveDate::from_ymd_opt(2024, 3, 1).expect("valid date")
        );
    }
}
