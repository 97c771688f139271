//! Price loading: SQLite, long-format CSV and synthetic sources.
//!
//! Every source answers a [`PriceRequest`] with an adjusted-close [`Panel`]
//! whose columns follow the requested instrument order. Cells with no row in
//! the source stay unknown (`NaN`); nothing is forward-filled.
//!
//! Synthetic data is a developer-only mode. It is tagged in logs and should
//! never be mistaken for research results.

use chrono::{Datelike, NaiveDate};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use thiserror::Error;

use rand::Rng;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OpenFlags};
use xsmom_core::{Panel, PanelError, RngHierarchy};

pub const MIN_DATE: u32 = 1900_01_01;
pub const MAX_DATE: u32 = 2100_12_31;

/// Errors from the data loading layer.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("no price rows found for {0}")]
    EmptyResult(String),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("failed to open {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("panel error: {0}")]
    Panel(#[from] PanelError),
}

/// Instruments and a `YYYYMMDD` date range (end inclusive, open when `None`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceRequest {
    pub instruments: Vec<String>,
    pub start_date: u32,
    pub end_date: Option<u32>,
}

impl PriceRequest {
    pub fn new(instruments: Vec<String>, start_date: u32, end_date: Option<u32>) -> Self {
        Self {
            instruments,
            start_date,
            end_date,
        }
    }

    pub fn validate(&self) -> Result<(), LoadError> {
        if self.instruments.is_empty() {
            return Err(LoadError::InvalidArgument(
                "instrument list must not be empty".into(),
            ));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = self.instruments.iter().find(|i| !seen.insert(i.as_str())) {
            return Err(LoadError::InvalidArgument(format!(
                "instrument '{dup}' is requested more than once"
            )));
        }
        let start = parse_yyyymmdd(self.start_date)?;
        if let Some(end_date) = self.end_date {
            let end = parse_yyyymmdd(end_date)?;
            if end < start {
                return Err(LoadError::InvalidArgument(format!(
                    "end_date {end_date} is before start_date {}",
                    self.start_date
                )));
            }
        }
        Ok(())
    }

    fn contains(&self, day: u32) -> bool {
        day >= self.start_date && self.end_date.map_or(true, |end| day <= end)
    }

    fn describe(&self) -> String {
        let end = self
            .end_date
            .map_or_else(|| "open".to_string(), |e| e.to_string());
        format!(
            "instruments [{}] from {} to {end}",
            self.instruments.join(", "),
            self.start_date
        )
    }
}

/// Anything that can answer a price request.
pub trait PriceSource: Send + Sync {
    fn load(&self, request: &PriceRequest) -> Result<Panel, LoadError>;

    /// Short label used in logs.
    fn name(&self) -> &str;

    fn is_synthetic(&self) -> bool {
        false
    }
}

/// Validate and convert a `YYYYMMDD` integer.
pub fn parse_yyyymmdd(value: u32) -> Result<NaiveDate, LoadError> {
    if !(MIN_DATE..=MAX_DATE).contains(&value) {
        return Err(LoadError::InvalidArgument(format!(
            "date {value} outside [{MIN_DATE}, {MAX_DATE}]"
        )));
    }
    let (y, m, d) = (value / 10_000, (value / 100) % 100, value % 100);
    NaiveDate::from_ymd_opt(y as i32, m, d)
        .ok_or_else(|| LoadError::InvalidArgument(format!("date {value} is not a calendar date")))
}

/// `NaiveDate` back to `YYYYMMDD`.
pub fn to_yyyymmdd(date: NaiveDate) -> u32 {
    date.year() as u32 * 10_000 + date.month() * 100 + date.day()
}

/// Pivot long records into a panel with columns in `instruments` order.
///
/// Records for instruments outside the list are ignored; a repeated
/// `(date, instrument)` keeps the last value seen.
fn pivot(
    instruments: &[String],
    records: impl IntoIterator<Item = (NaiveDate, String, f64)>,
) -> Result<Panel, PanelError> {
    let column: HashMap<&str, usize> = instruments
        .iter()
        .enumerate()
        .map(|(i, name)| (name.as_str(), i))
        .collect();
    let mut rows: HashMap<NaiveDate, Vec<f64>> = HashMap::new();
    for (date, instrument, price) in records {
        if let Some(&c) = column.get(instrument.as_str()) {
            rows.entry(date)
                .or_insert_with(|| vec![f64::NAN; instruments.len()])[c] = price;
        }
    }
    Panel::from_unsorted(instruments.to_vec(), rows.into_iter().collect())
}

// ─── SQLite ──────────────────────────────────────────────────────────

/// Adjusted daily futures table in SQLite.
///
/// Expected columns: `TradingDay` (YYYYMMDD integer or text), `Instrument`,
/// `ClosePrice`, `factor_multiply` and `method`. Only rows adjusted by the
/// `OpenInterest` method are read; the adjusted close is
/// `ClosePrice * factor_multiply`.
#[derive(Debug, Clone)]
pub struct SqlitePriceSource {
    pub db_path: PathBuf,
    pub table: String,
}

impl SqlitePriceSource {
    pub const ADJUST_METHOD: &'static str = "OpenInterest";

    pub fn new(db_path: impl Into<PathBuf>, table: impl Into<String>) -> Self {
        Self {
            db_path: db_path.into(),
            table: table.into(),
        }
    }

    fn query(&self, request: &PriceRequest) -> (String, Vec<Value>) {
        let mut sql = format!(
            "SELECT TradingDay, Instrument, ClosePrice * factor_multiply AS adjclose \
             FROM {} WHERE TradingDay >= ?1",
            self.table
        );
        let mut values = vec![Value::Integer(request.start_date as i64)];
        if let Some(end) = request.end_date {
            values.push(Value::Integer(end as i64));
            sql.push_str(&format!(" AND TradingDay <= ?{}", values.len()));
        }
        let first = values.len() + 1;
        let placeholders: Vec<String> = (0..request.instruments.len())
            .map(|i| format!("?{}", first + i))
            .collect();
        sql.push_str(&format!(
            " AND Instrument IN ({}) AND method = '{}'",
            placeholders.join(", "),
            Self::ADJUST_METHOD
        ));
        values.extend(request.instruments.iter().cloned().map(Value::Text));
        (sql, values)
    }
}

impl PriceSource for SqlitePriceSource {
    fn load(&self, request: &PriceRequest) -> Result<Panel, LoadError> {
        request.validate()?;
        if !is_plain_identifier(&self.table) {
            return Err(LoadError::InvalidArgument(format!(
                "table name '{}' is not a plain identifier",
                self.table
            )));
        }
        if !self.db_path.exists() {
            return Err(LoadError::Io {
                path: self.db_path.clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "database not found"),
            });
        }

        let conn = Connection::open_with_flags(&self.db_path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        let (sql, values) = self.query(request);
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), |row| {
            let day: Value = row.get(0)?;
            let instrument: String = row.get(1)?;
            let adjclose: Option<f64> = row.get(2)?;
            Ok((day, instrument, adjclose))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (day, instrument, adjclose) = row?;
            let date = trading_day(&day)?;
            records.push((date, instrument, adjclose.unwrap_or(f64::NAN)));
        }
        if records.is_empty() {
            return Err(LoadError::EmptyResult(request.describe()));
        }
        tracing::debug!(rows = records.len(), table = %self.table, "sqlite rows loaded");
        Ok(pivot(&request.instruments, records)?)
    }

    fn name(&self) -> &str {
        "sqlite"
    }
}

fn trading_day(value: &Value) -> Result<NaiveDate, LoadError> {
    let raw = match value {
        Value::Integer(i) => u32::try_from(*i).ok(),
        Value::Text(s) => s.trim().parse::<u32>().ok(),
        Value::Real(r) if r.fract() == 0.0 && *r >= 0.0 => Some(*r as u32),
        _ => None,
    };
    raw.ok_or_else(|| LoadError::InvalidArgument(format!("unreadable TradingDay {value:?}")))
        .and_then(parse_yyyymmdd)
}

fn is_plain_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

// ─── CSV ─────────────────────────────────────────────────────────────

/// Long-format CSV with header `date,instrument,adjclose`.
///
/// Dates may be `YYYY-MM-DD` or `YYYYMMDD`. An empty `adjclose` is unknown.
#[derive(Debug, Clone)]
pub struct CsvPriceSource {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize)]
struct CsvRow {
    date: String,
    instrument: String,
    adjclose: Option<f64>,
}

impl CsvPriceSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl PriceSource for CsvPriceSource {
    fn load(&self, request: &PriceRequest) -> Result<Panel, LoadError> {
        request.validate()?;
        let file = std::fs::File::open(&self.path).map_err(|source| LoadError::Io {
            path: self.path.clone(),
            source,
        })?;
        let mut reader = csv::Reader::from_reader(file);

        let mut records = Vec::new();
        for row in reader.deserialize::<CsvRow>() {
            let row = row?;
            let date = parse_csv_date(&row.date)?;
            if !request.contains(to_yyyymmdd(date)) {
                continue;
            }
            if !request.instruments.contains(&row.instrument) {
                continue;
            }
            records.push((date, row.instrument, row.adjclose.unwrap_or(f64::NAN)));
        }
        if records.is_empty() {
            return Err(LoadError::EmptyResult(request.describe()));
        }
        Ok(pivot(&request.instruments, records)?)
    }

    fn name(&self) -> &str {
        "csv"
    }
}

fn parse_csv_date(raw: &str) -> Result<NaiveDate, LoadError> {
    let raw = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Ok(date);
    }
    raw.parse::<u32>()
        .map_err(|_| LoadError::InvalidArgument(format!("unreadable date '{raw}'")))
        .and_then(parse_yyyymmdd)
}

// ─── Synthetic ───────────────────────────────────────────────────────

/// Deterministic geometric random walk per instrument on weekdays.
///
/// Each instrument draws from its own BLAKE3-derived stream, so adding an
/// instrument never changes the others. An open-ended request spans two years.
#[derive(Debug, Clone)]
pub struct SyntheticPriceSource {
    pub seed: u64,
}

impl SyntheticPriceSource {
    const OPEN_END_DAYS: i64 = 730;

    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    fn walk(&self, instrument: &str, dates: &[NaiveDate]) -> Vec<f64> {
        let mut rng = RngHierarchy::new(self.seed).rng_for(&format!("synthetic/{instrument}"), 0);
        let drift: f64 = rng.gen_range(-0.0008..0.0008);
        let vol: f64 = rng.gen_range(0.005..0.025);
        let mut price = rng.gen_range(20.0..200.0);
        dates
            .iter()
            .map(|_| {
                let shock: f64 = rng.gen_range(-1.0..1.0) * vol * 3.0_f64.sqrt();
                price *= (1.0 + drift + shock).max(0.5);
                price
            })
            .collect()
    }
}

impl PriceSource for SyntheticPriceSource {
    fn load(&self, request: &PriceRequest) -> Result<Panel, LoadError> {
        request.validate()?;
        let start = parse_yyyymmdd(request.start_date)?;
        let end = match request.end_date {
            Some(end) => parse_yyyymmdd(end)?,
            None => start + chrono::Duration::days(Self::OPEN_END_DAYS),
        };
        let dates: Vec<NaiveDate> = start
            .iter_days()
            .take_while(|d| *d <= end)
            .filter(|d| !matches!(d.weekday(), chrono::Weekday::Sat | chrono::Weekday::Sun))
            .collect();
        if dates.is_empty() {
            return Err(LoadError::EmptyResult(request.describe()));
        }

        tracing::warn!(
            seed = self.seed,
            instruments = request.instruments.len(),
            "generating synthetic prices; results are not research-grade"
        );
        let columns: Vec<Vec<f64>> = request
            .instruments
            .iter()
            .map(|name| self.walk(name, &dates))
            .collect();
        let rows = (0..dates.len())
            .map(|r| columns.iter().map(|col| col[r]).collect())
            .collect();
        Ok(Panel::from_rows(dates, request.instruments.clone(), rows)?)
    }

    fn name(&self) -> &str {
        "synthetic"
    }

    fn is_synthetic(&self) -> bool {
        true
    }
}

/// Deterministic BLAKE3 fingerprint over a price panel.
pub fn dataset_hash(prices: &Panel) -> String {
    let mut hasher = blake3::Hasher::new();
    for name in prices.instruments() {
        hasher.update(name.as_bytes());
        hasher.update(&[0]);
    }
    for date in prices.dates() {
        hasher.update(&to_yyyymmdd(*date).to_le_bytes());
    }
    for v in prices.values() {
        hasher.update(&v.to_le_bytes());
    }
    hasher.finalize().to_hex().to_string()
}

/// Pick the configured source: SQLite when a database is set, else CSV.
pub fn source_for_paths(
    db_path: Option<&Path>,
    table: &str,
    csv_path: Option<&Path>,
) -> Result<Box<dyn PriceSource>, LoadError> {
    match (db_path, csv_path) {
        (Some(db), _) => Ok(Box::new(SqlitePriceSource::new(db, table))),
        (None, Some(csv)) => Ok(Box::new(CsvPriceSource::new(csv))),
        (None, None) => Err(LoadError::InvalidArgument(
            "no data source configured: set data.db_path or data.csv_path".into(),
        )),
    }
}
