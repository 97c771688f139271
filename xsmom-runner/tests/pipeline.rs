//! Integration tests for the file-based pipeline entry point.
//!
//! Builds a throwaway SQLite database in the adjusted-futures layout, then
//! drives `run_pipeline` and the SQLite loader against it.

use std::path::{Path, PathBuf};

use rusqlite::{params, Connection};
use tempfile::TempDir;

use xsmom_core::SignalMode;
use xsmom_runner::{
    export, run_pipeline, LoadError, PriceRequest, PriceSource, RunError, SqlitePriceSource,
    TrialOverrides,
};

const INSTRUMENTS: [&str; 4] = ["rb", "cu", "al", "zn"];

struct Fixture {
    dir: TempDir,
    db: PathBuf,
}

/// 60 consecutive trading days per instrument, plus rows for a second
/// adjustment method and an unrequested instrument that must be filtered out.
fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("futures.db");
    let conn = Connection::open(&db).unwrap();
    conn.execute_batch(
        "CREATE TABLE AdjustedFuturesDaily (
             TradingDay INTEGER NOT NULL,
             Instrument TEXT NOT NULL,
             ClosePrice REAL,
             factor_multiply REAL,
             method TEXT NOT NULL
         );",
    )
    .unwrap();

    let mut stmt = conn
        .prepare(
            "INSERT INTO AdjustedFuturesDaily
             (TradingDay, Instrument, ClosePrice, factor_multiply, method)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .unwrap();
    let start = chrono::NaiveDate::from_ymd_opt(2021, 1, 4).unwrap();
    for day in 0..60i64 {
        let date = start + chrono::Duration::days(day);
        let yyyymmdd: i64 = date.format("%Y%m%d").to_string().parse().unwrap();
        for (k, name) in INSTRUMENTS.iter().enumerate() {
            let drift = (k as f64 - 1.5) * 0.004;
            let wiggle = 1.0 + 0.001 * ((day + k as i64) % 3) as f64;
            let close = 100.0 * (1.0 + drift).powi(day as i32) * wiggle;
            stmt.execute(params![yyyymmdd, name, close, 1.0, "OpenInterest"])
                .unwrap();
            stmt.execute(params![yyyymmdd, name, close * 3.0, 1.0, "Volume"])
                .unwrap();
        }
        stmt.execute(params![yyyymmdd, "ni", 50.0, 1.0, "OpenInterest"])
            .unwrap();
    }
    drop(stmt);
    drop(conn);
    Fixture { dir, db }
}

fn write_config(dir: &Path, db: &Path) -> PathBuf {
    let path = dir.join("xsmom.toml");
    let doc = format!(
        r#"
[data]
db_path = "{}"

[factor]
window = 5
skip = 1

[trade]
trade_percent = 0.25
gross_target = 1.0
hold_period = 2
"#,
        db.display()
    );
    std::fs::write(&path, doc).unwrap();
    path
}

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

// ─── SQLite loader ──────────────────────────────────────────────────

#[test]
fn loader_filters_method_dates_and_instruments() {
    let fx = fixture();
    let source = SqlitePriceSource::new(&fx.db, "AdjustedFuturesDaily");
    let panel = source
        .load(&PriceRequest::new(names(&["cu", "rb"]), 20210110, Some(20210120)))
        .unwrap();

    assert_eq!(panel.instruments(), &names(&["cu", "rb"])[..]);
    assert_eq!(panel.nrows(), 11);
    assert_eq!(panel.dates()[0].to_string(), "2021-01-10");
    // Only OpenInterest rows: the Volume rows are three times larger.
    assert!(panel.values().iter().all(|v| *v > 50.0 && *v < 200.0));
}

#[test]
fn loader_reports_empty_result() {
    let fx = fixture();
    let source = SqlitePriceSource::new(&fx.db, "AdjustedFuturesDaily");
    let err = source
        .load(&PriceRequest::new(names(&["rb"]), 20300101, None))
        .unwrap_err();
    assert!(matches!(err, LoadError::EmptyResult(_)));

    let err = source
        .load(&PriceRequest::new(names(&["xx"]), 20210101, None))
        .unwrap_err();
    assert!(matches!(err, LoadError::EmptyResult(_)));
}

#[test]
fn loader_rejects_bad_arguments() {
    let fx = fixture();
    let source = SqlitePriceSource::new(&fx.db, "AdjustedFuturesDaily");
    let err = source
        .load(&PriceRequest::new(vec![], 20210101, None))
        .unwrap_err();
    assert!(matches!(err, LoadError::InvalidArgument(_)));

    let bad_table = SqlitePriceSource::new(&fx.db, "Adjusted; DROP TABLE x");
    let err = bad_table
        .load(&PriceRequest::new(names(&["rb"]), 20210101, None))
        .unwrap_err();
    assert!(matches!(err, LoadError::InvalidArgument(_)));

    let missing = SqlitePriceSource::new(fx.dir.path().join("nope.db"), "AdjustedFuturesDaily");
    let err = missing
        .load(&PriceRequest::new(names(&["rb"]), 20210101, None))
        .unwrap_err();
    assert!(matches!(err, LoadError::Io { .. }));
}

// ─── run_pipeline ───────────────────────────────────────────────────

#[test]
fn end_to_end_run_from_config_file() {
    let fx = fixture();
    let config = write_config(fx.dir.path(), &fx.db);
    let out = run_pipeline(
        &config,
        &names(&INSTRUMENTS),
        20210101,
        None,
        SignalMode::Simple,
        None,
    )
    .unwrap();

    assert_eq!(out.backtest.len(), 60);
    assert_eq!(out.signal.leading_unknown_rows(), 6);
    assert_eq!(out.performance.n_days, 60);
    // Every known position row is dollar-neutral at the gross target.
    for row in out.positions.rows().skip(7) {
        let net: f64 = row.iter().sum();
        let gross: f64 = row.iter().map(|v| v.abs()).sum();
        assert!(net.abs() < 1e-9, "net {net}");
        assert!((gross - 1.0).abs() < 1e-9, "gross {gross}");
    }
    // The strongest trend (zn) ends long, the weakest (rb) ends short.
    let last = out.positions.row(out.positions.nrows() - 1);
    assert!(last[3] > 0.0);
    assert!(last[0] < 0.0);
}

#[test]
fn overrides_flow_through_run_pipeline() {
    let fx = fixture();
    let config = write_config(fx.dir.path(), &fx.db);
    let overrides = TrialOverrides {
        window: Some(10),
        skip: Some(2),
        ..TrialOverrides::default()
    };
    let out = run_pipeline(
        &config,
        &names(&INSTRUMENTS),
        20210101,
        Some(20210301),
        SignalMode::Linear,
        Some(&overrides),
    )
    .unwrap();
    assert_eq!(out.signal.leading_unknown_rows(), 12);
}

#[test]
fn config_and_data_errors_are_distinguished() {
    let fx = fixture();
    let err = run_pipeline(
        &fx.dir.path().join("missing.toml"),
        &names(&["rb"]),
        20210101,
        None,
        SignalMode::Simple,
        None,
    )
    .unwrap_err();
    assert!(matches!(err, RunError::Config(_)));

    let config = write_config(fx.dir.path(), &fx.db);
    let err = run_pipeline(
        &config,
        &names(&["rb"]),
        20210101,
        Some(20201231),
        SignalMode::Simple,
        None,
    )
    .unwrap_err();
    assert!(matches!(err, RunError::Data(LoadError::InvalidArgument(_))));
}

#[test]
fn run_artifacts_are_written() {
    let fx = fixture();
    let config = write_config(fx.dir.path(), &fx.db);
    let out = run_pipeline(
        &config,
        &names(&INSTRUMENTS),
        20210101,
        None,
        SignalMode::Exponential,
        None,
    )
    .unwrap();
    let dir = fx.dir.path().join("artifacts");
    export::save_run_artifacts(&out, &dir).unwrap();

    let backtest = std::fs::read_to_string(dir.join("backtest.csv")).unwrap();
    assert_eq!(backtest.lines().count(), 61);
    assert_eq!(
        backtest.lines().next().unwrap(),
        "date,pnl,cum_pnl,turnover,gross_exposure,drawdown,rolling_sharpe"
    );
    // 60 days never fill the quarterly window.
    assert!(backtest.lines().skip(1).all(|l| l.ends_with(',')));
    let positions = std::fs::read_to_string(dir.join("positions.csv")).unwrap();
    assert!(positions.starts_with("date,rb,cu,al,zn"));

    let summary: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(dir.join("metrics.json")).unwrap()).unwrap();
    assert_eq!(summary["dataset_hash"], out.dataset_hash.as_str());
    assert_eq!(summary["metrics"]["n_days"], 60);
}
