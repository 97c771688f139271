//! Reporting exports: CSV ledgers, panels, trial logs and JSON artifacts.
//!
//! The `export_*` functions render to strings; the `write_*` functions put
//! them on disk. `save_run_artifacts` / `save_search_artifacts` write the
//! bundles the CLI produces under `--output-dir`.

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use xsmom_core::metrics::{cumulative_curve, drawdown_curve, rolling_sharpe, PERIODS_PER_YEAR};
use xsmom_core::{BacktestOutput, Panel, PerformanceMetrics};

use crate::optimizer::{SearchReport, TrialRecord};
use crate::pipeline::PipelineOutput;

// ─── CSV export ─────────────────────────────────────────────────────

/// Trailing window of the `rolling_sharpe` ledger column (one quarter).
pub const ROLLING_SHARPE_WINDOW: usize = 63;

/// Daily ledger. Columns: date, pnl, cum_pnl, turnover, gross_exposure,
/// drawdown, rolling_sharpe.
///
/// `cum_pnl` is the compounded curve minus one; `drawdown` is measured on
/// the same curve. `rolling_sharpe` is empty until the window fills or
/// while it is undefined.
pub fn export_backtest_csv(output: &BacktestOutput) -> Result<String> {
    let pnl = output.pnl_ptf.values();
    let cum = cumulative_curve(pnl);
    let dd = drawdown_curve(pnl);
    let rs = rolling_sharpe(pnl, ROLLING_SHARPE_WINDOW, PERIODS_PER_YEAR);

    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record([
        "date",
        "pnl",
        "cum_pnl",
        "turnover",
        "gross_exposure",
        "drawdown",
        "rolling_sharpe",
    ])?;
    for (i, date) in output.pnl_ptf.dates().iter().enumerate() {
        wtr.write_record([
            &date.to_string(),
            &format!("{:.10}", pnl[i]),
            &format!("{:.10}", cum[i] - 1.0),
            &format!("{:.10}", output.turnover.values()[i]),
            &format!("{:.10}", output.gross_exposure.values()[i]),
            &format!("{:.10}", dd[i]),
            &fmt_cell(rs[i]),
        ])?;
    }
    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

/// Wide panel: a `date` column then one column per instrument. Unknown cells are empty.
pub fn export_panel_csv(panel: &Panel) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    let mut header = Vec::with_capacity(panel.ncols() + 1);
    header.push("date".to_string());
    header.extend(panel.instruments().iter().cloned());
    wtr.write_record(&header)?;

    for (date, row) in panel.dates().iter().zip(panel.rows()) {
        let mut record = Vec::with_capacity(row.len() + 1);
        record.push(date.to_string());
        record.extend(row.iter().map(|v| fmt_cell(*v)));
        wtr.write_record(&record)?;
    }
    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

/// Unknown (`NaN`) and infinite cells are written empty.
fn fmt_cell(v: f64) -> String {
    if v.is_finite() {
        format!("{v:.10}")
    } else {
        String::new()
    }
}

pub fn write_backtest_csv(path: &Path, output: &BacktestOutput) -> Result<()> {
    let csv = export_backtest_csv(output)?;
    std::fs::write(path, csv).with_context(|| format!("failed to write {}", path.display()))
}

pub fn write_panel_csv(path: &Path, panel: &Panel) -> Result<()> {
    let csv = export_panel_csv(panel)?;
    std::fs::write(path, csv).with_context(|| format!("failed to write {}", path.display()))
}

// ─── JSON export ────────────────────────────────────────────────────

/// One JSON object per line, in trial order. Undefined metrics are `null`.
pub fn write_trials_jsonl(path: &Path, trials: &[TrialRecord]) -> Result<()> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    let mut out = std::io::BufWriter::new(file);
    for trial in trials {
        let line = serde_json::to_string(trial)
            .with_context(|| format!("failed to serialize trial {}", trial.index))?;
        writeln!(out, "{line}")?;
    }
    out.flush()
        .with_context(|| format!("failed to flush {}", path.display()))
}

pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("failed to serialize to JSON")?;
    std::fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))
}

// ─── Artifact bundles ───────────────────────────────────────────────

/// `metrics.json` body: the metrics plus the fingerprint of the prices they came from.
#[derive(Serialize)]
struct RunSummary<'a> {
    dataset_hash: &'a str,
    metrics: &'a PerformanceMetrics,
}

/// Write `backtest.csv`, `positions.csv`, `signal.csv` and `metrics.json` into `dir`.
pub fn save_run_artifacts(output: &PipelineOutput, dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create artifact dir: {}", dir.display()))?;
    write_backtest_csv(&dir.join("backtest.csv"), &output.backtest)?;
    write_panel_csv(&dir.join("positions.csv"), &output.positions)?;
    write_panel_csv(&dir.join("signal.csv"), &output.signal)?;
    write_json(
        &dir.join("metrics.json"),
        &RunSummary {
            dataset_hash: &output.dataset_hash,
            metrics: &output.performance,
        },
    )?;
    tracing::info!(dir = %dir.display(), "run artifacts written");
    Ok(())
}

/// Write `trials.jsonl`, `best.json` (verdict and best trial) and `leaderboard.json` into `dir`.
pub fn save_search_artifacts(report: &SearchReport, dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create artifact dir: {}", dir.display()))?;
    write_trials_jsonl(&dir.join("trials.jsonl"), &report.trials)?;

    #[derive(Serialize)]
    struct Best<'a> {
        verdict: &'a crate::optimizer::Verdict,
        best_seen: &'a Option<TrialRecord>,
        stats: &'a crate::optimizer::SearchStats,
    }
    write_json(
        &dir.join("best.json"),
        &Best {
            verdict: &report.verdict,
            best_seen: &report.best_seen,
            stats: &report.stats,
        },
    )?;
    write_json(&dir.join("leaderboard.json"), report.leaderboard.entries())?;
    tracing::info!(dir = %dir.display(), trials = report.trials.len(), "search artifacts written");
    Ok(())
}

// ─── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use xsmom_core::{backtest, Series};

    fn dates(n: usize) -> Vec<NaiveDate> {
        let base = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        (0..n).map(|i| base + chrono::Duration::days(i as i64)).collect()
    }

    fn ledger() -> BacktestOutput {
        let prices = Panel::new(
            dates(3),
            vec!["a".into(), "b".into()],
            vec![100.0, 50.0, 110.0, 50.0, 99.0, 55.0],
        )
        .unwrap();
        let positions = Panel::new(
            dates(3),
            vec!["a".into(), "b".into()],
            vec![0.5, -0.5, 0.5, -0.5, 0.5, -0.5],
        )
        .unwrap();
        backtest::run(&prices, &positions).unwrap()
    }

    #[test]
    fn backtest_csv_columns_and_rows() {
        let csv = export_backtest_csv(&ledger()).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(
            lines[0],
            "date,pnl,cum_pnl,turnover,gross_exposure,drawdown,rolling_sharpe"
        );
        assert_eq!(lines.len(), 4);
        assert!(lines[1].starts_with("2024-01-01,0.0000000000,0.0000000000,1.0000000000,1.0000000000"));
        // day 2: 0.5 * 10% = 0.05
        assert!(lines[2].starts_with("2024-01-02,0.0500000000,0.0500000000,0.0000000000"));
        // day 3: 0.5 * -10% - 0.5 * 10% = -0.10, drawdown -0.10
        assert!(lines[3].ends_with(",-0.1000000000,"));
    }

    #[test]
    fn backtest_csv_rolling_sharpe_fills_after_window() {
        let n = ROLLING_SHARPE_WINDOW + 5;
        let ds = dates(n);
        let closes: Vec<f64> = (0..n)
            .flat_map(|i| {
                let wiggle = if i % 2 == 0 { 1.0 } else { 1.002 };
                [100.0 * 1.001_f64.powi(i as i32) * wiggle, 50.0]
            })
            .collect();
        let prices = Panel::new(ds.clone(), vec!["a".into(), "b".into()], closes).unwrap();
        let positions = Panel::new(ds, vec!["a".into(), "b".into()], vec![0.5; 2 * n]).unwrap();
        let out = backtest::run(&prices, &positions).unwrap();
        let expected = rolling_sharpe(out.pnl_ptf.values(), ROLLING_SHARPE_WINDOW, PERIODS_PER_YEAR);

        let csv = export_backtest_csv(&out).unwrap();
        let last_cells: Vec<&str> = csv
            .lines()
            .skip(1)
            .map(|l| l.rsplit(',').next().unwrap())
            .collect();
        assert_eq!(last_cells.len(), n);
        assert!(last_cells[..ROLLING_SHARPE_WINDOW - 1].iter().all(|c| c.is_empty()));
        for i in ROLLING_SHARPE_WINDOW - 1..n {
            let v: f64 = last_cells[i].parse().unwrap();
            assert!((v - expected[i]).abs() < 1e-8, "row {i}: {v} vs {}", expected[i]);
        }
    }

    #[test]
    fn panel_csv_leaves_unknown_empty() {
        let panel = Panel::new(dates(2), vec!["x".into()], vec![f64::NAN, 1.5]).unwrap();
        let csv = export_panel_csv(&panel).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines, vec!["date,x", "2024-01-01,", "2024-01-02,1.5000000000"]);
    }

    #[test]
    fn json_writes_nan_as_null() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("series.json");
        let s = Series::new(dates(1), vec![1.0]).unwrap();
        write_json(&path, &vec![f64::NAN, s.sum()]).unwrap();
        let back: Vec<Option<f64>> =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(back, vec![None, Some(1.0)]);
    }

    #[test]
    fn writes_to_missing_directory_fail_with_context() {
        let err = write_json(Path::new("/nonexistent/dir/x.json"), &1).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/dir/x.json"));
    }
}
