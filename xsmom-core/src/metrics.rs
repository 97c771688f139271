//! Performance metrics: pure functions that reduce a backtest to scalars.
//!
//! Undefined ratios are `NaN`, never errors. Every function tolerates empty and
//! constant input without panicking.

use serde::{Deserialize, Serialize};

use crate::backtest::BacktestOutput;
use crate::stats::{mean, sample_std};

/// Trading days per year used for annualisation.
pub const PERIODS_PER_YEAR: f64 = 252.0;

/// Scale applied to PnL-over-turnover (basis points per unit traded).
pub const POT_SCALE: f64 = 10_000.0;

/// Aggregate performance metrics for a single backtest.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub sharpe: f64,
    pub ann_return: f64,
    pub ann_vol: f64,
    /// Worst peak-to-trough decline of the compounded curve; `<= 0`.
    pub max_dd: f64,
    pub calmar: f64,
    /// PnL over turnover, scaled by [`POT_SCALE`].
    pub pot: f64,
    /// Mean daily turnover.
    pub turnover: f64,
    pub total_pnl: f64,
    pub n_days: usize,
}

impl PerformanceMetrics {
    /// Compute all metrics from daily portfolio PnL and turnover.
    pub fn compute(pnl: &[f64], turnover: &[f64], periods_per_year: f64) -> Self {
        let ann_return = annualized_return(pnl, periods_per_year);
        let ann_vol = annualized_volatility(pnl, periods_per_year);
        let max_dd = max_drawdown(pnl);
        Self {
            sharpe: sharpe_ratio(ann_return, ann_vol),
            ann_return,
            ann_vol,
            max_dd,
            calmar: calmar_ratio(ann_return, max_dd),
            pot: pnl_over_turnover(pnl, turnover),
            turnover: if turnover.is_empty() { 0.0 } else { mean(turnover) },
            total_pnl: pnl.iter().sum(),
            n_days: pnl.len(),
        }
    }

    /// Score a backtest with the default annualisation.
    pub fn from_backtest(output: &BacktestOutput) -> Self {
        Self::compute(
            output.pnl_ptf.values(),
            output.turnover.values(),
            PERIODS_PER_YEAR,
        )
    }
}

/// `(1 + mean)^ppy - 1`. `NaN` for an empty series.
pub fn annualized_return(pnl: &[f64], periods_per_year: f64) -> f64 {
    (1.0 + mean(pnl)).powf(periods_per_year) - 1.0
}

/// Sample standard deviation (ddof 1) scaled by `sqrt(ppy)`.
///
/// Snapped to exactly 0 when the dispersion is numerical noise, so a constant
/// series reports zero volatility. `NaN` below two observations.
pub fn annualized_volatility(pnl: &[f64], periods_per_year: f64) -> f64 {
    let std = sample_std(pnl);
    if std.is_nan() {
        return f64::NAN;
    }
    if std < vol_floor(mean(pnl)) {
        return 0.0;
    }
    std * periods_per_year.sqrt()
}

/// `ann_return / ann_vol`; `NaN` when volatility is zero or undefined.
pub fn sharpe_ratio(ann_return: f64, ann_vol: f64) -> f64 {
    if !(ann_vol > 0.0) {
        return f64::NAN;
    }
    ann_return / ann_vol
}

/// `ann_return / |max_dd|` when there was a drawdown, else `NaN`.
pub fn calmar_ratio(ann_return: f64, max_dd: f64) -> f64 {
    if max_dd < 0.0 {
        ann_return / max_dd.abs()
    } else {
        f64::NAN
    }
}

/// `sum(pnl) / sum(turnover) * 10_000`; `NaN` when nothing traded.
pub fn pnl_over_turnover(pnl: &[f64], turnover: &[f64]) -> f64 {
    let traded: f64 = turnover.iter().sum();
    if traded.abs() < f64::EPSILON {
        return f64::NAN;
    }
    pnl.iter().sum::<f64>() / traded * POT_SCALE
}

/// Compounded curve `prod(1 + pnl)`.
pub fn cumulative_curve(pnl: &[f64]) -> Vec<f64> {
    pnl.iter()
        .scan(1.0, |acc, r| {
            *acc *= 1.0 + r;
            Some(*acc)
        })
        .collect()
}

/// `cum / running_max(cum) - 1` for every day.
pub fn drawdown_curve(pnl: &[f64]) -> Vec<f64> {
    let mut peak = f64::NEG_INFINITY;
    cumulative_curve(pnl)
        .into_iter()
        .map(|c| {
            peak = peak.max(c);
            if peak > 0.0 {
                c / peak - 1.0
            } else {
                0.0
            }
        })
        .collect()
}

/// Minimum of the drawdown curve; 0 for an empty or never-declining series.
pub fn max_drawdown(pnl: &[f64]) -> f64 {
    drawdown_curve(pnl).into_iter().fold(0.0, f64::min)
}

/// Annualised Sharpe over a trailing window; the first `window - 1` days are `NaN`.
pub fn rolling_sharpe(pnl: &[f64], window: usize, periods_per_year: f64) -> Vec<f64> {
    let mut out = vec![f64::NAN; pnl.len()];
    if window < 2 {
        return out;
    }
    for t in (window - 1)..pnl.len() {
        let slice = &pnl[t + 1 - window..=t];
        out[t] = sharpe_ratio(
            annualized_return(slice, periods_per_year),
            annualized_volatility(slice, periods_per_year),
        );
    }
    out
}

fn vol_floor(mean: f64) -> f64 {
    1e-15_f64.max(mean.abs() * 1e-12)
}
