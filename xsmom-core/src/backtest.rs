//! Vectorized backtest ledger.
//!
//! Return convention: percentage, `ret[t] = price[t] / price[t-1] - 1`.
//! Yesterday's position earns today's return: `pnl[t] = pos[t-1] * ret[t]`,
//! with no exposure before the first row. A return touching an unknown price
//! is 0 and an unknown position is flat. No scaling, costs or risk adjustment.

use crate::error::EngineError;
use crate::panel::{Panel, Series};

/// Daily ledger produced by [`run`].
#[derive(Debug, Clone)]
pub struct BacktestOutput {
    /// Instrument-level PnL.
    pub pnl: Panel,
    /// Portfolio PnL (cross-sectional sum of `pnl`).
    pub pnl_ptf: Series,
    /// Sum of absolute position changes versus the prior day.
    pub turnover: Series,
    /// Sum of absolute positions.
    pub gross_exposure: Series,
}

impl BacktestOutput {
    pub fn len(&self) -> usize {
        self.pnl_ptf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pnl_ptf.is_empty()
    }
}

/// Run the accounting pass over aligned price and position panels.
pub fn run(prices: &Panel, positions: &Panel) -> Result<BacktestOutput, EngineError> {
    if !prices.same_axes(positions) {
        return Err(EngineError::AxisMismatch(format!(
            "prices are {}x{}, positions are {}x{} (dates and instruments must match)",
            prices.nrows(),
            prices.ncols(),
            positions.nrows(),
            positions.ncols()
        )));
    }

    let returns = simple_returns(prices);
    let (rows, cols) = prices.shape();
    let mut pnl = Panel::filled_like(prices, 0.0);
    let mut pnl_ptf = Vec::with_capacity(rows);
    let mut turnover = Vec::with_capacity(rows);
    let mut gross = Vec::with_capacity(rows);

    let mut prev = vec![0.0; cols];
    for t in 0..rows {
        let current: Vec<f64> = positions.row(t).iter().map(|&w| flat_if_unknown(w)).collect();
        let ret = returns.row(t);

        let mut day_pnl = 0.0;
        let mut day_turnover = 0.0;
        let mut day_gross = 0.0;
        for c in 0..cols {
            let cell = prev[c] * ret[c];
            pnl.set(t, c, cell);
            day_pnl += cell;
            day_turnover += (current[c] - prev[c]).abs();
            day_gross += current[c].abs();
        }
        pnl_ptf.push(day_pnl);
        turnover.push(day_turnover);
        gross.push(day_gross);
        prev = current;
    }

    let dates = prices.dates().to_vec();
    Ok(BacktestOutput {
        pnl,
        pnl_ptf: Series::new(dates.clone(), pnl_ptf)?,
        turnover: Series::new(dates.clone(), turnover)?,
        gross_exposure: Series::new(dates, gross)?,
    })
}

/// Percentage price change per instrument; 0 where either price is unknown.
pub fn simple_returns(prices: &Panel) -> Panel {
    prices.map_columns(|col| {
        let mut out = vec![0.0; col.len()];
        for t in 1..col.len() {
            let (prev, cur) = (col[t - 1], col[t]);
            if is_tradable(prev) && is_tradable(cur) {
                out[t] = cur / prev - 1.0;
            }
        }
        out
    })
}

fn is_tradable(price: f64) -> bool {
    price.is_finite() && price > 0.0
}

fn flat_if_unknown(weight: f64) -> f64 {
    if weight.is_finite() {
        weight
    } else {
        0.0
    }
}
