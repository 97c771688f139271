//! Delta-neutral position constructor.
//!
//! Per date: rank the known signals, go long the top `trade_percent` quantile
//! and short the bottom one, demean, then scale to `gross_target`. Unknown
//! signals are excluded from the ranking and get weight 0. With
//! `hold_period > 1` the scaled weights are smoothed with a trailing simple
//! moving average (the first `hold_period - 1` rows are unknown).

use crate::error::EngineError;
use crate::panel::Panel;
use crate::params::TradeParameters;
use crate::stats::quantile_sorted;

/// Gross exposures at or below this are treated as a flat book.
const ZERO_GROSS: f64 = 1e-12;

/// Build the position panel from a signal panel.
pub fn build(signal: &Panel, params: &TradeParameters) -> Result<Panel, EngineError> {
    params.validate()?;
    let weights = target_weights(signal, params.trade_percent, params.gross_target);
    if params.hold_period > 1 {
        Ok(smooth_positions(&weights, params.hold_period))
    } else {
        Ok(weights)
    }
}

/// Demeaned, gross-scaled weights before holding-period smoothing.
pub fn target_weights(signal: &Panel, trade_percent: f64, gross_target: f64) -> Panel {
    let mut weights = Panel::filled_like(signal, 0.0);
    for r in 0..signal.nrows() {
        let row = row_weights(signal.row(r), trade_percent, gross_target);
        weights.row_mut(r).copy_from_slice(&row);
    }
    weights
}

/// Trailing simple moving average of each column over `hold_period` rows.
pub fn smooth_positions(weights: &Panel, hold_period: usize) -> Panel {
    if hold_period <= 1 {
        return weights.clone();
    }
    weights.map_columns(|col| {
        let mut out = vec![f64::NAN; col.len()];
        for t in (hold_period - 1)..col.len() {
            let window = &col[t + 1 - hold_period..=t];
            out[t] = window.iter().sum::<f64>() / hold_period as f64;
        }
        out
    })
}

fn row_weights(signal: &[f64], trade_percent: f64, gross_target: f64) -> Vec<f64> {
    let mut weights = vec![0.0; signal.len()];

    let mut known: Vec<f64> = signal.iter().copied().filter(|v| !v.is_nan()).collect();
    if known.is_empty() {
        return weights;
    }
    known.sort_by(|a, b| a.total_cmp(b));
    let low = quantile_sorted(&known, trade_percent);
    let high = quantile_sorted(&known, 1.0 - trade_percent);

    let mut total = 0.0;
    for (w, &s) in weights.iter_mut().zip(signal) {
        if s.is_nan() {
            continue;
        }
        if s >= high {
            *w += 1.0;
        }
        if s <= low {
            *w -= 1.0;
        }
        total += *w;
    }

    let mean = total / known.len() as f64;
    for (w, &s) in weights.iter_mut().zip(signal) {
        if !s.is_nan() {
            *w -= mean;
        }
    }

    let gross: f64 = weights.iter().map(|w| w.abs()).sum();
    if gross <= ZERO_GROSS {
        weights.fill(0.0);
        return weights;
    }
    let scale = gross_target / gross;
    for w in &mut weights {
        *w *= scale;
    }
    weights
}
