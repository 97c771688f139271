//! Momentum signal engine.
//!
//! Turns a price panel into a signal panel of the same shape. Every mode is
//! causal: the value at row `t` only reads prices at rows `<= t - skip`, and
//! the first `window + skip` rows are unknown.
//!
//! - `Simple`: `log_p[t-skip] - log_p[t-window-skip]`.
//! - `Linear`: weighted sum of the `window` most recent daily log returns with
//!   weights `window, window-1, ..., 1` (most recent first), normalised to 1,
//!   then lagged by `skip`.
//! - `Exponential`: unadjusted EWMA of daily log returns, lagged by `skip`.

use crate::error::EngineError;
use crate::panel::Panel;
use crate::params::{SignalMode, SignalParameters};

/// Generate the momentum signal for every instrument.
pub fn generate(prices: &Panel, params: &SignalParameters) -> Result<Panel, EngineError> {
    params.validate()?;

    let log_p = log_prices(prices);
    let raw = match params.mode {
        SignalMode::Simple => {
            log_p.map_columns(|col| lagged_log_return(col, params.window, params.skip))
        }
        SignalMode::Linear => log_returns(&log_p)
            .map_columns(|col| linear_decay(col, params.window))
            .shift_rows(params.skip),
        SignalMode::Exponential => log_returns(&log_p)
            .map_columns(|col| ewma(col, params.alpha))
            .shift_rows(params.skip),
    };

    let mut signal = mask_warmup(raw, params.warmup_rows());
    if let Some(bound) = params.clip {
        signal = clip(&signal, bound);
    }
    Ok(signal)
}

/// Natural log of prices. Non-positive and non-finite prices become unknown.
pub fn log_prices(prices: &Panel) -> Panel {
    prices.map(|p| {
        if p.is_finite() && p > 0.0 {
            p.ln()
        } else {
            f64::NAN
        }
    })
}

/// Daily log returns; the first row is unknown.
pub fn log_returns(log_prices: &Panel) -> Panel {
    log_prices.map_columns(|col| {
        let mut out = vec![f64::NAN; col.len()];
        for t in 1..col.len() {
            out[t] = col[t] - col[t - 1];
        }
        out
    })
}

/// Symmetric truncation to `[-bound, bound]`. Unknown cells stay unknown.
pub fn clip(signal: &Panel, bound: f64) -> Panel {
    signal.map(|v| if v.is_nan() { v } else { v.clamp(-bound, bound) })
}

/// Linear decay weights for a window, most recent first. Sums to 1.
pub fn linear_weights(window: usize) -> Vec<f64> {
    let total = (window * (window + 1)) as f64 / 2.0;
    (1..=window)
        .map(|k| (window - k + 1) as f64 / total)
        .collect()
}

fn lagged_log_return(col: &[f64], window: usize, skip: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; col.len()];
    for t in (window + skip)..col.len() {
        out[t] = col[t - skip] - col[t - window - skip];
    }
    out
}

fn linear_decay(returns: &[f64], window: usize) -> Vec<f64> {
    let weights = linear_weights(window);
    let mut out = vec![f64::NAN; returns.len()];
    // returns[0] is always unknown, so the first full window ends at `window`.
    for t in window..returns.len() {
        let mut acc = 0.0;
        let mut known = true;
        for (k, w) in weights.iter().enumerate() {
            let r = returns[t - k];
            if r.is_nan() {
                known = false;
                break;
            }
            acc += w * r;
        }
        if known {
            out[t] = acc;
        }
    }
    out
}

fn ewma(returns: &[f64], alpha: f64) -> Vec<f64> {
    let mut out = vec![f64::NAN; returns.len()];
    let mut state: Option<f64> = None;
    for (t, &r) in returns.iter().enumerate() {
        if r.is_nan() {
            continue;
        }
        let next = match state {
            None => r,
            Some(prev) => alpha * r + (1.0 - alpha) * prev,
        };
        state = Some(next);
        out[t] = next;
    }
    out
}

fn mask_warmup(mut signal: Panel, warmup: usize) -> Panel {
    for r in 0..warmup.min(signal.nrows()) {
        signal.row_mut(r).fill(f64::NAN);
    }
    signal
}
