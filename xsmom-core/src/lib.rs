//! xsmom core: price panels and the four numerical research stages.
//!
//! - `signal`: cross-sectional momentum signal (simple, linear decay, EWMA)
//! - `position`: delta-neutral quantile long/short weights
//! - `backtest`: daily PnL ledger with turnover and gross exposure
//! - `metrics`: Sharpe, annualised return/volatility, drawdown, Calmar, PnL over turnover
//!
//! Every stage takes a `Panel` (dates × instruments) and returns one with the
//! same axes. Rows lacking history are unknown (`NaN`), never dropped.

pub mod backtest;
pub mod error;
pub mod metrics;
pub mod panel;
pub mod params;
pub mod position;
pub mod rng;
pub mod signal;
pub mod stats;

pub use backtest::BacktestOutput;
pub use error::EngineError;
pub use metrics::{PerformanceMetrics, PERIODS_PER_YEAR};
pub use panel::{Panel, PanelError, Series};
pub use params::{SignalMode, SignalParameters, TradeParameters};
pub use rng::RngHierarchy;

/// Run signal, position, backtest and scoring in sequence.
pub fn evaluate(
    prices: &Panel,
    signal_params: &SignalParameters,
    trade_params: &TradeParameters,
) -> Result<(Panel, Panel, BacktestOutput, PerformanceMetrics), EngineError> {
    let signal = signal::generate(prices, signal_params)?;
    let positions = position::build(&signal, trade_params)?;
    let backtest = backtest::run(prices, &positions)?;
    let performance = PerformanceMetrics::from_backtest(&backtest);
    Ok((signal, positions, backtest, performance))
}
