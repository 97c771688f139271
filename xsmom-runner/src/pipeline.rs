//! Research pipeline: config + prices -> signal -> positions -> backtest -> metrics.
//!
//! Two entry points:
//! - `run_pipeline()`: loads the config file and prices from SQLite, then runs once.
//! - `Pipeline::evaluate()`: repeated in-memory runs over pre-loaded prices.
//!   Used as the optimizer objective.

use std::path::Path;

use thiserror::Error;

use xsmom_core::{
    backtest, position, signal, BacktestOutput, EngineError, Panel, PerformanceMetrics,
    SignalMode,
};

use crate::config::{ConfigError, ResearchConfig, TrialOverrides};
use crate::data_loader::{dataset_hash, LoadError, PriceRequest, PriceSource, SqlitePriceSource};
use crate::optimizer::TrialEvaluator;
use crate::search_space::TrialParams;

/// Errors from a pipeline run.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("data error: {0}")]
    Data(#[from] LoadError),
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
}

/// Everything one run produces.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub performance: PerformanceMetrics,
    pub signal: Panel,
    pub positions: Panel,
    pub backtest: BacktestOutput,
    /// BLAKE3 fingerprint of the input prices.
    pub dataset_hash: String,
}

/// Base configuration bound to a loaded price panel.
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: ResearchConfig,
    prices: Panel,
    dataset_hash: String,
}

impl Pipeline {
    pub fn new(config: ResearchConfig, prices: Panel) -> Self {
        let dataset_hash = dataset_hash(&prices);
        Self {
            config,
            prices,
            dataset_hash,
        }
    }

    pub fn config(&self) -> &ResearchConfig {
        &self.config
    }

    pub fn prices(&self) -> &Panel {
        &self.prices
    }

    pub fn dataset_hash(&self) -> &str {
        &self.dataset_hash
    }

    /// Run all four stages with `overrides` applied to a copy of the base config.
    pub fn evaluate(
        &self,
        mode: SignalMode,
        overrides: Option<&TrialOverrides>,
    ) -> Result<PipelineOutput, RunError> {
        let applied;
        let config = match overrides {
            Some(o) if !o.is_empty() => {
                applied = self.config.apply_overrides(o);
                &applied
            }
            _ => &self.config,
        };
        let signal_params = config.signal_params(mode)?;
        let trade_params = config.trade_params()?;

        tracing::info!(
            mode = %mode,
            window = signal_params.window,
            skip = signal_params.skip,
            instruments = self.prices.ncols(),
            days = self.prices.nrows(),
            "generating signal"
        );
        let signal = signal::generate(&self.prices, &signal_params)?;
        tracing::debug!(known = signal.known_count(), "signal cells known");
        if signal.is_all_unknown() {
            tracing::warn!(
                window = signal_params.window,
                skip = signal_params.skip,
                days = self.prices.nrows(),
                "insufficient history: signal is entirely unknown"
            );
        }

        tracing::info!(
            trade_percent = trade_params.trade_percent,
            gross_target = trade_params.gross_target,
            hold_period = trade_params.hold_period,
            "constructing positions"
        );
        let positions = position::build(&signal, &trade_params)?;

        tracing::info!("running backtest");
        let backtest = backtest::run(&self.prices, &positions)?;

        let performance = PerformanceMetrics::from_backtest(&backtest);
        tracing::info!(
            sharpe = performance.sharpe,
            ann_return = performance.ann_return,
            max_dd = performance.max_dd,
            turnover = performance.turnover,
            "evaluation complete"
        );

        Ok(PipelineOutput {
            performance,
            signal,
            positions,
            backtest,
            dataset_hash: self.dataset_hash.clone(),
        })
    }
}

impl TrialEvaluator for Pipeline {
    fn evaluate(&self, params: &TrialParams) -> Result<PerformanceMetrics, RunError> {
        let overrides = params.overrides();
        Pipeline::evaluate(self, params.strategy, Some(&overrides)).map(|out| out.performance)
    }
}

/// Load `config_path`, fetch prices from the configured SQLite database and run once.
pub fn run_pipeline(
    config_path: &Path,
    instruments: &[String],
    start_date: u32,
    end_date: Option<u32>,
    mode: SignalMode,
    overrides: Option<&TrialOverrides>,
) -> Result<PipelineOutput, RunError> {
    let config = ResearchConfig::from_file(config_path)?;
    let db_path = config.data.db_path.clone().ok_or_else(|| {
        LoadError::InvalidArgument(format!(
            "config {} has no data.db_path",
            config_path.display()
        ))
    })?;
    let source = SqlitePriceSource::new(db_path, config.data.table.clone());
    let request = PriceRequest::new(instruments.to_vec(), start_date, end_date);
    let prices = load_prices(&source, &request)?;
    Pipeline::new(config, prices).evaluate(mode, overrides)
}

/// Load through any source, logging the shape and provenance of the panel.
pub fn load_prices(source: &dyn PriceSource, request: &PriceRequest) -> Result<Panel, LoadError> {
    tracing::info!(
        source = source.name(),
        instruments = request.instruments.len(),
        start = request.start_date,
        end = ?request.end_date,
        "loading prices"
    );
    let prices = source.load(request)?;
    tracing::info!(
        days = prices.nrows(),
        instruments = prices.ncols(),
        synthetic = source.is_synthetic(),
        "prices loaded"
    );
    Ok(prices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_loader::SyntheticPriceSource;

    const CONFIG: &str = r#"
[factor]
window = 20
skip = 1

[trade]
trade_percent = 0.2
gross_target = 1.0
hold_period = 5
"#;

    fn pipeline() -> Pipeline {
        let names: Vec<String> = ["rb", "cu", "al", "zn", "au", "ag"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let request = PriceRequest::new(names, 20200101, Some(20201231));
        let prices = SyntheticPriceSource::new(9).load(&request).unwrap();
        Pipeline::new(ResearchConfig::from_toml_str(CONFIG).unwrap(), prices)
    }

    #[test]
    fn evaluate_keeps_axes() {
        let p = pipeline();
        let out = p.evaluate(SignalMode::Simple, None).unwrap();
        assert!(out.signal.same_axes(p.prices()));
        assert!(out.positions.same_axes(p.prices()));
        assert_eq!(out.backtest.len(), p.prices().nrows());
        assert_eq!(out.performance.n_days, p.prices().nrows());
    }

    #[test]
    fn output_carries_dataset_fingerprint() {
        let p = pipeline();
        let a = p.evaluate(SignalMode::Simple, None).unwrap();
        let b = p.evaluate(SignalMode::Exponential, None).unwrap();
        assert_eq!(a.dataset_hash, dataset_hash(p.prices()));
        assert_eq!(a.dataset_hash, b.dataset_hash);
        assert_eq!(a.dataset_hash.len(), 64);
    }

    #[test]
    fn overrides_do_not_touch_base_config() {
        let p = pipeline();
        let overrides = TrialOverrides {
            window: Some(60),
            ..TrialOverrides::default()
        };
        let out = p.evaluate(SignalMode::Linear, Some(&overrides)).unwrap();
        assert_eq!(out.signal.leading_unknown_rows(), 61);
        assert_eq!(p.config().factor.window, 20);
    }

    #[test]
    fn oversized_window_is_not_an_error() {
        let p = pipeline();
        let overrides = TrialOverrides {
            window: Some(10_000),
            ..TrialOverrides::default()
        };
        let out = p.evaluate(SignalMode::Simple, Some(&overrides)).unwrap();
        assert!(out.signal.is_all_unknown());
        assert_eq!(out.performance.total_pnl, 0.0);
        assert!(out.performance.sharpe.is_nan());
    }

    #[test]
    fn invalid_override_is_config_error() {
        let p = pipeline();
        let overrides = TrialOverrides {
            trade_percent: Some(0.9),
            ..TrialOverrides::default()
        };
        assert!(matches!(
            p.evaluate(SignalMode::Simple, Some(&overrides)),
            Err(RunError::Config(_))
        ));
    }

    #[test]
    fn run_pipeline_requires_db_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("xsmom.toml");
        std::fs::write(&path, CONFIG).unwrap();
        let err = run_pipeline(&path, &["rb".to_string()], 20200101, None, SignalMode::Simple, None)
            .unwrap_err();
        assert!(matches!(err, RunError::Data(LoadError::InvalidArgument(_))));
    }
}
